//! Mock adapters shared by unit and integration tests across the
//! whole orchestrator. Production code never depends on this module;
//! it is gated behind `#[cfg(test)]` re-exports only indirectly (the
//! module itself stays compiled in normal builds so integration tests
//! under `tests/` can reach it as `gpu_standby_core::testing`).

use crate::error::{Error, Result};
use crate::provider::{CpuProvider, GpuProvider, InstanceStatusReport, OfferFilter, ProviderInstanceStatus};
use crate::types::Offer;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone)]
pub struct ScriptedInstance {
    pub host: String,
    pub port: u16,
}

/// A `GpuProvider` double. `create_instance` returns the offer id
/// itself as the candidate id, so tests can assert on it directly.
/// An offer with no [`ScriptedInstance`] registered stays in
/// `Launching` forever, modeling a candidate that never comes up.
pub struct MockGpuProvider {
    offers: Vec<Offer>,
    scripted: DashMap<String, ScriptedInstance>,
    fail_create: DashMap<String, String>,
    destroyed: Mutex<Vec<String>>,
    create_calls: AtomicU64,
}

impl MockGpuProvider {
    pub fn new(offers: Vec<Offer>) -> Self {
        Self {
            offers,
            scripted: DashMap::new(),
            fail_create: DashMap::new(),
            destroyed: Mutex::new(Vec::new()),
            create_calls: AtomicU64::new(0),
        }
    }

    pub fn script_instance(&self, offer_id: &str, instance: ScriptedInstance) {
        self.scripted.insert(offer_id.to_string(), instance);
    }

    pub fn fail_create_for(&self, offer_id: &str, cause: &str) {
        self.fail_create.insert(offer_id.to_string(), cause.to_string());
    }

    pub fn destroyed_ids(&self) -> Vec<String> {
        let mut v = self.destroyed.lock().clone();
        v.sort();
        v
    }

    pub fn create_call_count(&self) -> u64 {
        self.create_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GpuProvider for MockGpuProvider {
    fn name(&self) -> &str {
        "mock-gpu"
    }

    async fn search_offers(&self, _filter: &OfferFilter) -> Result<Vec<Offer>> {
        Ok(self.offers.clone())
    }

    async fn create_instance(&self, offer_id: &str, _image: &str, _disk_gb: u32, _ssh_pubkey: &str) -> Result<String> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(cause) = self.fail_create.get(offer_id) {
            return Err(Error::TransientProviderError {
                operation: "create_instance".into(),
                target: offer_id.to_string(),
                cause: cause.clone(),
            });
        }
        Ok(offer_id.to_string())
    }

    async fn get_instance(&self, candidate_id: &str) -> Result<InstanceStatusReport> {
        match self.scripted.get(candidate_id) {
            Some(instance) => Ok(InstanceStatusReport {
                status: ProviderInstanceStatus::Running,
                ssh_host: Some(instance.host.clone()),
                ssh_port: Some(instance.port),
                public_ip: Some(instance.host.clone()),
            }),
            None => Ok(InstanceStatusReport {
                status: ProviderInstanceStatus::Launching,
                ssh_host: None,
                ssh_port: None,
                public_ip: None,
            }),
        }
    }

    async fn destroy_instance(&self, candidate_id: &str) -> Result<()> {
        self.destroyed.lock().push(candidate_id.to_string());
        self.scripted.remove(candidate_id);
        Ok(())
    }
}

/// A `CpuProvider` double with the same always-on-success shape.
pub struct MockCpuProvider {
    scripted: DashMap<String, ScriptedInstance>,
    destroyed: Mutex<Vec<String>>,
    next_id: AtomicU64,
}

impl Default for MockCpuProvider {
    fn default() -> Self {
        Self {
            scripted: DashMap::new(),
            destroyed: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }
}

impl MockCpuProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn destroyed_ids(&self) -> Vec<String> {
        self.destroyed.lock().clone()
    }
}

#[async_trait]
impl CpuProvider for MockCpuProvider {
    fn name(&self) -> &str {
        "mock-cpu"
    }

    async fn create_instance(
        &self,
        zone: &str,
        _machine_type: &str,
        _disk_gb: u32,
        _use_spot: bool,
        _ssh_pubkey: &str,
    ) -> Result<String> {
        let id = format!("mirror-{}-{}", zone, self.next_id.fetch_add(1, Ordering::SeqCst));
        self.scripted.insert(
            id.clone(),
            ScriptedInstance {
                host: format!("{id}.internal"),
                port: 22,
            },
        );
        Ok(id)
    }

    async fn get_instance(&self, instance_id: &str) -> Result<InstanceStatusReport> {
        match self.scripted.get(instance_id) {
            Some(instance) => Ok(InstanceStatusReport {
                status: ProviderInstanceStatus::Running,
                ssh_host: Some(instance.host.clone()),
                ssh_port: Some(instance.port),
                public_ip: Some(instance.host.clone()),
            }),
            None => Ok(InstanceStatusReport {
                status: ProviderInstanceStatus::Terminated,
                ssh_host: None,
                ssh_port: None,
                public_ip: None,
            }),
        }
    }

    async fn destroy_instance(&self, instance_id: &str) -> Result<()> {
        self.destroyed.lock().push(instance_id.to_string());
        self.scripted.remove(instance_id);
        Ok(())
    }
}
