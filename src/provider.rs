//! Adapter boundary: `GpuProvider` / `CpuProvider`. The core consumes
//! these traits only; the concrete spot-market / cloud-VM SDKs live
//! outside the core (see spec.md section 1, "Out of scope").

use crate::error::Result;
use crate::types::{Offer, SshEndpoint};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Search/launch filter passed to [`GpuProvider::search_offers`].
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OfferFilter {
    pub gpu_model: Option<String>,
    pub min_vram_bytes: Option<u64>,
    pub min_reliability_score: Option<f64>,
    pub max_price_per_hour: Option<f64>,
    pub preferred_zones: Vec<String>,
}

impl OfferFilter {
    pub fn matches(&self, offer: &Offer) -> bool {
        if let Some(model) = &self.gpu_model {
            if &offer.gpu_model != model {
                return false;
            }
        }
        if let Some(min_vram) = self.min_vram_bytes {
            if offer.vram_bytes < min_vram {
                return false;
            }
        }
        if let Some(min_rel) = self.min_reliability_score {
            if offer.reliability_score < min_rel {
                return false;
            }
        }
        if let Some(max_price) = self.max_price_per_hour {
            if offer.price_per_hour > max_price {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderInstanceStatus {
    Launching,
    Running,
    Stopping,
    Stopped,
    Terminated,
    Unknown,
}

/// Raw status as reported by a provider adapter, before the
/// Provisioner layers SSH-reachability and readiness checks on top.
#[derive(Debug, Clone)]
pub struct InstanceStatusReport {
    pub status: ProviderInstanceStatus,
    pub ssh_host: Option<String>,
    pub ssh_port: Option<u16>,
    pub public_ip: Option<String>,
}

/// Abstracts the spot-GPU marketplace. One implementation per
/// marketplace provider; the core never sees provider-specific JSON.
#[auto_impl::auto_impl(&, Arc)]
#[async_trait]
pub trait GpuProvider: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn search_offers(&self, filter: &OfferFilter) -> Result<Vec<Offer>>;

    /// Returns the provider-assigned instance id (the `candidate_id`).
    async fn create_instance(
        &self,
        offer_id: &str,
        image: &str,
        disk_gb: u32,
        ssh_pubkey: &str,
    ) -> Result<String>;

    async fn get_instance(&self, candidate_id: &str) -> Result<InstanceStatusReport>;

    /// Idempotent: "not found" is success.
    async fn destroy_instance(&self, candidate_id: &str) -> Result<()>;
}

/// Abstracts the long-running CPU-VM provider used for standby
/// mirrors.
#[auto_impl::auto_impl(&, Arc)]
#[async_trait]
pub trait CpuProvider: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn create_instance(
        &self,
        zone: &str,
        machine_type: &str,
        disk_gb: u32,
        use_spot: bool,
        ssh_pubkey: &str,
    ) -> Result<String>;

    async fn get_instance(&self, instance_id: &str) -> Result<InstanceStatusReport>;

    /// Idempotent: "not found" is success.
    async fn destroy_instance(&self, instance_id: &str) -> Result<()>;
}

/// Convenience used by several components to turn a raw provider
/// status report into an [`SshEndpoint`] once coordinates are present.
pub fn endpoint_from_report(report: &InstanceStatusReport, user: &str) -> Option<SshEndpoint> {
    match (&report.ssh_host, report.ssh_port) {
        (Some(host), Some(port)) => Some(SshEndpoint {
            host: host.clone(),
            port,
            user: user.to_string(),
        }),
        _ => None,
    }
}
