//! GPU liveness detection (spec.md section 4.6): polls each GPU
//! instance on a fixed interval and declares it down after a
//! consecutive-failure threshold, debouncing back to healthy on the
//! first success.

use crate::types::SshEndpoint;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Liveness probe abstraction so the monitor never depends on a
/// concrete transport; the production implementation dials + runs a
/// trivial remote command the same way [`crate::provisioner::ReadinessProbe`]
/// does, just without the sshable/ready staging since the instance is
/// already known-good by the time it reaches this monitor.
#[async_trait]
pub trait HealthProbe: Send + Sync + 'static {
    async fn check(&self, endpoint: &SshEndpoint) -> crate::error::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthEvent {
    /// Probe succeeded and the association was already considered healthy.
    Healthy,
    /// Probe failed but the threshold hasn't been reached yet.
    StillFailing { consecutive: u32 },
    /// Threshold just reached on this call; emitted exactly once per
    /// outage (spec.md section 4.6, "debounced: a single success
    /// resets the counter").
    GpuDown { consecutive: u32 },
    /// First success after a `GpuDown` was emitted.
    Recovered,
}

#[derive(Debug, Default)]
struct AssociationHealth {
    consecutive_failures: u32,
    down_emitted: bool,
}

/// Tracks consecutive-failure counts per association id. Shared
/// across every association's polling task.
pub struct HealthMonitor {
    failure_threshold: u32,
    state: DashMap<String, AssociationHealth>,
}

impl HealthMonitor {
    pub fn new(failure_threshold: u32) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            state: DashMap::new(),
        }
    }

    /// Feeds one probe result into the association's failure counter
    /// and returns the event the caller should act on.
    pub fn record(&self, association_id: &str, probe_result: crate::error::Result<()>) -> HealthEvent {
        let mut entry = self.state.entry(association_id.to_string()).or_default();
        match probe_result {
            Ok(()) => {
                let was_down = entry.down_emitted;
                entry.consecutive_failures = 0;
                entry.down_emitted = false;
                if was_down {
                    info!(association_id, "gpu recovered after outage");
                    HealthEvent::Recovered
                } else {
                    HealthEvent::Healthy
                }
            }
            Err(e) => {
                entry.consecutive_failures += 1;
                let consecutive = entry.consecutive_failures;
                if consecutive >= self.failure_threshold && !entry.down_emitted {
                    entry.down_emitted = true;
                    warn!(association_id, consecutive, error = %e, "gpu declared down");
                    HealthEvent::GpuDown { consecutive }
                } else {
                    warn!(association_id, consecutive, error = %e, "health probe failed");
                    HealthEvent::StillFailing { consecutive }
                }
            }
        }
    }

    pub fn consecutive_failures(&self, association_id: &str) -> u32 {
        self.state
            .get(association_id)
            .map(|e| e.consecutive_failures)
            .unwrap_or(0)
    }

    /// Drops all tracked state for an association; called on teardown
    /// or after recovery reassigns a fresh instance id.
    pub fn forget(&self, association_id: &str) {
        self.state.remove(association_id);
    }

    /// Polls `probe` against `endpoint` on a fixed interval until
    /// `cancel` resolves, feeding every result through [`Self::record`]
    /// and invoking `on_event` with the outcome.
    pub async fn run_forever<F>(
        self: Arc<Self>,
        association_id: String,
        endpoint: SshEndpoint,
        probe: Arc<dyn HealthProbe>,
        interval: std::time::Duration,
        mut on_event: F,
        cancel: tokio_util::sync::CancellationToken,
    ) where
        F: FnMut(HealthEvent) + Send,
    {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    let result = probe.check(&endpoint).await;
                    let event = self.record(&association_id, result);
                    on_event(event);
                }
            }
        }
    }
}
