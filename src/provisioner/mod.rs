//! Parallel-race GPU provisioner (spec.md section 4.4): launches
//! batches of offers, races them for first-ready, and destroys losers
//! deterministically.

pub mod rate_limit;

use crate::config::OrchestratorConfig;
use crate::error::{Error, Result};
use crate::provider::{endpoint_from_report, GpuProvider, OfferFilter, ProviderInstanceStatus};
use crate::types::{CandidateState, GpuInstance, Offer, SshEndpoint};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rate_limit::{retry_with_backoff, RateGate};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Liveness check layered on top of the raw provider status: a
/// Candidate becomes `sshable` once the TCP dial succeeds and `ready`
/// once a trivial remote command succeeds (spec.md section 4.4,
/// step 3c).
#[async_trait]
pub trait ReadinessProbe: Send + Sync + 'static {
    async fn dial(&self, endpoint: &SshEndpoint) -> Result<()>;
    async fn ready_check(&self, endpoint: &SshEndpoint) -> Result<()>;
}

/// Drives the real checks over SSH: a bounded TCP dial, then
/// `nvidia-smi` (or an equivalent configured trivial command).
pub struct SshReadinessProbe {
    pub key: crate::ssh::SshKeyPair,
    pub ready_command: String,
}

#[async_trait]
impl ReadinessProbe for SshReadinessProbe {
    async fn dial(&self, endpoint: &SshEndpoint) -> Result<()> {
        crate::ssh::RemoteHost::new(endpoint.clone(), self.key.clone())
            .dial()
            .await
    }

    async fn ready_check(&self, endpoint: &SshEndpoint) -> Result<()> {
        crate::ssh::RemoteHost::new(endpoint.clone(), self.key.clone())
            .run_command(&self.ready_command)
            .await
            .map(|_| ())
    }
}

/// Per-attempt observability record (spec.md section 4.4,
/// "Observability"), fed back into timeout tuning externally.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub offer_id: String,
    pub launched_at: DateTime<Utc>,
    pub ssh_ready_at: Option<DateTime<Utc>>,
    pub final_state: CandidateState,
    pub destroyed_at: Option<DateTime<Utc>>,
}

enum CandidateUpdate {
    Progress {
        candidate_id: String,
        state: CandidateState,
    },
    Ready {
        candidate_id: String,
        endpoint: SshEndpoint,
    },
    Failed {
        candidate_id: String,
        error: String,
    },
}

struct LaunchedCandidate {
    candidate_id: String,
    offer: Offer,
    launched_at: DateTime<Utc>,
}

/// Launches offers in parallel rounds, races them for first-ready, and
/// destroys losers. One instance is shared across concurrent
/// `acquire` calls; the rate gate and blacklist are its only shared
/// mutable state.
pub struct Provisioner<P: GpuProvider> {
    provider: Arc<P>,
    prober: Arc<dyn ReadinessProbe>,
    ssh_pubkey: String,
    image: String,
    disk_gb: u32,
    config: OrchestratorConfig,
    gate: RateGate,
    /// offer_id -> historical success rate in [0, 1]; offers below 30%
    /// are filtered out before launch (spec.md section 4.4, step 2).
    blacklist: Mutex<HashMap<String, f64>>,
    attempts: Mutex<Vec<AttemptRecord>>,
}

impl<P: GpuProvider> Provisioner<P> {
    pub fn new(
        provider: Arc<P>,
        prober: Arc<dyn ReadinessProbe>,
        ssh_pubkey: impl Into<String>,
        image: impl Into<String>,
        disk_gb: u32,
        config: OrchestratorConfig,
    ) -> Self {
        let gate = RateGate::new(Duration::from_millis(config.provider_min_spacing_ms));
        Self {
            provider,
            prober,
            ssh_pubkey: ssh_pubkey.into(),
            image: image.into(),
            disk_gb,
            config,
            gate,
            blacklist: Mutex::new(HashMap::new()),
            attempts: Mutex::new(Vec::new()),
        }
    }

    pub fn record_outcome(&self, offer_id: impl Into<String>, success_rate: f64) {
        self.blacklist.lock().insert(offer_id.into(), success_rate);
    }

    pub fn attempts(&self) -> Vec<AttemptRecord> {
        self.attempts.lock().clone()
    }

    /// `acquire(filter, preferred_zones, max_rounds, batch_size) -> GpuInstance`.
    #[instrument(skip(self, filter))]
    pub async fn acquire(&self, filter: &OfferFilter) -> Result<GpuInstance> {
        let mut offers = self.provider.search_offers(filter).await?;
        offers.retain(|o| filter.matches(o));
        offers.retain(|o| {
            self.blacklist
                .lock()
                .get(&o.offer_id)
                .map(|rate| *rate >= 0.30)
                .unwrap_or(true)
        });
        sort_by_zone_then_price(&mut offers, &filter.preferred_zones);

        let mut offset = 0;
        for round in 0..self.config.provision_max_rounds {
            if offset >= offers.len() {
                break;
            }
            let end = (offset + self.config.provision_batch_size).min(offers.len());
            let batch = &offers[offset..end];
            offset = end;

            if let Some(instance) = self.run_round(round, batch).await? {
                return Ok(instance);
            }
        }

        Err(Error::AcquireExhausted {
            rounds: self.config.provision_max_rounds,
            filter: format!("{filter:?}", filter = DebugFilter(filter)),
        })
    }

    async fn run_round(&self, round: u32, batch: &[Offer]) -> Result<Option<GpuInstance>> {
        info!(round, batch_size = batch.len(), "launching provisioning round");

        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(batch.len().max(1));
        let mut launched = Vec::with_capacity(batch.len());

        for offer in batch {
            self.gate.acquire().await;
            let offer = offer.clone();
            let candidate_id = match retry_with_backoff("create_instance", &offer.offer_id, || {
                self.provider
                    .create_instance(&offer.offer_id, &self.image, self.disk_gb, &self.ssh_pubkey)
            })
            .await
            {
                Ok(id) => id,
                Err(e) => {
                    warn!(offer_id = %offer.offer_id, error = %e, "launch failed, skipping candidate");
                    continue;
                }
            };

            let launched_at = Utc::now();
            launched.push(LaunchedCandidate {
                candidate_id: candidate_id.clone(),
                offer: offer.clone(),
                launched_at,
            });

            let provider = self.provider.clone();
            let prober = self.prober.clone();
            let child_token = cancel.child_token();
            let tx = tx.clone();
            let cid = candidate_id.clone();
            tokio::spawn(async move {
                monitor_candidate(provider, prober, cid, child_token, tx).await;
            });
        }
        drop(tx);

        let deadline = tokio::time::sleep(self.config.provision_round_deadline());
        tokio::pin!(deadline);

        let mut ready_at: HashMap<String, DateTime<Utc>> = HashMap::new();
        let mut final_states: HashMap<String, CandidateState> = HashMap::new();
        let winner = loop {
            tokio::select! {
                _ = &mut deadline => break None,
                maybe_update = rx.recv() => {
                    match maybe_update {
                        Some(CandidateUpdate::Progress { candidate_id, state }) => {
                            if state == CandidateState::Sshable {
                                ready_at.entry(candidate_id.clone()).or_insert_with(Utc::now);
                            }
                            final_states.insert(candidate_id, state);
                        }
                        Some(CandidateUpdate::Ready { candidate_id, endpoint }) => {
                            final_states.insert(candidate_id.clone(), CandidateState::Ready);
                            break Some((candidate_id, endpoint));
                        }
                        Some(CandidateUpdate::Failed { candidate_id, error }) => {
                            warn!(candidate_id, error, "candidate failed during race");
                            final_states.insert(candidate_id, CandidateState::Failed);
                        }
                        None => break None,
                    }
                }
            }
        };

        cancel.cancel();

        let destroyed_at = Utc::now();
        let winner_id = winner.as_ref().map(|(id, _)| id.clone());
        for candidate in &launched {
            if Some(&candidate.candidate_id) == winner_id.as_ref() {
                continue;
            }
            if let Err(e) = self.provider.destroy_instance(&candidate.candidate_id).await {
                warn!(candidate_id = %candidate.candidate_id, error = %e, "failed to destroy losing candidate");
            }
        }

        for candidate in &launched {
            let final_state = final_states
                .get(&candidate.candidate_id)
                .copied()
                .unwrap_or(CandidateState::Failed);
            self.attempts.lock().push(AttemptRecord {
                offer_id: candidate.offer.offer_id.clone(),
                launched_at: candidate.launched_at,
                ssh_ready_at: ready_at.get(&candidate.candidate_id).copied(),
                final_state: if Some(&candidate.candidate_id) == winner_id.as_ref() {
                    CandidateState::Ready
                } else {
                    final_state
                },
                destroyed_at: if Some(&candidate.candidate_id) == winner_id.as_ref() {
                    None
                } else {
                    Some(destroyed_at)
                },
            });
        }

        match winner {
            Some((candidate_id, endpoint)) => {
                let offer = launched
                    .iter()
                    .find(|c| c.candidate_id == candidate_id)
                    .map(|c| c.offer.clone())
                    .expect("winner must be among launched candidates");
                Ok(Some(GpuInstance {
                    instance_id: candidate_id,
                    offer,
                    ssh_endpoint: endpoint,
                    workspace_path: "/workspace".to_string(),
                    provisioned_at: Utc::now(),
                }))
            }
            None => Ok(None),
        }
    }
}

async fn monitor_candidate<P: GpuProvider + ?Sized>(
    provider: Arc<P>,
    prober: Arc<dyn ReadinessProbe>,
    candidate_id: String,
    cancel: CancellationToken,
    tx: mpsc::Sender<CandidateUpdate>,
) {
    let mut state = CandidateState::Launching;
    loop {
        if cancel.is_cancelled() {
            return;
        }

        let report = match provider.get_instance(&candidate_id).await {
            Ok(r) => r,
            Err(e) => {
                let _ = tx
                    .send(CandidateUpdate::Failed {
                        candidate_id: candidate_id.clone(),
                        error: e.to_string(),
                    })
                    .await;
                return;
            }
        };

        match report.status {
            ProviderInstanceStatus::Stopping
            | ProviderInstanceStatus::Stopped
            | ProviderInstanceStatus::Terminated => {
                let _ = tx
                    .send(CandidateUpdate::Failed {
                        candidate_id: candidate_id.clone(),
                        error: format!("provider reported {:?}", report.status),
                    })
                    .await;
                return;
            }
            ProviderInstanceStatus::Running => {
                if state == CandidateState::Launching {
                    state = CandidateState::Booting;
                    let _ = tx
                        .send(CandidateUpdate::Progress {
                            candidate_id: candidate_id.clone(),
                            state,
                        })
                        .await;
                }

                if let Some(endpoint) = endpoint_from_report(&report, "root") {
                    if state == CandidateState::Booting && prober.dial(&endpoint).await.is_ok() {
                        state = CandidateState::Sshable;
                        let _ = tx
                            .send(CandidateUpdate::Progress {
                                candidate_id: candidate_id.clone(),
                                state,
                            })
                            .await;
                    }

                    if state == CandidateState::Sshable && prober.ready_check(&endpoint).await.is_ok() {
                        let _ = tx
                            .send(CandidateUpdate::Ready {
                                candidate_id: candidate_id.clone(),
                                endpoint,
                            })
                            .await;
                        return;
                    }
                }
            }
            ProviderInstanceStatus::Launching | ProviderInstanceStatus::Unknown => {}
        }

        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Sorts by preferred-zone proximity (an offer whose geolocation
/// string matches an earlier entry in `preferred_zones` sorts first),
/// then by price ascending, per spec.md section 4.4 step 1.
fn sort_by_zone_then_price(offers: &mut [Offer], preferred_zones: &[String]) {
    offers.sort_by(|a, b| {
        let rank_a = zone_rank(a, preferred_zones);
        let rank_b = zone_rank(b, preferred_zones);
        rank_a
            .cmp(&rank_b)
            .then(a.price_per_hour.partial_cmp(&b.price_per_hour).unwrap())
    });
}

fn zone_rank(offer: &Offer, preferred_zones: &[String]) -> usize {
    preferred_zones
        .iter()
        .position(|z| offer.geolocation_string.to_lowercase().contains(&z.to_lowercase()))
        .unwrap_or(preferred_zones.len())
}

struct DebugFilter<'a>(&'a OfferFilter);
impl std::fmt::Debug for DebugFilter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "gpu_model={:?} min_vram={:?} max_price={:?}",
            self.0.gpu_model, self.0.min_vram_bytes, self.0.max_price_per_hour
        )
    }
}
