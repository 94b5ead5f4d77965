//! Core data model: entities shared across every component.
//!
//! See spec.md section 3. Ownership/lifetime notes are in prose on
//! each type; invariants that span types live on [`StandbyAssociation`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One marketable GPU rental slot on the spot provider. Immutable,
/// read-only from the provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Offer {
    pub offer_id: String,
    pub gpu_model: String,
    pub vram_bytes: u64,
    pub cpu_cores: u32,
    pub ram_bytes: u64,
    pub disk_bytes: u64,
    pub price_per_hour: f64,
    pub geolocation_string: String,
    pub reliability_score: f64,
}

/// State machine of a [`Candidate`] racing for readiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CandidateState {
    Launching,
    Booting,
    Sshable,
    Ready,
    Failed,
    Destroyed,
}

/// An offer that has been launched but not yet won or lost.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub candidate_id: String,
    pub offer: Offer,
    pub launched_at: DateTime<Utc>,
    pub state: CandidateState,
    pub ssh_endpoint: Option<SshEndpoint>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SshEndpoint {
    pub host: String,
    pub port: u16,
    pub user: String,
}

impl std::fmt::Display for SshEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.host, self.port)
    }
}

/// The winner of a race, promoted from [`Candidate`]. Owns a workspace
/// on the remote filesystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuInstance {
    pub instance_id: String,
    pub offer: Offer,
    pub ssh_endpoint: SshEndpoint,
    pub workspace_path: String,
    pub provisioned_at: DateTime<Utc>,
}

/// A long-running, low-cost VM on the CPU provider, holding the
/// mirrored workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CpuMirror {
    pub mirror_id: String,
    pub zone: String,
    pub ssh_endpoint: SshEndpoint,
    pub workspace_path: String,
    pub provisioned_at: DateTime<Utc>,
}

/// State machine owned by [`StandbyManager`](crate::standby::StandbyManager).
/// See spec.md section 4.8 for the full transition diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssociationState {
    Disabled,
    Provisioning,
    Syncing,
    Degraded,
    FailoverActive,
    Recovering,
}

/// The pairing `(GpuInstance, CpuMirror)`. Exactly one [`CpuMirror`]
/// per [`GpuInstance`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandbyAssociation {
    pub association_id: String,
    pub gpu_instance: Option<GpuInstance>,
    pub cpu_mirror: Option<CpuMirror>,
    pub state: AssociationState,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub sync_count: u64,
    pub consecutive_health_failures: u32,
    pub active_snapshot_chain: Option<String>,
    pub failover_at: Option<DateTime<Utc>>,
    /// `None` means unknown/never synced; surfaced to callers as the
    /// "data_age = infinity" case from spec.md section 4.8.
    pub data_age_seconds: Option<i64>,
}

impl StandbyAssociation {
    pub fn new(association_id: impl Into<String>) -> Self {
        Self {
            association_id: association_id.into(),
            gpu_instance: None,
            cpu_mirror: None,
            state: AssociationState::Disabled,
            last_sync_at: None,
            sync_count: 0,
            consecutive_health_failures: 0,
            active_snapshot_chain: None,
            failover_at: None,
            data_age_seconds: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotKind {
    Base,
    Incremental,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileEntry {
    pub size: u64,
    pub mtime: i64,
    pub blob: String,
}

/// Content-addressed blob set in object storage. See the bit-exact
/// wire layout in spec.md section 6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub snapshot_id: String,
    pub kind: SnapshotKind,
    pub parent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub source_instance_id: String,
    pub workspace_path: String,
    pub file_manifest: HashMap<String, FileEntry>,
    pub total_bytes_uncompressed: u64,
    pub total_bytes_stored: u64,
    pub compression_codec: SnapshotCodec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotCodec {
    Lz4,
}

impl Default for SnapshotCodec {
    fn default() -> Self {
        SnapshotCodec::Lz4
    }
}

/// Record of an idle-triggered snapshot+destroy, with the snapshot id
/// used to resurrect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HibernationEvent {
    pub instance_id: String,
    pub snapshot_id: String,
    pub hibernated_at: DateTime<Utc>,
    pub cpu_mirror_released_at: Option<DateTime<Utc>>,
}
