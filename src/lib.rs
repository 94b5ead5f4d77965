//! Control-plane core for renting spot-market GPUs, mirroring their
//! workspace onto a cheap CPU standby, and failing over automatically
//! when the GPU disappears. See `SPEC_FULL.md` for the full surface;
//! this crate is adapters-in, state-machine-out: callers supply
//! [`provider::GpuProvider`], [`provider::CpuProvider`],
//! [`object_store::ObjectStore`] and [`workspace_fs::WorkspaceFs`]
//! implementations for whichever marketplace and storage backend they
//! run against.

pub mod config;
pub mod error;
pub mod health_monitor;
pub mod hibernation;
pub mod object_store;
pub mod provider;
pub mod provisioner;
pub mod region;
pub mod snapshot;
pub mod ssh;
pub mod standby;
pub mod sync_service;
#[cfg_attr(not(test), allow(dead_code))]
pub mod testing;
pub mod types;
pub mod workspace_fs;

pub use config::OrchestratorConfig;
pub use error::{Error, Result};
pub use provisioner::Provisioner;
pub use region::RegionResolver;
pub use snapshot::SnapshotEngine;
pub use standby::StandbyManager;
pub use types::{
    AssociationState, Candidate, CandidateState, CpuMirror, GpuInstance, HibernationEvent, Offer,
    Snapshot, SshEndpoint, StandbyAssociation,
};
