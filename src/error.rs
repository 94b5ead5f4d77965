//! Closed error taxonomy for the orchestrator core.
//!
//! Every variant is expected to carry enough context (operation,
//! target, cause) that a caller never has to guess what failed. See
//! spec.md/SPEC_FULL.md section 7 for the propagation policy.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("transient provider error during {operation} on {target}: {cause}")]
    TransientProviderError {
        operation: String,
        target: String,
        cause: String,
    },

    #[error("authentication rejected by provider during {operation}: {cause}")]
    AuthError { operation: String, cause: String },

    #[error("provisioner exhausted {rounds} round(s) without a winner (filter: {filter})")]
    AcquireExhausted { rounds: u32, filter: String },

    #[error("sync cycle failed for association {association_id}: {cause}")]
    SyncFailure {
        association_id: String,
        cause: String,
    },

    #[error("health probe failed for instance {instance_id}: {cause}")]
    HealthProbeFailure { instance_id: String, cause: String },

    #[error("restore validation failed for snapshot {snapshot_id} on {target}: {detail}")]
    RestoreValidationFailure {
        snapshot_id: String,
        target: String,
        detail: String,
    },

    #[error("configuration error: {0}")]
    ConfigurationError(String),

    #[error("object store error during {operation} on key {key}: {cause}")]
    ObjectStoreError {
        operation: String,
        key: String,
        cause: String,
    },

    #[error("ssh error against {host}: {cause}")]
    SshError { host: String, cause: String },

    #[error("region resolution failed for input {input:?}: {reason}")]
    RegionResolutionError { input: String, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("other error: {0}")]
    Other(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl Error {
    /// True for errors the caller should retry locally with backoff
    /// rather than propagate as a semantic failure.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::TransientProviderError { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
