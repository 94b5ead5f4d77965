//! Configuration surface. See spec.md section 6 for the recognized
//! options and their defaults.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_sync_interval_seconds() -> u64 {
    30
}
fn default_health_check_interval_seconds() -> u64 {
    10
}
fn default_health_failure_threshold() -> u32 {
    3
}
fn default_true() -> bool {
    true
}
fn default_idle_window_seconds() -> u64 {
    180
}
fn default_idle_utilization_threshold() -> f32 {
    5.0
}
fn default_cleanup_window_seconds() -> u64 {
    1800
}
fn default_provision_batch_size() -> usize {
    5
}
fn default_provision_max_rounds() -> u32 {
    3
}
fn default_provision_round_deadline_seconds() -> u64 {
    90
}
fn default_snapshot_codec() -> crate::types::SnapshotCodec {
    crate::types::SnapshotCodec::Lz4
}
fn default_exclude_patterns() -> Vec<String> {
    vec![
        ".git".into(),
        "__pycache__".into(),
        ".venv".into(),
        "venv".into(),
        "node_modules".into(),
        "tmp".into(),
        ".cache".into(),
    ]
}
fn default_cpu_machine_type() -> String {
    "e2-standard-4".into()
}
fn default_cpu_disk_gb() -> u32 {
    100
}
fn default_provider_min_spacing_ms() -> u64 {
    200
}
fn default_max_concurrent_launches() -> usize {
    10
}

/// Full configuration surface recognized by the orchestrator core.
/// Deserializable from TOML; every field has the default documented
/// in spec.md section 6.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    #[serde(default = "default_sync_interval_seconds")]
    pub sync_interval_seconds: u64,

    #[serde(default = "default_health_check_interval_seconds")]
    pub health_check_interval_seconds: u64,

    #[serde(default = "default_health_failure_threshold")]
    pub health_failure_threshold: u32,

    #[serde(default = "default_true")]
    pub auto_failover: bool,

    #[serde(default = "default_true")]
    pub auto_recovery: bool,

    pub cpu_zone_override: Option<String>,

    #[serde(default = "default_cpu_machine_type")]
    pub cpu_machine_type: String,

    #[serde(default)]
    pub cpu_use_spot: bool,

    #[serde(default = "default_cpu_disk_gb")]
    pub cpu_disk_gb: u32,

    #[serde(default = "default_idle_window_seconds")]
    pub idle_window_seconds: u64,

    #[serde(default = "default_idle_utilization_threshold")]
    pub idle_utilization_threshold: f32,

    #[serde(default = "default_cleanup_window_seconds")]
    pub cleanup_window_seconds: u64,

    #[serde(default = "default_provision_batch_size")]
    pub provision_batch_size: usize,

    #[serde(default = "default_provision_max_rounds")]
    pub provision_max_rounds: u32,

    #[serde(default = "default_provision_round_deadline_seconds")]
    pub provision_round_deadline_seconds: u64,

    #[serde(default = "default_snapshot_codec")]
    pub snapshot_codec: crate::types::SnapshotCodec,

    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,

    #[serde(default = "default_provider_min_spacing_ms")]
    pub provider_min_spacing_ms: u64,

    #[serde(default = "default_max_concurrent_launches")]
    pub max_concurrent_launches: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            sync_interval_seconds: default_sync_interval_seconds(),
            health_check_interval_seconds: default_health_check_interval_seconds(),
            health_failure_threshold: default_health_failure_threshold(),
            auto_failover: true,
            auto_recovery: true,
            cpu_zone_override: None,
            cpu_machine_type: default_cpu_machine_type(),
            cpu_use_spot: false,
            cpu_disk_gb: default_cpu_disk_gb(),
            idle_window_seconds: default_idle_window_seconds(),
            idle_utilization_threshold: default_idle_utilization_threshold(),
            cleanup_window_seconds: default_cleanup_window_seconds(),
            provision_batch_size: default_provision_batch_size(),
            provision_max_rounds: default_provision_max_rounds(),
            provision_round_deadline_seconds: default_provision_round_deadline_seconds(),
            snapshot_codec: default_snapshot_codec(),
            exclude_patterns: default_exclude_patterns(),
            provider_min_spacing_ms: default_provider_min_spacing_ms(),
            max_concurrent_launches: default_max_concurrent_launches(),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Fatal at startup per spec.md section 7 (`ConfigurationError`):
    /// surfaced early with context rather than discovered mid-run.
    pub fn validate(&self) -> Result<()> {
        if self.health_failure_threshold == 0 {
            return Err(Error::ConfigurationError(
                "health_failure_threshold must be >= 1".into(),
            ));
        }
        if self.provision_batch_size == 0 {
            return Err(Error::ConfigurationError(
                "provision_batch_size must be >= 1".into(),
            ));
        }
        if self.provision_max_rounds == 0 {
            return Err(Error::ConfigurationError(
                "provision_max_rounds must be >= 1".into(),
            ));
        }
        if self.sync_interval_seconds == 0 {
            return Err(Error::ConfigurationError(
                "sync_interval_seconds must be >= 1".into(),
            ));
        }
        Ok(())
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_seconds)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_seconds)
    }

    pub fn idle_window(&self) -> Duration {
        Duration::from_secs(self.idle_window_seconds)
    }

    pub fn cleanup_window(&self) -> Duration {
        Duration::from_secs(self.cleanup_window_seconds)
    }

    pub fn provision_round_deadline(&self) -> Duration {
        Duration::from_secs(self.provision_round_deadline_seconds)
    }

    pub fn is_excluded(&self, relpath: &str) -> bool {
        self.exclude_patterns
            .iter()
            .any(|pat| relpath.split('/').any(|component| component == pat))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = OrchestratorConfig::default();
        assert_eq!(cfg.sync_interval_seconds, 30);
        assert_eq!(cfg.health_check_interval_seconds, 10);
        assert_eq!(cfg.health_failure_threshold, 3);
        assert!(cfg.auto_failover);
        assert!(cfg.auto_recovery);
        assert_eq!(cfg.idle_window_seconds, 180);
        assert_eq!(cfg.cleanup_window_seconds, 1800);
        assert_eq!(cfg.provision_batch_size, 5);
        assert_eq!(cfg.provision_max_rounds, 3);
        assert_eq!(cfg.provision_round_deadline_seconds, 90);
    }

    #[test]
    fn rejects_zero_threshold() {
        let mut cfg = OrchestratorConfig::default();
        cfg.health_failure_threshold = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg = OrchestratorConfig::from_toml_str("sync_interval_seconds = 60\n").unwrap();
        assert_eq!(cfg.sync_interval_seconds, 60);
        assert_eq!(cfg.health_check_interval_seconds, 10);
    }

    #[test]
    fn exclude_patterns_match_path_components() {
        let cfg = OrchestratorConfig::default();
        assert!(cfg.is_excluded("repo/.git/HEAD"));
        assert!(cfg.is_excluded("project/node_modules/x/index.js"));
        assert!(!cfg.is_excluded("src/main.rs"));
    }
}
