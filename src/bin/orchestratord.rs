//! Standalone entry point wiring the orchestrator core's ambient stack
//! (tracing + config loading) for deployments that embed this crate
//! directly rather than through the external REST/API layer described
//! in spec.md section 1. Provider/object-store adapters are not wired
//! here: this binary only proves out config + logging startup; a real
//! deployment links this crate into a process that supplies concrete
//! `GpuProvider`/`CpuProvider`/`ObjectStore` implementations.

use anyhow::{Context, Result};
use gpu_standby_core::OrchestratorConfig;
use std::env;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = env::var("ORCHESTRATOR_CONFIG").unwrap_or_else(|_| "orchestrator.toml".to_string());
    let config = match std::fs::read_to_string(&config_path) {
        Ok(raw) => OrchestratorConfig::from_toml_str(&raw)
            .with_context(|| format!("parsing config at {config_path}"))?,
        Err(_) => {
            info!(config_path, "no config file found, starting with defaults");
            OrchestratorConfig::default()
        }
    };

    info!(
        sync_interval_seconds = config.sync_interval_seconds,
        health_check_interval_seconds = config.health_check_interval_seconds,
        auto_failover = config.auto_failover,
        auto_recovery = config.auto_recovery,
        "gpu-standby-core orchestrator starting; link a GpuProvider/CpuProvider/ObjectStore to drive it"
    );

    Ok(())
}
