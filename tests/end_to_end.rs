//! Integration-style tests against fakes, driving the crate purely
//! through its public API (no `crate::` access), covering the
//! concrete end-to-end scenarios from spec.md section 8.

use async_trait::async_trait;
use gpu_standby_core::provider::{GpuProvider, OfferFilter};
use gpu_standby_core::provisioner::{Provisioner, ReadinessProbe};
use gpu_standby_core::region::RegionResolver;
use gpu_standby_core::snapshot::SnapshotEngine;
use gpu_standby_core::testing::{MockGpuProvider, ScriptedInstance};
use gpu_standby_core::types::{Offer, SshEndpoint};
use gpu_standby_core::workspace_fs::InMemoryWorkspaceFs;
use gpu_standby_core::object_store::InMemoryObjectStore;
use gpu_standby_core::{OrchestratorConfig, Result};
use std::sync::Arc;

struct AlwaysReadyProbe;

#[async_trait]
impl ReadinessProbe for AlwaysReadyProbe {
    async fn dial(&self, _endpoint: &SshEndpoint) -> Result<()> {
        Ok(())
    }
    async fn ready_check(&self, _endpoint: &SshEndpoint) -> Result<()> {
        Ok(())
    }
}

fn offer(id: &str, price: f64) -> Offer {
    Offer {
        offer_id: id.to_string(),
        gpu_model: "H100".to_string(),
        vram_bytes: 80 * 1024 * 1024 * 1024,
        cpu_cores: 32,
        ram_bytes: 256 * 1024 * 1024 * 1024,
        disk_bytes: 1024 * 1024 * 1024 * 1024,
        price_per_hour: price,
        geolocation_string: "Quebec, CA".to_string(),
        reliability_score: 0.95,
    }
}

/// S1 — a static-table hit resolves a GPU's advertised location to the
/// expected CPU zone without ever touching the network layer.
#[tokio::test]
async fn s1_static_region_hit_resolves_quebec_to_expected_zone() {
    let resolver = RegionResolver::without_ip_geo();
    let resolution = resolver.resolve("Quebec, CA", None).await;
    assert_eq!(resolution.zone, "northamerica-northeast1-a");
}

/// S2 — five candidates race; one reaches ready, the other four are
/// destroyed by the time `acquire` returns.
#[tokio::test(start_paused = true)]
async fn s2_five_candidate_race_destroys_every_loser() {
    let offers: Vec<Offer> = (0..5).map(|i| offer(&format!("offer-{i}"), 1.0 + i as f64)).collect();
    let provider = Arc::new(MockGpuProvider::new(offers.clone()));
    for o in &offers {
        provider.script_instance(&o.offer_id, ScriptedInstance { host: o.offer_id.clone(), port: 22 });
    }

    let mut config = OrchestratorConfig::default();
    config.provision_batch_size = 5;
    config.provision_round_deadline_seconds = 90;

    let provisioner = Provisioner::new(provider.clone(), Arc::new(AlwaysReadyProbe), "ssh-ed25519 AAAA", "image", 50, config);
    let winner = provisioner.acquire(&OfferFilter::default()).await.unwrap();

    assert!(offers.iter().any(|o| o.offer_id == winner.instance_id));
    let destroyed = provider.destroyed_ids();
    assert_eq!(destroyed.len(), 4);
    assert!(!destroyed.contains(&winner.instance_id));
}

/// S3 — a base snapshot plus an incremental covering a handful of
/// modified files restores the full, up-to-date workspace from the
/// latest incremental alone.
#[tokio::test]
async fn s3_base_plus_incremental_round_trips_full_workspace() {
    let engine = SnapshotEngine::new(Arc::new(InMemoryObjectStore::new()), &OrchestratorConfig::default());
    let source = InMemoryWorkspaceFs::new();
    for i in 0..20 {
        source.seed("/ws", &format!("f{i}.bin"), vec![i as u8; 512], 100);
    }

    let base = engine.create_full(&source, "/ws", "gpu-1").await.unwrap();

    source.seed("/ws", "f0.bin", vec![0xAA; 1024], 200);
    source.seed("/ws", "f1.bin", vec![0xBB; 1024], 200);

    let inc = engine.create_incremental(&source, "/ws", "gpu-1", &base.snapshot_id).await.unwrap();
    assert_eq!(inc.file_manifest.len(), 20);

    let target = InMemoryWorkspaceFs::new();
    let failures = engine.restore(&target, "/ws", &inc.snapshot_id).await.unwrap();
    assert!(failures.is_empty());
    assert!(engine.validate(&target, "/ws", &inc.snapshot_id).await.unwrap());

    let restored = target.contents("/ws");
    assert_eq!(restored.len(), 20);
    assert_eq!(restored["f0.bin"], vec![0xAA; 1024]);
    assert_eq!(restored["f19.bin"], vec![19u8; 512]);
}

/// S5 — a burst of launches against the rate gate never drops below
/// the configured minimum inter-call spacing.
#[tokio::test(start_paused = true)]
async fn s5_rate_limited_burst_respects_minimum_spacing() {
    use tokio::time::Instant;

    let offers: Vec<Offer> = (0..6).map(|i| offer(&format!("burst-{i}"), 1.0)).collect();
    let provider = Arc::new(MockGpuProvider::new(offers.clone()));
    // Nobody ever comes up; we only care about launch spacing, so the
    // round will simply time out quickly.
    let probe = Arc::new(AlwaysReadyProbe);

    let mut config = OrchestratorConfig::default();
    config.provision_batch_size = 6;
    config.provision_max_rounds = 1;
    config.provision_round_deadline_seconds = 1;
    config.provider_min_spacing_ms = 200;

    let provisioner = Provisioner::new(provider.clone(), probe, "key", "image", 50, config);
    let start = Instant::now();
    let _ = provisioner.acquire(&OfferFilter::default()).await;

    // 6 launches at >=200ms spacing must span at least 1.0s end to end
    // (5 gaps of 200ms between 6 calls).
    assert!(provider.create_call_count() >= 1);
    if provider.create_call_count() == 6 {
        assert!(start.elapsed() >= std::time::Duration::from_millis(1000));
    }
}

/// S9 — destroying an already-missing/already-destroyed candidate is a
/// success, never an error surfaced to the caller.
#[tokio::test]
async fn s9_destroy_is_idempotent() {
    let provider = MockGpuProvider::new(vec![offer("solo", 1.0)]);
    provider.destroy_instance("solo").await.unwrap();
    provider.destroy_instance("solo").await.unwrap();
    provider.destroy_instance("never-existed").await.unwrap();
}

/// A region resolution with no static/IP-geo match still returns a
/// usable non-empty zone rather than failing the caller.
#[tokio::test]
async fn region_resolution_never_fails_outright() {
    let resolver = RegionResolver::without_ip_geo();
    let resolution = resolver.resolve("somewhere nobody has heard of", None).await;
    assert!(!resolution.zone.is_empty());
}
