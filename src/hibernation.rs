//! Cost-reduction via hibernation (spec.md section 4.7): tracks GPU
//! idle time from periodic utilization heartbeats, and tells the
//! caller when an association has been idle long enough to snapshot
//! and destroy its GPU, and later long enough past that to release the
//! CPU mirror too.
//!
//! This module only keeps the bookkeeping; the actual snapshot,
//! destroy, and re-provision calls are made by
//! [`crate::standby::StandbyManager`], which already holds the
//! [`crate::snapshot::SnapshotEngine`] and [`crate::provisioner::Provisioner`]
//! this sequence needs.

use crate::config::OrchestratorConfig;
use crate::types::HibernationEvent;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::time::Duration;
use tracing::info;

/// Spec.md section 6: "HibernationController treats missing
/// heartbeats >1 min as 'unknown, not idle.'" Past this age, the
/// absence of heartbeats is indistinguishable from the agent itself
/// being gone, so it must never read as sustained idle.
const HEARTBEAT_STALE_AFTER: Duration = Duration::from_secs(60);

pub struct HibernationController {
    idle_window: Duration,
    idle_utilization_threshold: f32,
    cleanup_window: Duration,
    last_active: DashMap<String, DateTime<Utc>>,
    /// Timestamp of the most recent heartbeat of any kind (active or
    /// idle), independent of `last_active`'s "most recent active
    /// sample" meaning. Used only to detect a stalled heartbeat feed.
    last_seen: DashMap<String, DateTime<Utc>>,
    events: DashMap<String, HibernationEvent>,
}

impl HibernationController {
    pub fn new(config: &OrchestratorConfig) -> Self {
        Self {
            idle_window: config.idle_window(),
            idle_utilization_threshold: config.idle_utilization_threshold,
            cleanup_window: config.cleanup_window(),
            last_active: DashMap::new(),
            last_seen: DashMap::new(),
            events: DashMap::new(),
        }
    }

    /// Records a utilization sample. Utilization at or above the
    /// configured threshold resets the idle clock; the very first
    /// sample for an association always seeds the clock so a
    /// just-provisioned instance isn't instantly considered idle.
    pub fn heartbeat_at(&self, association_id: &str, now: DateTime<Utc>, utilization_pct: f32) {
        self.last_seen.insert(association_id.to_string(), now);
        let is_active = utilization_pct >= self.idle_utilization_threshold;
        if is_active || !self.last_active.contains_key(association_id) {
            self.last_active.insert(association_id.to_string(), now);
        }
    }

    pub fn heartbeat(&self, association_id: &str, utilization_pct: f32) {
        self.heartbeat_at(association_id, Utc::now(), utilization_pct)
    }

    pub fn idle_duration_at(&self, association_id: &str, now: DateTime<Utc>) -> Option<Duration> {
        self.last_active.get(association_id).map(|ts| {
            let elapsed = now.signed_duration_since(*ts);
            Duration::from_secs(elapsed.num_seconds().max(0) as u64)
        })
    }

    /// An association only reads as idle while its heartbeat feed is
    /// itself alive; a stalled or absent feed is "unknown, not idle"
    /// per spec.md section 6, not a proxy for sustained idleness.
    pub fn is_idle_at(&self, association_id: &str, now: DateTime<Utc>) -> bool {
        let Some(seen) = self.last_seen.get(association_id) else {
            return false;
        };
        let since_seen = now.signed_duration_since(*seen).num_seconds().max(0) as u64;
        if since_seen > HEARTBEAT_STALE_AFTER.as_secs() {
            return false;
        }
        self.idle_duration_at(association_id, now)
            .map(|d| d >= self.idle_window)
            .unwrap_or(false)
    }

    pub fn is_idle(&self, association_id: &str) -> bool {
        self.is_idle_at(association_id, Utc::now())
    }

    /// Called once the GPU has actually been snapshotted and
    /// destroyed. Clears the idle clock (there's no GPU left to be
    /// idle) and starts the cleanup-window countdown.
    pub fn record_hibernation(&self, association_id: &str, event: HibernationEvent) {
        info!(
            association_id,
            snapshot_id = %event.snapshot_id,
            "instance hibernated"
        );
        self.events.insert(association_id.to_string(), event);
        self.last_active.remove(association_id);
        self.last_seen.remove(association_id);
    }

    pub fn event(&self, association_id: &str) -> Option<HibernationEvent> {
        self.events.get(association_id).map(|e| e.clone())
    }

    /// True once `cleanup_window` has elapsed since hibernation and the
    /// CPU mirror hasn't already been released.
    pub fn should_cleanup_at(&self, association_id: &str, now: DateTime<Utc>) -> bool {
        match self.events.get(association_id) {
            Some(event) if event.cpu_mirror_released_at.is_none() => {
                let elapsed = now.signed_duration_since(event.hibernated_at);
                elapsed.num_seconds().max(0) as u64 >= self.cleanup_window.as_secs()
            }
            _ => false,
        }
    }

    pub fn should_cleanup(&self, association_id: &str) -> bool {
        self.should_cleanup_at(association_id, Utc::now())
    }

    pub fn mark_cpu_mirror_released_at(&self, association_id: &str, now: DateTime<Utc>) {
        if let Some(mut event) = self.events.get_mut(association_id) {
            event.cpu_mirror_released_at = Some(now);
        }
    }

    /// Clears all tracked state; called once the association wakes
    /// back up with a fresh GPU instance.
    pub fn forget(&self, association_id: &str) {
        self.last_active.remove(association_id);
        self.last_seen.remove(association_id);
        self.events.remove(association_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn config() -> OrchestratorConfig {
        let mut c = OrchestratorConfig::default();
        c.idle_window_seconds = 180;
        c.idle_utilization_threshold = 5.0;
        c.cleanup_window_seconds = 1800;
        c
    }

    #[test]
    fn s6_idle_past_window_triggers_and_active_heartbeat_resets() {
        let controller = HibernationController::new(&config());
        let t0 = Utc::now();
        controller.heartbeat_at("a1", t0, 1.0); // below threshold, but first sample seeds clock

        // Idle heartbeats keep arriving well within the 1-minute
        // staleness window, so the feed stays "alive" the whole time.
        let t_30 = t0 + ChronoDuration::seconds(30);
        controller.heartbeat_at("a1", t_30, 1.0);
        let t_almost = t0 + ChronoDuration::seconds(179);
        controller.heartbeat_at("a1", t_almost, 1.0);
        assert!(!controller.is_idle_at("a1", t_almost));

        let t_idle = t0 + ChronoDuration::seconds(181);
        controller.heartbeat_at("a1", t_idle, 1.0);
        assert!(controller.is_idle_at("a1", t_idle));

        // An active sample resets the clock.
        let t_active = t_idle + ChronoDuration::seconds(1);
        controller.heartbeat_at("a1", t_active, 42.0);
        assert!(!controller.is_idle_at("a1", t_active));
    }

    #[test]
    fn never_heartbeated_association_is_not_idle() {
        let controller = HibernationController::new(&config());
        assert!(!controller.is_idle("never-seen"));
    }

    #[test]
    fn stalled_heartbeat_feed_reads_as_unknown_not_idle() {
        let controller = HibernationController::new(&config());
        let t0 = Utc::now();
        controller.heartbeat_at("a1", t0, 1.0);

        // No further heartbeats arrive. Even though the idle window
        // has long since elapsed, a feed that's gone silent for more
        // than a minute must not read as sustained idle.
        let t_long_silent = t0 + ChronoDuration::seconds(600);
        assert!(!controller.is_idle_at("a1", t_long_silent));
    }

    #[test]
    fn heartbeat_within_stale_window_keeps_feed_alive() {
        let controller = HibernationController::new(&config());
        let t0 = Utc::now();
        controller.heartbeat_at("a1", t0, 1.0);
        let t_59 = t0 + ChronoDuration::seconds(59);
        controller.heartbeat_at("a1", t_59, 1.0);
        // Still below idle_window relative to t0 (the last active sample).
        assert!(!controller.is_idle_at("a1", t_59));
    }

    #[test]
    fn cleanup_triggers_after_cleanup_window_past_hibernation() {
        let controller = HibernationController::new(&config());
        let hibernated_at = Utc::now();
        controller.record_hibernation(
            "a1",
            HibernationEvent {
                instance_id: "gpu-1".into(),
                snapshot_id: "snap-1".into(),
                hibernated_at,
                cpu_mirror_released_at: None,
            },
        );

        assert!(!controller.should_cleanup_at("a1", hibernated_at + ChronoDuration::seconds(100)));
        assert!(controller.should_cleanup_at("a1", hibernated_at + ChronoDuration::seconds(1801)));
    }

    #[test]
    fn released_mirror_never_triggers_cleanup_again() {
        let controller = HibernationController::new(&config());
        let hibernated_at = Utc::now();
        controller.record_hibernation(
            "a1",
            HibernationEvent {
                instance_id: "gpu-1".into(),
                snapshot_id: "snap-1".into(),
                hibernated_at,
                cpu_mirror_released_at: None,
            },
        );
        let later = hibernated_at + ChronoDuration::seconds(2000);
        controller.mark_cpu_mirror_released_at("a1", later);
        assert!(!controller.should_cleanup_at("a1", later + ChronoDuration::seconds(10_000)));
    }

    #[test]
    fn hibernation_clears_idle_clock() {
        let controller = HibernationController::new(&config());
        let now = Utc::now();
        controller.heartbeat_at("a1", now, 1.0);
        controller.record_hibernation(
            "a1",
            HibernationEvent {
                instance_id: "gpu-1".into(),
                snapshot_id: "snap-1".into(),
                hibernated_at: now,
                cpu_mirror_released_at: None,
            },
        );
        assert!(controller.idle_duration_at("a1", now).is_none());
    }

    #[test]
    fn forget_clears_both_idle_and_event_state() {
        let controller = HibernationController::new(&config());
        let now = Utc::now();
        controller.heartbeat_at("a1", now, 1.0);
        controller.forget("a1");
        assert!(controller.idle_duration_at("a1", now).is_none());
        assert!(controller.event("a1").is_none());
    }
}
