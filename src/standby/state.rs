//! Pure transition guards over [`AssociationState`] (spec.md section
//! 4.8). Kept free of I/O so the lifecycle diagram can be read off
//! this file alone.

use crate::health_monitor::HealthEvent;
use crate::types::AssociationState;

/// Sync cycles run in every state except `Disabled` and
/// `FailoverActive` (sync is explicitly paused once the GPU is gone).
pub fn can_start_sync(state: AssociationState) -> bool {
    matches!(
        state,
        AssociationState::Provisioning | AssociationState::Syncing | AssociationState::Degraded
    )
}

pub fn after_sync_success(current: AssociationState) -> AssociationState {
    match current {
        AssociationState::Provisioning | AssociationState::Degraded => AssociationState::Syncing,
        other => other,
    }
}

/// Health events nudge `Syncing` <-> `Degraded`. `GpuDown` moves a
/// syncing association to `Degraded` on the spot, even when
/// `auto_failover` is off and nothing ever calls `failover` to move it
/// on to `FailoverActive` (spec.md section 4.8) — so the state reflects
/// the outage immediately rather than sitting in `Syncing` forever.
/// `StillFailing` below the threshold is deliberately a no-op: the
/// debounce guarantee (spec.md section 4.6) is that only the threshold
/// crossing has effects, not every sub-threshold failing probe.
pub fn after_health_event(current: AssociationState, event: &HealthEvent) -> AssociationState {
    match (current, event) {
        (AssociationState::Syncing, HealthEvent::GpuDown { .. }) => AssociationState::Degraded,
        (AssociationState::Degraded, HealthEvent::Healthy | HealthEvent::Recovered) => {
            AssociationState::Syncing
        }
        (state, _) => state,
    }
}

pub fn can_failover(state: AssociationState) -> bool {
    matches!(state, AssociationState::Syncing | AssociationState::Degraded)
}

pub fn can_recover(state: AssociationState) -> bool {
    state == AssociationState::FailoverActive
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_paused_during_failover_and_disabled() {
        assert!(!can_start_sync(AssociationState::FailoverActive));
        assert!(!can_start_sync(AssociationState::Disabled));
        assert!(can_start_sync(AssociationState::Degraded));
    }

    #[test]
    fn degraded_recovers_to_syncing_on_success() {
        assert_eq!(
            after_health_event(AssociationState::Degraded, &HealthEvent::Recovered),
            AssociationState::Syncing
        );
        assert_eq!(
            after_health_event(AssociationState::Degraded, &HealthEvent::Healthy),
            AssociationState::Syncing
        );
    }

    #[test]
    fn gpu_down_degrades_syncing_association() {
        assert_eq!(
            after_health_event(AssociationState::Syncing, &HealthEvent::GpuDown { consecutive: 3 }),
            AssociationState::Degraded
        );
    }

    #[test]
    fn sub_threshold_still_failing_does_not_degrade() {
        assert_eq!(
            after_health_event(AssociationState::Syncing, &HealthEvent::StillFailing { consecutive: 1 }),
            AssociationState::Syncing
        );
    }

    #[test]
    fn only_failover_active_can_recover() {
        assert!(can_recover(AssociationState::FailoverActive));
        assert!(!can_recover(AssociationState::Syncing));
    }
}
