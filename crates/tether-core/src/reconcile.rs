//! Telemetry reconciler.
//!
//! The only path by which device-reported state may overwrite the local
//! target. A telemetry snapshot is adopted only when all of these hold:
//!
//! 1. the interaction mode is idle,
//! 2. the mode has been idle for at least `idle_cooldown_ms`,
//! 3. telemetry diverges from the local target by more than the major
//!    threshold (meters or radians),
//! 4. the local target is not already within the settle tolerance.
//!
//! Frames stamped older than the newest one seen are dropped before any of
//! these checks.

use serde::{Deserialize, Serialize};

use crate::config::ReconcileConfig;
use crate::types::{Divergence, InteractionMode, TargetPatch, TargetSnapshot};

/// A device-reported state sample. Fields the feed did not report are
/// `None` in `reading` and keep their local value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub reading: TargetPatch,
    /// Device timestamp in milliseconds, when the feed provides one.
    pub timestamp_ms: Option<u64>,
}

impl TelemetrySnapshot {
    /// The reported state with unreported fields taken from `local`.
    pub fn resolve(&self, local: &TargetSnapshot) -> TargetSnapshot {
        local.merged(&self.reading)
    }
}

impl From<TargetSnapshot> for TelemetrySnapshot {
    fn from(snapshot: TargetSnapshot) -> Self {
        Self {
            reading: TargetPatch::full(&snapshot),
            timestamp_ms: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SkipReason {
    Interacting(InteractionMode),
    Cooldown { remaining_ms: u64 },
    MinorChange(Divergence),
    AlreadySettled,
    /// Stamped before the newest frame already seen.
    OutOfOrder { latest_ms: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReconcileDecision {
    Adopt(Divergence),
    Skip(SkipReason),
}

impl ReconcileDecision {
    pub fn is_adopt(&self) -> bool {
        matches!(self, Self::Adopt(_))
    }
}

#[derive(Debug, Clone, Default)]
pub struct TelemetryReconciler {
    config: ReconcileConfig,
    adopted: u64,
    latest_ms: Option<u64>,
}

impl TelemetryReconciler {
    pub fn new(config: ReconcileConfig) -> Self {
        Self {
            config,
            adopted: 0,
            latest_ms: None,
        }
    }

    /// Track frame order. Unstamped frames always pass; a stamped frame
    /// older than the newest stamp seen is refused.
    pub fn admit_timestamp(&mut self, timestamp_ms: Option<u64>) -> Result<(), SkipReason> {
        let Some(ts) = timestamp_ms else {
            return Ok(());
        };
        match self.latest_ms {
            Some(latest_ms) if ts < latest_ms => Err(SkipReason::OutOfOrder { latest_ms }),
            _ => {
                self.latest_ms = Some(ts);
                Ok(())
            }
        }
    }

    /// Forget frame order, for a new session whose feed may restart.
    pub fn clear_order(&mut self) {
        self.latest_ms = None;
    }

    /// Decide whether `telemetry` should replace `local_target`.
    /// `idle_since_ms` is `None` when the mode has never left idle.
    pub fn evaluate(
        &self,
        telemetry: &TargetSnapshot,
        local_target: &TargetSnapshot,
        mode: InteractionMode,
        idle_since_ms: Option<u64>,
        now_ms: u64,
    ) -> ReconcileDecision {
        if !mode.is_idle() {
            return ReconcileDecision::Skip(SkipReason::Interacting(mode));
        }
        if let Some(idle_at) = idle_since_ms {
            let elapsed = now_ms.saturating_sub(idle_at);
            if elapsed < self.config.idle_cooldown_ms {
                return ReconcileDecision::Skip(SkipReason::Cooldown {
                    remaining_ms: self.config.idle_cooldown_ms - elapsed,
                });
            }
        }
        let d = telemetry.divergence(local_target);
        let major = d.translation_m > self.config.major_translation_m
            || d.rotation_rad > self.config.major_rotation_rad;
        if !major {
            return ReconcileDecision::Skip(SkipReason::MinorChange(d));
        }
        let settled = d.translation_m <= self.config.settle_translation_m
            && d.rotation_rad <= self.config.settle_rotation_rad;
        if settled {
            return ReconcileDecision::Skip(SkipReason::AlreadySettled);
        }
        ReconcileDecision::Adopt(d)
    }

    /// Record an adoption performed by the caller.
    pub fn record_adoption(&mut self, divergence: Divergence) {
        self.adopted += 1;
        tracing::info!(
            translation_m = divergence.translation_m,
            rotation_rad = divergence.rotation_rad,
            "adopted telemetry into target"
        );
    }

    pub fn adopted_count(&self) -> u64 {
        self.adopted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn moved(yaw: f64) -> TargetSnapshot {
        let mut s = TargetSnapshot::REST;
        s.pose.yaw = yaw;
        s
    }

    #[test]
    fn interacting_is_never_adopted() {
        let r = TelemetryReconciler::default();
        for mode in [
            InteractionMode::DraggingPointer,
            InteractionMode::DraggingDevice,
            InteractionMode::Resetting,
        ] {
            let d = r.evaluate(&moved(1.0), &TargetSnapshot::REST, mode, None, 1_000_000);
            assert_eq!(d, ReconcileDecision::Skip(SkipReason::Interacting(mode)));
        }
    }

    #[test]
    fn cooldown_counts_from_idle_entry() {
        let r = TelemetryReconciler::default();
        let d = r.evaluate(
            &moved(1.0),
            &TargetSnapshot::REST,
            InteractionMode::Idle,
            Some(5_000),
            15_000,
        );
        assert_eq!(
            d,
            ReconcileDecision::Skip(SkipReason::Cooldown {
                remaining_ms: 10_000
            })
        );
        let d = r.evaluate(
            &moved(1.0),
            &TargetSnapshot::REST,
            InteractionMode::Idle,
            Some(5_000),
            25_000,
        );
        assert!(d.is_adopt());
    }

    #[test]
    fn never_interacted_passes_cooldown() {
        let r = TelemetryReconciler::default();
        let d = r.evaluate(&moved(1.0), &TargetSnapshot::REST, InteractionMode::Idle, None, 0);
        assert!(d.is_adopt());
    }

    #[test]
    fn noise_is_ignored() {
        let r = TelemetryReconciler::default();
        let mut noisy = TargetSnapshot::REST;
        noisy.pose.x = 0.002;
        noisy.pose.roll = 0.03;
        let d = r.evaluate(&noisy, &TargetSnapshot::REST, InteractionMode::Idle, None, 0);
        assert!(matches!(d, ReconcileDecision::Skip(SkipReason::MinorChange(_))));
    }

    #[test]
    fn translation_alone_can_be_major() {
        let r = TelemetryReconciler::default();
        let mut t = TargetSnapshot::REST;
        t.pose.z = 0.01;
        let d = r.evaluate(&t, &TargetSnapshot::REST, InteractionMode::Idle, None, 0);
        assert!(d.is_adopt());
    }

    #[test]
    fn settle_tolerance_wins_over_loose_major_threshold() {
        let r = TelemetryReconciler::new(ReconcileConfig {
            major_rotation_rad: 0.001,
            settle_rotation_rad: 0.05,
            ..ReconcileConfig::default()
        });
        let d = r.evaluate(&moved(0.01), &TargetSnapshot::REST, InteractionMode::Idle, None, 0);
        assert_eq!(d, ReconcileDecision::Skip(SkipReason::AlreadySettled));
    }

    #[test]
    fn older_frames_are_refused() {
        let mut r = TelemetryReconciler::default();
        assert_eq!(r.admit_timestamp(Some(2_000)), Ok(()));
        assert_eq!(
            r.admit_timestamp(Some(1_500)),
            Err(SkipReason::OutOfOrder { latest_ms: 2_000 })
        );
        assert_eq!(r.admit_timestamp(None), Ok(()));
        assert_eq!(r.admit_timestamp(Some(2_000)), Ok(()));
        r.clear_order();
        assert_eq!(r.admit_timestamp(Some(10)), Ok(()));
    }

    #[test]
    fn unreported_fields_keep_local_values() {
        let mut local = TargetSnapshot::REST;
        local.body_yaw = 1.5;
        local.antennas.left = 1.0;
        let mut reported = TargetSnapshot::REST;
        reported.pose.yaw = 0.4;
        let telemetry = TelemetrySnapshot {
            reading: TargetPatch::pose(reported.pose.into()),
            timestamp_ms: None,
        };
        let resolved = telemetry.resolve(&local);
        assert_eq!(resolved.pose.yaw, 0.4);
        assert_eq!(resolved.body_yaw, 1.5);
        assert_eq!(resolved.antennas.left, 1.0);
    }

    #[test]
    fn adoption_is_counted() {
        let mut r = TelemetryReconciler::default();
        r.record_adoption(Divergence::default());
        assert_eq!(r.adopted_count(), 1);
    }
}
