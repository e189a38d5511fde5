//! Input aggregator.
//!
//! Pointer drags and device-axis input compete for one [`InteractionMode`].
//! A source may take over only when the other one is idle and has been
//! idle for at least `switch_cooldown_ms`. Every accepted sample produces a
//! clamped [`TargetSnapshot`] for the smoother.
//!
//! Device axes are offsets from the target held when the device claimed
//! input: an axis at 0 leaves its field where it was, and releasing the
//! device returns the target to that base.
//!
//! The aggregator also records when the mode last entered idle; the
//! telemetry reconciler's cooldown is measured from that instant.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::{AxisSmoothing, InputConfig};
use crate::limits::Limits;
use crate::types::{FIELD_COUNT, InteractionMode, TargetPatch, TargetSnapshot};

// ─── Types ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InputSource {
    Pointer,
    Device,
}

impl InputSource {
    fn mode(self) -> InteractionMode {
        match self {
            Self::Pointer => InteractionMode::DraggingPointer,
            Self::Device => InteractionMode::DraggingDevice,
        }
    }
}

/// One gamepad/keyboard reading. Every axis is normalized to `[-1, 1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSample {
    /// x, y, z
    pub translation: [f64; 3],
    /// pitch, yaw, roll
    pub rotation: [f64; 3],
    pub body_yaw: f64,
    /// left, right
    pub antennas: [f64; 2],
}

impl DeviceSample {
    /// Axes in [`TargetSnapshot::to_array`] order, with the deadzone
    /// applied and values clamped to `[-1, 1]`.
    pub fn axes(&self, deadzone: f64) -> [f64; FIELD_COUNT] {
        let raw = [
            self.translation[0],
            self.translation[1],
            self.translation[2],
            self.rotation[0],
            self.rotation[1],
            self.rotation[2],
            self.body_yaw,
            self.antennas[0],
            self.antennas[1],
        ];
        raw.map(|v| {
            let v = if v.is_finite() { v.clamp(-1.0, 1.0) } else { 0.0 };
            if v.abs() < deadzone { 0.0 } else { v }
        })
    }

    /// Whether any axis is outside the deadzone.
    pub fn is_active(&self, deadzone: f64) -> bool {
        self.axes(deadzone).iter().any(|v| *v != 0.0)
    }
}

/// Why an input sample was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputRejection {
    /// The other source currently owns the target.
    OtherSourceActive { active: InteractionMode },
    /// The other source went idle too recently.
    SwitchCooldown { remaining_ms: u64 },
    /// A reset is holding the target at rest.
    Resetting,
}

impl fmt::Display for InputRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OtherSourceActive { active } => write!(f, "{active} is active"),
            Self::SwitchCooldown { remaining_ms } => {
                write!(f, "switch cooldown ({remaining_ms}ms left)")
            }
            Self::Resetting => f.write_str("reset in progress"),
        }
    }
}

// ─── Aggregator ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct InputAggregator {
    config: InputConfig,
    limits: Limits,
    mode: InteractionMode,
    target: TargetSnapshot,
    /// Smoothed normalized device axes.
    device_axes: [f64; FIELD_COUNT],
    /// Target when the device claimed input.
    device_base: TargetSnapshot,
    last_source: Option<InputSource>,
    idle_since_ms: Option<u64>,
    last_device_input_ms: u64,
    reset_until_ms: u64,
    rejected: u64,
}

impl InputAggregator {
    pub fn new(config: InputConfig, limits: Limits) -> Self {
        Self {
            config,
            limits,
            mode: InteractionMode::Idle,
            target: TargetSnapshot::REST,
            device_axes: [0.0; FIELD_COUNT],
            device_base: TargetSnapshot::REST,
            last_source: None,
            idle_since_ms: None,
            last_device_input_ms: 0,
            reset_until_ms: 0,
            rejected: 0,
        }
    }

    pub fn mode(&self) -> InteractionMode {
        self.mode
    }

    pub fn target(&self) -> TargetSnapshot {
        self.target
    }

    /// When the mode last entered idle. `None` if it never left idle.
    pub fn idle_since_ms(&self) -> Option<u64> {
        self.idle_since_ms
    }

    pub fn rejected_count(&self) -> u64 {
        self.rejected
    }

    // ── Pointer ──

    /// Apply one pointer-drag update. The first update of a drag claims the
    /// pointer source.
    pub fn apply_pointer(
        &mut self,
        patch: &TargetPatch,
        now_ms: u64,
    ) -> Result<TargetSnapshot, InputRejection> {
        self.claim(InputSource::Pointer, now_ms)?;
        self.target = self.limits.clamp(&self.target.merged(patch));
        Ok(self.target)
    }

    /// End the pointer drag. Returns the final target when a drag was in
    /// progress.
    pub fn end_pointer_drag(&mut self, now_ms: u64) -> Option<TargetSnapshot> {
        if self.mode != InteractionMode::DraggingPointer {
            return None;
        }
        self.enter_idle(now_ms);
        Some(self.target)
    }

    // ── Device ──

    /// Feed one device sample. An inactive sample outside a device
    /// interaction is ignored (`Ok(None)`); inside one it still eases the
    /// smoothed axes back toward rest.
    pub fn apply_device(
        &mut self,
        sample: &DeviceSample,
        now_ms: u64,
    ) -> Result<Option<TargetSnapshot>, InputRejection> {
        let active = sample.is_active(self.config.deadzone);
        if !active && self.mode != InteractionMode::DraggingDevice {
            return Ok(None);
        }
        if active {
            self.claim(InputSource::Device, now_ms)?;
            self.last_device_input_ms = now_ms;
        }

        let raw = sample.axes(self.config.deadzone);
        let factors = group_factors(&self.config.smoothing);
        let ranges = self.limits.as_array();
        let mut values = self.device_base.to_array();
        for i in 0..FIELD_COUNT {
            self.device_axes[i] += (raw[i] - self.device_axes[i]) * factors[i];
            values[i] += ranges[i].from_normalized(self.device_axes[i]);
        }
        self.target = self.limits.clamp(&TargetSnapshot::from_array(values));
        Ok(Some(self.target))
    }

    /// Explicit end of device input. The target returns to the device base.
    pub fn device_input_stop(&mut self, now_ms: u64) -> Option<TargetSnapshot> {
        if self.mode != InteractionMode::DraggingDevice {
            return None;
        }
        self.enter_idle(now_ms);
        Some(self.target)
    }

    // ── Reset ──

    /// Enter `resetting` for `reset_hold_ms` with the target at rest.
    /// Overrides whichever source was active.
    pub fn begin_reset(&mut self, now_ms: u64) -> TargetSnapshot {
        self.mode = InteractionMode::Resetting;
        self.reset_until_ms = now_ms.saturating_add(self.config.reset_hold_ms);
        self.target = self.limits.clamp(&TargetSnapshot::REST);
        self.rebase_device();
        self.target
    }

    // ── Ticks ──

    /// Per-frame idle detection. Returns `true` when the mode went idle on
    /// this tick.
    pub fn tick(&mut self, now_ms: u64) -> bool {
        let expired = match self.mode {
            InteractionMode::DraggingDevice => {
                now_ms.saturating_sub(self.last_device_input_ms)
                    >= self.config.device_sample_period_ms
            }
            InteractionMode::Resetting => now_ms >= self.reset_until_ms,
            _ => false,
        };
        if expired {
            self.enter_idle(now_ms);
        }
        expired
    }

    /// Replace the target from outside (telemetry adoption). Does not touch
    /// the interaction mode; device offsets restart from the new target.
    pub fn sync_target(&mut self, snapshot: &TargetSnapshot) {
        self.target = self.limits.clamp(snapshot);
        self.rebase_device();
    }

    /// Back to the initial state: idle, at rest, no history.
    pub fn reset(&mut self) {
        *self = Self::new(self.config.clone(), self.limits.clone());
    }

    // ── Internal ──

    fn claim(&mut self, source: InputSource, now_ms: u64) -> Result<(), InputRejection> {
        if self.mode == source.mode() {
            return Ok(());
        }
        let verdict = self.admit(source, now_ms);
        match verdict {
            Ok(()) => {
                tracing::debug!(source = ?source, "input source claimed");
                if source == InputSource::Device {
                    self.rebase_device();
                }
                self.mode = source.mode();
                self.last_source = Some(source);
                Ok(())
            }
            Err(rejection) => {
                self.rejected += 1;
                tracing::debug!(source = ?source, %rejection, "input rejected");
                Err(rejection)
            }
        }
    }

    fn admit(&self, source: InputSource, now_ms: u64) -> Result<(), InputRejection> {
        match self.mode {
            InteractionMode::Resetting => return Err(InputRejection::Resetting),
            InteractionMode::Idle => {}
            active => return Err(InputRejection::OtherSourceActive { active }),
        }
        let switching = self.last_source.is_some_and(|last| last != source);
        if let (true, Some(idle_at)) = (switching, self.idle_since_ms) {
            let elapsed = now_ms.saturating_sub(idle_at);
            if elapsed < self.config.switch_cooldown_ms {
                return Err(InputRejection::SwitchCooldown {
                    remaining_ms: self.config.switch_cooldown_ms - elapsed,
                });
            }
        }
        Ok(())
    }

    fn enter_idle(&mut self, now_ms: u64) {
        tracing::debug!(from = %self.mode, "interaction idle");
        if self.mode == InteractionMode::DraggingDevice {
            // Released axes have fully decayed.
            self.target = self.limits.clamp(&self.device_base);
            self.rebase_device();
        }
        self.mode = InteractionMode::Idle;
        self.idle_since_ms = Some(now_ms);
    }

    fn rebase_device(&mut self) {
        self.device_axes = [0.0; FIELD_COUNT];
        self.device_base = self.target;
    }
}

/// Smoothing factor per field in [`TargetSnapshot::to_array`] order.
fn group_factors(s: &AxisSmoothing) -> [f64; FIELD_COUNT] {
    let f = |v: f64| if v.is_finite() { v.clamp(0.0, 1.0) } else { 1.0 };
    [
        f(s.translation),
        f(s.translation),
        f(s.translation),
        f(s.rotation),
        f(s.rotation),
        f(s.rotation),
        f(s.body_yaw),
        f(s.antennas),
        f(s.antennas),
    ]
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PosePatch;

    fn aggregator() -> InputAggregator {
        InputAggregator::new(InputConfig::default(), Limits::default())
    }

    fn yaw_patch(v: f64) -> TargetPatch {
        TargetPatch::pose(PosePatch {
            yaw: Some(v),
            ..PosePatch::default()
        })
    }

    fn stick(yaw: f64) -> DeviceSample {
        DeviceSample {
            rotation: [0.0, yaw, 0.0],
            ..DeviceSample::default()
        }
    }

    #[test]
    fn pointer_drag_claims_and_clamps() {
        let mut a = aggregator();
        let t = a.apply_pointer(&yaw_patch(5.0), 0).expect("accepted");
        assert_eq!(a.mode(), InteractionMode::DraggingPointer);
        assert_eq!(t.pose.yaw, 1.2);
        assert_eq!(a.end_pointer_drag(10), Some(t));
        assert_eq!(a.mode(), InteractionMode::Idle);
        assert_eq!(a.idle_since_ms(), Some(10));
    }

    #[test]
    fn end_without_drag_is_none() {
        let mut a = aggregator();
        assert_eq!(a.end_pointer_drag(0), None);
        assert_eq!(a.idle_since_ms(), None);
    }

    #[test]
    fn device_rejected_while_pointer_active() {
        let mut a = aggregator();
        a.apply_pointer(&yaw_patch(0.3), 0).expect("accepted");
        let err = a.apply_device(&stick(1.0), 5).expect_err("rejected");
        assert_eq!(
            err,
            InputRejection::OtherSourceActive {
                active: InteractionMode::DraggingPointer
            }
        );
        assert_eq!(a.rejected_count(), 1);
        assert_eq!(a.target().pose.yaw, 0.3);
    }

    #[test]
    fn switch_waits_for_cooldown() {
        let mut a = aggregator();
        a.apply_pointer(&yaw_patch(0.3), 0).expect("accepted");
        a.end_pointer_drag(100);

        let err = a.apply_device(&stick(1.0), 200).expect_err("too soon");
        assert_eq!(err, InputRejection::SwitchCooldown { remaining_ms: 50 });
        assert!(a.apply_device(&stick(1.0), 250).expect("accepted").is_some());
        assert_eq!(a.mode(), InteractionMode::DraggingDevice);
    }

    #[test]
    fn same_source_resumes_without_cooldown() {
        let mut a = aggregator();
        a.apply_pointer(&yaw_patch(0.3), 0).expect("accepted");
        a.end_pointer_drag(100);
        assert!(a.apply_pointer(&yaw_patch(0.4), 101).is_ok());
    }

    #[test]
    fn device_axes_are_smoothed_then_mapped() {
        let mut a = aggregator();
        let first = a.apply_device(&stick(1.0), 0).expect("ok").expect("target");
        // rotation factor 0.35 of yaw range max 1.2
        assert!((first.pose.yaw - 0.35 * 1.2).abs() < 1e-9);
        let second = a.apply_device(&stick(1.0), 16).expect("ok").expect("target");
        assert!(second.pose.yaw > first.pose.yaw && second.pose.yaw < 1.2);
    }

    #[test]
    fn groups_respond_at_different_rates() {
        let mut a = aggregator();
        let sample = DeviceSample {
            translation: [1.0, 0.0, 0.0],
            rotation: [1.0, 0.0, 0.0],
            ..DeviceSample::default()
        };
        let t = a.apply_device(&sample, 0).expect("ok").expect("target");
        let x_frac = t.pose.x / 0.05;
        let pitch_frac = t.pose.pitch / 0.7;
        assert!(pitch_frac > x_frac);
    }

    #[test]
    fn deadzone_sample_is_not_input() {
        let mut a = aggregator();
        assert!(!stick(0.05).is_active(0.08));
        assert_eq!(a.apply_device(&stick(0.05), 0), Ok(None));
        assert_eq!(a.mode(), InteractionMode::Idle);
    }

    #[test]
    fn device_goes_idle_after_one_quiet_period() {
        let mut a = aggregator();
        a.apply_device(&stick(1.0), 0).expect("ok");
        assert!(!a.tick(50));
        // Inactive samples do not keep the interaction alive.
        a.apply_device(&stick(0.0), 60).expect("ok");
        assert!(a.tick(100));
        assert_eq!(a.mode(), InteractionMode::Idle);
        assert_eq!(a.idle_since_ms(), Some(100));
    }

    #[test]
    fn device_axis_keeps_other_fields_from_pointer() {
        let mut a = aggregator();
        a.apply_pointer(&yaw_patch(0.3), 0).expect("accepted");
        a.end_pointer_drag(100);

        let nudge = DeviceSample {
            body_yaw: 1.0,
            ..DeviceSample::default()
        };
        let t = a.apply_device(&nudge, 250).expect("ok").expect("target");
        assert_eq!(t.pose.yaw, 0.3);
        assert!((t.body_yaw - 0.3 * 2.8).abs() < 1e-9);
    }

    #[test]
    fn device_axis_keeps_adopted_target() {
        let mut a = aggregator();
        let mut adopted = TargetSnapshot::REST;
        adopted.pose.yaw = 0.9;
        adopted.pose.z = 0.02;
        a.sync_target(&adopted);

        let nudge = DeviceSample {
            body_yaw: 1.0,
            ..DeviceSample::default()
        };
        let t = a.apply_device(&nudge, 100).expect("ok").expect("target");
        assert_eq!(t.pose.yaw, 0.9);
        assert_eq!(t.pose.z, 0.02);
        assert!(t.body_yaw > 0.0);
    }

    #[test]
    fn device_offsets_add_to_base() {
        let mut a = aggregator();
        a.apply_pointer(&yaw_patch(0.3), 0).expect("accepted");
        a.end_pointer_drag(100);
        let t = a.apply_device(&stick(1.0), 250).expect("ok").expect("target");
        assert!((t.pose.yaw - (0.3 + 0.35 * 1.2)).abs() < 1e-9);
        assert_eq!(a.device_input_stop(260), Some(a.target()));
        assert_eq!(a.target().pose.yaw, 0.3);
    }

    #[test]
    fn released_device_returns_to_base_when_idle() {
        let mut a = aggregator();
        let mut now = 0;
        for _ in 0..30 {
            a.apply_device(&stick(1.0), now).expect("ok");
            now += 16;
        }
        for _ in 0..3 {
            a.apply_device(&stick(0.0), now).expect("ok");
            now += 16;
        }
        assert!(a.target().pose.yaw > 0.0);

        assert!(a.tick(now + 100));
        assert_eq!(a.mode(), InteractionMode::Idle);
        assert_eq!(a.target(), TargetSnapshot::REST);

        // The next session starts from fresh axes.
        let t = a.apply_device(&stick(1.0), now + 200).expect("ok").expect("target");
        assert!((t.pose.yaw - 0.35 * 1.2).abs() < 1e-9);
    }

    #[test]
    fn reset_holds_then_releases() {
        let mut a = aggregator();
        a.apply_pointer(&yaw_patch(0.5), 0).expect("accepted");
        let rest = a.begin_reset(10);
        assert_eq!(rest, TargetSnapshot::REST);
        assert_eq!(a.mode(), InteractionMode::Resetting);
        assert_eq!(
            a.apply_pointer(&yaw_patch(0.1), 20),
            Err(InputRejection::Resetting)
        );
        assert!(!a.tick(500));
        assert!(a.tick(810));
        assert_eq!(a.mode(), InteractionMode::Idle);
    }

    #[test]
    fn non_finite_axes_are_zero() {
        let s = DeviceSample {
            body_yaw: f64::NAN,
            ..DeviceSample::default()
        };
        assert!(!s.is_active(0.08));
    }
}
