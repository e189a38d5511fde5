//! Motion pipeline: input aggregator → smoother → send throttle, with the
//! telemetry reconciler feeding the smoother.
//!
//! Everything here is synchronous and takes `now_ms`; the runtime owns the
//! clock and the network. Methods that correspond to a discrete terminal
//! action return the snapshot to force-send, and [`MotionPipeline::frame_tick`]
//! returns the snapshot to send on the throttled stream, if any.

use crate::config::TetherConfig;
use crate::input::{DeviceSample, InputAggregator, InputRejection};
use crate::limits::Limits;
use crate::reconcile::{ReconcileDecision, TelemetryReconciler, TelemetrySnapshot};
use crate::smoother::TargetSmoother;
use crate::throttle::SendThrottle;
use crate::types::{AntennaSide, InteractionMode, PosePatch, TargetPatch, TargetSnapshot};

/// Result of one frame tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameOutput {
    /// Smoothed value after this tick.
    pub current: TargetSnapshot,
    /// Snapshot admitted by the throttle for sending.
    pub send: Option<TargetSnapshot>,
    /// The interaction mode returned to idle on this tick.
    pub went_idle: bool,
}

#[derive(Debug, Clone)]
pub struct MotionPipeline {
    aggregator: InputAggregator,
    smoother: TargetSmoother,
    throttle: SendThrottle,
    reconciler: TelemetryReconciler,
    limits: Limits,
}

impl Default for MotionPipeline {
    fn default() -> Self {
        Self::new(&TetherConfig::default())
    }
}

impl MotionPipeline {
    pub fn new(config: &TetherConfig) -> Self {
        Self {
            aggregator: InputAggregator::new(config.input.clone(), config.limits.clone()),
            smoother: TargetSmoother::new(
                config.smoothing.factor,
                config.smoothing.settle_epsilon,
                config.limits.clone(),
            ),
            throttle: SendThrottle::new(config.dispatch.min_interval_ms),
            reconciler: TelemetryReconciler::new(config.reconcile.clone()),
            limits: config.limits.clone(),
        }
    }

    // ── Reads ──

    pub fn current(&self) -> TargetSnapshot {
        self.smoother.current_values()
    }

    pub fn target(&self) -> TargetSnapshot {
        self.smoother.target_values()
    }

    pub fn mode(&self) -> InteractionMode {
        self.aggregator.mode()
    }

    pub fn rejected_inputs(&self) -> u64 {
        self.aggregator.rejected_count()
    }

    pub fn adopted_telemetry(&self) -> u64 {
        self.reconciler.adopted_count()
    }

    /// Whether the throttled stream would currently produce sends.
    pub fn is_engaged(&self) -> bool {
        !self.aggregator.mode().is_idle() || !self.smoother.is_settled()
    }

    // ── Command surface ──

    /// Continuous updates stream through the throttle. A non-continuous
    /// update is a single programmatic move: it returns the clamped target
    /// to force-send.
    pub fn update_pose(
        &mut self,
        pose: PosePatch,
        continuous: bool,
        now_ms: u64,
    ) -> Result<Option<TargetSnapshot>, InputRejection> {
        self.update(&TargetPatch::pose(pose), continuous, now_ms)
    }

    pub fn update_body_yaw(
        &mut self,
        value: f64,
        continuous: bool,
        now_ms: u64,
    ) -> Result<Option<TargetSnapshot>, InputRejection> {
        self.update(&TargetPatch::body_yaw(value), continuous, now_ms)
    }

    pub fn update_antennas(
        &mut self,
        side: AntennaSide,
        value: f64,
        continuous: bool,
        now_ms: u64,
    ) -> Result<Option<TargetSnapshot>, InputRejection> {
        self.update(&TargetPatch::antenna(side, value), continuous, now_ms)
    }

    /// End of a pointer drag. Returns the final clamped target to force-send
    /// when a drag was in progress.
    pub fn drag_end(&mut self, now_ms: u64) -> Option<TargetSnapshot> {
        let last = self.aggregator.end_pointer_drag(now_ms)?;
        Some(self.settle_on(&last))
    }

    /// Snap to rest and hold input off for the reset period. Returns the
    /// rest snapshot to force-send.
    pub fn reset_to_zero(&mut self, now_ms: u64) -> TargetSnapshot {
        let rest = self.aggregator.begin_reset(now_ms);
        self.smoother.sync(&rest);
        tracing::info!("reset to rest pose");
        rest
    }

    pub fn device_input(
        &mut self,
        sample: &DeviceSample,
        now_ms: u64,
    ) -> Result<(), InputRejection> {
        if let Some(target) = self.aggregator.apply_device(sample, now_ms)? {
            self.smoother.set_target(&target);
        }
        Ok(())
    }

    /// Explicit end of device input. Returns the final target to force-send.
    pub fn device_input_stop(&mut self, now_ms: u64) -> Option<TargetSnapshot> {
        let last = self.aggregator.device_input_stop(now_ms)?;
        Some(self.settle_on(&last))
    }

    // ── Telemetry ──

    /// Reconcile one telemetry frame. Fields the frame does not report are
    /// compared and adopted at their local values.
    pub fn on_telemetry(&mut self, telemetry: &TelemetrySnapshot, now_ms: u64) -> ReconcileDecision {
        if let Err(reason) = self.reconciler.admit_timestamp(telemetry.timestamp_ms) {
            tracing::debug!(?reason, "telemetry frame skipped");
            return ReconcileDecision::Skip(reason);
        }
        let local = self.smoother.target_values();
        let reported = telemetry.resolve(&local);
        let decision = self.reconciler.evaluate(
            &reported,
            &local,
            self.aggregator.mode(),
            self.aggregator.idle_since_ms(),
            now_ms,
        );
        if let ReconcileDecision::Adopt(divergence) = decision {
            let adopted = self.limits.clamp(&reported);
            self.smoother.sync(&adopted);
            self.aggregator.sync_target(&adopted);
            self.reconciler.record_adoption(divergence);
        }
        decision
    }

    // ── Frame ──

    /// One rendering frame: idle detection, smoothing, then the throttled
    /// send decision. Sends are produced only while engaged and while
    /// `motion_allowed`.
    pub fn frame_tick(&mut self, now_ms: u64, motion_allowed: bool) -> FrameOutput {
        let went_idle = self.aggregator.tick(now_ms);
        if went_idle {
            self.smoother.set_target(&self.aggregator.target());
        }
        let engaged = self.is_engaged();
        let current = self.smoother.update();
        let send = if motion_allowed && engaged && self.throttle.try_acquire(now_ms) {
            Some(current)
        } else {
            None
        };
        FrameOutput {
            current,
            send,
            went_idle,
        }
    }

    /// Discard the target and all interaction history.
    pub fn reset_session(&mut self) {
        self.aggregator.reset();
        self.smoother.reset();
        self.throttle.clear();
        self.reconciler.clear_order();
    }

    // ── Internal ──

    fn update(
        &mut self,
        patch: &TargetPatch,
        continuous: bool,
        now_ms: u64,
    ) -> Result<Option<TargetSnapshot>, InputRejection> {
        let target = self.aggregator.apply_pointer(patch, now_ms)?;
        if continuous {
            self.smoother.set_target(&target);
            return Ok(None);
        }
        let target = self.aggregator.end_pointer_drag(now_ms).unwrap_or(target);
        Ok(Some(self.settle_on(&target)))
    }

    /// A force-sent value becomes the smoother's resting point so the
    /// throttled stream never trails behind it.
    fn settle_on(&mut self, snapshot: &TargetSnapshot) -> TargetSnapshot {
        self.smoother.sync(snapshot);
        self.smoother.current_values()
    }
}

// ─── Tests ────────────────────────────────────────────────────────
