//! Per-tick target smoothing.
//!
//! `current` chases `target` with a fixed exponential step each tick. The
//! step factor is in `(0, 1]`, so each field moves monotonically toward its
//! target and never crosses it. Within `settle_epsilon` a field snaps to the
//! target exactly.

use crate::limits::Limits;
use crate::types::{FIELD_COUNT, TargetPatch, TargetSnapshot};

pub const DEFAULT_FACTOR: f64 = 0.25;
pub const DEFAULT_SETTLE_EPSILON: f64 = 1e-4;

#[derive(Debug, Clone, PartialEq)]
pub struct TargetSmoother {
    current: TargetSnapshot,
    target: TargetSnapshot,
    factor: f64,
    settle_epsilon: f64,
    limits: Limits,
}

impl TargetSmoother {
    pub fn new(factor: f64, settle_epsilon: f64, limits: Limits) -> Self {
        let factor = if factor.is_finite() {
            factor.clamp(f64::EPSILON, 1.0)
        } else {
            DEFAULT_FACTOR
        };
        Self {
            current: TargetSnapshot::REST,
            target: TargetSnapshot::REST,
            factor,
            settle_epsilon: settle_epsilon.abs(),
            limits,
        }
    }

    /// Merge a partial update into the target (clamped). Fields not set in
    /// `patch` keep their target value.
    pub fn set_targets(&mut self, patch: &TargetPatch) {
        self.target = self.limits.clamp(&self.target.merged(patch));
    }

    /// Replace the whole target (clamped).
    pub fn set_target(&mut self, snapshot: &TargetSnapshot) {
        self.target = self.limits.clamp(snapshot);
    }

    /// Advance `current` one step toward `target` and return it.
    pub fn update(&mut self) -> TargetSnapshot {
        let target = self.target.to_array();
        let mut current = self.current.to_array();
        for i in 0..FIELD_COUNT {
            let diff = target[i] - current[i];
            if diff.abs() <= self.settle_epsilon {
                current[i] = target[i];
            } else {
                current[i] += diff * self.factor;
            }
        }
        self.current = TargetSnapshot::from_array(current);
        self.current
    }

    pub fn current_values(&self) -> TargetSnapshot {
        self.current
    }

    pub fn target_values(&self) -> TargetSnapshot {
        self.target
    }

    /// Whether `current` has reached `target`.
    pub fn is_settled(&self) -> bool {
        self.current == self.target
    }

    /// Hard-set both `current` and `target` without animating.
    pub fn sync(&mut self, snapshot: &TargetSnapshot) {
        let clamped = self.limits.clamp(snapshot);
        self.current = clamped;
        self.target = clamped;
    }

    pub fn reset(&mut self) {
        self.sync(&TargetSnapshot::REST);
    }
}

impl Default for TargetSmoother {
    fn default() -> Self {
        Self::new(DEFAULT_FACTOR, DEFAULT_SETTLE_EPSILON, Limits::default())
    }
}
