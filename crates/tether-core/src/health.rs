//! Liveness health monitor.
//!
//! Counts consecutive missed liveness checks and signals a crash exactly
//! once when the count reaches the threshold. Retries are the transport's
//! concern; this module only sees the final outcome of each check.

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Consecutive liveness failures that declare the session crashed.
pub const DEFAULT_CRASH_THRESHOLD: u32 = 3;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// What the caller must do after recording a liveness result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthVerdict {
    /// Nothing changes at the session level.
    Steady,
    /// The threshold was just crossed; run the crash transition.
    Crash,
}

/// Consecutive-failure counter with one-shot crash signaling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthMonitor {
    threshold: u32,
    consecutive_failures: u32,
    crash_signaled: bool,
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_CRASH_THRESHOLD)
    }
}

impl HealthMonitor {
    /// Thresholds below 1 are raised to 1.
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            consecutive_failures: 0,
            crash_signaled: false,
        }
    }

    pub fn on_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Increment the counter. Returns [`HealthVerdict::Crash`] only on the
    /// failure that first reaches the threshold; later failures keep
    /// counting but stay [`HealthVerdict::Steady`] until [`Self::reset`].
    pub fn on_failure(&mut self) -> HealthVerdict {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.consecutive_failures >= self.threshold && !self.crash_signaled {
            self.crash_signaled = true;
            HealthVerdict::Crash
        } else {
            HealthVerdict::Steady
        }
    }

    /// Clear the counter and re-arm crash signaling.
    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
        self.crash_signaled = false;
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn crash_signaled(&self) -> bool {
        self.crash_signaled
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_failures_crash_once() {
        let mut h = HealthMonitor::default();
        assert_eq!(h.on_failure(), HealthVerdict::Steady);
        assert_eq!(h.on_failure(), HealthVerdict::Steady);
        assert_eq!(h.on_failure(), HealthVerdict::Crash);
        assert_eq!(h.consecutive_failures(), 3);
    }

    #[test]
    fn failures_past_threshold_do_not_resignal() {
        let mut h = HealthMonitor::new(2);
        h.on_failure();
        assert_eq!(h.on_failure(), HealthVerdict::Crash);
        assert_eq!(h.on_failure(), HealthVerdict::Steady);
        assert_eq!(h.on_failure(), HealthVerdict::Steady);
        assert_eq!(h.consecutive_failures(), 4);
    }

    #[test]
    fn success_resets_counter() {
        let mut h = HealthMonitor::default();
        h.on_failure();
        h.on_failure();
        h.on_success();
        assert_eq!(h.consecutive_failures(), 0);
        assert_eq!(h.on_failure(), HealthVerdict::Steady);
    }

    #[test]
    fn success_after_crash_does_not_rearm() {
        let mut h = HealthMonitor::new(1);
        assert_eq!(h.on_failure(), HealthVerdict::Crash);
        h.on_success();
        assert_eq!(h.on_failure(), HealthVerdict::Steady);
        assert!(h.crash_signaled());
    }

    #[test]
    fn reset_rearms_signal() {
        let mut h = HealthMonitor::new(1);
        assert_eq!(h.on_failure(), HealthVerdict::Crash);
        h.reset();
        assert_eq!(h.consecutive_failures(), 0);
        assert_eq!(h.on_failure(), HealthVerdict::Crash);
    }

    #[test]
    fn zero_threshold_is_raised_to_one() {
        let h = HealthMonitor::new(0);
        assert_eq!(h.threshold(), 1);
    }
}
