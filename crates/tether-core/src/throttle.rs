//! Minimum-interval send throttle.

pub const DEFAULT_MIN_INTERVAL_MS: u64 = 50;

/// Admits at most one send per `min_interval_ms`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendThrottle {
    min_interval_ms: u64,
    last_sent_ms: Option<u64>,
}

impl Default for SendThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_INTERVAL_MS)
    }
}

impl SendThrottle {
    pub fn new(min_interval_ms: u64) -> Self {
        Self {
            min_interval_ms,
            last_sent_ms: None,
        }
    }

    /// Returns `true` and stamps `now_ms` if a send is allowed.
    pub fn try_acquire(&mut self, now_ms: u64) -> bool {
        let allowed = match self.last_sent_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= self.min_interval_ms,
        };
        if allowed {
            self.last_sent_ms = Some(now_ms);
        }
        allowed
    }

    pub fn last_sent_ms(&self) -> Option<u64> {
        self.last_sent_ms
    }

    pub fn min_interval_ms(&self) -> u64 {
        self.min_interval_ms
    }

    /// Forget the last send so the next opportunity is admitted.
    pub fn clear(&mut self) {
        self.last_sent_ms = None;
    }
}
