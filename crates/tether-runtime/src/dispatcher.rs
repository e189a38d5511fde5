//! Fire-and-forget command dispatch.
//!
//! Throttled sends are spawned and never awaited; their failures are only
//! counted. Force sends return the task handle so the caller can wait for
//! confirmation. In-flight sends are never cancelled: every send carries
//! the whole snapshot, so a late one is merely stale.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::task::JoinHandle;

use tether_core::types::TargetSnapshot;

use crate::error::LinkError;
use crate::link::RobotLink;

/// Observable send counters.
#[derive(Debug, Default)]
pub struct DispatchStats {
    throttled: AtomicU64,
    forced: AtomicU64,
    failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchCounts {
    pub throttled: u64,
    pub forced: u64,
    pub failures: u64,
}

impl DispatchStats {
    pub fn counts(&self) -> DispatchCounts {
        DispatchCounts {
            throttled: self.throttled.load(Ordering::Relaxed),
            forced: self.forced.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    link: Arc<dyn RobotLink>,
    stats: Arc<DispatchStats>,
}

impl Dispatcher {
    pub fn new(link: Arc<dyn RobotLink>) -> Self {
        Self {
            link,
            stats: Arc::new(DispatchStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<DispatchStats> {
        Arc::clone(&self.stats)
    }

    /// Throttled-stream send. Not awaited by anyone.
    pub fn send(&self, snapshot: TargetSnapshot) {
        self.stats.throttled.fetch_add(1, Ordering::Relaxed);
        let link = Arc::clone(&self.link);
        let stats = Arc::clone(&self.stats);
        tokio::spawn(async move {
            if let Err(e) = link.set_target(snapshot).await {
                stats.failures.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(error = %e, "throttled send failed");
            }
        });
    }

    /// Unthrottled send for discrete actions. The handle may be awaited or
    /// dropped; dropping it does not cancel the send.
    pub fn force_send(&self, snapshot: TargetSnapshot) -> JoinHandle<Result<(), LinkError>> {
        self.stats.forced.fetch_add(1, Ordering::Relaxed);
        let link = Arc::clone(&self.link);
        let stats = Arc::clone(&self.stats);
        tokio::spawn(async move {
            let result = link.set_target(snapshot).await;
            if let Err(ref e) = result {
                stats.failures.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(error = %e, "force send failed");
            }
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::link::fake::FakeLink;

    #[tokio::test]
    async fn force_send_can_be_awaited() {
        let link = Arc::new(FakeLink::default());
        let d = Dispatcher::new(link.clone());
        let mut snap = TargetSnapshot::REST;
        snap.body_yaw = 0.7;
        d.force_send(snap).await.expect("join").expect("sent");
        assert_eq!(link.sent(), vec![snap]);
        assert_eq!(
            d.stats().counts(),
            DispatchCounts {
                throttled: 0,
                forced: 1,
                failures: 0
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn throttled_failures_are_counted_not_raised() {
        let link = Arc::new(FakeLink::default());
        link.set_sends_fail(true);
        let d = Dispatcher::new(link.clone());
        for _ in 0..3 {
            d.send(TargetSnapshot::REST);
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
        let counts = d.stats().counts();
        assert_eq!(counts.throttled, 3);
        assert_eq!(counts.failures, 3);
        assert!(link.sent().is_empty());
    }

    #[tokio::test]
    async fn failed_force_send_reports_error() {
        let link = Arc::new(FakeLink::default());
        link.set_sends_fail(true);
        let d = Dispatcher::new(link);
        let result = d.force_send(TargetSnapshot::REST).await.expect("join");
        assert!(result.is_err());
        assert_eq!(d.stats().counts().failures, 1);
    }
}
