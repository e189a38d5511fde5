//! Robot link: the two request/response operations the controller needs.

use std::time::Duration;

use async_trait::async_trait;

use tether_core::config::LinkConfig;
use tether_core::types::TargetSnapshot;

use crate::error::LinkError;
use crate::wire::{DaemonStatus, SetTargetRequest};

/// Network operations against the robot daemon.
///
/// `set_target` is idempotent: every call carries the complete snapshot, so
/// reordered or dropped calls are harmless.
#[async_trait]
pub trait RobotLink: Send + Sync {
    async fn set_target(&self, snapshot: TargetSnapshot) -> Result<(), LinkError>;

    async fn check_liveness(&self) -> Result<DaemonStatus, LinkError>;
}

// ─── HTTP ─────────────────────────────────────────────────────────

pub struct HttpLink {
    client: reqwest::Client,
    set_target_url: String,
    status_url: String,
}

impl HttpLink {
    pub fn new(config: &LinkConfig) -> Result<Self, LinkError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;
        let base = config.base_url.trim_end_matches('/');
        Ok(Self {
            client,
            set_target_url: format!("{base}{}", config.set_target_path),
            status_url: format!("{base}{}", config.status_path),
        })
    }

    pub fn set_target_url(&self) -> &str {
        &self.set_target_url
    }

    pub fn status_url(&self) -> &str {
        &self.status_url
    }
}

#[async_trait]
impl RobotLink for HttpLink {
    async fn set_target(&self, snapshot: TargetSnapshot) -> Result<(), LinkError> {
        self.client
            .post(&self.set_target_url)
            .json(&SetTargetRequest::from(&snapshot))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn check_liveness(&self) -> Result<DaemonStatus, LinkError> {
        let status = self
            .client
            .get(&self.status_url)
            .send()
            .await?
            .error_for_status()?
            .json::<DaemonStatus>()
            .await?;
        Ok(status)
    }
}

// ─── Test fake ────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod fake {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    /// Records sends; liveness answers come from a script, then a default.
    #[derive(Default)]
    pub(crate) struct FakeLink {
        sent: Mutex<Vec<TargetSnapshot>>,
        liveness_script: Mutex<VecDeque<bool>>,
        liveness_down: AtomicBool,
        sends_fail: AtomicBool,
    }

    impl FakeLink {
        pub(crate) fn sent(&self) -> Vec<TargetSnapshot> {
            self.sent.lock().expect("sent lock").clone()
        }

        pub(crate) fn set_liveness_down(&self, down: bool) {
            self.liveness_down.store(down, Ordering::SeqCst);
        }

        pub(crate) fn script_liveness(&self, results: &[bool]) {
            self.liveness_script
                .lock()
                .expect("script lock")
                .extend(results.iter().copied());
        }

        pub(crate) fn set_sends_fail(&self, fail: bool) {
            self.sends_fail.store(fail, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl RobotLink for FakeLink {
        async fn set_target(&self, snapshot: TargetSnapshot) -> Result<(), LinkError> {
            if self.sends_fail.load(Ordering::SeqCst) {
                return Err(LinkError::Transport("connection refused".into()));
            }
            self.sent.lock().expect("sent lock").push(snapshot);
            Ok(())
        }

        async fn check_liveness(&self) -> Result<DaemonStatus, LinkError> {
            let scripted = self.liveness_script.lock().expect("script lock").pop_front();
            let ok = scripted.unwrap_or(!self.liveness_down.load(Ordering::SeqCst));
            if ok {
                Ok(DaemonStatus {
                    state: Some("running".into()),
                    ..DaemonStatus::default()
                })
            } else {
                Err(LinkError::Timeout)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_join_base_and_paths() {
        let link = HttpLink::new(&LinkConfig {
            base_url: "http://robot.local:8000/".into(),
            ..LinkConfig::default()
        })
        .expect("client builds");
        assert_eq!(link.set_target_url(), "http://robot.local:8000/api/move/set_target");
        assert_eq!(link.status_url(), "http://robot.local:8000/api/daemon/status");
    }

    #[tokio::test]
    async fn unreachable_daemon_is_a_link_error() {
        let link = HttpLink::new(&LinkConfig {
            base_url: "http://127.0.0.1:9".into(),
            request_timeout_ms: 200,
            ..LinkConfig::default()
        })
        .expect("client builds");
        assert!(link.check_liveness().await.is_err());
        assert!(link.set_target(TargetSnapshot::REST).await.is_err());
    }
}
