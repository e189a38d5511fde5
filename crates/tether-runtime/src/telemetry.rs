//! Telemetry subscription over the daemon's full-state WebSocket.
//!
//! The reader decodes each text frame and enqueues it to the controller.
//! Delivery is lossy: frames are skipped when undecodable or when the
//! controller queue is full. A dropped connection is retried after
//! `reconnect_delay` until the subscription is cancelled.

use std::time::Duration;

use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::controller::ControllerHandle;
use crate::error::TelemetryError;
use crate::wire::TelemetryFrame;

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Live telemetry feed. Dropping it unsubscribes.
pub struct TelemetrySubscription {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl TelemetrySubscription {
    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Stop the feed and wait for the reader to exit.
    pub async fn unsubscribe(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for TelemetrySubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Subscribe `controller` to the telemetry stream at `url`.
pub fn subscribe_telemetry(
    url: impl Into<String>,
    controller: ControllerHandle,
    reconnect_delay: Duration,
) -> TelemetrySubscription {
    let url = url.into();
    let cancel = CancellationToken::new();
    let task = tokio::spawn(run_feed(url, controller, cancel.clone(), reconnect_delay));
    TelemetrySubscription {
        cancel,
        task: Some(task),
    }
}

#[derive(Debug, PartialEq, Eq)]
enum FeedEnd {
    /// The daemon closed the stream.
    Closed,
    /// The controller is gone; nothing left to feed.
    ControllerGone,
}

async fn run_feed(
    url: String,
    controller: ControllerHandle,
    cancel: CancellationToken,
    reconnect_delay: Duration,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            result = read_feed(&url, &controller) => match result {
                Ok(FeedEnd::ControllerGone) => break,
                Ok(FeedEnd::Closed) => tracing::debug!(url = %url, "telemetry stream closed"),
                Err(e) => tracing::debug!(url = %url, error = %e, "telemetry stream failed"),
            },
        }
        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(reconnect_delay) => {}
        }
    }
    tracing::debug!(url = %url, "telemetry feed stopped");
}

async fn read_feed(url: &str, controller: &ControllerHandle) -> Result<FeedEnd, TelemetryError> {
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await?;
    tracing::info!(url = %url, "telemetry connected");

    while let Some(msg) = ws.next().await {
        let text = match msg? {
            Message::Text(text) => text,
            Message::Close(_) => return Ok(FeedEnd::Closed),
            _ => continue,
        };
        let sample = match TelemetryFrame::decode(&text) {
            Ok(sample) => sample,
            Err(e) => {
                tracing::debug!(error = %e, "skipping undecodable telemetry frame");
                continue;
            }
        };
        match controller.push_telemetry(sample) {
            Ok(true) => {}
            Ok(false) => tracing::debug!("telemetry frame dropped: controller busy"),
            Err(_) => return Ok(FeedEnd::ControllerGone),
        }
    }
    Ok(FeedEnd::Closed)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures_util::SinkExt;
    use tokio::net::TcpListener;

    use tether_core::config::TetherConfig;
    use tether_core::session::{ConnectionContext, SessionState};

    use super::*;
    use crate::controller::Controller;
    use crate::link::fake::FakeLink;

    const FRAME: &str = r#"{
        "head_pose": {"x": 0.0, "y": 0.0, "z": 0.0, "roll": 0.0, "pitch": 0.0, "yaw": 0.8},
        "antennas_position": [0.0, 0.0],
        "body_yaw": 0.0
    }"#;

    /// Serve one client: send `frames`, then hold the socket open.
    async fn serve_frames(frames: Vec<&'static str>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = tokio_tungstenite::accept_async(stream).await.expect("handshake");
            for frame in frames {
                ws.send(Message::Text(frame.into())).await.expect("send frame");
            }
            // Keep the connection open until the client leaves.
            while ws.next().await.is_some() {}
        });
        format!("ws://{addr}")
    }

    async fn ready_controller() -> ControllerHandle {
        let (h, _task) = Controller::spawn(TetherConfig::default(), Arc::new(FakeLink::default()));
        h.connect(ConnectionContext::Local).await.expect("running");
        h.request_start().await.expect("running");
        h.startup_succeeded().await.expect("running");
        assert_eq!(h.status().state, SessionState::Ready);
        h
    }

    #[tokio::test]
    async fn frames_reach_the_controller() {
        let url = serve_frames(vec!["not json", r#"{"body_yaw": 1}"#, FRAME]).await;
        let h = ready_controller().await;
        let sub = subscribe_telemetry(url, h.clone(), DEFAULT_RECONNECT_DELAY);

        let mut target = h.watch_target();
        tokio::time::timeout(
            Duration::from_secs(5),
            target.wait_for(|t| (t.pose.yaw - 0.8).abs() < 1e-9),
        )
        .await
        .expect("adopted before timeout")
        .expect("controller running");

        assert_eq!(h.inspect().await.expect("running").adopted_telemetry, 1);
        sub.unsubscribe().await;
    }

    #[tokio::test]
    async fn unsubscribe_stops_reconnecting() {
        // Nothing listens here, so the reader keeps retrying.
        let h = ready_controller().await;
        let sub = subscribe_telemetry(
            "ws://127.0.0.1:9",
            h.clone(),
            Duration::from_millis(10),
        );
        assert!(sub.is_active());
        tokio::time::timeout(Duration::from_secs(5), sub.unsubscribe())
            .await
            .expect("reader exits promptly");
    }
}
