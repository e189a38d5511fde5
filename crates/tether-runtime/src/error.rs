//! Error types at the runtime boundary.

use thiserror::Error;

use tether_core::input::InputRejection;
use tether_core::session::SessionState;

/// Failure of one request to the robot daemon.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("request timed out")]
    Timeout,

    #[error("daemon returned HTTP {status}")]
    Status { status: u16 },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("cannot decode daemon response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for LinkError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if let Some(status) = err.status() {
            Self::Status {
                status: status.as_u16(),
            }
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("cannot decode telemetry frame: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("telemetry frame has no head pose")]
    MissingPose,
}

/// Why a request through [`crate::controller::ControllerHandle`] did not
/// complete.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("controller is not running")]
    Closed,

    #[error("input rejected: {0}")]
    Rejected(InputRejection),

    #[error("motion not allowed while session is {0}")]
    NotAllowed(SessionState),

    #[error("force send failed: {0}")]
    Link(#[from] LinkError),

    #[error("force send task aborted")]
    Aborted,
}
