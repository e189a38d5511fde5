//! tether-core: session state machine and real-time motion pipeline.
//! Pure logic only. Callers own the clock and pass `now_ms` in; callers own
//! the network and act on the snapshots returned here.

pub mod config;
pub mod health;
pub mod input;
pub mod limits;
pub mod pipeline;
pub mod reconcile;
pub mod session;
pub mod smoother;
pub mod throttle;
pub mod types;

pub use config::{ConfigError, TetherConfig};
pub use pipeline::{FrameOutput, MotionPipeline};
pub use session::{SessionMachine, SessionState, SessionStatus};
pub use types::{TargetPatch, TargetSnapshot};
