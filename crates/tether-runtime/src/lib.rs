//! tether-runtime: async shell around `tether-core`.
//!
//! The controller task owns the session machine and the motion pipeline.
//! Everything else (interval drivers, liveness probes, the telemetry reader,
//! callers) talks to it through a `ControllerHandle`.

pub mod controller;
pub mod dispatcher;
pub mod error;
pub mod link;
pub mod settings;
pub mod telemetry;
pub mod wire;
