//! Configuration loaded from TOML.
//!
//! Every section has defaults, so an empty file (or no file) is a valid
//! configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::health::DEFAULT_CRASH_THRESHOLD;
use crate::limits::Limits;
use crate::smoother::{DEFAULT_FACTOR, DEFAULT_SETTLE_EPSILON};
use crate::throttle::DEFAULT_MIN_INTERVAL_MS;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid range for {field}: min {min} > max {max}")]
    InvalidRange { field: String, min: f64, max: f64 },

    #[error("range for {field} must contain the rest value 0")]
    RestOutsideRange { field: String },

    #[error("{field} must be greater than zero")]
    NonPositive { field: &'static str },
}

// ─── Sections ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Base URL of the robot daemon HTTP API.
    pub base_url: String,
    /// WebSocket URL of the full-state telemetry stream.
    pub telemetry_url: String,
    pub set_target_path: String,
    pub status_path: String,
    pub request_timeout_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            telemetry_url: "ws://localhost:8000/api/state/ws/full".to_string(),
            set_target_path: "/api/move/set_target".to_string(),
            status_path: "/api/daemon/status".to_string(),
            request_timeout_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Frame tick period: input sampling, smoothing and dispatch.
    pub frame_interval_ms: u64,
    /// How often the smoothed target is published to UI readers.
    pub ui_refresh_interval_ms: u64,
    pub liveness_interval_ms: u64,
    pub crash_threshold: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: 16,
            ui_refresh_interval_ms: 66,
            liveness_interval_ms: 1_000,
            crash_threshold: DEFAULT_CRASH_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub min_interval_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: DEFAULT_MIN_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    /// Fraction of the remaining distance covered per tick, in `(0, 1]`.
    pub factor: f64,
    pub settle_epsilon: f64,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            factor: DEFAULT_FACTOR,
            settle_epsilon: DEFAULT_SETTLE_EPSILON,
        }
    }
}

/// Per-group exponential smoothing factors for device axes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AxisSmoothing {
    pub translation: f64,
    pub rotation: f64,
    pub body_yaw: f64,
    pub antennas: f64,
}

impl Default for AxisSmoothing {
    fn default() -> Self {
        Self {
            translation: 0.15,
            rotation: 0.35,
            body_yaw: 0.3,
            antennas: 0.4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Quiet period required before the other input source may take over.
    pub switch_cooldown_ms: u64,
    /// Device input idle for this long ends the device interaction.
    pub device_sample_period_ms: u64,
    /// How long `resetting` blocks other input after a reset.
    pub reset_hold_ms: u64,
    pub deadzone: f64,
    pub smoothing: AxisSmoothing,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            switch_cooldown_ms: 150,
            device_sample_period_ms: 100,
            reset_hold_ms: 800,
            deadzone: 0.08,
            smoothing: AxisSmoothing::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Continuous idle time required before telemetry may move the target.
    pub idle_cooldown_ms: u64,
    pub major_translation_m: f64,
    pub major_rotation_rad: f64,
    pub settle_translation_m: f64,
    pub settle_rotation_rad: f64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            idle_cooldown_ms: 20_000,
            major_translation_m: 0.004,
            major_rotation_rad: 0.05,
            settle_translation_m: 0.001,
            settle_rotation_rad: 0.01,
        }
    }
}

// ─── Root ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TetherConfig {
    pub link: LinkConfig,
    pub timing: TimingConfig,
    pub dispatch: DispatchConfig,
    pub smoothing: SmoothingConfig,
    pub input: InputConfig,
    pub reconcile: ReconcileConfig,
    pub limits: Limits,
}

impl TetherConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.limits.validate()?;
        if self.timing.frame_interval_ms == 0 {
            return Err(ConfigError::NonPositive {
                field: "timing.frame_interval_ms",
            });
        }
        if self.timing.liveness_interval_ms == 0 {
            return Err(ConfigError::NonPositive {
                field: "timing.liveness_interval_ms",
            });
        }
        if self.timing.ui_refresh_interval_ms == 0 {
            return Err(ConfigError::NonPositive {
                field: "timing.ui_refresh_interval_ms",
            });
        }
        if !(self.smoothing.factor > 0.0) {
            return Err(ConfigError::NonPositive {
                field: "smoothing.factor",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::Range;

    #[test]
    fn empty_toml_gives_defaults() {
        let config = TetherConfig::from_toml_str("").expect("empty config parses");
        assert_eq!(config, TetherConfig::default());
        assert_eq!(config.timing.crash_threshold, 3);
        assert_eq!(config.dispatch.min_interval_ms, 50);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = TetherConfig::from_toml_str(
            r#"
            [dispatch]
            min_interval_ms = 100

            [input.smoothing]
            rotation = 0.5

            [limits.body_yaw]
            min = -1.0
            max = 1.0
            "#,
        )
        .expect("parses");
        assert_eq!(config.dispatch.min_interval_ms, 100);
        assert_eq!(config.input.smoothing.rotation, 0.5);
        assert_eq!(config.input.smoothing.translation, 0.15);
        assert_eq!(config.limits.body_yaw, Range::new(-1.0, 1.0));
        assert_eq!(config.limits.x, Limits::default().x);
    }

    #[test]
    fn invalid_range_is_rejected() {
        let err = TetherConfig::from_toml_str(
            r#"
            [limits.yaw]
            min = 1.0
            max = -1.0
            "#,
        )
        .expect_err("inverted range");
        assert!(matches!(err, ConfigError::InvalidRange { .. }));
    }

    #[test]
    fn zero_frame_interval_is_rejected() {
        let err = TetherConfig::from_toml_str("[timing]\nframe_interval_ms = 0\n")
            .expect_err("zero interval");
        assert!(matches!(err, ConfigError::NonPositive { .. }));
    }

    #[test]
    fn malformed_toml_is_parse_error() {
        let err = TetherConfig::from_toml_str("[timing\n").expect_err("malformed");
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = TetherConfig::load(Path::new("/nonexistent/tether.toml")).expect_err("missing");
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn serializes_back_to_toml() {
        let text = toml::to_string(&TetherConfig::default()).expect("serialize");
        let back = TetherConfig::from_toml_str(&text).expect("reparse");
        assert_eq!(back, TetherConfig::default());
    }
}
