//! JSON shapes exchanged with the robot daemon.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tether_core::reconcile::TelemetrySnapshot;
use tether_core::types::{AntennaPatch, Pose, TargetPatch, TargetSnapshot};

use crate::error::TelemetryError;

/// Head pose as the daemon spells it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WirePose {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
}

impl From<Pose> for WirePose {
    fn from(p: Pose) -> Self {
        Self {
            x: p.x,
            y: p.y,
            z: p.z,
            roll: p.roll,
            pitch: p.pitch,
            yaw: p.yaw,
        }
    }
}

impl From<WirePose> for Pose {
    fn from(w: WirePose) -> Self {
        Self {
            x: w.x,
            y: w.y,
            z: w.z,
            pitch: w.pitch,
            yaw: w.yaw,
            roll: w.roll,
        }
    }
}

/// Body of `POST {set_target_path}`. Always the complete snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SetTargetRequest {
    pub target_head_pose: WirePose,
    /// `[left, right]`
    pub target_antennas: [f64; 2],
    pub target_body_yaw: f64,
}

impl From<&TargetSnapshot> for SetTargetRequest {
    fn from(s: &TargetSnapshot) -> Self {
        Self {
            target_head_pose: s.pose.into(),
            target_antennas: [s.antennas.left, s.antennas.right],
            target_body_yaw: s.body_yaw,
        }
    }
}

/// Response of `GET {status_path}`. Only the fields used here are typed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DaemonStatus {
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub simulation_enabled: Option<bool>,
}

/// One text frame of the full-state telemetry stream.
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryFrame {
    #[serde(default)]
    pub head_pose: Option<WirePose>,
    #[serde(default)]
    pub antennas_position: Option<[f64; 2]>,
    #[serde(default)]
    pub body_yaw: Option<f64>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl TelemetryFrame {
    pub fn decode(text: &str) -> Result<TelemetrySnapshot, TelemetryError> {
        let frame: Self = serde_json::from_str(text)?;
        frame.into_snapshot()
    }

    /// The head pose is required. Antennas and body yaw are optional and,
    /// when absent, stay unreported rather than reading as rest.
    pub fn into_snapshot(self) -> Result<TelemetrySnapshot, TelemetryError> {
        let pose = Pose::from(self.head_pose.ok_or(TelemetryError::MissingPose)?);
        let antennas = match self.antennas_position {
            Some([left, right]) => AntennaPatch {
                left: Some(left),
                right: Some(right),
            },
            None => AntennaPatch::default(),
        };
        Ok(TelemetrySnapshot {
            reading: TargetPatch {
                pose: pose.into(),
                antennas,
                body_yaw: self.body_yaw,
            },
            timestamp_ms: self
                .timestamp
                .and_then(|t| u64::try_from(t.timestamp_millis()).ok()),
        })
    }
}

#[cfg(test)]
mod tests {
    use tether_core::MotionPipeline;

    use super::*;

    #[test]
    fn set_target_body_shape() {
        let mut snap = TargetSnapshot::REST;
        snap.pose.pitch = 0.2;
        snap.antennas.right = -0.5;
        snap.body_yaw = 1.0;
        let json = serde_json::to_value(SetTargetRequest::from(&snap)).expect("serialize");
        assert_eq!(json["target_head_pose"]["pitch"], 0.2);
        assert_eq!(json["target_antennas"][1], -0.5);
        assert_eq!(json["target_body_yaw"], 1.0);
    }

    #[test]
    fn telemetry_frame_decodes() {
        let text = r#"{
            "head_pose": {"x": 0.01, "y": 0.0, "z": 0.02, "roll": 0.0, "pitch": 0.1, "yaw": -0.3},
            "antennas_position": [0.4, -0.4],
            "body_yaw": 0.5,
            "timestamp": "2025-01-01T00:00:01Z",
            "control_mode": "enabled"
        }"#;
        let t = TelemetryFrame::decode(text).expect("decode");
        let s = t.resolve(&TargetSnapshot::REST);
        assert_eq!(s.pose.yaw, -0.3);
        assert_eq!(s.pose.z, 0.02);
        assert_eq!(s.antennas.left, 0.4);
        assert_eq!(s.body_yaw, 0.5);
        assert_eq!(t.timestamp_ms, Some(1_735_689_601_000));
    }

    #[test]
    fn telemetry_without_pose_is_rejected() {
        let err = TelemetryFrame::decode(r#"{"body_yaw": 0.1}"#).expect_err("no pose");
        assert!(matches!(err, TelemetryError::MissingPose));
    }

    #[test]
    fn missing_optional_fields_stay_unreported() {
        let t = TelemetryFrame::decode(
            r#"{"head_pose": {"x": 0, "y": 0, "z": 0, "roll": 0, "pitch": 0, "yaw": 0.2}}"#,
        )
        .expect("decode");
        assert_eq!(t.reading.antennas, AntennaPatch::default());
        assert_eq!(t.reading.body_yaw, None);
        assert_eq!(t.timestamp_ms, None);

        let mut local = TargetSnapshot::REST;
        local.body_yaw = 1.5;
        local.antennas.left = 1.0;
        let s = t.resolve(&local);
        assert_eq!(s.pose.yaw, 0.2);
        assert_eq!(s.body_yaw, 1.5);
        assert_eq!(s.antennas.left, 1.0);
    }

    #[test]
    fn head_only_frame_keeps_local_body_and_antennas() {
        let mut p = MotionPipeline::default();
        let mut local = TargetSnapshot::REST;
        local.body_yaw = 1.5;
        local.antennas.left = 1.0;
        assert!(p.on_telemetry(&local.into(), 0).is_adopt());

        let frame = TelemetryFrame::decode(
            r#"{"head_pose": {"x": 0, "y": 0, "z": 0, "roll": 0, "pitch": 0, "yaw": 0.7}}"#,
        )
        .expect("decode");
        assert!(p.on_telemetry(&frame, 10).is_adopt());
        assert_eq!(p.target().pose.yaw, 0.7);
        assert_eq!(p.target().body_yaw, 1.5);
        assert_eq!(p.target().antennas.left, 1.0);
    }
}
