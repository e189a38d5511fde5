use serde::{Deserialize, Serialize};
use std::fmt;

// ─── Pose / Antennas / Snapshot ───────────────────────────────────

/// Head pose: translation in meters, rotation in radians.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub pitch: f64,
    pub yaw: f64,
    pub roll: f64,
}

/// Left/right antenna angles in radians.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AntennaPair {
    pub left: f64,
    pub right: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AntennaSide {
    Left,
    Right,
}

/// Number of scalar fields in a [`TargetSnapshot`].
pub const FIELD_COUNT: usize = 9;

/// Whether a snapshot field is measured in meters or radians.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Translation,
    Angle,
}

/// Field kind by index in [`TargetSnapshot::to_array`] order.
pub const FIELD_KINDS: [FieldKind; FIELD_COUNT] = [
    FieldKind::Translation,
    FieldKind::Translation,
    FieldKind::Translation,
    FieldKind::Angle,
    FieldKind::Angle,
    FieldKind::Angle,
    FieldKind::Angle,
    FieldKind::Angle,
    FieldKind::Angle,
];

/// The complete commanded state: every send carries all of it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetSnapshot {
    pub pose: Pose,
    pub antennas: AntennaPair,
    pub body_yaw: f64,
}

impl TargetSnapshot {
    /// The zero/rest snapshot a session starts from.
    pub const REST: Self = Self {
        pose: Pose {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            pitch: 0.0,
            yaw: 0.0,
            roll: 0.0,
        },
        antennas: AntennaPair {
            left: 0.0,
            right: 0.0,
        },
        body_yaw: 0.0,
    };

    /// Flatten as `[x, y, z, pitch, yaw, roll, body_yaw, left, right]`.
    pub fn to_array(&self) -> [f64; FIELD_COUNT] {
        [
            self.pose.x,
            self.pose.y,
            self.pose.z,
            self.pose.pitch,
            self.pose.yaw,
            self.pose.roll,
            self.body_yaw,
            self.antennas.left,
            self.antennas.right,
        ]
    }

    pub fn from_array(v: [f64; FIELD_COUNT]) -> Self {
        Self {
            pose: Pose {
                x: v[0],
                y: v[1],
                z: v[2],
                pitch: v[3],
                yaw: v[4],
                roll: v[5],
            },
            body_yaw: v[6],
            antennas: AntennaPair {
                left: v[7],
                right: v[8],
            },
        }
    }

    /// Largest absolute difference per field kind: `(meters, radians)`.
    pub fn divergence(&self, other: &Self) -> Divergence {
        let a = self.to_array();
        let b = other.to_array();
        let mut out = Divergence::default();
        for (i, kind) in FIELD_KINDS.iter().enumerate() {
            let d = (a[i] - b[i]).abs();
            match kind {
                FieldKind::Translation => out.translation_m = out.translation_m.max(d),
                FieldKind::Angle => out.rotation_rad = out.rotation_rad.max(d),
            }
        }
        out
    }

    /// Merge a partial update; unset fields keep their current value.
    #[must_use]
    pub fn merged(&self, patch: &TargetPatch) -> Self {
        let p = &patch.pose;
        Self {
            pose: Pose {
                x: p.x.unwrap_or(self.pose.x),
                y: p.y.unwrap_or(self.pose.y),
                z: p.z.unwrap_or(self.pose.z),
                pitch: p.pitch.unwrap_or(self.pose.pitch),
                yaw: p.yaw.unwrap_or(self.pose.yaw),
                roll: p.roll.unwrap_or(self.pose.roll),
            },
            antennas: AntennaPair {
                left: patch.antennas.left.unwrap_or(self.antennas.left),
                right: patch.antennas.right.unwrap_or(self.antennas.right),
            },
            body_yaw: patch.body_yaw.unwrap_or(self.body_yaw),
        }
    }
}

impl fmt::Display for TargetSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = &self.pose;
        write!(
            f,
            "xyz=({:.4}, {:.4}, {:.4}) pyr=({:.3}, {:.3}, {:.3}) body={:.3} ant=({:.3}, {:.3})",
            p.x,
            p.y,
            p.z,
            p.pitch,
            p.yaw,
            p.roll,
            self.body_yaw,
            self.antennas.left,
            self.antennas.right
        )
    }
}

/// Per-kind maximum absolute difference between two snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Divergence {
    pub translation_m: f64,
    pub rotation_rad: f64,
}

// ─── Partial updates ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PosePatch {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
    pub pitch: Option<f64>,
    pub yaw: Option<f64>,
    pub roll: Option<f64>,
}

impl From<Pose> for PosePatch {
    fn from(p: Pose) -> Self {
        Self {
            x: Some(p.x),
            y: Some(p.y),
            z: Some(p.z),
            pitch: Some(p.pitch),
            yaw: Some(p.yaw),
            roll: Some(p.roll),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AntennaPatch {
    pub left: Option<f64>,
    pub right: Option<f64>,
}

/// Partial target update used by the command surface and `set_targets`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetPatch {
    pub pose: PosePatch,
    pub antennas: AntennaPatch,
    pub body_yaw: Option<f64>,
}

impl TargetPatch {
    pub fn pose(pose: PosePatch) -> Self {
        Self {
            pose,
            ..Self::default()
        }
    }

    pub fn body_yaw(value: f64) -> Self {
        Self {
            body_yaw: Some(value),
            ..Self::default()
        }
    }

    pub fn antenna(side: AntennaSide, value: f64) -> Self {
        let antennas = match side {
            AntennaSide::Left => AntennaPatch {
                left: Some(value),
                right: None,
            },
            AntennaSide::Right => AntennaPatch {
                left: None,
                right: Some(value),
            },
        };
        Self {
            antennas,
            ..Self::default()
        }
    }

    /// A patch that sets every field from `snapshot`.
    pub fn full(snapshot: &TargetSnapshot) -> Self {
        Self {
            pose: snapshot.pose.into(),
            antennas: AntennaPatch {
                left: Some(snapshot.antennas.left),
                right: Some(snapshot.antennas.right),
            },
            body_yaw: Some(snapshot.body_yaw),
        }
    }
}

// ─── Interaction ──────────────────────────────────────────────────

/// Which input source, if any, currently owns the target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InteractionMode {
    #[default]
    Idle,
    DraggingPointer,
    DraggingDevice,
    Resetting,
}

impl InteractionMode {
    pub fn is_idle(self) -> bool {
        self == Self::Idle
    }
}

impl fmt::Display for InteractionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::DraggingPointer => "dragging-pointer",
            Self::DraggingDevice => "dragging-device",
            Self::Resetting => "resetting",
        })
    }
}

// ─── Tests ────────────────────────────────────────────────────────
