//! Declared physical ranges and clamping.
//!
//! Every snapshot that is stored as a target or sent to the device goes
//! through [`Limits::clamp`] first.

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::types::{FIELD_COUNT, TargetSnapshot};

/// Closed interval `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

impl Range {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub const fn symmetric(half: f64) -> Self {
        Self::new(-half, half)
    }

    /// Clamp into the range. Non-finite input collapses to the rest value 0
    /// (itself clamped).
    pub fn clamp(&self, value: f64) -> f64 {
        let v = if value.is_finite() { value } else { 0.0 };
        v.max(self.min).min(self.max)
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Map a normalized axis value onto the range: `0 → 0`, `+1 → max`,
    /// `-1 → min`. The result is clamped.
    pub fn from_normalized(&self, n: f64) -> f64 {
        let n = n.clamp(-1.0, 1.0);
        let v = if n >= 0.0 { n * self.max } else { -n * self.min };
        self.clamp(v)
    }
}

/// Ranges for every [`TargetSnapshot`] field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub x: Range,
    pub y: Range,
    pub z: Range,
    pub pitch: Range,
    pub yaw: Range,
    pub roll: Range,
    pub body_yaw: Range,
    pub antenna: Range,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            x: Range::symmetric(0.05),
            y: Range::symmetric(0.05),
            z: Range::new(-0.03, 0.05),
            pitch: Range::symmetric(0.7),
            yaw: Range::symmetric(1.2),
            roll: Range::symmetric(0.7),
            body_yaw: Range::symmetric(2.8),
            antenna: Range::symmetric(3.0),
        }
    }
}

impl Limits {
    /// Ranges in [`TargetSnapshot::to_array`] order.
    pub fn as_array(&self) -> [Range; FIELD_COUNT] {
        [
            self.x,
            self.y,
            self.z,
            self.pitch,
            self.yaw,
            self.roll,
            self.body_yaw,
            self.antenna,
            self.antenna,
        ]
    }

    #[must_use]
    pub fn clamp(&self, snapshot: &TargetSnapshot) -> TargetSnapshot {
        let ranges = self.as_array();
        let mut values = snapshot.to_array();
        for (v, r) in values.iter_mut().zip(ranges.iter()) {
            *v = r.clamp(*v);
        }
        TargetSnapshot::from_array(values)
    }

    pub fn contains(&self, snapshot: &TargetSnapshot) -> bool {
        self.as_array()
            .iter()
            .zip(snapshot.to_array())
            .all(|(r, v)| r.contains(v))
    }

    /// Reject inverted ranges and ranges that exclude the rest value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let named = [
            ("x", self.x),
            ("y", self.y),
            ("z", self.z),
            ("pitch", self.pitch),
            ("yaw", self.yaw),
            ("roll", self.roll),
            ("body_yaw", self.body_yaw),
            ("antenna", self.antenna),
        ];
        for (name, r) in named {
            if !(r.min.is_finite() && r.max.is_finite()) || r.min > r.max {
                return Err(ConfigError::InvalidRange {
                    field: name.to_string(),
                    min: r.min,
                    max: r.max,
                });
            }
            if !r.contains(0.0) {
                return Err(ConfigError::RestOutsideRange {
                    field: name.to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_bounds_and_non_finite() {
        let r = Range::new(-1.0, 2.0);
        assert_eq!(r.clamp(5.0), 2.0);
        assert_eq!(r.clamp(-5.0), -1.0);
        assert_eq!(r.clamp(0.5), 0.5);
        assert_eq!(r.clamp(f64::NAN), 0.0);
        assert_eq!(r.clamp(f64::INFINITY), 0.0);
    }

    #[test]
    fn normalized_mapping_is_asymmetric_aware() {
        let r = Range::new(-0.03, 0.05);
        assert_eq!(r.from_normalized(0.0), 0.0);
        assert!((r.from_normalized(1.0) - 0.05).abs() < 1e-12);
        assert!((r.from_normalized(-1.0) + 0.03).abs() < 1e-12);
        assert!((r.from_normalized(-0.5) + 0.015).abs() < 1e-12);
        assert!((r.from_normalized(3.0) - 0.05).abs() < 1e-12);
    }

    #[test]
    fn snapshot_clamp_touches_every_field() {
        let limits = Limits::default();
        let wild = TargetSnapshot::from_array([9.0; FIELD_COUNT]);
        let clamped = limits.clamp(&wild);
        assert!(limits.contains(&clamped));
        assert_eq!(clamped.pose.z, 0.05);
        assert_eq!(clamped.body_yaw, 2.8);
        assert_eq!(clamped.antennas.right, 3.0);
    }

    #[test]
    fn validate_rejects_inverted_range() {
        let limits = Limits {
            pitch: Range::new(0.5, -0.5),
            ..Limits::default()
        };
        assert!(matches!(
            limits.validate(),
            Err(ConfigError::InvalidRange { ref field, .. }) if field == "pitch"
        ));
    }

    #[test]
    fn validate_rejects_range_without_rest() {
        let limits = Limits {
            z: Range::new(0.01, 0.05),
            ..Limits::default()
        };
        assert!(matches!(
            limits.validate(),
            Err(ConfigError::RestOutsideRange { .. })
        ));
    }

    #[test]
    fn default_limits_are_valid() {
        Limits::default().validate().expect("defaults validate");
    }
}
