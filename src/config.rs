//! Estimator parameters, loaded from a JSON parameter file.
//!
//! Everything the estimation pipeline is tuned with lives here. Keys that
//! bound safety-relevant quantities (joint limits, contact thresholds, filter
//! noise) are required; purely cosmetic ones fall back to defaults.
//!
//! ```json
//! {
//!   "dt": 0.0025,
//!   "filter": { "sys_noise": 0.05, "mea_noise": 0.2 },
//!   "grf": { "lower_bound": 100.0, "max_force": 480.0 },
//!   "offsets": {
//!     "body": [0.0, 0.0, 0.0],
//!     "left_foot": [0.0, 0.0, -0.04],
//!     "right_foot": [0.0, 0.0, -0.04]
//!   },
//!   "joint_limits": {
//!     "position_lower": [...],
//!     "position_upper": [...],
//!     "velocity": [...],
//!     "torque": [...]
//!   }
//! }
//! ```

use std::{path::Path, time::Duration};

use nalgebra::{DVector, Vector3};
use serde::{Deserialize, Serialize};

use crate::{
    error::ConfigError,
    foot::Feet,
    kalman::{DEFAULT_HIGH_SUSPECT_NUMBER, DEFAULT_INITIAL_COVARIANCE},
};

const fn default_dt() -> f64 {
    0.0025
}
const fn default_gravity() -> f64 {
    9.81
}
const fn default_high_suspect_number() -> f64 {
    DEFAULT_HIGH_SUSPECT_NUMBER
}
const fn default_initial_covariance() -> f64 {
    DEFAULT_INITIAL_COVARIANCE
}
const fn default_upper_ratio() -> f64 {
    0.8
}
const fn default_min_jacobian_conditioning() -> f64 {
    1e-6
}
const fn default_torso_filter_tau() -> f64 {
    0.05
}

/// Top-level estimator parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatorConfig {
    /// Control cycle period in seconds (default: 0.0025 = 400 Hz).
    #[serde(default = "default_dt")]
    pub dt: f64,

    /// Magnitude of gravitational acceleration in m/s^2 (default: 9.81).
    #[serde(default = "default_gravity")]
    pub gravity: f64,

    /// Velocity Kalman filter tuning.
    pub filter: FilterConfig,

    /// Ground reaction force thresholds.
    pub grf: GrfConfig,

    /// Offsets from model frames to the physical reference points.
    pub offsets: OffsetsConfig,

    /// Per-joint bounds applied to incoming samples.
    pub joint_limits: JointLimits,

    /// Time constant of the torso velocity low-pass filter in seconds
    /// (default: 0.05).
    #[serde(default = "default_torso_filter_tau")]
    pub torso_filter_tau: f64,
}

/// Velocity Kalman filter tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Standard deviation of the process noise.
    pub sys_noise: f64,
    /// Standard deviation of the leg odometry measurement noise.
    pub mea_noise: f64,
    /// Covariance above which a channel is reset (default: 100).
    #[serde(default = "default_high_suspect_number")]
    pub high_suspect_number: f64,
    /// Covariance the filter starts from and is reset to (default: 1).
    #[serde(default = "default_initial_covariance")]
    pub initial_covariance: f64,
}

/// Ground reaction force thresholds for contact detection.
///
/// The upper bound is either given directly, or derived from the robot's
/// maximum expected foot force as `upper_ratio * max_force`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrfConfig {
    /// Vertical force in N below which a foot is in swing.
    pub lower_bound: f64,
    /// Vertical force in N at or above which a foot is in stance.
    #[serde(default)]
    pub upper_bound: Option<f64>,
    /// Maximum expected vertical force on one foot in N.
    #[serde(default)]
    pub max_force: Option<f64>,
    /// Fraction of `max_force` used as the upper bound (default: 0.8).
    #[serde(default = "default_upper_ratio")]
    pub upper_ratio: f64,
    /// Reciprocal condition number below which a leg Jacobian is treated as
    /// singular (default: 1e-6).
    #[serde(default = "default_min_jacobian_conditioning")]
    pub min_jacobian_conditioning: f64,
}

/// Resolved hysteresis thresholds, `0 <= lower < upper`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serde-serialize",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct GrfBounds {
    /// Vertical force below which a foot is in swing.
    pub lower: f64,
    /// Vertical force at or above which a foot is in stance.
    pub upper: f64,
}

impl GrfBounds {
    /// Creates bounds, checking `0 <= lower < upper`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if the bounds are out of order,
    /// negative or not finite.
    pub fn new(lower: f64, upper: f64) -> Result<Self, ConfigError> {
        if !(lower.is_finite() && upper.is_finite()) || lower < 0.0 || lower >= upper {
            return Err(ConfigError::InvalidValue {
                field: "grf".into(),
                message: format!("bounds must satisfy 0 <= lower < upper, got {lower} and {upper}"),
            });
        }
        Ok(Self { lower, upper })
    }
}

impl GrfConfig {
    /// Resolves the hysteresis bounds.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] if neither `upper_bound` nor
    /// `max_force` is given, and [`ConfigError::InvalidValue`] if the bounds
    /// are inconsistent.
    pub fn bounds(&self) -> Result<GrfBounds, ConfigError> {
        let upper = match (self.upper_bound, self.max_force) {
            (Some(upper), _) => upper,
            (None, Some(max_force)) => {
                if !(self.upper_ratio > 0.0 && self.upper_ratio <= 1.0) {
                    return Err(ConfigError::InvalidValue {
                        field: "grf.upper_ratio".into(),
                        message: format!("must be in (0, 1], got {}", self.upper_ratio),
                    });
                }
                self.upper_ratio * max_force
            }
            (None, None) => {
                return Err(ConfigError::MissingField(
                    "grf.upper_bound or grf.max_force".into(),
                ))
            }
        };
        GrfBounds::new(self.lower_bound, upper)
    }
}

/// Offsets from model frames to physical reference points, in the frame of
/// the link they are attached to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OffsetsConfig {
    /// Torso reference point relative to the base frame.
    pub body: [f64; 3],
    /// Left sole contact point relative to the last left leg joint.
    pub left_foot: [f64; 3],
    /// Right sole contact point relative to the last right leg joint.
    pub right_foot: [f64; 3],
}

/// Resolved frame offsets consumed by the kinematics provider.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameOffsets {
    /// Torso reference point relative to the base frame.
    pub body: Vector3<f64>,
    /// Sole contact points relative to the last joint of each leg.
    pub feet: Feet<Vector3<f64>>,
}

impl Default for FrameOffsets {
    fn default() -> Self {
        Self {
            body: Vector3::zeros(),
            feet: Feet::new(Vector3::zeros(), Vector3::zeros()),
        }
    }
}

impl From<OffsetsConfig> for FrameOffsets {
    fn from(config: OffsetsConfig) -> Self {
        Self {
            body: Vector3::from(config.body),
            feet: Feet::new(
                Vector3::from(config.left_foot),
                Vector3::from(config.right_foot),
            ),
        }
    }
}

/// Per-joint bounds, one entry per degree of freedom.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointLimits {
    /// Lower joint position limit in rad.
    pub position_lower: Vec<f64>,
    /// Upper joint position limit in rad.
    pub position_upper: Vec<f64>,
    /// Absolute joint velocity limit in rad/s.
    pub velocity: Vec<f64>,
    /// Absolute joint torque limit in Nm.
    pub torque: Vec<f64>,
}

impl JointLimits {
    fn validate(&self, dof: usize) -> Result<(), ConfigError> {
        for (field, values) in [
            ("joint_limits.position_lower", &self.position_lower),
            ("joint_limits.position_upper", &self.position_upper),
            ("joint_limits.velocity", &self.velocity),
            ("joint_limits.torque", &self.torque),
        ] {
            if values.len() != dof {
                return Err(ConfigError::DimensionMismatch {
                    field: field.into(),
                    expected: dof,
                    got: values.len(),
                });
            }
            if values.iter().any(|v| v.is_nan()) {
                return Err(ConfigError::InvalidValue {
                    field: field.into(),
                    message: "contains NaN".into(),
                });
            }
        }

        if let Some(joint) = self
            .position_lower
            .iter()
            .zip(&self.position_upper)
            .position(|(lower, upper)| lower > upper)
        {
            return Err(ConfigError::InvalidValue {
                field: "joint_limits.position_lower".into(),
                message: format!("joint {joint} has a lower limit above its upper limit"),
            });
        }

        for (field, values) in [
            ("joint_limits.velocity", &self.velocity),
            ("joint_limits.torque", &self.torque),
        ] {
            if let Some(joint) = values.iter().position(|&v| v <= 0.0) {
                return Err(ConfigError::InvalidValue {
                    field: field.into(),
                    message: format!("joint {joint} limit must be positive"),
                });
            }
        }

        Ok(())
    }

    /// Clamps joint positions, velocities and torques in place, returning the
    /// number of entries that were out of bounds.
    ///
    /// # Note
    ///
    /// The vectors must already have one entry per joint.
    pub fn clamp(
        &self,
        position: &mut DVector<f64>,
        velocity: &mut DVector<f64>,
        torque: &mut DVector<f64>,
    ) -> usize {
        let mut clamped = 0;
        let mut clamp_entry = |value: &mut f64, lower: f64, upper: f64| {
            let bounded = value.clamp(lower, upper);
            // NaN is left untouched, it is rejected further down the pipeline
            if bounded != *value && !value.is_nan() {
                *value = bounded;
                clamped += 1;
            }
        };

        for (i, q) in position.iter_mut().enumerate() {
            clamp_entry(q, self.position_lower[i], self.position_upper[i]);
        }
        for (i, qd) in velocity.iter_mut().enumerate() {
            clamp_entry(qd, -self.velocity[i], self.velocity[i]);
        }
        for (i, tau) in torque.iter_mut().enumerate() {
            clamp_entry(tau, -self.torque[i], self.torque[i]);
        }

        clamped
    }
}

impl EstimatorConfig {
    /// Validates every field against a model with `dof` degrees of freedom.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self, dof: usize) -> Result<(), ConfigError> {
        duration("dt", self.dt)?;
        positive("gravity", self.gravity)?;
        duration("torso_filter_tau", self.torso_filter_tau)?;
        positive("filter.mea_noise", self.filter.mea_noise)?;
        positive("filter.initial_covariance", self.filter.initial_covariance)?;

        if !(self.filter.sys_noise.is_finite() && self.filter.sys_noise >= 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "filter.sys_noise".into(),
                message: format!("must be non-negative, got {}", self.filter.sys_noise),
            });
        }
        if self.filter.high_suspect_number.is_nan()
            || self.filter.high_suspect_number <= self.filter.initial_covariance
        {
            return Err(ConfigError::InvalidValue {
                field: "filter.high_suspect_number".into(),
                message: "must exceed filter.initial_covariance".into(),
            });
        }
        if !(0.0..1.0).contains(&self.grf.min_jacobian_conditioning) {
            return Err(ConfigError::InvalidValue {
                field: "grf.min_jacobian_conditioning".into(),
                message: format!("must be in [0, 1), got {}", self.grf.min_jacobian_conditioning),
            });
        }
        if self.offsets_flat().any(|v| !v.is_finite()) {
            return Err(ConfigError::InvalidValue {
                field: "offsets".into(),
                message: "must be finite".into(),
            });
        }

        self.grf.bounds()?;
        self.joint_limits.validate(dof)
    }

    fn offsets_flat(&self) -> impl Iterator<Item = f64> + '_ {
        self.offsets
            .body
            .iter()
            .chain(&self.offsets.left_foot)
            .chain(&self.offsets.right_foot)
            .copied()
    }

    /// The control cycle period, saturating for values [`validate`] rejects.
    ///
    /// [`validate`]: Self::validate
    #[must_use]
    pub fn cycle_period(&self) -> Duration {
        Duration::try_from_secs_f64(self.dt).unwrap_or(Duration::MAX)
    }

    /// The time constant of the torso velocity filter, saturating like
    /// [`cycle_period`](Self::cycle_period).
    #[must_use]
    pub fn torso_filter_time_constant(&self) -> Duration {
        Duration::try_from_secs_f64(self.torso_filter_tau).unwrap_or(Duration::MAX)
    }

    /// Parses a parameter file from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Json`] if the document is malformed or a
    /// required key is missing.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Loads a parameter file from disk.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read and
    /// [`ConfigError::Json`] if it cannot be parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&content)
    }
}

/// A period in seconds that is representable as a non-zero [`Duration`].
fn duration(field: &str, value: f64) -> Result<(), ConfigError> {
    positive(field, value)?;
    match Duration::try_from_secs_f64(value) {
        Ok(period) if !period.is_zero() => Ok(()),
        _ => Err(ConfigError::InvalidValue {
            field: field.into(),
            message: format!("{value} s is not a representable period"),
        }),
    }
}

fn positive(field: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            field: field.into(),
            message: format!("must be positive, got {value}"),
        })
    }
}
