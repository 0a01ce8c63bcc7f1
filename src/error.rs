//! Error types for model loading, configuration and the estimation cycle.

use std::path::PathBuf;

use thiserror::Error;

use crate::foot::Foot;

/// Top-level error returned by the [`Estimator`](crate::Estimator).
#[derive(Debug, Error)]
pub enum EstimatorError {
    /// The parameter file was malformed or incomplete.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The robot description could not be turned into a kinematic model.
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    /// A sample vector passed to [`Estimator::run`](crate::Estimator::run)
    /// does not have the configured length.
    #[error("{input} dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch {
        /// Name of the offending input.
        input: &'static str,
        /// Length the estimator was configured with.
        expected: usize,
        /// Length that was supplied.
        got: usize,
    },
}

/// Errors raised while loading or validating the parameter file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the parameter file.
    #[error("IO error reading {path}: {source}")]
    Io {
        /// Path of the parameter file.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// The parameter file is not valid JSON or is missing a required key.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// A key that has no safe default was not provided.
    #[error("missing required field: {0}")]
    MissingField(String),

    /// A key was provided with a value outside its valid range.
    #[error("invalid value for {field}: {message}")]
    InvalidValue {
        /// Name of the offending key.
        field: String,
        /// Description of the constraint that was violated.
        message: String,
    },

    /// A per-joint array does not match the model's degrees of freedom.
    #[error("{field} has {got} entries, model has {expected} degrees of freedom")]
    DimensionMismatch {
        /// Name of the offending key.
        field: String,
        /// Degrees of freedom of the model.
        expected: usize,
        /// Number of entries found.
        got: usize,
    },
}

/// Errors raised while building a [`LegChainModel`](crate::kinematics::LegChainModel).
#[derive(Debug, Error)]
pub enum ModelError {
    /// Failed to read the robot description.
    #[error("IO error reading {path}: {source}")]
    Io {
        /// Path of the robot description.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// The robot description is not valid JSON or has the wrong shape.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// A leg was declared without any joints.
    #[error("leg {0} has no joints")]
    EmptyLeg(String),

    /// Two legs were declared for the same foot.
    #[error("foot {0} is declared more than once")]
    DuplicateFoot(String),

    /// A leg names a foot other than `left` or `right`.
    #[error("unknown foot {0}, expected left or right")]
    UnknownFoot(String),

    /// No leg was declared for a foot.
    #[error("no leg declared for foot {0}")]
    MissingFoot(String),

    /// A joint axis has zero or non-finite length.
    #[error("joint {0} has an invalid axis")]
    InvalidAxis(String),
}

/// The kinematics provider could not produce a usable frame this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum KinematicsError {
    /// Joint positions or velocities contain NaN or infinity.
    #[error("joint state contains non-finite values")]
    NonFinite,

    /// The joint vectors do not match the model.
    #[error("joint vector dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch {
        /// Degrees of freedom of the model.
        expected: usize,
        /// Length that was supplied.
        got: usize,
    },
}

/// The contact wrench could not be estimated this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum GrfError {
    /// Joint torques contain NaN or infinity.
    #[error("joint torques contain non-finite values")]
    NonFinite,

    /// A leg Jacobian is too close to singular to invert.
    #[error("{foot} leg Jacobian is ill-conditioned (conditioning {conditioning:e})")]
    IllConditioned {
        /// The leg whose Jacobian failed.
        foot: Foot,
        /// Smallest to largest singular value ratio.
        conditioning: f64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimator_error_from_config_error() {
        let err = ConfigError::MissingField("grf.lower_bound".into());
        let err: EstimatorError = err.into();
        assert!(matches!(err, EstimatorError::Config(_)));
        assert!(err.to_string().contains("grf.lower_bound"));
    }

    #[test]
    fn estimator_error_from_model_error() {
        let err: EstimatorError = ModelError::MissingFoot("left".into()).into();
        assert!(matches!(err, EstimatorError::Model(_)));
        assert_eq!(
            err.to_string(),
            "model error: no leg declared for foot left"
        );
    }

    #[test]
    fn display_messages() {
        assert_eq!(
            EstimatorError::DimensionMismatch {
                input: "joint position",
                expected: 12,
                got: 11
            }
            .to_string(),
            "joint position dimension mismatch: expected 12, got 11"
        );
        assert_eq!(
            ConfigError::InvalidValue {
                field: "grf".into(),
                message: "lower bound must be below upper bound".into()
            }
            .to_string(),
            "invalid value for grf: lower bound must be below upper bound"
        );
        assert_eq!(
            ConfigError::DimensionMismatch {
                field: "joint_limits.torque".into(),
                expected: 12,
                got: 10
            }
            .to_string(),
            "joint_limits.torque has 10 entries, model has 12 degrees of freedom"
        );
        assert_eq!(
            KinematicsError::NonFinite.to_string(),
            "joint state contains non-finite values"
        );
    }

    #[test]
    fn io_error_includes_path() {
        let e = ModelError::Io {
            path: PathBuf::from("/tmp/biped.json"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        let msg = e.to_string();
        assert!(msg.contains("/tmp/biped.json"));
        assert!(msg.contains("not found"));
    }

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn errors_are_send_sync() {
        assert_send_sync::<EstimatorError>();
        assert_send_sync::<KinematicsError>();
        assert_send_sync::<GrfError>();
    }
}
