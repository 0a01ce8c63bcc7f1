//! Floating-base state estimation for biped robots.
//!
//! No sensor measures how the torso of a walking robot moves through the
//! world. This crate estimates it every control cycle from what the robot
//! does measure: joint encoders, joint torque sensors and an IMU.
//!
//! Each call to [`Estimator::run`] goes through the same stages:
//!
//! 1. The joint samples are checked and clamped to their configured limits.
//! 2. A [`KinematicsProvider`] turns the joint state into sole poses,
//!    Jacobians and gravity torques.
//! 3. The [`grf`] stage recovers the contact wrench under each foot from the
//!    joint torques.
//! 4. The [`contact`] stage classifies each foot as swing or stance, with a
//!    hysteresis band between two force thresholds.
//! 5. The [`floating_base`] stage fuses leg odometry from the stance feet
//!    with the IMU acceleration through a [`kalman::VelKalmanFilter`] bank.
//!
//! The fused state of the torso and both feet is published as a 12x6 matrix,
//! see [`Estimator::result`].
//!
//! ```no_run
//! use legged_state_estimator::Estimator;
//!
//! let mut estimator = Estimator::init("biped_model.json", "params.json")?;
//!
//! let q = [0.0; 12];
//! let imu = [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 9.81];
//! let report = estimator.run(&q, &[0.0; 12], &[0.0; 12], &[0.0; 12], &imu)?;
//! if !report.is_held() {
//!     let body_velocity = estimator.result().fixed_view::<1, 3>(1, 0);
//!     println!("{body_velocity}");
//! }
//! # Ok::<(), legged_state_estimator::EstimatorError>(())
//! ```

pub mod config;
pub mod contact;
pub mod error;
pub mod estimator;
pub mod floating_base;
pub mod foot;
pub mod grf;
pub mod kalman;
pub mod kinematics;
pub mod low_pass_filter;
pub mod rotation;
pub mod state;

#[cfg(test)]
mod test_utils;

pub use config::EstimatorConfig;
pub use contact::{Contact, ContactState, SupportPhase};
pub use error::{ConfigError, EstimatorError, GrfError, KinematicsError, ModelError};
pub use estimator::{CycleReport, Estimator, HoldReason};
pub use foot::{Feet, Foot};
pub use kinematics::{KinematicsFrame, KinematicsProvider, LegChainModel};
pub use state::{ResultMatrix, RobotState};
