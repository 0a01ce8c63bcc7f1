//! The per-cycle estimation pipeline.

use std::path::Path;

use nalgebra::{DVector, Vector3};

use crate::{
    config::EstimatorConfig,
    contact::SupportPhase,
    error::{EstimatorError, GrfError, KinematicsError},
    floating_base::FloatingBaseEstimator,
    foot::Feet,
    grf::GrfEstimator,
    kinematics::{KinematicsProvider, LegChainModel},
    state::{ImuSample, JointState, ResultMatrix, RobotState, IMU_LEN},
};

/// Why a cycle kept the previous output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldReason {
    /// The IMU sample contained NaN or infinity.
    NonFiniteImu,
    /// The kinematics provider could not evaluate the joint state.
    Kinematics(KinematicsError),
}

/// Outcome of one [`Estimator::run`] call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleReport {
    /// Set when the published output was held from the previous cycle.
    pub held: Option<HoldReason>,
    /// Set when the contact wrenches could not be estimated, in which case
    /// the contact classification was held.
    pub grf_error: Option<GrfError>,
    /// Number of joint samples clamped to their limits.
    pub clamped: usize,
    /// Support phase after this cycle.
    pub phase: SupportPhase,
    /// Whether the support phase changed this cycle.
    pub phase_changed: bool,
}

impl CycleReport {
    /// Whether the published output is from an earlier cycle.
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.held.is_some()
    }
}

/// Floating-base state estimator for a biped.
///
/// Owns the kinematics provider, the filters and the [`RobotState`]. Call
/// [`Estimator::run`] once per control cycle with the latest samples and read
/// the fused state from [`Estimator::result`].
#[derive(Debug)]
pub struct Estimator<K: KinematicsProvider = LegChainModel> {
    provider: K,
    config: EstimatorConfig,
    grf: GrfEstimator,
    base: FloatingBaseEstimator,
    state: RobotState,
    result: ResultMatrix,
    cycles: u64,
}

impl Estimator<LegChainModel> {
    /// Loads the robot description and the parameter file and builds an
    /// estimator from them.
    ///
    /// # Errors
    ///
    /// Returns [`EstimatorError::Model`] if the robot description cannot be
    /// loaded and [`EstimatorError::Config`] if the parameters are missing,
    /// malformed or inconsistent with the model.
    pub fn init(
        model_path: impl AsRef<Path>,
        params_path: impl AsRef<Path>,
    ) -> Result<Self, EstimatorError> {
        let model = LegChainModel::from_file(model_path)?;
        let config = EstimatorConfig::from_file(params_path)?;
        Self::new(model, config)
    }
}

impl<K: KinematicsProvider> Estimator<K> {
    /// Builds an estimator around an existing kinematics provider.
    ///
    /// # Errors
    ///
    /// Returns [`EstimatorError::Config`] if `config` does not validate
    /// against the provider's degrees of freedom.
    pub fn new(provider: K, config: EstimatorConfig) -> Result<Self, EstimatorError> {
        let dof = provider.dof();
        config.validate(dof)?;
        let bounds = config.grf.bounds()?;

        let legs = Feet::from_fn(|foot| provider.leg_joints(foot));
        let grf = GrfEstimator::new(legs, config.grf.min_jacobian_conditioning);
        let base = FloatingBaseEstimator::new(&config);
        let state = RobotState::new(dof, config.offsets.into(), bounds);

        log::info!(
            "estimator ready: {dof} joints, dt = {} s, contact band [{}, {}] N",
            config.dt,
            bounds.lower,
            bounds.upper
        );

        Ok(Self {
            provider,
            config,
            grf,
            base,
            state,
            result: ResultMatrix::zeros(),
            cycles: 0,
        })
    }

    /// Runs one estimation cycle.
    ///
    /// `q`, `qd`, `qdd` and `tau` hold one entry per joint, `imu` is
    /// `[roll, pitch, yaw, wx, wy, wz, ax, ay, az]`. Joint samples are clamped
    /// to the configured limits before use.
    ///
    /// # Errors
    ///
    /// Returns [`EstimatorError::DimensionMismatch`] if an input has the wrong
    /// length. Nothing is updated in that case. Transient failures, such as a
    /// non-finite sample, are not errors: the previous output is held and the
    /// reason is given in the returned [`CycleReport`].
    pub fn run(
        &mut self,
        q: &[f64],
        qd: &[f64],
        qdd: &[f64],
        tau: &[f64],
        imu: &[f64],
    ) -> Result<CycleReport, EstimatorError> {
        let dof = self.provider.dof();
        for (input, values) in [
            ("joint position", q),
            ("joint velocity", qd),
            ("joint acceleration", qdd),
            ("joint torque", tau),
        ] {
            if values.len() != dof {
                return Err(EstimatorError::DimensionMismatch {
                    input,
                    expected: dof,
                    got: values.len(),
                });
            }
        }
        let imu = ImuSample::from_slice(imu).ok_or(EstimatorError::DimensionMismatch {
            input: "imu",
            expected: IMU_LEN,
            got: imu.len(),
        })?;

        let mut joints = JointState {
            position: DVector::from_column_slice(q),
            velocity: DVector::from_column_slice(qd),
            acceleration: DVector::from_column_slice(qdd),
            torque: DVector::from_column_slice(tau),
        };
        let clamped = self.config.joint_limits.clamp(
            &mut joints.position,
            &mut joints.velocity,
            &mut joints.torque,
        );
        if clamped > 0 {
            log::trace!("cycle {}: clamped {clamped} joint samples", self.cycles);
        }
        self.state.joints = joints;
        self.cycles += 1;

        if !imu.is_finite() {
            return Ok(self.hold(HoldReason::NonFiniteImu, clamped));
        }
        self.state.imu = imu;
        let reference = *self.state.imu_init.get_or_insert(imu);
        let orientation = imu.orientation(&reference);

        let gravity = orientation.transpose() * Vector3::new(0.0, 0.0, -self.config.gravity);
        let frame = self
            .provider
            .compute(
                &self.state.joints.position,
                &self.state.joints.velocity,
                &gravity,
                &self.state.offsets,
            )
            .and_then(|frame| {
                if self.state.joints.acceleration.iter().all(|v| v.is_finite()) {
                    Ok(frame)
                } else {
                    Err(KinematicsError::NonFinite)
                }
            });
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => return Ok(self.hold(HoldReason::Kinematics(err), clamped)),
        };

        let grf_error = self
            .grf
            .estimate(&self.state.joints.torque, &frame, &orientation, &mut self.state.grf)
            .err();
        self.state.kinematics = Some(frame);

        if let Some(err) = grf_error {
            log::warn!("cycle {}: {err}, holding contact state", self.cycles);
        }
        let vertical = grf_error.is_none().then(|| self.state.grf.vertical());
        let phase = self.state.contact.update(vertical);

        self.base.estimate(&mut self.state, &orientation);
        self.result = self.state.output.to_matrix();

        Ok(CycleReport {
            held: None,
            grf_error,
            clamped,
            phase,
            phase_changed: self.state.contact.phase_changed(),
        })
    }

    fn hold(&mut self, reason: HoldReason, clamped: usize) -> CycleReport {
        log::warn!("cycle {}: {reason:?}, holding previous estimate", self.cycles);
        self.base.skip_cycle();
        CycleReport {
            held: Some(reason),
            grf_error: None,
            clamped,
            phase: self.state.contact.phase(),
            phase_changed: false,
        }
    }

    /// The published state.
    ///
    /// Rows `0..4` describe the torso, `4..8` the left foot and `8..12` the
    /// right foot, see [`OutputState::to_matrix`](crate::state::OutputState::to_matrix).
    #[must_use]
    pub fn result(&self) -> &ResultMatrix {
        &self.result
    }

    /// Everything the estimator tracks.
    #[must_use]
    pub fn robot_state(&self) -> &RobotState {
        &self.state
    }

    /// The fused base velocity in the world frame.
    #[must_use]
    pub fn base_velocity(&self) -> Vector3<f64> {
        self.base.velocity()
    }

    /// The floating-base fusion stage.
    #[must_use]
    pub fn floating_base(&self) -> &FloatingBaseEstimator {
        &self.base
    }

    /// The parameters in use.
    #[must_use]
    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    /// The kinematics provider.
    #[must_use]
    pub fn provider(&self) -> &K {
        &self.provider
    }

    /// Number of cycles accepted so far.
    #[must_use]
    pub fn cycles(&self) -> u64 {
        self.cycles
    }
}
