//! Leg odometry fused with inertial data.
//!
//! A foot in stance is assumed not to move, so the joint velocities of its
//! leg tell how fast the base moves over it. That measurement is noisy and
//! only exists while a foot is loaded, while the IMU specific force is always
//! available but drifts when integrated. A [`VelKalmanFilter`] bank combines
//! the two, with the IMU acceleration as control input and the leg odometry
//! as measurement. Without a stance foot the filter runs open loop.

use nalgebra::{DVector, Matrix3, Vector3, Vector6};

use crate::{
    config::EstimatorConfig,
    foot::{Feet, Foot},
    kalman::VelKalmanFilter,
    kinematics::{KinematicsFrame, LinkKinematics},
    low_pass_filter::MeanInitializedLowPass,
    rotation::matrix_to_euler_zyx,
    state::{LinkState, RobotState},
};

/// Fuses leg odometry and IMU acceleration into the base velocity and
/// position, and derives the world frame state of the torso and both feet.
#[derive(Debug, Clone)]
pub struct FloatingBaseEstimator {
    dt: f64,
    gravity: Vector3<f64>,
    velocity_filter: VelKalmanFilter<3>,
    torso_filter: MeanInitializedLowPass<3>,
    /// Base origin in the world frame.
    position: Vector3<f64>,
    velocity: Vector3<f64>,
    /// World angular velocity of the previous cycle.
    angular_velocity: Option<Vector3<f64>>,
    /// Cycles skipped since `angular_velocity` was sampled.
    skipped: u32,
}

impl FloatingBaseEstimator {
    /// Creates an estimator tuned by `config`.
    #[must_use]
    pub fn new(config: &EstimatorConfig) -> Self {
        let velocity_filter =
            VelKalmanFilter::new(config.filter.sys_noise, config.filter.mea_noise, config.dt)
                .with_initial_covariance(config.filter.initial_covariance)
                .with_divergence_threshold(config.filter.high_suspect_number);

        Self {
            dt: config.dt,
            gravity: Vector3::new(0.0, 0.0, -config.gravity),
            velocity_filter,
            torso_filter: MeanInitializedLowPass::new(
                config.torso_filter_time_constant(),
                config.cycle_period(),
            ),
            position: Vector3::zeros(),
            velocity: Vector3::zeros(),
            angular_velocity: None,
            skipped: 0,
        }
    }

    /// Records a control cycle that was not fused, so the next angular
    /// acceleration spans the whole gap.
    pub fn skip_cycle(&mut self) {
        self.skipped = self.skipped.saturating_add(1);
    }

    /// Runs one fusion step and writes the fused outputs into `state`.
    ///
    /// `orientation` is the body to world rotation of this cycle. Does
    /// nothing while `state` holds no kinematics.
    pub fn estimate(&mut self, state: &mut RobotState, orientation: &Matrix3<f64>) {
        let Some(frame) = state.kinematics.as_ref() else {
            return;
        };
        let r = orientation;
        let imu = &state.imu;
        let qd = &state.joints.velocity;

        let angular_velocity = r * imu.angular_velocity;
        let elapsed = self.dt * f64::from(self.skipped.saturating_add(1));
        let angular_acceleration = self
            .angular_velocity
            .map_or_else(Vector3::zeros, |previous| (angular_velocity - previous) / elapsed);
        self.angular_velocity = Some(angular_velocity);
        self.skipped = 0;

        let acceleration = r * imu.specific_force + self.gravity;

        let stance: Vec<Foot> = state.contact.phase().stance_feet().collect();
        let weights = state.grf.vertical().map(|force| force.max(0.0));
        self.velocity = match leg_odometry(frame, qd, &imu.angular_velocity, r, &stance, &weights) {
            Some(measurement) => self.velocity_filter.update(measurement, acceleration),
            None => self.velocity_filter.predict(acceleration),
        };

        if self.velocity_filter.iterations() == 1 {
            // start with the lowest sole on the ground
            let lowest = Foot::ALL
                .iter()
                .map(|&foot| (r * frame.feet[foot].position()).z)
                .fold(f64::INFINITY, f64::min);
            self.position = Vector3::new(0.0, 0.0, -lowest);
        } else {
            self.position += self.velocity * self.dt;
        }

        let lever = r * frame.body.position();
        let output = &mut state.output;
        output.body = LinkState {
            position: self.position + lever,
            orientation: matrix_to_euler_zyx(r),
            velocity: self.velocity + angular_velocity.cross(&lever),
            angular_velocity,
            acceleration: acceleration
                + angular_acceleration.cross(&lever)
                + angular_velocity.cross(&angular_velocity.cross(&lever)),
            angular_acceleration,
            wrench: state.grf.net(),
        };
        output.filtered_velocity = self.torso_filter.filter(self.velocity);

        let base = BaseMotion {
            orientation: *r,
            position: self.position,
            velocity: self.velocity,
            acceleration,
            angular_velocity,
            angular_acceleration,
        };
        for foot in Foot::ALL {
            let mut link = base.point_state(
                &frame.feet[foot],
                &state.joints.velocity,
                &state.joints.acceleration,
            );
            link.wrench = state.grf.current[foot];
            output.feet[foot] = link;
        }
    }

    /// Fused base velocity in the world frame.
    #[must_use]
    pub fn velocity(&self) -> Vector3<f64> {
        self.velocity
    }

    /// Integrated base position in the world frame.
    #[must_use]
    pub fn position(&self) -> Vector3<f64> {
        self.position
    }

    /// The velocity filter bank.
    #[must_use]
    pub fn velocity_filter(&self) -> &VelKalmanFilter<3> {
        &self.velocity_filter
    }
}

/// Base velocity implied by the stance feet, `None` in flight.
///
/// Each stance foot gives `-R (w x p_f + J_lin qd)`; with both feet down the
/// two are blended by vertical force.
fn leg_odometry(
    frame: &KinematicsFrame,
    qd: &DVector<f64>,
    body_rate: &Vector3<f64>,
    orientation: &Matrix3<f64>,
    stance: &[Foot],
    weights: &Feet<f64>,
) -> Option<Vector3<f64>> {
    if stance.is_empty() {
        return None;
    }

    let total: f64 = stance.iter().map(|&foot| weights[foot]).sum();
    let weight = |foot: Foot| {
        if total > 0.0 {
            weights[foot] / total
        } else {
            1.0 / stance.len() as f64
        }
    };

    Some(stance.iter().fold(Vector3::zeros(), |sum, &foot| {
        let link = &frame.feet[foot];
        let relative = link.velocity(qd).fixed_rows::<3>(0).into_owned();
        let measurement = -(orientation * (body_rate.cross(&link.position()) + relative));
        sum + measurement * weight(foot)
    }))
}

/// World frame motion of the base origin for one cycle.
struct BaseMotion {
    orientation: Matrix3<f64>,
    position: Vector3<f64>,
    velocity: Vector3<f64>,
    acceleration: Vector3<f64>,
    angular_velocity: Vector3<f64>,
    angular_acceleration: Vector3<f64>,
}

impl BaseMotion {
    /// World state of a point moved by the legs, without its wrench.
    fn point_state(
        &self,
        link: &LinkKinematics,
        qd: &DVector<f64>,
        qdd: &DVector<f64>,
    ) -> LinkState {
        let r = &self.orientation;
        let w = &self.angular_velocity;

        let lever = r * link.position();
        let twist = link.velocity(qd);
        let linear = r * twist.fixed_rows::<3>(0);
        let angular = r * twist.fixed_rows::<3>(3);
        let accel = link.acceleration(qd, qdd);

        LinkState {
            position: self.position + lever,
            orientation: matrix_to_euler_zyx(
                &(r * link.pose.rotation.to_rotation_matrix().matrix()),
            ),
            velocity: self.velocity + w.cross(&lever) + linear,
            angular_velocity: w + angular,
            acceleration: self.acceleration
                + r * accel.fixed_rows::<3>(0)
                + 2.0 * w.cross(&linear)
                + w.cross(&w.cross(&lever)),
            angular_acceleration: self.angular_acceleration
                + r * accel.fixed_rows::<3>(3)
                + w.cross(&angular),
            wrench: Vector6::zeros(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        contact::SupportPhase,
        kinematics::KinematicsProvider,
        rotation::euler_zyx_to_matrix,
        state::ImuSample,
        test_utils::{bent_stance, biped_model, params},
    };
    use approx::assert_relative_eq;

    const STANDING_FORCE: f64 = 350.0;

    /// A robot standing on both feet, legs moving at `qd`.
    fn standing(qd: DVector<f64>, forces: Feet<f64>) -> RobotState {
        let config = params();
        let model = biped_model();
        let mut state = RobotState::new(12, config.offsets.into(), config.grf.bounds().unwrap());

        state.joints.position = bent_stance();
        state.joints.velocity = qd;
        state.imu = ImuSample {
            specific_force: Vector3::new(0.0, 0.0, config.gravity),
            ..ImuSample::default()
        };
        state.imu_init = Some(state.imu);
        state.kinematics = Some(
            model
                .compute(
                    &state.joints.position,
                    &state.joints.velocity,
                    &Vector3::new(0.0, 0.0, -config.gravity),
                    &state.offsets,
                )
                .unwrap(),
        );
        for foot in Foot::ALL {
            state.grf.current[foot].z = forces[foot];
        }
        state.contact.update(Some(forces));
        state
    }

    #[test]
    fn static_robot_stays_still() {
        let mut state = standing(DVector::zeros(12), Feet::new(STANDING_FORCE, STANDING_FORCE));
        let mut estimator = FloatingBaseEstimator::new(&params());

        for _ in 0..400 {
            estimator.estimate(&mut state, &Matrix3::identity());
        }

        assert_relative_eq!(estimator.velocity(), Vector3::zeros(), epsilon = 1e-9);
        assert_relative_eq!(state.output.body.acceleration, Vector3::zeros(), epsilon = 1e-9);
        assert_relative_eq!(state.output.body.wrench.z, 2.0 * STANDING_FORCE);
        assert!(estimator.velocity_filter().covariance().x < 1.0);
    }

    #[test]
    fn first_cycle_puts_lowest_sole_on_ground() {
        let mut state = standing(DVector::zeros(12), Feet::new(STANDING_FORCE, STANDING_FORCE));
        let mut estimator = FloatingBaseEstimator::new(&params());
        estimator.estimate(&mut state, &Matrix3::identity());

        assert_relative_eq!(state.foot(Foot::Left).position.z, 0.0, epsilon = 1e-12);
        assert_relative_eq!(state.foot(Foot::Right).position.z, 0.0, epsilon = 1e-12);
        assert!(state.output.body.position.z > 0.5);
        assert_relative_eq!(
            state.output.body.position.z - estimator.position().z,
            params().offsets.body[2],
            epsilon = 1e-12
        );
    }

    #[test]
    fn stance_foot_velocity_converges_to_zero() {
        // the left leg pushes the body while its foot stays planted
        let mut qd = DVector::zeros(12);
        qd[2] = 0.2;
        qd[3] = -0.4;
        qd[4] = 0.2;
        let mut state = standing(qd, Feet::new(STANDING_FORCE, 0.0));
        assert_eq!(state.contact.phase(), SupportPhase::Single(Foot::Left));

        let mut estimator = FloatingBaseEstimator::new(&params());
        for _ in 0..2000 {
            estimator.estimate(&mut state, &Matrix3::identity());
        }

        assert!(estimator.velocity().norm() > 1e-3);
        assert_relative_eq!(state.foot(Foot::Left).velocity, Vector3::zeros(), epsilon = 1e-6);
    }

    #[test]
    fn double_support_blends_by_force() {
        let state = standing(DVector::from_element(12, 0.1), Feet::new(300.0, 100.0));
        let frame = state.kinematics.as_ref().unwrap();
        let r = Matrix3::identity();
        let w = Vector3::zeros();
        let qd = &state.joints.velocity;

        let single = |foot| {
            leg_odometry(frame, qd, &w, &r, &[foot], &Feet::new(1.0, 1.0)).unwrap()
        };
        let blended = leg_odometry(
            frame,
            qd,
            &w,
            &r,
            &[Foot::Left, Foot::Right],
            &Feet::new(300.0, 100.0),
        )
        .unwrap();
        assert_relative_eq!(
            blended,
            single(Foot::Left) * 0.75 + single(Foot::Right) * 0.25,
            epsilon = 1e-12
        );

        let equal = leg_odometry(
            frame,
            qd,
            &w,
            &r,
            &[Foot::Left, Foot::Right],
            &Feet::new(0.0, 0.0),
        )
        .unwrap();
        assert_relative_eq!(
            equal,
            (single(Foot::Left) + single(Foot::Right)) * 0.5,
            epsilon = 1e-12
        );
    }

    #[test]
    fn body_rotation_appears_as_odometry() {
        // a body turning about a planted foot moves with -w x p_f
        let state = standing(DVector::zeros(12), Feet::new(STANDING_FORCE, 0.0));
        let frame = state.kinematics.as_ref().unwrap();
        let w = Vector3::new(0.0, 0.0, 0.5);
        let measured = leg_odometry(
            frame,
            &state.joints.velocity,
            &w,
            &Matrix3::identity(),
            &[Foot::Left],
            &Feet::new(1.0, 0.0),
        )
        .unwrap();
        assert_relative_eq!(measured, -w.cross(&frame.feet.left.position()), epsilon = 1e-12);
    }

    #[test]
    fn flight_integrates_imu_open_loop() {
        let mut state = standing(DVector::zeros(12), Feet::new(0.0, 0.0));
        assert_eq!(state.contact.phase(), SupportPhase::Flight);
        state.imu.specific_force.z += 1.0;

        let mut estimator = FloatingBaseEstimator::new(&params());
        for _ in 0..100 {
            estimator.estimate(&mut state, &Matrix3::identity());
        }
        assert_relative_eq!(estimator.velocity().z, 100.0 * params().dt, epsilon = 1e-9);
        assert_relative_eq!(state.output.body.acceleration.z, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn tilted_body_reports_orientation() {
        let mut state = standing(DVector::zeros(12), Feet::new(STANDING_FORCE, STANDING_FORCE));
        let euler = Vector3::new(0.05, -0.1, 0.0);
        let r = euler_zyx_to_matrix(&euler);
        state.imu.euler = euler;
        state.imu.specific_force = r.transpose() * Vector3::new(0.0, 0.0, params().gravity);

        let mut estimator = FloatingBaseEstimator::new(&params());
        estimator.estimate(&mut state, &r);

        assert_relative_eq!(state.output.body.orientation, euler, epsilon = 1e-12);
        assert_relative_eq!(state.output.body.acceleration, Vector3::zeros(), epsilon = 1e-12);
    }

    #[test]
    fn angular_acceleration_from_rate_change() {
        let mut state = standing(DVector::zeros(12), Feet::new(STANDING_FORCE, STANDING_FORCE));
        let mut estimator = FloatingBaseEstimator::new(&params());
        estimator.estimate(&mut state, &Matrix3::identity());
        assert_relative_eq!(state.output.body.angular_acceleration, Vector3::zeros());

        state.imu.angular_velocity = Vector3::new(0.0, 0.01, 0.0);
        estimator.estimate(&mut state, &Matrix3::identity());
        assert_relative_eq!(
            state.output.body.angular_acceleration,
            Vector3::new(0.0, 0.01 / params().dt, 0.0),
            epsilon = 1e-9
        );
    }

    #[test]
    fn angular_acceleration_spans_skipped_cycles() {
        let mut state = standing(DVector::zeros(12), Feet::new(STANDING_FORCE, STANDING_FORCE));
        let mut estimator = FloatingBaseEstimator::new(&params());
        estimator.estimate(&mut state, &Matrix3::identity());

        estimator.skip_cycle();
        estimator.skip_cycle();
        state.imu.angular_velocity = Vector3::new(0.03, 0.0, 0.0);
        estimator.estimate(&mut state, &Matrix3::identity());
        assert_relative_eq!(
            state.output.body.angular_acceleration,
            Vector3::new(0.01 / params().dt, 0.0, 0.0),
            epsilon = 1e-9
        );

        // back to a single period once fused again
        state.imu.angular_velocity = Vector3::zeros();
        estimator.estimate(&mut state, &Matrix3::identity());
        assert_relative_eq!(
            state.output.body.angular_acceleration.x,
            -0.03 / params().dt,
            epsilon = 1e-9
        );
    }
}
