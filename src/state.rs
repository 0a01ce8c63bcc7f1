//! The state container mutated once per control cycle.

use nalgebra::{DVector, Matrix3, SMatrix, Vector3, Vector6};

use crate::{
    config::{FrameOffsets, GrfBounds},
    contact::ContactTracker,
    foot::{Feet, Foot},
    grf::GroundReactionForces,
    kinematics::KinematicsFrame,
    rotation::{euler_zyx_to_matrix, wrap_angle},
};

/// Number of entries in an IMU sample.
pub const IMU_LEN: usize = 9;

/// Published state: body, left foot and right foot blocks of four rows each.
pub type ResultMatrix = SMatrix<f64, 12, 6>;

/// One IMU reading.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(
    feature = "serde-serialize",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct ImuSample {
    /// Roll, pitch and yaw in rad.
    pub euler: Vector3<f64>,
    /// Angular rate in the body frame in rad/s.
    pub angular_velocity: Vector3<f64>,
    /// Specific force in the body frame in m/s^2.
    pub specific_force: Vector3<f64>,
}

impl ImuSample {
    /// Splits a `[roll, pitch, yaw, wx, wy, wz, ax, ay, az]` sample.
    ///
    /// Returns `None` unless `raw` has exactly [`IMU_LEN`] entries.
    #[must_use]
    pub fn from_slice(raw: &[f64]) -> Option<Self> {
        if raw.len() != IMU_LEN {
            return None;
        }
        Some(Self {
            euler: Vector3::new(raw[0], raw[1], raw[2]),
            angular_velocity: Vector3::new(raw[3], raw[4], raw[5]),
            specific_force: Vector3::new(raw[6], raw[7], raw[8]),
        })
    }

    /// Whether every component is finite.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.euler
            .iter()
            .chain(self.angular_velocity.iter())
            .chain(self.specific_force.iter())
            .all(|v| v.is_finite())
    }

    /// Body to world rotation, with yaw measured from `reference`.
    #[must_use]
    pub fn orientation(&self, reference: &ImuSample) -> Matrix3<f64> {
        let mut euler = self.euler;
        euler.z = wrap_angle(euler.z - reference.euler.z);
        euler_zyx_to_matrix(&euler)
    }
}

/// Joint samples of one cycle, one entry per degree of freedom.
#[derive(Debug, Clone, PartialEq)]
pub struct JointState {
    /// Joint positions in rad.
    pub position: DVector<f64>,
    /// Joint velocities in rad/s.
    pub velocity: DVector<f64>,
    /// Joint accelerations in rad/s^2.
    pub acceleration: DVector<f64>,
    /// Joint torques in Nm.
    pub torque: DVector<f64>,
}

impl JointState {
    /// All-zero samples for `dof` joints.
    #[must_use]
    pub fn zeros(dof: usize) -> Self {
        Self {
            position: DVector::zeros(dof),
            velocity: DVector::zeros(dof),
            acceleration: DVector::zeros(dof),
            torque: DVector::zeros(dof),
        }
    }
}

/// Fused state of a rigid body in the world frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(
    feature = "serde-serialize",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct LinkState {
    /// Position in m.
    pub position: Vector3<f64>,
    /// Roll, pitch and yaw in rad.
    pub orientation: Vector3<f64>,
    /// Linear velocity in m/s.
    pub velocity: Vector3<f64>,
    /// Angular velocity in rad/s.
    pub angular_velocity: Vector3<f64>,
    /// Linear acceleration in m/s^2.
    pub acceleration: Vector3<f64>,
    /// Angular acceleration in rad/s^2.
    pub angular_acceleration: Vector3<f64>,
    /// Contact wrench `[f; m]` acting on the body.
    pub wrench: Vector6<f64>,
}

impl LinkState {
    fn write_block(&self, matrix: &mut ResultMatrix, row: usize) {
        let rows = [
            (self.position, self.orientation),
            (self.velocity, self.angular_velocity),
            (self.acceleration, self.angular_acceleration),
            (
                self.wrench.fixed_rows::<3>(0).into_owned(),
                self.wrench.fixed_rows::<3>(3).into_owned(),
            ),
        ];
        for (i, (linear, angular)) in rows.iter().enumerate() {
            matrix.fixed_view_mut::<1, 3>(row + i, 0).copy_from(&linear.transpose());
            matrix.fixed_view_mut::<1, 3>(row + i, 3).copy_from(&angular.transpose());
        }
    }
}

/// Estimator outputs.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(
    feature = "serde-serialize",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct OutputState {
    /// Torso reference point. Its wrench is the net contact wrench.
    pub body: LinkState,
    /// Sole contact points.
    pub feet: Feet<LinkState>,
    /// Low-pass filtered torso velocity.
    pub filtered_velocity: Vector3<f64>,
}

impl OutputState {
    /// Packs the outputs into the published matrix.
    ///
    /// Rows `0..4` hold the body, `4..8` the left foot and `8..12` the right
    /// foot. Within a block the rows are position and orientation, linear and
    /// angular velocity, linear and angular acceleration, force and moment.
    #[must_use]
    pub fn to_matrix(&self) -> ResultMatrix {
        let mut matrix = ResultMatrix::zeros();
        self.body.write_block(&mut matrix, 0);
        self.feet.left.write_block(&mut matrix, 4);
        self.feet.right.write_block(&mut matrix, 8);
        matrix
    }
}

/// Everything the estimator knows about the robot.
#[derive(Debug, Clone, PartialEq)]
pub struct RobotState {
    /// Joint samples of the last accepted cycle, after clamping.
    pub joints: JointState,
    /// IMU sample of the last accepted cycle.
    pub imu: ImuSample,
    /// First finite IMU sample, defining the world heading.
    pub imu_init: Option<ImuSample>,
    /// Kinematics of the last cycle that produced them.
    pub kinematics: Option<KinematicsFrame>,
    /// Reference point offsets handed to the kinematics provider.
    pub offsets: FrameOffsets,
    /// Contact wrench estimates.
    pub grf: GroundReactionForces,
    /// Contact classification.
    pub contact: ContactTracker,
    /// Fused outputs.
    pub output: OutputState,
}

impl RobotState {
    /// A fresh state for `dof` joints, before any sample has been seen.
    #[must_use]
    pub fn new(dof: usize, offsets: FrameOffsets, bounds: GrfBounds) -> Self {
        Self {
            joints: JointState::zeros(dof),
            imu: ImuSample::default(),
            imu_init: None,
            kinematics: None,
            offsets,
            grf: GroundReactionForces::default(),
            contact: ContactTracker::new(bounds),
            output: OutputState::default(),
        }
    }

    /// Fused state of `foot`.
    #[must_use]
    pub fn foot(&self, foot: Foot) -> &LinkState {
        &self.output.feet[foot]
    }
}
