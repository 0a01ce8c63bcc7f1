//! Rigid-body kinematics of the legs.
//!
//! The estimator consumes kinematics through the [`KinematicsProvider`]
//! trait: given the joint configuration and joint velocities it returns the
//! pose, Jacobian and Jacobian time-derivative of the torso and of each sole
//! contact point, all expressed in the base frame, plus the generalized
//! gravity torques needed by the ground reaction force estimate.
//!
//! [`LegChainModel`] implements the trait for a robot made of two serial legs
//! of revolute joints attached to a common base, loaded from a JSON robot
//! description:
//!
//! ```json
//! {
//!   "name": "biped",
//!   "legs": [
//!     {
//!       "foot": "left",
//!       "joints": [
//!         {
//!           "name": "l_hip_roll",
//!           "origin": { "xyz": [0.0, 0.1, -0.1], "rpy": [0.0, 0.0, 0.0] },
//!           "axis": [1.0, 0.0, 0.0],
//!           "mass": 1.5,
//!           "com": [0.0, 0.0, -0.05]
//!         }
//!       ]
//!     }
//!   ]
//! }
//! ```
//!
//! Joint indices follow the leg order left then right, and the declaration
//! order within each leg.

use std::{ops::Range, path::Path};

use nalgebra::{
    DVector, Isometry3, Matrix6xX, Point3, Rotation3, Translation3, UnitQuaternion, UnitVector3,
    Vector3, Vector6,
};
use serde::Deserialize;

use crate::{
    config::FrameOffsets,
    error::{KinematicsError, ModelError},
    foot::{Feet, Foot},
    rotation::euler_zyx_to_matrix,
};

/// Pose and first-order kinematics of one point of interest.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkKinematics {
    /// Pose of the point in the base frame.
    pub pose: Isometry3<f64>,
    /// Jacobian mapping joint velocities to the point's spatial velocity.
    ///
    /// Rows `0..3` hold the linear part, rows `3..6` the angular part.
    pub jacobian: Matrix6xX<f64>,
    /// Time-derivative of [`Self::jacobian`] at the current joint velocity.
    pub jacobian_dot: Matrix6xX<f64>,
}

impl LinkKinematics {
    /// A point fixed to the base at `pose`, for a model with `dof` joints.
    #[must_use]
    pub fn fixed(pose: Isometry3<f64>, dof: usize) -> Self {
        Self {
            pose,
            jacobian: Matrix6xX::zeros(dof),
            jacobian_dot: Matrix6xX::zeros(dof),
        }
    }

    /// Position of the point in the base frame.
    #[must_use]
    pub fn position(&self) -> Vector3<f64> {
        self.pose.translation.vector
    }

    /// Spatial velocity `[v; w]` of the point relative to the base, `J qd`.
    #[must_use]
    pub fn velocity(&self, qd: &DVector<f64>) -> Vector6<f64> {
        &self.jacobian * qd
    }

    /// Spatial acceleration `[a; alpha]` of the point relative to the base,
    /// `J qdd + Jdot qd`.
    #[must_use]
    pub fn acceleration(&self, qd: &DVector<f64>, qdd: &DVector<f64>) -> Vector6<f64> {
        &self.jacobian * qdd + &self.jacobian_dot * qd
    }
}

/// Everything the estimator needs from the rigid-body model for one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct KinematicsFrame {
    /// The torso reference point.
    pub body: LinkKinematics,
    /// The sole contact points.
    pub feet: Feet<LinkKinematics>,
    /// Joint torques that hold the legs against gravity without contact.
    pub gravity_torque: DVector<f64>,
}

/// A source of leg kinematics.
pub trait KinematicsProvider {
    /// Number of actuated joints.
    fn dof(&self) -> usize;

    /// Indices of the joints belonging to the leg ending in `foot`.
    fn leg_joints(&self, foot: Foot) -> Range<usize>;

    /// Computes the kinematics for joint positions `q` and velocities `qd`.
    ///
    /// `gravity` is the gravitational acceleration expressed in the base
    /// frame, and `offsets` locate the torso and sole reference points.
    ///
    /// # Errors
    ///
    /// Returns a [`KinematicsError`] if the joint state cannot be evaluated,
    /// in which case the caller keeps its previous estimate.
    fn compute(
        &self,
        q: &DVector<f64>,
        qd: &DVector<f64>,
        gravity: &Vector3<f64>,
        offsets: &FrameOffsets,
    ) -> Result<KinematicsFrame, KinematicsError>;
}

#[derive(Debug, Clone, Default, Deserialize)]
struct OriginDescription {
    #[serde(default)]
    xyz: [f64; 3],
    #[serde(default)]
    rpy: [f64; 3],
}

#[derive(Debug, Clone, Deserialize)]
struct JointDescription {
    name: String,
    #[serde(default)]
    origin: OriginDescription,
    axis: [f64; 3],
    #[serde(default)]
    mass: f64,
    #[serde(default)]
    com: [f64; 3],
}

#[derive(Debug, Clone, Deserialize)]
struct LegDescription {
    foot: String,
    joints: Vec<JointDescription>,
}

#[derive(Debug, Clone, Deserialize)]
struct ModelDescription {
    name: String,
    legs: Vec<LegDescription>,
}

/// A revolute joint and the link it drives.
#[derive(Debug, Clone)]
struct ChainJoint {
    /// Static transform from the parent link frame to this joint frame.
    origin: Isometry3<f64>,
    /// Rotation axis in the joint frame.
    axis: UnitVector3<f64>,
    /// Mass of the child link.
    mass: f64,
    /// Center of mass of the child link in the joint frame.
    com: Vector3<f64>,
}

/// A serial leg from the base to the ankle.
#[derive(Debug, Clone)]
struct LegChain {
    /// Index of the first joint of this leg in the full joint vector.
    start: usize,
    joints: Vec<ChainJoint>,
}

/// Joint frames of a leg evaluated at one configuration.
struct ChainFrames {
    /// Joint origins in the base frame, before the joint rotation.
    origins: Vec<Vector3<f64>>,
    /// Joint axes in the base frame.
    axes: Vec<Vector3<f64>>,
    /// Link centers of mass in the base frame.
    coms: Vec<Vector3<f64>>,
    /// Transform of the last link.
    tip: Isometry3<f64>,
}

impl LegChain {
    fn range(&self) -> Range<usize> {
        self.start..self.start + self.joints.len()
    }

    fn frames(&self, q: &DVector<f64>) -> ChainFrames {
        let n = self.joints.len();
        let mut transform = Isometry3::identity();
        let mut origins = Vec::with_capacity(n);
        let mut axes = Vec::with_capacity(n);
        let mut coms = Vec::with_capacity(n);

        for (joint, &angle) in self.joints.iter().zip(q.rows(self.start, n).iter()) {
            transform *= joint.origin;
            origins.push(transform.translation.vector);
            axes.push(transform.rotation * joint.axis.into_inner());

            transform *= UnitQuaternion::from_axis_angle(&joint.axis, angle);
            coms.push((transform * Point3::from(joint.com)).coords);
        }

        ChainFrames {
            origins,
            axes,
            coms,
            tip: transform,
        }
    }

    /// Kinematics of the sole point, and this leg's share of the gravity
    /// torques written into `gravity_torque`.
    fn evaluate(
        &self,
        q: &DVector<f64>,
        qd: &DVector<f64>,
        sole_offset: &Vector3<f64>,
        gravity: &Vector3<f64>,
        gravity_torque: &mut DVector<f64>,
    ) -> LinkKinematics {
        let dof = q.len();
        let n = self.joints.len();
        let frames = self.frames(q);
        let rates = qd.rows(self.start, n);

        let sole = (frames.tip * Point3::from(*sole_offset)).coords;
        let pose = Isometry3::from_parts(Translation3::from(sole), frames.tip.rotation);

        // velocity, relative to the base, of a point rigidly attached to the
        // link that follows joint `upto - 1`
        let point_velocity = |point: &Vector3<f64>, upto: usize| -> Vector3<f64> {
            (0..upto).fold(Vector3::zeros(), |v, k| {
                v + frames.axes[k].cross(&(point - frames.origins[k])) * rates[k]
            })
        };
        let sole_velocity = point_velocity(&sole, n);

        let mut jacobian = Matrix6xX::zeros(dof);
        let mut jacobian_dot = Matrix6xX::zeros(dof);
        let mut omega = Vector3::zeros();

        for j in 0..n {
            let col = self.start + j;
            let axis = frames.axes[j];
            let lever = sole - frames.origins[j];

            let axis_dot = omega.cross(&axis);
            let origin_velocity = point_velocity(&frames.origins[j], j);

            let linear = axis.cross(&lever);
            let linear_dot =
                axis_dot.cross(&lever) + axis.cross(&(sole_velocity - origin_velocity));

            jacobian.fixed_view_mut::<3, 1>(0, col).copy_from(&linear);
            jacobian.fixed_view_mut::<3, 1>(3, col).copy_from(&axis);
            jacobian_dot.fixed_view_mut::<3, 1>(0, col).copy_from(&linear_dot);
            jacobian_dot.fixed_view_mut::<3, 1>(3, col).copy_from(&axis_dot);

            omega += axis * rates[j];
        }

        // G_j = -sum_k m_k (a_j x (c_k - o_j)) . g over the links after joint j
        for j in 0..n {
            let axis = frames.axes[j];
            let origin = frames.origins[j];
            gravity_torque[self.start + j] = -(j..n)
                .map(|k| self.joints[k].mass * axis.cross(&(frames.coms[k] - origin)).dot(gravity))
                .sum::<f64>();
        }

        LinkKinematics {
            pose,
            jacobian,
            jacobian_dot,
        }
    }
}

/// Two serial legs of revolute joints attached to a common base.
#[derive(Debug, Clone)]
pub struct LegChainModel {
    name: String,
    legs: Feet<LegChain>,
}

impl LegChainModel {
    /// Loads a robot description from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns a [`ModelError`] if the file cannot be read or does not
    /// describe exactly one leg per foot.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&content)
    }

    /// Parses a robot description from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns a [`ModelError`] if the document is malformed or does not
    /// describe exactly one leg per foot.
    pub fn from_json_str(json: &str) -> Result<Self, ModelError> {
        let description: ModelDescription = serde_json::from_str(json)?;
        Self::from_description(description)
    }

    fn from_description(description: ModelDescription) -> Result<Self, ModelError> {
        let mut legs: Feet<Option<LegDescription>> = Feet::default();

        for leg in description.legs {
            let foot = match leg.foot.as_str() {
                "left" => Foot::Left,
                "right" => Foot::Right,
                _ => return Err(ModelError::UnknownFoot(leg.foot)),
            };
            if leg.joints.is_empty() {
                return Err(ModelError::EmptyLeg(leg.foot));
            }
            if legs[foot].is_some() {
                return Err(ModelError::DuplicateFoot(leg.foot));
            }
            legs[foot] = Some(leg);
        }

        let mut start = 0;
        let mut chains = Vec::with_capacity(2);
        for foot in Foot::ALL {
            let leg = legs[foot]
                .take()
                .ok_or_else(|| ModelError::MissingFoot(foot.name().into()))?;
            let chain = build_chain(leg, start)?;
            start += chain.joints.len();
            chains.push(chain);
        }

        let right = chains.pop().ok_or_else(|| ModelError::MissingFoot("right".into()))?;
        let left = chains.pop().ok_or_else(|| ModelError::MissingFoot("left".into()))?;

        log::info!(
            "loaded model {} with {} + {} leg joints",
            description.name,
            left.joints.len(),
            right.joints.len()
        );

        Ok(Self {
            name: description.name,
            legs: Feet::new(left, right),
        })
    }

    /// Name of the robot.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

fn build_chain(leg: LegDescription, start: usize) -> Result<LegChain, ModelError> {
    let mut joints = Vec::with_capacity(leg.joints.len());

    for joint in leg.joints {
        let axis = Vector3::from(joint.axis);
        if !axis.iter().all(|v| v.is_finite()) || axis.norm() < 1e-9 {
            return Err(ModelError::InvalidAxis(joint.name));
        }

        let rotation = Rotation3::from_matrix_unchecked(euler_zyx_to_matrix(&Vector3::from(
            joint.origin.rpy,
        )));
        joints.push(ChainJoint {
            origin: Isometry3::from_parts(
                Translation3::from(Vector3::from(joint.origin.xyz)),
                UnitQuaternion::from_rotation_matrix(&rotation),
            ),
            axis: UnitVector3::new_normalize(axis),
            mass: joint.mass,
            com: Vector3::from(joint.com),
        });
    }

    Ok(LegChain { start, joints })
}

impl KinematicsProvider for LegChainModel {
    fn dof(&self) -> usize {
        self.legs.left.joints.len() + self.legs.right.joints.len()
    }

    fn leg_joints(&self, foot: Foot) -> Range<usize> {
        self.legs[foot].range()
    }

    fn compute(
        &self,
        q: &DVector<f64>,
        qd: &DVector<f64>,
        gravity: &Vector3<f64>,
        offsets: &FrameOffsets,
    ) -> Result<KinematicsFrame, KinematicsError> {
        let dof = self.dof();
        for len in [q.len(), qd.len()] {
            if len != dof {
                return Err(KinematicsError::DimensionMismatch { expected: dof, got: len });
            }
        }
        if !q.iter().chain(qd.iter()).chain(gravity.iter()).all(|v| v.is_finite()) {
            return Err(KinematicsError::NonFinite);
        }

        let mut gravity_torque = DVector::zeros(dof);
        let feet = Feet::from_fn(|foot| {
            self.legs[foot].evaluate(q, qd, &offsets.feet[foot], gravity, &mut gravity_torque)
        });
        let body = LinkKinematics::fixed(
            Isometry3::from_parts(Translation3::from(offsets.body), UnitQuaternion::identity()),
            dof,
        );

        Ok(KinematicsFrame {
            body,
            feet,
            gravity_torque,
        })
    }
}
