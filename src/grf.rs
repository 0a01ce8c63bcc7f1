//! Ground reaction force estimation from joint torques.
//!
//! With the robot moving slowly relative to its control rate, the joint
//! torques of a leg balance gravity and the contact wrench at its sole:
//!
//! $$\tau = G(q) - J_c^T F$$
//!
//! so the wrench follows from $J_c^T F = G(q) - \tau$, solved leg by leg with
//! the leg's own columns of the sole Jacobian. A leg with fewer than six
//! joints cannot resist every wrench, and gets the smallest wrench that
//! explains its torques.

use std::ops::Range;

use nalgebra::{DMatrix, DVector, Matrix3, Vector3, Vector6};

use crate::{
    error::GrfError,
    foot::{Feet, Foot},
    kinematics::KinematicsFrame,
};

/// Current and previous contact wrench of each foot, in the world frame, as
/// `[fx, fy, fz, mx, my, mz]`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(
    feature = "serde-serialize",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct GroundReactionForces {
    /// Wrenches from the most recent successful estimate.
    pub current: Feet<Vector6<f64>>,
    /// Wrenches from the estimate before that.
    pub previous: Feet<Vector6<f64>>,
}

impl GroundReactionForces {
    /// Vertical force on each foot.
    #[must_use]
    pub fn vertical(&self) -> Feet<f64> {
        self.current.map(|wrench| wrench.z)
    }

    /// Sum of both foot wrenches.
    #[must_use]
    pub fn net(&self) -> Vector6<f64> {
        self.current.left + self.current.right
    }

    fn push(&mut self, wrenches: Feet<Vector6<f64>>) {
        self.previous = self.current;
        self.current = wrenches;
    }
}

/// Quasi-static contact wrench estimator.
#[derive(Debug, Clone, PartialEq)]
pub struct GrfEstimator {
    legs: Feet<Range<usize>>,
    min_jacobian_conditioning: f64,
}

impl GrfEstimator {
    /// Creates an estimator for legs owning the joint index ranges `legs`.
    ///
    /// A leg Jacobian whose smallest to largest singular value ratio is below
    /// `min_jacobian_conditioning` is treated as singular.
    #[must_use]
    pub fn new(legs: Feet<Range<usize>>, min_jacobian_conditioning: f64) -> Self {
        Self {
            legs,
            min_jacobian_conditioning,
        }
    }

    /// Estimates both contact wrenches and pushes them into `forces`.
    ///
    /// `orientation` rotates base frame vectors into the world frame.
    ///
    /// # Errors
    ///
    /// Returns a [`GrfError`] when the torques are not finite or a leg is too
    /// close to a singular configuration. `forces` is left untouched in that
    /// case so the previous estimate stays in effect.
    pub fn estimate(
        &self,
        torque: &DVector<f64>,
        frame: &KinematicsFrame,
        orientation: &Matrix3<f64>,
        forces: &mut GroundReactionForces,
    ) -> Result<(), GrfError> {
        if !torque.iter().all(|t| t.is_finite()) {
            return Err(GrfError::NonFinite);
        }

        let mut wrenches = Feet::<Vector6<f64>>::default();
        for foot in Foot::ALL {
            let local = self.solve_leg(foot, torque, frame)?;
            let force = orientation * Vector3::new(local[0], local[1], local[2]);
            let moment = orientation * Vector3::new(local[3], local[4], local[5]);
            wrenches[foot] = Vector6::new(force.x, force.y, force.z, moment.x, moment.y, moment.z);
        }

        forces.push(wrenches);
        Ok(())
    }

    /// Contact wrench at the sole of `foot`, in the base frame.
    ///
    /// Legs with other than six joints go through the SVD pseudo-inverse.
    fn solve_leg(
        &self,
        foot: Foot,
        torque: &DVector<f64>,
        frame: &KinematicsFrame,
    ) -> Result<Vector6<f64>, GrfError> {
        let joints = self.legs[foot].clone();
        let n = joints.len();

        // J_leg^T, one row per leg joint
        let jacobian = &frame.feet[foot].jacobian;
        let jacobian_t = DMatrix::from_fn(n, 6, |row, col| jacobian[(col, joints.start + row)]);
        let rhs = frame.gravity_torque.rows(joints.start, n).into_owned()
            - torque.rows(joints.start, n);

        let singular_values = jacobian_t.singular_values();
        let largest = singular_values.max();
        let conditioning = if largest > 0.0 {
            singular_values.min() / largest
        } else {
            0.0
        };
        if conditioning.is_nan() || conditioning < self.min_jacobian_conditioning {
            return Err(GrfError::IllConditioned { foot, conditioning });
        }

        let solution = if n == 6 {
            jacobian_t.lu().solve(&rhs)
        } else {
            jacobian_t.svd(true, true).solve(&rhs, f64::EPSILON).ok()
        }
        .ok_or(GrfError::IllConditioned { foot, conditioning })?;

        Ok(Vector6::from_iterator(solution.iter().copied()))
    }
}
