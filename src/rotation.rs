//! Stateless rotation helpers.
//!
//! Euler angles are stored as `[roll, pitch, yaw]` and follow the Z-Y-X
//! (yaw, pitch, roll) convention used by the IMU, i.e.
//! $$R = R_z(\psi) R_y(\theta) R_x(\phi)$$

use std::f64::consts::PI;

use nalgebra::{Matrix3, Vector3};

/// Rotation about the x axis by `angle` radians.
#[must_use]
pub fn rot_x(angle: f64) -> Matrix3<f64> {
    let (s, c) = angle.sin_cos();
    Matrix3::new(1.0, 0.0, 0.0, 0.0, c, -s, 0.0, s, c)
}

/// Rotation about the y axis by `angle` radians.
#[must_use]
pub fn rot_y(angle: f64) -> Matrix3<f64> {
    let (s, c) = angle.sin_cos();
    Matrix3::new(c, 0.0, s, 0.0, 1.0, 0.0, -s, 0.0, c)
}

/// Rotation about the z axis by `angle` radians.
#[must_use]
pub fn rot_z(angle: f64) -> Matrix3<f64> {
    let (s, c) = angle.sin_cos();
    Matrix3::new(c, -s, 0.0, s, c, 0.0, 0.0, 0.0, 1.0)
}

/// Builds the rotation matrix for `[roll, pitch, yaw]` Z-Y-X Euler angles.
#[must_use]
pub fn euler_zyx_to_matrix(euler: &Vector3<f64>) -> Matrix3<f64> {
    rot_z(euler.z) * rot_y(euler.y) * rot_x(euler.x)
}

/// Extracts `[roll, pitch, yaw]` Z-Y-X Euler angles from a rotation matrix.
///
/// At the gimbal lock (`pitch = ±π/2`) roll is reported as zero and the whole
/// rotation about the vertical axis is attributed to yaw.
#[must_use]
pub fn matrix_to_euler_zyx(r: &Matrix3<f64>) -> Vector3<f64> {
    let sin_pitch = (-r[(2, 0)]).clamp(-1.0, 1.0);
    let pitch = sin_pitch.asin();

    if sin_pitch.abs() > 1.0 - 1e-12 {
        let yaw = (-r[(0, 1)]).atan2(r[(1, 1)]);
        return Vector3::new(0.0, pitch, yaw);
    }

    let roll = r[(2, 1)].atan2(r[(2, 2)]);
    let yaw = r[(1, 0)].atan2(r[(0, 0)]);
    Vector3::new(roll, pitch, yaw)
}

/// Wraps an angle into `(-π, π]`.
#[must_use]
pub fn wrap_angle(angle: f64) -> f64 {
    let wrapped = (angle + PI).rem_euclid(2.0 * PI) - PI;
    if wrapped <= -PI {
        wrapped + 2.0 * PI
    } else {
        wrapped
    }
}
