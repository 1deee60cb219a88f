//! Attitude kinematics as a generalized second-order system
//!
//! The generalized position is the parent-to-body quaternion stored as
//! `[w, x, y, z]`; the generalized velocity is the body-frame angular rate.

use nalgebra::{Quaternion, UnitQuaternion, Vector3};

use super::ode::{RotationalTechnique, SecondOrderOde};

/// Rotation angles below this are treated as no rotation
const MIN_STEP_ANGLE: f64 = 1e-15;

pub fn quaternion_from_slice(q: &[f64]) -> Quaternion<f64> {
    Quaternion::new(q[0], q[1], q[2], q[3])
}

pub fn quaternion_to_slice(q: &Quaternion<f64>, out: &mut [f64]) {
    out[0] = q.w;
    out[1] = q.i;
    out[2] = q.j;
    out[3] = q.k;
}

/// `q̇ = ½ q ⊗ (0, ω)`
pub fn quaternion_derivative(position: &[f64], velocity: &[f64], derivative: &mut [f64]) {
    let q = quaternion_from_slice(position);
    let omega = Quaternion::new(0.0, velocity[0], velocity[1], velocity[2]);
    quaternion_to_slice(&((q * omega) * 0.5), derivative);
}

/// `q ⊗ exp(½ dθ)`
pub fn quaternion_step(position: &[f64], dtheta: &[f64], stepped: &mut [f64]) {
    let q = quaternion_from_slice(position);
    let angle = Vector3::new(dtheta[0], dtheta[1], dtheta[2]);
    if angle.norm() < MIN_STEP_ANGLE {
        stepped.copy_from_slice(&position[..4]);
        return;
    }
    let delta = UnitQuaternion::from_scaled_axis(angle);
    quaternion_to_slice(&(q * delta.into_inner()), stepped);
}

/// Scale a stored quaternion back to unit length
///
/// A degenerate quaternion is replaced by the identity.
pub fn normalize_quaternion(q: &mut [f64]) -> UnitQuaternion<f64> {
    let raw = quaternion_from_slice(q);
    let unit = match UnitQuaternion::try_new(raw, f64::EPSILON) {
        Some(unit) => unit,
        None => UnitQuaternion::identity(),
    };
    quaternion_to_slice(unit.quaternion(), q);
    unit
}

impl SecondOrderOde {
    /// Quaternion attitude driven by body rates
    pub fn rotational(technique: RotationalTechnique) -> Self {
        match technique {
            RotationalTechnique::GeneralizedDerivative => {
                SecondOrderOde::with_derivative(4, 3, quaternion_derivative)
            }
            RotationalTechnique::GeneralizedStep => SecondOrderOde::with_step(4, 3, quaternion_step),
        }
    }
}
