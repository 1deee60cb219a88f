//! Translational and rotational state of a reference frame
//!
//! All states are relative to the frame's parent:
//!
//! - position and velocity of the frame origin, expressed in parent axes
//!   (velocity is the time derivative taken in the parent frame)
//! - attitude as a transformation from parent axes to this frame's axes,
//!   carried both as a left quaternion and as a 3x3 transformation matrix
//! - angular velocity of this frame with respect to the parent, expressed in
//!   this frame's axes
//!
//! The quaternion `q_parent_this` is the rotation taking parent axes onto this
//! frame's axes, so the transformation matrix is its transpose:
//! `t_parent_this * v_parent = v_this`.

use nalgebra::{Matrix3, Rotation3, UnitQuaternion, Vector3};

/// Translational state relative to the parent frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefFrameTrans {
    /// Origin position in parent axes (m)
    pub position: Vector3<f64>,
    /// Origin velocity in parent axes (m/s)
    pub velocity: Vector3<f64>,
}

impl Default for RefFrameTrans {
    fn default() -> Self {
        Self {
            position: Vector3::zeros(),
            velocity: Vector3::zeros(),
        }
    }
}

/// Rotational state relative to the parent frame
///
/// The quaternion and matrix are private so that every attitude write goes
/// through a setter that keeps them representing the same rotation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefFrameRot {
    q_parent_this: UnitQuaternion<f64>,
    t_parent_this: Matrix3<f64>,
    ang_vel_this: Vector3<f64>,
    ang_vel_mag: f64,
    ang_vel_unit: Vector3<f64>,
}

impl Default for RefFrameRot {
    fn default() -> Self {
        Self::identity()
    }
}

impl RefFrameRot {
    /// Aligned with the parent, not rotating
    pub fn identity() -> Self {
        Self {
            q_parent_this: UnitQuaternion::identity(),
            t_parent_this: Matrix3::identity(),
            ang_vel_this: Vector3::zeros(),
            ang_vel_mag: 0.0,
            ang_vel_unit: Vector3::zeros(),
        }
    }

    pub fn from_quaternion(q_parent_this: UnitQuaternion<f64>) -> Self {
        let mut rot = Self::identity();
        rot.set_quaternion(q_parent_this);
        rot
    }

    pub fn from_transform(t_parent_this: Matrix3<f64>) -> Self {
        let mut rot = Self::identity();
        rot.set_transform(t_parent_this);
        rot
    }

    /// Set the attitude from a left quaternion, recomputing the matrix
    pub fn set_quaternion(&mut self, q_parent_this: UnitQuaternion<f64>) {
        self.q_parent_this = q_parent_this;
        self.t_parent_this = q_parent_this.to_rotation_matrix().matrix().transpose();
    }

    /// Set the attitude from a transformation matrix, recomputing the quaternion
    pub fn set_transform(&mut self, t_parent_this: Matrix3<f64>) {
        let rotation = Rotation3::from_matrix_unchecked(t_parent_this.transpose());
        self.q_parent_this = UnitQuaternion::from_rotation_matrix(&rotation);
        self.t_parent_this = t_parent_this;
    }

    /// Set the angular velocity, recomputing magnitude and unit vector
    pub fn set_ang_vel(&mut self, ang_vel_this: Vector3<f64>) {
        self.ang_vel_this = ang_vel_this;
        self.compute_ang_vel_products();
    }

    /// Recompute the angular velocity magnitude and unit vector
    ///
    /// A zero rate gets a zero unit vector.
    pub fn compute_ang_vel_products(&mut self) {
        self.ang_vel_mag = self.ang_vel_this.norm();
        self.ang_vel_unit = if self.ang_vel_mag > 0.0 {
            self.ang_vel_this / self.ang_vel_mag
        } else {
            Vector3::zeros()
        };
    }

    pub fn q_parent_this(&self) -> &UnitQuaternion<f64> {
        &self.q_parent_this
    }

    pub fn t_parent_this(&self) -> &Matrix3<f64> {
        &self.t_parent_this
    }

    pub fn ang_vel_this(&self) -> &Vector3<f64> {
        &self.ang_vel_this
    }

    pub fn ang_vel_mag(&self) -> f64 {
        self.ang_vel_mag
    }

    pub fn ang_vel_unit(&self) -> &Vector3<f64> {
        &self.ang_vel_unit
    }
}

/// Full state of a frame relative to its parent
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RefFrameState {
    pub trans: RefFrameTrans,
    pub rot: RefFrameRot,
}

impl RefFrameState {
    /// Compose this state (B relative to A) with `child` (C relative to B),
    /// yielding C relative to A
    ///
    /// `child` may itself be moving and rotating relative to B.
    pub fn compose(&self, child: &RefFrameState) -> RefFrameState {
        let t_ab = self.rot.t_parent_this();
        let t_bc = child.rot.t_parent_this();
        let w_ab = self.rot.ang_vel_this();
        let r_bc = &child.trans.position;

        let mut rot = RefFrameRot::from_quaternion(self.rot.q_parent_this() * child.rot.q_parent_this());
        rot.set_ang_vel(t_bc * w_ab + child.rot.ang_vel_this());

        let t_ab_inv = t_ab.transpose();
        RefFrameState {
            trans: RefFrameTrans {
                position: self.trans.position + t_ab_inv * r_bc,
                velocity: self.trans.velocity
                    + t_ab_inv * (child.trans.velocity + w_ab.cross(r_bc)),
            },
            rot,
        }
    }

    /// Given this state (S relative to A) and `target` (T relative to A),
    /// compute S relative to T
    pub fn relative_to(&self, target: &RefFrameState) -> RefFrameState {
        let t_at = target.rot.t_parent_this();
        let w_at = target.rot.ang_vel_this();

        let position = t_at * (self.trans.position - target.trans.position);
        let velocity = t_at * (self.trans.velocity - target.trans.velocity) - w_at.cross(&position);

        let mut rot = RefFrameRot::from_quaternion(
            target.rot.q_parent_this().inverse() * self.rot.q_parent_this(),
        );
        let t_ts = *rot.t_parent_this();
        rot.set_ang_vel(self.rot.ang_vel_this() - t_ts * w_at);

        RefFrameState {
            trans: RefFrameTrans { position, velocity },
            rot,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample_state(angle: f64, axis: Vector3<f64>) -> RefFrameState {
        let mut rot = RefFrameRot::from_quaternion(UnitQuaternion::from_axis_angle(
            &nalgebra::Unit::new_normalize(axis),
            angle,
        ));
        rot.set_ang_vel(Vector3::new(0.01, -0.02, 0.03));
        RefFrameState {
            trans: RefFrameTrans {
                position: Vector3::new(7.0e6, -1.0e5, 3.0e4),
                velocity: Vector3::new(10.0, 7.5e3, -2.0),
            },
            rot,
        }
    }

    #[test]
    fn test_quaternion_matrix_consistency() {
        let q = UnitQuaternion::from_euler_angles(0.3, -0.2, 1.1);
        let rot = RefFrameRot::from_quaternion(q);
        let rebuilt = RefFrameRot::from_transform(*rot.t_parent_this());

        assert!(rot.q_parent_this().angle_to(rebuilt.q_parent_this()) < 1e-12);

        // The matrix maps parent components into this frame
        let v_parent = Vector3::new(1.0, 0.0, 0.0);
        let v_this = rot.t_parent_this() * v_parent;
        assert_relative_eq!(q.inverse_transform_vector(&v_parent), v_this, epsilon = 1e-14);
    }

    #[test]
    fn test_zero_rate_has_zero_unit_vector() {
        let mut rot = RefFrameRot::identity();
        rot.set_ang_vel(Vector3::zeros());
        assert_eq!(rot.ang_vel_mag(), 0.0);
        assert_eq!(*rot.ang_vel_unit(), Vector3::zeros());

        rot.set_ang_vel(Vector3::new(0.0, 3.0, 4.0));
        assert_relative_eq!(rot.ang_vel_mag(), 5.0);
        assert_relative_eq!(*rot.ang_vel_unit(), Vector3::new(0.0, 0.6, 0.8));
    }

    #[test]
    fn test_compose_then_relative_recovers_child() {
        let parent = sample_state(0.7, Vector3::new(1.0, 2.0, 0.5));
        let mut child = sample_state(-0.4, Vector3::new(0.0, 1.0, 1.0));
        child.trans.position = Vector3::new(1.0, 2.0, -3.0);
        child.trans.velocity = Vector3::new(0.1, 0.0, 0.2);

        let composed = parent.compose(&child);
        let recovered = composed.relative_to(&parent);

        assert_relative_eq!(recovered.trans.position, child.trans.position, epsilon = 1e-6);
        assert_relative_eq!(recovered.trans.velocity, child.trans.velocity, epsilon = 1e-9);
        assert_relative_eq!(
            *recovered.rot.ang_vel_this(),
            *child.rot.ang_vel_this(),
            epsilon = 1e-12
        );
        assert!(recovered.rot.q_parent_this().angle_to(child.rot.q_parent_this()) < 1e-12);
    }
}
