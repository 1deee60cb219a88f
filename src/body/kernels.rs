//! Rigid-offset state transforms
//!
//! Frames A (common parent), B (source) and C (derived) where B and C ride on
//! the same rigid assembly. The offset between them is a [`RefPointTransform`]
//! taken from the mass tree.
//!
//! Forward: the offset places C in B.
//!
//! ```text
//! q_AC = q_AB q_BC                    (T_AC = T_BC T_AB)
//! w_AC:C = T_BC w_AB:B
//! r_AC = r_AB + T_AB^T r_BC
//! v_AC = v_AB + T_AB^T (w_AB:B x r_BC)
//! ```
//!
//! Reverse: the offset places B (the source) in C.
//!
//! ```text
//! q_AC = q_AB q_CB^-1                 (T_AC = T_CB^T T_AB)
//! w_AC:C = T_CB^T w_AB:B
//! r_AC = r_AB - T_AC^T r_CB
//! v_AC = v_AB - T_AC^T (w_AC:C x r_CB)
//! ```
//!
//! The full-state and selective routines go through the same element
//! functions, so a component computed either way is bit-identical.

use nalgebra::{Matrix3, UnitQuaternion, Vector3};

use crate::frame::{FrameItems, RefFrameState, StateItem};
use crate::mass::RefPointTransform;

fn attitude_forward(source: &RefFrameState, offset: &RefPointTransform) -> UnitQuaternion<f64> {
    source.rot.q_parent_this() * offset.q_parent_this
}

fn rate_forward(source: &RefFrameState, offset: &RefPointTransform) -> Vector3<f64> {
    offset.t_parent_this * source.rot.ang_vel_this()
}

fn position_forward(source: &RefFrameState, offset: &RefPointTransform) -> Vector3<f64> {
    source.trans.position + source.rot.t_parent_this().transpose() * offset.position
}

fn velocity_forward(source: &RefFrameState, offset: &RefPointTransform) -> Vector3<f64> {
    let w_ab = source.rot.ang_vel_this();
    source.trans.velocity + source.rot.t_parent_this().transpose() * w_ab.cross(&offset.position)
}

fn attitude_reverse(source: &RefFrameState, offset: &RefPointTransform) -> UnitQuaternion<f64> {
    source.rot.q_parent_this() * offset.q_parent_this.inverse()
}

fn transform_reverse(source: &RefFrameState, offset: &RefPointTransform) -> Matrix3<f64> {
    offset.t_parent_this.transpose() * source.rot.t_parent_this()
}

fn rate_reverse(source: &RefFrameState, offset: &RefPointTransform) -> Vector3<f64> {
    offset.t_parent_this.transpose() * source.rot.ang_vel_this()
}

fn position_reverse(source: &RefFrameState, offset: &RefPointTransform) -> Vector3<f64> {
    source.trans.position - transform_reverse(source, offset).transpose() * offset.position
}

fn velocity_reverse(source: &RefFrameState, offset: &RefPointTransform) -> Vector3<f64> {
    let w_ac = rate_reverse(source, offset);
    source.trans.velocity - transform_reverse(source, offset).transpose() * w_ac.cross(&offset.position)
}

/// Compute the selected components of C from B, forward offset
pub fn compute_state_elements_forward(
    items: FrameItems,
    source: &RefFrameState,
    offset: &RefPointTransform,
    derived: &mut RefFrameState,
) {
    for item in items.iter() {
        match item {
            StateItem::Attitude => derived.rot.set_quaternion(attitude_forward(source, offset)),
            StateItem::Rate => derived.rot.set_ang_vel(rate_forward(source, offset)),
            StateItem::Position => derived.trans.position = position_forward(source, offset),
            StateItem::Velocity => derived.trans.velocity = velocity_forward(source, offset),
        }
    }
}

/// Compute the selected components of C from B, reverse offset
pub fn compute_state_elements_reverse(
    items: FrameItems,
    source: &RefFrameState,
    offset: &RefPointTransform,
    derived: &mut RefFrameState,
) {
    for item in items.iter() {
        match item {
            StateItem::Attitude => derived.rot.set_quaternion(attitude_reverse(source, offset)),
            StateItem::Rate => derived.rot.set_ang_vel(rate_reverse(source, offset)),
            StateItem::Position => derived.trans.position = position_reverse(source, offset),
            StateItem::Velocity => derived.trans.velocity = velocity_reverse(source, offset),
        }
    }
}

/// Full state of C from B, forward offset
pub fn compute_derived_state_forward(source: &RefFrameState, offset: &RefPointTransform, derived: &mut RefFrameState) {
    compute_state_elements_forward(FrameItems::FULL, source, offset, derived);
}

/// Full state of C from B, reverse offset
pub fn compute_derived_state_reverse(source: &RefFrameState, offset: &RefPointTransform, derived: &mut RefFrameState) {
    compute_state_elements_reverse(FrameItems::FULL, source, offset, derived);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{RefFrameRot, RefFrameTrans};
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn state(q: UnitQuaternion<f64>, w: Vector3<f64>, r: Vector3<f64>, v: Vector3<f64>) -> RefFrameState {
        let mut rot = RefFrameRot::from_quaternion(q);
        rot.set_ang_vel(w);
        RefFrameState {
            trans: RefFrameTrans {
                position: r,
                velocity: v,
            },
            rot,
        }
    }

    fn offset(q: UnitQuaternion<f64>, r: Vector3<f64>) -> RefPointTransform {
        let t = RefFrameRot::from_quaternion(q);
        RefPointTransform::new(r, *t.t_parent_this())
    }

    #[test]
    fn test_forward_matches_frame_composition() {
        let source = state(
            UnitQuaternion::from_euler_angles(0.1, 0.2, 0.3),
            Vector3::new(0.01, 0.02, -0.03),
            Vector3::new(7.0e6, 0.0, 0.0),
            Vector3::new(0.0, 7.5e3, 0.0),
        );
        let xform = offset(UnitQuaternion::from_euler_angles(0.0, 0.0, 1.0), Vector3::new(1.0, 2.0, 3.0));

        let mut derived = RefFrameState::default();
        compute_derived_state_forward(&source, &xform, &mut derived);

        // A rigidly fixed child frame composed through the frame tree
        let rigid_child = state(xform.q_parent_this, Vector3::zeros(), xform.position, Vector3::zeros());
        let composed = source.compose(&rigid_child);

        assert_relative_eq!(derived.trans.position, composed.trans.position, epsilon = 1e-6);
        assert_relative_eq!(derived.trans.velocity, composed.trans.velocity, epsilon = 1e-9);
        assert_relative_eq!(*derived.rot.ang_vel_this(), *composed.rot.ang_vel_this(), epsilon = 1e-15);
        assert!(derived.rot.q_parent_this().angle_to(composed.rot.q_parent_this()) < 1e-14);
    }

    #[test]
    fn test_selective_matches_full_bitwise() {
        let source = state(
            UnitQuaternion::from_euler_angles(-0.4, 0.9, 2.0),
            Vector3::new(0.3, 0.0, 0.1),
            Vector3::new(1.0, 2.0, 3.0),
            Vector3::new(-4.0, 5.0, 6.0),
        );
        let xform = offset(UnitQuaternion::from_euler_angles(0.5, 0.1, 0.0), Vector3::new(0.2, -0.3, 1.5));

        let mut full = RefFrameState::default();
        compute_derived_state_reverse(&source, &xform, &mut full);

        let mut attitude_only = RefFrameState::default();
        compute_state_elements_reverse(FrameItems::ATTITUDE, &source, &xform, &mut attitude_only);
        let mut position_only = RefFrameState::default();
        compute_state_elements_reverse(FrameItems::POSITION, &source, &xform, &mut position_only);

        assert_eq!(full.rot.q_parent_this(), attitude_only.rot.q_parent_this());
        assert_eq!(full.rot.t_parent_this(), attitude_only.rot.t_parent_this());
        assert_eq!(full.trans.position, position_only.trans.position);
        assert_eq!(position_only.trans.velocity, Vector3::zeros());
    }

    #[test]
    fn test_zero_rate_adds_no_offset_velocity() {
        let source = state(
            UnitQuaternion::from_euler_angles(0.3, 0.0, 0.0),
            Vector3::zeros(),
            Vector3::zeros(),
            Vector3::new(1.0, 0.0, 0.0),
        );
        let xform = offset(UnitQuaternion::identity(), Vector3::new(10.0, 0.0, 0.0));
        let mut derived = RefFrameState::default();
        compute_derived_state_forward(&source, &xform, &mut derived);

        assert_eq!(derived.trans.velocity, Vector3::new(1.0, 0.0, 0.0));
        assert_eq!(derived.rot.ang_vel_mag(), 0.0);
        assert_eq!(*derived.rot.ang_vel_unit(), Vector3::zeros());
    }

    fn vec3(range: f64) -> impl Strategy<Value = Vector3<f64>> {
        (-range..range, -range..range, -range..range).prop_map(|(x, y, z)| Vector3::new(x, y, z))
    }

    fn attitude() -> impl Strategy<Value = UnitQuaternion<f64>> {
        (-3.1..3.1f64, -1.5..1.5f64, -3.1..3.1f64).prop_map(|(r, p, y)| UnitQuaternion::from_euler_angles(r, p, y))
    }

    proptest! {
        #[test]
        fn prop_forward_then_reverse_round_trips(
            q in attitude(),
            w in vec3(1.0),
            r in vec3(1.0e7),
            v in vec3(1.0e4),
            q_off in attitude(),
            r_off in vec3(50.0),
        ) {
            let source = state(q, w, r, v);
            let xform = offset(q_off, r_off);

            let mut derived = RefFrameState::default();
            compute_derived_state_forward(&source, &xform, &mut derived);
            let mut recovered = RefFrameState::default();
            compute_derived_state_reverse(&derived, &xform, &mut recovered);

            prop_assert!((recovered.trans.position - r).norm() <= 1e-8 * (1.0 + r.norm()));
            prop_assert!((recovered.trans.velocity - v).norm() <= 1e-9 * (1.0 + v.norm()));
            prop_assert!((recovered.rot.ang_vel_this() - w).norm() <= 1e-12);
            prop_assert!(recovered.rot.q_parent_this().angle_to(&q) <= 1e-9);
        }
    }
}
