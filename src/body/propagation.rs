//! Integrated-state resolution and propagation through body trees

use crate::diagnostics::codes;
use crate::error::Result;
use crate::frame::{FrameId, FrameItems, StateItem};
use crate::mass::{PointKind, PointRef, RefPointTransform};

use super::kernels::{
    compute_derived_state_forward, compute_derived_state_reverse, compute_state_elements_forward,
    compute_state_elements_reverse,
};
use super::{BodyId, DynManager, IntegratedFrame, RefPointMemo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    /// Offset places the derived frame in the source
    Forward,
    /// Offset places the source in the derived frame
    Reverse,
}

impl DynManager {
    fn point(&self, body: BodyId, kind: PointKind) -> PointRef {
        PointRef::new(self.bodies[body.0].mass_body, kind)
    }

    /// Point transform between two mass points, reusing the root's last one
    fn ref_point_transform(&mut self, root: BodyId, from: PointRef, to: PointRef) -> Result<RefPointTransform> {
        if let Some(memo) = self.bodies[root.0].last_ref_point {
            if memo.from == from && memo.to == to {
                return Ok(memo.transform);
            }
        }
        let transform = self.mass.compute_point_transform(from, to)?;
        self.bodies[root.0].last_ref_point = Some(RefPointMemo { from, to, transform });
        Ok(transform)
    }

    /// Pull every state item of a root body from its source frame into the
    /// integrated frame
    ///
    /// Items are resolved attitude first, since carrying a position or a
    /// velocity across the offset needs the integrated attitude (and for
    /// velocity, the rate). An item whose prerequisites are missing keeps its
    /// source and stays uninitialized.
    pub fn update_integrated_state(&mut self, root: BodyId) -> Result<()> {
        let integ = self.bodies[root.0].integrated_frame();
        let Some(integ_point) = self.frames[integ].mass_point else {
            let msg = format!("Integrated frame '{}' rides on no mass point", self.frames.name(integ));
            return Err(self.sink.fail(codes::INVALID_FRAME_OWNER, &msg));
        };

        for &item in StateItem::resolution_order() {
            let Some(source) = self.bodies[root.0].source(item) else {
                continue;
            };
            if source == integ {
                self.bodies[root.0].initialized_states.add(item);
                self.frames[integ].initialized_items.add(item);
                continue;
            }

            let Some(source_point) = self.frames[source].mass_point else {
                let msg = format!(
                    "State source '{}' of '{}' rides on no mass point",
                    self.frames.name(source),
                    self.bodies[root.0].name
                );
                return Err(self.sink.fail(codes::INVALID_FRAME_OWNER, &msg));
            };

            let known = self.bodies[root.0].initialized_states;
            let needed = match item {
                StateItem::Attitude | StateItem::Rate => FrameItems::EMPTY,
                StateItem::Position => FrameItems::ATTITUDE,
                StateItem::Velocity => FrameItems::ATTITUDE | FrameItems::RATE,
            };
            if !known.contains(needed) {
                log::warn!(
                    "{} of {} cannot be resolved from {} without integrated {:?}",
                    item.name(),
                    self.bodies[root.0].name,
                    self.frames.name(source),
                    needed
                );
                continue;
            }

            let offset = self.ref_point_transform(root, source_point, integ_point)?;
            let mut source_state = self.frames[source].state;
            // Rotational components the source does not own come from the
            // integrated frame itself
            let integ_state = self.frames[integ].state;
            compute_state_elements_reverse(needed, &integ_state, &offset, &mut source_state);

            let mut state = integ_state;
            compute_state_elements_forward(item.into(), &source_state, &offset, &mut state);

            let source_timestamp = self.frames[source].timestamp;
            let frame = &mut self.frames[integ];
            frame.state = state;
            frame.initialized_items.add(item);
            frame.timestamp = frame.timestamp.max(source_timestamp);

            let body = &mut self.bodies[root.0];
            body.initialized_states.add(item);
            body.set_source(item, Some(integ));
        }
        Ok(())
    }

    /// Write `derived` from `source` through a rigid offset
    ///
    /// Only components that can be derived from what the source holds are
    /// written; the rest are left as they were and flagged uninitialized.
    fn derive_frame(&mut self, source: FrameId, derived: FrameId, offset: &RefPointTransform, direction: Direction) {
        let source_state = self.frames[source].state;
        let source_items = self.frames[source].initialized_items;
        let timestamp = self.frames[source].timestamp;

        let mut state = self.frames[derived].state;
        let items = if source_items.is_full() {
            match direction {
                Direction::Forward => compute_derived_state_forward(&source_state, offset, &mut state),
                Direction::Reverse => compute_derived_state_reverse(&source_state, offset, &mut state),
            }
            FrameItems::FULL
        } else {
            let items = source_items.propagable();
            match direction {
                Direction::Forward => compute_state_elements_forward(items, &source_state, offset, &mut state),
                Direction::Reverse => compute_state_elements_reverse(items, &source_state, offset, &mut state),
            }
            items
        };

        let frame = &mut self.frames[derived];
        frame.state = state;
        frame.initialized_items = items;
        frame.timestamp = timestamp;
    }

    fn derive_from_point(&mut self, source: FrameId, from: PointRef, derived: FrameId, direction: Direction) -> Result<()> {
        let Some(to) = self.frames[derived].mass_point else {
            return Ok(());
        };
        let offset = match direction {
            Direction::Forward => self.mass.compute_point_transform(from, to)?,
            Direction::Reverse => self.mass.compute_point_transform(to, from)?,
        };
        self.derive_frame(source, derived, &offset, direction);
        Ok(())
    }

    fn propagate_vehicle_points(&mut self, body: BodyId) -> Result<()> {
        let structure = self.bodies[body.0].structure;
        let from = self.point(body, PointKind::StructureOrigin);
        for point in self.bodies[body.0].vehicle_points.clone() {
            self.derive_from_point(structure, from, point, Direction::Forward)?;
        }
        Ok(())
    }

    /// Bring every frame of the tree containing `body` up to date with the
    /// root's integrated state
    pub fn propagate_state(&mut self, body: BodyId) -> Result<()> {
        let root = self.root_of(body);
        self.update_integrated_state(root)?;
        match self.bodies[root.0].integrated {
            IntegratedFrame::Structure => self.propagate_state_from_structure(root),
            IntegratedFrame::Composite => self.propagate_state_from_composite(root),
        }
    }

    /// Derive the body's frames and its subtree from its structure frame
    pub fn propagate_state_from_structure(&mut self, body: BodyId) -> Result<()> {
        let structure = self.bodies[body.0].structure;
        let core = self.bodies[body.0].core_body;
        let composite = self.bodies[body.0].composite_body;
        let from = self.point(body, PointKind::StructureOrigin);

        self.derive_from_point(structure, from, composite, Direction::Forward)?;
        self.derive_from_point(structure, from, core, Direction::Forward)?;
        self.propagate_vehicle_points(body)?;

        for child in self.bodies[body.0].dyn_children.clone() {
            let child_structure = self.bodies[child.0].structure;
            self.derive_from_point(structure, from, child_structure, Direction::Forward)?;
            self.propagate_state_from_structure(child)?;
        }
        Ok(())
    }

    /// Derive the body's frames and its subtree from its composite body frame
    pub fn propagate_state_from_composite(&mut self, body: BodyId) -> Result<()> {
        let structure = self.bodies[body.0].structure;
        let core = self.bodies[body.0].core_body;
        let composite = self.bodies[body.0].composite_body;
        let from = self.point(body, PointKind::Composite);

        self.derive_from_point(composite, from, structure, Direction::Reverse)?;
        self.derive_from_point(composite, from, core, Direction::Forward)?;
        self.propagate_vehicle_points(body)?;

        for child in self.bodies[body.0].dyn_children.clone() {
            let child_composite = self.bodies[child.0].composite_body;
            self.derive_from_point(composite, from, child_composite, Direction::Forward)?;
            self.propagate_state_from_composite(child)?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::diagnostics::RecordingSink;
    use crate::frame::{RefFrameRot, RefFrameState, RefFrameTrans};
    use crate::mass::{MassPoint, MassProperties};
    use approx::assert_relative_eq;
    use nalgebra::{Matrix3, UnitQuaternion, Vector3};

    pub(crate) fn moving_state() -> RefFrameState {
        let mut rot = RefFrameRot::from_quaternion(UnitQuaternion::from_euler_angles(0.2, -0.1, 0.7));
        rot.set_ang_vel(Vector3::new(0.01, 0.03, -0.02));
        RefFrameState {
            trans: RefFrameTrans {
                position: Vector3::new(6.8e6, 1.0e5, -2.0e4),
                velocity: Vector3::new(-10.0, 7.6e3, 30.0),
            },
            rot,
        }
    }

    /// Manager with one inertial integration frame
    pub(crate) fn manager() -> (DynManager, FrameId) {
        let (_, sink) = RecordingSink::shared();
        let mut manager = DynManager::new(sink);
        let inertial = manager
            .add_integ_frame("Earth.inertial", None, RefFrameState::default())
            .unwrap();
        (manager, inertial)
    }

    /// Off-center core so structure, core and composite frames all differ
    pub(crate) fn offset_body(manager: &mut DynManager, name: &str, mass: f64, integ: FrameId) -> BodyId {
        let mut core = MassProperties::new(
            mass,
            Vector3::new(0.5, -0.25, 1.0),
            Matrix3::from_diagonal(&Vector3::new(10.0, 20.0, 30.0)),
        );
        core.t_struct_body = *RefFrameRot::from_quaternion(UnitQuaternion::from_euler_angles(0.0, 0.0, 0.3)).t_parent_this();
        manager.add_body(name, core, integ).unwrap()
    }

    fn assert_state_eq(a: &RefFrameState, b: &RefFrameState) {
        assert_relative_eq!(a.trans.position, b.trans.position, epsilon = 1e-6);
        assert_relative_eq!(a.trans.velocity, b.trans.velocity, epsilon = 1e-8);
        assert_relative_eq!(*a.rot.ang_vel_this(), *b.rot.ang_vel_this(), epsilon = 1e-12);
        assert!(a.rot.q_parent_this().angle_to(b.rot.q_parent_this()) < 1e-12);
    }

    #[test]
    fn test_structure_source_drives_composite() {
        let (mut manager, inertial) = manager();
        let body = offset_body(&mut manager, "vehicle", 500.0, inertial);
        let structure = manager.body(body).structure;
        let composite = manager.body(body).composite_body;
        let state = moving_state();

        assert!(manager.set_state(body, structure, &state, FrameItems::FULL));
        manager.propagate_state(body).unwrap();

        let cm = manager.mass()[manager.body(body).mass_body].composite_properties.position;
        let expected = state.trans.position + state.rot.t_parent_this().transpose() * cm;
        assert_relative_eq!(manager.frames()[composite].state.trans.position, expected, epsilon = 1e-6);
        assert!(manager.frames()[composite].initialized_items.is_full());
        assert_eq!(manager.body(body).source(StateItem::Position), Some(composite));

        // The structure frame is recomputed from the composite frame
        assert_state_eq(&manager.frames()[structure].state, &state);
    }

    #[test]
    fn test_propagation_is_idempotent() {
        let (mut manager, inertial) = manager();
        let body = offset_body(&mut manager, "vehicle", 500.0, inertial);
        let point = manager
            .add_vehicle_point(body, MassPoint::aligned("antenna", Vector3::new(0.0, 2.0, 0.0)))
            .unwrap();
        let structure = manager.body(body).structure;
        manager.set_state(body, structure, &moving_state(), FrameItems::FULL);

        manager.propagate_state(body).unwrap();
        let first: Vec<_> = manager.body(body).frames().iter().map(|f| manager.frames()[*f].state).collect();
        manager.propagate_state(body).unwrap();
        let second: Vec<_> = manager.body(body).frames().iter().map(|f| manager.frames()[*f].state).collect();

        for (a, b) in first.iter().zip(&second) {
            assert_state_eq(a, b);
        }
        assert!(manager.frames()[point].initialized_items.is_full());
    }

    #[test]
    fn test_attitude_only_leaves_translation_uninitialized() {
        let (mut manager, inertial) = manager();
        let body = offset_body(&mut manager, "vehicle", 500.0, inertial);
        let structure = manager.body(body).structure;
        let core = manager.body(body).core_body;
        let q = UnitQuaternion::from_euler_angles(0.4, 0.0, -0.2);

        assert!(manager.set_attitude(body, structure, q));
        manager.propagate_state(body).unwrap();

        assert_eq!(manager.body(body).initialized_states, FrameItems::ATTITUDE);
        for frame in [structure, core, manager.body(body).composite_body] {
            let items = manager.frames()[frame].initialized_items;
            assert!(items.has(StateItem::Attitude));
            assert!(!items.has(StateItem::Position));
            assert!(!items.has(StateItem::Velocity));
        }
        assert!(manager.frames()[structure].state.rot.q_parent_this().angle_to(&q) < 1e-12);
    }

    #[test]
    fn test_position_waits_for_attitude() {
        let (mut manager, inertial) = manager();
        let body = offset_body(&mut manager, "vehicle", 500.0, inertial);
        let structure = manager.body(body).structure;

        manager.set_position(body, structure, Vector3::new(1.0, 2.0, 3.0));
        manager.propagate_state(body).unwrap();
        assert!(!manager.body(body).initialized_states.has(StateItem::Position));
        assert_eq!(manager.body(body).source(StateItem::Position), Some(structure));

        manager.set_attitude(body, structure, UnitQuaternion::identity());
        manager.propagate_state(body).unwrap();
        assert!(manager.body(body).initialized_states.contains(FrameItems::ATTITUDE | FrameItems::POSITION));
        assert_relative_eq!(
            manager.frames()[structure].state.trans.position,
            Vector3::new(1.0, 2.0, 3.0),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_memo_is_reused_for_same_source() {
        let (mut manager, inertial) = manager();
        let body = offset_body(&mut manager, "vehicle", 500.0, inertial);
        let core = manager.body(body).core_body;
        manager.set_state(body, core, &moving_state(), FrameItems::FULL);
        manager.update_integrated_state(body).unwrap();

        let memo = manager.body(body).last_ref_point.unwrap();
        assert_eq!(memo.from.kind, PointKind::Core);
        assert_eq!(memo.to.kind, PointKind::Composite);
    }
}
