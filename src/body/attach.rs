//! Attach/detach protocol and frame re-rooting
//!
//! Every structural edit follows the same shape: bring the affected trees up to
//! date, relink the body and mass trees, then rebuild the root's integrated
//! state from its core body frame. Attaching or detaching changes composite
//! mass properties, so composite-frame state from before the edit no longer
//! describes the same point.

use crate::diagnostics::codes;
use crate::error::Result;
use crate::frame::{FrameId, FrameItems, RefFrameState, StateItem};
use crate::mass::{MassBodyId, MassPoint, MassProperties, PointRef};

use super::{BodyId, DynManager, FrameAttachment};

impl DynManager {
    fn propagate_if_initialized(&mut self, body: BodyId) -> Result<()> {
        let root = self.root_of(body);
        if !self.bodies[root.0].has_state() {
            return Ok(());
        }
        self.propagate_state(root)
    }

    /// Make the root's core body frame the source of everything it knows and
    /// rebuild the tree from it
    fn reset_from_core(&mut self, root: BodyId) -> Result<()> {
        let core = self.bodies[root.0].core_body;
        let known = self.frames[core].initialized_items;
        let body = &mut self.bodies[root.0];
        body.last_ref_point = None;
        body.initialized_states = FrameItems::EMPTY;
        for &item in StateItem::resolution_order() {
            body.set_source(item, known.has(item).then_some(core));
        }
        if known.is_empty() {
            return Ok(());
        }
        self.propagate_state(root)
    }

    fn clear_sources(&mut self, body: BodyId) {
        let body = &mut self.bodies[body.0];
        for &item in StateItem::resolution_order() {
            body.set_source(item, None);
        }
        body.last_ref_point = None;
    }

    /// Move every frame of the tree rooted at `root` under `integ_frame`
    ///
    /// Only the edges change; callers recompute the states.
    fn reparent_tree_frames(&mut self, root: BodyId, integ_frame: FrameId) -> Result<()> {
        for id in self.tree_bodies(root) {
            for frame in self.bodies[id.0].frames() {
                self.frames.reset_parent(frame, integ_frame)?;
            }
            self.bodies[id.0].integ_frame = integ_frame;
        }
        Ok(())
    }

    /// Attach the root body `child` to `parent`, placing the child's structure
    /// at `offset` in the parent's structure
    ///
    /// The child's own state is discarded; after the attach its frames are
    /// derived from the parent tree's root.
    pub fn attach(&mut self, child: BodyId, parent: BodyId, offset: MassPoint) -> Result<()> {
        let child_name = self.bodies[child.0].name.clone();
        let parent_name = self.bodies[parent.0].name.clone();

        if child == parent {
            let msg = format!("Body '{}' cannot attach to itself", child_name);
            return Err(self.sink.fail(codes::INVALID_ATTACH, &msg));
        }
        if let Some(existing) = self.bodies[child.0].dyn_parent {
            let msg = format!(
                "Body '{}' is already attached to '{}'",
                child_name, self.bodies[existing.0].name
            );
            return Err(self.sink.fail(codes::INVALID_ATTACH, &msg));
        }
        if self.root_of(parent) == child {
            let msg = format!(
                "Attaching '{}' to '{}' would create a cycle",
                child_name, parent_name
            );
            return Err(self.sink.fail(codes::INVALID_ATTACH, &msg));
        }
        if self.bodies[child.0].frame_attachment.is_some() {
            let msg = format!(
                "Body '{}' is pinned to a frame; detach it from the frame first",
                child_name
            );
            return Err(self.sink.fail(codes::INVALID_ATTACH, &msg));
        }

        self.propagate_if_initialized(child)?;
        self.propagate_if_initialized(parent)?;

        let child_mass = self.bodies[child.0].mass_body;
        let parent_mass = self.bodies[parent.0].mass_body;
        self.mass.attach(child_mass, parent_mass, offset)?;

        self.bodies[child.0].dyn_parent = Some(parent);
        self.bodies[parent.0].dyn_children.push(child);

        let root = self.root_of(parent);
        let integ_frame = self.bodies[root.0].integ_frame;
        if self.bodies[child.0].integ_frame != integ_frame {
            self.reparent_tree_frames(child, integ_frame)?;
        }
        let integrated = self.bodies[root.0].integrated;
        for id in self.tree_bodies(child) {
            self.bodies[id.0].integrated = integrated;
        }

        self.clear_sources(child);
        self.reset_from_core(root)?;
        self.reset_integrators(root);
        self.reset_integrators(child);

        log::info!(
            "Attached {} to {} (tree root {})",
            child_name,
            parent_name,
            self.bodies[root.0].name
        );
        Ok(())
    }

    /// Sever the attachment between two bodies, whichever is the parent
    ///
    /// Returns false, with an error diagnostic, if neither body descends from
    /// the other. Related bodies that are not directly linked, or whose body
    /// and mass trees disagree, are fatal.
    pub fn detach(&mut self, a: BodyId, b: BodyId) -> Result<bool> {
        let mass_a = self.bodies[a.0].mass_body;
        let mass_b = self.bodies[b.0].mass_body;
        let (parent, child) = if self.mass.is_progeny_of(mass_b, mass_a) {
            (a, b)
        } else if self.mass.is_progeny_of(mass_a, mass_b) {
            (b, a)
        } else {
            let msg = format!(
                "Bodies '{}' and '{}' are not attached to each other",
                self.bodies[a.0].name, self.bodies[b.0].name
            );
            self.sink.error(codes::INVALID_ATTACH, &msg);
            return Ok(false);
        };

        let parent_mass = self.bodies[parent.0].mass_body;
        if self.mass[self.bodies[child.0].mass_body].parent() != Some(parent_mass) {
            let msg = format!(
                "Body '{}' descends from '{}' but is not attached to it directly",
                self.bodies[child.0].name, self.bodies[parent.0].name
            );
            return Err(self.sink.fail(codes::INVALID_ATTACH, &msg));
        }
        if self.bodies[child.0].dyn_parent != Some(parent)
            || !self.bodies[parent.0].dyn_children.contains(&child)
        {
            let msg = format!(
                "Body tree bookkeeping for '{}' under '{}' disagrees with the mass tree",
                self.bodies[child.0].name, self.bodies[parent.0].name
            );
            return Err(self.sink.fail(codes::INVALID_ATTACH, &msg));
        }

        let root = self.root_of(parent);
        self.propagate_if_initialized(root)?;

        let child_mass = self.bodies[child.0].mass_body;
        self.detach_mass_body_frames(parent, child_mass);

        self.bodies[parent.0].dyn_children.retain(|c| *c != child);
        self.bodies[child.0].dyn_parent = None;
        self.mass.detach(child_mass)?;

        self.reset_from_core(root)?;
        self.reset_from_core(child)?;
        self.reset_integrators(root);
        self.reset_integrators(child);

        log::info!(
            "Detached {} from {}",
            self.bodies[child.0].name,
            self.bodies[parent.0].name
        );
        Ok(true)
    }

    /// Unregister and unlink every vehicle-point frame in the tree of `owner`
    /// that rides on the subassembly rooted at `mass_body`
    ///
    /// Frames of bodies whose own mass body is in the subassembly leave with it
    /// and are kept.
    pub fn detach_mass_body_frames(&mut self, owner: BodyId, mass_body: MassBodyId) {
        let leaving = self.mass.subtree(mass_body);
        for id in self.tree_bodies(self.root_of(owner)) {
            if leaving.contains(&self.bodies[id.0].mass_body) {
                continue;
            }
            let points = std::mem::take(&mut self.bodies[id.0].vehicle_points);
            let mut kept = Vec::with_capacity(points.len());
            for frame in points {
                let rides_on_leaving = self.frames[frame]
                    .mass_point
                    .is_some_and(|point| leaving.contains(&point.body));
                if rides_on_leaving {
                    log::debug!("Removing vehicle point {}", self.frames.name(frame));
                    self.frames.remove_frame(frame);
                } else {
                    kept.push(frame);
                }
            }
            self.bodies[id.0].vehicle_points = kept;
        }
    }

    /// Add a bare mass body (no frames of its own) below `parent_mass` in the
    /// tree of `owner`
    pub fn add_mass_body(
        &mut self,
        owner: BodyId,
        name: &str,
        core: MassProperties,
        parent_mass: MassBodyId,
        offset: MassPoint,
    ) -> Result<MassBodyId> {
        let root = self.root_of(owner);
        if self.mass.root_of(parent_mass) != self.mass.root_of(self.bodies[root.0].mass_body) {
            let msg = format!(
                "Mass body '{}' is not part of the tree of '{}'",
                self.mass[parent_mass].name, self.bodies[owner.0].name
            );
            return Err(self.sink.fail(codes::MASS_TREE, &msg));
        }
        self.propagate_if_initialized(root)?;

        let mass_body = self.mass.add_mass_body(name, core);
        self.mass.attach(mass_body, parent_mass, offset)?;
        self.reset_from_core(root)?;
        log::info!("Added mass body {} to {}", name, self.bodies[owner.0].name);
        Ok(mass_body)
    }

    /// Add a vehicle point riding on any mass body in the subassembly of `body`
    pub fn add_vehicle_point_on(&mut self, body: BodyId, mass_body: MassBodyId, point: MassPoint) -> Result<FrameId> {
        let own = self.bodies[body.0].mass_body;
        let owned_by_other = self.mass[mass_body].dyn_owner.is_some_and(|owner| owner != body);
        if !self.mass.subtree(own).contains(&mass_body) || owned_by_other {
            let msg = format!(
                "Mass body '{}' is not a bare part of '{}'",
                self.mass[mass_body].name, self.bodies[body.0].name
            );
            return Err(self.sink.fail(codes::MASS_TREE, &msg));
        }
        let name = format!("{}.{}", self.bodies[body.0].name, point.name);
        let point_ref = self.mass.add_mass_point(mass_body, point);
        self.add_point_frame(body, &name, point_ref)
    }

    pub(crate) fn add_point_frame(&mut self, body: BodyId, name: &str, point: PointRef) -> Result<FrameId> {
        let integ_frame = self.bodies[body.0].integ_frame;
        let frame = self.frames.add_frame(name);
        self.frames.add_ref_frame(frame)?;
        self.frames.add_child(integ_frame, frame)?;
        self.frames[frame].owner = Some(body);
        self.frames[frame].mass_point = Some(point);
        self.bodies[body.0].vehicle_points.push(frame);

        self.propagate_if_initialized(body)?;
        Ok(frame)
    }

    /// Remove a mass body from the tree of `owner`
    ///
    /// A mass body that belongs to another dynamic body is detached as that
    /// body. Returns false if the mass body is not attached.
    pub fn remove_mass_body(&mut self, owner: BodyId, mass_body: MassBodyId) -> Result<bool> {
        if let Some(other) = self.mass[mass_body].dyn_owner {
            if other != owner {
                log::debug!(
                    "Mass body {} belongs to {}; detaching the body",
                    self.mass[mass_body].name,
                    self.bodies[other.0].name
                );
                return self.detach(owner, other);
            }
        }

        if self.mass[mass_body].parent().is_none() {
            let msg = format!("Mass body '{}' is not attached", self.mass[mass_body].name);
            self.sink.error(codes::MASS_TREE, &msg);
            return Ok(false);
        }

        let root = self.root_of(owner);
        self.propagate_if_initialized(root)?;
        self.detach_mass_body_frames(owner, mass_body);
        self.mass.detach(mass_body)?;
        self.reset_from_core(root)?;
        log::info!(
            "Removed mass body {} from {}",
            self.mass[mass_body].name,
            self.bodies[owner.0].name
        );
        Ok(true)
    }

    /// Rigidly pin a root body to a registered frame
    ///
    /// `offset` is the state of the body's structure frame relative to
    /// `frame`. While pinned the body is not integrated numerically.
    pub fn attach_to_frame(&mut self, body: BodyId, frame: FrameId, offset: RefFrameState) -> Result<()> {
        let name = self.bodies[body.0].name.clone();
        if !self.bodies[body.0].is_root() {
            let msg = format!("Only root bodies can be pinned to a frame; '{}' is attached", name);
            return Err(self.sink.fail(codes::INVALID_ATTACH, &msg));
        }
        if !self.frames[frame].is_registered() {
            let msg = format!("Cannot pin '{}' to unregistered frame '{}'", name, self.frames.name(frame));
            return Err(self.sink.fail(codes::INVALID_NODE, &msg));
        }
        if let Some(owner) = self.frames[frame].owner {
            if self.root_of(owner) == body {
                let msg = format!(
                    "Cannot pin '{}' to its own frame '{}'",
                    name,
                    self.frames.name(frame)
                );
                return Err(self.sink.fail(codes::INVALID_ATTACH, &msg));
            }
        }

        if let Some(previous) = self.bodies[body.0].frame_attachment.take() {
            self.frames.unsubscribe_from_frame(previous.parent);
        }
        self.frames.subscribe_to_frame(frame);
        self.bodies[body.0].frame_attachment = Some(FrameAttachment { parent: frame, offset });
        self.update_frame_attachment(body)?;
        log::info!("Pinned {} to {}", name, self.frames.name(frame));
        Ok(())
    }

    /// Release a frame pin; integration resumes from the pinned state
    ///
    /// Returns false if the body was not pinned.
    pub fn detach_from_frame(&mut self, body: BodyId) -> bool {
        let Some(attachment) = self.bodies[body.0].frame_attachment.take() else {
            let msg = format!("Body '{}' is not pinned to a frame", self.bodies[body.0].name);
            self.sink.warn(codes::INVALID_ATTACH, &msg);
            return false;
        };
        self.frames.unsubscribe_from_frame(attachment.parent);

        let structure = self.bodies[body.0].structure;
        let known = self.frames[structure].initialized_items;
        for &item in StateItem::resolution_order() {
            if known.has(item) {
                self.bodies[body.0].set_source(item, Some(structure));
            }
        }
        self.reset_integrators(body);
        log::info!(
            "Released {} from {}",
            self.bodies[body.0].name,
            self.frames.name(attachment.parent)
        );
        true
    }

    /// Recompute a pinned body's state from its pin
    pub(crate) fn update_frame_attachment(&mut self, body: BodyId) -> Result<()> {
        let Some(attachment) = self.bodies[body.0].frame_attachment else {
            return Ok(());
        };
        let integ_frame = self.bodies[body.0].integ_frame;
        let structure = self.bodies[body.0].structure;
        let pinned = self
            .frames
            .compute_relative_state(attachment.parent, integ_frame)?
            .compose(&attachment.offset);

        let frame = &mut self.frames[structure];
        frame.state = pinned;
        frame.initialized_items = FrameItems::FULL;
        for &item in StateItem::resolution_order() {
            self.bodies[body.0].set_source(item, Some(structure));
        }
        self.propagate_state(body)
    }

    /// Choose the integration frame of a root body
    ///
    /// Before any state is known the frames are only relinked; afterwards this
    /// is [`DynManager::switch_integration_frames`].
    pub fn set_integ_frame(&mut self, body: BodyId, integ_frame: FrameId) -> Result<()> {
        if !self.bodies[body.0].is_root() {
            let msg = format!(
                "Integration frame of '{}' is set through its root '{}'",
                self.bodies[body.0].name,
                self.bodies[self.root_of(body).0].name
            );
            return Err(self.sink.fail(codes::INVALID_INTEG_FRAME, &msg));
        }
        if !self.bodies[body.0].has_state() {
            self.check_integ_frame(body, integ_frame)?;
            return self.reparent_tree_frames(body, integ_frame);
        }
        self.switch_integration_frames(body, integ_frame)
    }

    fn check_integ_frame(&self, body: BodyId, integ_frame: FrameId) -> Result<()> {
        if self.frames.is_integ_frame(integ_frame) {
            return Ok(());
        }
        let msg = format!(
            "Frame '{}' is not an integration frame; cannot host '{}'",
            self.frames.name(integ_frame),
            self.bodies[body.0].name
        );
        Err(self.sink.fail(codes::INVALID_INTEG_FRAME, &msg))
    }

    /// Re-express the whole tree of `body` in another integration frame
    ///
    /// A non-root body forwards to its root.
    pub fn switch_integration_frames(&mut self, body: BodyId, integ_frame: FrameId) -> Result<()> {
        let root = self.root_of(body);
        self.check_integ_frame(root, integ_frame)?;
        let old_frame = self.bodies[root.0].integ_frame;
        if old_frame == integ_frame {
            return Ok(());
        }
        self.propagate_if_initialized(root)?;

        for id in self.tree_bodies(root) {
            for frame in self.bodies[id.0].frames() {
                let state = self.frames.compute_relative_state(frame, integ_frame)?;
                self.frames.reset_parent(frame, integ_frame)?;
                self.frames[frame].state = state;
            }
            self.bodies[id.0].integ_frame = integ_frame;
        }

        let integrated = self.bodies[root.0].integrated_frame();
        let known = self.bodies[root.0].initialized_states;
        for &item in StateItem::resolution_order() {
            if known.has(item) {
                self.bodies[root.0].set_source(item, Some(integrated));
            }
        }
        self.reset_integrators(root);
        log::info!(
            "{} switched integration frame {} -> {}",
            self.bodies[root.0].name,
            self.frames.name(old_frame),
            self.frames.name(integ_frame)
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::propagation::tests::{manager, moving_state, offset_body};
    use crate::diagnostics::{RecordingSink, Severity};
    use approx::assert_relative_eq;
    use nalgebra::{UnitQuaternion, Vector3};

    fn dock_port() -> MassPoint {
        MassPoint::with_quaternion(
            "dock",
            Vector3::new(0.0, 0.0, 4.0),
            UnitQuaternion::from_euler_angles(0.0, std::f64::consts::FRAC_PI_2, 0.0),
        )
    }

    fn recorded_manager() -> (std::sync::Arc<RecordingSink>, DynManager, FrameId) {
        let (recorder, sink) = RecordingSink::shared();
        let mut manager = DynManager::new(sink);
        let inertial = manager
            .add_integ_frame("Earth.inertial", None, RefFrameState::default())
            .unwrap();
        (recorder, manager, inertial)
    }

    #[test]
    fn test_attach_detach_restores_parent() {
        let (mut manager, inertial) = manager();
        let parent = offset_body(&mut manager, "station", 1000.0, inertial);
        let child = offset_body(&mut manager, "capsule", 200.0, inertial);
        let structure = manager.body(parent).structure;
        manager.set_state(parent, structure, &moving_state(), FrameItems::FULL);
        manager.propagate_state(parent).unwrap();

        let mass_before = manager.mass()[manager.body(parent).mass_body].composite_properties.clone();
        let structure_before = manager.frames()[structure].state;

        manager.attach(child, parent, dock_port()).unwrap();
        assert_eq!(manager.body(parent).dyn_children(), &[child]);
        assert_eq!(manager.root_of(child), parent);
        assert_relative_eq!(
            manager.mass()[manager.body(parent).mass_body].composite_properties.mass,
            1200.0
        );

        assert!(manager.detach(parent, child).unwrap());
        assert!(manager.body(parent).dyn_children().is_empty());
        assert!(manager.body(child).is_root());

        let mass_after = &manager.mass()[manager.body(parent).mass_body].composite_properties;
        assert_relative_eq!(mass_after.mass, mass_before.mass);
        assert_relative_eq!(mass_after.position, mass_before.position, epsilon = 1e-12);
        assert_relative_eq!(mass_after.inertia, mass_before.inertia, epsilon = 1e-9);

        let structure_after = manager.frames()[structure].state;
        assert_relative_eq!(structure_after.trans.position, structure_before.trans.position, epsilon = 1e-6);
        assert_relative_eq!(structure_after.trans.velocity, structure_before.trans.velocity, epsilon = 1e-8);
        assert!(structure_after.rot.q_parent_this().angle_to(structure_before.rot.q_parent_this()) < 1e-12);
    }

    #[test]
    fn test_attached_child_rides_on_parent() {
        let (mut manager, inertial) = manager();
        let parent = offset_body(&mut manager, "station", 1000.0, inertial);
        let child = offset_body(&mut manager, "capsule", 200.0, inertial);
        let structure = manager.body(parent).structure;
        let state = moving_state();
        manager.set_state(parent, structure, &state, FrameItems::FULL);

        manager.attach(child, parent, dock_port()).unwrap();

        let expected = docked_state(&state);
        let child_structure = manager.frames()[manager.body(child).structure].state;
        assert_relative_eq!(child_structure.trans.position, expected.trans.position, epsilon = 1e-6);
        assert_relative_eq!(child_structure.trans.velocity, expected.trans.velocity, epsilon = 1e-8);
        assert!(child_structure.rot.q_parent_this().angle_to(expected.rot.q_parent_this()) < 1e-12);
        assert!(manager.body(child).source(StateItem::Position).is_none());
    }

    #[test]
    fn test_three_body_chain_composes_offsets() {
        let (mut manager, inertial) = manager();
        let a = offset_body(&mut manager, "a", 1000.0, inertial);
        let b = offset_body(&mut manager, "b", 300.0, inertial);
        let c = offset_body(&mut manager, "c", 50.0, inertial);
        manager.attach(c, b, dock_port()).unwrap();
        manager.attach(b, a, dock_port()).unwrap();
        assert_eq!(manager.tree_bodies(a), vec![a, b, c]);

        let state = moving_state();
        let structure = manager.body(a).structure;
        manager.set_state(a, structure, &state, FrameItems::FULL);
        manager.propagate_state(c).unwrap();

        let port = dock_port();
        let mut hop = RefFrameState::default();
        hop.trans.position = port.position;
        hop.rot.set_transform(port.t_parent_this);
        let expected = state.compose(&hop).compose(&hop);

        let c_structure = manager.frames()[manager.body(c).structure].state;
        assert_relative_eq!(c_structure.trans.position, expected.trans.position, epsilon = 1e-6);
        assert_relative_eq!(c_structure.trans.velocity, expected.trans.velocity, epsilon = 1e-8);
        assert_relative_eq!(*c_structure.rot.ang_vel_this(), *expected.rot.ang_vel_this(), epsilon = 1e-12);
        assert!(c_structure.rot.q_parent_this().angle_to(expected.rot.q_parent_this()) < 1e-12);

        // Every body frame hangs directly off the integration frame
        for id in manager.tree_bodies(a) {
            for frame in manager.body(id).frames() {
                assert_eq!(manager.frames()[frame].parent(), Some(inertial));
            }
        }
    }

    #[test]
    fn test_invalid_attachments_are_fatal() {
        let (recorder, mut manager, inertial) = recorded_manager();
        let a = offset_body(&mut manager, "a", 100.0, inertial);
        let b = offset_body(&mut manager, "b", 100.0, inertial);

        assert!(manager.attach(a, a, dock_port()).unwrap_err().is_fatal_code(codes::INVALID_ATTACH));
        manager.attach(b, a, dock_port()).unwrap();
        assert!(manager.attach(a, b, dock_port()).unwrap_err().is_fatal_code(codes::INVALID_ATTACH));
        assert!(manager.attach(b, a, dock_port()).unwrap_err().is_fatal_code(codes::INVALID_ATTACH));
        assert_eq!(recorder.count(Severity::Fail), 3);
    }

    #[test]
    fn test_detach_unrelated_pair_is_recoverable() {
        let (recorder, mut manager, inertial) = recorded_manager();
        let a = offset_body(&mut manager, "a", 100.0, inertial);
        let b = offset_body(&mut manager, "b", 100.0, inertial);

        assert!(!manager.detach(a, b).unwrap());
        assert_eq!(recorder.count(Severity::Error), 1);
        assert!(recorder.contains_code(codes::INVALID_ATTACH));
    }

    #[test]
    fn test_detach_either_order() {
        let (mut manager, inertial) = manager();
        let a = offset_body(&mut manager, "a", 100.0, inertial);
        let b = offset_body(&mut manager, "b", 100.0, inertial);
        manager.attach(b, a, dock_port()).unwrap();
        assert!(manager.detach(b, a).unwrap());
        assert!(manager.body(b).is_root());
    }

    fn docked_state(state: &RefFrameState) -> RefFrameState {
        let port = dock_port();
        let mut hop = RefFrameState::default();
        hop.trans.position = port.position;
        hop.rot.set_transform(port.t_parent_this);
        state.compose(&hop)
    }

    #[test]
    fn test_attach_keeps_state_set_just_before() {
        let (mut manager, inertial) = manager();
        let parent = offset_body(&mut manager, "station", 1000.0, inertial);
        let child = offset_body(&mut manager, "capsule", 200.0, inertial);
        let structure = manager.body(parent).structure;
        let state = moving_state();
        assert!(manager.set_state(parent, structure, &state, FrameItems::FULL));
        assert!(manager.body(parent).has_state());
        assert!(manager.body(parent).initialized_states.is_empty());

        manager.attach(child, parent, dock_port()).unwrap();

        assert!(manager.body(parent).initialized_states.is_full());
        let parent_structure = manager.frames()[structure].state;
        assert_relative_eq!(parent_structure.trans.position, state.trans.position, epsilon = 1e-6);
        assert_relative_eq!(parent_structure.trans.velocity, state.trans.velocity, epsilon = 1e-8);
        let composite = manager.frames()[manager.body(parent).composite_body].state;
        assert!(composite.trans.position.norm() > 6.0e6);
    }

    #[test]
    fn test_detach_keeps_state_set_just_before() {
        let (mut manager, inertial) = manager();
        let parent = offset_body(&mut manager, "station", 1000.0, inertial);
        let child = offset_body(&mut manager, "capsule", 200.0, inertial);
        manager.attach(child, parent, dock_port()).unwrap();
        assert!(!manager.body(parent).has_state());

        let structure = manager.body(parent).structure;
        let state = moving_state();
        assert!(manager.set_state(parent, structure, &state, FrameItems::FULL));
        assert!(manager.detach(parent, child).unwrap());

        let parent_structure = manager.frames()[structure].state;
        assert_relative_eq!(parent_structure.trans.position, state.trans.position, epsilon = 1e-6);
        assert_relative_eq!(parent_structure.trans.velocity, state.trans.velocity, epsilon = 1e-8);
        assert!(parent_structure.rot.q_parent_this().angle_to(state.rot.q_parent_this()) < 1e-12);

        let expected = docked_state(&state);
        let child_structure = manager.frames()[manager.body(child).structure].state;
        assert!(manager.body(child).initialized_states.is_full());
        assert_relative_eq!(child_structure.trans.position, expected.trans.position, epsilon = 1e-6);
        assert_relative_eq!(child_structure.trans.velocity, expected.trans.velocity, epsilon = 1e-8);
    }

    #[test]
    fn test_detach_requires_direct_link() {
        let (recorder, mut manager, inertial) = recorded_manager();
        let a = offset_body(&mut manager, "a", 1000.0, inertial);
        let b = offset_body(&mut manager, "b", 300.0, inertial);
        let c = offset_body(&mut manager, "c", 50.0, inertial);
        manager.attach(b, a, dock_port()).unwrap();
        manager.attach(c, b, dock_port()).unwrap();

        assert!(manager.detach(c, a).unwrap_err().is_fatal_code(codes::INVALID_ATTACH));
        assert_eq!(recorder.count(Severity::Fail), 1);
        assert_eq!(recorder.count(Severity::Error), 0);
        assert_eq!(manager.root_of(c), a);
        assert_eq!(manager.body(b).dyn_children(), &[c]);
    }

    #[test]
    fn test_body_and_mass_trees_share_roots() {
        let (mut manager, inertial) = manager();
        let bodies: Vec<BodyId> = ["a", "b", "c", "d"]
            .iter()
            .map(|name| offset_body(&mut manager, name, 100.0, inertial))
            .collect();
        let [a, b, c, d] = [bodies[0], bodies[1], bodies[2], bodies[3]];

        let check = |manager: &DynManager| {
            for &body in &bodies {
                let root = manager.root_of(body);
                assert!(manager.body(root).is_root());
                assert_eq!(
                    manager.mass().root_of(manager.body(body).mass_body),
                    manager.body(root).mass_body
                );
                for &other in &bodies {
                    assert_eq!(
                        manager.mass().is_progeny_of(manager.body(body).mass_body, manager.body(other).mass_body),
                        manager.is_progeny_of(body, other)
                    );
                }
            }
        };

        manager.attach(d, c, dock_port()).unwrap();
        check(&manager);
        manager.attach(b, a, dock_port()).unwrap();
        check(&manager);
        manager.attach(c, a, dock_port()).unwrap();
        check(&manager);
        assert_eq!(manager.root_of(d), a);
        assert!(manager.is_progeny_of(d, a));

        assert!(manager.detach(c, a).unwrap());
        check(&manager);
        assert_eq!(manager.root_of(d), c);
        assert_eq!(manager.root_of(b), a);
    }

    #[test]
    fn test_remove_mass_body_redirects_to_body_detach() {
        let (mut manager, inertial) = manager();
        let a = offset_body(&mut manager, "a", 100.0, inertial);
        let b = offset_body(&mut manager, "b", 100.0, inertial);
        manager.attach(b, a, dock_port()).unwrap();

        let b_mass = manager.body(b).mass_body;
        assert!(manager.remove_mass_body(a, b_mass).unwrap());
        assert!(manager.body(b).is_root());
        assert!(manager.body(a).dyn_children().is_empty());
    }

    #[test]
    fn test_remove_bare_mass_body_drops_its_points() {
        let (mut manager, inertial) = manager();
        let a = offset_body(&mut manager, "a", 100.0, inertial);
        let structure = manager.body(a).structure;
        manager.set_state(a, structure, &moving_state(), FrameItems::FULL);
        manager.propagate_state(a).unwrap();

        let a_mass = manager.body(a).mass_body;
        let tank = manager
            .add_mass_body(
                a,
                "tank",
                MassProperties::sphere(40.0, 0.5, Vector3::zeros()),
                a_mass,
                MassPoint::aligned("tank.mount", Vector3::new(1.0, 0.0, 0.0)),
            )
            .unwrap();
        assert_relative_eq!(manager.mass()[a_mass].composite_properties.mass, 140.0);

        let valve = manager
            .add_vehicle_point_on(a, tank, MassPoint::aligned("valve", Vector3::new(0.0, 0.5, 0.0)))
            .unwrap();
        let antenna = manager
            .add_vehicle_point(a, MassPoint::aligned("antenna", Vector3::new(0.0, 0.0, 2.0)))
            .unwrap();
        assert!(manager.find_ref_frame("a.valve").is_some());

        assert!(manager.remove_mass_body(a, tank).unwrap());
        assert!(manager.find_ref_frame("a.valve").is_none());
        assert!(manager.frames()[valve].is_removed());
        assert_eq!(manager.body(a).vehicle_points, vec![antenna]);
        assert_relative_eq!(manager.mass()[a_mass].composite_properties.mass, 100.0);

        // Structure state survives the composite shift
        let restored = manager.frames()[structure].state;
        assert_relative_eq!(restored.trans.position, moving_state().trans.position, epsilon = 1e-6);

        assert!(!manager.remove_mass_body(a, tank).unwrap());
    }

    #[test]
    fn test_frame_attachment_pins_structure() {
        let (mut manager, inertial) = manager();
        let mut pad_state = RefFrameState::default();
        pad_state.trans.position = Vector3::new(6.4e6, 0.0, 0.0);
        pad_state.rot.set_ang_vel(Vector3::new(0.0, 0.0, 7.29e-5));
        let pad = manager.add_ref_frame("pad", Some(inertial), pad_state).unwrap();
        let body = offset_body(&mut manager, "rocket", 100.0, inertial);

        let mut offset = RefFrameState::default();
        offset.trans.position = Vector3::new(0.0, 0.0, 10.0);
        manager.attach_to_frame(body, pad, offset).unwrap();

        let expected = pad_state.compose(&offset);
        let structure = manager.frames()[manager.body(body).structure].state;
        assert_relative_eq!(structure.trans.position, expected.trans.position, epsilon = 1e-6);
        assert_relative_eq!(structure.trans.velocity, expected.trans.velocity, epsilon = 1e-9);
        assert_eq!(manager.frames()[pad].subscriptions(), 1);
        assert!(manager.frames()[manager.body(body).composite_body].initialized_items.is_full());

        assert!(manager.detach_from_frame(body));
        assert_eq!(manager.frames()[pad].subscriptions(), 0);
        assert!(!manager.detach_from_frame(body));
    }

    #[test]
    fn test_cannot_pin_to_own_frame() {
        let (mut manager, inertial) = manager();
        let body = offset_body(&mut manager, "rocket", 100.0, inertial);
        let own = manager.body(body).core_body;
        let result = manager.attach_to_frame(body, own, RefFrameState::default());
        assert!(result.unwrap_err().is_fatal_code(codes::INVALID_ATTACH));
    }

    #[test]
    fn test_switch_integration_frames_preserves_inertial_state() {
        let (mut manager, inertial) = manager();
        let mut moon_state = RefFrameState::default();
        moon_state.trans.position = Vector3::new(3.8e8, 0.0, 0.0);
        moon_state.trans.velocity = Vector3::new(0.0, 1.0e3, 0.0);
        let moon = manager.add_integ_frame("Moon.inertial", Some(inertial), moon_state).unwrap();

        let a = offset_body(&mut manager, "a", 100.0, inertial);
        let b = offset_body(&mut manager, "b", 100.0, inertial);
        manager.attach(b, a, dock_port()).unwrap();
        let structure = manager.body(a).structure;
        let state = moving_state();
        manager.set_state(a, structure, &state, FrameItems::FULL);
        manager.propagate_state(a).unwrap();
        let b_core = manager.body(b).core_body;
        let b_core_before = manager.frames().compute_relative_state(b_core, inertial).unwrap();

        // Forwarded from the non-root body
        manager.switch_integration_frames(b, moon).unwrap();
        assert_eq!(manager.body(a).integ_frame(), moon);
        assert_eq!(manager.body(b).integ_frame(), moon);
        assert_eq!(manager.frames()[b_core].parent(), Some(moon));

        let relative = manager.frames()[structure].state;
        assert_relative_eq!(relative.trans.position, state.trans.position - moon_state.trans.position, epsilon = 1e-6);

        manager.propagate_state(a).unwrap();
        let b_core_after = manager.frames().compute_relative_state(b_core, inertial).unwrap();
        assert_relative_eq!(b_core_after.trans.position, b_core_before.trans.position, epsilon = 1e-6);
        assert_relative_eq!(b_core_after.trans.velocity, b_core_before.trans.velocity, epsilon = 1e-8);
    }

    #[test]
    fn test_switch_to_plain_frame_is_fatal() {
        let (mut manager, inertial) = manager();
        let plain = manager.add_ref_frame("plain", Some(inertial), RefFrameState::default()).unwrap();
        let a = offset_body(&mut manager, "a", 100.0, inertial);
        let result = manager.switch_integration_frames(a, plain);
        assert!(result.unwrap_err().is_fatal_code(codes::INVALID_INTEG_FRAME));
    }

    #[test]
    fn test_set_integ_frame_before_state_relinks() {
        let (mut manager, inertial) = manager();
        let other = manager.add_integ_frame("Sun.inertial", None, RefFrameState::default()).unwrap();
        let a = offset_body(&mut manager, "a", 100.0, inertial);
        manager.set_integ_frame(a, other).unwrap();
        assert_eq!(manager.frames()[manager.body(a).structure].parent(), Some(other));
    }
}
