//! Arena owning bodies, their frames and their mass tree

use nalgebra::{UnitQuaternion, Vector3};

use crate::diagnostics::{codes, SharedSink};
use crate::error::Result;
use crate::frame::{FrameId, FrameItems, FrameTree, RefFrameState, StateItem};
use crate::mass::{MassPoint, MassProperties, MassTree, PointKind, PointRef};

use super::{BodyId, DynBody, IntegratedFrame};

/// Owner of every body, frame and mass body in a simulation
///
/// Structural edits (attach, detach, integration frame changes) take
/// `&mut self`, so no propagation can be in flight while one runs.
pub struct DynManager {
    pub(crate) frames: FrameTree,
    pub(crate) mass: MassTree,
    pub(crate) bodies: Vec<DynBody>,
    pub(crate) sink: SharedSink,
}

impl DynManager {
    pub fn new(sink: SharedSink) -> Self {
        Self {
            frames: FrameTree::new(sink.clone()),
            mass: MassTree::new(sink.clone()),
            bodies: Vec::new(),
            sink,
        }
    }

    pub fn frames(&self) -> &FrameTree {
        &self.frames
    }

    pub fn mass(&self) -> &MassTree {
        &self.mass
    }

    pub fn sink(&self) -> &SharedSink {
        &self.sink
    }

    pub fn body(&self, id: BodyId) -> &DynBody {
        &self.bodies[id.0]
    }

    pub fn body_ids(&self) -> impl Iterator<Item = BodyId> {
        (0..self.bodies.len()).map(BodyId)
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    pub fn find_body(&self, name: &str) -> Option<BodyId> {
        self.bodies.iter().position(|b| b.name == name).map(BodyId)
    }

    /// Create and register a frame
    ///
    /// With a parent, `state` is relative to that parent.
    pub fn add_ref_frame(&mut self, name: &str, parent: Option<FrameId>, state: RefFrameState) -> Result<FrameId> {
        let id = self.frames.add_frame(name);
        self.frames.add_ref_frame(id)?;
        if let Some(parent) = parent {
            self.frames.add_child(parent, id)?;
        }
        let frame = &mut self.frames[id];
        frame.state = state;
        frame.initialized_items = FrameItems::FULL;
        Ok(id)
    }

    /// Create, register and declare an integration frame
    pub fn add_integ_frame(&mut self, name: &str, parent: Option<FrameId>, state: RefFrameState) -> Result<FrameId> {
        let id = self.add_ref_frame(name, parent, state)?;
        self.frames.add_integ_frame(id)?;
        log::debug!("Added integration frame {}", name);
        Ok(id)
    }

    pub fn find_ref_frame(&self, name: &str) -> Option<FrameId> {
        self.frames.find_ref_frame(name)
    }

    pub fn find_integ_frame(&self, name: &str) -> Option<FrameId> {
        self.frames.find_integ_frame(name)
    }

    pub fn is_integ_frame(&self, frame: FrameId) -> bool {
        self.frames.is_integ_frame(frame)
    }

    pub fn subscribe_to_frame(&mut self, frame: FrameId) {
        self.frames.subscribe_to_frame(frame);
    }

    pub fn unsubscribe_from_frame(&mut self, frame: FrameId) {
        self.frames.unsubscribe_from_frame(frame);
    }

    fn add_body_frame(&mut self, body: BodyId, name: &str, point: PointRef, integ_frame: FrameId) -> Result<FrameId> {
        let id = self.frames.add_frame(name);
        self.frames.add_ref_frame(id)?;
        self.frames.add_child(integ_frame, id)?;
        let frame = &mut self.frames[id];
        frame.owner = Some(body);
        frame.mass_point = Some(point);
        Ok(id)
    }

    /// Create a body and register `<name>.structure`, `<name>.core_body` and
    /// `<name>.composite_body` under `integ_frame`
    pub fn add_body(&mut self, name: &str, core: MassProperties, integ_frame: FrameId) -> Result<BodyId> {
        if name.is_empty() {
            return Err(self.sink.fail(codes::INVALID_NAME, "Bodies must be named"));
        }
        if self.find_body(name).is_some() {
            let msg = format!("A body named '{}' already exists", name);
            return Err(self.sink.fail(codes::INVALID_NAME, &msg));
        }
        if !self.frames.is_integ_frame(integ_frame) {
            let msg = format!(
                "Frame '{}' is not an integration frame; cannot host body '{}'",
                self.frames.name(integ_frame),
                name
            );
            return Err(self.sink.fail(codes::INVALID_INTEG_FRAME, &msg));
        }

        let id = BodyId(self.bodies.len());
        let mass_body = self.mass.add_mass_body(name, core);
        self.mass[mass_body].dyn_owner = Some(id);

        let structure = self.add_body_frame(
            id,
            &format!("{}.structure", name),
            PointRef::new(mass_body, PointKind::StructureOrigin),
            integ_frame,
        )?;
        let core_body = self.add_body_frame(
            id,
            &format!("{}.core_body", name),
            PointRef::new(mass_body, PointKind::Core),
            integ_frame,
        )?;
        let composite_body = self.add_body_frame(
            id,
            &format!("{}.composite_body", name),
            PointRef::new(mass_body, PointKind::Composite),
            integ_frame,
        )?;

        self.bodies.push(DynBody::new(name, mass_body, [structure, core_body, composite_body], integ_frame));
        log::info!(
            "Added body {} (mass {:.3} kg) in {}",
            name,
            self.mass[mass_body].core_properties.mass,
            self.frames.name(integ_frame)
        );
        Ok(id)
    }

    /// Add a named point on the body's structure and a frame riding on it
    pub fn add_vehicle_point(&mut self, body: BodyId, point: MassPoint) -> Result<FrameId> {
        let mass_body = self.bodies[body.0].mass_body;
        self.add_vehicle_point_on(body, mass_body, point)
    }

    /// Root of the dynamic tree containing `body`
    pub fn root_of(&self, body: BodyId) -> BodyId {
        let mut current = body;
        while let Some(parent) = self.bodies[current.0].dyn_parent {
            current = parent;
        }
        current
    }

    /// Bodies in the tree rooted at `root`, parents before children
    pub fn tree_bodies(&self, root: BodyId) -> Vec<BodyId> {
        let mut order = vec![root];
        let mut next = 0;
        while next < order.len() {
            let current = order[next];
            order.extend_from_slice(&self.bodies[current.0].dyn_children);
            next += 1;
        }
        order
    }

    /// Whether `body` descends (strictly) from `ancestor` in the dynamic tree
    pub fn is_progeny_of(&self, body: BodyId, ancestor: BodyId) -> bool {
        let mut current = body;
        while let Some(parent) = self.bodies[current.0].dyn_parent {
            if parent == ancestor {
                return true;
            }
            current = parent;
        }
        false
    }

    /// Write components of one of the body's frames and make that frame their
    /// source
    ///
    /// The source is recorded on the root of the body's tree, since only the
    /// root's integrated state is authoritative. Returns false if the body
    /// does not own the frame.
    pub fn set_state(&mut self, body: BodyId, frame: FrameId, state: &RefFrameState, items: FrameItems) -> bool {
        if !self.bodies[body.0].owns_frame(frame) {
            let msg = format!(
                "Body '{}' does not own frame '{}'; state not set",
                self.bodies[body.0].name,
                self.frames.name(frame)
            );
            self.sink.error(codes::INVALID_FRAME_OWNER, &msg);
            return false;
        }

        let target = &mut self.frames[frame];
        for item in items.iter() {
            match item {
                StateItem::Position => target.state.trans.position = state.trans.position,
                StateItem::Velocity => target.state.trans.velocity = state.trans.velocity,
                StateItem::Attitude => target.state.rot.set_quaternion(*state.rot.q_parent_this()),
                StateItem::Rate => target.state.rot.set_ang_vel(*state.rot.ang_vel_this()),
            }
            target.initialized_items.add(item);
        }

        let root = self.root_of(body);
        for item in items.iter() {
            self.bodies[root.0].set_source(item, Some(frame));
        }
        log::debug!(
            "Set {:?} of {} as state source",
            items,
            self.frames.name(frame)
        );
        true
    }

    pub fn set_position(&mut self, body: BodyId, frame: FrameId, position: Vector3<f64>) -> bool {
        let mut state = RefFrameState::default();
        state.trans.position = position;
        self.set_state(body, frame, &state, FrameItems::POSITION)
    }

    pub fn set_velocity(&mut self, body: BodyId, frame: FrameId, velocity: Vector3<f64>) -> bool {
        let mut state = RefFrameState::default();
        state.trans.velocity = velocity;
        self.set_state(body, frame, &state, FrameItems::VELOCITY)
    }

    pub fn set_attitude(&mut self, body: BodyId, frame: FrameId, q_parent_this: UnitQuaternion<f64>) -> bool {
        let mut state = RefFrameState::default();
        state.rot.set_quaternion(q_parent_this);
        self.set_state(body, frame, &state, FrameItems::ATTITUDE)
    }

    pub fn set_rate(&mut self, body: BodyId, frame: FrameId, ang_vel_this: Vector3<f64>) -> bool {
        let mut state = RefFrameState::default();
        state.rot.set_ang_vel(ang_vel_this);
        self.set_state(body, frame, &state, FrameItems::RATE)
    }

    /// Choose which frame of a root body the integrator advances
    ///
    /// The tree is propagated first so the new frame starts from current state.
    pub fn set_integrated_frame(&mut self, body: BodyId, integrated: IntegratedFrame) -> Result<()> {
        let root = self.root_of(body);
        if root != body {
            let msg = format!(
                "Integrated frame of '{}' follows its root '{}'",
                self.bodies[body.0].name, self.bodies[root.0].name
            );
            self.sink.warn(codes::INVALID_INTEG_FRAME, &msg);
        }
        if self.bodies[root.0].integrated == integrated {
            return Ok(());
        }

        if self.bodies[root.0].has_state() {
            self.propagate_state(root)?;
        }
        let old_frame = self.bodies[root.0].integrated_frame();
        for id in self.tree_bodies(root) {
            self.bodies[id.0].integrated = integrated;
        }
        let new_frame = self.bodies[root.0].integrated_frame();
        for item in StateItem::resolution_order() {
            if self.bodies[root.0].source(*item) == Some(old_frame) {
                self.bodies[root.0].set_source(*item, Some(new_frame));
            }
        }
        self.reset_integrators(root);
        log::info!(
            "{} now integrates {}",
            self.bodies[root.0].name,
            self.frames.name(new_frame)
        );
        Ok(())
    }
}
