//! Arena-owned tree of reference frames and the name registry
//!
//! The [`FrameTree`] owns every frame. Edges are plain [`FrameId`] indices, and
//! the registry maps frame names to ids. Frame slots are never reused: a
//! removed frame is unlinked and unregistered but its id stays valid, so ids
//! handed out by a tree can always index it.

use std::collections::HashMap;
use std::ops::{Index, IndexMut};

use crate::body::BodyId;
use crate::diagnostics::{codes, SharedSink};
use crate::error::Result;
use crate::mass::PointRef;

use super::items::FrameItems;
use super::state::RefFrameState;

/// Index of a frame in its [`FrameTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(pub usize);

/// A node in the reference frame tree
#[derive(Debug, Clone)]
pub struct RefFrame {
    pub name: String,
    /// State relative to the parent frame
    pub state: RefFrameState,
    /// Components of `state` that hold meaningful values
    pub initialized_items: FrameItems,
    /// Body owning this frame, if any
    pub owner: Option<BodyId>,
    /// Mass point this frame rides on, if it belongs to a body
    pub mass_point: Option<PointRef>,
    /// Dynamic time (s) of the last state write
    pub timestamp: f64,
    parent: Option<FrameId>,
    children: Vec<FrameId>,
    registered: bool,
    removed: bool,
    subscriptions: u32,
}

impl RefFrame {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: RefFrameState::default(),
            initialized_items: FrameItems::EMPTY,
            owner: None,
            mass_point: None,
            timestamp: 0.0,
            parent: None,
            children: Vec::new(),
            registered: false,
            removed: false,
            subscriptions: 0,
        }
    }

    pub fn parent(&self) -> Option<FrameId> {
        self.parent
    }

    pub fn children(&self) -> &[FrameId] {
        &self.children
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }

    pub fn subscriptions(&self) -> u32 {
        self.subscriptions
    }
}

/// Owner of all reference frames
pub struct FrameTree {
    frames: Vec<RefFrame>,
    registry: HashMap<String, FrameId>,
    integ_frames: Vec<FrameId>,
    sink: SharedSink,
}

impl FrameTree {
    pub fn new(sink: SharedSink) -> Self {
        Self {
            frames: Vec::new(),
            registry: HashMap::new(),
            integ_frames: Vec::new(),
            sink,
        }
    }

    /// Create a new parentless, unregistered frame
    pub fn add_frame(&mut self, name: &str) -> FrameId {
        let id = FrameId(self.frames.len());
        self.frames.push(RefFrame::new(name));
        log::trace!("Created frame {} ({:?})", name, id);
        id
    }

    /// Number of frame slots (including removed ones)
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn name(&self, id: FrameId) -> &str {
        &self.frames[id.0].name
    }

    /// Make `child` a child of `parent`
    ///
    /// The child must not already have a parent; use [`FrameTree::reset_parent`]
    /// to move an attached frame.
    pub fn add_child(&mut self, parent: FrameId, child: FrameId) -> Result<()> {
        if let Some(existing) = self.frames[child.0].parent {
            let msg = format!(
                "Frame '{}' already has parent '{}'",
                self.name(child),
                self.name(existing)
            );
            return Err(self.sink.fail(codes::INVALID_NODE, &msg));
        }
        if parent == child || self.is_progeny_of(parent, child) {
            let msg = format!(
                "Adding '{}' under '{}' would create a cycle",
                self.name(child),
                self.name(parent)
            );
            return Err(self.sink.fail(codes::INVALID_NODE, &msg));
        }
        self.frames[child.0].parent = Some(parent);
        self.frames[parent.0].children.push(child);
        Ok(())
    }

    /// Replace the parent edge of `frame`
    ///
    /// Only the tree edge changes. The frame's state is left as is and must be
    /// recomputed by the caller to be relative to the new parent.
    pub fn reset_parent(&mut self, frame: FrameId, new_parent: FrameId) -> Result<()> {
        self.remove_from_parent(frame);
        self.add_child(new_parent, frame)
    }

    /// Cut the edge between `frame` and its parent
    pub fn remove_from_parent(&mut self, frame: FrameId) {
        if let Some(parent) = self.frames[frame.0].parent.take() {
            self.frames[parent.0].children.retain(|c| *c != frame);
        }
    }

    /// Unlink and unregister a frame; its children lose their parent
    pub fn remove_frame(&mut self, frame: FrameId) {
        self.remove_ref_frame(frame);
        self.remove_from_parent(frame);
        let children = std::mem::take(&mut self.frames[frame.0].children);
        for child in children {
            self.frames[child.0].parent = None;
        }
        self.frames[frame.0].removed = true;
    }

    /// Register a frame under its name
    pub fn add_ref_frame(&mut self, frame: FrameId) -> Result<()> {
        let name = self.frames[frame.0].name.clone();
        if name.is_empty() {
            return Err(self.sink.fail(codes::INVALID_NAME, "Cannot register an unnamed frame"));
        }
        match self.registry.get(&name) {
            Some(existing) if *existing == frame => Ok(()),
            Some(_) => {
                let msg = format!("A frame named '{}' is already registered", name);
                Err(self.sink.fail(codes::INVALID_NAME, &msg))
            }
            None => {
                self.registry.insert(name, frame);
                self.frames[frame.0].registered = true;
                Ok(())
            }
        }
    }

    /// Look up a registered frame by name
    pub fn find_ref_frame(&self, name: &str) -> Option<FrameId> {
        self.registry.get(name).copied()
    }

    /// Remove a frame from the registry; the tree edges are untouched
    pub fn remove_ref_frame(&mut self, frame: FrameId) {
        let entry = &mut self.frames[frame.0];
        if entry.registered {
            self.registry.remove(&entry.name);
            entry.registered = false;
            entry.subscriptions = 0;
            log::debug!("Unregistered frame {}", entry.name);
        }
    }

    pub fn subscribe_to_frame(&mut self, frame: FrameId) {
        self.frames[frame.0].subscriptions += 1;
    }

    pub fn unsubscribe_from_frame(&mut self, frame: FrameId) {
        let entry = &mut self.frames[frame.0];
        entry.subscriptions = entry.subscriptions.saturating_sub(1);
    }

    /// Declare a registered frame usable as an integration frame
    pub fn add_integ_frame(&mut self, frame: FrameId) -> Result<()> {
        self.add_ref_frame(frame)?;
        if !self.integ_frames.contains(&frame) {
            self.integ_frames.push(frame);
        }
        Ok(())
    }

    /// Look up an integration frame by name
    pub fn find_integ_frame(&self, name: &str) -> Option<FrameId> {
        self.find_ref_frame(name).filter(|id| self.is_integ_frame(*id))
    }

    pub fn is_integ_frame(&self, frame: FrameId) -> bool {
        self.integ_frames.contains(&frame)
    }

    /// Frames from `frame` up to its root, `frame` first
    pub fn path_to_root(&self, frame: FrameId) -> Vec<FrameId> {
        let mut path = vec![frame];
        let mut current = frame;
        while let Some(parent) = self.frames[current.0].parent {
            path.push(parent);
            current = parent;
        }
        path
    }

    pub fn root_of(&self, frame: FrameId) -> FrameId {
        let mut current = frame;
        while let Some(parent) = self.frames[current.0].parent {
            current = parent;
        }
        current
    }

    /// Whether `frame` descends (strictly) from `ancestor`
    pub fn is_progeny_of(&self, frame: FrameId, ancestor: FrameId) -> bool {
        let mut current = frame;
        while let Some(parent) = self.frames[current.0].parent {
            if parent == ancestor {
                return true;
            }
            current = parent;
        }
        false
    }

    /// Nearest frame that is an ancestor of (or equal to) both frames
    pub fn common_ancestor(&self, a: FrameId, b: FrameId) -> Option<FrameId> {
        let path_a = self.path_to_root(a);
        let mut current = Some(b);
        while let Some(frame) = current {
            if path_a.contains(&frame) {
                return Some(frame);
            }
            current = self.frames[frame.0].parent;
        }
        None
    }

    /// State of `frame` relative to one of its ancestors
    fn state_in_ancestor(&self, frame: FrameId, ancestor: FrameId) -> RefFrameState {
        let mut state = RefFrameState::default();
        // Compose root-to-leaf, skipping the ancestor itself
        let path = self.path_to_root(frame);
        for id in path.iter().rev().skip_while(|id| **id != ancestor).skip(1) {
            state = state.compose(&self.frames[id.0].state);
        }
        state
    }

    /// State of `subject` relative to `target`
    ///
    /// Walks both ancestries to the nearest common ancestor. Frames that share
    /// no ancestor cannot be related and the request is fatal.
    pub fn compute_relative_state(&self, subject: FrameId, target: FrameId) -> Result<RefFrameState> {
        if subject == target {
            return Ok(RefFrameState::default());
        }
        let ancestor = self.common_ancestor(subject, target).ok_or_else(|| {
            let msg = format!(
                "Frames '{}' and '{}' have no common ancestor",
                self.name(subject),
                self.name(target)
            );
            self.sink.fail(codes::INVALID_NODE, &msg)
        })?;

        let subject_state = self.state_in_ancestor(subject, ancestor);
        if target == ancestor {
            return Ok(subject_state);
        }
        let target_state = self.state_in_ancestor(target, ancestor);
        Ok(subject_state.relative_to(&target_state))
    }
}

impl Index<FrameId> for FrameTree {
    type Output = RefFrame;

    fn index(&self, id: FrameId) -> &Self::Output {
        &self.frames[id.0]
    }
}

impl IndexMut<FrameId> for FrameTree {
    fn index_mut(&mut self, id: FrameId) -> &mut Self::Output {
        &mut self.frames[id.0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{LogSink, RecordingSink, Severity};
    use crate::frame::RefFrameRot;
    use approx::assert_relative_eq;
    use nalgebra::{UnitQuaternion, Vector3};

    fn planet_tree() -> (FrameTree, FrameId, FrameId, FrameId) {
        let mut tree = FrameTree::new(LogSink::shared());
        let inertial = tree.add_frame("Earth.inertial");
        let vehicle = tree.add_frame("vehicle");
        let sensor = tree.add_frame("sensor");
        tree.add_child(inertial, vehicle).unwrap();
        tree.add_child(vehicle, sensor).unwrap();

        tree[vehicle].state.trans.position = Vector3::new(7.0e6, 0.0, 0.0);
        tree[vehicle].state.trans.velocity = Vector3::new(0.0, 7.5e3, 0.0);
        tree[vehicle].state.rot = RefFrameRot::from_quaternion(UnitQuaternion::from_euler_angles(
            0.0,
            0.0,
            std::f64::consts::FRAC_PI_2,
        ));
        tree[sensor].state.trans.position = Vector3::new(1.0, 0.0, 0.0);
        (tree, inertial, vehicle, sensor)
    }

    #[test]
    fn test_relative_state_through_ancestry() {
        let (tree, inertial, _vehicle, sensor) = planet_tree();
        let state = tree.compute_relative_state(sensor, inertial).unwrap();

        // Vehicle x axis points along inertial y after a 90 deg yaw
        assert_relative_eq!(state.trans.position, Vector3::new(7.0e6, 1.0, 0.0), epsilon = 1e-6);
        assert_relative_eq!(state.trans.velocity, Vector3::new(0.0, 7.5e3, 0.0), epsilon = 1e-9);
    }

    #[test]
    fn test_relative_state_between_siblings() {
        let (mut tree, inertial, vehicle, sensor) = planet_tree();
        let other = tree.add_frame("other");
        tree.add_child(inertial, other).unwrap();
        tree[other].state.trans.position = Vector3::new(7.0e6, 5.0, 0.0);

        let state = tree.compute_relative_state(sensor, other).unwrap();
        assert_relative_eq!(state.trans.position, Vector3::new(0.0, -4.0, 0.0), epsilon = 1e-6);

        let back = tree.compute_relative_state(vehicle, vehicle).unwrap();
        assert_eq!(back, RefFrameState::default());
    }

    #[test]
    fn test_no_common_ancestor_is_fatal() {
        let (recorder, sink) = RecordingSink::shared();
        let mut tree = FrameTree::new(sink);
        let a = tree.add_frame("a");
        let b = tree.add_frame("b");

        let err = tree.compute_relative_state(a, b).unwrap_err();
        assert!(err.is_fatal_code(codes::INVALID_NODE));
        assert_eq!(recorder.count(Severity::Fail), 1);
    }

    #[test]
    fn test_reset_parent_keeps_state() {
        let (mut tree, inertial, vehicle, sensor) = planet_tree();
        let before = tree[sensor].state;
        tree.reset_parent(sensor, inertial).unwrap();

        assert_eq!(tree[sensor].parent(), Some(inertial));
        assert!(!tree[vehicle].children().contains(&sensor));
        assert_eq!(tree[sensor].state, before);
    }

    #[test]
    fn test_cycle_and_double_parent_rejected() {
        let (mut tree, inertial, vehicle, _sensor) = planet_tree();
        assert!(tree.add_child(vehicle, inertial).is_err());
        let loose = tree.add_frame("loose");
        tree.add_child(vehicle, loose).unwrap();
        assert!(tree.add_child(inertial, loose).is_err());
    }

    #[test]
    fn test_registry_lifecycle() {
        let (mut tree, inertial, vehicle, _sensor) = planet_tree();
        tree.add_integ_frame(inertial).unwrap();
        tree.add_ref_frame(vehicle).unwrap();

        assert_eq!(tree.find_integ_frame("Earth.inertial"), Some(inertial));
        assert_eq!(tree.find_integ_frame("vehicle"), None);
        assert_eq!(tree.find_ref_frame("vehicle"), Some(vehicle));

        let dup = tree.add_frame("vehicle");
        assert!(tree.add_ref_frame(dup).is_err());

        tree.subscribe_to_frame(vehicle);
        assert_eq!(tree[vehicle].subscriptions(), 1);
        tree.remove_frame(vehicle);
        assert_eq!(tree.find_ref_frame("vehicle"), None);
        assert!(tree[vehicle].is_removed());
        assert!(!tree[inertial].children().contains(&vehicle));
    }
}
