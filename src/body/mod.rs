//! Dynamic bodies and the multi-body state-propagation engine
//!
//! A [`DynBody`] owns three frames riding on its mass body: the structural
//! frame, the core body frame (its own center of mass) and the composite body
//! frame (center of mass of everything attached below it). Bodies attach into
//! trees. Only the root of a tree is integrated; every other frame in the tree
//! is derived from the root's integrated frame by [`DynManager::propagate_state`].
//!
//! All body frames are direct children of the integration frame of their tree,
//! so each frame's state is its inertial state.
//!
//! The manager's operations are split by concern:
//!
//! - [`manager`]: construction, registry and state setters
//! - [`propagation`]: integrated-state resolution and the propagation walk
//! - [`attach`]: attach/detach and frame re-rooting
//! - [`integrate`]: per-body integrator coordination

pub mod attach;
pub mod integrate;
pub mod kernels;
pub mod manager;
pub mod propagation;

pub use integrate::BodyDerivatives;
pub use manager::DynManager;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::frame::{FrameId, FrameItems, RefFrameState, StateItem};
use crate::integration::{IntegratorResult, IntegratorResultMerger, RotationalTechnique, SecondOrderOdeIntegrator};
use crate::mass::{MassBodyId, PointRef, RefPointTransform};

/// Index of a body in its [`DynManager`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BodyId(pub usize);

/// Which body frame the integrator advances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntegratedFrame {
    Structure,
    Composite,
}

/// Rigid pin of a root body to an arbitrary frame
#[derive(Debug, Clone, Copy)]
pub struct FrameAttachment {
    /// Frame the body is pinned to
    pub parent: FrameId,
    /// State of the body's structure frame relative to `parent`
    pub offset: RefFrameState,
}

/// Last point-to-point transform used when resolving a state source
#[derive(Debug, Clone, Copy)]
pub(crate) struct RefPointMemo {
    pub from: PointRef,
    pub to: PointRef,
    pub transform: RefPointTransform,
}

/// A rigid body in the vehicle tree
pub struct DynBody {
    pub name: String,
    pub structure: FrameId,
    pub core_body: FrameId,
    pub composite_body: FrameId,
    pub mass_body: MassBodyId,
    /// Frames riding on named mass points
    pub vehicle_points: Vec<FrameId>,
    /// Translation only; no rotational integrator is built
    pub three_dof: bool,
    pub rotational_technique: RotationalTechnique,
    /// Components of the integrated frame that are known
    pub initialized_states: FrameItems,

    integrated: IntegratedFrame,
    integ_frame: FrameId,
    position_source: Option<FrameId>,
    velocity_source: Option<FrameId>,
    attitude_source: Option<FrameId>,
    rate_source: Option<FrameId>,
    dyn_parent: Option<BodyId>,
    dyn_children: Vec<BodyId>,
    frame_attachment: Option<FrameAttachment>,
    last_ref_point: Option<RefPointMemo>,
    trans_integ: Option<Box<dyn SecondOrderOdeIntegrator>>,
    rot_integ: Option<Box<dyn SecondOrderOdeIntegrator>>,
    integ_results_merger: IntegratorResultMerger,
    /// Results of integrators that already finished the current cycle
    /// (translational, rotational)
    cycle_results: [Option<IntegratorResult>; 2],
}

impl fmt::Debug for DynBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynBody")
            .field("name", &self.name)
            .field("integrated", &self.integrated)
            .field("initialized_states", &self.initialized_states)
            .field("dyn_parent", &self.dyn_parent)
            .field("dyn_children", &self.dyn_children)
            .field("three_dof", &self.three_dof)
            .finish()
    }
}

impl DynBody {
    pub(crate) fn new(
        name: &str,
        mass_body: MassBodyId,
        frames: [FrameId; 3],
        integ_frame: FrameId,
    ) -> Self {
        let [structure, core_body, composite_body] = frames;
        Self {
            name: name.to_string(),
            structure,
            core_body,
            composite_body,
            mass_body,
            vehicle_points: Vec::new(),
            three_dof: false,
            rotational_technique: RotationalTechnique::GeneralizedDerivative,
            initialized_states: FrameItems::EMPTY,
            integrated: IntegratedFrame::Composite,
            integ_frame,
            position_source: None,
            velocity_source: None,
            attitude_source: None,
            rate_source: None,
            dyn_parent: None,
            dyn_children: Vec::new(),
            frame_attachment: None,
            last_ref_point: None,
            trans_integ: None,
            rot_integ: None,
            integ_results_merger: IntegratorResultMerger::default(),
            cycle_results: [None, None],
        }
    }

    pub fn dyn_parent(&self) -> Option<BodyId> {
        self.dyn_parent
    }

    pub fn dyn_children(&self) -> &[BodyId] {
        &self.dyn_children
    }

    pub fn is_root(&self) -> bool {
        self.dyn_parent.is_none()
    }

    pub fn integ_frame(&self) -> FrameId {
        self.integ_frame
    }

    pub fn integrated(&self) -> IntegratedFrame {
        self.integrated
    }

    /// Frame advanced by the integrator
    pub fn integrated_frame(&self) -> FrameId {
        match self.integrated {
            IntegratedFrame::Structure => self.structure,
            IntegratedFrame::Composite => self.composite_body,
        }
    }

    pub fn frame_attachment(&self) -> Option<&FrameAttachment> {
        self.frame_attachment.as_ref()
    }

    pub fn has_integrators(&self) -> bool {
        self.trans_integ.is_some() && (self.three_dof || self.rot_integ.is_some())
    }

    /// Frame currently holding the authoritative value of `item`
    pub fn source(&self, item: StateItem) -> Option<FrameId> {
        match item {
            StateItem::Position => self.position_source,
            StateItem::Velocity => self.velocity_source,
            StateItem::Attitude => self.attitude_source,
            StateItem::Rate => self.rate_source,
        }
    }

    /// Whether any state is known or waiting in a source frame
    pub fn has_state(&self) -> bool {
        !self.initialized_states.is_empty()
            || StateItem::resolution_order()
                .iter()
                .any(|&item| self.source(item).is_some())
    }

    pub(crate) fn set_source(&mut self, item: StateItem, frame: Option<FrameId>) {
        let slot = match item {
            StateItem::Position => &mut self.position_source,
            StateItem::Velocity => &mut self.velocity_source,
            StateItem::Attitude => &mut self.attitude_source,
            StateItem::Rate => &mut self.rate_source,
        };
        *slot = frame;
    }

    /// Frames this body owns, body frames first
    pub fn frames(&self) -> Vec<FrameId> {
        let mut frames = vec![self.structure, self.core_body, self.composite_body];
        frames.extend_from_slice(&self.vehicle_points);
        frames
    }

    pub fn owns_frame(&self, frame: FrameId) -> bool {
        frame == self.structure
            || frame == self.core_body
            || frame == self.composite_body
            || self.vehicle_points.contains(&frame)
    }
}
