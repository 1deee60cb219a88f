//! Mass tree: rigid attachment topology and composite mass properties
//!
//! The mass tree mirrors the legal attachment topology of the vehicle. It is
//! kept independent of the live frame wiring so that relative placements of
//! any two points can be computed even while frames are being relinked.

use std::ops::{Index, IndexMut};

use nalgebra::{Matrix3, Vector3};

use crate::body::BodyId;
use crate::diagnostics::{codes, SharedSink};
use crate::error::Result;

use super::properties::{parallel_axis, MassPoint, MassProperties, RefPointTransform};

/// Index of a mass body in its [`MassTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MassBodyId(pub usize);

/// Which point on a mass body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointKind {
    /// Origin of the structural frame
    StructureOrigin,
    /// Center of mass of the body alone
    Core,
    /// Center of mass of the body and everything attached below it
    Composite,
    /// User point, index into the body's point list
    Named(usize),
}

/// A point on a specific mass body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PointRef {
    pub body: MassBodyId,
    pub kind: PointKind,
}

impl PointRef {
    pub fn new(body: MassBodyId, kind: PointKind) -> Self {
        Self { body, kind }
    }
}

/// A rigid body in the mass tree
#[derive(Debug, Clone)]
pub struct MassBody {
    pub name: String,
    /// Properties of this body alone
    pub core_properties: MassProperties,
    /// Properties of this body plus all attached children
    pub composite_properties: MassProperties,
    /// Placement of this body's structure in the parent's structure
    pub structure_point: MassPoint,
    /// User points on this body's structure
    pub points: Vec<MassPoint>,
    /// Dynamic body owning this mass body, if any
    pub dyn_owner: Option<BodyId>,
    parent: Option<MassBodyId>,
    children: Vec<MassBodyId>,
}

impl MassBody {
    pub fn parent(&self) -> Option<MassBodyId> {
        self.parent
    }

    pub fn children(&self) -> &[MassBodyId] {
        &self.children
    }

    /// Location and orientation of a point in this body's structure axes
    pub fn point_placement(&self, kind: PointKind) -> Option<(Vector3<f64>, Matrix3<f64>)> {
        match kind {
            PointKind::StructureOrigin => Some((Vector3::zeros(), Matrix3::identity())),
            PointKind::Core => Some((self.core_properties.position, self.core_properties.t_struct_body)),
            PointKind::Composite => Some((
                self.composite_properties.position,
                self.composite_properties.t_struct_body,
            )),
            PointKind::Named(index) => self.points.get(index).map(|p| (p.position, p.t_parent_this)),
        }
    }
}

/// Owner of all mass bodies
pub struct MassTree {
    bodies: Vec<MassBody>,
    sink: SharedSink,
}

impl MassTree {
    pub fn new(sink: SharedSink) -> Self {
        Self {
            bodies: Vec::new(),
            sink,
        }
    }

    pub fn add_mass_body(&mut self, name: &str, core: MassProperties) -> MassBodyId {
        let id = MassBodyId(self.bodies.len());
        self.bodies.push(MassBody {
            name: name.to_string(),
            composite_properties: core.clone(),
            core_properties: core,
            structure_point: MassPoint::aligned(&format!("{}.attach", name), Vector3::zeros()),
            points: Vec::new(),
            dyn_owner: None,
            parent: None,
            children: Vec::new(),
        });
        id
    }

    /// Add a user point to a body and return a reference to it
    pub fn add_mass_point(&mut self, body: MassBodyId, point: MassPoint) -> PointRef {
        let points = &mut self.bodies[body.0].points;
        points.push(point);
        PointRef::new(body, PointKind::Named(points.len() - 1))
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    /// Attach `child` below `parent`, placing the child's structure at `offset`
    /// in the parent's structure frame
    pub fn attach(&mut self, child: MassBodyId, parent: MassBodyId, offset: MassPoint) -> Result<()> {
        if let Some(existing) = self.bodies[child.0].parent {
            let msg = format!(
                "Mass body '{}' is already attached to '{}'",
                self.bodies[child.0].name, self.bodies[existing.0].name
            );
            return Err(self.sink.fail(codes::MASS_TREE, &msg));
        }
        if child == parent || self.is_progeny_of(parent, child) {
            let msg = format!(
                "Attaching '{}' to '{}' would create a cycle",
                self.bodies[child.0].name, self.bodies[parent.0].name
            );
            return Err(self.sink.fail(codes::MASS_TREE, &msg));
        }

        self.bodies[child.0].structure_point = offset;
        self.bodies[child.0].parent = Some(parent);
        self.bodies[parent.0].children.push(child);
        let root = self.root_of(parent);
        self.update_mass_properties(root);
        Ok(())
    }

    /// Sever the link between `child` and its parent
    pub fn detach(&mut self, child: MassBodyId) -> Result<MassBodyId> {
        let parent = self.bodies[child.0].parent.ok_or_else(|| {
            let msg = format!("Mass body '{}' is not attached", self.bodies[child.0].name);
            self.sink.fail(codes::MASS_TREE, &msg)
        })?;

        let siblings = &mut self.bodies[parent.0].children;
        let before = siblings.len();
        siblings.retain(|c| *c != child);
        if siblings.len() == before {
            let msg = format!(
                "Mass body '{}' names '{}' as parent but is not among its children",
                self.bodies[child.0].name, self.bodies[parent.0].name
            );
            return Err(self.sink.fail(codes::MASS_TREE, &msg));
        }
        self.bodies[child.0].parent = None;

        let root = self.root_of(parent);
        self.update_mass_properties(root);
        self.update_mass_properties(child);
        Ok(parent)
    }

    /// Bodies from `body` up to its root, `body` first
    pub fn path_to_root(&self, body: MassBodyId) -> Vec<MassBodyId> {
        let mut path = vec![body];
        let mut current = body;
        while let Some(parent) = self.bodies[current.0].parent {
            path.push(parent);
            current = parent;
        }
        path
    }

    pub fn root_of(&self, body: MassBodyId) -> MassBodyId {
        let mut current = body;
        while let Some(parent) = self.bodies[current.0].parent {
            current = parent;
        }
        current
    }

    /// Whether `body` descends (strictly) from `ancestor`
    pub fn is_progeny_of(&self, body: MassBodyId, ancestor: MassBodyId) -> bool {
        self.path_to_root(body).iter().skip(1).any(|b| *b == ancestor)
    }

    /// All bodies in the subtree rooted at `body`, parents before children
    pub fn subtree(&self, body: MassBodyId) -> Vec<MassBodyId> {
        let mut order = vec![body];
        let mut next = 0;
        while next < order.len() {
            let current = order[next];
            order.extend_from_slice(&self.bodies[current.0].children);
            next += 1;
        }
        order
    }

    /// Recompute composite properties for every body in the subtree of `body`
    pub fn update_mass_properties(&mut self, body: MassBodyId) {
        let children = self.bodies[body.0].children.clone();
        for child in &children {
            self.update_mass_properties(*child);
        }

        let core = &self.bodies[body.0].core_properties;
        let mut mass = core.mass;
        let mut moment = core.mass * core.position;
        // (mass, CoM in this structure, inertia about own CoM in this structure axes)
        let mut parts = vec![(core.mass, core.position, core.inertia_in_structure())];

        for child in &children {
            let c = &self.bodies[child.0];
            let t_off = c.structure_point.t_parent_this.transpose();
            let position = c.structure_point.position + t_off * c.composite_properties.position;
            let inertia = t_off * c.composite_properties.inertia_in_structure() * t_off.transpose();
            mass += c.composite_properties.mass;
            moment += c.composite_properties.mass * position;
            parts.push((c.composite_properties.mass, position, inertia));
        }

        let cm = if mass > 0.0 { moment / mass } else { core.position };
        let mut inertia = Matrix3::zeros();
        for (m, position, part_inertia) in &parts {
            inertia += parallel_axis(part_inertia, *m, &(position - cm));
        }

        let t_struct_body = core.t_struct_body;
        let composite = &mut self.bodies[body.0].composite_properties;
        composite.mass = mass;
        composite.position = cm;
        composite.t_struct_body = t_struct_body;
        composite.inertia = t_struct_body * inertia * t_struct_body.transpose();
    }

    /// Placement of `body`'s structure in the structure of one of its ancestors
    fn structure_in_ancestor(&self, body: MassBodyId, ancestor: MassBodyId) -> (Vector3<f64>, Matrix3<f64>) {
        let mut position = Vector3::zeros();
        let mut t_anc_this = Matrix3::identity();
        let path = self.path_to_root(body);
        for id in path.iter().rev().skip_while(|id| **id != ancestor).skip(1) {
            let offset = &self.bodies[id.0].structure_point;
            position += t_anc_this.transpose() * offset.position;
            t_anc_this = offset.t_parent_this * t_anc_this;
        }
        (position, t_anc_this)
    }

    /// Placement of a point in the structure axes of an ancestor body
    fn point_in_ancestor(&self, point: PointRef, ancestor: MassBodyId) -> Result<(Vector3<f64>, Matrix3<f64>)> {
        let (local_pos, t_str_point) = self.bodies[point.body.0]
            .point_placement(point.kind)
            .ok_or_else(|| {
                let msg = format!(
                    "Mass body '{}' has no point {:?}",
                    self.bodies[point.body.0].name, point.kind
                );
                self.sink.fail(codes::MASS_TREE, &msg)
            })?;
        let (str_pos, t_anc_str) = self.structure_in_ancestor(point.body, ancestor);
        Ok((str_pos + t_anc_str.transpose() * local_pos, t_str_point * t_anc_str))
    }

    /// Placement of `to` relative to `from`
    ///
    /// Both points must live in the same mass tree.
    pub fn compute_point_transform(&self, from: PointRef, to: PointRef) -> Result<RefPointTransform> {
        let from_path = self.path_to_root(from.body);
        let ancestor = self
            .path_to_root(to.body)
            .into_iter()
            .find(|b| from_path.contains(b))
            .ok_or_else(|| {
                let msg = format!(
                    "Mass bodies '{}' and '{}' are not in the same tree",
                    self.bodies[from.body.0].name, self.bodies[to.body.0].name
                );
                self.sink.fail(codes::MASS_TREE, &msg)
            })?;

        let (r_from, t_anc_from) = self.point_in_ancestor(from, ancestor)?;
        let (r_to, t_anc_to) = self.point_in_ancestor(to, ancestor)?;
        Ok(RefPointTransform::new(
            t_anc_from * (r_to - r_from),
            t_anc_to * t_anc_from.transpose(),
        ))
    }
}

impl Index<MassBodyId> for MassTree {
    type Output = MassBody;

    fn index(&self, id: MassBodyId) -> &Self::Output {
        &self.bodies[id.0]
    }
}

impl IndexMut<MassBodyId> for MassTree {
    fn index_mut(&mut self, id: MassBodyId) -> &mut Self::Output {
        &mut self.bodies[id.0]
    }
}
