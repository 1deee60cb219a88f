//! Mass tree
//!
//! A parallel hierarchy of rigid mass bodies and structural points. Each body
//! frame rides on exactly one mass point, and the relative placement of any two
//! points in the same tree can be computed without consulting the frame tree.

mod properties;
mod tree;

pub use properties::{parallel_axis, MassPoint, MassProperties, RefPointTransform};
pub use tree::{MassBody, MassBodyId, MassTree, PointKind, PointRef};
