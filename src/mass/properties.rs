//! Mass properties and structural points

use nalgebra::{Matrix3, UnitQuaternion, Vector3};

use crate::frame::RefFrameRot;

/// A point fixed on a body's structure
///
/// Position and orientation are expressed in the body's structural frame.
#[derive(Debug, Clone, PartialEq)]
pub struct MassPoint {
    pub name: String,
    /// Point location in structure axes (m)
    pub position: Vector3<f64>,
    /// Transformation from structure axes to point axes
    pub t_parent_this: Matrix3<f64>,
}

impl MassPoint {
    pub fn new(name: &str, position: Vector3<f64>, t_parent_this: Matrix3<f64>) -> Self {
        Self {
            name: name.to_string(),
            position,
            t_parent_this,
        }
    }

    /// Point at `position` aligned with the structure axes
    pub fn aligned(name: &str, position: Vector3<f64>) -> Self {
        Self::new(name, position, Matrix3::identity())
    }

    /// Point oriented by a left quaternion
    pub fn with_quaternion(name: &str, position: Vector3<f64>, q_parent_this: UnitQuaternion<f64>) -> Self {
        let rot = RefFrameRot::from_quaternion(q_parent_this);
        Self::new(name, position, *rot.t_parent_this())
    }
}

/// Mass, center of mass and inertia of a body or assembly
#[derive(Debug, Clone, PartialEq)]
pub struct MassProperties {
    /// Mass (kg)
    pub mass: f64,
    /// Center of mass in structure axes (m)
    pub position: Vector3<f64>,
    /// Transformation from structure axes to body axes
    pub t_struct_body: Matrix3<f64>,
    /// Inertia tensor about the center of mass, body axes (kg·m²)
    pub inertia: Matrix3<f64>,
}

impl Default for MassProperties {
    fn default() -> Self {
        Self {
            mass: 0.0,
            position: Vector3::zeros(),
            t_struct_body: Matrix3::identity(),
            inertia: Matrix3::zeros(),
        }
    }
}

impl MassProperties {
    /// Body with the center of mass at `position`, body axes aligned with structure
    pub fn new(mass: f64, position: Vector3<f64>, inertia: Matrix3<f64>) -> Self {
        Self {
            mass,
            position,
            t_struct_body: Matrix3::identity(),
            inertia,
        }
    }

    /// Uniform solid sphere of the given radius centred at `position`
    pub fn sphere(mass: f64, radius: f64, position: Vector3<f64>) -> Self {
        let i = 0.4 * mass * radius * radius;
        Self::new(mass, position, Matrix3::from_diagonal_element(i))
    }

    /// Inertia about the center of mass, expressed in structure axes
    pub fn inertia_in_structure(&self) -> Matrix3<f64> {
        self.t_struct_body.transpose() * self.inertia * self.t_struct_body
    }

    /// The center of mass as a structural point
    pub fn as_point(&self, name: &str) -> MassPoint {
        MassPoint::new(name, self.position, self.t_struct_body)
    }
}

/// Parallel axis shift of an inertia tensor by displacement `d` from the CoM
pub fn parallel_axis(inertia: &Matrix3<f64>, mass: f64, d: &Vector3<f64>) -> Matrix3<f64> {
    inertia + mass * (Matrix3::from_diagonal_element(d.norm_squared()) - d * d.transpose())
}

/// Relative placement of one point with respect to another
///
/// `position` is the location of the second point expressed in the first
/// point's axes, `t_parent_this` rotates first-point axes into second-point
/// axes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefPointTransform {
    pub position: Vector3<f64>,
    pub q_parent_this: UnitQuaternion<f64>,
    pub t_parent_this: Matrix3<f64>,
}

impl Default for RefPointTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl RefPointTransform {
    pub fn identity() -> Self {
        Self {
            position: Vector3::zeros(),
            q_parent_this: UnitQuaternion::identity(),
            t_parent_this: Matrix3::identity(),
        }
    }

    pub fn new(position: Vector3<f64>, t_parent_this: Matrix3<f64>) -> Self {
        let rot = RefFrameRot::from_transform(t_parent_this);
        Self {
            position,
            q_parent_this: *rot.q_parent_this(),
            t_parent_this,
        }
    }
}
