//! Generalized second-order ODE descriptions
//!
//! A body's translational state is a plain second-order system: the position
//! derivative is the velocity. Rotational state is "generalized": the position
//! is an attitude quaternion (4 elements) while the velocity is an angular
//! rate (3 elements), so advancing the position needs either a derivative
//! function or a Lie-group step function.

use serde::{Deserialize, Serialize};

/// Computes the time derivative of a generalized position
pub type PositionDerivativeFn = fn(position: &[f64], velocity: &[f64], derivative: &mut [f64]);

/// Advances a generalized position by a generalized displacement `dtheta`
/// (velocity times time)
pub type PositionStepFn = fn(position: &[f64], dtheta: &[f64], stepped: &mut [f64]);

/// How rotational state is advanced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RotationalTechnique {
    /// Integrate the quaternion time derivative as a Cartesian quantity
    GeneralizedDerivative,
    /// Advance the quaternion with an exponential-map step
    GeneralizedStep,
}

impl RotationalTechnique {
    pub fn name(&self) -> &'static str {
        match self {
            Self::GeneralizedDerivative => "generalized derivative",
            Self::GeneralizedStep => "generalized step",
        }
    }

    pub fn all() -> &'static [RotationalTechnique] {
        &[
            RotationalTechnique::GeneralizedDerivative,
            RotationalTechnique::GeneralizedStep,
        ]
    }
}

/// How the position part of a second-order system evolves
#[derive(Clone, Copy)]
pub enum GeneralizedPosition {
    /// Position derivative equals velocity
    Cartesian,
    /// Position derivative given by a function of position and velocity
    Derivative(PositionDerivativeFn),
    /// Position advanced by a step function
    Step(PositionStepFn),
}

impl std::fmt::Debug for GeneralizedPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cartesian => write!(f, "Cartesian"),
            Self::Derivative(_) => write!(f, "Derivative"),
            Self::Step(_) => write!(f, "Step"),
        }
    }
}

/// Shape of a second-order system handed to an integrator
#[derive(Debug, Clone, Copy)]
pub struct SecondOrderOde {
    pub position_size: usize,
    pub velocity_size: usize,
    pub kind: GeneralizedPosition,
}

impl SecondOrderOde {
    /// Plain system of the given dimension
    pub fn cartesian(size: usize) -> Self {
        Self {
            position_size: size,
            velocity_size: size,
            kind: GeneralizedPosition::Cartesian,
        }
    }

    pub fn with_derivative(position_size: usize, velocity_size: usize, f: PositionDerivativeFn) -> Self {
        Self {
            position_size,
            velocity_size,
            kind: GeneralizedPosition::Derivative(f),
        }
    }

    pub fn with_step(position_size: usize, velocity_size: usize, f: PositionStepFn) -> Self {
        Self {
            position_size,
            velocity_size,
            kind: GeneralizedPosition::Step(f),
        }
    }

    /// Size of the equivalent first-order state `[position, velocity]`
    pub fn first_order_size(&self) -> usize {
        self.position_size + self.velocity_size
    }

    /// Whether this system can be recast as a first-order ODE
    pub fn has_first_order_form(&self) -> bool {
        !matches!(self.kind, GeneralizedPosition::Step(_))
    }

    /// Rate used to advance the position
    ///
    /// For Cartesian and derivative systems this is the position derivative;
    /// for step systems it is the velocity itself.
    pub fn position_rate(&self, position: &[f64], velocity: &[f64], rate: &mut [f64]) {
        match self.kind {
            GeneralizedPosition::Cartesian | GeneralizedPosition::Step(_) => {
                rate.copy_from_slice(velocity)
            }
            GeneralizedPosition::Derivative(f) => f(position, velocity, rate),
        }
    }

    /// Length of the vector returned by [`SecondOrderOde::position_rate`]
    pub fn position_rate_size(&self) -> usize {
        match self.kind {
            GeneralizedPosition::Derivative(_) => self.position_size,
            _ => self.velocity_size,
        }
    }

    /// `out = advance(start, h * rate)`
    pub fn advance_position(&self, start: &[f64], rate: &[f64], h: f64, out: &mut [f64]) {
        match self.kind {
            GeneralizedPosition::Cartesian | GeneralizedPosition::Derivative(_) => {
                for ((o, s), r) in out.iter_mut().zip(start).zip(rate) {
                    *o = s + h * r;
                }
            }
            GeneralizedPosition::Step(f) => {
                let dtheta: Vec<f64> = rate.iter().map(|r| h * r).collect();
                f(start, &dtheta, out);
            }
        }
    }

    /// First-order derivative `[position_rate, acceleration]`
    pub fn first_order_derivative(&self, position: &[f64], velocity: &[f64], accel: &[f64], ydot: &mut [f64]) {
        let (pos_part, vel_part) = ydot.split_at_mut(self.position_size);
        self.position_rate(position, velocity, pos_part);
        vel_part.copy_from_slice(accel);
    }

    /// Pack `[position, velocity]`
    pub fn pack(&self, position: &[f64], velocity: &[f64]) -> Vec<f64> {
        let mut y = Vec::with_capacity(self.first_order_size());
        y.extend_from_slice(position);
        y.extend_from_slice(velocity);
        y
    }

    /// Split a packed state back into position and velocity
    pub fn unpack(&self, y: &[f64], position: &mut [f64], velocity: &mut [f64]) {
        position.copy_from_slice(&y[..self.position_size]);
        velocity.copy_from_slice(&y[self.position_size..]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scaled_derivative(position: &[f64], velocity: &[f64], derivative: &mut [f64]) {
        for ((d, p), v) in derivative.iter_mut().zip(position).zip(velocity) {
            *d = 2.0 * v + 0.0 * p;
        }
    }

    #[test]
    fn test_first_order_derivative_layout() {
        let ode = SecondOrderOde::with_derivative(2, 2, scaled_derivative);
        let mut ydot = [0.0; 4];
        ode.first_order_derivative(&[1.0, 1.0], &[3.0, 4.0], &[-1.0, -2.0], &mut ydot);
        assert_eq!(ydot, [6.0, 8.0, -1.0, -2.0]);
        assert!(ode.has_first_order_form());
    }

    #[test]
    fn test_pack_unpack() {
        let ode = SecondOrderOde::cartesian(3);
        let y = ode.pack(&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0]);
        let mut p = [0.0; 3];
        let mut v = [0.0; 3];
        ode.unpack(&y, &mut p, &mut v);
        assert_eq!(p, [1.0, 2.0, 3.0]);
        assert_eq!(v, [4.0, 5.0, 6.0]);
    }
}
