//! Integrator traits and the Runge-Kutta 4 integrator
//!
//! Integrators are staged: each call supplies the acceleration at the state
//! the integrator last wrote and advances one stage. A call reports
//! `passed == true` once the whole step is complete. The body-level
//! coordinator owns the loop over stages; derivative evaluation happens
//! outside the integrator between calls.
//!
//! # Available Integrators
//!
//! - **Rk4**: classic four-stage Runge-Kutta, supports both rotational techniques
//! - **GaussJackson**: multistep predictor-corrector with RK4 priming
//! - **Lsode**: variable-order BDF solver with re-entrant stages

use crate::error::{DynError, Result};

use super::ode::{RotationalTechnique, SecondOrderOde};
use super::result::IntegratorResult;

/// A stateful integrator for one generalized second-order system
///
/// Implementations must be `Send` so bodies can be moved between threads
/// between runs.
pub trait SecondOrderOdeIntegrator: Send {
    /// Advance one stage of a step of size `dyn_dt`
    ///
    /// # Arguments
    /// * `dyn_dt` - Requested dynamic time step (s)
    /// * `target_stage` - Stage being completed, 0 starts a new step
    /// * `accel` - Acceleration at the current `position`/`velocity`
    /// * `velocity` - Generalized velocity, updated in place
    /// * `position` - Generalized position, updated in place
    fn integrate(
        &mut self,
        dyn_dt: f64,
        target_stage: u32,
        accel: &[f64],
        velocity: &mut [f64],
        position: &mut [f64],
    ) -> Result<IntegratorResult>;

    /// Discard all history; the next call starts from scratch
    fn reset(&mut self);

    /// Integrator name
    fn name(&self) -> &'static str;

    /// System this integrator was built for
    fn ode(&self) -> &SecondOrderOde;
}

/// Factory for integrators of one technique
pub trait IntegratorConstructor: Send + Sync {
    /// Technique name
    fn name(&self) -> &'static str;

    /// Whether rotational state can be integrated with `technique`
    fn supports(&self, technique: RotationalTechnique) -> bool;

    /// Create an integrator for an arbitrary generalized system
    fn create_integrator(&self, ode: SecondOrderOde) -> Result<Box<dyn SecondOrderOdeIntegrator>>;

    /// Create a translational (3-DOF Cartesian) integrator
    fn create_translational(&self) -> Result<Box<dyn SecondOrderOdeIntegrator>> {
        self.create_integrator(SecondOrderOde::cartesian(3))
    }

    /// Create a quaternion attitude integrator using `technique`
    fn create_rotational(&self, technique: RotationalTechnique) -> Result<Box<dyn SecondOrderOdeIntegrator>> {
        self.create_integrator(SecondOrderOde::rotational(technique))
    }
}

/// Stage-by-stage RK4 step of fixed size
///
/// Used on its own by [`Rk4Integrator`] and as the priming method of the
/// multistep integrators.
#[derive(Debug, Clone)]
pub struct Rk4Stepper {
    ode: SecondOrderOde,
    stage: u32,
    x0: Vec<f64>,
    v0: Vec<f64>,
    rates: Vec<Vec<f64>>,
    accels: Vec<Vec<f64>>,
}

impl Rk4Stepper {
    pub const STAGES: u32 = 4;

    pub fn new(ode: SecondOrderOde) -> Self {
        Self {
            x0: vec![0.0; ode.position_size],
            v0: vec![0.0; ode.velocity_size],
            rates: vec![vec![0.0; ode.position_rate_size()]; 4],
            accels: vec![vec![0.0; ode.velocity_size]; 4],
            stage: 0,
            ode,
        }
    }

    /// Stage the next call will complete
    pub fn stage(&self) -> u32 {
        self.stage
    }

    /// Abandon any partial step
    pub fn restart(&mut self) {
        self.stage = 0;
    }

    /// Complete the current stage of a step of size `h`
    ///
    /// Returns true when the step is complete, leaving the final state in
    /// `position`/`velocity`. Otherwise the intermediate state at which the
    /// next acceleration is needed is written.
    pub fn advance(&mut self, h: f64, accel: &[f64], velocity: &mut [f64], position: &mut [f64]) -> bool {
        let s = self.stage as usize;
        if s == 0 {
            self.x0.copy_from_slice(position);
            self.v0.copy_from_slice(velocity);
        }
        self.ode.position_rate(position, velocity, &mut self.rates[s]);
        self.accels[s].copy_from_slice(accel);

        let (scale, rate, acc) = match s {
            0 | 1 => (0.5, self.rates[s].clone(), self.accels[s].clone()),
            2 => (1.0, self.rates[s].clone(), self.accels[s].clone()),
            _ => (
                1.0,
                weighted(&self.rates),
                weighted(&self.accels),
            ),
        };

        self.ode.advance_position(&self.x0, &rate, scale * h, position);
        for ((v, v0), a) in velocity.iter_mut().zip(&self.v0).zip(&acc) {
            *v = v0 + scale * h * a;
        }

        if s == 3 {
            self.stage = 0;
            true
        } else {
            self.stage += 1;
            false
        }
    }
}

/// RK4 stage weights 1/6, 1/3, 1/3, 1/6
fn weighted(stages: &[Vec<f64>]) -> Vec<f64> {
    (0..stages[0].len())
        .map(|i| (stages[0][i] + 2.0 * stages[1][i] + 2.0 * stages[2][i] + stages[3][i]) / 6.0)
        .collect()
}

/// Classic fixed-step Runge-Kutta 4
pub struct Rk4Integrator {
    stepper: Rk4Stepper,
    ode: SecondOrderOde,
}

impl Rk4Integrator {
    pub fn new(ode: SecondOrderOde) -> Self {
        Self {
            stepper: Rk4Stepper::new(ode),
            ode,
        }
    }
}

impl SecondOrderOdeIntegrator for Rk4Integrator {
    fn integrate(
        &mut self,
        dyn_dt: f64,
        target_stage: u32,
        accel: &[f64],
        velocity: &mut [f64],
        position: &mut [f64],
    ) -> Result<IntegratorResult> {
        if target_stage == 0 {
            self.stepper.restart();
        } else if target_stage != self.stepper.stage() {
            return Err(DynError::Integration {
                integrator: self.name(),
                message: format!(
                    "stage {} requested while stage {} is pending",
                    target_stage,
                    self.stepper.stage()
                ),
            });
        }

        if self.stepper.advance(dyn_dt, accel, velocity, position) {
            Ok(IntegratorResult::passed())
        } else {
            Ok(IntegratorResult::in_progress())
        }
    }

    fn reset(&mut self) {
        self.stepper.restart();
    }

    fn name(&self) -> &'static str {
        "RK4"
    }

    fn ode(&self) -> &SecondOrderOde {
        &self.ode
    }
}

/// Builds [`Rk4Integrator`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct Rk4Constructor;

impl IntegratorConstructor for Rk4Constructor {
    fn name(&self) -> &'static str {
        "RK4"
    }

    fn supports(&self, _technique: RotationalTechnique) -> bool {
        true
    }

    fn create_integrator(&self, ode: SecondOrderOde) -> Result<Box<dyn SecondOrderOdeIntegrator>> {
        Ok(Box::new(Rk4Integrator::new(ode)))
    }
}
