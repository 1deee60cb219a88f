//! Gauss-Jackson step management
//!
//! ```text
//!  Reset ──► Priming ──► BootstrapEdit ◄──► BootstrapStep
//!                              │
//!                              ▼
//!                         Operational   (never left)
//! ```
//!
//! Priming takes RK4 steps at the bootstrap step size `dt / 2^ndoubling_steps`
//! until the history holds `initial_order` points. Each bootstrap cycle edits
//! the newest point with the implicit corrector, then takes predictor-corrector
//! steps until there are enough points to double the step size and raise the
//! order. After the last doubling the history is edited once more and the
//! integrator runs at the caller's step with `final_order` forever after.

use std::collections::VecDeque;

use crate::error::{DynError, Result};
use crate::integration::integrator::{Rk4Stepper, SecondOrderOdeIntegrator};
use crate::integration::ode::{GeneralizedPosition, SecondOrderOde};
use crate::integration::result::IntegratorResult;

use super::coefficients::{difference_sum, MultistepCoefficients};
use super::GaussJacksonConfig;

/// Step-management state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GaussJacksonState {
    Reset,
    Priming,
    BootstrapEdit,
    BootstrapStep,
    Operational,
}

/// Which multistep formulas apply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MultistepForm {
    /// Störmer-Cowell on position, Adams on velocity
    SecondOrder,
    /// Adams on the packed `[position, velocity]` state
    FirstOrder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepPhase {
    Predict,
    Correct,
}

#[derive(Debug, Clone)]
struct HistoryPoint {
    y: Vec<f64>,
    ydot: Vec<f64>,
    has_derivative: bool,
}

/// Gauss-Jackson predictor-corrector with bootstrap start-up
pub struct GaussJacksonIntegrator {
    ode: SecondOrderOde,
    config: GaussJacksonConfig,
    coeffs: MultistepCoefficients,
    form: MultistepForm,
    state: GaussJacksonState,
    transitions: Vec<GaussJacksonState>,
    history: VecDeque<HistoryPoint>,
    primer: Rk4Stepper,
    phase: StepPhase,
    current_order: usize,
    step_size: f64,
    dyn_dt: f64,
    doublings: u32,
    correction_iterations: u32,
    bootstrap_edit_redo_needed: bool,
}

impl GaussJacksonIntegrator {
    pub fn new(ode: SecondOrderOde, config: GaussJacksonConfig) -> Result<Self> {
        config.validate()?;
        let form = match ode.kind {
            GeneralizedPosition::Cartesian => MultistepForm::SecondOrder,
            GeneralizedPosition::Derivative(_) => MultistepForm::FirstOrder,
            GeneralizedPosition::Step(_) => {
                return Err(DynError::Config {
                    message: "Gauss-Jackson cannot integrate step-advanced positions".to_string(),
                })
            }
        };

        Ok(Self {
            coeffs: MultistepCoefficients::new(config.final_order.max(config.initial_order)),
            primer: Rk4Stepper::new(ode),
            ode,
            config,
            form,
            state: GaussJacksonState::Reset,
            transitions: vec![GaussJacksonState::Reset],
            history: VecDeque::new(),
            phase: StepPhase::Predict,
            current_order: 0,
            step_size: 0.0,
            dyn_dt: 0.0,
            doublings: 0,
            correction_iterations: 0,
            bootstrap_edit_redo_needed: false,
        })
    }

    pub fn state(&self) -> GaussJacksonState {
        self.state
    }

    /// Every state entered since the last reset, in order
    pub fn transitions(&self) -> &[GaussJacksonState] {
        &self.transitions
    }

    pub fn current_order(&self) -> usize {
        self.current_order
    }

    pub fn step_size(&self) -> f64 {
        self.step_size
    }

    pub fn doublings(&self) -> u32 {
        self.doublings
    }

    pub fn bootstrap_edit_redo_needed(&self) -> bool {
        self.bootstrap_edit_redo_needed
    }

    /// Number of completed edit → step bootstrap cycles
    pub fn bootstrap_cycles(&self) -> usize {
        self.transitions
            .windows(2)
            .filter(|w| {
                w[0] == GaussJacksonState::BootstrapEdit && w[1] == GaussJacksonState::BootstrapStep
            })
            .count()
    }

    fn transition(&mut self, next: GaussJacksonState) {
        if self.state == GaussJacksonState::Operational {
            return;
        }
        log::debug!(
            "Gauss-Jackson {:?} -> {:?} (order {}, h = {})",
            self.state,
            next,
            self.current_order,
            self.step_size
        );
        self.state = next;
        self.transitions.push(next);
    }

    fn begin_bootstrap(&mut self, dyn_dt: f64) {
        let n = self.config.ndoubling_steps;
        self.history.clear();
        self.doublings = 0;
        self.dyn_dt = dyn_dt;
        self.step_size = dyn_dt / f64::from(2u32.pow(n));
        self.current_order = self.config.order_after_doubling(0);
        self.phase = StepPhase::Predict;
        self.primer.restart();
        self.transition(GaussJacksonState::Priming);
    }

    fn newest_first_derivatives<'a>(points: impl DoubleEndedIterator<Item = &'a HistoryPoint>) -> Vec<&'a [f64]> {
        points.rev().map(|p| p.ydot.as_slice()).collect()
    }

    /// Explicit step from the newest history point
    fn predict(&self) -> Vec<f64> {
        let h = self.step_size;
        let k = self.current_order;
        let n = self.history.len();
        let newest = &self.history[n - 1];
        let ydots = Self::newest_first_derivatives(self.history.iter());

        match self.form {
            MultistepForm::SecondOrder => {
                let np = self.ode.position_size;
                let accels: Vec<&[f64]> = ydots.iter().map(|v| &v[np..]).collect();
                let st = difference_sum(&accels, &self.coeffs.stormer, k);
                let ab = difference_sum(&accels, &self.coeffs.adams_bashforth, k);
                let previous = &self.history[n - 2];
                let mut y = newest.y.clone();
                for i in 0..np {
                    y[i] = 2.0 * newest.y[i] - previous.y[i] + h * h * st[i];
                    y[np + i] = newest.y[np + i] + h * ab[i];
                }
                y
            }
            MultistepForm::FirstOrder => {
                let ab = difference_sum(&ydots, &self.coeffs.adams_bashforth, k);
                newest.y.iter().zip(&ab).map(|(y, d)| y + h * d).collect()
            }
        }
    }

    /// Implicit step following the first `count` history points, given the
    /// derivative at the new point
    fn correct(&self, count: usize, new_ydot: &[f64]) -> Vec<f64> {
        let h = self.step_size;
        let k = self.current_order;
        let newest = &self.history[count - 1];
        let mut ydots = vec![new_ydot];
        ydots.extend(Self::newest_first_derivatives(self.history.iter().take(count)));

        match self.form {
            MultistepForm::SecondOrder => {
                let np = self.ode.position_size;
                let accels: Vec<&[f64]> = ydots.iter().map(|v| &v[np..]).collect();
                let co = difference_sum(&accels, &self.coeffs.cowell, k);
                let am = difference_sum(&accels, &self.coeffs.adams_moulton, k);
                let previous = &self.history[count - 2];
                let mut y = newest.y.clone();
                for i in 0..np {
                    y[i] = 2.0 * newest.y[i] - previous.y[i] + h * h * co[i];
                    y[np + i] = newest.y[np + i] + h * am[i];
                }
                y
            }
            MultistepForm::FirstOrder => {
                let am = difference_sum(&ydots, &self.coeffs.adams_moulton, k);
                newest.y.iter().zip(&am).map(|(y, d)| y + h * d).collect()
            }
        }
    }

    /// Keep every other point counting back from the newest
    fn double_step(&mut self, next_order: usize) {
        let kept: VecDeque<HistoryPoint> = self
            .history
            .iter()
            .rev()
            .step_by(2)
            .take(next_order)
            .cloned()
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        self.history = kept;
        self.step_size *= 2.0;
        self.current_order = next_order;
        self.doublings += 1;
        self.transition(GaussJacksonState::BootstrapEdit);
    }

    fn write_state(&self, y: &[f64], velocity: &mut [f64], position: &mut [f64]) {
        self.ode.unpack(y, position, velocity);
    }

    fn prime(&mut self, dyn_dt: f64, accel: &[f64], velocity: &mut [f64], position: &mut [f64]) -> IntegratorResult {
        if !self.primer.advance(self.step_size, accel, velocity, position) {
            return IntegratorResult::in_progress();
        }
        self.history.push_back(HistoryPoint {
            y: self.ode.pack(position, velocity),
            ydot: Vec::new(),
            has_derivative: false,
        });
        if self.history.len() >= self.current_order {
            self.transition(GaussJacksonState::BootstrapEdit);
        }
        IntegratorResult::scaled(self.step_size / dyn_dt)
    }

    /// One edit pass over the newest point; true once converged
    fn edit(&mut self, ydot: Vec<f64>, velocity: &mut [f64], position: &mut [f64]) -> Result<bool> {
        let count = self.history.len();
        let corrected = self.correct(count - 1, &ydot);
        let newest = &self.history[count - 1];
        let scale = newest.y.iter().fold(1.0_f64, |m, v| m.max(v.abs()));
        let delta = corrected
            .iter()
            .zip(&newest.y)
            .fold(0.0_f64, |m, (c, y)| m.max((c - y).abs()))
            / scale;

        self.write_state(&corrected, velocity, position);
        self.correction_iterations += 1;
        let newest = &mut self.history[count - 1];
        newest.y = corrected;
        newest.ydot = ydot;

        if delta > self.config.edit_tolerance {
            if self.correction_iterations >= self.config.max_correction_iterations {
                return Err(DynError::Integration {
                    integrator: "Gauss-Jackson",
                    message: format!(
                        "bootstrap edit did not converge after {} iterations (delta {:.3e})",
                        self.correction_iterations, delta
                    ),
                });
            }
            self.bootstrap_edit_redo_needed = true;
            newest.has_derivative = false;
            return Ok(false);
        }

        self.bootstrap_edit_redo_needed = false;
        newest.has_derivative = true;
        Ok(true)
    }
}

impl SecondOrderOdeIntegrator for GaussJacksonIntegrator {
    fn integrate(
        &mut self,
        dyn_dt: f64,
        target_stage: u32,
        accel: &[f64],
        velocity: &mut [f64],
        position: &mut [f64],
    ) -> Result<IntegratorResult> {
        let mut ydot = vec![0.0; self.ode.first_order_size()];
        self.ode.first_order_derivative(position, velocity, accel, &mut ydot);

        if target_stage == 0 {
            if self.state == GaussJacksonState::Reset {
                self.begin_bootstrap(dyn_dt);
            } else if (dyn_dt - self.dyn_dt).abs() > 1e-12 * self.dyn_dt.abs() {
                log::info!(
                    "Gauss-Jackson step changed from {} to {}, restarting bootstrap",
                    self.dyn_dt,
                    dyn_dt
                );
                self.reset();
                self.begin_bootstrap(dyn_dt);
            }

            if self.history.is_empty() {
                self.history.push_back(HistoryPoint {
                    y: self.ode.pack(position, velocity),
                    ydot: ydot.clone(),
                    has_derivative: true,
                });
            } else if let Some(newest) = self.history.back_mut() {
                if !newest.has_derivative {
                    newest.ydot = ydot.clone();
                    newest.has_derivative = true;
                }
            }
            if self.state == GaussJacksonState::Priming {
                self.primer.restart();
            }
            self.correction_iterations = 0;
            self.phase = StepPhase::Predict;
        }

        loop {
            match self.state {
                GaussJacksonState::Reset => self.begin_bootstrap(dyn_dt),
                GaussJacksonState::Priming => {
                    return Ok(self.prime(dyn_dt, accel, velocity, position));
                }
                GaussJacksonState::BootstrapEdit => {
                    if !self.edit(ydot.clone(), velocity, position)? {
                        return Ok(IntegratorResult::in_progress());
                    }
                    let next = if self.doublings == self.config.ndoubling_steps {
                        GaussJacksonState::Operational
                    } else {
                        GaussJacksonState::BootstrapStep
                    };
                    self.transition(next);
                    self.phase = StepPhase::Predict;
                }
                GaussJacksonState::BootstrapStep | GaussJacksonState::Operational => {
                    if self.phase == StepPhase::Predict {
                        let predicted = self.predict();
                        self.write_state(&predicted, velocity, position);
                        self.phase = StepPhase::Correct;
                        return Ok(IntegratorResult::in_progress());
                    }

                    let corrected = self.correct(self.history.len(), &ydot);
                    self.write_state(&corrected, velocity, position);
                    self.history.push_back(HistoryPoint {
                        y: corrected,
                        ydot: Vec::new(),
                        has_derivative: false,
                    });
                    self.phase = StepPhase::Predict;
                    let result = IntegratorResult::scaled(self.step_size / dyn_dt);

                    if self.state == GaussJacksonState::Operational {
                        while self.history.len() > self.current_order + 1 {
                            self.history.pop_front();
                        }
                    } else {
                        let next_order = self.config.order_after_doubling(self.doublings + 1);
                        if self.history.len() >= 2 * next_order - 1 {
                            self.double_step(next_order);
                        }
                    }
                    return Ok(result);
                }
            }
        }
    }

    fn reset(&mut self) {
        self.state = GaussJacksonState::Reset;
        self.transitions = vec![GaussJacksonState::Reset];
        self.history.clear();
        self.doublings = 0;
        self.correction_iterations = 0;
        self.bootstrap_edit_redo_needed = false;
        self.primer.restart();
    }

    fn name(&self) -> &'static str {
        "Gauss-Jackson"
    }

    fn ode(&self) -> &SecondOrderOde {
        &self.ode
    }
}
