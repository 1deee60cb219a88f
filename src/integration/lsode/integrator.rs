//! Re-entrant LSODE stepper
//!
//! The solver is written as an explicit continuation. Whenever it needs a
//! derivative it records where to resume in [`ReEntryPoint`], writes the
//! state it wants evaluated and returns `in_progress`. The next call hands in
//! the acceleration at that state and the solver picks up exactly where it
//! left off. Values that must survive a suspension live in [`SavedLocals`].
//!
//! ```text
//!  InitCalc ─► CycleStartFinish ─► DstodeResetStep ─► ResetIterLoop ─┬─► IterationLoop
//!                    ▲   │ tn ≥ tout: done    ▲              │         │      │
//!                    │   ▼                    │              ▼         │      │
//!                    │ interpolate            │        JacobianPrep ───┘      │
//!                    │                        └──── failure ◄─────────────────┤
//!                    └─────────────────────── success ◄───────────────────────┘
//! ```

use nalgebra::{DMatrix, DVector, Dyn, LU};

use crate::error::{DynError, Result};
use crate::integration::integrator::SecondOrderOdeIntegrator;
use crate::integration::ode::SecondOrderOde;
use crate::integration::result::IntegratorResult;

use super::coefficients::BdfCoefficients;
use super::LsodeConfig;

const UROUND: f64 = f64::EPSILON;
/// Relative change in `h * el0` that forces a new Jacobian
const CCMAX: f64 = 0.3;
/// Steps between Jacobian evaluations
const MSBP: usize = 20;
/// Convergence failures after which the order is reset to 1
const REPEATED_FAILURES: u32 = 3;

/// Where the solver resumes on the next call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReEntryPoint {
    /// Between internal steps; finishes the caller's step once `tn ≥ tout`
    CycleStartFinish,
    /// First call; chooses the initial step
    InitCalc,
    /// Collecting finite-difference Jacobian columns
    JacobianPrep,
    /// Derivative at the predicted state has arrived
    ResetIterLoop,
    /// Derivative at a corrected iterate has arrived
    IterationLoop,
    /// Start of a step attempt (predict), possibly after a failure
    DstodeResetStep,
}

/// Counters since the last reset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LsodeStats {
    pub steps: usize,
    pub derivative_evaluations: usize,
    pub jacobian_evaluations: usize,
    pub error_test_failures: usize,
    pub convergence_failures: usize,
    pub order_resets: usize,
}

/// Locals of one step attempt that live across suspensions
#[derive(Debug, Clone)]
struct SavedLocals {
    /// Corrector iteration count
    m: usize,
    /// Previous correction norm
    delp: f64,
    /// Estimated corrector convergence rate
    convergence_rate: f64,
    /// Norm of the accumulated correction
    acnrm: f64,
    /// Jacobian column awaiting its derivative
    column: usize,
    column_increment: f64,
    r0: f64,
    y_pred: DVector<f64>,
    savf: DVector<f64>,
    acor: DVector<f64>,
    /// Error-test failures in the current step
    error_failures: u32,
    /// Convergence failures in the current step
    convergence_failures: u32,
    /// Internal steps taken toward the current output time
    steps_this_call: usize,
}

impl SavedLocals {
    fn new(n: usize) -> Self {
        Self {
            m: 0,
            delp: 0.0,
            convergence_rate: 0.7,
            acnrm: 0.0,
            column: 0,
            column_increment: 0.0,
            r0: 0.0,
            y_pred: DVector::zeros(n),
            savf: DVector::zeros(n),
            acor: DVector::zeros(n),
            error_failures: 0,
            convergence_failures: 0,
            steps_this_call: 0,
        }
    }
}

enum Suspension {
    /// Evaluate the derivative at this state and call back
    Derivative(DVector<f64>),
    /// Output at the end of the caller's step
    Done(DVector<f64>),
}

/// Variable-order BDF solver for a generalized second-order system
pub struct LsodeIntegrator {
    ode: SecondOrderOde,
    config: LsodeConfig,
    coeffs: BdfCoefficients,
    n: usize,
    re_entry: ReEntryPoint,
    locals: SavedLocals,
    stats: LsodeStats,

    /// Nordsieck history `z[j] = h^j y^(j) / j!`
    z: Vec<DVector<f64>>,
    ewt: DVector<f64>,
    y: DVector<f64>,
    jacobian: DMatrix<f64>,
    iteration_matrix: Option<LU<f64, Dyn, Dyn>>,

    tn: f64,
    tout: f64,
    h: f64,
    nq: usize,
    el: [f64; super::MAX_BDF_ORDER + 1],
    tesco: [f64; 3],
    conit: f64,
    /// Ratio of current `h * el0` to the value used in the iteration matrix
    rc: f64,
    rmax: f64,
    /// Steps until the next order/step-size decision
    ialth: usize,
    /// Step count at the last Jacobian evaluation
    nslp: usize,
    jacobian_needed: bool,
    jacobian_current: bool,
    restart_derivative_pending: bool,
}

impl LsodeIntegrator {
    pub fn new(ode: SecondOrderOde, config: LsodeConfig) -> Result<Self> {
        config.validate()?;
        if !ode.has_first_order_form() {
            return Err(DynError::Config {
                message: "LSODE needs a system with a first-order form".to_string(),
            });
        }
        let n = ode.first_order_size();
        let coeffs = BdfCoefficients::new();

        Ok(Self {
            ode,
            config,
            n,
            re_entry: ReEntryPoint::InitCalc,
            locals: SavedLocals::new(n),
            stats: LsodeStats::default(),
            z: vec![DVector::zeros(n); config.max_order + 1],
            ewt: DVector::from_element(n, 1.0),
            y: DVector::zeros(n),
            jacobian: DMatrix::zeros(n, n),
            iteration_matrix: None,
            tn: 0.0,
            tout: 0.0,
            h: 0.0,
            nq: 1,
            el: coeffs.el[1],
            tesco: coeffs.tesco[1],
            conit: 0.5 / 3.0,
            rc: 0.0,
            rmax: 1e4,
            ialth: 2,
            nslp: 0,
            jacobian_needed: true,
            jacobian_current: false,
            restart_derivative_pending: false,
            coeffs,
        })
    }

    pub fn re_entry_point(&self) -> ReEntryPoint {
        self.re_entry
    }

    pub fn stats(&self) -> LsodeStats {
        self.stats
    }

    /// Order used for the most recent step
    pub fn current_order(&self) -> usize {
        self.nq
    }

    /// Internal step size
    pub fn step_size(&self) -> f64 {
        self.h
    }

    fn weighted_norm(&self, v: &DVector<f64>) -> f64 {
        let sum: f64 = v.iter().zip(self.ewt.iter()).map(|(a, w)| (a / w).powi(2)).sum();
        (sum / self.n as f64).sqrt()
    }

    fn set_error_weights(&mut self) {
        let (rtol, atol) = (self.config.rtol, self.config.atol);
        self.ewt = self.z[0].map(|y| rtol * y.abs() + atol);
    }

    fn fatal(&self, message: String) -> DynError {
        log::error!("LSODE failure at t = {}: {}", self.tn, message);
        DynError::Integration {
            integrator: "LSODE",
            message,
        }
    }

    fn set_order(&mut self, nq: usize) {
        let old_l0 = self.el[0];
        self.nq = nq;
        self.el = self.coeffs.el[nq];
        self.tesco = self.coeffs.tesco[nq];
        self.conit = 0.5 / (nq + 2) as f64;
        self.rc *= self.el[0] / old_l0;
    }

    /// Scale the history for a step of `rh * h`
    fn rescale(&mut self, rh: f64) {
        let rh = rh.min(self.rmax);
        let mut r = 1.0;
        for j in 1..=self.nq {
            r *= rh;
            self.z[j] *= r;
        }
        self.h *= rh;
        self.rc *= rh;
        self.ialth = self.nq + 1;
    }

    /// Pascal-triangle extrapolation of the history to `tn + h`
    fn predict(&mut self) {
        self.tn += self.h;
        let nq = self.nq;
        for jb in 1..=nq {
            for j in (nq - jb)..nq {
                let (lo, hi) = self.z.split_at_mut(j + 1);
                lo[j] += &hi[0];
            }
        }
    }

    /// Undo [`Self::predict`]
    fn retract(&mut self) {
        self.tn -= self.h;
        let nq = self.nq;
        for jb in 1..=nq {
            for j in (nq - jb)..nq {
                let (lo, hi) = self.z.split_at_mut(j + 1);
                lo[j] -= &hi[0];
            }
        }
    }

    /// Evaluate the history polynomial at `tout`
    fn interpolate(&self) -> DVector<f64> {
        let s = (self.tout - self.tn) / self.h;
        let mut y = self.z[self.nq].clone();
        for j in (0..self.nq).rev() {
            y = &self.z[j] + y * s;
        }
        y
    }

    fn initialize(&mut self, dyn_dt: f64, y0: DVector<f64>, f0: &DVector<f64>) -> Result<()> {
        if !(dyn_dt > 0.0) {
            return Err(self.fatal(format!("step {} must be positive", dyn_dt)));
        }
        self.tn = 0.0;
        self.tout = dyn_dt;
        self.z = vec![DVector::zeros(self.n); self.config.max_order + 1];
        self.z[0] = y0;
        self.set_error_weights();

        let w0 = self.tn.abs().max(self.tout.abs());
        let tol = self.config.rtol.max(100.0 * UROUND).min(1e-3);
        let fnorm = self.weighted_norm(f0);
        let sum = 1.0 / (tol * w0 * w0) + tol * fnorm * fnorm;
        self.h = (1.0 / sum.sqrt()).min(dyn_dt);
        self.z[1] = f0 * self.h;

        self.el = self.coeffs.el[1];
        self.set_order(1);
        self.rc = 0.0;
        self.rmax = 1e4;
        self.ialth = 2;
        self.nslp = 0;
        self.jacobian_needed = true;
        self.jacobian_current = false;
        self.restart_derivative_pending = false;
        self.locals = SavedLocals::new(self.n);
        self.re_entry = ReEntryPoint::CycleStartFinish;
        log::debug!("LSODE initial step {:.3e}", self.h);
        Ok(())
    }

    /// State to evaluate for the current Jacobian column
    fn perturbed_column(&mut self) -> DVector<f64> {
        let j = self.locals.column;
        let yj = self.locals.y_pred[j];
        let r = (UROUND.sqrt() * yj.abs()).max(self.locals.r0 * self.ewt[j]);
        self.locals.column_increment = r;
        let mut y = self.locals.y_pred.clone();
        y[j] += r;
        y
    }

    /// Run until a derivative is needed or the output time is reached
    fn resume(&mut self, mut arrived: Option<DVector<f64>>) -> Result<Suspension> {
        loop {
            match self.re_entry {
                ReEntryPoint::InitCalc => {
                    return Err(self.fatal("resumed before initialization".to_string()));
                }

                ReEntryPoint::CycleStartFinish => {
                    if self.tn >= self.tout - 1e-12 * self.h.abs() {
                        return Ok(Suspension::Done(self.interpolate()));
                    }
                    if self.locals.steps_this_call >= self.config.max_steps {
                        return Err(self.fatal(format!(
                            "{} steps taken without reaching t = {}",
                            self.locals.steps_this_call, self.tout
                        )));
                    }
                    self.set_error_weights();
                    self.locals.error_failures = 0;
                    self.locals.convergence_failures = 0;
                    self.re_entry = ReEntryPoint::DstodeResetStep;
                }

                ReEntryPoint::DstodeResetStep => {
                    if self.restart_derivative_pending {
                        match arrived.take() {
                            Some(f) => {
                                self.z[1] = f * self.h;
                                self.restart_derivative_pending = false;
                            }
                            None => return Ok(Suspension::Derivative(self.z[0].clone())),
                        }
                    }
                    if (self.rc - 1.0).abs() > CCMAX || self.stats.steps >= self.nslp + MSBP {
                        self.jacobian_needed = true;
                    }
                    self.predict();
                    self.locals.m = 0;
                    self.locals.acor.fill(0.0);
                    self.y = self.z[0].clone();
                    self.re_entry = ReEntryPoint::ResetIterLoop;
                    return Ok(Suspension::Derivative(self.y.clone()));
                }

                ReEntryPoint::ResetIterLoop => {
                    let f = self.take_derivative(&mut arrived)?;
                    self.locals.savf = f.clone();
                    if self.jacobian_needed {
                        let fac = self.weighted_norm(&self.locals.savf);
                        let r0 = 1000.0 * self.h.abs() * UROUND * self.n as f64 * fac;
                        self.locals.r0 = if r0 == 0.0 { 1.0 } else { r0 };
                        self.locals.y_pred = self.z[0].clone();
                        self.locals.column = 0;
                        self.re_entry = ReEntryPoint::JacobianPrep;
                        return Ok(Suspension::Derivative(self.perturbed_column()));
                    }
                    self.re_entry = ReEntryPoint::IterationLoop;
                    arrived = Some(f);
                }

                ReEntryPoint::JacobianPrep => {
                    let f = self.take_derivative(&mut arrived)?;
                    let j = self.locals.column;
                    let column = (f - &self.locals.savf) / self.locals.column_increment;
                    self.jacobian.set_column(j, &column);
                    self.locals.column += 1;
                    if self.locals.column < self.n {
                        return Ok(Suspension::Derivative(self.perturbed_column()));
                    }

                    self.stats.jacobian_evaluations += 1;
                    self.jacobian_needed = false;
                    self.jacobian_current = true;
                    self.rc = 1.0;
                    self.nslp = self.stats.steps;
                    self.locals.convergence_rate = 0.7;

                    let p = DMatrix::identity(self.n, self.n) - &self.jacobian * (self.h * self.el[0]);
                    let lu = p.lu();
                    if lu.is_invertible() {
                        self.iteration_matrix = Some(lu);
                        self.re_entry = ReEntryPoint::IterationLoop;
                        arrived = Some(self.locals.savf.clone());
                    } else {
                        log::debug!("LSODE iteration matrix singular at t = {}", self.tn);
                        self.iteration_matrix = None;
                        self.convergence_failure(true)?;
                    }
                }

                ReEntryPoint::IterationLoop => {
                    let f = self.take_derivative(&mut arrived)?;
                    let rhs = f * self.h - (&self.z[1] + &self.locals.acor);
                    let solved = self.iteration_matrix.as_ref().and_then(|lu| lu.solve(&rhs));
                    let Some(correction) = solved else {
                        self.convergence_failure(true)?;
                        continue;
                    };

                    let del = self.weighted_norm(&correction);
                    self.locals.acor += correction;
                    self.y = &self.z[0] + &self.locals.acor * self.el[0];

                    if self.locals.m != 0 {
                        self.locals.convergence_rate =
                            (0.2 * self.locals.convergence_rate).max(del / self.locals.delp);
                    }
                    let dcon = del * (1.5 * self.locals.convergence_rate).min(1.0)
                        / (self.tesco[1] * self.conit);

                    if dcon <= 1.0 {
                        self.locals.acnrm = if self.locals.m == 0 {
                            del
                        } else {
                            self.weighted_norm(&self.locals.acor)
                        };
                        self.jacobian_current = false;
                        self.error_test()?;
                        continue;
                    }

                    self.locals.m += 1;
                    if self.locals.m == self.config.max_corrector_iterations
                        || (self.locals.m >= 2 && del > 2.0 * self.locals.delp)
                    {
                        self.convergence_failure(false)?;
                        continue;
                    }
                    self.locals.delp = del;
                    return Ok(Suspension::Derivative(self.y.clone()));
                }
            }
        }
    }

    fn take_derivative(&self, arrived: &mut Option<DVector<f64>>) -> Result<DVector<f64>> {
        arrived
            .take()
            .ok_or_else(|| self.fatal(format!("no derivative supplied at {:?}", self.re_entry)))
    }

    /// Corrector did not converge; retract and retry smaller
    fn convergence_failure(&mut self, hard: bool) -> Result<()> {
        self.stats.convergence_failures += 1;
        self.locals.convergence_failures += 1;
        self.rmax = 2.0;
        self.retract();
        self.jacobian_needed = true;

        if hard || self.jacobian_current {
            if self.locals.convergence_failures >= self.config.max_convergence_failures {
                return Err(self.fatal(format!(
                    "corrector failed to converge {} times",
                    self.locals.convergence_failures
                )));
            }
            if self.locals.convergence_failures >= REPEATED_FAILURES {
                self.order_one_reset();
                return Ok(());
            }
            self.rescale(0.25);
        }
        self.re_entry = ReEntryPoint::DstodeResetStep;
        Ok(())
    }

    /// Drop to order 1 with a tenth of the step; the first derivative of the
    /// history must be rebuilt from a fresh evaluation
    fn order_one_reset(&mut self) {
        self.stats.order_resets += 1;
        log::debug!("LSODE repeated failures at t = {}, restarting at order 1", self.tn);
        self.h *= 0.1;
        self.set_order(1);
        self.ialth = 5;
        self.rc = 0.0;
        self.jacobian_needed = true;
        self.restart_derivative_pending = true;
        self.re_entry = ReEntryPoint::DstodeResetStep;
    }

    fn error_test(&mut self) -> Result<()> {
        let dsm = self.locals.acnrm / self.tesco[1];
        let dsm = if dsm.is_finite() { dsm } else { f64::MAX };

        if dsm <= 1.0 {
            self.stats.steps += 1;
            self.locals.steps_this_call += 1;
            self.locals.error_failures = 0;
            for j in 0..=self.nq {
                let el = self.el[j];
                self.z[j] += &self.locals.acor * el;
            }
            self.ialth -= 1;
            if self.ialth == 0 {
                self.select_order(dsm, false);
            } else if self.ialth == 1 && self.nq < self.config.max_order {
                self.z[self.config.max_order] = self.locals.acor.clone();
            }
            self.rmax = 10.0;
            self.re_entry = ReEntryPoint::CycleStartFinish;
            return Ok(());
        }

        self.stats.error_test_failures += 1;
        self.locals.error_failures += 1;
        self.retract();
        self.rmax = 2.0;
        if self.locals.error_failures >= 3 {
            if self.locals.error_failures >= self.config.max_error_failures {
                return Err(self.fatal(format!(
                    "error test failed {} times in one step",
                    self.locals.error_failures
                )));
            }
            self.order_one_reset();
            return Ok(());
        }
        self.select_order(dsm, true);
        self.re_entry = ReEntryPoint::DstodeResetStep;
        Ok(())
    }

    /// Pick order and step ratio from the same, lower and higher order error
    /// estimates
    fn select_order(&mut self, dsm: f64, failed: bool) {
        let nq = self.nq;
        let l = nq + 1;
        let max_order = self.config.max_order;

        let mut rhup = 0.0;
        if !failed && nq < max_order {
            let diff = &self.locals.acor - &self.z[max_order];
            let dup = self.weighted_norm(&diff) / self.tesco[2];
            rhup = 1.0 / (1.4 * dup.powf(1.0 / (l + 1) as f64) + 1.4e-6);
        }
        let rhsm = 1.0 / (1.2 * dsm.powf(1.0 / l as f64) + 1.2e-6);
        let mut rhdn = 0.0;
        if nq > 1 {
            let ddn = self.weighted_norm(&self.z[nq]) / self.tesco[0];
            rhdn = 1.0 / (1.3 * ddn.powf(1.0 / nq as f64) + 1.3e-6);
        }

        let (new_q, mut rh) = if rhsm >= rhup && rhsm >= rhdn {
            (nq, rhsm)
        } else if rhsm < rhup && rhup > rhdn {
            if rhup < 1.1 {
                self.ialth = 3;
                return;
            }
            self.z[l] = &self.locals.acor * (self.el[l - 1] / l as f64);
            (l, rhup)
        } else if nq > 1 {
            (nq - 1, if failed { rhdn.min(1.0) } else { rhdn })
        } else {
            (nq, rhsm)
        };

        if !failed && rh < 1.1 {
            self.ialth = 3;
            return;
        }
        if self.locals.error_failures >= 2 {
            rh = rh.min(0.2);
        }
        if new_q != nq {
            log::trace!("LSODE order {} -> {} at t = {}", nq, new_q, self.tn);
            self.set_order(new_q);
        }
        self.rescale(rh);
    }
}

impl SecondOrderOdeIntegrator for LsodeIntegrator {
    fn integrate(
        &mut self,
        dyn_dt: f64,
        target_stage: u32,
        accel: &[f64],
        velocity: &mut [f64],
        position: &mut [f64],
    ) -> Result<IntegratorResult> {
        let mut ydot = vec![0.0; self.n];
        self.ode.first_order_derivative(position, velocity, accel, &mut ydot);
        let ydot = DVector::from_vec(ydot);
        self.stats.derivative_evaluations += 1;

        let arrived = if target_stage == 0 {
            match self.re_entry {
                ReEntryPoint::InitCalc => {
                    let y0 = DVector::from_vec(self.ode.pack(position, velocity));
                    self.initialize(dyn_dt, y0, &ydot)?;
                }
                ReEntryPoint::CycleStartFinish => self.tout += dyn_dt,
                pending => {
                    return Err(self.fatal(format!(
                        "new step requested while suspended at {:?}",
                        pending
                    )))
                }
            }
            self.locals.steps_this_call = 0;
            None
        } else {
            Some(ydot)
        };

        match self.resume(arrived)? {
            Suspension::Derivative(y) => {
                self.ode.unpack(y.as_slice(), position, velocity);
                Ok(IntegratorResult::in_progress())
            }
            Suspension::Done(y) => {
                self.ode.unpack(y.as_slice(), position, velocity);
                Ok(IntegratorResult::passed())
            }
        }
    }

    fn reset(&mut self) {
        self.re_entry = ReEntryPoint::InitCalc;
        self.iteration_matrix = None;
        self.stats = LsodeStats::default();
    }

    fn name(&self) -> &'static str {
        "LSODE"
    }

    fn ode(&self) -> &SecondOrderOde {
        &self.ode
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integration::integrator::tests::run_oscillator;

    fn step_through<F>(lsode: &mut LsodeIntegrator, dt: f64, steps: usize, x: &mut [f64], v: &mut [f64], accel: F) -> Result<()>
    where
        F: Fn(&[f64], &[f64]) -> Vec<f64>,
    {
        for _ in 0..steps {
            let mut stage = 0;
            loop {
                let a = accel(x, v);
                if lsode.integrate(dt, stage, &a, v, x)?.passed {
                    break;
                }
                stage += 1;
            }
        }
        Ok(())
    }

    #[test]
    fn test_oscillator_accuracy() {
        let mut lsode = LsodeIntegrator::new(SecondOrderOde::cartesian(1), LsodeConfig::default()).unwrap();
        let (t, x, v) = run_oscillator(&mut lsode, 0.1, 2.0 * std::f64::consts::PI);

        assert!((x - t.cos()).abs() < 1e-7, "Position error too large: {}", x - t.cos());
        assert!((v + t.sin()).abs() < 1e-7, "Velocity error too large: {}", v + t.sin());
        assert_eq!(lsode.re_entry_point(), ReEntryPoint::CycleStartFinish);
    }

    #[test]
    fn test_order_rises_on_smooth_problem() {
        let mut lsode = LsodeIntegrator::new(SecondOrderOde::cartesian(1), LsodeConfig::default()).unwrap();
        run_oscillator(&mut lsode, 0.1, 2.0 * std::f64::consts::PI);

        assert!(lsode.current_order() >= 4, "order stayed at {}", lsode.current_order());
        let stats = lsode.stats();
        assert!(stats.steps > 0);
        assert!(stats.jacobian_evaluations >= 1);
        assert!(stats.jacobian_evaluations < stats.steps);
    }

    #[test]
    fn test_stiff_damping() {
        // x'' = -1000 x' - x: the slow mode decays as exp(-t / 1000)
        let config = LsodeConfig {
            rtol: 1e-6,
            atol: 1e-9,
            ..Default::default()
        };
        let mut lsode = LsodeIntegrator::new(SecondOrderOde::cartesian(1), config).unwrap();
        let mut x = [1.0];
        let mut v = [0.0];
        step_through(&mut lsode, 1.0, 10, &mut x, &mut v, |x, v| vec![-1000.0 * v[0] - x[0]]).unwrap();

        assert!((x[0] - 0.990_05).abs() < 1e-4, "x = {}", x[0]);
        assert!(lsode.stats().steps < 500);
    }

    #[test]
    fn test_step_bound_is_fatal() {
        let config = LsodeConfig {
            max_steps: 5,
            ..Default::default()
        };
        let mut lsode = LsodeIntegrator::new(SecondOrderOde::cartesian(1), config).unwrap();
        let mut x = [1.0];
        let mut v = [0.0];
        let result = step_through(&mut lsode, 100.0, 1, &mut x, &mut v, |x, _| vec![-x[0]]);
        assert!(matches!(result, Err(DynError::Integration { integrator: "LSODE", .. })));
    }

    #[test]
    fn test_repeated_failures_reset_order_then_fail() {
        let mut lsode = LsodeIntegrator::new(SecondOrderOde::cartesian(1), LsodeConfig::default()).unwrap();
        let mut x = [1.0];
        let mut v = [0.0];
        let result = step_through(&mut lsode, 0.1, 1, &mut x, &mut v, |_, _| vec![f64::NAN]);

        assert!(result.is_err());
        let stats = lsode.stats();
        assert!(stats.order_resets >= 1);
        assert_eq!(lsode.current_order(), 1);
        assert!(stats.convergence_failures >= LsodeConfig::default().max_convergence_failures as usize);
    }

    #[test]
    fn test_suspension_resumes_where_it_left_off() {
        let mut lsode = LsodeIntegrator::new(SecondOrderOde::cartesian(1), LsodeConfig::default()).unwrap();
        let mut x = [1.0];
        let mut v = [0.0];

        let first = lsode.integrate(0.1, 0, &[-1.0], &mut v, &mut x).unwrap();
        assert!(!first.passed);
        assert_eq!(lsode.re_entry_point(), ReEntryPoint::ResetIterLoop);

        // Jacobian columns come next
        let second = lsode.integrate(0.1, 1, &[-x[0]], &mut v, &mut x).unwrap();
        assert!(!second.passed);
        assert_eq!(lsode.re_entry_point(), ReEntryPoint::JacobianPrep);

        // A new step may not start while suspended mid-step
        assert!(lsode.integrate(0.1, 0, &[-x[0]], &mut v, &mut x).is_err());
    }

    #[test]
    fn test_reset_restarts_initialization() {
        let mut lsode = LsodeIntegrator::new(SecondOrderOde::cartesian(1), LsodeConfig::default()).unwrap();
        let mut x = [1.0];
        let mut v = [0.0];
        step_through(&mut lsode, 0.1, 5, &mut x, &mut v, |x, _| vec![-x[0]]).unwrap();
        lsode.reset();
        assert_eq!(lsode.re_entry_point(), ReEntryPoint::InitCalc);
        assert_eq!(lsode.stats(), LsodeStats::default());

        // Picks up from the caller's state after a reset
        step_through(&mut lsode, 0.1, 5, &mut x, &mut v, |x, _| vec![-x[0]]).unwrap();
        assert!((x[0] - 1.0_f64.cos()).abs() < 1e-7, "x = {}", x[0]);
        assert!((v[0] + 1.0_f64.sin()).abs() < 1e-7, "v = {}", v[0]);
    }
}
