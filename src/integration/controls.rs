//! Step bookkeeping shared by everything integrated together

use serde::Serialize;

/// Simulation clock as seen by the integrators
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimeInterface {
    /// Dynamic time since the start of the run (s)
    seconds: f64,
    /// Dynamic seconds per simulation second
    time_scale: f64,
}

impl Default for TimeInterface {
    fn default() -> Self {
        Self {
            seconds: 0.0,
            time_scale: 1.0,
        }
    }
}

impl TimeInterface {
    pub fn new(time_scale: f64) -> Self {
        Self {
            seconds: 0.0,
            time_scale,
        }
    }

    pub fn seconds(&self) -> f64 {
        self.seconds
    }

    pub fn time_scale(&self) -> f64 {
        self.time_scale
    }

    /// Dynamic step for a simulation step of `sim_dt`
    pub fn dyn_step(&self, sim_dt: f64) -> f64 {
        sim_dt * self.time_scale
    }

    fn advance(&mut self, dyn_dt: f64) {
        self.seconds += dyn_dt;
    }
}

/// Stage loop state for one integration cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct IntegrationControls {
    /// Requested dynamic step (s)
    pub step_size: f64,
    /// Stage the next integrate call completes
    pub cycle_stage: u32,
    /// Completed cycles
    pub cycles: u64,
}

impl IntegrationControls {
    pub fn new(step_size: f64) -> Self {
        Self {
            step_size,
            cycle_stage: 0,
            cycles: 0,
        }
    }

    /// Start a new cycle at stage 0
    pub fn begin_cycle(&mut self) {
        self.cycle_stage = 0;
    }

    pub fn next_stage(&mut self) {
        self.cycle_stage += 1;
    }

    /// Close a cycle that covered `time_scale_factor` of the requested step,
    /// returning the dynamic time actually advanced
    pub fn finish_cycle(&mut self, time_scale_factor: f64, time: &mut TimeInterface) -> f64 {
        let advanced = self.step_size * time_scale_factor;
        time.advance(advanced);
        self.cycles += 1;
        self.cycle_stage = 0;
        advanced
    }
}
