//! Integration step outcomes and their merging

use crate::error::{DynError, Result};

/// Outcome of one call into an integrator
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntegratorResult {
    /// The integrator completed its step (all stages done)
    pub passed: bool,
    /// Fraction of the requested dynamic time step actually taken
    pub time_scale_factor: f64,
    /// Number of results folded into this one
    pub merge_count: u32,
}

impl Default for IntegratorResult {
    fn default() -> Self {
        Self {
            passed: true,
            time_scale_factor: 1.0,
            merge_count: 0,
        }
    }
}

impl IntegratorResult {
    /// Step complete, full time step taken
    pub fn passed() -> Self {
        Self::default()
    }

    /// Step complete covering `time_scale_factor` of the requested step
    pub fn scaled(time_scale_factor: f64) -> Self {
        Self {
            passed: true,
            time_scale_factor,
            merge_count: 0,
        }
    }

    /// More stages are needed before the step completes
    pub fn in_progress() -> Self {
        Self {
            passed: false,
            time_scale_factor: 1.0,
            merge_count: 0,
        }
    }
}

/// Folds per-integrator results into a single body-level result
///
/// Pass flags are combined with AND. Time-scale factors reported by completed
/// integrators must agree, otherwise the translational and rotational states
/// would end at different times.
#[derive(Debug, Clone, Copy)]
pub struct IntegratorResultMerger {
    /// Relative tolerance when comparing time-scale factors
    pub tolerance: f64,
}

impl Default for IntegratorResultMerger {
    fn default() -> Self {
        Self { tolerance: 1e-12 }
    }
}

impl IntegratorResultMerger {
    /// Merge `new_result` into `merged`
    pub fn merge_integrator_result(
        &self,
        new_result: &IntegratorResult,
        merged: &mut IntegratorResult,
    ) -> Result<()> {
        if merged.merge_count == 0 {
            *merged = *new_result;
            merged.merge_count = 1;
            return Ok(());
        }

        let scale_differs = (merged.time_scale_factor - new_result.time_scale_factor).abs()
            > self.tolerance * merged.time_scale_factor.abs().max(1.0);
        if merged.passed && new_result.passed && scale_differs {
            return Err(DynError::Integration {
                integrator: "merger",
                message: format!(
                    "time scale factors disagree ({} vs {})",
                    merged.time_scale_factor, new_result.time_scale_factor
                ),
            });
        }

        merged.passed = merged.passed && new_result.passed;
        if !merged.passed {
            merged.time_scale_factor = merged.time_scale_factor.min(new_result.time_scale_factor);
        }
        merged.merge_count += 1;
        Ok(())
    }
}
