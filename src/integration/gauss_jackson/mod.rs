//! Gauss-Jackson multistep integration
//!
//! A fixed-step predictor-corrector started from RK4 at a reduced step,
//! doubling the step and raising the order until the caller's step and the
//! final order are reached.

mod coefficients;
mod integrator;

pub use coefficients::{difference_sum, MultistepCoefficients};
pub use integrator::{GaussJacksonIntegrator, GaussJacksonState};

use serde::{Deserialize, Serialize};

use crate::error::{DynError, Result};

use super::integrator::{IntegratorConstructor, SecondOrderOdeIntegrator};
use super::ode::{RotationalTechnique, SecondOrderOde};

/// Gauss-Jackson tuning
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GaussJacksonConfig {
    /// Order used while priming
    pub initial_order: usize,
    /// Order once operational
    pub final_order: usize,
    /// Number of step doublings between the bootstrap step and the caller's
    pub ndoubling_steps: u32,
    /// Bound on corrector passes while editing one point
    pub max_correction_iterations: u32,
    /// Relative convergence tolerance of an edit
    pub edit_tolerance: f64,
}

impl Default for GaussJacksonConfig {
    fn default() -> Self {
        Self {
            initial_order: 8,
            final_order: 12,
            ndoubling_steps: 4,
            max_correction_iterations: 20,
            edit_tolerance: 1e-10,
        }
    }
}

impl GaussJacksonConfig {
    pub fn validate(&self) -> Result<()> {
        if self.initial_order < 3 {
            return Err(DynError::Config {
                message: format!("Gauss-Jackson initial order {} is below 3", self.initial_order),
            });
        }
        if self.final_order < self.initial_order {
            return Err(DynError::Config {
                message: format!(
                    "Gauss-Jackson final order {} is below initial order {}",
                    self.final_order, self.initial_order
                ),
            });
        }
        if self.max_correction_iterations == 0 || !(self.edit_tolerance >= 0.0) {
            return Err(DynError::Config {
                message: "Gauss-Jackson edit bounds must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Order in use after `doublings` step doublings
    ///
    /// Rises from `initial_order` to `final_order`, rounding up, so the final
    /// order is reached at the last doubling.
    pub fn order_after_doubling(&self, doublings: u32) -> usize {
        if self.ndoubling_steps == 0 {
            return self.final_order;
        }
        let n = self.ndoubling_steps as usize;
        let i = doublings.min(self.ndoubling_steps) as usize;
        self.initial_order + ((self.final_order - self.initial_order) * i).div_ceil(n)
    }
}

/// Builds [`GaussJacksonIntegrator`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct GaussJacksonConstructor {
    pub config: GaussJacksonConfig,
}

impl GaussJacksonConstructor {
    pub fn new(config: GaussJacksonConfig) -> Self {
        Self { config }
    }
}

impl IntegratorConstructor for GaussJacksonConstructor {
    fn name(&self) -> &'static str {
        "Gauss-Jackson"
    }

    fn supports(&self, technique: RotationalTechnique) -> bool {
        technique == RotationalTechnique::GeneralizedDerivative
    }

    fn create_integrator(&self, ode: SecondOrderOde) -> Result<Box<dyn SecondOrderOdeIntegrator>> {
        Ok(Box::new(GaussJacksonIntegrator::new(ode, self.config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_schedule() {
        let config = GaussJacksonConfig::default();
        let orders: Vec<usize> = (0..=4).map(|i| config.order_after_doubling(i)).collect();
        assert_eq!(orders, vec![8, 9, 10, 11, 12]);

        let uneven = GaussJacksonConfig {
            initial_order: 4,
            final_order: 9,
            ndoubling_steps: 2,
            ..Default::default()
        };
        assert_eq!(uneven.order_after_doubling(1), 7);
        assert_eq!(uneven.order_after_doubling(2), 9);
    }

    #[test]
    fn test_validate() {
        assert!(GaussJacksonConfig::default().validate().is_ok());
        let low = GaussJacksonConfig {
            initial_order: 2,
            ..Default::default()
        };
        assert!(low.validate().is_err());
        let inverted = GaussJacksonConfig {
            initial_order: 10,
            final_order: 8,
            ..Default::default()
        };
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn test_constructor_supports_derivative_only() {
        let constructor = GaussJacksonConstructor::default();
        assert!(constructor.supports(RotationalTechnique::GeneralizedDerivative));
        assert!(!constructor.supports(RotationalTechnique::GeneralizedStep));
        assert!(constructor.create_translational().is_ok());
    }
}
