//! LSODE-style variable-order BDF integration
//!
//! A Nordsieck-array backward differentiation solver with Newton (chord)
//! correction and automatic order and step-size selection. It takes as many
//! internal steps as it needs to reach the end of the caller's step and
//! interpolates the output there. Every derivative it needs is requested
//! from the caller as another stage.

mod coefficients;
mod integrator;

pub use coefficients::{BdfCoefficients, MAX_BDF_ORDER};
pub use integrator::{LsodeIntegrator, LsodeStats, ReEntryPoint};

use serde::{Deserialize, Serialize};

use crate::error::{DynError, Result};

use super::integrator::{IntegratorConstructor, SecondOrderOdeIntegrator};
use super::ode::{RotationalTechnique, SecondOrderOde};

/// LSODE tuning
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LsodeConfig {
    /// Relative error tolerance
    pub rtol: f64,
    /// Absolute error tolerance
    pub atol: f64,
    /// Highest order the solver may select
    pub max_order: usize,
    /// Internal steps allowed per caller step
    pub max_steps: usize,
    /// Newton iterations before a convergence failure
    pub max_corrector_iterations: usize,
    /// Convergence failures allowed within one step
    pub max_convergence_failures: u32,
    /// Error-test failures allowed within one step
    pub max_error_failures: u32,
}

impl Default for LsodeConfig {
    fn default() -> Self {
        Self {
            rtol: 1e-10,
            atol: 1e-12,
            max_order: MAX_BDF_ORDER,
            max_steps: 500,
            max_corrector_iterations: 3,
            max_convergence_failures: 10,
            max_error_failures: 10,
        }
    }
}

impl LsodeConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.rtol >= 0.0 && self.atol >= 0.0) || self.rtol + self.atol <= 0.0 {
            return Err(DynError::Config {
                message: format!(
                    "LSODE tolerances must be non-negative and not both zero (rtol {}, atol {})",
                    self.rtol, self.atol
                ),
            });
        }
        if self.max_order == 0 || self.max_order > MAX_BDF_ORDER {
            return Err(DynError::Config {
                message: format!(
                    "LSODE max order {} outside 1..={}",
                    self.max_order, MAX_BDF_ORDER
                ),
            });
        }
        if self.max_steps == 0 || self.max_corrector_iterations == 0 {
            return Err(DynError::Config {
                message: "LSODE step and corrector bounds must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Builds [`LsodeIntegrator`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct LsodeConstructor {
    pub config: LsodeConfig,
}

impl LsodeConstructor {
    pub fn new(config: LsodeConfig) -> Self {
        Self { config }
    }
}

impl IntegratorConstructor for LsodeConstructor {
    fn name(&self) -> &'static str {
        "LSODE"
    }

    fn supports(&self, technique: RotationalTechnique) -> bool {
        technique == RotationalTechnique::GeneralizedDerivative
    }

    fn create_integrator(&self, ode: SecondOrderOde) -> Result<Box<dyn SecondOrderOdeIntegrator>> {
        Ok(Box::new(LsodeIntegrator::new(ode, self.config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        assert!(LsodeConfig::default().validate().is_ok());
        let zero_tol = LsodeConfig {
            rtol: 0.0,
            atol: 0.0,
            ..Default::default()
        };
        assert!(zero_tol.validate().is_err());
        let high_order = LsodeConfig {
            max_order: 6,
            ..Default::default()
        };
        assert!(high_order.validate().is_err());
    }

    #[test]
    fn test_config_from_partial_json() {
        let config: LsodeConfig = serde_json::from_str(r#"{"rtol": 1e-6}"#).unwrap();
        assert_eq!(config.rtol, 1e-6);
        assert_eq!(config.max_order, MAX_BDF_ORDER);
    }

    #[test]
    fn test_constructor_supports_derivative_only() {
        let constructor = LsodeConstructor::default();
        assert!(constructor.supports(RotationalTechnique::GeneralizedDerivative));
        assert!(!constructor.supports(RotationalTechnique::GeneralizedStep));
    }
}
