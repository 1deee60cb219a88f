//! Integration techniques for generalized second-order systems
//!
//! Every technique implements [`SecondOrderOdeIntegrator`] and is built
//! through an [`IntegratorConstructor`]. Bodies own one translational and
//! (unless three-DOF) one rotational integrator and drive them stage by
//! stage, merging their results with [`IntegratorResultMerger`].

pub mod controls;
pub mod gauss_jackson;
pub mod integrator;
pub mod lsode;
pub mod ode;
pub mod result;
pub mod rotation;

pub use controls::{IntegrationControls, TimeInterface};
pub use gauss_jackson::{GaussJacksonConfig, GaussJacksonConstructor, GaussJacksonIntegrator, GaussJacksonState};
pub use integrator::{IntegratorConstructor, Rk4Constructor, Rk4Integrator, Rk4Stepper, SecondOrderOdeIntegrator};
pub use lsode::{LsodeConfig, LsodeConstructor, LsodeIntegrator, ReEntryPoint};
pub use ode::{GeneralizedPosition, RotationalTechnique, SecondOrderOde};
pub use result::{IntegratorResult, IntegratorResultMerger};
