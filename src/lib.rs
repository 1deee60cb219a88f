//! spacedyn - multi-body reference frames and state propagation for spacecraft
//!
//! Vehicles are rigid bodies that attach into trees. Each body rides on a
//! mass body and owns structural, core and composite frames plus frames on
//! named points. Only the root of a tree is integrated; every other frame is
//! kept consistent with it by the propagation engine.
//!
//! # Modules
//!
//! - [`frame`]: reference-frame states and the frame tree
//! - [`mass`]: mass properties, mass points and the mass tree
//! - [`body`]: dynamic bodies, state propagation, attach/detach, integration
//! - [`integration`]: RK4, Gauss-Jackson and LSODE second-order integrators
//! - [`time`]: time kinds, converters and the time-tree builder
//! - [`sim`]: scenario driver
//! - [`config`], [`diagnostics`], [`error`]: ambient support

pub mod body;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod frame;
pub mod integration;
pub mod mass;
pub mod sim;
pub mod time;

pub use body::{BodyDerivatives, BodyId, DynBody, DynManager, IntegratedFrame};
pub use config::{IntegratorKind, ScenarioConfig};
pub use diagnostics::{DiagnosticSink, LogSink, RecordingSink, Severity, SharedSink};
pub use error::{DynError, Result};
pub use sim::{Simulation, SimulationReport};
pub use time::{TimeKind, TimeManager};
