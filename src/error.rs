//! Error types shared across the crate
//!
//! Fatal conditions (broken tree topology, unplaceable time nodes, exhausted
//! integrator bounds) surface as [`DynError::Fatal`] and are expected to end
//! the run. Recoverable conditions never produce a `DynError`; those paths
//! report through the diagnostics sink and return a failure indicator instead.

use thiserror::Error;

/// Errors raised by the dynamics core
#[derive(Debug, Clone, Error)]
pub enum DynError {
    /// Unrecoverable condition reported through the `fail` severity
    #[error("[{code}] {message}")]
    Fatal {
        /// Stable message code identifying the failing subsystem
        code: &'static str,
        /// Human readable description
        message: String,
    },

    /// A numerical integrator exhausted one of its bounds
    #[error("integration failed in {integrator}: {message}")]
    Integration {
        /// Integrator name
        integrator: &'static str,
        /// Description of the exhausted bound
        message: String,
    },

    /// Scenario or model configuration could not be honoured
    #[error("invalid configuration: {message}")]
    Config { message: String },
}

impl DynError {
    /// Message code of a fatal error, if any
    pub fn code(&self) -> Option<&'static str> {
        match self {
            Self::Fatal { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Check whether this error carries the given fatal message code
    pub fn is_fatal_code(&self, code: &str) -> bool {
        self.code() == Some(code)
    }
}

/// Result alias for the dynamics core
pub type Result<T> = std::result::Result<T, DynError>;
