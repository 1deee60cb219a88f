//! Diagnostic reporting
//!
//! Components never reach for a global message handler. They are handed a
//! [`DiagnosticSink`] and report through four severities:
//!
//! - **fail**: unrecoverable, the call returns the [`DynError`] to propagate
//! - **error** / **warn**: recoverable, the operation reports a failure indicator
//! - **inform**: informational only
//!
//! Every call site supplies a stable message code from [`codes`].
//!
//! # Example
//!
//! ```ignore
//! use spacedyn::diagnostics::{codes, DiagnosticSink, LogSink};
//!
//! let sink = LogSink::shared();
//! sink.warn(codes::INVALID_ATTACH, "bodies are not attached to each other");
//! return Err(sink.fail(codes::INVALID_NODE, "frame has no common ancestor"));
//! ```

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::DynError;

/// Stable message codes used to categorize diagnostics
pub mod codes {
    /// Illegal attach/detach request or broken attachment bookkeeping
    pub const INVALID_ATTACH: &str = "dynamics/invalid_attach";
    /// Frame or node lookup failure
    pub const INVALID_NODE: &str = "dynamics/invalid_node";
    /// Invalid object name or duplicate registration
    pub const INVALID_NAME: &str = "dynamics/invalid_name";
    /// Missing or misconfigured integration frame
    pub const INVALID_INTEG_FRAME: &str = "dynamics/invalid_integ_frame";
    /// Caller supplied a frame not owned by the body
    pub const INVALID_FRAME_OWNER: &str = "dynamics/invalid_frame_owner";
    /// Integration technique or constructor mismatch
    pub const INTEGRATOR_MISMATCH: &str = "integration/technique_mismatch";
    /// Integrator exhausted an iteration or step bound
    pub const INTEGRATOR_FAILURE: &str = "integration/failure";
    /// Merged integrator results disagree
    pub const INTEGRATOR_MERGE: &str = "integration/merge";
    /// Time converter tree could not be built
    pub const TIME_TREE: &str = "time/tree_construction";
    /// Time converter lookup or direction failure
    pub const TIME_CONVERTER: &str = "time/converter";
    /// Informational time-system message
    pub const TIME_INFO: &str = "time/info";
    /// Mass tree failure
    pub const MASS_TREE: &str = "mass/tree";
}

/// Message severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// Informational
    Inform,
    /// Recoverable, suspicious
    Warn,
    /// Recoverable, operation failed
    Error,
    /// Unrecoverable
    Fail,
}

impl Severity {
    /// Display name for the severity
    pub fn name(&self) -> &'static str {
        match self {
            Self::Inform => "inform",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Fail => "fail",
        }
    }
}

/// A single reported diagnostic
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: &'static str,
    pub message: String,
}

/// Receiver of diagnostics
///
/// Implementors only provide [`DiagnosticSink::report`]; the severity helpers
/// are provided on top of it.
pub trait DiagnosticSink: Send + Sync {
    /// Record a diagnostic
    fn report(&self, severity: Severity, code: &'static str, message: &str);

    /// Report an unrecoverable condition and return the error to propagate
    fn fail(&self, code: &'static str, message: &str) -> DynError {
        self.report(Severity::Fail, code, message);
        DynError::Fatal {
            code,
            message: message.to_string(),
        }
    }

    /// Report a recoverable error
    fn error(&self, code: &'static str, message: &str) {
        self.report(Severity::Error, code, message);
    }

    /// Report a warning
    fn warn(&self, code: &'static str, message: &str) {
        self.report(Severity::Warn, code, message);
    }

    /// Report an informational message
    fn inform(&self, code: &'static str, message: &str) {
        self.report(Severity::Inform, code, message);
    }
}

/// Shared handle to a sink
pub type SharedSink = Arc<dyn DiagnosticSink>;

/// Sink that routes every diagnostic to the `log` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl LogSink {
    /// Create a shared log sink
    pub fn shared() -> SharedSink {
        Arc::new(LogSink)
    }
}

impl DiagnosticSink for LogSink {
    fn report(&self, severity: Severity, code: &'static str, message: &str) {
        match severity {
            Severity::Fail | Severity::Error => log::error!("[{}] {}", code, message),
            Severity::Warn => log::warn!("[{}] {}", code, message),
            Severity::Inform => log::info!("[{}] {}", code, message),
        }
    }
}

/// Sink that keeps every diagnostic in memory and also forwards to `log`
#[derive(Debug, Default)]
pub struct RecordingSink {
    records: Mutex<Vec<Diagnostic>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shared recording sink, returning both the concrete handle
    /// (for inspection) and the trait object (for injection)
    pub fn shared() -> (Arc<RecordingSink>, SharedSink) {
        let sink = Arc::new(RecordingSink::new());
        let shared: SharedSink = sink.clone();
        (sink, shared)
    }

    /// Snapshot of all diagnostics recorded so far
    pub fn records(&self) -> Vec<Diagnostic> {
        self.records.lock().clone()
    }

    /// Number of diagnostics with the given severity
    pub fn count(&self, severity: Severity) -> usize {
        self.records
            .lock()
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    /// Whether any diagnostic carries the given code
    pub fn contains_code(&self, code: &str) -> bool {
        self.records.lock().iter().any(|d| d.code == code)
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl DiagnosticSink for RecordingSink {
    fn report(&self, severity: Severity, code: &'static str, message: &str) {
        LogSink.report(severity, code, message);
        self.records.lock().push(Diagnostic {
            severity,
            code,
            message: message.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fail_returns_fatal_error() {
        let (recorder, sink) = RecordingSink::shared();
        let err = sink.fail(codes::INVALID_NODE, "no common ancestor");

        assert!(err.is_fatal_code(codes::INVALID_NODE));
        assert_eq!(recorder.count(Severity::Fail), 1);
        assert!(err.to_string().contains("no common ancestor"));
    }

    #[test]
    fn test_recording_sink_counts_by_severity() {
        let (recorder, sink) = RecordingSink::shared();
        sink.warn(codes::INVALID_ATTACH, "a");
        sink.warn(codes::INVALID_ATTACH, "b");
        sink.inform(codes::TIME_INFO, "c");

        assert_eq!(recorder.count(Severity::Warn), 2);
        assert_eq!(recorder.count(Severity::Inform), 1);
        assert!(recorder.contains_code(codes::TIME_INFO));
        assert!(!recorder.contains_code(codes::MASS_TREE));

        recorder.clear();
        assert!(recorder.records().is_empty());
    }
}
