//! Diagnostic report sinks.
//!
//! Every stage and plugin logs through a [`Report`]. The pipeline
//! normally forwards to `tracing`, but the sink is an explicit,
//! swappable object: during a stage restart the executor redirects the
//! plugin's report to the supervisor's sink so that configuration
//! errors reach the caller.

use parking_lot::Mutex;
use std::fmt;

/// Message severity, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// An operation failed.
    Error,
    /// Something suspicious, processing continues.
    Warning,
    /// Normal informational message.
    Info,
    /// Detail shown in verbose mode.
    Verbose,
    /// Debug-level detail.
    Debug,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
            Severity::Verbose => "verbose",
            Severity::Debug => "debug",
        };
        f.write_str(name)
    }
}

/// A sink for diagnostic messages.
pub trait Report: Send + Sync {
    /// Log one message at the given severity.
    fn log(&self, severity: Severity, message: &str);

    /// Log an error message.
    fn error(&self, message: &str) {
        self.log(Severity::Error, message);
    }

    /// Log a warning message.
    fn warning(&self, message: &str) {
        self.log(Severity::Warning, message);
    }

    /// Log an informational message.
    fn info(&self, message: &str) {
        self.log(Severity::Info, message);
    }

    /// Log a verbose message.
    fn verbose(&self, message: &str) {
        self.log(Severity::Verbose, message);
    }

    /// Log a debug message.
    fn debug(&self, message: &str) {
        self.log(Severity::Debug, message);
    }
}

/// Report sink forwarding to the `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReport;

impl Report for LogReport {
    fn log(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Error => tracing::error!("{message}"),
            Severity::Warning => tracing::warn!("{message}"),
            Severity::Info => tracing::info!("{message}"),
            Severity::Verbose => tracing::debug!("{message}"),
            Severity::Debug => tracing::trace!("{message}"),
        }
    }
}

/// Report sink discarding everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReport;

impl Report for NullReport {
    fn log(&self, _severity: Severity, _message: &str) {}
}

/// One captured report record.
#[derive(Debug, Clone)]
pub struct ReportRecord {
    /// Message severity.
    pub severity: Severity,
    /// Message text.
    pub message: String,
}

/// Report sink collecting records for later inspection.
///
/// Used by supervisors to capture the outcome of a stage restart, and
/// by tests.
#[derive(Debug, Default)]
pub struct CaptureReport {
    records: Mutex<Vec<ReportRecord>>,
}

impl CaptureReport {
    /// Create an empty capture sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a copy of all captured records.
    pub fn records(&self) -> Vec<ReportRecord> {
        self.records.lock().clone()
    }

    /// Get the messages captured at the given severity.
    pub fn messages(&self, severity: Severity) -> Vec<String> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.severity == severity)
            .map(|r| r.message.clone())
            .collect()
    }

    /// Check if any record at the given severity was captured.
    pub fn has(&self, severity: Severity) -> bool {
        self.records.lock().iter().any(|r| r.severity == severity)
    }

    /// Discard all captured records.
    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl Report for CaptureReport {
    fn log(&self, severity: Severity, message: &str) {
        self.records.lock().push(ReportRecord {
            severity,
            message: message.to_string(),
        });
    }
}
