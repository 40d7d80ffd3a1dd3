use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Cooperative cancellation token. Consulted at `orchestrator`'s stage
/// boundaries and at coarse-grained checkpoints inside the per-frame loops of
/// `correlation`/`features`/`drift` (`§5`: "every 1024 frames").
pub type CancelToken = Arc<AtomicBool>;

#[must_use]
pub fn is_cancelled(cancel: Option<&CancelToken>) -> bool {
    cancel.is_some_and(|c| c.load(Ordering::Relaxed))
}

/// Stable wire error taxonomy (`§6`/`§7` of the alignment contract).
///
/// `Success` has no variant here; the absence of an `AlignError` on an
/// `AlignmentResult` *is* success.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AlignError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("insufficient data: {0}")]
    InsufficientData(String),
    #[error("processing failed: {0}")]
    ProcessingFailed(String),
    #[error("out of memory")]
    OutOfMemory,
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
}

pub type AlignResult<T> = Result<T, AlignError>;

impl AlignError {
    /// Stable wire code, per `§6`: `0=Success, -1..-5` for the variants below.
    #[must_use]
    pub fn wire_code(&self) -> i32 {
        match self {
            Self::InvalidInput(_) => -1,
            Self::InsufficientData(_) => -2,
            Self::ProcessingFailed(_) => -3,
            Self::OutOfMemory => -4,
            Self::UnsupportedFormat(_) => -5,
        }
    }

    #[must_use]
    pub fn cancelled() -> Self {
        Self::InsufficientData("cancelled".to_string())
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::InsufficientData(msg) if msg == "cancelled")
    }
}

/// Fixed human-readable message for a wire error code, per `§7`.
#[must_use]
pub fn error_description(code: i32) -> &'static str {
    match code {
        0 => "success",
        -1 => "invalid input: null/empty samples, non-finite values, sample-rate mismatch, or out-of-range config",
        -2 => "insufficient data: duration below method minimum, peak pinned to search boundary, silent signal, or cancelled",
        -3 => "processing failed: a numerical fault occurred during analysis",
        -4 => "out of memory",
        -5 => "unsupported format",
        _ => "unknown error code",
    }
}

/// Severity of a log entry in the optional in-memory error log (`§7`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Trace,
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

/// A recommended recovery action attached to a logged error (`§7`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    Retry,
    Fallback,
    Degrade,
    UserInput,
    None,
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub severity: Severity,
    pub message: String,
    pub recovery: Recovery,
}

/// Bounded, opt-in in-memory error log. Never consulted on the success path;
/// purely a diagnostic aid for callers who enable it.
pub struct ErrorLog {
    capacity: usize,
    entries: Mutex<VecDeque<LogEntry>>,
}

impl ErrorLog {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(256))),
        }
    }

    pub fn record(&self, severity: Severity, message: impl Into<String>, recovery: Recovery) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(LogEntry {
            severity,
            message: message.into(),
            recovery,
        });
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}

impl Default for ErrorLog {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_codes_match_contract() {
        assert_eq!(AlignError::InvalidInput(String::new()).wire_code(), -1);
        assert_eq!(AlignError::InsufficientData(String::new()).wire_code(), -2);
        assert_eq!(AlignError::ProcessingFailed(String::new()).wire_code(), -3);
        assert_eq!(AlignError::OutOfMemory.wire_code(), -4);
        assert_eq!(AlignError::UnsupportedFormat(String::new()).wire_code(), -5);
    }

    #[test]
    fn cancelled_is_insufficient_data() {
        let e = AlignError::cancelled();
        assert!(e.is_cancelled());
        assert_eq!(e.wire_code(), -2);
    }

    #[test]
    fn log_is_bounded() {
        let log = ErrorLog::new(2);
        log.record(Severity::Warning, "a", Recovery::None);
        log.record(Severity::Warning, "b", Recovery::None);
        log.record(Severity::Warning, "c", Recovery::None);
        let snap = log.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].message, "b");
        assert_eq!(snap[1].message, "c");
    }
}
