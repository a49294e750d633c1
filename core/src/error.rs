//! Error types for dbbench-core

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error classification used across the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Unknown run, connection, template or adapter
    NotFound,
    /// Operation is illegal for the current lifecycle state
    InvalidState,
    /// Task or parameter validation failed
    Validation,
    /// Config, tool, connectivity or disk-space check failed before any process was spawned
    PreCheckFailed,
    /// A phase command exited unsuccessfully for an unrecognized reason
    ExecutionFailed,
    /// A phase deadline expired
    Timeout,
    /// The run was cancelled by a caller or engine shutdown
    Cancelled,
    /// Adapter could not realize the configuration
    Adapter,
    /// Persistence boundary failure
    Repository,
    /// Engine configuration error
    Config,
    /// Local IO failure
    Io,
}

impl ErrorKind {
    /// Whether this kind terminates a run because of a caller action or deadline
    /// rather than a fault
    pub fn is_interruption(&self) -> bool {
        matches!(self, ErrorKind::Timeout | ErrorKind::Cancelled)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidState => "invalid_state",
            ErrorKind::Validation => "validation",
            ErrorKind::PreCheckFailed => "pre_check_failed",
            ErrorKind::ExecutionFailed => "execution_failed",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Adapter => "adapter",
            ErrorKind::Repository => "repository",
            ErrorKind::Config => "config",
            ErrorKind::Io => "io",
        };
        f.write_str(name)
    }
}

/// Core engine error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct BenchError {
    /// Error classification
    pub kind: ErrorKind,
    /// Human-readable message
    pub message: String,
}

impl BenchError {
    /// Create an error of the given kind
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Unknown run or collaborator reference
    pub fn not_found(what: &str, id: impl std::fmt::Display) -> Self {
        Self::new(ErrorKind::NotFound, format!("{what} not found: {id}"))
    }

    /// Operation illegal for the current state
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidState, message)
    }

    /// Validation failure
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// Pre-check failure
    pub fn pre_check(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PreCheckFailed, message)
    }

    /// Phase command failure
    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ExecutionFailed, message)
    }

    /// Deadline expiry
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// Cancellation
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    /// Adapter failure
    pub fn adapter(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Adapter, message)
    }

    /// Repository failure
    pub fn repository(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Repository, message)
    }

    /// Configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    /// A required builder field was not provided
    pub fn missing_config(field: &str) -> Self {
        Self::config(format!("missing required configuration: {field}"))
    }

    /// Whether this error is of the given kind
    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }
}

impl From<std::io::Error> for BenchError {
    fn from(err: std::io::Error) -> Self {
        Self::new(ErrorKind::Io, err.to_string())
    }
}

/// Result type alias
pub type BenchResult<T> = std::result::Result<T, BenchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_includes_kind() {
        let err = BenchError::not_found("run", "abc");
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert_eq!(err.to_string(), "not_found: run not found: abc");
    }

    #[test]
    fn test_missing_config_message() {
        let err = BenchError::missing_config("repository");
        assert!(err.is(ErrorKind::Config));
        assert!(err.message.contains("repository"));
    }

    #[test]
    fn test_interruption_kinds() {
        assert!(ErrorKind::Timeout.is_interruption());
        assert!(ErrorKind::Cancelled.is_interruption());
        assert!(!ErrorKind::ExecutionFailed.is_interruption());
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: BenchError = io.into();
        assert_eq!(err.kind, ErrorKind::Io);
    }
}
