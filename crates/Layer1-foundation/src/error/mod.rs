//! Error types for DashDeep
//!
//! Structural failures of the task core live here. Failures raised by a job
//! body never become an `Error`: they stay in the task handle as a
//! `TaskFailure` (see `dashdeep-task`).

use std::time::Duration;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// DashDeep error type
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Config
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // Task lifecycle
    // ========================================================================
    /// The pool cannot accept work (shut down, or the job cannot be resolved)
    #[error("Scheduling error: {0}")]
    Scheduling(String),

    /// Operation is meaningless for the task's current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A worker process survived graceful and forced termination
    #[error("Worker {pid} did not exit within {waited:?}")]
    ShutdownTimeout { pid: u32, waited: Duration },

    // ========================================================================
    // Worker processes
    // ========================================================================
    #[error("Worker error: {0}")]
    Worker(String),

    #[error("Worker protocol error: {0}")]
    Protocol(String),

    // ========================================================================
    // General
    // ========================================================================
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ========================================================================
    // External error conversions
    // ========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ========================================================================
    // Other
    // ========================================================================
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Scheduling error helper
    pub fn scheduling(message: impl Into<String>) -> Self {
        Error::Scheduling(message.into())
    }

    /// Invalid state error helper
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Error::InvalidState(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_helpers_build_lifecycle_errors() {
        assert!(matches!(Error::scheduling("pool is shut down"), Error::Scheduling(_)));
        assert_eq!(
            Error::invalid_state("task 0 is finished").to_string(),
            "Invalid state: task 0 is finished"
        );
    }

    #[test]
    fn test_shutdown_timeout_message() {
        let err = Error::ShutdownTimeout {
            pid: 42,
            waited: Duration::from_secs(2),
        };
        assert_eq!(err.to_string(), "Worker 42 did not exit within 2s");
    }
}
