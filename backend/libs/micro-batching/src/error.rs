//! Error types for the micro-batching library.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for micro-batching operations.
pub type BatcherResult<T> = Result<T, BatcherError>;

/// Errors surfaced by the batching engine.
///
/// Processing failures never show up here: they travel inside
/// [`JobResult`](crate::JobResult) as `success = false` plus an error message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BatcherError {
    /// The engine is shutting down and no longer admits jobs.
    ///
    /// Callers must not retry against the same instance.
    #[error("system is shutting down, cannot accept new jobs")]
    ShuttingDown,

    /// Configuration rejected at construction time
    #[error("invalid batcher configuration: {0}")]
    InvalidConfig(String),

    /// Shutdown gave up waiting for in-flight jobs
    #[error("shutdown timed out after {0:?} waiting for in-flight jobs")]
    ShutdownTimedOut(Duration),
}

impl BatcherError {
    /// Whether the error means the engine rejected a submission.
    pub fn is_rejection(&self) -> bool {
        matches!(self, BatcherError::ShuttingDown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutting_down_is_rejection() {
        assert!(BatcherError::ShuttingDown.is_rejection());
        assert!(!BatcherError::InvalidConfig("batch_size".into()).is_rejection());
        assert!(!BatcherError::ShutdownTimedOut(Duration::from_secs(1)).is_rejection());
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            BatcherError::ShuttingDown.to_string(),
            "system is shutting down, cannot accept new jobs"
        );
        assert_eq!(
            BatcherError::InvalidConfig("batch_size must be positive".into()).to_string(),
            "invalid batcher configuration: batch_size must be positive"
        );
    }
}
