//! Error taxonomy for the scheduler.
//!
//! Transient errors are retried up to the configured limit and then
//! surfaced as failed task results; they never propagate past the task
//! that produced them. Everything else fails on first occurrence.

use serde::Serialize;

/// Every error the scheduler and its units of work can produce.
#[derive(thiserror::Error, Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "detail")]
pub enum SchedulerError {
    /// Recoverable failure: timeout, connection reset, rate-limited response.
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// Unrecoverable failure: malformed input, validation failure, 4xx response.
    #[error("terminal validation error: {0}")]
    TerminalValidation(String),

    /// Admission was attempted after shutdown.
    #[error("scheduler is closed")]
    Closed,

    /// Job lookup with an id the registry has never seen.
    #[error("unknown job id: {0}")]
    NotFound(String),

    /// The task was abandoned because its job was cancelled.
    #[error("cancelled before completion")]
    Cancelled,

    /// No concurrency slot became free within the configured bound.
    #[error("timed out after {0} ms waiting for a free slot")]
    SlotWaitTimeout(u64),

    /// Rejected configuration. The only error raised synchronously at
    /// construction time.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SchedulerError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientNetwork(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(SchedulerError::TransientNetwork("reset".into()).is_retryable());
        assert!(!SchedulerError::TerminalValidation("bad url".into()).is_retryable());
        assert!(!SchedulerError::Closed.is_retryable());
        assert!(!SchedulerError::Cancelled.is_retryable());
        assert!(!SchedulerError::SlotWaitTimeout(1000).is_retryable());
    }

    #[test]
    fn test_error_serialization() {
        let json =
            serde_json::to_string(&SchedulerError::TransientNetwork("timeout".into())).unwrap();
        assert!(json.contains("TransientNetwork"));
        assert!(json.contains("timeout"));
    }
}
