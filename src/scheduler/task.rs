//! The unit-of-work contract and its settlement record.

use async_trait::async_trait;
use serde::Serialize;

use crate::scheduler::error::SchedulerError;

/// An opaque asynchronous unit of work.
///
/// The scheduler never looks inside `execute` — it only admits it, retries
/// it, and records its outcome. Implementations own their operation
/// timeout; the scheduler does not impose one.
#[async_trait]
pub trait Task: Send + Sync + 'static {
    /// What a successful execution yields.
    type Output: Send + Sync + Clone + 'static;

    /// Stable identifier, echoed in results and events.
    fn id(&self) -> String;

    /// Per-task retry override. `None` uses the scheduler default.
    fn max_retries(&self) -> Option<u32> {
        None
    }

    /// Execute one attempt.
    async fn execute(&self) -> Result<Self::Output, SchedulerError>;
}

/// Final outcome of one task after all attempts.
#[derive(Debug, Clone, Serialize)]
#[serde(bound(serialize = "O: Serialize"), rename_all = "camelCase")]
pub struct TaskResult<O> {
    pub task_id: String,
    /// The value of the last attempt, or the error that settled the task.
    pub outcome: Result<O, SchedulerError>,
    /// Attempts actually made (0 when cancelled before the first).
    pub attempts: u32,
    /// Wall time from first admission to settlement.
    pub duration_ms: u64,
}

impl<O> TaskResult<O> {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn error_message(&self) -> Option<String> {
        self.outcome.as_ref().err().map(|e| e.to_string())
    }
}
