// Copyright 2026 Trawl Contributors
// SPDX-License-Identifier: Apache-2.0

//! Job registry: lifecycle and progress for batch operations.
//!
//! A job moves `pending → running → {completed | failed | cancelled}`,
//! reaching a terminal status exactly once. Progress is monotonically
//! non-decreasing and results stop being appended after the terminal
//! transition. Cancellation is cooperative: the job's token fires, no new
//! chunks are dispatched, and in-flight tasks finish naturally.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::scheduler::error::SchedulerError;
use crate::scheduler::task::TaskResult;

pub type JobId = Uuid;

/// Lifecycle states of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Point-in-time copy of a job's externally visible state.
#[derive(Debug, Clone, Serialize)]
#[serde(bound(serialize = "O: Serialize"), rename_all = "camelCase")]
pub struct JobSnapshot<O> {
    pub id: String,
    pub status: JobStatus,
    /// Percentage of tasks settled, 0–100.
    pub progress: u8,
    pub total_tasks: usize,
    pub results: Vec<TaskResult<O>>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl<O> JobSnapshot<O> {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }
}

struct JobEntry<O> {
    status: JobStatus,
    progress: u8,
    total_tasks: usize,
    results: Vec<TaskResult<O>>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    cancel: CancellationToken,
    status_tx: watch::Sender<JobStatus>,
}

impl<O: Clone> JobEntry<O> {
    fn snapshot(&self, id: JobId) -> JobSnapshot<O> {
        JobSnapshot {
            id: id.to_string(),
            status: self.status,
            progress: self.progress,
            total_tasks: self.total_tasks,
            results: self.results.clone(),
            error: self.error.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            ended_at: self.ended_at,
        }
    }

    fn transition(&mut self, status: JobStatus) {
        self.status = status;
        if status.is_terminal() {
            self.ended_at = Some(Utc::now());
        }
        let _ = self.status_tx.send(status);
    }
}

/// Tracks every job the scheduler has accepted. Lookup by id is O(1).
pub struct JobRegistry<O> {
    jobs: DashMap<JobId, JobEntry<O>>,
}

impl<O: Clone> JobRegistry<O> {
    pub fn new() -> Self {
        Self {
            jobs: DashMap::new(),
        }
    }

    /// Register a new pending job and return its id.
    pub fn create(&self, total_tasks: usize) -> JobId {
        let id = Uuid::new_v4();
        let (status_tx, _) = watch::channel(JobStatus::Pending);
        self.jobs.insert(
            id,
            JobEntry {
                status: JobStatus::Pending,
                progress: 0,
                total_tasks,
                results: Vec::with_capacity(total_tasks),
                error: None,
                created_at: Utc::now(),
                started_at: None,
                ended_at: None,
                cancel: CancellationToken::new(),
                status_tx,
            },
        );
        id
    }

    /// First dispatch: `pending → running`.
    pub fn mark_running(&self, id: JobId) -> Result<(), SchedulerError> {
        let mut entry = self.entry_mut(id)?;
        if entry.status == JobStatus::Pending {
            entry.started_at = Some(Utc::now());
            entry.transition(JobStatus::Running);
        }
        Ok(())
    }

    /// Append a settled task and advance progress. Returns
    /// `(settled, total)` for progress reporting. Results arriving after
    /// the terminal transition are dropped.
    pub fn record_result(
        &self,
        id: JobId,
        result: TaskResult<O>,
    ) -> Result<(usize, usize, u8), SchedulerError> {
        let mut entry = self.entry_mut(id)?;
        if entry.status.is_terminal() {
            debug!("job {id} already terminal; dropping late result");
            let settled = entry.results.len();
            return Ok((settled, entry.total_tasks, entry.progress));
        }
        entry.results.push(result);
        let settled = entry.results.len();
        let percent = if entry.total_tasks == 0 {
            100
        } else {
            ((settled * 100) / entry.total_tasks) as u8
        };
        entry.progress = entry.progress.max(percent);
        Ok((settled, entry.total_tasks, entry.progress))
    }

    /// Terminal transition to `completed`.
    pub fn finish_completed(&self, id: JobId) -> Result<(), SchedulerError> {
        self.finish(id, JobStatus::Completed, None)
    }

    /// Terminal transition to `failed` with a job-level error.
    pub fn finish_failed(&self, id: JobId, error: &str) -> Result<(), SchedulerError> {
        self.finish(id, JobStatus::Failed, Some(error.to_string()))
    }

    /// Terminal transition to `cancelled`, used by the orchestrator after
    /// the in-flight chunk has drained.
    pub fn finish_cancelled(&self, id: JobId) -> Result<(), SchedulerError> {
        self.finish(id, JobStatus::Cancelled, None)
    }

    fn finish(
        &self,
        id: JobId,
        status: JobStatus,
        error: Option<String>,
    ) -> Result<(), SchedulerError> {
        let mut entry = self.entry_mut(id)?;
        if entry.status.is_terminal() {
            debug!("job {id} already {}; ignoring {status}", entry.status);
            return Ok(());
        }
        if entry.total_tasks == 0 || status == JobStatus::Completed {
            entry.progress = 100;
        }
        entry.error = error;
        entry.transition(status);
        Ok(())
    }

    /// Request cooperative cancellation. A pending job is cancelled on the
    /// spot; a running job keeps its status until the orchestrator drains
    /// the in-flight chunk. Returns the status observed after the request.
    pub fn cancel(&self, id: JobId) -> Result<JobStatus, SchedulerError> {
        let mut entry = self.entry_mut(id)?;
        match entry.status {
            JobStatus::Pending => {
                entry.cancel.cancel();
                entry.transition(JobStatus::Cancelled);
            }
            JobStatus::Running => entry.cancel.cancel(),
            _ => {}
        }
        Ok(entry.status)
    }

    /// The job's cancellation token, observed by every suspension point.
    pub fn cancel_token(&self, id: JobId) -> Result<CancellationToken, SchedulerError> {
        Ok(self.entry(id)?.cancel.clone())
    }

    pub fn snapshot(&self, id: JobId) -> Result<JobSnapshot<O>, SchedulerError> {
        Ok(self.entry(id)?.snapshot(id))
    }

    pub fn status(&self, id: JobId) -> Result<JobStatus, SchedulerError> {
        Ok(self.entry(id)?.status)
    }

    /// Wait for the job to reach a terminal status, then snapshot it.
    pub async fn wait(&self, id: JobId) -> Result<JobSnapshot<O>, SchedulerError> {
        let mut status_rx = self.entry(id)?.status_tx.subscribe();
        loop {
            if status_rx.borrow().is_terminal() {
                return self.snapshot(id);
            }
            if status_rx.changed().await.is_err() {
                return self.snapshot(id);
            }
        }
    }

    fn entry(
        &self,
        id: JobId,
    ) -> Result<dashmap::mapref::one::Ref<'_, JobId, JobEntry<O>>, SchedulerError> {
        self.jobs
            .get(&id)
            .ok_or_else(|| SchedulerError::NotFound(id.to_string()))
    }

    fn entry_mut(
        &self,
        id: JobId,
    ) -> Result<dashmap::mapref::one::RefMut<'_, JobId, JobEntry<O>>, SchedulerError> {
        self.jobs
            .get_mut(&id)
            .ok_or_else(|| SchedulerError::NotFound(id.to_string()))
    }
}

impl<O: Clone> Default for JobRegistry<O> {
    fn default() -> Self {
        Self::new()
    }
}
