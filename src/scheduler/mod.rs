// Copyright 2026 Trawl Contributors
// SPDX-License-Identifier: Apache-2.0

//! Adaptive, rate-limited concurrency scheduler.
//!
//! Governs how many units of work execute simultaneously, paces bursts,
//! retries recoverable failures, and tracks job lifecycle. Each scrape is
//! an opaque [`Task`]; rendering and extraction live elsewhere.
//!
//! Composition, leaves first:
//!
//! 1. [`gate::ConcurrencyGate`] — caps in-flight work, FIFO admission
//! 2. [`rate::WindowedRateCounter`] — caps admissions per time window
//! 3. [`throttle::AdaptiveThrottle`] — scales ceiling and delay from outcomes
//! 4. [`retry::RetryCoordinator`] — bounded, jittered retries per task
//! 5. [`batch::BatchOrchestrator`] — chunked dispatch with settlement barriers
//! 6. [`jobs::JobRegistry`] — lifecycle, progress, cancellation
//!
//! The [`Scheduler`] facade wires them together and is the only type most
//! callers need.

pub mod batch;
pub mod config;
pub mod error;
pub mod gate;
pub mod jobs;
pub mod rate;
pub mod retry;
pub mod task;
pub mod throttle;

use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::events::{EventBus, SchedulerEvent};
use self::batch::BatchOrchestrator;
use self::config::SchedulerConfig;
use self::error::SchedulerError;
use self::gate::ConcurrencyGate;
use self::jobs::{JobId, JobRegistry, JobSnapshot, JobStatus};
use self::rate::WindowedRateCounter;
use self::retry::RetryCoordinator;
use self::task::{Task, TaskResult};
use self::throttle::AdaptiveThrottle;

/// Live view of the scheduler's shared counters.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    /// Units of work holding a slot right now.
    pub active_count: usize,
    /// Callers waiting for a slot.
    pub queued_count: usize,
    /// Effective concurrency ceiling after adaptive adjustments.
    pub current_concurrency_limit: usize,
    /// Effective inter-task delay after adaptive adjustments.
    pub current_delay_ms: u64,
    /// Admissions counted against the current rate window.
    pub requests_in_current_window: u32,
}

/// The adaptive scheduler: one instance governs all concurrent callers —
/// single scrapes, batches, and long-running bulk jobs alike share its
/// gate, rate window, and throttle.
pub struct Scheduler<T: Task> {
    orchestrator: BatchOrchestrator<T>,
}

impl<T: Task> Clone for Scheduler<T> {
    fn clone(&self) -> Self {
        Self {
            orchestrator: self.orchestrator.clone(),
        }
    }
}

impl<T: Task> Scheduler<T> {
    /// Build a scheduler from a validated configuration.
    ///
    /// This is the only place a configuration error surfaces
    /// synchronously; everything after construction reports through task
    /// results and job snapshots.
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        config.validate()?;
        let gate = Arc::new(ConcurrencyGate::new(config.max_concurrent));
        let rate = Arc::new(WindowedRateCounter::new(
            config.time_window(),
            config.burst_limit,
        ));
        let throttle = Arc::new(AdaptiveThrottle::new(
            config.max_concurrent,
            config.delay(),
            config.max_delay(),
            config.throttle.clone(),
        ));
        let retry = Arc::new(RetryCoordinator::new(&config));
        let registry = Arc::new(JobRegistry::new());
        let events = Arc::new(EventBus::new(256));
        let orchestrator =
            BatchOrchestrator::new(&config, gate, rate, throttle, retry, registry, events);
        Ok(Self { orchestrator })
    }

    /// Run a single unit of work through the full admission pipeline.
    ///
    /// The outcome also feeds the adaptive throttle, so lone scrapes and
    /// batches shape the same ceiling.
    pub async fn run_one(&self, task: T) -> TaskResult<T::Output> {
        let cancel = CancellationToken::new();
        let result = self.orchestrator.execute_admitted(&task, &cancel).await;
        self.orchestrator.feed_throttle(&result);
        result
    }

    /// Run a batch to completion and return the final snapshot.
    pub async fn run_batch(
        &self,
        tasks: Vec<T>,
    ) -> Result<JobSnapshot<T::Output>, SchedulerError> {
        let job_id = self.orchestrator.registry().create(tasks.len());
        self.orchestrator.run(job_id, tasks).await
    }

    /// Start a batch in the background and return its job id immediately.
    /// Poll with [`job`](Scheduler::job) or block on
    /// [`wait`](Scheduler::wait).
    pub fn start_batch(&self, tasks: Vec<T>) -> JobId {
        let job_id = self.orchestrator.registry().create(tasks.len());
        let orchestrator = self.orchestrator.clone();
        tokio::spawn(async move {
            // Terminal state and error reporting live in the registry;
            // nothing to surface here.
            let _ = orchestrator.run(job_id, tasks).await;
        });
        job_id
    }

    /// Request cooperative cancellation of a job.
    pub fn cancel(&self, job_id: JobId) -> Result<JobStatus, SchedulerError> {
        info!("cancellation requested for job {job_id}");
        self.orchestrator.registry().cancel(job_id)
    }

    /// Snapshot a job by id.
    pub fn job(&self, job_id: JobId) -> Result<JobSnapshot<T::Output>, SchedulerError> {
        self.orchestrator.registry().snapshot(job_id)
    }

    /// Current status of a job by id.
    pub fn job_status(&self, job_id: JobId) -> Result<JobStatus, SchedulerError> {
        self.orchestrator.registry().status(job_id)
    }

    /// Wait until a job reaches a terminal status.
    pub async fn wait(&self, job_id: JobId) -> Result<JobSnapshot<T::Output>, SchedulerError> {
        self.orchestrator.registry().wait(job_id).await
    }

    /// Subscribe to scheduler events.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SchedulerEvent> {
        self.orchestrator.events().subscribe()
    }

    /// Live counters across all callers.
    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            active_count: self.orchestrator.gate().active_count(),
            queued_count: self.orchestrator.gate().queued_count(),
            current_concurrency_limit: self.orchestrator.throttle().current_limit(),
            current_delay_ms: self.orchestrator.throttle().current_delay().as_millis() as u64,
            requests_in_current_window: self.orchestrator.rate().in_current_window(),
        }
    }

    /// Shut the gate. In-flight tasks finish; new admissions fail with
    /// [`SchedulerError::Closed`].
    pub fn shutdown(&self) {
        info!("scheduler shutting down; draining in-flight work");
        self.orchestrator.gate().close();
    }
}
