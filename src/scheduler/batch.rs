// Copyright 2026 Trawl Contributors
// SPDX-License-Identifier: Apache-2.0

//! Batch orchestrator: drives an ordered task sequence through the gate,
//! rate counter, and retry coordinator in ceiling-sized chunks.
//!
//! The chunk size is re-read before every chunk because the adaptive
//! throttle may have moved the ceiling since the previous one. A chunk is
//! dispatched in full and awaited in full — one failing task never aborts
//! the others. Progress is reported per settled task, not per chunk.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::events::{EventBus, SchedulerEvent};
use crate::scheduler::config::SchedulerConfig;
use crate::scheduler::error::SchedulerError;
use crate::scheduler::gate::ConcurrencyGate;
use crate::scheduler::jobs::{JobId, JobRegistry, JobSnapshot};
use crate::scheduler::rate::{Admission, WindowedRateCounter};
use crate::scheduler::retry::RetryCoordinator;
use crate::scheduler::task::{Task, TaskResult};
use crate::scheduler::throttle::{AdaptiveThrottle, Direction};

pub struct BatchOrchestrator<T: Task> {
    gate: Arc<ConcurrencyGate>,
    rate: Arc<WindowedRateCounter>,
    throttle: Arc<AdaptiveThrottle>,
    retry: Arc<RetryCoordinator>,
    registry: Arc<JobRegistry<T::Output>>,
    events: Arc<EventBus>,
    batch_size: Option<usize>,
    inter_chunk_delay: Duration,
    slot_wait_timeout: Duration,
}

impl<T: Task> Clone for BatchOrchestrator<T> {
    fn clone(&self) -> Self {
        Self {
            gate: Arc::clone(&self.gate),
            rate: Arc::clone(&self.rate),
            throttle: Arc::clone(&self.throttle),
            retry: Arc::clone(&self.retry),
            registry: Arc::clone(&self.registry),
            events: Arc::clone(&self.events),
            batch_size: self.batch_size,
            inter_chunk_delay: self.inter_chunk_delay,
            slot_wait_timeout: self.slot_wait_timeout,
        }
    }
}

impl<T: Task> BatchOrchestrator<T> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: &SchedulerConfig,
        gate: Arc<ConcurrencyGate>,
        rate: Arc<WindowedRateCounter>,
        throttle: Arc<AdaptiveThrottle>,
        retry: Arc<RetryCoordinator>,
        registry: Arc<JobRegistry<T::Output>>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            gate,
            rate,
            throttle,
            retry,
            registry,
            events,
            batch_size: config.batch_size,
            inter_chunk_delay: config.delay_between_batches(),
            slot_wait_timeout: config.slot_wait_timeout(),
        }
    }

    pub(crate) fn registry(&self) -> &Arc<JobRegistry<T::Output>> {
        &self.registry
    }

    pub(crate) fn gate(&self) -> &Arc<ConcurrencyGate> {
        &self.gate
    }

    pub(crate) fn rate(&self) -> &Arc<WindowedRateCounter> {
        &self.rate
    }

    pub(crate) fn throttle(&self) -> &Arc<AdaptiveThrottle> {
        &self.throttle
    }

    pub(crate) fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Drive every task of the job to settlement (or cancellation) and
    /// perform the job's terminal transition.
    pub(crate) async fn run(
        &self,
        job_id: JobId,
        tasks: Vec<T>,
    ) -> Result<JobSnapshot<T::Output>, SchedulerError> {
        let cancel = self.registry.cancel_token(job_id)?;
        let started = Instant::now();
        let total = tasks.len();

        self.registry.mark_running(job_id)?;
        self.events.emit(SchedulerEvent::JobStarted {
            job_id: job_id.to_string(),
            task_count: total,
        });
        info!("job {job_id} started with {total} tasks");

        let mut queue: VecDeque<T> = tasks.into();
        let mut chunk_index = 0usize;
        let mut closed = false;

        while !queue.is_empty() && !cancel.is_cancelled() && !closed {
            if chunk_index > 0 && !self.inter_chunk_delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.inter_chunk_delay) => {}
                }
            }

            let ceiling = self.throttle.current_limit();
            let chunk_size = self
                .batch_size
                .map_or(ceiling, |cap| cap.min(ceiling))
                .max(1)
                .min(queue.len());
            let chunk: Vec<T> = queue.drain(..chunk_size).collect();
            debug!(
                "job {job_id}: chunk {chunk_index} with {chunk_size} tasks (ceiling {ceiling})"
            );

            let settled = futures::future::join_all(
                chunk
                    .into_iter()
                    .map(|task| self.run_task(job_id, task, &cancel)),
            )
            .await;

            closed = settled
                .iter()
                .any(|result| matches!(result.outcome, Err(SchedulerError::Closed)));
            chunk_index += 1;
        }

        let snapshot = self.finish(job_id, started, total, closed, &cancel)?;
        Ok(snapshot)
    }

    fn finish(
        &self,
        job_id: JobId,
        started: Instant,
        total: usize,
        closed: bool,
        cancel: &CancellationToken,
    ) -> Result<JobSnapshot<T::Output>, SchedulerError> {
        if closed {
            self.registry
                .finish_failed(job_id, "scheduler shut down mid-job")?;
            let snapshot = self.registry.snapshot(job_id)?;
            self.events.emit(SchedulerEvent::JobFailed {
                job_id: job_id.to_string(),
                error: "scheduler shut down mid-job".into(),
            });
            return Ok(snapshot);
        }
        if cancel.is_cancelled() {
            self.registry.finish_cancelled(job_id)?;
            let snapshot = self.registry.snapshot(job_id)?;
            self.events.emit(SchedulerEvent::JobCancelled {
                job_id: job_id.to_string(),
                settled: snapshot.results.len(),
                total,
            });
            info!(
                "job {job_id} cancelled after {} of {total} tasks",
                snapshot.results.len()
            );
            return Ok(snapshot);
        }
        self.registry.finish_completed(job_id)?;
        let snapshot = self.registry.snapshot(job_id)?;
        self.events.emit(SchedulerEvent::JobCompleted {
            job_id: job_id.to_string(),
            succeeded: snapshot.succeeded(),
            failed: snapshot.failed(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        });
        info!(
            "job {job_id} completed: {} succeeded, {} failed",
            snapshot.succeeded(),
            snapshot.failed()
        );
        Ok(snapshot)
    }

    /// One task: throttle pacing → gate slot → rate admission → retries →
    /// slot release → throttle feedback → registry progress.
    async fn run_task(
        &self,
        job_id: JobId,
        task: T,
        cancel: &CancellationToken,
    ) -> TaskResult<T::Output> {
        let result = self.execute_admitted(&task, cancel).await;
        self.feed_throttle(&result);

        if let Ok((settled, total, progress)) =
            self.registry.record_result(job_id, result.clone())
        {
            self.events.emit(SchedulerEvent::TaskCompleted {
                job_id: job_id.to_string(),
                task_id: result.task_id.clone(),
                success: result.is_success(),
                attempts: result.attempts,
                duration_ms: result.duration_ms,
            });
            self.events.emit(SchedulerEvent::JobProgress {
                job_id: job_id.to_string(),
                settled,
                total,
                progress,
            });
        }
        result
    }

    /// Admission pipeline shared by batch tasks and single runs.
    pub(crate) async fn execute_admitted(
        &self,
        task: &T,
        cancel: &CancellationToken,
    ) -> TaskResult<T::Output> {
        let started = Instant::now();

        // Adaptive pacing before admission, so a slot is never held
        // during the delay.
        let pace = self.throttle.current_delay();
        if !pace.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => {
                    return self.unsettled(task, SchedulerError::Cancelled, started);
                }
                _ = tokio::time::sleep(pace) => {}
            }
        }

        let permit = match self.gate.acquire(self.slot_wait_timeout, cancel).await {
            Ok(permit) => permit,
            Err(err) => return self.unsettled(task, err, started),
        };

        loop {
            match self.rate.try_admit() {
                Admission::Admitted => break,
                Admission::RejectedUntil(at) => {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            permit.release();
                            return self.unsettled(task, SchedulerError::Cancelled, started);
                        }
                        _ = tokio::time::sleep_until(at) => {}
                    }
                }
            }
        }

        let result = self.retry.execute(task, cancel).await;
        permit.release();
        result
    }

    /// Settlement for a task that never reached execution.
    fn unsettled(
        &self,
        task: &T,
        err: SchedulerError,
        started: Instant,
    ) -> TaskResult<T::Output> {
        TaskResult {
            task_id: task.id(),
            outcome: Err(err),
            attempts: 0,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// Feed one outcome into the throttle and apply any adjustment to the
    /// gate. Cancelled and shutdown settlements carry no signal about the
    /// remote side and are not counted.
    pub(crate) fn feed_throttle(&self, result: &TaskResult<T::Output>) {
        if matches!(
            result.outcome,
            Err(SchedulerError::Cancelled) | Err(SchedulerError::Closed)
        ) {
            return;
        }
        if let Some(adjustment) = self.throttle.record(result.is_success()) {
            self.gate.set_capacity(adjustment.concurrency_limit);
            self.events.emit(SchedulerEvent::ThrottleAdjusted {
                concurrency_limit: adjustment.concurrency_limit,
                delay_ms: adjustment.delay.as_millis() as u64,
                backing_off: adjustment.direction == Direction::BackedOff,
            });
        }
    }
}
