// Copyright 2026 Trawl Contributors
// SPDX-License-Identifier: Apache-2.0

//! Trawl event bus — typed events from the scheduler.
//!
//! The EventBus is a `tokio::sync::broadcast` channel carrying
//! [`SchedulerEvent`] values. Any consumer — the CLI progress printer, a
//! log sink, an embedding application — can subscribe independently. When
//! no subscribers exist, events are silently dropped (zero overhead).

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Every event the scheduler emits. Serialized to JSON for embedding
/// applications that forward them.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SchedulerEvent {
    // ── Job lifecycle ─────────────────────
    /// A job started dispatching its first chunk.
    JobStarted { job_id: String, task_count: usize },
    /// A job finished with every task settled.
    JobCompleted {
        job_id: String,
        succeeded: usize,
        failed: usize,
        elapsed_ms: u64,
    },
    /// A job was cancelled; in-flight tasks were allowed to finish.
    JobCancelled {
        job_id: String,
        settled: usize,
        total: usize,
    },
    /// A job failed as a whole (scheduler shut down mid-flight).
    JobFailed { job_id: String, error: String },

    // ── Task progress ─────────────────────
    /// One task settled (success or failure, after all retries).
    TaskCompleted {
        job_id: String,
        task_id: String,
        success: bool,
        attempts: u32,
        duration_ms: u64,
    },
    /// Aggregate progress after a task settled.
    JobProgress {
        job_id: String,
        settled: usize,
        total: usize,
        progress: u8,
    },

    // ── Throttle ──────────────────────────
    /// The adaptive throttle moved the concurrency ceiling or delay.
    ThrottleAdjusted {
        concurrency_limit: usize,
        delay_ms: u64,
        backing_off: bool,
    },
}

/// The central event bus for the scheduler.
pub struct EventBus {
    sender: broadcast::Sender<SchedulerEvent>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers. Silently ignores if no subscribers.
    pub fn emit(&self, event: SchedulerEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to receive all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.sender.subscribe()
    }
}

/// Check if an event belongs to a specific job.
pub fn event_matches_job(event: &SchedulerEvent, job_id: &str) -> bool {
    match event {
        SchedulerEvent::JobStarted { job_id: j, .. }
        | SchedulerEvent::JobCompleted { job_id: j, .. }
        | SchedulerEvent::JobCancelled { job_id: j, .. }
        | SchedulerEvent::JobFailed { job_id: j, .. }
        | SchedulerEvent::TaskCompleted { job_id: j, .. }
        | SchedulerEvent::JobProgress { job_id: j, .. } => j == job_id,
        // Throttle adjustments affect every job — deliver to all filters.
        SchedulerEvent::ThrottleAdjusted { .. } => true,
    }
}
