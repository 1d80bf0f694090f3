//! Retry coordinator: wraps one unit of work with bounded, backed-off
//! retries.
//!
//! Only transient errors consume retry attempts. Backoff between attempts
//! n and n+1 is `min(base * multiplier^(n-1), cap)` plus uniform jitter,
//! so simultaneously failing tasks do not wake up in lockstep.

use rand::Rng;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::scheduler::config::SchedulerConfig;
use crate::scheduler::error::SchedulerError;
use crate::scheduler::task::{Task, TaskResult};

/// Executes a task up to `max_retries + 1` attempts.
pub struct RetryCoordinator {
    max_retries: u32,
    base_delay: Duration,
    multiplier: f64,
    delay_cap: Duration,
    jitter: Duration,
}

impl RetryCoordinator {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            multiplier: config.retry_backoff_multiplier,
            delay_cap: Duration::from_millis(config.retry_delay_cap_ms),
            jitter: Duration::from_millis(config.retry_jitter_ms),
        }
    }

    /// Drive the task to settlement and report the final outcome.
    ///
    /// Backoff sleeps race against `cancel`; a cancelled task settles
    /// with [`SchedulerError::Cancelled`] without finishing its sleep.
    pub async fn execute<T: Task>(
        &self,
        task: &T,
        cancel: &CancellationToken,
    ) -> TaskResult<T::Output> {
        let started = Instant::now();
        let max_attempts = task.max_retries().unwrap_or(self.max_retries) + 1;
        let mut attempt = 0u32;

        loop {
            if cancel.is_cancelled() {
                return self.settle(task, Err(SchedulerError::Cancelled), attempt, started);
            }
            attempt += 1;

            match task.execute().await {
                Ok(value) => return self.settle(task, Ok(value), attempt, started),
                Err(err) if !err.is_retryable() || attempt >= max_attempts => {
                    return self.settle(task, Err(err), attempt, started);
                }
                Err(err) => {
                    let delay = self.backoff_delay(attempt);
                    debug!(
                        "task {} attempt {}/{} failed ({err}); retrying in {} ms",
                        task.id(),
                        attempt,
                        max_attempts,
                        delay.as_millis()
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            return self.settle(
                                task,
                                Err(SchedulerError::Cancelled),
                                attempt,
                                started,
                            );
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Backoff before the attempt that follows attempt `n`.
    fn backoff_delay(&self, n: u32) -> Duration {
        let exponent = n.saturating_sub(1).min(24);
        let backoff = self
            .base_delay
            .mul_f64(self.multiplier.powi(exponent as i32))
            .min(self.delay_cap);
        backoff + self.jitter_amount()
    }

    fn jitter_amount(&self) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ms))
    }

    fn settle<T: Task>(
        &self,
        task: &T,
        outcome: Result<T::Output, SchedulerError>,
        attempts: u32,
        started: Instant,
    ) -> TaskResult<T::Output> {
        TaskResult {
            task_id: task.id(),
            outcome,
            attempts,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}
