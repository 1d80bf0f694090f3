//! Scheduler configuration and adaptive-throttle tuning knobs.

use serde::Deserialize;
use std::time::Duration;

use crate::scheduler::error::SchedulerError;

/// Configuration for a [`Scheduler`](crate::scheduler::Scheduler).
///
/// Callers hand this in as a plain object (all fields have defaults, so a
/// JSON config may name only the options it cares about). Validation
/// happens once, at scheduler construction.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SchedulerConfig {
    /// Maximum simultaneously in-flight units of work.
    pub max_concurrent: usize,
    /// Floor for the adaptive inter-task delay, in milliseconds.
    pub delay_ms: u64,
    /// Ceiling for the adaptive inter-task delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Maximum admissions per rate window.
    pub burst_limit: u32,
    /// Rate window length, in milliseconds.
    pub time_window_ms: u64,
    /// Retries per task on recoverable failures (attempts = retries + 1).
    pub max_retries: u32,
    /// First retry backoff, in milliseconds.
    pub retry_base_delay_ms: u64,
    /// Backoff growth factor between attempts.
    pub retry_backoff_multiplier: f64,
    /// Upper bound on a single backoff sleep, in milliseconds.
    pub retry_delay_cap_ms: u64,
    /// Uniform jitter added to each backoff sleep: `[0, retry_jitter_ms)`.
    pub retry_jitter_ms: u64,
    /// Cap on chunk size. When unset, chunks track the concurrency ceiling.
    pub batch_size: Option<usize>,
    /// Pause between chunks, in milliseconds.
    pub delay_between_batches_ms: u64,
    /// Upper bound on how long a task may wait for a free slot before it
    /// fails loudly instead of hanging.
    pub slot_wait_timeout_ms: u64,
    /// Adaptive throttle tuning.
    pub throttle: ThrottleTuning,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            delay_ms: 100,
            max_delay_ms: 30_000,
            burst_limit: 60,
            time_window_ms: 60_000,
            max_retries: 2,
            retry_base_delay_ms: 500,
            retry_backoff_multiplier: 2.0,
            retry_delay_cap_ms: 10_000,
            retry_jitter_ms: 250,
            batch_size: None,
            delay_between_batches_ms: 1_000,
            slot_wait_timeout_ms: 120_000,
            throttle: ThrottleTuning::default(),
        }
    }
}

impl SchedulerConfig {
    /// Reject configurations the scheduler cannot honor.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.max_concurrent < 1 {
            return Err(SchedulerError::InvalidConfig(
                "maxConcurrent must be at least 1".into(),
            ));
        }
        if self.burst_limit < 1 {
            return Err(SchedulerError::InvalidConfig(
                "burstLimit must be at least 1".into(),
            ));
        }
        if self.time_window_ms == 0 {
            return Err(SchedulerError::InvalidConfig(
                "timeWindowMs must be non-zero".into(),
            ));
        }
        if self.retry_backoff_multiplier < 1.0 {
            return Err(SchedulerError::InvalidConfig(
                "retryBackoffMultiplier must be at least 1.0".into(),
            ));
        }
        if self.max_delay_ms < self.delay_ms {
            return Err(SchedulerError::InvalidConfig(
                "maxDelayMs must not be below delayMs".into(),
            ));
        }
        if self.slot_wait_timeout_ms == 0 {
            return Err(SchedulerError::InvalidConfig(
                "slotWaitTimeoutMs must be non-zero".into(),
            ));
        }
        if matches!(self.batch_size, Some(0)) {
            return Err(SchedulerError::InvalidConfig(
                "batchSize must be at least 1 when set".into(),
            ));
        }
        self.throttle.validate()
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn time_window(&self) -> Duration {
        Duration::from_millis(self.time_window_ms)
    }

    pub fn delay_between_batches(&self) -> Duration {
        Duration::from_millis(self.delay_between_batches_ms)
    }

    pub fn slot_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.slot_wait_timeout_ms)
    }
}

/// Tuning for the adaptive throttle. The defaults are hand-picked
/// operating points, not derived constants — override freely.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ThrottleTuning {
    /// Completed tasks per evaluation window.
    pub evaluation_window: u32,
    /// Failure ratio above which the throttle backs off.
    pub high_watermark: f64,
    /// Failure ratio below which a window counts toward recovery.
    pub low_watermark: f64,
    /// Consecutive calm windows required before scaling back up.
    pub recovery_windows: u32,
    /// Multiplier applied to the delay when backing off, divisor when
    /// recovering.
    pub backoff_factor: f64,
}

impl Default for ThrottleTuning {
    fn default() -> Self {
        Self {
            evaluation_window: 20,
            high_watermark: 0.30,
            low_watermark: 0.05,
            recovery_windows: 3,
            backoff_factor: 1.5,
        }
    }
}

impl ThrottleTuning {
    fn validate(&self) -> Result<(), SchedulerError> {
        if self.evaluation_window < 1 {
            return Err(SchedulerError::InvalidConfig(
                "throttle.evaluationWindow must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.high_watermark)
            || !(0.0..=1.0).contains(&self.low_watermark)
            || self.low_watermark >= self.high_watermark
        {
            return Err(SchedulerError::InvalidConfig(
                "throttle watermarks must satisfy 0 <= low < high <= 1".into(),
            ));
        }
        if self.recovery_windows < 1 {
            return Err(SchedulerError::InvalidConfig(
                "throttle.recoveryWindows must be at least 1".into(),
            ));
        }
        if self.backoff_factor <= 1.0 {
            return Err(SchedulerError::InvalidConfig(
                "throttle.backoffFactor must be above 1.0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(SchedulerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let config = SchedulerConfig {
            max_concurrent: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SchedulerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_inverted_watermarks_rejected() {
        let config = SchedulerConfig {
            throttle: ThrottleTuning {
                high_watermark: 0.05,
                low_watermark: 0.30,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_config() {
        let config: SchedulerConfig =
            serde_json::from_str(r#"{"maxConcurrent": 3, "burstLimit": 10}"#).unwrap();
        assert_eq!(config.max_concurrent, 3);
        assert_eq!(config.burst_limit, 10);
        assert_eq!(config.max_retries, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let config = SchedulerConfig {
            batch_size: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
