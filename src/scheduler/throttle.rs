//! Adaptive throttle: scales the concurrency ceiling and inter-task delay
//! from observed success/failure history.
//!
//! Every K completed tasks form an evaluation window. A window whose
//! failure ratio crosses the high watermark backs off one step; only M
//! consecutive windows below the low watermark scale back up. The gap
//! between the two watermarks is the hysteresis that keeps the limit
//! from oscillating.

use parking_lot::Mutex;
use std::time::Duration;

use crate::scheduler::config::ThrottleTuning;

/// A ceiling/delay change the owner must apply and may broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Adjustment {
    pub concurrency_limit: usize,
    pub delay: Duration,
    pub direction: Direction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    BackedOff,
    Recovered,
}

struct ThrottleState {
    limit: usize,
    delay: Duration,
    successes: u32,
    failures: u32,
    calm_windows: u32,
}

/// Observes task outcomes and adjusts the effective concurrency ceiling
/// and inter-task delay within configured bounds.
pub struct AdaptiveThrottle {
    tuning: ThrottleTuning,
    max_limit: usize,
    min_delay: Duration,
    max_delay: Duration,
    state: Mutex<ThrottleState>,
}

/// Seed for multiplicative delay growth when the configured floor is zero.
const BACKOFF_SEED: Duration = Duration::from_millis(100);

impl AdaptiveThrottle {
    pub fn new(
        max_limit: usize,
        min_delay: Duration,
        max_delay: Duration,
        tuning: ThrottleTuning,
    ) -> Self {
        let max_limit = max_limit.max(1);
        Self {
            tuning,
            max_limit,
            min_delay,
            max_delay,
            state: Mutex::new(ThrottleState {
                limit: max_limit,
                delay: min_delay,
                successes: 0,
                failures: 0,
                calm_windows: 0,
            }),
        }
    }

    /// Record one completed task. Returns an adjustment when this
    /// completion closed an evaluation window that moved the limits.
    pub fn record(&self, success: bool) -> Option<Adjustment> {
        let mut state = self.state.lock();
        if success {
            state.successes += 1;
        } else {
            state.failures += 1;
        }
        let total = state.successes + state.failures;
        if total < self.tuning.evaluation_window {
            return None;
        }

        let ratio = f64::from(state.failures) / f64::from(total);
        state.successes = 0;
        state.failures = 0;

        if ratio > self.tuning.high_watermark {
            state.calm_windows = 0;
            let new_limit = state.limit.saturating_sub(1).max(1);
            let grown = state
                .delay
                .max(BACKOFF_SEED)
                .mul_f64(self.tuning.backoff_factor);
            let new_delay = grown.clamp(self.min_delay, self.max_delay);
            let changed = new_limit != state.limit || new_delay != state.delay;
            state.limit = new_limit;
            state.delay = new_delay;
            tracing::info!(
                "throttle backing off: failure ratio {:.0}%, limit {}, delay {} ms",
                ratio * 100.0,
                new_limit,
                new_delay.as_millis()
            );
            return changed.then_some(Adjustment {
                concurrency_limit: new_limit,
                delay: new_delay,
                direction: Direction::BackedOff,
            });
        }

        if ratio < self.tuning.low_watermark {
            state.calm_windows += 1;
            if state.calm_windows >= self.tuning.recovery_windows {
                state.calm_windows = 0;
                let new_limit = (state.limit + 1).min(self.max_limit);
                let shrunk = state.delay.div_f64(self.tuning.backoff_factor);
                let new_delay = shrunk.clamp(self.min_delay, self.max_delay);
                let changed = new_limit != state.limit || new_delay != state.delay;
                state.limit = new_limit;
                state.delay = new_delay;
                if changed {
                    tracing::info!(
                        "throttle recovering: limit {}, delay {} ms",
                        new_limit,
                        new_delay.as_millis()
                    );
                }
                return changed.then_some(Adjustment {
                    concurrency_limit: new_limit,
                    delay: new_delay,
                    direction: Direction::Recovered,
                });
            }
        } else {
            // Middle ground: neither backs off nor counts toward recovery.
            state.calm_windows = 0;
        }
        None
    }

    /// Current effective concurrency ceiling.
    pub fn current_limit(&self) -> usize {
        self.state.lock().limit
    }

    /// Current inter-task delay.
    pub fn current_delay(&self) -> Duration {
        self.state.lock().delay
    }
}
