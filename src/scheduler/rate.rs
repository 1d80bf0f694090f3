//! Windowed rate counter: caps admissions per rolling time window.
//!
//! The window is a bucket that resets at its boundary, not a precise
//! sliding window. Worst case this admits up to twice the configured
//! limit across one boundary — an accepted trade-off for an O(1)
//! critical section. Callers must honor the returned rejection instant.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Outcome of an admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Counted against the current window; proceed.
    Admitted,
    /// Window is full; do not retry before this instant.
    RejectedUntil(Instant),
}

struct RateWindow {
    window_start: Instant,
    count: u32,
}

/// Caps admissions per rolling time window (burst limit).
pub struct WindowedRateCounter {
    window: Duration,
    max_per_window: u32,
    state: Mutex<RateWindow>,
}

impl WindowedRateCounter {
    pub fn new(window: Duration, max_per_window: u32) -> Self {
        Self {
            window,
            max_per_window: max_per_window.max(1),
            state: Mutex::new(RateWindow {
                window_start: Instant::now(),
                count: 0,
            }),
        }
    }

    /// Try to admit one unit of work into the current window.
    pub fn try_admit(&self) -> Admission {
        let now = Instant::now();
        let mut state = self.state.lock();
        if now.duration_since(state.window_start) >= self.window {
            state.window_start = now;
            state.count = 0;
        }
        if state.count < self.max_per_window {
            state.count += 1;
            Admission::Admitted
        } else {
            Admission::RejectedUntil(state.window_start + self.window)
        }
    }

    /// Admissions counted against the current window.
    pub fn in_current_window(&self) -> u32 {
        let now = Instant::now();
        let mut state = self.state.lock();
        if now.duration_since(state.window_start) >= self.window {
            state.window_start = now;
            state.count = 0;
        }
        state.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_admits_up_to_limit() {
        let counter = WindowedRateCounter::new(Duration::from_secs(1), 3);
        for _ in 0..3 {
            assert_eq!(counter.try_admit(), Admission::Admitted);
        }
        assert!(matches!(
            counter.try_admit(),
            Admission::RejectedUntil(_)
        ));
        assert_eq!(counter.in_current_window(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_names_the_window_boundary() {
        let window = Duration::from_secs(1);
        let counter = WindowedRateCounter::new(window, 1);
        let opened = Instant::now();
        assert_eq!(counter.try_admit(), Admission::Admitted);
        match counter.try_admit() {
            Admission::RejectedUntil(at) => assert_eq!(at, opened + window),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_resets_at_boundary() {
        let counter = WindowedRateCounter::new(Duration::from_secs(1), 2);
        assert_eq!(counter.try_admit(), Admission::Admitted);
        assert_eq!(counter.try_admit(), Admission::Admitted);
        assert!(matches!(counter.try_admit(), Admission::RejectedUntil(_)));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(counter.in_current_window(), 0);
        assert_eq!(counter.try_admit(), Admission::Admitted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_count_never_exceeds_limit_inside_window() {
        let counter = WindowedRateCounter::new(Duration::from_secs(5), 4);
        let mut admitted = 0;
        for _ in 0..50 {
            if counter.try_admit() == Admission::Admitted {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 4);
        assert_eq!(counter.in_current_window(), 4);
    }
}
