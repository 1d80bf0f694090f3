//! End-to-end properties of the adaptive scheduler, driven on a paused
//! clock so every timing assertion is deterministic.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use trawl_runtime::events::SchedulerEvent;
use trawl_runtime::scheduler::config::SchedulerConfig;
use trawl_runtime::scheduler::error::SchedulerError;
use trawl_runtime::scheduler::jobs::JobStatus;
use trawl_runtime::scheduler::task::Task;
use trawl_runtime::scheduler::Scheduler;

/// Shared instrumentation across a batch of probe tasks.
#[derive(Default)]
struct Tracker {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    executions: AtomicUsize,
    starts: Mutex<Vec<Instant>>,
}

impl Tracker {
    fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.executions.fetch_add(1, Ordering::SeqCst);
        self.starts.lock().push(Instant::now());
    }

    fn exit(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Clone, Copy)]
enum Failure {
    Transient,
    Terminal,
}

struct ProbeTask {
    name: String,
    sleep: Duration,
    failure: Option<Failure>,
    tracker: Arc<Tracker>,
}

impl ProbeTask {
    fn ok(name: impl Into<String>, sleep_ms: u64, tracker: &Arc<Tracker>) -> Self {
        Self {
            name: name.into(),
            sleep: Duration::from_millis(sleep_ms),
            failure: None,
            tracker: Arc::clone(tracker),
        }
    }

    fn failing(name: impl Into<String>, failure: Failure, tracker: &Arc<Tracker>) -> Self {
        Self {
            name: name.into(),
            sleep: Duration::ZERO,
            failure: Some(failure),
            tracker: Arc::clone(tracker),
        }
    }
}

#[async_trait]
impl Task for ProbeTask {
    type Output = ();

    fn id(&self) -> String {
        self.name.clone()
    }

    async fn execute(&self) -> Result<(), SchedulerError> {
        self.tracker.enter();
        if !self.sleep.is_zero() {
            tokio::time::sleep(self.sleep).await;
        }
        self.tracker.exit();
        match self.failure {
            None => Ok(()),
            Some(Failure::Transient) => Err(SchedulerError::TransientNetwork(
                "synthetic timeout".into(),
            )),
            Some(Failure::Terminal) => Err(SchedulerError::TerminalValidation(
                "synthetic bad input".into(),
            )),
        }
    }
}

/// Zero pacing and jitter so the property under test owns the clock.
fn base_config() -> SchedulerConfig {
    SchedulerConfig {
        delay_ms: 0,
        delay_between_batches_ms: 0,
        retry_jitter_ms: 0,
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_in_flight_count_never_exceeds_cap() {
    let config = SchedulerConfig {
        max_concurrent: 3,
        ..base_config()
    };
    let scheduler: Arc<Scheduler<ProbeTask>> = Arc::new(Scheduler::new(config).unwrap());
    let tracker = Arc::new(Tracker::default());

    // Twenty independent callers, not one batch: the cap must hold even
    // when the chunking logic is out of the picture.
    let mut handles = Vec::new();
    for i in 0..20 {
        let scheduler = Arc::clone(&scheduler);
        let task = ProbeTask::ok(format!("task-{i}"), 50, &tracker);
        handles.push(tokio::spawn(async move { scheduler.run_one(task).await }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().is_success());
    }

    assert_eq!(tracker.executions.load(Ordering::SeqCst), 20);
    assert!(tracker.max_in_flight.load(Ordering::SeqCst) <= 3);
}

#[tokio::test(start_paused = true)]
async fn test_burst_limit_holds_per_window() {
    let config = SchedulerConfig {
        max_concurrent: 12,
        burst_limit: 5,
        time_window_ms: 1_000,
        ..base_config()
    };
    let scheduler: Scheduler<ProbeTask> = Scheduler::new(config).unwrap();
    let tracker = Arc::new(Tracker::default());

    let tasks: Vec<ProbeTask> = (0..12)
        .map(|i| ProbeTask::ok(format!("task-{i}"), 0, &tracker))
        .collect();
    let snapshot = scheduler.run_batch(tasks).await.unwrap();
    assert_eq!(snapshot.status, JobStatus::Completed);

    let starts = tracker.starts.lock();
    let first = *starts.iter().min().unwrap();
    let mut per_window = [0usize; 3];
    for start in starts.iter() {
        let index = (start.duration_since(first).as_millis() / 1_000) as usize;
        per_window[index.min(2)] += 1;
    }
    assert_eq!(per_window, [5, 5, 2]);
    // On a paused clock, rejected tasks resume exactly at window
    // boundaries, never in between.
    for start in starts.iter() {
        assert_eq!(start.duration_since(first).as_millis() % 1_000, 0);
    }
}

#[tokio::test(start_paused = true)]
async fn test_retryable_failure_uses_exactly_three_attempts() {
    let config = SchedulerConfig {
        max_retries: 2,
        ..base_config()
    };
    let scheduler: Scheduler<ProbeTask> = Scheduler::new(config).unwrap();
    let tracker = Arc::new(Tracker::default());

    let result = scheduler
        .run_one(ProbeTask::failing("flaky", Failure::Transient, &tracker))
        .await;
    assert!(!result.is_success());
    assert_eq!(result.attempts, 3);
    assert_eq!(tracker.executions.load(Ordering::SeqCst), 3);
    assert!(matches!(
        result.outcome,
        Err(SchedulerError::TransientNetwork(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_terminal_failure_uses_exactly_one_attempt() {
    let config = SchedulerConfig {
        max_retries: 2,
        ..base_config()
    };
    let scheduler: Scheduler<ProbeTask> = Scheduler::new(config).unwrap();
    let tracker = Arc::new(Tracker::default());

    let result = scheduler
        .run_one(ProbeTask::failing("broken", Failure::Terminal, &tracker))
        .await;
    assert!(!result.is_success());
    assert_eq!(result.attempts, 1);
    assert_eq!(tracker.executions.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_ten_tasks_batch_of_three_pause_three_times() {
    let config = SchedulerConfig {
        max_concurrent: 10,
        batch_size: Some(3),
        delay_between_batches_ms: 1_000,
        ..base_config()
    };
    let scheduler: Scheduler<ProbeTask> = Scheduler::new(config).unwrap();
    let tracker = Arc::new(Tracker::default());

    let tasks: Vec<ProbeTask> = (0..10)
        .map(|i| ProbeTask::ok(format!("task-{i}"), 0, &tracker))
        .collect();

    let started = Instant::now();
    let snapshot = scheduler.run_batch(tasks).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(snapshot.status, JobStatus::Completed);
    assert_eq!(snapshot.results.len(), 10);
    // ceil(10/3) = 4 chunks, so exactly 3 inter-chunk pauses.
    assert!(elapsed >= Duration::from_millis(3_000));
    assert!(elapsed < Duration::from_millis(3_200));

    // Chunk sizes land as 3/3/3/1, one group per pause boundary.
    let starts = tracker.starts.lock();
    let first = *starts.iter().min().unwrap();
    let mut per_chunk = [0usize; 4];
    for start in starts.iter() {
        let index = (start.duration_since(first).as_millis() / 1_000) as usize;
        per_chunk[index.min(3)] += 1;
    }
    assert_eq!(per_chunk, [3, 3, 3, 1]);
}

#[tokio::test(start_paused = true)]
async fn test_forty_percent_failures_step_ceiling_down() {
    let config = SchedulerConfig {
        max_concurrent: 10,
        max_retries: 0,
        ..base_config()
    };
    let scheduler: Scheduler<ProbeTask> = Scheduler::new(config).unwrap();
    let tracker = Arc::new(Tracker::default());
    let mut events = scheduler.subscribe();

    // 20 completions, 8 of them failures: 40% > the 30% high watermark.
    let mut tasks = Vec::new();
    for i in 0..12 {
        tasks.push(ProbeTask::ok(format!("ok-{i}"), 0, &tracker));
    }
    for i in 0..8 {
        tasks.push(ProbeTask::failing(
            format!("bad-{i}"),
            Failure::Transient,
            &tracker,
        ));
    }

    let snapshot = scheduler.run_batch(tasks).await.unwrap();
    // Every task settles; failures never abort the batch.
    assert_eq!(snapshot.status, JobStatus::Completed);
    assert_eq!(snapshot.results.len(), 20);
    assert_eq!(snapshot.succeeded(), 12);
    assert_eq!(snapshot.failed(), 8);

    assert_eq!(scheduler.status().current_concurrency_limit, 9);

    let mut saw_backoff = false;
    while let Ok(event) = events.try_recv() {
        if let SchedulerEvent::ThrottleAdjusted { backing_off, concurrency_limit, .. } = event {
            assert!(backing_off);
            assert_eq!(concurrency_limit, 9);
            saw_backoff = true;
        }
    }
    assert!(saw_backoff);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_between_chunks_skips_the_rest() {
    let config = SchedulerConfig {
        max_concurrent: 3,
        batch_size: Some(3),
        delay_between_batches_ms: 60_000,
        ..base_config()
    };
    let scheduler: Scheduler<ProbeTask> = Scheduler::new(config).unwrap();
    let tracker = Arc::new(Tracker::default());
    let mut events = scheduler.subscribe();

    let tasks: Vec<ProbeTask> = (0..6)
        .map(|i| ProbeTask::ok(format!("task-{i}"), 100, &tracker))
        .collect();
    let job_id = scheduler.start_batch(tasks);

    // Wait for the first chunk to settle, then cancel during the pause.
    let mut settled = 0;
    while settled < 3 {
        if let SchedulerEvent::TaskCompleted { .. } = events.recv().await.unwrap() {
            settled += 1;
        }
    }
    scheduler.cancel(job_id).unwrap();

    let snapshot = scheduler.wait(job_id).await.unwrap();
    assert_eq!(snapshot.status, JobStatus::Cancelled);
    assert_eq!(snapshot.results.len(), 3);
    // Chunk 2 never executed.
    assert_eq!(tracker.executions.load(Ordering::SeqCst), 3);
    assert!(snapshot.ended_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_cap_two_five_tasks_take_three_rounds() {
    let config = SchedulerConfig {
        max_concurrent: 2,
        ..base_config()
    };
    let scheduler: Scheduler<ProbeTask> = Scheduler::new(config).unwrap();
    let tracker = Arc::new(Tracker::default());

    let tasks: Vec<ProbeTask> = (0..5)
        .map(|i| ProbeTask::ok(format!("task-{i}"), 100, &tracker))
        .collect();

    let started = Instant::now();
    let snapshot = scheduler.run_batch(tasks).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(snapshot.status, JobStatus::Completed);
    assert_eq!(snapshot.succeeded(), 5);
    // ceil(5/2) rounds of ~100 ms: parallel within the cap, serial across
    // rounds. Rules out both ~500 ms (no parallelism) and ~100 ms (no cap).
    assert!(elapsed >= Duration::from_millis(280));
    assert!(elapsed <= Duration::from_millis(340));
    assert!(tracker.max_in_flight.load(Ordering::SeqCst) <= 2);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_job_id_is_not_found() {
    let scheduler: Scheduler<ProbeTask> = Scheduler::new(base_config()).unwrap();
    let missing = uuid::Uuid::new_v4();
    assert!(matches!(
        scheduler.job(missing),
        Err(SchedulerError::NotFound(_))
    ));
    assert!(matches!(
        scheduler.cancel(missing),
        Err(SchedulerError::NotFound(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_empty_batch_completes_immediately() {
    let scheduler: Scheduler<ProbeTask> = Scheduler::new(base_config()).unwrap();
    let snapshot = scheduler.run_batch(Vec::new()).await.unwrap();
    assert_eq!(snapshot.status, JobStatus::Completed);
    assert_eq!(snapshot.progress, 100);
    assert!(snapshot.results.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_fails_remaining_work_loudly() {
    let config = SchedulerConfig {
        max_concurrent: 2,
        batch_size: Some(2),
        ..base_config()
    };
    let scheduler: Scheduler<ProbeTask> = Scheduler::new(config).unwrap();
    let tracker = Arc::new(Tracker::default());
    let mut events = scheduler.subscribe();

    let tasks: Vec<ProbeTask> = (0..6)
        .map(|i| ProbeTask::ok(format!("task-{i}"), 100, &tracker))
        .collect();
    let job_id = scheduler.start_batch(tasks);

    let mut settled = 0;
    while settled < 2 {
        if let SchedulerEvent::TaskCompleted { .. } = events.recv().await.unwrap() {
            settled += 1;
        }
    }
    scheduler.shutdown();

    let snapshot = scheduler.wait(job_id).await.unwrap();
    assert_eq!(snapshot.status, JobStatus::Failed);
    assert!(snapshot.error.unwrap().contains("shut down"));
}
