//! `trawl fetch` — drive a batch of page fetches through the scheduler.

use anyhow::{bail, Context, Result};
use clap::Args;
use std::path::{Path, PathBuf};

use crate::acquisition::http_client::HttpClient;
use crate::acquisition::PageFetchTask;
use crate::events::SchedulerEvent;
use crate::scheduler::config::SchedulerConfig;
use crate::scheduler::jobs::JobSnapshot;
use crate::scheduler::Scheduler;

#[derive(Args, Debug)]
pub struct FetchArgs {
    /// URLs to fetch
    pub urls: Vec<String>,

    /// Read additional URLs from a file, one per line ('#' comments allowed)
    #[arg(long)]
    pub urls_file: Option<PathBuf>,

    /// Maximum simultaneously in-flight fetches
    #[arg(long, default_value = "10")]
    pub max_concurrent: usize,

    /// Maximum admissions per rate window
    #[arg(long, default_value = "60")]
    pub burst_limit: u32,

    /// Rate window length in milliseconds
    #[arg(long, default_value = "60000")]
    pub time_window_ms: u64,

    /// Retries per URL on recoverable failures
    #[arg(long, default_value = "2")]
    pub max_retries: u32,

    /// Base inter-task delay in milliseconds
    #[arg(long, default_value = "100")]
    pub delay_ms: u64,

    /// Cap on chunk size (defaults to the concurrency ceiling)
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Pause between chunks in milliseconds
    #[arg(long, default_value = "1000")]
    pub delay_between_batches_ms: u64,

    /// Per-request timeout in milliseconds
    #[arg(long, default_value = "30000")]
    pub timeout_ms: u64,
}

pub async fn run(args: FetchArgs, json: bool, quiet: bool) -> Result<()> {
    let mut urls = args.urls.clone();
    if let Some(ref path) = args.urls_file {
        urls.extend(read_urls_file(path)?);
    }
    if urls.is_empty() {
        bail!("no URLs given; pass them as arguments or via --urls-file");
    }

    let config = SchedulerConfig {
        max_concurrent: args.max_concurrent,
        burst_limit: args.burst_limit,
        time_window_ms: args.time_window_ms,
        max_retries: args.max_retries,
        delay_ms: args.delay_ms,
        batch_size: args.batch_size,
        delay_between_batches_ms: args.delay_between_batches_ms,
        ..Default::default()
    };
    let scheduler: Scheduler<PageFetchTask> =
        Scheduler::new(config).context("invalid scheduler configuration")?;

    let client = HttpClient::new(args.timeout_ms);
    let tasks: Vec<PageFetchTask> = urls
        .iter()
        .map(|url| PageFetchTask::new(client.clone(), url.clone()))
        .collect();

    // Live progress from the event bus; the printer dies with the batch.
    let printer = if quiet || json {
        None
    } else {
        let mut events = scheduler.subscribe();
        Some(tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                print_event(&event);
            }
        }))
    };

    let snapshot = scheduler
        .run_batch(tasks)
        .await
        .context("batch did not run")?;

    if let Some(printer) = printer {
        printer.abort();
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&summary_json(&snapshot))?);
    } else {
        print_summary(&snapshot, quiet);
    }
    Ok(())
}

fn read_urls_file(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

fn print_event(event: &SchedulerEvent) {
    match event {
        SchedulerEvent::TaskCompleted {
            task_id,
            success,
            attempts,
            duration_ms,
            ..
        } => {
            let mark = if *success { "ok " } else { "ERR" };
            eprintln!("  [{mark}] {task_id} ({attempts} attempts, {duration_ms} ms)");
        }
        SchedulerEvent::ThrottleAdjusted {
            concurrency_limit,
            delay_ms,
            backing_off,
        } => {
            let verb = if *backing_off { "backing off" } else { "recovering" };
            eprintln!("  -- throttle {verb}: limit {concurrency_limit}, delay {delay_ms} ms");
        }
        SchedulerEvent::JobProgress {
            settled,
            total,
            progress,
            ..
        } => {
            eprintln!("  .. {settled}/{total} ({progress}%)");
        }
        _ => {}
    }
}

fn print_summary(
    snapshot: &JobSnapshot<crate::acquisition::http_client::PageResponse>,
    quiet: bool,
) {
    if !quiet {
        eprintln!();
    }
    println!(
        "job {}: {} — {} succeeded, {} failed of {}",
        snapshot.id,
        snapshot.status,
        snapshot.succeeded(),
        snapshot.failed(),
        snapshot.total_tasks
    );
    for result in snapshot.results.iter().filter(|r| !r.is_success()) {
        println!(
            "  failed: {} ({})",
            result.task_id,
            result.error_message().unwrap_or_default()
        );
    }
}

fn summary_json(
    snapshot: &JobSnapshot<crate::acquisition::http_client::PageResponse>,
) -> serde_json::Value {
    serde_json::json!({
        "jobId": snapshot.id,
        "status": snapshot.status,
        "progress": snapshot.progress,
        "totalTasks": snapshot.total_tasks,
        "succeeded": snapshot.succeeded(),
        "failed": snapshot.failed(),
        "results": snapshot.results.iter().map(|r| {
            serde_json::json!({
                "url": r.task_id,
                "success": r.is_success(),
                "status": r.outcome.as_ref().ok().map(|p| p.status),
                "finalUrl": r.outcome.as_ref().ok().map(|p| p.final_url.clone()),
                "bodyBytes": r.outcome.as_ref().ok().map(|p| p.body.len()),
                "error": r.error_message(),
                "attempts": r.attempts,
                "durationMs": r.duration_ms,
            })
        }).collect::<Vec<_>>(),
    })
}
