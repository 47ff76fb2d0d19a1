//! `cadence demo`: a scheduled job with random outcomes.

use std::sync::Arc;
use std::time::Duration;

use cadence_scheduler::{ExecutionHandle, Outcome, Scheduler, SchedulerConfig, job_args};
use miette::Result;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::jobs::coin_flip;

const JOB: &str = "my_job";

pub struct DemoSettings {
    pub config: SchedulerConfig,
    pub interval: Duration,
    pub job_duration: Duration,
    pub run_for: Duration,
    pub concurrency: usize,
}

/// Counts reported when the demo finishes.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DemoSummary {
    pub started: usize,
    pub resolved: usize,
    pub rejected: usize,
    pub cancelled: usize,
}

pub async fn run(settings: DemoSettings) -> Result<()> {
    let summary = demo(settings).await?;
    info!(?summary, "demo finished");
    Ok(())
}

async fn demo(settings: DemoSettings) -> Result<DemoSummary> {
    let sch = Scheduler::with_config(settings.config);

    // Scheduled runs have no caller, failures only show up here
    sch.on_error(|error| warn!(%error, "scheduling error"));

    let job_duration = settings.job_duration;
    sch.define_with_concurrency(JOB, settings.concurrency, move |args| {
        coin_flip(args, job_duration)
    })
    .map_err(|e| miette::miette!("{}", e))?;

    let started: Arc<Mutex<Vec<ExecutionHandle>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let started = Arc::clone(&started);
        sch.on_started(JOB, move |event| {
            info!(job = %event.job, execution = %event.handle.id(), "running");
            started.lock().push(event.handle.clone());
        });
    }

    sch.schedule(JOB, settings.interval, job_args!["arg1", 2, {"arg": 3}])
        .map_err(|e| miette::miette!("{}", e))?;
    info!(
        job = JOB,
        interval_ms = settings.interval.as_millis() as u64,
        run_for_secs = settings.run_for.as_secs(),
        "schedule started"
    );

    tokio::select! {
        _ = tokio::time::sleep(settings.run_for) => {}
        _ = tokio::signal::ctrl_c() => info!("received shutdown signal"),
    }

    sch.clear(JOB).map_err(|e| miette::miette!("{}", e))?;
    info!(job = JOB, "schedule cleared");

    // No new executions after clear; let the admitted ones settle
    let handles = std::mem::take(&mut *started.lock());
    let mut summary = DemoSummary {
        started: handles.len(),
        ..DemoSummary::default()
    };
    for handle in handles {
        match handle.outcome().await {
            Outcome::Resolved { value } => {
                info!(execution = %handle.id(), %value, "resolved");
                summary.resolved += 1;
            }
            Outcome::Rejected { reason } => {
                info!(execution = %handle.id(), %reason, "rejected");
                summary.rejected += 1;
            }
            Outcome::Cancelled => {
                info!(execution = %handle.id(), "cancelled");
                summary.cancelled += 1;
            }
        }
    }

    let snapshot = sch.snapshot(JOB).map_err(|e| miette::miette!("{}", e))?;
    debug!(?snapshot, "final job state");
    Ok(summary)
}
