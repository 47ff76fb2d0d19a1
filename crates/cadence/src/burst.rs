//! `cadence burst`: manual starts against a single-slot job.
//!
//! Every define after the first is refused as a duplicate, and every start
//! issued while the previous execution is still running is refused at the
//! concurrency limit.

use std::time::Duration;

use cadence_scheduler::{ExecutionHandle, Scheduler, SchedulerConfig, job_args};
use miette::Result;
use tokio::time::{Instant, interval_at};
use tracing::{info, warn};

use crate::jobs::coin_flip;

const JOB: &str = "route_0000";

pub struct BurstSettings {
    pub config: SchedulerConfig,
    pub interval: Duration,
    pub job_duration: Duration,
    pub ticks: u32,
    pub defines: usize,
}

/// Counts reported when the burst finishes.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct BurstSummary {
    pub defined: usize,
    pub duplicates: usize,
    pub started: usize,
    pub refused: usize,
}

pub async fn run(settings: BurstSettings) -> Result<()> {
    let summary = burst(settings).await?;
    info!(?summary, "burst finished");
    Ok(())
}

async fn burst(settings: BurstSettings) -> Result<BurstSummary> {
    let sch = Scheduler::with_config(settings.config);
    let mut summary = BurstSummary::default();

    let job_duration = settings.job_duration;
    for attempt in 1..=settings.defines {
        match sch.define(JOB, move |args| coin_flip(args, job_duration)) {
            Ok(()) => {
                info!(job = JOB, attempt, "defined");
                summary.defined += 1;
            }
            Err(error) => {
                warn!(%error, attempt, "define refused");
                summary.duplicates += 1;
            }
        }
    }

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut ticker = interval_at(Instant::now() + settings.interval, settings.interval);
    let mut handles: Vec<ExecutionHandle> = Vec::new();

    for tick in 1..=settings.ticks {
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                info!("received shutdown signal");
                break;
            }

            _ = ticker.tick() => {}
        }

        match sch.start(JOB, job_args!["banana", 12345]) {
            Ok(handle) => {
                info!(tick, execution = %handle.id(), "running {}", JOB);
                summary.started += 1;
                handles.push(handle);
            }
            Err(error) => {
                warn!(tick, %error, "start refused");
                summary.refused += 1;
            }
        }
    }

    for handle in handles {
        let outcome = handle.outcome().await;
        info!(execution = %handle.id(), ?outcome, "settled");
    }

    Ok(summary)
}
