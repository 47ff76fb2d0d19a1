//! Cadence: in-process job scheduler
//!
//! Demo binary with subcommands:
//! - `demo`: schedule a job that randomly resolves or rejects, log its lifecycle
//! - `burst`: start a single-slot job on every tick and watch starts get refused

use std::time::Duration;

use cadence_scheduler::{MissedTicks, SchedulerConfig};
use clap::{ArgAction, Args, Parser, Subcommand};
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod burst;
mod demo;
mod jobs;

/// Parse boolean from environment variable, accepting common truthy values.
/// Accepts "1", "true", "yes", "on" (case-insensitive) as true.
/// Accepts "0", "false", "no", "off", "" (case-insensitive) as false.
fn parse_bool_env(s: &str) -> Result<bool, String> {
    match s.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(format!(
            "invalid boolean value '{}', expected 1/true/yes/on or 0/false/no/off",
            s
        )),
    }
}

#[derive(Parser)]
#[command(name = "cadence")]
#[command(about = "In-process job scheduler", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Scheduler settings shared by every subcommand.
#[derive(Args, Debug)]
struct SchedulerOptions {
    /// Buffer size of the broadcast event stream
    #[arg(long, env = "CADENCE_EVENT_CAPACITY", default_value = "256")]
    event_capacity: usize,

    /// What interval timers do with missed ticks (burst, delay, skip)
    #[arg(long, env = "CADENCE_MISSED_TICKS", default_value = "delay")]
    missed_ticks: MissedTicks,

    /// Clear a job's schedule when the job is removed.
    /// Accepts "1", "true", "yes", or "on".
    #[arg(
        long,
        env = "CADENCE_CLEAR_ON_REMOVE",
        action = ArgAction::Set,
        value_parser = parse_bool_env,
        default_value = "false"
    )]
    clear_on_remove: bool,
}

impl From<SchedulerOptions> for SchedulerConfig {
    fn from(options: SchedulerOptions) -> Self {
        SchedulerConfig::default()
            .event_capacity(options.event_capacity)
            .missed_ticks(options.missed_ticks)
            .clear_schedule_on_remove(options.clear_on_remove)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Schedule a randomly failing job and log every start, outcome and error
    Demo {
        /// Interval between scheduled starts in milliseconds
        #[arg(
            long,
            env = "CADENCE_INTERVAL_MS",
            default_value = "1000",
            value_parser = clap::value_parser!(u64).range(1..)
        )]
        interval_ms: u64,

        /// How long each execution runs in milliseconds
        #[arg(long, env = "CADENCE_JOB_DURATION_MS", default_value = "3000")]
        job_duration_ms: u64,

        /// Clear the schedule after this many seconds
        #[arg(long, env = "CADENCE_RUN_FOR_SECS", default_value = "10")]
        run_for_secs: u64,

        /// Simultaneous executions allowed for the job
        #[arg(long, default_value = "1")]
        concurrency: usize,

        #[command(flatten)]
        scheduler: SchedulerOptions,
    },

    /// Redefine a job, then start it by hand on every tick
    Burst {
        /// Interval between manual starts in milliseconds
        #[arg(
            long,
            env = "CADENCE_INTERVAL_MS",
            default_value = "1000",
            value_parser = clap::value_parser!(u64).range(1..)
        )]
        interval_ms: u64,

        /// How long each execution runs in milliseconds
        #[arg(long, env = "CADENCE_JOB_DURATION_MS", default_value = "3000")]
        job_duration_ms: u64,

        /// Number of manual starts to attempt
        #[arg(long, default_value = "10")]
        ticks: u32,

        /// How many times to try defining the job
        #[arg(long, default_value = "4")]
        defines: usize,

        #[command(flatten)]
        scheduler: SchedulerOptions,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "cadence=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Demo {
            interval_ms,
            job_duration_ms,
            run_for_secs,
            concurrency,
            scheduler,
        } => {
            demo::run(demo::DemoSettings {
                config: scheduler.into(),
                interval: Duration::from_millis(interval_ms),
                job_duration: Duration::from_millis(job_duration_ms),
                run_for: Duration::from_secs(run_for_secs),
                concurrency,
            })
            .await
        }
        Commands::Burst {
            interval_ms,
            job_duration_ms,
            ticks,
            defines,
            scheduler,
        } => {
            burst::run(burst::BurstSettings {
                config: scheduler.into(),
                interval: Duration::from_millis(interval_ms),
                job_duration: Duration::from_millis(job_duration_ms),
                ticks,
                defines,
            })
            .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_bool_env() {
        for truthy in ["1", "true", "YES", "On"] {
            assert_eq!(parse_bool_env(truthy), Ok(true));
        }
        for falsy in ["0", "false", "No", "off", ""] {
            assert_eq!(parse_bool_env(falsy), Ok(false));
        }
        assert!(parse_bool_env("maybe").is_err());
    }

    #[test]
    fn test_cli_builds_scheduler_config() {
        let cli = Cli::try_parse_from([
            "cadence",
            "demo",
            "--missed-ticks",
            "skip",
            "--clear-on-remove",
            "yes",
        ])
        .unwrap();

        let Commands::Demo { scheduler, .. } = cli.command else {
            panic!("expected demo command");
        };
        let config = SchedulerConfig::from(scheduler);
        assert_eq!(config.missed_ticks, MissedTicks::Skip);
        assert!(config.clear_schedule_on_remove);
        assert_eq!(config.event_capacity, 256);
    }

    #[test]
    fn test_zero_interval_rejected_at_parse_time() {
        for command in ["demo", "burst"] {
            assert!(
                Cli::try_parse_from(["cadence", command, "--interval-ms", "0"]).is_err(),
                "{} accepted a zero interval",
                command
            );
            assert!(Cli::try_parse_from(["cadence", command, "--interval-ms", "1"]).is_ok());
        }
    }
}
