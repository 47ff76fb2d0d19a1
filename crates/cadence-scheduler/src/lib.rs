//! In-process job scheduler.
//!
//! This crate provides a scheduler that:
//! - Registers named asynchronous jobs with a per-job concurrency limit
//! - Starts jobs on demand, rejecting (never queueing) starts over the limit
//! - Re-triggers jobs on a fixed interval with fixed arguments
//! - Publishes `started` and scheduling `error` events to subscribers
//!
//! ```no_run
//! use std::time::Duration;
//! use cadence_scheduler::{Scheduler, job_args};
//!
//! # async fn demo() -> Result<(), cadence_scheduler::SchedulerError> {
//! let sch = Scheduler::new();
//! sch.define("my_job", |args| async move { Ok::<_, String>(args.into_value()) })?;
//!
//! sch.on_error(|error| eprintln!("{}", error));
//! sch.schedule("my_job", Duration::from_secs(1), job_args!["arg1", 2, {"arg": 3}])?;
//!
//! let outcome = sch.start("my_job", job_args![])?.await;
//! println!("{:?}", outcome);
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod events;
mod gate;
mod interval;
mod registry;
mod scheduler;
mod types;

pub use config::{MissedTicks, SchedulerConfig};
pub use error::SchedulerError;
pub use events::{
    SchedulerEvent, SchedulingError, SchedulingFailure, StartedEvent, SubscriptionId, Topic,
};
pub use gate::ExecutionHandle;
pub use registry::JobExecutor;
pub use scheduler::Scheduler;
pub use types::{ExecutionId, JobArgs, JobResult, JobSnapshot, Outcome};

#[doc(hidden)]
pub mod __private {
    pub use serde_json;
}
