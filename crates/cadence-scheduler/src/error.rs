//! Error types for the scheduler.

use thiserror::Error;

/// Errors that can occur in scheduler operations.
///
/// Every variant is a synchronous, local failure of the call that produced it.
/// The type is `Clone` so it can be carried inside scheduling error events.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// A job with this name is already defined.
    #[error("job name already taken: {0}")]
    DuplicateName(String),

    /// No job with this name is defined.
    #[error("job not found: {0}")]
    UnknownJob(String),

    /// The job already has `limit` executions in flight.
    #[error("job {name} is at max concurrency level of {limit}")]
    ConcurrencyExceeded { name: String, limit: usize },

    /// The job already has an active schedule.
    #[error("job already scheduled: {0}")]
    AlreadyScheduled(String),

    /// The schedule interval was zero.
    #[error("invalid interval for job {0}: interval must be positive")]
    InvalidInterval(String),

    /// The job has no active schedule.
    #[error("no schedule for job: {0}")]
    NoSchedule(String),

    /// The concurrency limit was zero.
    #[error("invalid concurrency for job {0}: limit must be at least 1")]
    InvalidConcurrency(String),

    /// An event topic string could not be parsed.
    #[error("invalid event topic: {0}")]
    InvalidTopic(String),

    /// `start` was called outside of a tokio runtime.
    #[error("no tokio runtime available to run job {0}")]
    NoRuntime(String),
}

impl SchedulerError {
    /// Name of the job this error refers to, if any.
    pub fn job(&self) -> Option<&str> {
        match self {
            Self::DuplicateName(name)
            | Self::UnknownJob(name)
            | Self::AlreadyScheduled(name)
            | Self::InvalidInterval(name)
            | Self::NoSchedule(name)
            | Self::InvalidConcurrency(name)
            | Self::NoRuntime(name)
            | Self::ConcurrencyExceeded { name, .. } => Some(name),
            Self::InvalidTopic(_) => None,
        }
    }
}
