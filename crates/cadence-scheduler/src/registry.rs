//! Job registry and per-job concurrency slots.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info};

use crate::{JobArgs, JobResult, SchedulerError};

/// Type alias for the job executor function.
pub type JobExecutor =
    Arc<dyn Fn(JobArgs) -> Pin<Box<dyn Future<Output = JobResult> + Send>> + Send + Sync>;

/// Box a plain async closure into a [`JobExecutor`].
pub(crate) fn boxed_executor<F, Fut>(executor: F) -> JobExecutor
where
    F: Fn(JobArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = JobResult> + Send + 'static,
{
    Arc::new(move |args| Box::pin(executor(args)))
}

/// A defined job: its executor, its limit and its in-flight counter.
pub(crate) struct JobEntry {
    name: Arc<str>,
    executor: JobExecutor,
    concurrency: usize,
    current: AtomicUsize,
}

impl JobEntry {
    pub(crate) fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub(crate) fn executor(&self) -> &JobExecutor {
        &self.executor
    }

    pub(crate) fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.current.load(Ordering::Acquire)
    }

    /// Claim one concurrency slot, or return `None` if the job is at its limit.
    pub(crate) fn try_acquire(self: &Arc<Self>) -> Option<Slot> {
        self.current
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < self.concurrency).then_some(current + 1)
            })
            .ok()
            .map(|_| Slot {
                job: Arc::clone(self),
            })
    }
}

/// One claimed concurrency slot. Dropping it releases the slot.
///
/// The slot keeps its job entry alive, so a job removed while executions are
/// in flight still receives their releases.
pub(crate) struct Slot {
    job: Arc<JobEntry>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        let previous = self.job.current.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "released a slot that was never claimed");
        debug!(job = %self.job.name, in_flight = previous - 1, "released concurrency slot");
    }
}

/// The set of defined jobs, keyed by name.
#[derive(Default)]
pub struct JobRegistry {
    jobs: DashMap<String, Arc<JobEntry>>,
}

impl JobRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Define a new job.
    #[tracing::instrument(skip(self, executor))]
    pub fn define(
        &self,
        name: &str,
        concurrency: usize,
        executor: JobExecutor,
    ) -> Result<(), SchedulerError> {
        if concurrency == 0 {
            return Err(SchedulerError::InvalidConcurrency(name.to_string()));
        }

        match self.jobs.entry(name.to_string()) {
            Entry::Occupied(_) => Err(SchedulerError::DuplicateName(name.to_string())),
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::new(JobEntry {
                    name: Arc::from(name),
                    executor,
                    concurrency,
                    current: AtomicUsize::new(0),
                }));
                info!(job = %name, concurrency, "defined job");
                Ok(())
            }
        }
    }

    /// Remove a job. In-flight executions keep running.
    #[tracing::instrument(skip(self))]
    pub fn remove(&self, name: &str) -> Result<(), SchedulerError> {
        let (_, entry) = self
            .jobs
            .remove(name)
            .ok_or_else(|| SchedulerError::UnknownJob(name.to_string()))?;

        info!(job = %name, in_flight = entry.in_flight(), "removed job");
        Ok(())
    }

    /// Look up a job entry by name.
    pub(crate) fn lookup(&self, name: &str) -> Result<Arc<JobEntry>, SchedulerError> {
        self.jobs
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| SchedulerError::UnknownJob(name.to_string()))
    }

    /// Whether a job with this name is defined.
    pub fn contains(&self, name: &str) -> bool {
        self.jobs.contains_key(name)
    }

    /// Names of all defined jobs, sorted.
    pub fn job_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.jobs.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Number of in-flight executions for a job.
    pub fn in_flight(&self, name: &str) -> Result<usize, SchedulerError> {
        self.lookup(name).map(|entry| entry.in_flight())
    }

    /// Concurrency limit of a job.
    pub fn concurrency(&self, name: &str) -> Result<usize, SchedulerError> {
        self.lookup(name).map(|entry| entry.concurrency())
    }
}
