//! Scheduler facade.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::events::{
    Notifier, SchedulerEvent, SchedulingError, StartedEvent, SubscriptionId, Topic,
};
use crate::gate::{ExecutionGate, ExecutionHandle};
use crate::interval::IntervalScheduler;
use crate::registry::{JobExecutor, JobRegistry, boxed_executor};
use crate::{JobArgs, JobResult, JobSnapshot, SchedulerConfig, SchedulerError};

/// The job scheduler.
///
/// Owns the job registry, the execution gate, the interval timers and the
/// notification channel. Dropping it stops every interval timer; executions
/// already in flight run to completion.
pub struct Scheduler {
    config: SchedulerConfig,
    registry: Arc<JobRegistry>,
    notifier: Arc<Notifier>,
    gate: Arc<ExecutionGate>,
    intervals: IntervalScheduler,
}

impl Scheduler {
    /// Create a scheduler with the default configuration.
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    /// Create a scheduler.
    pub fn with_config(config: SchedulerConfig) -> Self {
        let registry = Arc::new(JobRegistry::new());
        let notifier = Arc::new(Notifier::new(config.event_capacity));
        let gate = Arc::new(ExecutionGate::new(
            Arc::clone(&registry),
            Arc::clone(&notifier),
        ));
        let intervals = IntervalScheduler::new(Arc::clone(&gate), config.missed_ticks);

        debug!(?config, "scheduler created");
        Self {
            config,
            registry,
            notifier,
            gate,
            intervals,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Define a job that allows one execution at a time.
    pub fn define<F, Fut>(&self, name: &str, executor: F) -> Result<(), SchedulerError>
    where
        F: Fn(JobArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JobResult> + Send + 'static,
    {
        self.define_with_concurrency(name, 1, executor)
    }

    /// Define a job allowing up to `concurrency` simultaneous executions.
    pub fn define_with_concurrency<F, Fut>(
        &self,
        name: &str,
        concurrency: usize,
        executor: F,
    ) -> Result<(), SchedulerError>
    where
        F: Fn(JobArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JobResult> + Send + 'static,
    {
        self.registry.define(name, concurrency, boxed_executor(executor))
    }

    /// Define a job from an already boxed executor.
    pub fn define_executor(
        &self,
        name: &str,
        concurrency: usize,
        executor: JobExecutor,
    ) -> Result<(), SchedulerError> {
        self.registry.define(name, concurrency, executor)
    }

    /// Remove a job.
    ///
    /// Its schedule is left running (and reports `UnknownJob` on every firing)
    /// unless `clear_schedule_on_remove` is set.
    pub fn remove(&self, name: &str) -> Result<(), SchedulerError> {
        self.registry.remove(name)?;

        if self.config.clear_schedule_on_remove && self.intervals.clear(name).is_ok() {
            info!(job = %name, "cleared schedule of removed job");
        }
        Ok(())
    }

    /// Start one execution of `name` now.
    pub fn start(&self, name: &str, args: JobArgs) -> Result<ExecutionHandle, SchedulerError> {
        self.gate.start(name, args)
    }

    /// Start `name` every `interval` with `args`.
    pub fn schedule(
        &self,
        name: &str,
        interval: Duration,
        args: JobArgs,
    ) -> Result<(), SchedulerError> {
        self.intervals.schedule(name, interval, args)
    }

    /// Cancel the schedule of `name`.
    pub fn clear(&self, name: &str) -> Result<(), SchedulerError> {
        self.intervals.clear(name)
    }

    /// Register a handler on a topic.
    pub fn subscribe<F>(&self, topic: Topic, handler: F) -> SubscriptionId
    where
        F: Fn(&SchedulerEvent) + Send + Sync + 'static,
    {
        self.notifier.subscribe(topic, handler)
    }

    /// Register a handler on a topic given as `started::<job>` or `error`.
    pub fn on<F>(&self, topic: &str, handler: F) -> Result<SubscriptionId, SchedulerError>
    where
        F: Fn(&SchedulerEvent) + Send + Sync + 'static,
    {
        let topic = topic.parse::<Topic>()?;
        Ok(self.notifier.subscribe(topic, handler))
    }

    pub fn on_started<F>(&self, job: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&StartedEvent) + Send + Sync + 'static,
    {
        self.notifier.on_started(job, handler)
    }

    pub fn on_error<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&SchedulingError) + Send + Sync + 'static,
    {
        self.notifier.on_error(handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.notifier.unsubscribe(id)
    }

    /// Stream of every event, for asynchronous consumers.
    pub fn events(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.notifier.events()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    pub fn job_names(&self) -> Vec<String> {
        self.registry.job_names()
    }

    pub fn in_flight(&self, name: &str) -> Result<usize, SchedulerError> {
        self.registry.in_flight(name)
    }

    pub fn is_scheduled(&self, name: &str) -> bool {
        self.intervals.is_scheduled(name)
    }

    pub fn scheduled_jobs(&self) -> Vec<String> {
        self.intervals.scheduled_jobs()
    }

    /// Interval of the active schedule of `name`, if any.
    pub fn interval(&self, name: &str) -> Option<Duration> {
        self.intervals.interval(name)
    }

    /// Number of handlers registered on `topic`.
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.notifier.subscriber_count(topic)
    }

    /// Current state of a defined job.
    pub fn snapshot(&self, name: &str) -> Result<JobSnapshot, SchedulerError> {
        Ok(JobSnapshot {
            name: name.to_string(),
            concurrency: self.registry.concurrency(name)?,
            in_flight: self.registry.in_flight(name)?,
            scheduled: self.intervals.is_scheduled(name),
        })
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::Value;

    async fn noop(_args: JobArgs) -> JobResult {
        Ok(Value::Null)
    }

    #[test]
    fn test_define_duplicate_then_remove() {
        let sch = Scheduler::new();
        sch.define("j", noop).unwrap();
        assert_eq!(
            sch.define("j", noop),
            Err(SchedulerError::DuplicateName("j".to_string()))
        );

        sch.remove("j").unwrap();
        sch.define("j", noop).unwrap();
        assert_eq!(sch.job_names(), vec!["j".to_string()]);
    }

    #[tokio::test]
    async fn test_snapshot() {
        let sch = Scheduler::new();
        sch.define_with_concurrency("j", 3, noop).unwrap();
        sch.schedule("j", Duration::from_secs(60), JobArgs::new())
            .unwrap();

        assert_eq!(
            sch.snapshot("j").unwrap(),
            JobSnapshot {
                name: "j".to_string(),
                concurrency: 3,
                in_flight: 0,
                scheduled: true,
            }
        );
        assert_eq!(
            sch.snapshot("missing"),
            Err(SchedulerError::UnknownJob("missing".to_string()))
        );
    }

    #[tokio::test]
    async fn test_remove_keeps_schedule_by_default() {
        let sch = Scheduler::new();
        sch.define("j", noop).unwrap();
        sch.schedule("j", Duration::from_secs(60), JobArgs::new())
            .unwrap();

        sch.remove("j").unwrap();
        assert!(sch.is_scheduled("j"));
        assert_eq!(sch.interval("j"), Some(Duration::from_secs(60)));
        sch.clear("j").unwrap();
        assert_eq!(sch.interval("j"), None);
    }

    #[tokio::test]
    async fn test_remove_clears_schedule_when_configured() {
        let sch =
            Scheduler::with_config(SchedulerConfig::default().clear_schedule_on_remove(true));
        sch.define("j", noop).unwrap();
        sch.schedule("j", Duration::from_secs(60), JobArgs::new())
            .unwrap();

        sch.remove("j").unwrap();
        assert!(!sch.is_scheduled("j"));
        assert!(sch.scheduled_jobs().is_empty());
    }

    #[test]
    fn test_on_parses_topics() {
        let sch = Scheduler::new();
        assert!(sch.on("running::my_job", |_| {}).is_ok());
        assert!(sch.on("error", |_| {}).is_ok());
        assert_eq!(
            sch.subscriber_count(&Topic::Started("my_job".to_string())),
            1
        );
        assert_eq!(
            sch.on("finished", |_| {}).unwrap_err(),
            SchedulerError::InvalidTopic("finished".to_string())
        );
    }
}
