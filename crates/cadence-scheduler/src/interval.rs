//! Interval scheduler.
//!
//! Keeps at most one repeating timer per job. Each firing calls the execution
//! gate with the schedule's fixed arguments; failures are published on the
//! error channel since nobody is waiting on the timer.

use std::cell::Cell;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::ReentrantMutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tracing::{debug, info};

use crate::events::SchedulingError;
use crate::gate::{ExecutionGate, ExecutionHandle};
use crate::{JobArgs, MissedTicks, Outcome, SchedulerError};

/// Serialises timer admissions against `clear`.
///
/// An admission runs while holding the lock and only if still armed, so once
/// `disarm` returns no further execution can be admitted. Events are published
/// after the lock is released. The lock is reentrant so an executor called
/// during admission may clear its own schedule.
struct Armed(ReentrantMutex<Cell<bool>>);

impl Armed {
    fn new() -> Self {
        Self(ReentrantMutex::new(Cell::new(true)))
    }

    fn disarm(&self) {
        self.0.lock().set(false);
    }

    /// Run `admit` if still armed. Returns `None` once disarmed.
    fn while_armed<R>(&self, admit: impl FnOnce() -> R) -> Option<R> {
        let armed = self.0.lock();
        armed.get().then(admit)
    }
}

struct Timer {
    interval: Duration,
    armed: Arc<Armed>,
    task: JoinHandle<()>,
}

impl Timer {
    fn stop(&self) {
        self.armed.disarm();
        self.task.abort();
    }
}

/// Owns the repeating timers, keyed by job name.
pub struct IntervalScheduler {
    gate: Arc<ExecutionGate>,
    timers: DashMap<String, Timer>,
    missed_ticks: MissedTicks,
}

impl IntervalScheduler {
    pub fn new(gate: Arc<ExecutionGate>, missed_ticks: MissedTicks) -> Self {
        Self {
            gate,
            timers: DashMap::new(),
            missed_ticks,
        }
    }

    /// Trigger `name` every `interval` with `args`, first firing one interval from now.
    #[tracing::instrument(skip(self, args))]
    pub fn schedule(
        &self,
        name: &str,
        interval: Duration,
        args: JobArgs,
    ) -> Result<(), SchedulerError> {
        if !self.gate.registry().contains(name) {
            return Err(SchedulerError::UnknownJob(name.to_string()));
        }

        match self.timers.entry(name.to_string()) {
            Entry::Occupied(_) => Err(SchedulerError::AlreadyScheduled(name.to_string())),
            Entry::Vacant(vacant) => {
                if interval.is_zero() {
                    return Err(SchedulerError::InvalidInterval(name.to_string()));
                }
                let runtime = Handle::try_current()
                    .map_err(|_| SchedulerError::NoRuntime(name.to_string()))?;

                let armed = Arc::new(Armed::new());
                let task = runtime.spawn(run_timer(
                    Arc::clone(&self.gate),
                    name.to_string(),
                    interval,
                    args,
                    Arc::clone(&armed),
                    self.missed_ticks,
                ));

                vacant.insert(Timer {
                    interval,
                    armed,
                    task,
                });
                info!(job = %name, interval_ms = interval.as_millis() as u64, "scheduled job");
                Ok(())
            }
        }
    }

    /// Cancel the schedule of `name`. In-flight executions are not affected.
    #[tracing::instrument(skip(self))]
    pub fn clear(&self, name: &str) -> Result<(), SchedulerError> {
        let (_, timer) = self
            .timers
            .remove(name)
            .ok_or_else(|| SchedulerError::NoSchedule(name.to_string()))?;

        timer.stop();
        info!(job = %name, "cleared schedule");
        Ok(())
    }

    pub fn is_scheduled(&self, name: &str) -> bool {
        self.timers.contains_key(name)
    }

    /// Interval of the active schedule of `name`.
    pub fn interval(&self, name: &str) -> Option<Duration> {
        self.timers.get(name).map(|timer| timer.interval)
    }

    /// Names of all scheduled jobs, sorted.
    pub fn scheduled_jobs(&self) -> Vec<String> {
        let mut names: Vec<String> = self.timers.iter().map(|t| t.key().clone()).collect();
        names.sort();
        names
    }
}

impl Drop for IntervalScheduler {
    fn drop(&mut self) {
        for timer in self.timers.iter() {
            timer.stop();
        }
    }
}

async fn run_timer(
    gate: Arc<ExecutionGate>,
    name: String,
    period: Duration,
    args: JobArgs,
    armed: Arc<Armed>,
    missed_ticks: MissedTicks,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(missed_ticks.into());

    loop {
        ticker.tick().await;
        let Some(admitted) = armed.while_armed(|| gate.admit(&name, args.clone())) else {
            break;
        };
        report(&gate, &name, admitted);
    }

    debug!(job = %name, "interval timer stopped");
}

/// Publish the result of one firing: `Started` on success, failures to the
/// error channel.
fn report(gate: &ExecutionGate, name: &str, admitted: Result<ExecutionHandle, SchedulerError>) {
    match admitted {
        Ok(handle) => {
            gate.announce(&handle);

            let notifier = Arc::clone(gate.notifier());
            let job = name.to_string();
            tokio::spawn(async move {
                if let Outcome::Rejected { reason } = handle.outcome().await {
                    notifier.publish_error(SchedulingError::rejected(&job, handle.id(), reason));
                }
            });
        }
        Err(error) => gate
            .notifier()
            .publish_error(SchedulingError::trigger(name, error)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::Value;
    use tokio::time::sleep;

    use crate::events::Notifier;
    use crate::registry::{JobRegistry, boxed_executor};

    fn counting_scheduler(counter: Arc<AtomicUsize>) -> IntervalScheduler {
        let registry = Arc::new(JobRegistry::new());
        registry
            .define(
                "tick",
                1,
                boxed_executor(move |_args| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Ok::<_, String>(Value::Null) }
                }),
            )
            .unwrap();
        let gate = Arc::new(ExecutionGate::new(registry, Arc::new(Notifier::new(16))));
        IntervalScheduler::new(gate, MissedTicks::Delay)
    }

    #[tokio::test]
    async fn test_schedule_error_paths() {
        let intervals = counting_scheduler(Arc::new(AtomicUsize::new(0)));

        assert_eq!(
            intervals.schedule("missing", Duration::from_millis(10), JobArgs::new()),
            Err(SchedulerError::UnknownJob("missing".to_string()))
        );
        assert_eq!(
            intervals.schedule("tick", Duration::ZERO, JobArgs::new()),
            Err(SchedulerError::InvalidInterval("tick".to_string()))
        );
        assert!(!intervals.is_scheduled("tick"));

        intervals
            .schedule("tick", Duration::from_millis(10), JobArgs::new())
            .unwrap();
        assert_eq!(
            intervals.schedule("tick", Duration::from_millis(10), JobArgs::new()),
            Err(SchedulerError::AlreadyScheduled("tick".to_string()))
        );
        assert_eq!(intervals.interval("tick"), Some(Duration::from_millis(10)));

        intervals.clear("tick").unwrap();
        assert_eq!(
            intervals.clear("tick"),
            Err(SchedulerError::NoSchedule("tick".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_every_interval_until_cleared() {
        let counter = Arc::new(AtomicUsize::new(0));
        let intervals = counting_scheduler(Arc::clone(&counter));

        intervals
            .schedule("tick", Duration::from_millis(100), JobArgs::new())
            .unwrap();

        // No firing before the first full interval
        sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        sleep(Duration::from_millis(400)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 4);

        intervals.clear("tick").unwrap();
        sleep(Duration::from_millis(1_000)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_after_clear() {
        let counter = Arc::new(AtomicUsize::new(0));
        let intervals = counting_scheduler(Arc::clone(&counter));

        intervals
            .schedule("tick", Duration::from_millis(100), JobArgs::new())
            .unwrap();
        intervals.clear("tick").unwrap();
        intervals
            .schedule("tick", Duration::from_millis(30), JobArgs::new())
            .unwrap();

        sleep(Duration::from_millis(100)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(intervals.scheduled_jobs(), vec!["tick"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_stops_timers() {
        let counter = Arc::new(AtomicUsize::new(0));
        let intervals = counting_scheduler(Arc::clone(&counter));
        intervals
            .schedule("tick", Duration::from_millis(10), JobArgs::new())
            .unwrap();

        sleep(Duration::from_millis(25)).await;
        drop(intervals);
        let seen = counter.load(Ordering::SeqCst);
        assert_eq!(seen, 2);

        sleep(Duration::from_millis(100)).await;
        assert_eq!(counter.load(Ordering::SeqCst), seen);
    }

    #[test]
    fn test_armed_is_reentrant() {
        let armed = Armed::new();
        let inner_ran = armed.while_armed(|| {
            // Disarming from inside an admission must not deadlock
            armed.disarm();
        });
        assert_eq!(inner_ran, Some(()));
        let fired: Option<()> = armed.while_armed(|| panic!("disarmed timer fired"));
        assert!(fired.is_none());
    }
}
