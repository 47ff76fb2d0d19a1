//! Execution gate.
//!
//! Admits an execution only if its job has a free concurrency slot, spawns the
//! executor's future on the tokio runtime and hands back an
//! [`ExecutionHandle`]. The slot travels with the spawned task and is released
//! when that task ends, however it ends.

use std::any::Any;
use std::fmt;
use std::future::{self, Future, IntoFuture};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use futures_util::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::events::{Notifier, SchedulerEvent, StartedEvent};
use crate::registry::{JobRegistry, Slot};
use crate::{ExecutionId, JobArgs, JobResult, Outcome, SchedulerError};

type BoxedJob = Pin<Box<dyn Future<Output = JobResult> + Send>>;

/// Handle to one admitted execution.
///
/// Clones observe the same outcome. Dropping every handle does not cancel the
/// execution.
#[derive(Clone)]
pub struct ExecutionHandle {
    id: ExecutionId,
    job: Arc<str>,
    outcome: watch::Receiver<Option<Outcome>>,
    abort: AbortHandle,
}

impl ExecutionHandle {
    pub fn id(&self) -> ExecutionId {
        self.id
    }

    /// Name of the job this execution belongs to.
    pub fn job(&self) -> &str {
        &self.job
    }

    /// Wait for the execution to settle.
    pub async fn outcome(&self) -> Outcome {
        let mut rx = self.outcome.clone();
        let settled = match rx.wait_for(Option::is_some).await {
            Ok(state) => state.clone(),
            // Task dropped without settling
            Err(_) => None,
        };
        settled.unwrap_or(Outcome::Cancelled)
    }

    /// The outcome if the execution has already settled.
    pub fn try_outcome(&self) -> Option<Outcome> {
        // Read closure first: once closed, the stored value is final
        let closed = self.outcome.has_changed().is_err();
        match self.outcome.borrow().clone() {
            Some(outcome) => Some(outcome),
            None if closed => Some(Outcome::Cancelled),
            None => None,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.try_outcome().is_some()
    }

    /// Abort the execution. Its slot is released once the runtime drops the task.
    pub fn cancel(&self) {
        self.abort.abort();
    }
}

impl fmt::Debug for ExecutionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionHandle")
            .field("id", &self.id)
            .field("job", &self.job)
            .field("outcome", &self.try_outcome())
            .finish()
    }
}

impl IntoFuture for ExecutionHandle {
    type Output = Outcome;
    type IntoFuture = Pin<Box<dyn Future<Output = Outcome> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.outcome().await })
    }
}

/// Owns the slot and the outcome sender of a running execution.
///
/// Field order matters: on drop the slot is released before the sender
/// closes, so observers never see a settled execution still holding a slot.
struct Settle {
    slot: Slot,
    outcome: watch::Sender<Option<Outcome>>,
}

impl Settle {
    fn finish(self, outcome: Outcome) {
        let Settle {
            slot,
            outcome: sender,
        } = self;
        drop(slot);
        sender.send_replace(Some(outcome));
    }
}

/// Admits executions against the registry's concurrency limits.
pub struct ExecutionGate {
    registry: Arc<JobRegistry>,
    notifier: Arc<Notifier>,
    next_id: AtomicU64,
}

impl ExecutionGate {
    pub fn new(registry: Arc<JobRegistry>, notifier: Arc<Notifier>) -> Self {
        Self {
            registry,
            notifier,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn notifier(&self) -> &Arc<Notifier> {
        &self.notifier
    }

    /// Start one execution of `name`.
    ///
    /// Returns immediately; the handle represents eventual completion. Fails
    /// without side effects if the job is unknown, at its limit, or there is
    /// no runtime to run it on.
    #[tracing::instrument(skip(self, args))]
    pub fn start(&self, name: &str, args: JobArgs) -> Result<ExecutionHandle, SchedulerError> {
        let handle = self.admit(name, args)?;
        self.announce(&handle);
        Ok(handle)
    }

    /// Claim a slot and spawn the execution without publishing any event.
    ///
    /// Runs no subscriber code, so callers may hold locks around it.
    pub(crate) fn admit(
        &self,
        name: &str,
        args: JobArgs,
    ) -> Result<ExecutionHandle, SchedulerError> {
        let job = self.registry.lookup(name)?;
        let runtime =
            Handle::try_current().map_err(|_| SchedulerError::NoRuntime(name.to_string()))?;

        let slot = job.try_acquire().ok_or_else(|| {
            debug!(job = %name, limit = job.concurrency(), "concurrency limit reached");
            SchedulerError::ConcurrencyExceeded {
                name: name.to_string(),
                limit: job.concurrency(),
            }
        })?;

        let id = ExecutionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let future: BoxedJob = match catch_unwind(AssertUnwindSafe(|| (job.executor())(args))) {
            Ok(future) => future,
            Err(payload) => {
                let reason = format!("executor panicked: {}", panic_message(payload.as_ref()));
                Box::pin(future::ready(Err(reason)))
            }
        };

        let (sender, receiver) = watch::channel(None);
        let settle = Settle {
            slot,
            outcome: sender,
        };
        let task = runtime.spawn(run_execution(
            future,
            settle,
            Arc::clone(job.name()),
            id,
        ));

        info!(job = %name, execution = %id, in_flight = job.in_flight(), "started execution");

        Ok(ExecutionHandle {
            id,
            job: Arc::clone(job.name()),
            outcome: receiver,
            abort: task.abort_handle(),
        })
    }

    /// Publish the `Started` event of an admitted execution.
    pub(crate) fn announce(&self, handle: &ExecutionHandle) {
        self.notifier.publish(SchedulerEvent::Started(StartedEvent {
            job: handle.job().to_string(),
            handle: handle.clone(),
            started_at: Utc::now(),
        }));
    }
}

async fn run_execution(
    future: BoxedJob,
    settle: Settle,
    job: Arc<str>,
    id: ExecutionId,
) {
    let outcome = match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => Outcome::from(result),
        Err(payload) => Outcome::Rejected {
            reason: format!("executor panicked: {}", panic_message(payload.as_ref())),
        },
    };

    match &outcome {
        Outcome::Resolved { .. } => debug!(job = %job, execution = %id, "execution resolved"),
        Outcome::Rejected { reason } => {
            warn!(job = %job, execution = %id, reason = %reason, "execution rejected")
        }
        Outcome::Cancelled => {}
    }

    settle.finish(outcome);
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
