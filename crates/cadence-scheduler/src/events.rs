//! Notification channel.
//!
//! Publishes two kinds of events: a per-job `Started` event carrying the
//! execution handle, and a global `SchedulingError` event for failures that
//! happen on an interval timer, where no caller is around to see them.
//!
//! Handlers run synchronously, in registration order, on the task that
//! triggered the event. Every event is also sent on a broadcast stream for
//! asynchronous consumers.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{trace, warn};

use crate::gate::panic_message;
use crate::{ExecutionHandle, ExecutionId, SchedulerError};

/// Topic prefix for per-job started events.
const STARTED_PREFIX: &str = "started::";

/// Accepted alias for [`STARTED_PREFIX`].
const RUNNING_PREFIX: &str = "running::";

/// Topic name of the global scheduling error channel.
const ERROR_TOPIC: &str = "error";

/// An execution passed the concurrency check and is now running.
#[derive(Debug, Clone)]
pub struct StartedEvent {
    pub job: String,
    pub handle: ExecutionHandle,
    pub started_at: DateTime<Utc>,
}

/// Why an interval-triggered run failed.
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulingFailure {
    /// The timer's call to `start` was refused.
    Trigger(SchedulerError),
    /// The execution was admitted but its executor rejected.
    Rejected {
        execution: ExecutionId,
        reason: String,
    },
}

/// A failure that occurred on an interval timer.
#[derive(Debug, Clone)]
pub struct SchedulingError {
    pub job: String,
    pub failure: SchedulingFailure,
    pub occurred_at: DateTime<Utc>,
}

impl SchedulingError {
    pub(crate) fn trigger(job: &str, error: SchedulerError) -> Self {
        Self {
            job: job.to_string(),
            failure: SchedulingFailure::Trigger(error),
            occurred_at: Utc::now(),
        }
    }

    pub(crate) fn rejected(job: &str, execution: ExecutionId, reason: String) -> Self {
        Self {
            job: job.to_string(),
            failure: SchedulingFailure::Rejected { execution, reason },
            occurred_at: Utc::now(),
        }
    }
}

impl fmt::Display for SchedulingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.failure {
            SchedulingFailure::Trigger(error) => write!(f, "{}", error),
            SchedulingFailure::Rejected { execution, reason } => {
                write!(f, "job {} execution {} rejected: {}", self.job, execution, reason)
            }
        }
    }
}

/// Any event published by the scheduler.
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    Started(StartedEvent),
    Error(SchedulingError),
}

impl SchedulerEvent {
    /// The topic this event is delivered on.
    pub fn topic(&self) -> Topic {
        match self {
            Self::Started(started) => Topic::Started(started.job.clone()),
            Self::Error(_) => Topic::Error,
        }
    }

    fn matches(&self, topic: &Topic) -> bool {
        match (self, topic) {
            (Self::Started(started), Topic::Started(job)) => started.job == *job,
            (Self::Error(_), Topic::Error) => true,
            _ => false,
        }
    }
}

/// Subscription topic: `started::<job>` or `error`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Started(String),
    Error,
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Started(job) => write!(f, "{}{}", STARTED_PREFIX, job),
            Self::Error => f.write_str(ERROR_TOPIC),
        }
    }
}

impl FromStr for Topic {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == ERROR_TOPIC {
            return Ok(Self::Error);
        }

        let job = s
            .strip_prefix(STARTED_PREFIX)
            .or_else(|| s.strip_prefix(RUNNING_PREFIX))
            .filter(|job| !job.is_empty())
            .ok_or_else(|| SchedulerError::InvalidTopic(s.to_string()))?;

        Ok(Self::Started(job.to_string()))
    }
}

/// Identifies one registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&SchedulerEvent) + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    topic: Topic,
    handler: Handler,
}

/// Publish/subscribe hub held by the scheduler.
pub struct Notifier {
    next_id: AtomicU64,
    subscriptions: RwLock<Vec<Subscription>>,
    stream: broadcast::Sender<SchedulerEvent>,
}

impl Notifier {
    /// Create a notifier whose broadcast stream buffers `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (stream, _) = broadcast::channel(capacity.max(1));
        Self {
            next_id: AtomicU64::new(0),
            subscriptions: RwLock::new(Vec::new()),
            stream,
        }
    }

    /// Register a handler for every event on `topic`.
    pub fn subscribe<F>(&self, topic: Topic, handler: F) -> SubscriptionId
    where
        F: Fn(&SchedulerEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        trace!(%topic, ?id, "subscribed");
        self.subscriptions.write().push(Subscription {
            id,
            topic,
            handler: Arc::new(handler),
        });
        id
    }

    /// Register a handler for started events of one job.
    pub fn on_started<F>(&self, job: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&StartedEvent) + Send + Sync + 'static,
    {
        self.subscribe(Topic::Started(job.to_string()), move |event| {
            if let SchedulerEvent::Started(started) = event {
                handler(started);
            }
        })
    }

    /// Register a handler for scheduling errors.
    pub fn on_error<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&SchedulingError) + Send + Sync + 'static,
    {
        self.subscribe(Topic::Error, move |event| {
            if let SchedulerEvent::Error(error) = event {
                handler(error);
            }
        })
    }

    /// Remove a handler. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.write();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        subscriptions.len() != before
    }

    /// Number of handlers registered on `topic`.
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.subscriptions
            .read()
            .iter()
            .filter(|s| s.topic == *topic)
            .count()
    }

    /// Receive every event asynchronously.
    pub fn events(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.stream.subscribe()
    }

    /// Deliver an event to its handlers, then to the broadcast stream.
    pub(crate) fn publish(&self, event: SchedulerEvent) {
        // Snapshot so handlers may (un)subscribe while being called
        let handlers: Vec<Handler> = self
            .subscriptions
            .read()
            .iter()
            .filter(|s| event.matches(&s.topic))
            .map(|s| Arc::clone(&s.handler))
            .collect();

        for handler in handlers {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                warn!(
                    topic = %event.topic(),
                    panic = %panic_message(payload.as_ref()),
                    "event handler panicked"
                );
            }
        }

        // No receivers is fine
        let _ = self.stream.send(event);
    }

    pub(crate) fn publish_error(&self, error: SchedulingError) {
        warn!(job = %error.job, error = %error, "scheduling error");
        self.publish(SchedulerEvent::Error(error));
    }
}
