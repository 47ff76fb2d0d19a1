//! Scheduler types.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Result produced by a job executor: a JSON value on success, a reason on failure.
pub type JobResult = Result<Value, String>;

/// Arguments passed to a job executor.
///
/// Interval-triggered runs clone the same arguments into every invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobArgs(Vec<Value>);

impl JobArgs {
    /// Create an empty argument list.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append an argument.
    pub fn push(&mut self, value: impl Into<Value>) {
        self.0.push(value.into());
    }

    /// Builder-style variant of [`JobArgs::push`].
    pub fn with(mut self, value: impl Into<Value>) -> Self {
        self.push(value);
        self
    }

    /// Argument at `index`, if present.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.0.iter()
    }

    /// Consume the arguments as a JSON array.
    pub fn into_value(self) -> Value {
        Value::Array(self.0)
    }

    pub fn into_inner(self) -> Vec<Value> {
        self.0
    }
}

impl From<Vec<Value>> for JobArgs {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

impl FromIterator<Value> for JobArgs {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a JobArgs {
    type Item = &'a Value;
    type IntoIter = std::slice::Iter<'a, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Build [`JobArgs`] from JSON-like literals.
///
/// ```
/// use cadence_scheduler::job_args;
///
/// let args = job_args!["arg1", 2, {"arg": 3}];
/// assert_eq!(args.len(), 3);
/// ```
#[macro_export]
macro_rules! job_args {
    () => {
        $crate::JobArgs::new()
    };
    ($($arg:tt),+ $(,)?) => {
        $crate::JobArgs::from(vec![$($crate::__private::serde_json::json!($arg)),+])
    };
}

/// Identifier of one admitted execution, unique within a scheduler instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExecutionId(pub u64);

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How an execution settled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// The executor's future completed with a value.
    Resolved { value: Value },
    /// The executor's future failed (or panicked).
    Rejected { reason: String },
    /// The execution was aborted before it settled.
    Cancelled,
}

impl Outcome {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved { .. })
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<JobResult> for Outcome {
    fn from(result: JobResult) -> Self {
        match result {
            Ok(value) => Self::Resolved { value },
            Err(reason) => Self::Rejected { reason },
        }
    }
}

/// Point-in-time view of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub name: String,
    /// Maximum number of concurrent executions.
    pub concurrency: usize,
    /// Executions currently holding a slot.
    pub in_flight: usize,
    /// Whether an interval schedule is attached to this name.
    pub scheduled: bool,
}
