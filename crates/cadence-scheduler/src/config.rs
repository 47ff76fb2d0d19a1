//! Scheduler configuration.

use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;

/// Default capacity of the broadcast event stream.
const DEFAULT_EVENT_CAPACITY: usize = 256;

/// What an interval timer does when firings were missed (e.g. a stalled runtime).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissedTicks {
    /// Fire all missed ticks back to back.
    Burst,
    /// Fire once, then continue one full interval later.
    #[default]
    Delay,
    /// Drop missed ticks and stay aligned to the original period.
    Skip,
}

impl From<MissedTicks> for MissedTickBehavior {
    fn from(value: MissedTicks) -> Self {
        match value {
            MissedTicks::Burst => MissedTickBehavior::Burst,
            MissedTicks::Delay => MissedTickBehavior::Delay,
            MissedTicks::Skip => MissedTickBehavior::Skip,
        }
    }
}

impl std::str::FromStr for MissedTicks {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "burst" => Ok(Self::Burst),
            "delay" => Ok(Self::Delay),
            "skip" => Ok(Self::Skip),
            other => Err(format!(
                "invalid missed tick policy '{}', expected burst/delay/skip",
                other
            )),
        }
    }
}

/// Configuration for a [`Scheduler`](crate::Scheduler) instance.
///
/// ```
/// use cadence_scheduler::{MissedTicks, SchedulerConfig};
///
/// let config = SchedulerConfig::default()
///     .event_capacity(64)
///     .missed_ticks(MissedTicks::Skip)
///     .clear_schedule_on_remove(true);
/// assert_eq!(config.event_capacity, 64);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Buffer size of the broadcast stream returned by `Scheduler::events`.
    ///
    /// Slow receivers that fall further behind than this observe a lag error.
    pub event_capacity: usize,

    /// Missed tick policy applied to every interval timer.
    pub missed_ticks: MissedTicks,

    /// When true, `remove` also clears the job's interval schedule.
    ///
    /// When false, a removed job's schedule keeps firing and reports
    /// `UnknownJob` on the error channel until it is cleared.
    pub clear_schedule_on_remove: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            event_capacity: DEFAULT_EVENT_CAPACITY,
            missed_ticks: MissedTicks::default(),
            clear_schedule_on_remove: false,
        }
    }
}

impl SchedulerConfig {
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn missed_ticks(mut self, missed_ticks: MissedTicks) -> Self {
        self.missed_ticks = missed_ticks;
        self
    }

    pub fn clear_schedule_on_remove(mut self, enabled: bool) -> Self {
        self.clear_schedule_on_remove = enabled;
        self
    }
}
