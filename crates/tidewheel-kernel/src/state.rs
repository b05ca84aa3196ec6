//! Per-task runtime state, status machine vocabulary, and commands.

use chrono::{DateTime, Utc};

// ---------------------------------------------------------------------------
// TaskStatus
// ---------------------------------------------------------------------------

/// The lifecycle status of one `(tenant, task)` scheduler entry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize,
)]
pub enum TaskStatus {
    /// Ready; will fire at the next matching occurrence if enabled.
    Idle,
    /// A `do_work` invocation is in flight for this entry.
    Running,
    /// The last invocation (or schedule evaluation) failed. Still eligible
    /// to fire at the next occurrence.
    Faulted,
    /// Suppressed by an explicit disable command until re-enabled.
    Disabled,
    /// Observed, but no settings have been applied yet.
    #[default]
    Undefined,
}

impl TaskStatus {
    /// Whether the scheduler may start an invocation from this status.
    pub fn is_startable(&self) -> bool {
        matches!(self, Self::Idle | Self::Faulted)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Running => write!(f, "Running"),
            Self::Faulted => write!(f, "Faulted"),
            Self::Disabled => write!(f, "Disabled"),
            Self::Undefined => write!(f, "Undefined"),
        }
    }
}

// ---------------------------------------------------------------------------
// TaskState
// ---------------------------------------------------------------------------

/// A point-in-time snapshot of one entry's runtime state.
///
/// Returned by the management API for monitoring dashboards; external callers
/// only ever see clones of the scheduler's internal record.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TaskState {
    /// Current lifecycle status. `Undefined` for entries never observed.
    pub status: TaskStatus,
    /// When the most recent invocation started.
    pub started_utc: Option<DateTime<Utc>>,
    /// When the most recent invocation stopped (successfully or not).
    pub stopped_utc: Option<DateTime<Utc>>,
    /// Message of the last fault, cleared on the next successful run.
    pub last_error: Option<String>,
    /// The next planned firing instant, derived from the schedule and the
    /// entry's reference time.
    pub next_start_utc: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// TaskCommand
// ---------------------------------------------------------------------------

/// Operator commands applied synchronously against a scheduler entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TaskCommand {
    /// Set `enable` and leave the `Disabled` status.
    Enable,
    /// Clear `enable` and pin the status to `Disabled` until re-enabled.
    Disable,
    /// Return to `Idle`, clear the last fault, and restart the cadence from
    /// now.
    ResetState,
}
