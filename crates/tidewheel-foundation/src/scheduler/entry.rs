//! Per-(tenant, task) scheduler bookkeeping: key composition and the entry
//! state machine.

use chrono::{DateTime, Utc};

use tidewheel_kernel::error::SchedulerError;
use tidewheel_kernel::settings::TaskSettings;
use tidewheel_kernel::state::{TaskCommand, TaskState, TaskStatus};

use super::cron;

// ---------------------------------------------------------------------------
// TaskKey
// ---------------------------------------------------------------------------

/// Separator for composed registry keys. Tenant names and task type names
/// cannot contain NUL, so composed keys never collide on shared prefixes.
pub const KEY_SEPARATOR: char = '\u{0}';

/// Identity of one scheduler entry: `(tenant, task type name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskKey {
    pub tenant: String,
    pub task_name: String,
}

impl TaskKey {
    pub fn new(tenant: impl Into<String>, task_name: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            task_name: task_name.into(),
        }
    }

    /// The registry's canonical string form.
    pub fn compose(&self) -> String {
        let mut key = String::with_capacity(self.tenant.len() + self.task_name.len() + 1);
        key.push_str(&self.tenant);
        key.push(KEY_SEPARATOR);
        key.push_str(&self.task_name);
        key
    }
}

impl std::fmt::Display for TaskKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.tenant, self.task_name)
    }
}

// ---------------------------------------------------------------------------
// SchedulerEntry
// ---------------------------------------------------------------------------

/// The scheduler's bookkeeping record for one `(tenant, task)` pair.
///
/// A pure state machine over explicit `now` instants: every transition takes
/// the caller's clock reading, so the whole lifecycle unit-tests without a
/// runtime. Concurrency is the registry's problem; an entry assumes it is
/// mutated from one logical critical section at a time.
pub struct SchedulerEntry {
    key: TaskKey,
    reference_time: DateTime<Utc>,
    settings: Option<TaskSettings>,
    state: TaskState,
}

impl SchedulerEntry {
    /// A freshly observed entry: no settings, `Undefined`, cadence anchored
    /// at `reference_time` (the start of the tick that first saw it).
    pub fn new(key: TaskKey, reference_time: DateTime<Utc>) -> Self {
        Self {
            key,
            reference_time,
            settings: None,
            state: TaskState::default(),
        }
    }

    pub fn key(&self) -> &TaskKey {
        &self.key
    }

    pub fn reference_time(&self) -> DateTime<Utc> {
        self.reference_time
    }

    pub fn settings(&self) -> Option<&TaskSettings> {
        self.settings.as_ref()
    }

    pub fn state(&self) -> &TaskState {
        &self.state
    }

    /// Adopt a new settings snapshot. A schedule change restarts the cadence
    /// from `now`; the first snapshot moves the entry out of `Undefined`.
    pub fn apply_settings(&mut self, new: TaskSettings, now: DateTime<Utc>) {
        if let Some(current) = &self.settings {
            if current.schedule != new.schedule {
                self.reference_time = now;
            }
        }
        if self.state.status == TaskStatus::Undefined {
            self.state.status = TaskStatus::Idle;
        }
        self.settings = Some(new);
    }

    /// Whether the task is due: enabled, startable, and past the next
    /// occurrence of its schedule measured from the reference time.
    ///
    /// Recomputes and stores `next_start_utc` as a side effect. An
    /// unparseable schedule faults the entry and reports not-due; the entry
    /// stays in that state until a settings change supplies a schedule that
    /// parses.
    pub fn can_run(&mut self, now: DateTime<Utc>) -> Result<bool, SchedulerError> {
        let Some(settings) = &self.settings else {
            return Ok(false);
        };
        if !settings.enable || !self.state.status.is_startable() {
            return Ok(false);
        }
        match cron::next_occurrence(&settings.schedule, self.reference_time) {
            Ok(next) => {
                self.state.next_start_utc = Some(next);
                Ok(now >= next)
            }
            Err(err) => {
                self.fault(now, err.to_string());
                Err(err)
            }
        }
    }

    /// Begin an invocation: `Running`, stamp the start, and restart the
    /// cadence so the next occurrence is measured from this firing.
    pub fn run(&mut self, now: DateTime<Utc>) {
        self.state.status = TaskStatus::Running;
        self.state.started_utc = Some(now);
        self.reference_time = now;
    }

    /// Complete an invocation successfully.
    pub fn idle(&mut self, now: DateTime<Utc>) {
        self.state.status = TaskStatus::Idle;
        self.state.stopped_utc = Some(now);
        self.state.last_error = None;
    }

    /// Complete an invocation with a fault.
    pub fn fault(&mut self, now: DateTime<Utc>, error: impl Into<String>) {
        self.state.status = TaskStatus::Faulted;
        self.state.stopped_utc = Some(now);
        self.state.last_error = Some(error.into());
    }

    /// Apply an operator command synchronously.
    pub fn command(&mut self, command: TaskCommand, now: DateTime<Utc>) {
        match command {
            TaskCommand::Enable => {
                if let Some(settings) = &mut self.settings {
                    settings.enable = true;
                }
                if self.state.status == TaskStatus::Disabled {
                    self.state.status = TaskStatus::Idle;
                }
            }
            TaskCommand::Disable => {
                if let Some(settings) = &mut self.settings {
                    settings.enable = false;
                }
                self.state.status = TaskStatus::Disabled;
            }
            TaskCommand::ResetState => {
                self.state.status = TaskStatus::Idle;
                self.state.last_error = None;
                self.reference_time = now;
            }
        }
    }
}
