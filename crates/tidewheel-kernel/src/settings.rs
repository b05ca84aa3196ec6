//! Per-task settings and the provider contract that resolves them.

use crate::error::SchedulerResult;
use crate::task::BackgroundTask;

/// The schedule applied when neither a provider nor the task itself supplies
/// one: fire at every minute.
pub const DEFAULT_SCHEDULE: &str = "* * * * *";

// ---------------------------------------------------------------------------
// TaskSettings
// ---------------------------------------------------------------------------

/// An immutable settings snapshot for one background task on one tenant.
///
/// Settings are resolved on every tick from the tenant's providers, so a
/// value of this type is only ever valid for the decision it was produced
/// for. "No settings found" is expressed as `Option::<TaskSettings>::None`
/// at every API boundary.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[non_exhaustive]
pub struct TaskSettings {
    /// The task's fully-qualified type identifier.
    pub name: String,
    /// A standard 5-field cron expression (minute granularity).
    pub schedule: String,
    /// Whether the scheduler may fire this task at all.
    pub enable: bool,
    /// Human-readable title. Opaque to the scheduler.
    #[serde(default)]
    pub title: String,
    /// Human-readable description. Opaque to the scheduler.
    #[serde(default)]
    pub description: String,
}

impl TaskSettings {
    /// Construct settings with empty human metadata.
    pub fn new(name: impl Into<String>, schedule: impl Into<String>, enable: bool) -> Self {
        Self {
            name: name.into(),
            schedule: schedule.into(),
            enable,
            title: String::new(),
            description: String::new(),
        }
    }

    /// Attach a title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Attach a description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// The settings used when no provider returns a value for `task`:
    /// the task's declared default schedule, disabled.
    pub fn fallback(task: &dyn BackgroundTask) -> Self {
        Self::new(task.name(), task.default_schedule(), false)
    }
}

// ---------------------------------------------------------------------------
// SettingsProvider
// ---------------------------------------------------------------------------

/// Resolves settings for background tasks on one tenant.
///
/// Providers registered on a tenant scope are consulted in ascending
/// [`order`](SettingsProvider::order); the first one returning `Some` wins.
/// A provider failure is contained by the caller (logged and skipped), so a
/// broken provider never blocks its lower-priority peers.
#[async_trait::async_trait]
pub trait SettingsProvider: Send + Sync {
    /// Ascending priority. Lower values are consulted first.
    fn order(&self) -> i32 {
        0
    }

    /// Resolve settings for `task`, or `None` when this provider has no
    /// opinion about it.
    async fn settings(&self, task: &dyn BackgroundTask) -> SchedulerResult<Option<TaskSettings>>;
}
