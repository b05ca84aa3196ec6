//! Scheduler options and the public management API trait.

use std::time::Duration;

use crate::settings::TaskSettings;
use crate::state::{TaskCommand, TaskState};

// ---------------------------------------------------------------------------
// SchedulerOptions
// ---------------------------------------------------------------------------

/// Tuning knobs for the control loop.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SchedulerOptions {
    /// Maximum wait between two ticks.
    pub polling_time: Duration,
    /// Minimum wait between two ticks; also the bootstrap poll interval.
    pub min_idle_time: Duration,
    /// Upper bound on tenants processed in parallel within one tick.
    pub max_parallelism: usize,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            polling_time: Duration::from_secs(60),
            min_idle_time: Duration::from_secs(10),
            max_parallelism: default_parallelism(),
        }
    }
}

impl SchedulerOptions {
    /// Replace zero values with usable ones, warning about each correction.
    /// A zero `max_parallelism` would deadlock the fan-out; a zero
    /// `min_idle_time` turns the inter-tick wait into a busy spin.
    pub fn normalized(mut self) -> Self {
        if self.max_parallelism == 0 {
            tracing::warn!("max_parallelism of 0 corrected to 1");
            self.max_parallelism = 1;
        }
        if self.min_idle_time.is_zero() {
            tracing::warn!("min_idle_time of 0 corrected to 1s");
            self.min_idle_time = Duration::from_secs(1);
        }
        if self.polling_time < self.min_idle_time {
            tracing::warn!("polling_time below min_idle_time corrected to match");
            self.polling_time = self.min_idle_time;
        }
        self
    }
}

/// Logical CPU count, capped at 8.
fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(8)
}

// ---------------------------------------------------------------------------
// TaskScheduler trait
// ---------------------------------------------------------------------------

/// The management surface of a running scheduler.
///
/// Every method is safe to call concurrently with the control loop; reads
/// return clones of internal records, never references into them. This trait
/// is defined in the kernel so administration UIs and CLIs can depend on the
/// contract without pulling in the foundation implementation.
#[async_trait::async_trait]
pub trait TaskScheduler: Send + Sync {
    /// Whether the control loop has finished bootstrapping and is ticking.
    fn is_running(&self) -> bool;

    /// Raise the update signal: the loop leaves its inter-tick wait early.
    /// Returns immediately.
    async fn update(&self);

    /// Apply a command to the `(tenant, task_name)` entry. Commands against
    /// entries that do not exist are ignored.
    async fn command(&self, tenant: &str, task_name: &str, command: TaskCommand);

    /// The current settings of one entry, or `None` when the entry does not
    /// exist or has no settings yet.
    async fn settings(&self, tenant: &str, task_name: &str) -> Option<TaskSettings>;

    /// The settings of every entry on `tenant`.
    async fn list_settings(&self, tenant: &str) -> Vec<TaskSettings>;

    /// The state of one entry. `TaskStatus::Undefined` when the entry does
    /// not exist.
    async fn state(&self, tenant: &str, task_name: &str) -> TaskState;

    /// The states of every entry on `tenant`.
    async fn list_states(&self, tenant: &str) -> Vec<TaskState>;
}
