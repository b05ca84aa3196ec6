//! Concurrent registry of scheduler entries.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use tidewheel_kernel::error::SchedulerError;
use tidewheel_kernel::settings::TaskSettings;
use tidewheel_kernel::state::{TaskCommand, TaskState};

use super::entry::{SchedulerEntry, TaskKey};

/// Outcome of the dispatch-decision critical section.
#[derive(Debug)]
pub enum BeginRun {
    /// The entry transitioned to `Running`; the caller owns the invocation
    /// and must report back through [`SchedulerRegistry::complete_run`].
    Started,
    /// Not due, disabled, already running, or without settings.
    Skipped,
    /// The schedule failed to parse; the entry has been faulted.
    BadSchedule(SchedulerError),
}

/// A cloned view of one entry, for bulk snapshots.
#[derive(Debug, Clone)]
pub struct EntrySnapshot {
    pub key: TaskKey,
    pub settings: Option<TaskSettings>,
    pub state: TaskState,
}

/// Concurrent map from composed `(tenant, task)` keys to scheduler entries.
///
/// All mutation happens under the owning shard's lock, which makes every
/// operation linearisable per key; guards are never held across an `.await`.
/// Reads hand out clones of settings and state, never references into the
/// map.
pub struct SchedulerRegistry {
    entries: DashMap<String, SchedulerEntry>,
}

impl SchedulerRegistry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Ensure an entry exists for `key`, anchoring a new one's cadence at
    /// `reference_time`.
    pub fn get_or_create(&self, key: &TaskKey, reference_time: DateTime<Utc>) {
        self.entries
            .entry(key.compose())
            .or_insert_with(|| SchedulerEntry::new(key.clone(), reference_time));
    }

    /// Remove one entry.
    pub fn remove(&self, key: &TaskKey) {
        self.entries.remove(&key.compose());
    }

    /// Cloned settings of one entry.
    pub fn settings(&self, tenant: &str, task_name: &str) -> Option<TaskSettings> {
        self.entries
            .get(&TaskKey::new(tenant, task_name).compose())
            .and_then(|entry| entry.settings().cloned())
    }

    /// Cloned state of one entry.
    pub fn state(&self, tenant: &str, task_name: &str) -> Option<TaskState> {
        self.entries
            .get(&TaskKey::new(tenant, task_name).compose())
            .map(|entry| entry.state().clone())
    }

    /// Cloned settings of every entry on `tenant`.
    pub fn settings_by_tenant(&self, tenant: &str) -> Vec<TaskSettings> {
        // `.value()` everywhere: dashmap's guards carry their own `key()`,
        // which would otherwise shadow `SchedulerEntry::key` through deref.
        self.entries
            .iter()
            .filter(|entry| entry.value().key().tenant == tenant)
            .filter_map(|entry| entry.value().settings().cloned())
            .collect()
    }

    /// Cloned states of every entry on `tenant`.
    pub fn states_by_tenant(&self, tenant: &str) -> Vec<TaskState> {
        self.entries
            .iter()
            .filter(|entry| entry.value().key().tenant == tenant)
            .map(|entry| entry.value().state().clone())
            .collect()
    }

    /// Cloned snapshot of every entry.
    pub fn snapshot_all(&self) -> Vec<EntrySnapshot> {
        self.entries
            .iter()
            .map(|entry| EntrySnapshot {
                key: entry.value().key().clone(),
                settings: entry.value().settings().cloned(),
                state: entry.value().state().clone(),
            })
            .collect()
    }

    /// Apply an operator command. Commands against unknown keys are ignored.
    pub fn command(&self, tenant: &str, task_name: &str, command: TaskCommand, now: DateTime<Utc>) {
        if let Some(mut entry) = self
            .entries
            .get_mut(&TaskKey::new(tenant, task_name).compose())
        {
            entry.command(command, now);
        }
    }

    /// The dispatch decision for one entry, in a single critical section:
    /// adopt the resolved settings, evaluate `can_run`, and, when due,
    /// transition to `Running` before the lock drops. This is what guarantees
    /// a `(tenant, task)` never has two invocations in flight.
    pub fn try_start(&self, key: &TaskKey, settings: TaskSettings, now: DateTime<Utc>) -> BeginRun {
        let Some(mut entry) = self.entries.get_mut(&key.compose()) else {
            return BeginRun::Skipped;
        };
        entry.apply_settings(settings, now);
        match entry.can_run(now) {
            Ok(true) => {
                entry.run(now);
                BeginRun::Started
            }
            Ok(false) => BeginRun::Skipped,
            Err(err) => BeginRun::BadSchedule(err),
        }
    }

    /// Record the outcome of an invocation started by
    /// [`try_start`](Self::try_start).
    pub fn complete_run(&self, key: &TaskKey, now: DateTime<Utc>, error: Option<String>) {
        if let Some(mut entry) = self.entries.get_mut(&key.compose()) {
            match error {
                None => entry.idle(now),
                Some(message) => entry.fault(now, message),
            }
        }
    }

    /// Drop every entry whose tenant is not in `tenants`.
    pub fn prune_keeping(&self, tenants: &HashSet<String>) {
        self.entries
            .retain(|_, entry| tenants.contains(&entry.key().tenant));
    }

    /// Drop `tenant`'s entries whose task is not in `task_names`.
    pub fn prune_tenant_keeping(&self, tenant: &str, task_names: &HashSet<String>) {
        self.entries.retain(|_, entry| {
            entry.key().tenant != tenant || task_names.contains(&entry.key().task_name)
        });
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for SchedulerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
