//! Multi-tenant background task scheduling.
//!
//! This module provides `TenantTaskScheduler`, the concrete implementation of
//! the `TaskScheduler` trait from `tidewheel-kernel`. It continuously drives
//! every `(tenant, task)` pair the tenant host exposes, firing each task when
//! its cron schedule next elapses.
//!
//! # Architecture
//!
//! One long-lived control loop rebuilds a tenant view on each tick, prunes
//! the entry registry to what still exists, and fans out over the running
//! shells with semaphore-bounded parallelism. Within a shell, tasks run
//! sequentially in task-name order so two tasks of the same tenant never
//! collide in that tenant's service scope; across shells a long-running task
//! only ever blocks its own tenant.
//!
//! # Signals
//!
//! - **Stop**: the `CancellationToken` handed to [`TenantTaskScheduler::run`].
//!   Tasks receive it and are expected to honour it; the loop drains and
//!   exits.
//! - **Update**: a child token of stop, raised by [`TaskScheduler::update`]
//!   or by the inter-tick poll noticing a released shell or a changed tenant
//!   count. It cuts the inter-tick wait short (down to the min-idle floor)
//!   without cancelling in-flight work, and is replaced with a fresh child
//!   once consumed.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;

use tidewheel_kernel::clock::{Clock, SystemClock};
use tidewheel_kernel::error::SchedulerError;
use tidewheel_kernel::host::{BackgroundContext, Shell, TenantHost, TenantScope};
use tidewheel_kernel::scheduler::{SchedulerOptions, TaskScheduler};
use tidewheel_kernel::settings::TaskSettings;
use tidewheel_kernel::state::{TaskCommand, TaskState};
use tidewheel_kernel::task::BackgroundTask;

pub mod cron;
pub mod entry;
pub mod registry;
pub mod view;

use entry::TaskKey;
use registry::{BeginRun, SchedulerRegistry};
use view::TenantView;

// ============================================================================
// TenantTaskScheduler
// ============================================================================

/// Drives the background tasks of every running tenant against their cron
/// schedules.
///
/// # Example
///
/// ```rust,ignore
/// use tidewheel_foundation::TenantTaskScheduler;
/// use tidewheel_kernel::{SchedulerOptions, TaskScheduler};
/// use tokio_util::sync::CancellationToken;
///
/// let scheduler = Arc::new(TenantTaskScheduler::new(host, SchedulerOptions::default()));
/// let stopping = CancellationToken::new();
/// tokio::spawn(scheduler.clone().run(stopping.clone()));
///
/// // Later, from an admin surface:
/// scheduler.update().await;
/// let states = scheduler.list_states("acme").await;
/// ```
pub struct TenantTaskScheduler {
    /// Source of shells and per-tenant scopes.
    host: Arc<dyn TenantHost>,
    /// Normalized tuning knobs.
    options: SchedulerOptions,
    /// Clock for time operations (injectable for testing).
    clock: Arc<dyn Clock>,
    /// Entry registry: the only cross-task mutable state.
    registry: SchedulerRegistry,
    /// Set once bootstrap sees a running tenant; cleared when the loop exits.
    running: AtomicBool,
    /// Current update token, a child of the stop token. Swapped under this
    /// lock after each consumed signal.
    update: Mutex<CancellationToken>,
}

impl TenantTaskScheduler {
    /// Create a scheduler over `host` with the system clock.
    pub fn new(host: Arc<dyn TenantHost>, options: SchedulerOptions) -> Self {
        Self::with_clock(host, options, Arc::new(SystemClock))
    }

    /// Create a scheduler with a custom clock (primarily for testing).
    pub fn with_clock(
        host: Arc<dyn TenantHost>,
        options: SchedulerOptions,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            host,
            options: options.normalized(),
            clock,
            registry: SchedulerRegistry::new(),
            running: AtomicBool::new(false),
            update: Mutex::new(CancellationToken::new()),
        }
    }

    /// Run the control loop until `stopping` fires.
    ///
    /// Intended to be spawned: `tokio::spawn(scheduler.clone().run(token))`.
    pub async fn run(self: Arc<Self>, stopping: CancellationToken) {
        {
            let stopping = stopping.clone();
            tokio::spawn(async move {
                stopping.cancelled().await;
                tracing::info!("Background task scheduler is stopping");
            });
        }

        if !self.bootstrap(&stopping).await {
            return;
        }
        self.running.store(true, Ordering::Release);
        tracing::info!("Background task scheduler started");

        *self.update.lock() = stopping.child_token();

        let mut tick_start = self.clock.now_utc();
        while !stopping.is_cancelled() {
            let view = TenantView::capture(self.host.as_ref());
            self.registry.prune_keeping(view.tenants());

            self.fan_out(&view, tick_start, &stopping).await;

            tick_start = self.clock.now_utc();
            let linked = self.update.lock().clone();
            self.wait_between_ticks(&view, &linked, &stopping).await;

            {
                // Swap in a fresh update token once the signal is consumed.
                // An update raised during the swap is served by the tick that
                // starts immediately after it.
                let mut update = self.update.lock();
                if update.is_cancelled() && !stopping.is_cancelled() {
                    *update = stopping.child_token();
                }
            }
        }

        self.running.store(false, Ordering::Release);
    }

    /// Raise the update signal.
    fn request_update(&self) {
        self.update.lock().cancel();
    }
}

// ============================================================================
// Control loop internals
// ============================================================================

impl TenantTaskScheduler {
    /// Poll at the min-idle interval until the host reports at least one
    /// running tenant. Returns `false` when cancelled first.
    async fn bootstrap(&self, stopping: &CancellationToken) -> bool {
        loop {
            if stopping.is_cancelled() {
                return false;
            }
            if self.host.shells().iter().any(|shell| shell.is_running()) {
                return true;
            }
            tokio::select! {
                _ = stopping.cancelled() => return false,
                _ = sleep(self.options.min_idle_time) => {}
            }
        }
    }

    /// Process every shell of the tick with bounded parallelism. Waits for
    /// all of them; a tick never overlaps the next one.
    async fn fan_out(
        self: &Arc<Self>,
        view: &TenantView,
        tick_start: DateTime<Utc>,
        stopping: &CancellationToken,
    ) {
        let semaphore = Arc::new(Semaphore::new(self.options.max_parallelism));
        let mut handles = Vec::with_capacity(view.shells().len());
        for shell in view.shells() {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let this = Arc::clone(self);
            let shell = shell.clone();
            let stopping = stopping.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                this.process_shell(shell, tick_start, stopping).await;
            }));
        }
        join_all(handles).await;
    }

    /// One tenant's share of a tick: discover tasks, prune the tenant's
    /// entries to them, then attempt each task in name order.
    async fn process_shell(
        &self,
        shell: Shell,
        tick_start: DateTime<Utc>,
        stopping: CancellationToken,
    ) {
        if shell.is_released() || stopping.is_cancelled() {
            return;
        }
        let tenant = shell.tenant.clone();

        let task_names = match self.host.enter_scope(&tenant).await {
            Ok(scope) => {
                scope.install_background_context(BackgroundContext::for_shell(&shell));
                let mut names: Vec<String> = scope
                    .tasks()
                    .iter()
                    .map(|task| task.name().to_string())
                    .collect();
                names.sort();
                names
            }
            Err(err) => {
                tracing::error!("Failed to enter a scope on tenant {}: {}", tenant, err);
                return;
            }
        };

        let valid: HashSet<String> = task_names.iter().cloned().collect();
        self.registry.prune_tenant_keeping(&tenant, &valid);

        for task_name in task_names {
            if stopping.is_cancelled() {
                return;
            }
            self.process_task(&shell, &task_name, tick_start, &stopping)
                .await;
        }
    }

    /// Attempt one task: resolve it in a fresh scope, adopt its settings,
    /// and invoke it if due. Failures are contained here; a fault on this
    /// task never reaches its siblings.
    async fn process_task(
        &self,
        shell: &Shell,
        task_name: &str,
        tick_start: DateTime<Utc>,
        stopping: &CancellationToken,
    ) {
        let tenant = &shell.tenant;
        let scope = match self.host.enter_scope(tenant).await {
            Ok(scope) => scope,
            Err(err) => {
                tracing::error!("Failed to enter a scope on tenant {}: {}", tenant, err);
                return;
            }
        };
        scope.install_background_context(BackgroundContext::for_shell(shell));

        let Some(task) = scope
            .tasks()
            .into_iter()
            .find(|task| task.name() == task_name)
        else {
            return;
        };

        let key = TaskKey::new(tenant.clone(), task_name);
        self.registry.get_or_create(&key, tick_start);

        let settings = self.resolve_settings(scope.as_ref(), task.as_ref(), stopping).await;
        let now = self.clock.now_utc();

        match self.registry.try_start(&key, settings, now) {
            BeginRun::Skipped => {}
            BeginRun::BadSchedule(err) => {
                tracing::error!(
                    "Invalid schedule for background task {} on tenant {}: {}",
                    task_name,
                    tenant,
                    err
                );
            }
            BeginRun::Started => {
                tracing::info!(
                    "Start processing background task {} on tenant {}",
                    task_name,
                    tenant
                );
                let result = task.do_work(scope.as_ref(), stopping.clone()).await;
                let now = self.clock.now_utc();
                match result {
                    Ok(()) => {
                        self.registry.complete_run(&key, now, None);
                        tracing::info!(
                            "Finished processing background task {} on tenant {}",
                            task_name,
                            tenant
                        );
                    }
                    Err(SchedulerError::Cancelled) => {
                        // A cancelled run is drained, not recorded as a fault.
                        self.registry.complete_run(&key, now, None);
                        tracing::debug!(
                            "Background task {} on tenant {} cancelled",
                            task_name,
                            tenant
                        );
                    }
                    Err(err) => {
                        self.registry.complete_run(&key, now, Some(err.to_string()));
                        tracing::error!(
                            "Error while processing background task {} on tenant {}: {}",
                            task_name,
                            tenant,
                            err
                        );
                    }
                }
            }
        }
    }

    /// Resolve settings through the scope's providers in ascending order;
    /// the first `Some` wins. Falls back to the task's default schedule,
    /// disabled. A failing provider is skipped, not fatal.
    async fn resolve_settings(
        &self,
        scope: &dyn TenantScope,
        task: &dyn BackgroundTask,
        stopping: &CancellationToken,
    ) -> TaskSettings {
        let mut providers = scope.settings_providers();
        providers.sort_by_key(|provider| provider.order());
        for provider in providers {
            if stopping.is_cancelled() {
                break;
            }
            match provider.settings(task).await {
                Ok(Some(settings)) => return settings,
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(
                        "Settings provider failed for background task {}: {}",
                        task.name(),
                        err
                    );
                }
            }
        }
        TaskSettings::fallback(task)
    }

    /// The inter-tick wait: both `polling_time` and a fresh `min_idle_time`
    /// must elapse, polled once per second. The update signal (or a shell
    /// change noticed during a poll) shortens the wait to the min-idle
    /// floor. Cancellation of the linked token is a control event here,
    /// never an error.
    async fn wait_between_ticks(
        &self,
        view: &TenantView,
        linked: &CancellationToken,
        stopping: &CancellationToken,
    ) {
        let wait_started = Instant::now();
        let poll = Duration::from_secs(1);
        loop {
            if stopping.is_cancelled() {
                return;
            }
            if linked.is_cancelled() {
                // Update already requested; only the min-idle floor remains.
                sleep(poll).await;
            } else {
                tokio::select! {
                    _ = linked.cancelled() => {}
                    _ = sleep(poll) => {}
                }
            }
            if view.changed_since(self.host.as_ref()) {
                self.request_update();
            }
            let elapsed = wait_started.elapsed();
            if elapsed >= self.options.min_idle_time
                && (elapsed >= self.options.polling_time || linked.is_cancelled())
            {
                return;
            }
        }
    }
}

// ============================================================================
// TaskScheduler trait implementation
// ============================================================================

#[async_trait::async_trait]
impl TaskScheduler for TenantTaskScheduler {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    async fn update(&self) {
        self.request_update();
    }

    async fn command(&self, tenant: &str, task_name: &str, command: TaskCommand) {
        self.registry
            .command(tenant, task_name, command, self.clock.now_utc());
    }

    async fn settings(&self, tenant: &str, task_name: &str) -> Option<TaskSettings> {
        self.registry.settings(tenant, task_name)
    }

    async fn list_settings(&self, tenant: &str) -> Vec<TaskSettings> {
        self.registry.settings_by_tenant(tenant)
    }

    async fn state(&self, tenant: &str, task_name: &str) -> TaskState {
        self.registry.state(tenant, task_name).unwrap_or_default()
    }

    async fn list_states(&self, tenant: &str) -> Vec<TaskState> {
        self.registry.states_by_tenant(tenant)
    }
}

// ============================================================================
// Tests
// ============================================================================
