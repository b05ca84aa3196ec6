//! End-to-end scheduler scenarios against the mock tenant host, driven on
//! tokio's paused clock so minutes of schedule time pass in milliseconds.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use tidewheel_foundation::TenantTaskScheduler;
use tidewheel_kernel::clock::Clock;
use tidewheel_kernel::host::{Shell, ShellState};
use tidewheel_kernel::scheduler::{SchedulerOptions, TaskScheduler};
use tidewheel_kernel::settings::TaskSettings;
use tidewheel_kernel::state::{TaskCommand, TaskStatus};
use tidewheel_testing::task::BrokenSettingsProvider;
use tidewheel_testing::{
    CountingTask, MockHost, ScriptedSettingsProvider, TaskGauge, VirtualClock, init_tracing,
};

/// All scenarios start at a minute boundary so firing instants are easy to
/// reason about.
fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap()
}

fn secs(n: i64) -> chrono::Duration {
    chrono::Duration::seconds(n)
}

struct Fixture {
    scheduler: Arc<TenantTaskScheduler>,
    clock: Arc<VirtualClock>,
    stopping: CancellationToken,
    loop_handle: tokio::task::JoinHandle<()>,
}

impl Fixture {
    fn options() -> SchedulerOptions {
        SchedulerOptions {
            polling_time: Duration::from_secs(60),
            min_idle_time: Duration::from_secs(10),
            max_parallelism: 4,
        }
    }

    fn start(host: Arc<MockHost>) -> Self {
        Self::start_with(host, Self::options())
    }

    fn start_with(host: Arc<MockHost>, options: SchedulerOptions) -> Self {
        init_tracing();
        let clock = Arc::new(VirtualClock::starting_at(epoch()));
        let scheduler = Arc::new(TenantTaskScheduler::with_clock(
            host.clone(),
            options,
            clock.clone(),
        ));
        let stopping = CancellationToken::new();
        let loop_handle = tokio::spawn(scheduler.clone().run(stopping.clone()));
        Self {
            scheduler,
            clock,
            stopping,
            loop_handle,
        }
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now_utc()
    }

    /// Poll `condition` once per virtual second until it holds; panic after
    /// `limit` of virtual time.
    async fn until(&self, limit: Duration, condition: impl Fn() -> bool) {
        let deadline = tokio::time::Instant::now() + limit;
        while !condition() {
            if tokio::time::Instant::now() >= deadline {
                panic!("condition not met within {limit:?} of virtual time");
            }
            sleep(Duration::from_secs(1)).await;
        }
    }

    async fn stop(self) {
        self.stopping.cancel();
        timeout(Duration::from_secs(120), self.loop_handle)
            .await
            .expect("control loop did not exit after cancellation")
            .unwrap();
        assert!(!self.scheduler.is_running());
    }
}

/// Register a running tenant with one counting task enabled at every minute.
fn enabled_tenant(
    host: &MockHost,
    tenant: &str,
    task_name: &str,
) -> (Arc<CountingTask>, Arc<ScriptedSettingsProvider>) {
    let task = CountingTask::new(task_name);
    let provider = ScriptedSettingsProvider::new(0);
    provider.set(TaskSettings::new(task_name, "* * * * *", true));
    host.add_tenant(
        Shell::new(tenant, ShellState::Running).with_urls(format!("{tenant}.example"), format!("/{tenant}")),
        vec![task.clone()],
        vec![provider.clone()],
    );
    (task, provider)
}

// ---------------------------------------------------------------------------
// Basic firing
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn every_minute_task_fires_once_per_minute() {
    let host = MockHost::new();
    let (task, _provider) = enabled_tenant(&host, "t1", "acme.tasks.Foo");
    let fx = Fixture::start(host);

    fx.until(Duration::from_secs(180), || task.runs() == 1).await;
    let first = fx.now();
    assert!(
        first <= epoch() + secs(70),
        "first firing too late: {first}"
    );

    let state = fx.scheduler.state("t1", "acme.tasks.Foo").await;
    assert_eq!(state.status, TaskStatus::Idle);
    assert!(state.last_error.is_none());
    assert!(state.started_utc.is_some());
    assert!(state.stopped_utc.is_some());

    fx.until(Duration::from_secs(180), || task.runs() == 2).await;
    let gap = (fx.now() - first).num_seconds();
    assert!((50..=70).contains(&gap), "unexpected firing gap: {gap}s");

    assert!(fx.scheduler.is_running());
    fx.stop().await;
}

// ---------------------------------------------------------------------------
// Disable / enable commands
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn disable_suppresses_firing_until_enable() {
    let host = MockHost::new();
    let (task, _provider) = enabled_tenant(&host, "t1", "acme.tasks.Foo");
    let fx = Fixture::start(host);

    fx.until(Duration::from_secs(180), || task.runs() == 1).await;
    fx.scheduler
        .command("t1", "acme.tasks.Foo", TaskCommand::Disable)
        .await;
    let runs_at_disable = task.runs();

    // Five polling periods: the provider keeps returning enable=true, but the
    // Disabled status pin wins.
    sleep(Duration::from_secs(310)).await;
    assert_eq!(task.runs(), runs_at_disable);
    assert_eq!(
        fx.scheduler.state("t1", "acme.tasks.Foo").await.status,
        TaskStatus::Disabled
    );

    fx.scheduler
        .command("t1", "acme.tasks.Foo", TaskCommand::Enable)
        .await;
    fx.scheduler.update().await;
    let enabled_at = fx.now();
    fx.until(Duration::from_secs(70), || task.runs() == runs_at_disable + 1)
        .await;
    assert!((fx.now() - enabled_at).num_seconds() <= 60);

    fx.stop().await;
}

// ---------------------------------------------------------------------------
// Schedule changes restart the cadence
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn schedule_change_restarts_cadence() {
    let host = MockHost::new();
    let task = CountingTask::new("acme.tasks.Foo");
    let provider = ScriptedSettingsProvider::new(0);
    provider.set(TaskSettings::new("acme.tasks.Foo", "*/5 * * * *", true));
    host.add_tenant(
        Shell::new("t1", ShellState::Running),
        vec![task.clone()],
        vec![provider.clone()],
    );
    let fx = Fixture::start(host);

    // Before the second tick, the provider switches to every-minute.
    sleep(Duration::from_secs(45)).await;
    provider.set(TaskSettings::new("acme.tasks.Foo", "* * * * *", true));

    // Without the reference-time reset the task would fire on the tick at
    // ~T0+60 (next occurrence measured from T0). With it, the next occurrence
    // is measured from the change and lands at ~T0+120.
    sleep(Duration::from_secs(45)).await;
    assert_eq!(task.runs(), 0, "cadence was not restarted on schedule change");

    fx.until(Duration::from_secs(120), || task.runs() == 1).await;
    let fired = (fx.now() - epoch()).num_seconds();
    assert!(
        (110..=140).contains(&fired),
        "expected a firing near T0+120, got T0+{fired}s"
    );

    fx.stop().await;
}

// ---------------------------------------------------------------------------
// Tenant removal prunes the registry
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn stopped_tenant_is_pruned() {
    let host = MockHost::new();
    let (task1, _p1) = enabled_tenant(&host, "t1", "acme.tasks.Foo");
    let (task2, _p2) = enabled_tenant(&host, "t2", "acme.tasks.Bar");
    let fx = Fixture::start(host.clone());

    fx.until(Duration::from_secs(180), || {
        task1.runs() >= 1 && task2.runs() >= 1
    })
    .await;

    host.set_state("t2", ShellState::Disabled);
    fx.scheduler.update().await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(90);
    while !fx.scheduler.list_states("t2").await.is_empty() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "t2 entries were not pruned"
        );
        sleep(Duration::from_secs(1)).await;
    }

    assert_eq!(
        fx.scheduler.state("t2", "acme.tasks.Bar").await.status,
        TaskStatus::Undefined
    );
    assert!(fx.scheduler.settings("t2", "acme.tasks.Bar").await.is_none());
    assert!(!fx.scheduler.list_states("t1").await.is_empty());

    // The stopped tenant no longer fires.
    let frozen = task2.runs();
    sleep(Duration::from_secs(130)).await;
    assert_eq!(task2.runs(), frozen);

    fx.stop().await;
}

// ---------------------------------------------------------------------------
// A released shell cuts the inter-tick wait short
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn released_shell_shortens_the_wait() {
    let host = MockHost::new();
    let (_task1, _p1) = enabled_tenant(&host, "t1", "acme.tasks.Foo");
    let (_task2, _p2) = enabled_tenant(&host, "t2", "acme.tasks.Bar");
    let fx = Fixture::start(host.clone());

    // First tick has passed and the loop is inside its one-minute wait,
    // beyond the min-idle floor.
    fx.until(Duration::from_secs(30), || host.scopes_entered() >= 4)
        .await;
    sleep(Duration::from_secs(15)).await;

    let scopes_before = host.scopes_entered();
    let released_at = fx.now();
    host.release("t2");

    fx.until(Duration::from_secs(10), || {
        host.scopes_entered() > scopes_before
    })
    .await;
    let reaction = (fx.now() - released_at).num_seconds();
    assert!(
        reaction <= 5,
        "expected the next tick within seconds, took {reaction}s"
    );

    fx.stop().await;
}

// ---------------------------------------------------------------------------
// Fault then recover
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn faulted_task_recovers_on_next_occurrence() {
    let host = MockHost::new();
    let task = CountingTask::failing_first("acme.tasks.Flaky", 1);
    let provider = ScriptedSettingsProvider::new(0);
    provider.set(TaskSettings::new("acme.tasks.Flaky", "* * * * *", true));
    host.add_tenant(
        Shell::new("t1", ShellState::Running),
        vec![task.clone()],
        vec![provider.clone()],
    );
    let fx = Fixture::start(host);

    fx.until(Duration::from_secs(180), || task.runs() == 1).await;
    sleep(Duration::from_secs(2)).await;
    let state = fx.scheduler.state("t1", "acme.tasks.Flaky").await;
    assert_eq!(state.status, TaskStatus::Faulted);
    let error = state.last_error.expect("fault should be recorded");
    assert!(error.contains("synthetic failure"), "unexpected error: {error}");

    // The faulted entry is still admitted at its next occurrence.
    fx.until(Duration::from_secs(180), || task.runs() == 2).await;
    sleep(Duration::from_secs(2)).await;
    let state = fx.scheduler.state("t1", "acme.tasks.Flaky").await;
    assert_eq!(state.status, TaskStatus::Idle);
    assert!(state.last_error.is_none());

    fx.stop().await;
}

// ---------------------------------------------------------------------------
// Invariants
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn a_task_never_overlaps_itself() {
    let host = MockHost::new();
    let gauge = TaskGauge::new();
    let task = CountingTask::slow("acme.tasks.Slow", Duration::from_secs(150), gauge.clone());
    let provider = ScriptedSettingsProvider::new(0);
    provider.set(TaskSettings::new("acme.tasks.Slow", "* * * * *", true));
    host.add_tenant(
        Shell::new("t1", ShellState::Running),
        vec![task.clone()],
        vec![provider.clone()],
    );
    let fx = Fixture::start(host);

    // Mid-first-run the entry reports Running.
    sleep(Duration::from_secs(90)).await;
    assert_eq!(
        fx.scheduler.state("t1", "acme.tasks.Slow").await.status,
        TaskStatus::Running
    );

    // A run outlasting its schedule interval is never re-entered.
    fx.until(Duration::from_secs(600), || task.runs() >= 2).await;
    assert_eq!(task.max_in_flight(), 1);

    fx.stop().await;
}

#[tokio::test(start_paused = true)]
async fn fan_out_respects_max_parallelism() {
    let host = MockHost::new();
    let gauge = TaskGauge::new();
    let mut tasks = Vec::new();
    for i in 1..=5 {
        let name = format!("acme.tasks.Wide{i}");
        let task = CountingTask::slow(name.clone(), Duration::from_secs(5), gauge.clone());
        let provider = ScriptedSettingsProvider::new(0);
        provider.set(TaskSettings::new(name.clone(), "* * * * *", true));
        host.add_tenant(
            Shell::new(format!("t{i}"), ShellState::Running),
            vec![task.clone()],
            vec![provider],
        );
        tasks.push(task);
    }
    let options = SchedulerOptions {
        max_parallelism: 2,
        ..Fixture::options()
    };
    let fx = Fixture::start_with(host, options);

    fx.until(Duration::from_secs(200), || {
        tasks.iter().all(|task| task.runs() >= 1)
    })
    .await;
    assert!(gauge.max() >= 1);
    assert!(
        gauge.max() <= 2,
        "parallelism cap exceeded: {} concurrent runs",
        gauge.max()
    );

    fx.stop().await;
}

#[tokio::test(start_paused = true)]
async fn tasks_within_a_tenant_run_sequentially_in_name_order() {
    let host = MockHost::new();
    let gauge = TaskGauge::new();
    let first = CountingTask::slow("acme.tasks.Alpha", Duration::from_secs(2), gauge.clone());
    let second = CountingTask::slow("acme.tasks.Beta", Duration::from_secs(2), gauge.clone());
    let provider = ScriptedSettingsProvider::new(0);
    provider.set(TaskSettings::new("acme.tasks.Alpha", "* * * * *", true));
    provider.set(TaskSettings::new("acme.tasks.Beta", "* * * * *", true));
    host.add_tenant(
        Shell::new("t1", ShellState::Running),
        // Registered out of order; the scheduler sorts by task name.
        vec![second.clone(), first.clone()],
        vec![provider],
    );
    let fx = Fixture::start(host);

    fx.until(Duration::from_secs(180), || {
        first.runs() >= 1 && second.runs() >= 1
    })
    .await;
    assert_eq!(gauge.max(), 1, "same-tenant tasks overlapped");

    let alpha = fx.scheduler.state("t1", "acme.tasks.Alpha").await;
    let beta = fx.scheduler.state("t1", "acme.tasks.Beta").await;
    assert!(
        alpha.started_utc.unwrap() < beta.started_utc.unwrap(),
        "tasks did not run in name order"
    );

    fx.stop().await;
}

#[tokio::test(start_paused = true)]
async fn a_faulting_task_does_not_block_its_siblings() {
    let host = MockHost::new();
    let flaky = CountingTask::failing_first("acme.tasks.Alpha", 100);
    let steady = CountingTask::new("acme.tasks.Beta");
    let provider = ScriptedSettingsProvider::new(0);
    provider.set(TaskSettings::new("acme.tasks.Alpha", "* * * * *", true));
    provider.set(TaskSettings::new("acme.tasks.Beta", "* * * * *", true));
    host.add_tenant(
        Shell::new("t1", ShellState::Running),
        vec![flaky.clone(), steady.clone()],
        vec![provider],
    );
    let fx = Fixture::start(host);

    // Alpha runs first in name order and faults every time; Beta is still
    // attempted in the same tick, and Alpha itself is retried every minute.
    fx.until(Duration::from_secs(300), || {
        flaky.runs() >= 2 && steady.runs() >= 2
    })
    .await;
    sleep(Duration::from_secs(2)).await;
    assert_eq!(
        fx.scheduler.state("t1", "acme.tasks.Alpha").await.status,
        TaskStatus::Faulted
    );
    assert_eq!(
        fx.scheduler.state("t1", "acme.tasks.Beta").await.status,
        TaskStatus::Idle
    );

    fx.stop().await;
}

// ---------------------------------------------------------------------------
// Ambient context, settings resolution, lifecycle
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn background_context_is_installed_per_tenant() {
    let host = MockHost::new();
    let (_task, _provider) = enabled_tenant(&host, "t1", "acme.tasks.Foo");
    let fx = Fixture::start(host.clone());

    fx.until(Duration::from_secs(30), || host.scopes_entered() >= 2)
        .await;
    let context = host.last_context("t1").expect("context should be installed");
    assert_eq!(context.tenant, "t1");
    assert_eq!(context.url_host, "t1.example");
    assert_eq!(context.url_prefix, "/t1");

    fx.stop().await;
}

#[tokio::test(start_paused = true)]
async fn providers_are_consulted_in_order_and_failures_are_contained() {
    let host = MockHost::new();
    let task = CountingTask::new("acme.tasks.Foo");
    let primary = ScriptedSettingsProvider::new(10);
    primary.set(
        TaskSettings::new("acme.tasks.Foo", "* * * * *", true).with_title("primary"),
    );
    let fallback = ScriptedSettingsProvider::new(20);
    fallback.set(
        TaskSettings::new("acme.tasks.Foo", "*/30 * * * *", true).with_title("fallback"),
    );
    host.add_tenant(
        Shell::new("t1", ShellState::Running),
        vec![task.clone()],
        vec![
            fallback,
            Arc::new(BrokenSettingsProvider { order: 0 }),
            primary,
        ],
    );
    let fx = Fixture::start(host);

    // The broken order-0 provider is skipped; the order-10 provider wins over
    // the order-20 one, so the task fires at every minute.
    fx.until(Duration::from_secs(180), || task.runs() >= 1).await;
    let settings = fx
        .scheduler
        .settings("t1", "acme.tasks.Foo")
        .await
        .expect("settings should be recorded");
    assert_eq!(settings.title, "primary");
    assert_eq!(settings.schedule, "* * * * *");

    fx.stop().await;
}

#[tokio::test(start_paused = true)]
async fn tasks_without_settings_fall_back_disabled() {
    let host = MockHost::new();
    let task = CountingTask::new("acme.tasks.Orphan");
    host.add_tenant(
        Shell::new("t1", ShellState::Running),
        vec![task.clone()],
        Vec::new(),
    );
    let fx = Fixture::start(host.clone());

    fx.until(Duration::from_secs(30), || host.scopes_entered() >= 2)
        .await;
    sleep(Duration::from_secs(130)).await;
    assert_eq!(task.runs(), 0, "a task without settings must not fire");

    let settings = fx
        .scheduler
        .settings("t1", "acme.tasks.Orphan")
        .await
        .expect("fallback settings should be recorded");
    assert!(!settings.enable);
    assert_eq!(settings.schedule, "* * * * *");
    assert_eq!(
        fx.scheduler.state("t1", "acme.tasks.Orphan").await.status,
        TaskStatus::Idle
    );

    fx.stop().await;
}

#[tokio::test(start_paused = true)]
async fn is_running_tracks_bootstrap_and_shutdown() {
    let host = MockHost::new();
    let fx = Fixture::start(host.clone());

    // No tenants: bootstrap keeps polling and the scheduler reports stopped.
    sleep(Duration::from_secs(30)).await;
    assert!(!fx.scheduler.is_running());

    let (task, _provider) = enabled_tenant(&host, "t1", "acme.tasks.Foo");
    fx.until(Duration::from_secs(30), || fx.scheduler.is_running())
        .await;
    fx.until(Duration::from_secs(180), || task.runs() >= 1).await;

    fx.stop().await;
}
