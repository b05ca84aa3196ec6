//! The tenant host contract: shells, scopes, and the ambient background
//! context.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::SchedulerResult;
use crate::settings::SettingsProvider;
use crate::task::BackgroundTask;

// ---------------------------------------------------------------------------
// ShellState / Shell
// ---------------------------------------------------------------------------

/// Lifecycle state of a tenant's shell as reported by the host.
///
/// Only `Running` shells are scheduled; the other states exist so hosts can
/// report tenants that are provisioning or administratively stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ShellState {
    Running,
    Initializing,
    Disabled,
}

/// A snapshot handle to one tenant's runtime container.
///
/// The `released` flag is live: the host may flip it while the scheduler
/// still holds the snapshot, which is how mid-tick teardown is detected.
#[derive(Debug, Clone)]
pub struct Shell {
    /// Tenant identifier. Must not contain NUL (used as a key separator).
    pub tenant: String,
    /// Lifecycle state at snapshot time.
    pub state: ShellState,
    /// Host name requests for this tenant arrive on.
    pub url_host: String,
    /// URL path prefix for this tenant.
    pub url_prefix: String,
    released: Arc<AtomicBool>,
}

impl Shell {
    /// Create a shell snapshot with empty URL metadata.
    pub fn new(tenant: impl Into<String>, state: ShellState) -> Self {
        Self {
            tenant: tenant.into(),
            state,
            url_host: String::new(),
            url_prefix: String::new(),
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Attach request URL metadata.
    pub fn with_urls(mut self, url_host: impl Into<String>, url_prefix: impl Into<String>) -> Self {
        self.url_host = url_host.into();
        self.url_prefix = url_prefix.into();
        self
    }

    /// Whether the shell is in the `Running` state.
    pub fn is_running(&self) -> bool {
        self.state == ShellState::Running
    }

    /// Whether the host has started tearing this shell down.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Mark the shell as being torn down. Host side; visible through every
    /// clone of this shell.
    pub fn release(&self) {
        self.released.store(true, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// BackgroundContext
// ---------------------------------------------------------------------------

/// The ambient "background request" value installed on a scope for the
/// duration of one tenant iteration, so downstream collaborators can tell a
/// scheduler-driven call from an interactive one and know which tenant URL
/// space they are in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackgroundContext {
    pub tenant: String,
    pub url_host: String,
    pub url_prefix: String,
}

impl BackgroundContext {
    /// Build the context for one shell.
    pub fn for_shell(shell: &Shell) -> Self {
        Self {
            tenant: shell.tenant.clone(),
            url_host: shell.url_host.clone(),
            url_prefix: shell.url_prefix.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// TenantScope / TenantHost
// ---------------------------------------------------------------------------

/// A per-tenant service scope.
///
/// Scopes are short-lived: the scheduler enters one to enumerate task types,
/// and a fresh one per task invocation. Dropping the scope releases whatever
/// per-use resources the host allocated for it.
pub trait TenantScope: Send + Sync {
    /// The background task instances registered for this tenant.
    fn tasks(&self) -> Vec<Arc<dyn BackgroundTask>>;

    /// The settings providers registered for this tenant.
    fn settings_providers(&self) -> Vec<Arc<dyn SettingsProvider>>;

    /// Install the ambient background context for this scope's lifetime.
    fn install_background_context(&self, context: BackgroundContext);

    /// The installed background context, if any.
    fn background_context(&self) -> Option<BackgroundContext>;
}

/// The host the scheduler pulls tenants from.
///
/// An empty shell snapshot means "no tenants right now" and is never an
/// error; scope creation can fail, and the scheduler contains that failure
/// to the affected tenant.
#[async_trait::async_trait]
pub trait TenantHost: Send + Sync {
    /// Snapshot all shells the host currently knows about.
    fn shells(&self) -> Vec<Shell>;

    /// Enter a fresh service scope for `tenant`.
    async fn enter_scope(&self, tenant: &str) -> SchedulerResult<Box<dyn TenantScope>>;
}
