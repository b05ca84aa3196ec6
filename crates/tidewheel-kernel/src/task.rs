//! The background task contract.

use tokio_util::sync::CancellationToken;

use crate::error::SchedulerResult;
use crate::host::TenantScope;
use crate::settings::DEFAULT_SCHEDULE;

/// A unit of recurring work, identified by its implementation's
/// fully-qualified type name and executed by the scheduler inside a tenant
/// scope.
///
/// Implementations must observe `stopping`: a long-running task that ignores
/// it delays process shutdown for everyone. A task may fail; the scheduler
/// contains the fault, records it on the entry, and retries at the next
/// occurrence.
#[async_trait::async_trait]
pub trait BackgroundTask: Send + Sync {
    /// The task's fully-qualified type identifier, unique within a tenant.
    /// `std::any::type_name::<Self>()` is the conventional value.
    fn name(&self) -> &str;

    /// The schedule used when no settings provider supplies one.
    fn default_schedule(&self) -> &str {
        DEFAULT_SCHEDULE
    }

    /// Perform one run. `scope` is a fresh service scope for this invocation,
    /// carrying the tenant's background context.
    async fn do_work(
        &self,
        scope: &dyn TenantScope,
        stopping: CancellationToken,
    ) -> SchedulerResult<()>;
}
