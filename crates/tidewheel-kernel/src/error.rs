//! Error types shared across the scheduler contracts.

/// All errors that can surface from scheduler operations and task execution.
///
/// Marked `#[non_exhaustive]` so that new variants can be added in future
/// minor releases without breaking callers that match exhaustively.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SchedulerError {
    /// The schedule string cannot be parsed as a cron expression.
    #[error("Invalid cron expression '{0}': {1}")]
    BadSchedule(String, String),

    /// The tenant host failed to produce a scope or shell information.
    #[error("Tenant host error: {0}")]
    Host(String),

    /// A background task reported a failure from `do_work`.
    #[error("Background task failed: {0}")]
    Task(String),

    /// Cooperative cancellation was observed. Never recorded as a fault.
    #[error("Operation cancelled")]
    Cancelled,
}

impl SchedulerError {
    /// Build a [`SchedulerError::Host`] from any displayable cause.
    pub fn host(cause: impl std::fmt::Display) -> Self {
        Self::Host(cause.to_string())
    }

    /// Build a [`SchedulerError::Task`] from any displayable cause.
    pub fn task(cause: impl std::fmt::Display) -> Self {
        Self::Task(cause.to_string())
    }

    /// Whether this error is a cancellation control event rather than a fault.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Result alias used throughout the scheduler contracts.
pub type SchedulerResult<T> = Result<T, SchedulerError>;
