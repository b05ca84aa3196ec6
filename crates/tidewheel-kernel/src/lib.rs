//! Tidewheel kernel: contracts for multi-tenant background task scheduling.
//!
//! This crate defines the complete contract surface: the tenant host and
//! scope capabilities, the background task and settings-provider traits, the
//! per-task state and command types, and the management API trait. Concrete
//! implementations (the cron evaluator, the registry, the control loop) live
//! in `tidewheel-foundation`. The kernel must never depend on foundation, and
//! deliberately has no dependency on the `cron` crate; schedule strings are
//! opaque here and validated where they are evaluated.

// clock module
pub mod clock;
pub use clock::{Clock, SystemClock};

// error module
pub mod error;
pub use error::{SchedulerError, SchedulerResult};

// settings module
pub mod settings;
pub use settings::{DEFAULT_SCHEDULE, SettingsProvider, TaskSettings};

// state module
pub mod state;
pub use state::{TaskCommand, TaskState, TaskStatus};

// task module
pub mod task;
pub use task::BackgroundTask;

// host module
pub mod host;
pub use host::{BackgroundContext, Shell, ShellState, TenantHost, TenantScope};

// scheduler module
pub mod scheduler;
pub use scheduler::{SchedulerOptions, TaskScheduler};
