//! Cron expression evaluation.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use tidewheel_kernel::error::SchedulerError;

/// Compute the earliest instant strictly after `after` matching `expr`, in
/// UTC.
///
/// `expr` is a standard 5-field expression (minute, hour, day-of-month,
/// month, day-of-week). The `cron` crate expects a leading seconds field, so
/// 5-field input gains a `0` seconds column before parsing; other field
/// counts are handed through unchanged and the parser decides.
///
/// No parsed schedule is cached: callers re-parse per decision, so a settings
/// change takes effect on the very next evaluation.
pub fn next_occurrence(expr: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>, SchedulerError> {
    let schedule = parse(expr)?;
    schedule
        .after(&after)
        .next()
        .ok_or_else(|| bad_schedule(expr, "no upcoming occurrence"))
}

/// Validate an expression without evaluating it.
pub fn validate(expr: &str) -> Result<(), SchedulerError> {
    parse(expr).map(|_| ())
}

fn parse(expr: &str) -> Result<Schedule, SchedulerError> {
    let trimmed = expr.trim();
    let full;
    let candidate = if trimmed.split_whitespace().count() == 5 {
        full = format!("0 {trimmed}");
        full.as_str()
    } else {
        trimmed
    };
    Schedule::from_str(candidate).map_err(|e| bad_schedule(expr, e))
}

fn bad_schedule(expr: &str, reason: impl std::fmt::Display) -> SchedulerError {
    SchedulerError::BadSchedule(expr.to_string(), reason.to_string())
}
