//! Splits a time range into contiguous, bounded pagination windows.
//!
//! Grounded on `original_source/.../src/backup.py`'s page-walking loop:
//! each window is half-open `(start, end]`, `days_of_pagination` days
//! wide, with the final window truncated to the overall end bound.

use chrono::{DateTime, Utc};

/// One pagination window, exclusive of `start`, inclusive of `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Splits `(t_start, t_end]` into windows of `days` days each.
///
/// `t_start` defaults to the Unix epoch and `t_end` to `now` when
/// absent, matching range mode's unbounded ends (spec.md §4.2).
#[must_use]
pub fn paginate(
    t_start: Option<DateTime<Utc>>,
    t_end: Option<DateTime<Utc>>,
    days: u32,
    now: DateTime<Utc>,
) -> Vec<Window> {
    let start = t_start.unwrap_or_else(|| DateTime::<Utc>::UNIX_EPOCH);
    let end = t_end.unwrap_or(now);
    if start >= end {
        return Vec::new();
    }
    let width = chrono::Duration::days(i64::from(days.max(1)));
    let mut windows = Vec::new();
    let mut cursor = start;
    while cursor < end {
        let next = (cursor + width).min(end);
        windows.push(Window { start: cursor, end: next });
        cursor = next;
    }
    windows
}
