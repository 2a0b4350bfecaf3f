//! Date-window planning for backfill and incremental runs.
//!
//! The upstream listing endpoint filters by validity start date, and large
//! ranges must be chunked to keep individual queries small. Windows are
//! closed-inclusive on both ends.

use std::fmt;

use chrono::{Days, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A closed-inclusive date window `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchWindow {
    /// First day covered
    pub start: NaiveDate,
    /// Last day covered, inclusive
    pub end: NaiveDate,
}

impl FetchWindow {
    /// Create a window. `start` must not exceed `end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// Number of days covered, inclusive of both ends.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

impl fmt::Display for FetchWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.start, self.end)
    }
}

/// Partition `[start, end]` into consecutive quarterly windows.
///
/// Each window spans `[s, s + 3 months - 1 day]`, with the final window
/// clipped to `end`. The partition is deterministic, gap-free, overlap-free,
/// and covers the full range. An inverted range yields no windows.
pub fn quarterly_chunks(start: NaiveDate, end: NaiveDate) -> Vec<FetchWindow> {
    let mut windows = Vec::new();
    let mut cursor = start;

    while cursor <= end {
        let next_quarter = cursor
            .checked_add_months(Months::new(3))
            .and_then(|d| d.checked_sub_days(Days::new(1)));

        let window_end = match next_quarter {
            Some(date) => date.min(end),
            // Date arithmetic overflow only happens near the calendar
            // limits; clip to the requested end.
            None => end,
        };

        windows.push(FetchWindow::new(cursor, window_end));

        cursor = match window_end.checked_add_days(Days::new(1)) {
            Some(date) => date,
            None => break,
        };
    }

    windows
}

/// Window for an incremental run: `[last_sync - lookback_days, today]`.
///
/// The lookback deliberately re-fetches recent days so late source updates
/// are caught; the overlap is harmless because persistence is an idempotent
/// upsert.
pub fn incremental_window(last_sync: NaiveDate, lookback_days: u32) -> FetchWindow {
    let start = last_sync
        .checked_sub_days(Days::new(u64::from(lookback_days)))
        .unwrap_or(last_sync);
    let today = Utc::now().date_naive();
    FetchWindow::new(start, today.max(start))
}
