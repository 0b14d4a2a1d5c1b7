// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Shared helpers for date/time formatting and date lists.

use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, Utc};

/// Format a UTC timestamp as RFC3339 using a `Z` suffix.
///
/// Fixed width, so stored values sort lexicographically.
pub fn format_utc_rfc3339(date: DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse a stored RFC3339 timestamp back into UTC.
pub fn parse_utc_rfc3339(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse a `YYYY-MM-DD` calendar date.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
}

/// Every date from `end` back to `start`, newest first.
pub fn dates_descending(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    if start > end {
        return Vec::new();
    }
    let mut dates = Vec::new();
    let mut current = end;
    while current >= start {
        dates.push(current);
        current -= Duration::days(1);
    }
    dates
}

/// The `days` dates ending yesterday (relative to `today`), newest first.
pub fn last_days(today: NaiveDate, days: u32) -> Vec<NaiveDate> {
    if days == 0 {
        return Vec::new();
    }
    let end = today - Duration::days(1);
    let start = end - Duration::days(i64::from(days) - 1);
    dates_descending(start, end)
}
