//! Timestamp utilities

use crate::{Error, Result};
use chrono::{DateTime, Datelike, SecondsFormat, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Calendar month key (`YYYY-MM`) used for monthly usage windows
///
/// Matches SQLite's `strftime('%Y-%m', ...)` so the same key can be compared
/// inside a single SQL statement.
pub fn month_key(timestamp: &DateTime<Utc>) -> String {
    timestamp.format("%Y-%m").to_string()
}

/// True when `later` falls in a different calendar month (or year) than `earlier`
pub fn is_new_month(earlier: &DateTime<Utc>, later: &DateTime<Utc>) -> bool {
    (earlier.year(), earlier.month()) != (later.year(), later.month())
}

/// Format a timestamp for TEXT columns (`2025-03-09T17:45:00.000Z`)
///
/// Fixed width and UTC, so SQLite `strftime`/`julianday` and plain string
/// ordering both work on stored values.
pub fn to_db_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a timestamp previously written by [`to_db_timestamp`]
pub fn parse_db_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Invalid stored timestamp '{}': {}", value, e)))
}
