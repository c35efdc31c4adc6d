//! Period math
//!
//! Proof periods are UTC-aligned ISO date ranges, `YYYY-MM-DD_YYYY-MM-DD`,
//! always ending at the most recent UTC midnight and spanning
//! `period_days` days.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeriodError {
    #[error("malformed period string: {0}")]
    Malformed(String),
}

/// Period string for the window of `period_days` days ending at the most
/// recent UTC midnight before `now`.
pub fn period_range_at(period_days: u32, now: DateTime<Utc>) -> String {
    let end = now.date_naive();
    let start = end - Duration::days(i64::from(period_days));
    format!("{}_{}", start.format("%Y-%m-%d"), end.format("%Y-%m-%d"))
}

/// Current period string.
pub fn period_range(period_days: u32) -> String {
    period_range_at(period_days, Utc::now())
}

/// Seconds in a period of `period_days` days.
pub fn period_seconds(period_days: u32) -> i64 {
    i64::from(period_days) * 24 * 3600
}

/// Unix time of a period's end (the end date's 00:00 UTC).
pub fn period_end_unix(period: &str) -> Result<i64, PeriodError> {
    let end = period
        .split('_')
        .nth(1)
        .ok_or_else(|| PeriodError::Malformed(period.to_string()))?;
    let date = NaiveDate::parse_from_str(end, "%Y-%m-%d")
        .map_err(|_| PeriodError::Malformed(period.to_string()))?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| PeriodError::Malformed(period.to_string()))?;
    Ok(midnight.and_utc().timestamp())
}
