//! Resolution of the fetch window from the `--date/--start/--end/--interval` inputs.

use chrono::{DateTime, Duration, NaiveDate, Utc};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WindowError {
    #[error("invalid date {0:?}, expected YYYY-MM-DD")]
    InvalidDate(String),
    #[error("invalid {bound} time {value:?}, expected RFC 3339")]
    InvalidTimestamp { bound: &'static str, value: String },
    #[error("invalid interval {0:?}, expected e.g. 30m or 1h30m")]
    InvalidDuration(String),
    #[error("window start {start} is after end {end}")]
    Inverted { start: DateTime<Utc>, end: DateTime<Utc> },
}

#[derive(Debug, Clone, Default)]
pub struct WindowArgs {
    pub date: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub interval: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchWindow {
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
}

/// Apply the inputs in order: date, then start/end, then interval.
pub fn resolve(args: &WindowArgs, now: DateTime<Utc>) -> Result<FetchWindow, WindowError> {
    let mut window = FetchWindow::default();

    if let Some(date) = non_empty(&args.date) {
        let day = NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map_err(|_| WindowError::InvalidDate(date.to_string()))?;
        let start = day.and_hms_opt(0, 0, 0).map(|t| t.and_utc());
        window.start_at = start;
        window.end_at = start.map(|s| s + Duration::days(1));
    }
    if let Some(start) = non_empty(&args.start) {
        window.start_at = Some(rfc3339("start", start)?);
    }
    if let Some(end) = non_empty(&args.end) {
        window.end_at = Some(rfc3339("end", end)?);
    }
    if let Some(interval) = non_empty(&args.interval) {
        let span = parse_duration(interval)?;
        window.end_at = Some(now);
        window.start_at = Some(now - span);
    }

    if let (Some(start), Some(end)) = (window.start_at, window.end_at) {
        if start > end {
            return Err(WindowError::Inverted { start, end });
        }
    }
    Ok(window)
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

fn rfc3339(bound: &'static str, value: &str) -> Result<DateTime<Utc>, WindowError> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| WindowError::InvalidTimestamp { bound, value: value.to_string() })
}

/// Parse `<n><unit>` groups, units `ms`, `s`, `m`, `h` and `d`.
pub fn parse_duration(input: &str) -> Result<Duration, WindowError> {
    let invalid = || WindowError::InvalidDuration(input.to_string());
    let mut total = Duration::zero();
    let mut rest = input.trim();
    if rest.is_empty() {
        return Err(invalid());
    }

    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return Err(invalid());
        }
        let amount: i64 = rest[..digits].parse().map_err(|_| invalid())?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let part = match &rest[..unit_len] {
            "ms" => Duration::try_milliseconds(amount),
            "s" => Duration::try_seconds(amount),
            "m" => Duration::try_minutes(amount),
            "h" => Duration::try_hours(amount),
            "d" => Duration::try_days(amount),
            _ => None,
        }
        .ok_or_else(invalid)?;
        total = total.checked_add(&part).ok_or_else(invalid)?;
        rest = &rest[unit_len..];
    }
    Ok(total)
}
