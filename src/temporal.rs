// ⏰ Temporal Model - validity intervals and date coercion
//
// Registry rows carry two times:
// 1. Version: monotonic per natural key (volgnummer), decides which row wins
// 2. Validity: begin/end of the period the object exists in reality
//
// The archive only knows years or month-years, which are widened to the
// first day of the period.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::warn;

// ============================================================================
// VALIDITY INTERVAL
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidityInterval {
    pub start: Option<NaiveDate>,
    /// None = still valid
    pub end: Option<NaiveDate>,
}

impl ValidityInterval {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        ValidityInterval { start, end }
    }

    /// Open-ended interval starting at `start`
    pub fn from(start: NaiveDate) -> Self {
        ValidityInterval {
            start: Some(start),
            end: None,
        }
    }

    pub fn is_current(&self) -> bool {
        self.end.is_none()
    }

    /// Valid on `date` when started on or before it and not yet ended.
    /// The end date itself still counts as valid.
    pub fn is_valid_at(&self, date: NaiveDate) -> bool {
        if let Some(start) = self.start {
            if start > date {
                return false;
            }
        }

        match self.end {
            Some(end) => end >= date,
            None => true,
        }
    }
}

// ============================================================================
// DATE COERCION
// ============================================================================

/// Parse a registry date. Datetime strings are cut to their date part.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    let date_part = value.split(['T', ' ']).next().unwrap_or(value);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

/// Parse a registry datetime.
///
/// Values with a time part (`T`) are parsed as-is; an offset, if present, is
/// dropped after conversion to local wall time of that offset. Date-only
/// values are combined with `date_only_time`, or with the current wall-clock
/// time of day when no time is pinned.
pub fn parse_datetime(value: &str, date_only_time: Option<NaiveTime>) -> Option<NaiveDateTime> {
    let value = value.trim();
    if value.contains('T') {
        if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
            return Some(dt.naive_local());
        }
        return NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f").ok();
    }

    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()?;
    let time = date_only_time.unwrap_or_else(|| Local::now().time());
    Some(date.and_time(time))
}

fn month_year_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"([0-9]{1,2})-([0-9]{4})").expect("valid regex"))
}

/// Archive dating: `YYYY` -> Jan 1st, `M-YYYY` / `MM-YYYY` -> 1st of month.
/// Anything else is logged and dropped.
pub fn date_from_year(value: Option<&str>) -> Option<NaiveDate> {
    let value = value?.trim();
    if value.is_empty() {
        return None;
    }

    if value.len() == 4 {
        let year: i32 = match value.parse() {
            Ok(y) => y,
            Err(_) => {
                warn!(value, "unexpected dating pattern");
                return None;
            }
        };
        return NaiveDate::from_ymd_opt(year, 1, 1);
    }

    let parsed = month_year_pattern().captures(value).and_then(|caps| {
        let month: u32 = caps[1].parse().ok()?;
        let year: i32 = caps[2].parse().ok()?;
        NaiveDate::from_ymd_opt(year, month, 1)
    });
    if parsed.is_none() {
        warn!(value, "unexpected dating pattern");
    }
    parsed
}
