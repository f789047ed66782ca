use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::error::{ReportError, Result};

/// Accepted command-line date format.
pub const INPUT_FORMAT: &str = "%d/%m/%Y";

/// Timestamp format substituted into Flux queries.
pub const QUERY_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.fZ";

/// Minutes in a day divided over roughly a thousand points per series.
const POINTS_PER_SERIES: u64 = 1001;

// ======================================================
// DATE RANGE
// ======================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end:   DateTime<Utc>,
    /// Set when the range is a trailing window of whole days; queries then
    /// get a coarser aggregation window.
    pub window_days: Option<u32>,
}

impl DateRange {
    /// Explicit calendar dates, both taken at 12:00 UTC. `to` must be after
    /// `from`.
    pub fn from_dates(from: &str, to: &str) -> Result<Self> {
        let start = noon(parse_date(from)?);
        let end = noon(parse_date(to)?);
        if end <= start {
            return Err(ReportError::DateRange(format!(
                "end date {} must be after start date {}",
                to, from
            )));
        }
        Ok(DateRange { start, end, window_days: None })
    }

    /// The `days` days up to now.
    pub fn last_days(days: u32) -> Result<Self> {
        Self::last_days_until(days, Utc::now())
    }

    pub fn last_days_until(days: u32, now: DateTime<Utc>) -> Result<Self> {
        if days == 0 {
            return Err(ReportError::DateRange("day count must be at least 1".to_string()));
        }
        Ok(DateRange {
            start: now - Duration::days(days as i64),
            end: now,
            window_days: Some(days),
        })
    }

    pub fn start_query(&self) -> String {
        self.start.format(QUERY_FORMAT).to_string()
    }

    pub fn end_query(&self) -> String {
        self.end.format(QUERY_FORMAT).to_string()
    }

    /// Aggregation window in minutes for a day window, `None` for explicit
    /// dates.
    pub fn aggregate_minutes(&self) -> Option<u64> {
        self.window_days
            .map(|days| (days as u64 * 24 * 60).div_ceil(POINTS_PER_SERIES))
    }
}

/// Parse a strict `dd/mm/yyyy` date.
pub fn parse_date(input: &str) -> Result<NaiveDate> {
    let bytes = input.as_bytes();
    let shaped = bytes.len() == 10
        && bytes[2] == b'/'
        && bytes[5] == b'/'
        && bytes
            .iter()
            .enumerate()
            .all(|(i, b)| i == 2 || i == 5 || b.is_ascii_digit());

    if !shaped {
        return Err(ReportError::DateRange(format!(
            "'{}' is not a dd/mm/yyyy date",
            input
        )));
    }

    NaiveDate::parse_from_str(input, INPUT_FORMAT)
        .map_err(|_| ReportError::DateRange(format!("'{}' is not a valid calendar date", input)))
}

fn noon(date: NaiveDate) -> DateTime<Utc> {
    date.and_hms_opt(12, 0, 0)
        .unwrap_or_default()
        .and_utc()
}

// ======================================================
// TESTS
// ======================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn explicit_dates_are_taken_at_noon() {
        let range = DateRange::from_dates("08/03/2024", "15/03/2024").unwrap();
        assert_eq!(range.start_query(), "2024-03-08T12:00:00Z");
        assert_eq!(range.end_query(), "2024-03-15T12:00:00Z");
        assert_eq!(range.aggregate_minutes(), None);
    }

    #[test]
    fn end_must_follow_start() {
        assert!(DateRange::from_dates("15/03/2024", "15/03/2024").is_err());
        assert!(DateRange::from_dates("16/03/2024", "15/03/2024").is_err());
    }

    #[test]
    fn rejects_malformed_and_impossible_dates() {
        for bad in ["1/3/2024", "2024-03-01", "31/02/2024", "00/01/2024", "01/13/2024", "aa/bb/cccc"] {
            assert!(parse_date(bad).is_err(), "{} should be rejected", bad);
        }
        assert!(parse_date("29/02/2024").is_ok());
    }

    #[test]
    fn day_windows_end_now_and_set_aggregation() {
        let now = Utc.with_ymd_and_hms(2024, 3, 15, 9, 30, 0).unwrap();
        let range = DateRange::last_days_until(7, now).unwrap();
        assert_eq!(range.end, now);
        assert_eq!(range.start, Utc.with_ymd_and_hms(2024, 3, 8, 9, 30, 0).unwrap());
        assert_eq!(range.aggregate_minutes(), Some(11));

        let one = DateRange::last_days_until(1, now).unwrap();
        assert_eq!(one.aggregate_minutes(), Some(2));
        assert_eq!(DateRange::last_days_until(3, now).unwrap().aggregate_minutes(), Some(5));
    }

    #[test]
    fn zero_days_is_rejected() {
        assert!(DateRange::last_days(0).is_err());
    }

    #[test]
    fn fractional_seconds_survive_formatting() {
        let now = Utc.with_ymd_and_hms(2024, 3, 15, 9, 30, 0).unwrap() + Duration::milliseconds(250);
        let range = DateRange::last_days_until(1, now).unwrap();
        assert_eq!(range.end_query(), "2024-03-15T09:30:00.250Z");
    }
}
