//! Billing-period date normalization.
//!
//! Everything that touches a billing period goes through [`normalize`] so the
//! counters only ever see one canonical shape: the UTC calendar day as
//! `YYYY-MM-DD`. Timestamps carrying an offset are projected through UTC, not
//! their local day, so `2025-03-10T00:00:00+12:00` normalizes to `2025-03-09`.

use chrono::{DateTime, NaiveDate, Utc};

const DAY_FORMAT: &str = "%Y-%m-%d";

/// Heterogeneous date input accepted by [`normalize`].
#[derive(Debug, Clone, Copy)]
pub enum DateInput<'a> {
    Timestamp(DateTime<Utc>),
    Text(&'a str),
}

impl From<DateTime<Utc>> for DateInput<'_> {
    fn from(ts: DateTime<Utc>) -> Self {
        DateInput::Timestamp(ts)
    }
}

impl<'a> From<&'a str> for DateInput<'a> {
    fn from(s: &'a str) -> Self {
        DateInput::Text(s)
    }
}

/// Normalize `value` to a canonical UTC calendar-day string, returning
/// `fallback` verbatim when it cannot be parsed. Pure, never fails.
pub fn normalize(value: DateInput<'_>, fallback: &str) -> String {
    match value {
        DateInput::Timestamp(ts) => utc_day(ts),
        DateInput::Text(s) => {
            // Bare calendar day: interpreted as UTC midnight, round-trips
            // unchanged.
            if let Ok(date) = NaiveDate::parse_from_str(s, DAY_FORMAT) {
                return date.format(DAY_FORMAT).to_string();
            }
            // Full timestamp, possibly with an offset: project to UTC first.
            match DateTime::parse_from_rfc3339(s) {
                Ok(ts) => utc_day(ts.with_timezone(&Utc)),
                Err(_) => fallback.to_string(),
            }
        }
    }
}

/// Project a timestamp onto its UTC calendar day.
pub fn utc_day(ts: DateTime<Utc>) -> String {
    ts.date_naive().format(DAY_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn bare_day_passes_through() {
        assert_eq!(normalize("2025-03-10".into(), "fb"), "2025-03-10");
    }

    #[test]
    fn normalization_is_idempotent() {
        let inputs = ["2025-01-01", "2024-12-31", "2025-03-10T12:00:00Z"];
        for input in inputs {
            let once = normalize(input.into(), "fb");
            let twice = normalize(once.as_str().into(), "fb");
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn positive_offset_crossing_midnight_maps_to_previous_utc_day() {
        assert_eq!(
            normalize("2025-03-10T00:00:00+12:00".into(), "fb"),
            "2025-03-09"
        );
    }

    #[test]
    fn negative_offset_stays_on_same_utc_day() {
        assert_eq!(
            normalize("2025-03-10T00:00:00-12:00".into(), "fb"),
            "2025-03-10"
        );
    }

    #[test]
    fn utc_timestamp_drops_time_of_day() {
        assert_eq!(
            normalize("2025-06-15T23:59:59Z".into(), "fb"),
            "2025-06-15"
        );
    }

    #[test]
    fn timestamp_input_projects_through_utc() {
        let ts = Utc.with_ymd_and_hms(2025, 7, 4, 18, 30, 0).unwrap();
        assert_eq!(normalize(ts.into(), "fb"), "2025-07-04");
    }

    #[test]
    fn invalid_input_returns_fallback_verbatim() {
        assert_eq!(normalize("not a date".into(), "2025-01-01"), "2025-01-01");
        assert_eq!(normalize("".into(), "fallback-value"), "fallback-value");
        assert_eq!(normalize("2025-13-40".into(), "fb"), "fb");
    }
}
