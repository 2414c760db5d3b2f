//! Calendar-date helpers.
//!
//! All dates in the store are UTC calendar days. Provider payloads carry either
//! plain ISO dates (`2020-01-02`) or midnight timestamps
//! (`2020-01-02T00:00:00.000Z`); both normalize to the same `NaiveDate`.

use chrono::{DateTime, NaiveDate};

/// Parse an ISO date or an RFC 3339 timestamp into a UTC calendar day.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(date);
    }
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.naive_utc().date())
}

/// Today in the local calendar (universe staleness is judged against this).
pub fn today_local() -> NaiveDate {
    chrono::Local::now().date_naive()
}

/// Today in UTC (storage timestamps are normalized to this).
pub fn today_utc() -> NaiveDate {
    chrono::Utc::now().date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_dates() {
        assert_eq!(
            parse_date("2020-06-15"),
            NaiveDate::from_ymd_opt(2020, 6, 15)
        );
    }

    #[test]
    fn parses_provider_timestamps() {
        assert_eq!(
            parse_date("2020-01-02T00:00:00.000Z"),
            NaiveDate::from_ymd_opt(2020, 1, 2)
        );
        assert_eq!(
            parse_date("2019-12-31T00:00:00+00:00"),
            NaiveDate::from_ymd_opt(2019, 12, 31)
        );
    }

    #[test]
    fn rejects_blank_and_garbage() {
        assert_eq!(parse_date(""), None);
        assert_eq!(parse_date("   "), None);
        assert_eq!(parse_date("not-a-date"), None);
    }
}
