//! Temporal value normalization
//!
//! Payloads and stored values may spell the same instant with different
//! precision (`12:00:00` vs `12:00:00.000Z`). Everything temporal is reduced
//! to one canonical string before it is compared or written:
//!
//! - `Date` → `YYYY-MM-DD`
//! - `DateTime` → RFC 3339 in UTC with milliseconds (`2019-01-09T00:00:00.000Z`)
//! - `Time` → `HH:MM:SS.fffZ` in UTC

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};

use crate::models::ScalarType;

/// Canonical form of a temporal value, `None` if the text is not parseable
///
/// Non-temporal scalar types are returned unchanged.
pub fn normalize_temporal(scalar: ScalarType, raw: &str) -> Option<String> {
    match scalar {
        ScalarType::Date => parse_date(raw).map(|date| date.format("%Y-%m-%d").to_string()),
        ScalarType::DateTime => {
            parse_datetime(raw).map(|instant| instant.to_rfc3339_opts(SecondsFormat::Millis, true))
        }
        ScalarType::Time => parse_time(raw).map(|time| time.format("%H:%M:%S%.3fZ").to_string()),
        _ => Some(raw.to_string()),
    }
}

/// Whether two temporal strings denote the same value
///
/// Falls back to raw text equality when either side cannot be parsed.
pub fn temporal_eq(scalar: ScalarType, left: &str, right: &str) -> bool {
    match (normalize_temporal(scalar, left), normalize_temporal(scalar, right)) {
        (Some(left), Some(right)) => left == right,
        _ => left == right,
    }
}

fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
        return Some(instant.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_datetime(raw).map(|instant| instant.date_naive()))
}

fn parse_time(raw: &str) -> Option<NaiveTime> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
        return Some(instant.with_timezone(&Utc).time());
    }
    // A bare time with an offset only parses once anchored to some date
    if let Ok(instant) = DateTime::parse_from_rfc3339(&format!("2000-01-01T{raw}")) {
        return Some(instant.with_timezone(&Utc).time());
    }
    let bare = raw.strip_suffix('Z').unwrap_or(raw);
    ["%H:%M:%S%.f", "%H:%M:%S", "%H:%M"]
        .iter()
        .find_map(|format| NaiveTime::parse_from_str(bare, format).ok())
}
