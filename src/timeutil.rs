//! Deterministic time arithmetic for the scoring engine.
//!
//! Every function takes explicit instants — nothing in this module reads
//! the wall clock. Timestamps are stored as RFC-3339 UTC text in SQLite;
//! `parse_utc` is the single tolerant parser the rest of the crate uses.

use chrono::{DateTime, NaiveDateTime, Utc};

/// Whole hours elapsed from `from` to `to`, floored.
///
/// Returns 0 when `from` is `None` or lies after `to`.
pub fn hours_between(from: Option<DateTime<Utc>>, to: DateTime<Utc>) -> i64 {
    match from {
        Some(from) if from <= to => (to - from).num_hours(),
        _ => 0,
    }
}

/// Whole days elapsed from `from` to `to`, floored. 23h → 0, 24h → 1.
///
/// Returns 0 when `from` is `None` or lies after `to`.
pub fn days_between(from: Option<DateTime<Utc>>, to: DateTime<Utc>) -> i64 {
    match from {
        Some(from) if from <= to => (to - from).num_days(),
        _ => 0,
    }
}

/// Clamp `v` into `[lo, hi]`.
pub fn clamp(v: f64, lo: f64, hi: f64) -> f64 {
    v.max(lo).min(hi)
}

/// Round to 2 decimals, half away from zero.
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Parse an RFC-3339 timestamp into a UTC instant.
///
/// Accepts `2026-03-01T09:00:00+00:00`, the `Z` suffix form, and the
/// naive `%Y-%m-%dT%H:%M:%S` form SQLite's `datetime()` emits (assumed
/// UTC). Anything else is `None` — callers treat an unparseable
/// timestamp like a missing one rather than failing a recalculation.
pub fn parse_utc(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(&format!("{}+00:00", value.trim_end_matches('Z'))) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S"))
        .ok()
        .map(|naive| naive.and_utc())
}

/// Parse an optional column value.
pub fn parse_utc_opt(value: Option<&str>) -> Option<DateTime<Utc>> {
    value.and_then(parse_utc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(s: &str) -> DateTime<Utc> {
        parse_utc(s).expect("test timestamp")
    }

    #[test]
    fn test_hours_between_floors() {
        let from = at("2026-03-01T00:00:00Z");
        assert_eq!(hours_between(Some(from), at("2026-03-01T01:59:59Z")), 1);
        assert_eq!(hours_between(Some(from), at("2026-03-01T02:00:00Z")), 2);
    }

    #[test]
    fn test_hours_between_none_or_negative_is_zero() {
        let now = at("2026-03-01T00:00:00Z");
        assert_eq!(hours_between(None, now), 0);
        assert_eq!(hours_between(Some(at("2026-03-02T00:00:00Z")), now), 0);
    }

    #[test]
    fn test_days_between_boundary() {
        let from = at("2026-03-01T00:00:00Z");
        assert_eq!(days_between(Some(from), at("2026-03-01T23:00:00Z")), 0);
        assert_eq!(days_between(Some(from), at("2026-03-02T00:00:00Z")), 1);
    }

    #[test]
    fn test_clamp() {
        assert_eq!(clamp(-3.0, 0.0, 100.0), 0.0);
        assert_eq!(clamp(142.0, 0.0, 100.0), 100.0);
        assert_eq!(clamp(55.5, 0.0, 100.0), 55.5);
    }

    #[test]
    fn test_round2_half_away_from_zero() {
        assert_eq!(round2(0.125), 0.13);
        assert_eq!(round2(-0.125), -0.13);
        assert_eq!(round2(48.7), 48.7);
        assert_eq!(round2(59.999), 60.0);
    }

    #[test]
    fn test_parse_utc_formats() {
        assert!(parse_utc("2026-03-01T09:00:00+00:00").is_some());
        assert!(parse_utc("2026-03-01T09:00:00Z").is_some());
        assert!(parse_utc("2026-03-01T09:00:00").is_some());
        assert!(parse_utc("2026-03-01 09:00:00").is_some());
        assert!(parse_utc("not a timestamp").is_none());
    }

    #[test]
    fn test_parse_utc_offset_normalized() {
        let east = parse_utc("2026-03-01T10:00:00+02:00").unwrap();
        assert_eq!(east, Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap());
    }
}
