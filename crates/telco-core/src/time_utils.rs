use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::models::Value;

/// Epoch magnitudes above this are read as milliseconds rather than seconds.
const EPOCH_MILLIS_THRESHOLD: i64 = 100_000_000_000;

/// Floats whose integer part fits in an `i64`.
const EPOCH_FLOAT_RANGE: std::ops::Range<f64> = (i64::MIN as f64)..(i64::MAX as f64);

/// Naive layouts tried after RFC 3339. Values without an offset are UTC.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

// ── Parsing ───────────────────────────────────────────────────────────────────

/// Parse a timestamp string into UTC.
///
/// Accepts RFC 3339 with `Z` or a fixed offset, the naive layouts in
/// [`NAIVE_FORMATS`], and a bare `YYYY-MM-DD` date (midnight). Returns `None`
/// for empty or unrecognised input.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Interpret an epoch number as seconds, or milliseconds for large values.
pub fn from_epoch(value: i64) -> Option<DateTime<Utc>> {
    if value.unsigned_abs() > EPOCH_MILLIS_THRESHOLD.unsigned_abs() {
        DateTime::from_timestamp_millis(value)
    } else {
        DateTime::from_timestamp(value, 0)
    }
}

/// Coerce any cell into a timestamp; anything unparseable becomes `None`.
pub fn coerce_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Timestamp(ts) => Some(*ts),
        Value::Text(s) => parse_timestamp(s),
        Value::Int(i) => from_epoch(*i),
        Value::Float(f) if EPOCH_FLOAT_RANGE.contains(&f.trunc()) => from_epoch(f.trunc() as i64),
        _ => None,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
