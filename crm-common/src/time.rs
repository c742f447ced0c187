//! Timestamp utilities
//!
//! All engine timestamps are UTC epoch milliseconds (`i64`). Upstream payloads
//! carry a mix of ISO strings, epoch seconds and epoch milliseconds; the
//! parsers here fold them into one representation.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

/// Milliseconds in one day
pub const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Epoch values below this are treated as seconds rather than milliseconds
const SECONDS_THRESHOLD: f64 = 1e12;

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Current time as epoch milliseconds
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert epoch milliseconds to a UTC datetime (None when out of range)
pub fn ms_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

/// Whole days elapsed from `ts_ms` to `reference_ms`, or -1 when `ts_ms` is unset
///
/// ```
/// use crm_common::time::{days_since, MS_PER_DAY};
///
/// assert_eq!(days_since(10 * MS_PER_DAY, 0), -1);
/// assert_eq!(days_since(10 * MS_PER_DAY, 3 * MS_PER_DAY), 7);
/// ```
pub fn days_since(reference_ms: i64, ts_ms: i64) -> i64 {
    if ts_ms <= 0 {
        return -1;
    }
    (reference_ms - ts_ms) / MS_PER_DAY
}

/// Parse a timestamp string into epoch milliseconds
///
/// Accepts RFC 3339, `YYYY-MM-DDTHH:MM:SS[.fff]` and `YYYY-MM-DD HH:MM:SS`
/// (naive forms are read as UTC), and bare digit strings as epoch values.
pub fn parse_timestamp_str(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp_millis());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc().timestamp_millis());
        }
    }
    raw.parse::<f64>().ok().and_then(epoch_number_to_ms)
}

/// Interpret a JSON value (string or number) as epoch milliseconds
pub fn parse_timestamp_value(value: &Value) -> Option<i64> {
    match value {
        Value::String(s) => parse_timestamp_str(s),
        Value::Number(n) => n.as_f64().and_then(epoch_number_to_ms),
        _ => None,
    }
}

fn epoch_number_to_ms(n: f64) -> Option<i64> {
    if !n.is_finite() || n <= 0.0 {
        return None;
    }
    if n < SECONDS_THRESHOLD {
        Some((n * 1000.0) as i64)
    } else {
        Some(n as i64)
    }
}
