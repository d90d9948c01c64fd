//! Source timestamp normalization.
//!
//! Legacy stores mix milliseconds and seconds without a unit column, so the
//! unit is inferred from magnitude. This is a heuristic, not a classifier:
//! values around the thresholds (seconds near 2001, truncated milliseconds)
//! can be misread.

/// Values above this are treated as epoch milliseconds.
pub const MILLIS_THRESHOLD: f64 = 1e12;
/// Values above this (and at most [`MILLIS_THRESHOLD`]) are epoch seconds.
pub const SECONDS_THRESHOLD: f64 = 1e9;

/// Normalizes a raw source timestamp to epoch seconds.
///
/// - `> 1e12` -> milliseconds, divided by 1000 (floored).
/// - `> 1e9` -> already seconds (floored).
/// - anything else, including `None`, NaN and infinities -> `default`.
pub fn normalize_timestamp(value: Option<f64>, default: i64) -> i64 {
    let Some(raw) = value else {
        return default;
    };
    if !raw.is_finite() {
        return default;
    }

    if raw > MILLIS_THRESHOLD {
        (raw / 1000.0).floor() as i64
    } else if raw > SECONDS_THRESHOLD {
        raw.floor() as i64
    } else {
        default
    }
}
