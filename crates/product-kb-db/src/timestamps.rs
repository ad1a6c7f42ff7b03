//! Timestamp conversion utilities.
//!
//! All timestamps are stored as `i64` microseconds since the Unix epoch
//! (the `sqlmodel` convention). A monotonic guard protects stored
//! timestamps from wall-clock regressions (NTP corrections, VM migration).

#![allow(clippy::missing_const_for_fn)]

use chrono::{NaiveDateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

/// Microseconds per second
const MICROS_PER_SECOND: i64 = 1_000_000;

/// Last observed wall-clock value (microseconds since epoch).
static LAST_SYSTEM_TIME_US: AtomicI64 = AtomicI64::new(0);

/// Convert chrono `NaiveDateTime` to microseconds since Unix epoch.
#[inline]
#[must_use]
pub fn naive_to_micros(dt: NaiveDateTime) -> i64 {
    dt.and_utc().timestamp_micros()
}

/// Convert microseconds since Unix epoch to chrono `NaiveDateTime`.
///
/// Values outside chrono's representable range clamp instead of panicking.
#[inline]
#[must_use]
pub fn micros_to_naive(micros: i64) -> NaiveDateTime {
    let secs = micros.div_euclid(MICROS_PER_SECOND);
    let sub_micros = micros.rem_euclid(MICROS_PER_SECOND);
    let nsecs = u32::try_from(sub_micros * 1000).unwrap_or(0);
    Utc.timestamp_opt(secs, nsecs)
        .single()
        .unwrap_or(if micros < 0 {
            chrono::DateTime::<Utc>::MIN_UTC
        } else {
            chrono::DateTime::<Utc>::MAX_UTC
        })
        .naive_utc()
}

/// Current time as microseconds since Unix epoch, monotonic over backward
/// wall-clock jumps.
#[inline]
#[must_use]
pub fn now_micros() -> i64 {
    let current = Utc::now().timestamp_micros();
    let last = LAST_SYSTEM_TIME_US.fetch_max(current, Ordering::Relaxed);
    current.max(last)
}

/// ISO-8601 string (`YYYY-MM-DDTHH:MM:SS.ffffffZ`) for a micros timestamp.
#[must_use]
pub fn micros_to_iso(micros: i64) -> String {
    micros_to_naive(micros)
        .and_utc()
        .format("%Y-%m-%dT%H:%M:%S%.6fZ")
        .to_string()
}

/// Microseconds in one day, for staleness windows.
pub const MICROS_PER_DAY: i64 = 86_400 * MICROS_PER_SECOND;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn micros_round_trip() {
        let now = now_micros();
        assert_eq!(naive_to_micros(micros_to_naive(now)), now);
    }

    #[test]
    fn now_is_monotonic() {
        let a = now_micros();
        let b = now_micros();
        assert!(b >= a);
    }

    #[test]
    fn iso_format_shape() {
        let iso = micros_to_iso(1_700_000_000_000_000);
        assert!(iso.ends_with('Z'));
        assert!(iso.contains('T'));
    }

    #[test]
    fn negative_micros_does_not_panic() {
        let _ = micros_to_naive(i64::MIN);
        let _ = micros_to_naive(i64::MAX);
    }
}
