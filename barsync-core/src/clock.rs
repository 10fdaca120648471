//! Reference timezone helpers and an injectable clock.
//!
//! Every persisted `dt` is naive wall-clock time at UTC+8. Upstream requests
//! are made in epoch milliseconds, so conversions live here in one place.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};

/// Fixed offset of the reference timezone from UTC, in hours.
pub const REFERENCE_OFFSET_HOURS: i64 = 8;

pub fn reference_offset() -> Duration {
    Duration::hours(REFERENCE_OFFSET_HOURS)
}

/// Epoch milliseconds → reference wall-clock time.
pub fn epoch_ms_to_reference(ms: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp_millis(ms).map(|dt| dt.naive_utc() + reference_offset())
}

/// Reference wall-clock time → epoch milliseconds.
pub fn reference_to_epoch_ms(dt: NaiveDateTime) -> i64 {
    (dt - reference_offset()).and_utc().timestamp_millis()
}

/// Source of "now" for the sync engine.
///
/// Abstracted so tests can pin the incomplete-bar cutoff.
pub trait Clock: Send + Sync {
    /// Current time in the reference timezone.
    fn now(&self) -> NaiveDateTime;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Utc::now().naive_utc() + reference_offset()
    }
}

/// A clock that never moves.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}
