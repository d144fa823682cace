//! Core scalar types shared across the engine.
//!
//! A [`Timestamp`] is an opaque monotonic clock value in microseconds with a
//! total order; subtracting two timestamps yields a [`TimeDuration`]. Series
//! are identified by a [`ParamId`] the engine never interprets, and records
//! inside a page are addressed by [`EntryOffset`] byte offsets.

use std::ops::Sub;
use std::time::{SystemTime, UNIX_EPOCH};

/// Identifier of a time series. Opaque to the engine.
pub type ParamId = u32;

/// Byte offset of an entry from the start of its page.
pub type EntryOffset = u32;

/// A point on the engine's clock, in microseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub const MIN: Timestamp = Timestamp(0);
    pub const MAX: Timestamp = Timestamp(i64::MAX);

    /// Current wall-clock time in microseconds.
    pub fn now() -> Timestamp {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(elapsed.as_micros() as i64)
    }

    pub fn value(self) -> i64 {
        self.0
    }
}

impl From<i64> for Timestamp {
    fn from(value: i64) -> Timestamp {
        Timestamp(value)
    }
}

impl Sub for Timestamp {
    type Output = TimeDuration;

    fn sub(self, other: Timestamp) -> TimeDuration {
        TimeDuration(self.0 - other.0)
    }
}

/// Difference between two [`Timestamp`]s, in microseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeDuration(pub i64);

impl TimeDuration {
    pub const fn from_micros(micros: i64) -> TimeDuration {
        TimeDuration(micros)
    }

    pub const fn from_seconds(seconds: i64) -> TimeDuration {
        TimeDuration(seconds * 1_000_000)
    }

    pub fn value(self) -> i64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_ordering_is_total() {
        assert!(Timestamp(1) < Timestamp(2));
        assert!(Timestamp::MIN < Timestamp::MAX);
        assert_eq!(Timestamp(5), Timestamp(5));
    }

    #[test]
    fn timestamp_subtraction_yields_duration() {
        let a = Timestamp(1_500_000);
        let b = Timestamp(500_000);
        assert_eq!(a - b, TimeDuration::from_seconds(1));
        assert_eq!(b - a, TimeDuration::from_micros(-1_000_000));
    }

    #[test]
    fn now_is_past_the_epoch() {
        assert!(Timestamp::now() > Timestamp::MIN);
    }
}
