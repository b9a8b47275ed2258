use std::{
    fmt,
    time::{
        Duration,
        SystemTime,
        UNIX_EPOCH,
    },
};

use chrono::{
    DateTime,
    Utc,
};
use serde::{
    Deserialize,
    Serialize,
};

/// The minimum representable positive delta between two sequencer
/// timestamps. Monotone assignment always advances by at least this much.
pub const EPSILON: Duration = Duration::from_micros(1);

/// Sequencer time: microseconds since the Unix epoch. Distinct from wall
/// clock time -- the clock only supplies a lower bound, and the writer
/// pipeline is responsible for strict monotonicity (see
/// [`Timestamp::at_least_succ`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[cfg_attr(any(test, feature = "testing"), derive(proptest_derive::Arbitrary))]
pub struct Timestamp(u64);

impl Timestamp {
    pub const MIN: Timestamp = Timestamp(0);
    pub const MAX: Timestamp = Timestamp(u64::MAX);

    pub const fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    pub const fn as_micros(&self) -> u64 {
        self.0
    }

    pub fn now(system_time: SystemTime) -> Self {
        let micros = system_time
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_micros();
        Self(u64::try_from(micros).unwrap_or(u64::MAX))
    }

    /// The next representable timestamp strictly greater than `self`.
    pub fn succ(&self) -> Self {
        Self(self.0.saturating_add(1))
    }

    pub fn pred(&self) -> Self {
        Self(self.0.saturating_sub(1))
    }

    pub fn add(&self, d: Duration) -> Self {
        Self(self.0.saturating_add(u64::try_from(d.as_micros()).unwrap_or(u64::MAX)))
    }

    pub fn sub(&self, d: Duration) -> Self {
        Self(self.0.saturating_sub(u64::try_from(d.as_micros()).unwrap_or(u64::MAX)))
    }

    /// Elapsed duration of `self` since `earlier`, or `Duration::ZERO` if
    /// `self` is not after `earlier`.
    pub fn saturating_since(&self, earlier: Timestamp) -> Duration {
        Duration::from_micros(self.0.saturating_sub(earlier.0))
    }

    /// Monotone assignment primitive: the smallest timestamp that is both
    /// at least `now` and strictly greater than `last`. Never trusts the
    /// clock to be strictly increasing on its own.
    pub fn at_least_succ(now: Timestamp, last: Timestamp) -> Self {
        std::cmp::max(now, last.succ())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = (self.0 / 1_000_000) as i64;
        let micros = self.0 % 1_000_000;
        match DateTime::<Utc>::from_timestamp(secs, (micros * 1000) as u32) {
            Some(dt) if micros == 0 => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%SZ")),
            Some(dt) => write!(f, "{}.{micros:06}Z", dt.format("%Y-%m-%dT%H:%M:%S")),
            None => write!(f, "Timestamp({})", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn succ_is_strictly_greater() {
        let t = Timestamp::from_micros(100);
        assert!(t.succ() > t);
        assert_eq!(t.succ().as_micros(), 101);
    }

    #[test]
    fn at_least_succ_respects_both_bounds() {
        let last = Timestamp::from_micros(100);
        // clock behind last: still advances by epsilon.
        let now = Timestamp::from_micros(50);
        assert_eq!(Timestamp::at_least_succ(now, last), Timestamp::from_micros(101));
        // clock ahead of last: uses the clock.
        let now = Timestamp::from_micros(200);
        assert_eq!(Timestamp::at_least_succ(now, last), Timestamp::from_micros(200));
    }

    #[test]
    fn display_epoch() {
        assert_eq!(Timestamp::from_micros(0).to_string(), "1970-01-01T00:00:00Z");
        assert_eq!(
            Timestamp::from_micros(10_000_000).to_string(),
            "1970-01-01T00:00:10Z"
        );
    }

    proptest! {
        /// `succ` never decreases `self`, and strictly increases it away
        /// from the saturation boundary.
        #[test]
        fn succ_never_decreases(micros in any::<u64>()) {
            let t = Timestamp::from_micros(micros);
            prop_assert!(t.succ() >= t);
            if micros < u64::MAX {
                prop_assert!(t.succ() > t);
            }
        }

        /// `pred` is the inverse of `succ` away from the saturation
        /// boundaries.
        #[test]
        fn pred_succ_round_trips(micros in 1u64..u64::MAX) {
            let t = Timestamp::from_micros(micros);
            prop_assert_eq!(t.succ().pred(), t);
        }

        /// The assigned timestamp is always at least `now` and, short of
        /// `last` already sitting at the saturation boundary, strictly
        /// after `last`.
        #[test]
        fn at_least_succ_is_monotone(now in any::<u64>(), last in any::<u64>()) {
            let now = Timestamp::from_micros(now);
            let last = Timestamp::from_micros(last);
            let assigned = Timestamp::at_least_succ(now, last);
            prop_assert!(assigned >= now);
            if last < Timestamp::MAX {
                prop_assert!(assigned > last);
            }
        }

        /// `Display` never panics and always produces a non-empty string,
        /// across the full representable range.
        #[test]
        fn display_never_panics(micros in any::<u64>()) {
            let s = Timestamp::from_micros(micros).to_string();
            prop_assert!(!s.is_empty());
        }
    }
}
