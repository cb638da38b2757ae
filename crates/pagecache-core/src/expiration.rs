//! Store expiration values.
//!
//! The key-value store takes a single numeric expiration field with two
//! meanings: values up to [`RELATIVE_EXPIRATION_LIMIT`] are a number of
//! seconds from now, larger values are an absolute unix timestamp. Zero means
//! the item never expires and negative values mean it is already expired.

use chrono::{DateTime, Duration, TimeZone, Utc};

/// Thirty days, in seconds.
pub const RELATIVE_EXPIRATION_LIMIT: i64 = 60 * 60 * 24 * 30;

/// Expiration requested for a stored item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiration {
    /// Keep until evicted.
    Never,
    /// Expire a number of seconds after the write.
    After(u64),
    /// Expire at an absolute point in time.
    At(DateTime<Utc>),
}

impl Expiration {
    pub fn after_seconds(seconds: u64) -> Self {
        Expiration::After(seconds)
    }

    pub fn at(deadline: DateTime<Utc>) -> Self {
        Expiration::At(deadline)
    }

    /// Encode for the store's wire contract.
    pub fn to_wire(&self, now: DateTime<Utc>) -> i64 {
        match *self {
            Expiration::Never => 0,
            Expiration::After(0) => 0,
            Expiration::After(seconds) => {
                let seconds = i64::try_from(seconds).unwrap_or(i64::MAX);
                if seconds <= RELATIVE_EXPIRATION_LIMIT {
                    seconds
                } else {
                    now.timestamp().saturating_add(seconds)
                }
            }
            Expiration::At(deadline) => {
                // round up so the item never disappears before its deadline
                let mut timestamp = deadline.timestamp();
                if deadline.timestamp_subsec_nanos() > 0 {
                    timestamp += 1;
                }
                if timestamp > RELATIVE_EXPIRATION_LIMIT {
                    timestamp
                } else {
                    -1
                }
            }
        }
    }

    /// Decode a wire value into an absolute deadline, as the store interprets it.
    ///
    /// Returns `None` for items that never expire.
    pub fn from_wire(value: i64, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if value == 0 {
            None
        } else if value < 0 {
            Some(now)
        } else if value <= RELATIVE_EXPIRATION_LIMIT {
            Some(now + Duration::seconds(value))
        } else {
            Some(Utc.timestamp_opt(value, 0).single().unwrap_or(now))
        }
    }

    /// Absolute deadline this expiration resolves to when written at `now`.
    pub fn deadline(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match *self {
            Expiration::Never | Expiration::After(0) => None,
            Expiration::After(seconds) => {
                let seconds = i64::try_from(seconds).unwrap_or(i64::MAX).min(i64::MAX / 1000);
                Some(
                    now.checked_add_signed(Duration::seconds(seconds))
                        .unwrap_or(DateTime::<Utc>::MAX_UTC),
                )
            }
            Expiration::At(deadline) => Some(deadline),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_relative_is_sent_as_is() {
        assert_eq!(Expiration::after_seconds(7).to_wire(now()), 7);
        assert_eq!(
            Expiration::after_seconds(RELATIVE_EXPIRATION_LIMIT as u64).to_wire(now()),
            RELATIVE_EXPIRATION_LIMIT
        );
    }

    #[test]
    fn test_long_relative_becomes_absolute() {
        let seconds = RELATIVE_EXPIRATION_LIMIT as u64 + 1;
        let wire = Expiration::after_seconds(seconds).to_wire(now());
        assert_eq!(wire, now().timestamp() + seconds as i64);
    }

    #[test]
    fn test_absolute_rounds_up() {
        let deadline = now() + Duration::milliseconds(1500);
        assert_eq!(
            Expiration::at(deadline).to_wire(now()),
            now().timestamp() + 2
        );
        assert_eq!(
            Expiration::at(now()).to_wire(now()),
            now().timestamp()
        );
    }

    #[test]
    fn test_absolute_below_threshold_is_expired() {
        let epoch = Utc.timestamp_opt(1000, 0).unwrap();
        assert_eq!(Expiration::at(epoch).to_wire(now()), -1);
    }

    #[test]
    fn test_from_wire_dual_semantics() {
        assert_eq!(Expiration::from_wire(0, now()), None);
        assert_eq!(
            Expiration::from_wire(30, now()),
            Some(now() + Duration::seconds(30))
        );
        let absolute = now().timestamp() + 5;
        assert_eq!(
            Expiration::from_wire(absolute, now()),
            Some(now() + Duration::seconds(5))
        );
        assert_eq!(Expiration::from_wire(-1, now()), Some(now()));
    }

    #[test]
    fn test_wire_roundtrip_preserves_deadline() {
        let deadline = now() + Duration::seconds(90);
        let wire = Expiration::at(deadline).to_wire(now());
        assert_eq!(Expiration::from_wire(wire, now()), Some(deadline));

        let wire = Expiration::after_seconds(90).to_wire(now());
        assert_eq!(Expiration::from_wire(wire, now()), Some(deadline));
    }
}
