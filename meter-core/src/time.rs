//! Wall-clock and monotonic time primitives.
//!
//! Two clocks drive the meter. [`Timestamp`] is the network-synchronised wall
//! clock in whole seconds; it labels pulses and publishes and may be invalid
//! right after a cold boot. [`Uptime`] is the monotonic millisecond counter
//! since boot and is always available; the debounce window and the stay-awake
//! deadline are measured against it.

use core::{fmt, ops::Add, time::Duration};

/// Wall-clock seconds since the Unix epoch.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Timestamp(u32);

impl Timestamp {
    /// Raw value used as the "unset" sentinel in the encoded record.
    pub const UNSET_RAW: u32 = 0;

    /// Creates a timestamp from epoch seconds.
    #[must_use]
    pub const fn from_secs(secs: u32) -> Self {
        Self(secs)
    }

    /// Returns the epoch seconds.
    #[must_use]
    pub const fn secs(self) -> u32 {
        self.0
    }

    /// Decodes an optional timestamp, mapping the sentinel to `None`.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Option<Self> {
        if raw == Self::UNSET_RAW {
            None
        } else {
            Some(Self(raw))
        }
    }

    /// Encodes an optional timestamp, mapping `None` to the sentinel.
    #[must_use]
    pub const fn into_raw(value: Option<Self>) -> u32 {
        match value {
            Some(ts) => ts.0,
            None => Self::UNSET_RAW,
        }
    }

    /// Returns the elapsed time since `earlier`, or zero when `earlier` is later.
    #[must_use]
    pub const fn saturating_duration_since(self, earlier: Self) -> Duration {
        Duration::from_secs(self.0.saturating_sub(earlier.0) as u64)
    }

    /// Signed difference in seconds (`self - other`).
    #[must_use]
    pub const fn delta_since(self, other: Self) -> i64 {
        self.0 as i64 - other.0 as i64
    }
}

impl Add<Duration> for Timestamp {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        let secs = u32::try_from(rhs.as_secs()).unwrap_or(u32::MAX);
        Self(self.0.saturating_add(secs))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic milliseconds since boot.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Uptime(u64);

impl Uptime {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// Returns the elapsed time since `earlier`, or zero when `earlier` is later.
    #[must_use]
    pub const fn saturating_duration_since(self, earlier: Self) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }
}

impl Add<Duration> for Uptime {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        let millis = u64::try_from(rhs.as_millis()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(millis))
    }
}

impl fmt::Display for Uptime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Source of both clocks, implemented by the firmware and the emulator.
pub trait Clock {
    /// Monotonic time since boot.
    fn uptime(&self) -> Uptime;

    /// Current wall-clock time, or `None` until the clock has been synchronised.
    fn now(&self) -> Option<Timestamp>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_round_trips_to_none() {
        assert_eq!(Timestamp::from_raw(0), None);
        assert_eq!(Timestamp::into_raw(None), 0);
        assert_eq!(
            Timestamp::from_raw(1_600_000_000),
            Some(Timestamp::from_secs(1_600_000_000))
        );
    }

    #[test]
    fn adding_durations_saturates() {
        let late = Timestamp::from_secs(u32::MAX - 1);
        assert_eq!(late + Duration::from_secs(10), Timestamp::from_secs(u32::MAX));

        let uptime = Uptime::from_millis(1_000) + Duration::from_millis(300);
        assert_eq!(uptime.as_millis(), 1_300);
    }

    #[test]
    fn signed_delta_handles_clock_steps_backwards() {
        let earlier = Timestamp::from_secs(100);
        let later = Timestamp::from_secs(160);
        assert_eq!(later.delta_since(earlier), 60);
        assert_eq!(earlier.delta_since(later), -60);
        assert_eq!(earlier.saturating_duration_since(later), Duration::ZERO);
    }
}
