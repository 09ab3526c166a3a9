#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Wall clock derived from the modem's network time.
//!
//! The MCU keeps no calendar across resets. Once the modem reports network
//! time the offset between epoch seconds and uptime is stored, and every
//! later reading is uptime plus that offset.

use meter_core::{Timestamp, Uptime};
use portable_atomic::{AtomicU32, Ordering};

/// Epoch seconds at uptime zero (0 == not yet synchronised).
pub struct WallClock {
    epoch_at_boot: AtomicU32,
}

impl WallClock {
    pub const fn new() -> Self {
        Self {
            epoch_at_boot: AtomicU32::new(Timestamp::UNSET_RAW),
        }
    }

    /// Anchors the clock to `epoch` observed at `uptime`.
    ///
    /// Returns `false` when `epoch` lies before boot and was ignored.
    pub fn synchronise(&self, epoch: Timestamp, uptime: Uptime) -> bool {
        let Some(anchor) = epoch.secs().checked_sub(uptime_secs(uptime)) else {
            return false;
        };
        if anchor == Timestamp::UNSET_RAW {
            return false;
        }
        self.epoch_at_boot.store(anchor, Ordering::Relaxed);
        true
    }

    pub fn is_synchronised(&self) -> bool {
        self.epoch_at_boot.load(Ordering::Relaxed) != Timestamp::UNSET_RAW
    }

    pub fn now(&self, uptime: Uptime) -> Option<Timestamp> {
        let anchor = Timestamp::from_raw(self.epoch_at_boot.load(Ordering::Relaxed))?;
        let secs = anchor.secs().saturating_add(uptime_secs(uptime));
        Some(Timestamp::from_secs(secs))
    }
}

/// Converts a core duration into an embassy one, saturating at the maximum.
pub fn embassy_duration(duration: core::time::Duration) -> embassy_time::Duration {
    embassy_time::Duration::try_from(duration).unwrap_or(embassy_time::Duration::MAX)
}

fn uptime_secs(uptime: Uptime) -> u32 {
    u32::try_from(uptime.as_millis() / 1_000).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsynchronised_clock_has_no_time() {
        let clock = WallClock::new();
        assert!(!clock.is_synchronised());
        assert_eq!(clock.now(Uptime::from_millis(5_000)), None);
    }

    #[test]
    fn readings_follow_uptime_after_sync() {
        let clock = WallClock::new();
        assert!(clock.synchronise(Timestamp::from_secs(1_700_000_100), Uptime::from_millis(100_400)));
        assert_eq!(
            clock.now(Uptime::from_millis(160_999)),
            Some(Timestamp::from_secs(1_700_000_160))
        );
    }

    #[test]
    fn converts_durations_for_timers() {
        assert_eq!(
            embassy_duration(core::time::Duration::from_millis(350)),
            embassy_time::Duration::from_millis(350)
        );
        assert_eq!(
            embassy_duration(core::time::Duration::MAX),
            embassy_time::Duration::MAX
        );
    }

    #[test]
    fn rejects_time_before_boot() {
        let clock = WallClock::new();
        assert!(!clock.synchronise(Timestamp::from_secs(10), Uptime::from_millis(60_000)));
        assert!(!clock.is_synchronised());
    }
}
