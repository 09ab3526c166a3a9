//! Reset-reason handling at boot.

use core::fmt;
use core::time::Duration;

use crate::config::MeterConfig;

/// Why the device last started.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ResetReason {
    /// Physical reset button.
    PinReset,
    /// Power reapplied after a full loss.
    PowerDown,
    /// Wake from low-power sleep.
    WakeFromSleep,
    FirmwareUpdate,
    Other,
}

impl ResetReason {
    #[must_use]
    pub const fn to_raw(self) -> u8 {
        match self {
            ResetReason::PinReset => 0x01,
            ResetReason::PowerDown => 0x02,
            ResetReason::WakeFromSleep => 0x03,
            ResetReason::FirmwareUpdate => 0x04,
            ResetReason::Other => 0xFF,
        }
    }

    #[must_use]
    pub const fn from_raw(value: u8) -> Self {
        match value {
            0x01 => ResetReason::PinReset,
            0x02 => ResetReason::PowerDown,
            0x03 => ResetReason::WakeFromSleep,
            0x04 => ResetReason::FirmwareUpdate,
            _ => ResetReason::Other,
        }
    }
}

impl fmt::Display for ResetReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ResetReason::PinReset => "pin reset",
            ResetReason::PowerDown => "power down",
            ResetReason::WakeFromSleep => "wake from sleep",
            ResetReason::FirmwareUpdate => "firmware update",
            ResetReason::Other => "other",
        };
        f.write_str(label)
    }
}

/// Actions to take once the record has been validated.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct BootPlan {
    /// Keep the device awake for this long after boot.
    pub stay_awake: Option<Duration>,
    /// Ask the fuel gauge to restart its state-of-charge estimate.
    pub recalibrate_fuel_gauge: bool,
}

/// Derives the boot actions for `reason`.
#[must_use]
pub fn plan_boot(reason: ResetReason, config: &MeterConfig) -> BootPlan {
    match reason {
        ResetReason::PinReset => BootPlan {
            stay_awake: Some(config.reset_stay_awake),
            recalibrate_fuel_gauge: false,
        },
        ResetReason::PowerDown => BootPlan {
            stay_awake: None,
            recalibrate_fuel_gauge: true,
        },
        ResetReason::WakeFromSleep | ResetReason::FirmwareUpdate | ResetReason::Other => {
            BootPlan::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pin_reset_opens_diagnostics_window() {
        let plan = plan_boot(ResetReason::PinReset, &MeterConfig::new());
        assert_eq!(plan.stay_awake, Some(Duration::from_secs(300)));
        assert!(!plan.recalibrate_fuel_gauge);
    }

    #[test]
    fn power_down_recalibrates_gauge() {
        let plan = plan_boot(ResetReason::PowerDown, &MeterConfig::new());
        assert_eq!(plan.stay_awake, None);
        assert!(plan.recalibrate_fuel_gauge);
    }

    #[test]
    fn sleep_wake_takes_no_action() {
        assert_eq!(
            plan_boot(ResetReason::WakeFromSleep, &MeterConfig::new()),
            BootPlan::default()
        );
    }
}
