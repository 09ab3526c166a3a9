#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Reset-cause classification for the STM32G0.
//!
//! `RCC_CSR` latches one flag per reset source until software clears it with
//! `RMVF`; `PWR_SR1.SBF` marks a wake from standby. The raw words are decoded
//! here so the mapping can be tested off-target.

use meter_core::boot::ResetReason;

/// Option-byte loader reset.
pub const CSR_OBLRSTF: u32 = 1 << 25;
/// NRST pin reset.
pub const CSR_PINRSTF: u32 = 1 << 26;
/// Brown-out or power-on reset.
pub const CSR_PWRRSTF: u32 = 1 << 27;
/// Software reset (`SYSRESETREQ`), issued only by the update path.
pub const CSR_SFTRSTF: u32 = 1 << 28;
pub const CSR_IWDGRSTF: u32 = 1 << 29;
pub const CSR_WWDGRSTF: u32 = 1 << 30;
pub const CSR_LPWRRSTF: u32 = 1 << 31;
/// Write-one-to-clear for every reset flag.
pub const CSR_RMVF: u32 = 1 << 23;

/// Standby flag in `PWR_SR1`.
pub const SR1_SBF: u32 = 1 << 8;

/// Maps the latched reset flags onto a [`ResetReason`].
///
/// A power-on also latches the pin flag, so the power flag is checked first.
pub fn classify(csr: u32, sr1: u32) -> ResetReason {
    if csr & CSR_PWRRSTF != 0 {
        ResetReason::PowerDown
    } else if sr1 & SR1_SBF != 0 {
        ResetReason::WakeFromSleep
    } else if csr & CSR_SFTRSTF != 0 {
        ResetReason::FirmwareUpdate
    } else if csr & CSR_PINRSTF != 0 {
        ResetReason::PinReset
    } else {
        ResetReason::Other
    }
}

/// Reads, clears, and classifies the reset flags.
#[cfg(target_os = "none")]
pub fn take_reset_reason() -> ResetReason {
    use core::ptr;

    const RCC_CSR: *mut u32 = 0x4002_1060 as *mut u32;
    const PWR_SR1: *const u32 = 0x4000_7010 as *const u32;
    const PWR_SCR: *mut u32 = 0x4000_7018 as *mut u32;

    // SAFETY: fixed MMIO addresses from the STM32G0 reference manual; this
    // runs once at boot before any task touches RCC or PWR.
    unsafe {
        let csr = ptr::read_volatile(RCC_CSR);
        let sr1 = ptr::read_volatile(PWR_SR1);
        ptr::write_volatile(RCC_CSR, csr | CSR_RMVF);
        ptr::write_volatile(PWR_SCR, SR1_SBF);
        classify(csr, sr1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_on_wins_over_pin_flag() {
        assert_eq!(
            classify(CSR_PWRRSTF | CSR_PINRSTF, 0),
            ResetReason::PowerDown
        );
    }

    #[test]
    fn button_press_is_a_pin_reset() {
        assert_eq!(classify(CSR_PINRSTF, 0), ResetReason::PinReset);
    }

    #[test]
    fn standby_wake_and_update_are_distinguished() {
        assert_eq!(classify(CSR_PINRSTF, SR1_SBF), ResetReason::WakeFromSleep);
        assert_eq!(
            classify(CSR_SFTRSTF | CSR_PINRSTF, 0),
            ResetReason::FirmwareUpdate
        );
    }

    #[test]
    fn watchdog_resets_are_other() {
        assert_eq!(classify(CSR_IWDGRSTF, 0), ResetReason::Other);
        assert_eq!(classify(CSR_WWDGRSTF | CSR_LPWRRSTF, 0), ResetReason::Other);
        assert_eq!(classify(CSR_OBLRSTF, 0), ResetReason::Other);
    }
}
