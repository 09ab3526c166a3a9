//! Retained-RAM image of the meter record.
//!
//! The image lives in a `NOLOAD` section that the startup code neither zeroes
//! nor initialises, so it survives pin resets, watchdog resets, and firmware
//! updates. After a power loss its contents are garbage and the record's
//! header check rejects it.

use core::mem::MaybeUninit;

use meter_core::record::{Validation, encoded_len};
use meter_core::{BACKLOG_CAPACITY, Meter};

const IMAGE_LEN: usize = encoded_len(BACKLOG_CAPACITY);

#[unsafe(link_section = ".uninit.meter_record")]
static mut RECORD_IMAGE: MaybeUninit<[u8; IMAGE_LEN]> = MaybeUninit::uninit();

/// Replaces the in-memory record with the retained one.
pub fn restore(meter: &Meter) -> Validation {
    critical_section::with(|_| {
        // SAFETY: the image is plain bytes, any bit pattern is a valid `u8`,
        // and the critical section serialises every access.
        let image = unsafe { RECORD_IMAGE.assume_init_ref() };
        meter.restore(image)
    })
}

/// Writes the current record into the retained image.
pub fn persist(meter: &Meter) {
    critical_section::with(|_| {
        // SAFETY: see `restore`.
        let image = unsafe { RECORD_IMAGE.assume_init_mut() };
        if let Err(error) = meter.persist(image) {
            defmt::error!(
                "retained: image too small ({} < {})",
                error.provided,
                error.required
            );
        }
    });
}
