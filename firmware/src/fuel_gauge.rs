#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! MAX17043 single-cell fuel gauge.
//!
//! The gauge exposes big-endian 16-bit registers over I2C. `VCELL` holds a
//! 12-bit reading in its upper bits at 1.25 mV per step; `SOC` holds whole
//! percent in the high byte and 1/256 percent in the low byte.

pub const ADDRESS: u8 = 0x36;

pub const REG_VCELL: u8 = 0x02;
pub const REG_SOC: u8 = 0x04;
pub const REG_MODE: u8 = 0x06;

/// Restarts the state-of-charge estimate from the present cell voltage.
pub const QUICK_START: [u8; 3] = [REG_MODE, 0x40, 0x00];

const MILLIVOLTS_PER_STEP: f32 = 1.25;

/// Cell voltage in volts.
pub fn cell_voltage(raw: [u8; 2]) -> f32 {
    let steps = u16::from_be_bytes(raw) >> 4;
    f32::from(steps) * MILLIVOLTS_PER_STEP / 1_000.0
}

/// State of charge in percent.
pub fn state_of_charge(raw: [u8; 2]) -> f32 {
    f32::from(raw[0]) + f32::from(raw[1]) / 256.0
}

#[cfg(target_os = "none")]
pub use self::driver::FuelGauge;

#[cfg(target_os = "none")]
mod driver {
    use embassy_stm32::i2c::I2c;
    use embassy_stm32::mode::Blocking;

    use super::{ADDRESS, QUICK_START, REG_SOC, REG_VCELL, cell_voltage, state_of_charge};

    pub struct FuelGauge<'d> {
        i2c: I2c<'d, Blocking>,
    }

    impl<'d> FuelGauge<'d> {
        pub fn new(i2c: I2c<'d, Blocking>) -> Self {
            Self { i2c }
        }

        fn read_register(&mut self, register: u8) -> Option<[u8; 2]> {
            let mut raw = [0u8; 2];
            match self.i2c.blocking_write_read(ADDRESS, &[register], &mut raw) {
                Ok(()) => Some(raw),
                Err(error) => {
                    defmt::warn!("fuel gauge: read {=u8:#x} failed: {}", register, error);
                    None
                }
            }
        }

        pub fn voltage(&mut self) -> Option<f32> {
            self.read_register(REG_VCELL).map(cell_voltage)
        }

        pub fn charge(&mut self) -> Option<f32> {
            self.read_register(REG_SOC).map(state_of_charge)
        }

        pub fn quick_start(&mut self) {
            if let Err(error) = self.i2c.blocking_write(ADDRESS, &QUICK_START) {
                defmt::warn!("fuel gauge: quick-start failed: {}", error);
            }
        }
    }
}
