use core::time::Duration;

use embassy_futures::select::select;
use embassy_stm32::gpio::{Level, Output};
use embassy_time::Timer;

use super::{METER, SIGNAL_PENDING};
use crate::clock::embassy_duration;
use crate::status;

/// How often the fault indicator is refreshed while no pulse is pending.
const FAULT_REFRESH: embassy_time::Duration = embassy_time::Duration::from_secs(1);

/// Blinks the signal LED once per committed pulse and mirrors the fault flag.
#[embassy_executor::task]
pub async fn run(
    mut led: Output<'static>,
    mut fault: Output<'static>,
    on: Duration,
    off: Duration,
) -> ! {
    let on = embassy_duration(on);
    let off = embassy_duration(off);

    loop {
        fault.set_level(Level::from(status::faulted()));

        if METER.take_signal() {
            led.set_high();
            Timer::after(on).await;
            led.set_low();
            Timer::after(off).await;
            continue;
        }

        select(SIGNAL_PENDING.wait(), Timer::after(FAULT_REFRESH)).await;
    }
}
