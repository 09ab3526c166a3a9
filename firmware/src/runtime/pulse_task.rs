use core::time::Duration;

use embassy_futures::select::{Either, select};
use embassy_stm32::exti::ExtiInput;
use embassy_time::{Instant, Timer};
use meter_core::BACKLOG_CAPACITY;
use meter_core::capture::{CaptureOutcome, PulseCapture, SwitchLevel};

use super::{CAPTURES, CLOCK, CaptureEvent, METER, SIGNAL_PENDING, retained, uptime};
use crate::status;

/// Debounces the meter reed switch and commits confirmed closures.
///
/// Every falling edge restarts the window; the switch level sampled when the
/// window finally expires decides between a pulse and a bounce.
#[embassy_executor::task]
pub async fn run(mut switch: ExtiInput<'static>, window: Duration) -> ! {
    let mut capture = PulseCapture::<BACKLOG_CAPACITY>::new(&METER, window);

    loop {
        let Some(deadline) = capture.deadline() else {
            switch.wait_for_falling_edge().await;
            capture.on_edge(uptime());
            status::set_debounce_active(true);
            continue;
        };

        let expiry = Timer::at(Instant::from_millis(deadline.as_millis()));
        match select(expiry, switch.wait_for_falling_edge()).await {
            Either::First(()) => {
                let now = uptime();
                let level = if switch.is_low() {
                    SwitchLevel::Closed
                } else {
                    SwitchLevel::Open
                };
                if let Some(outcome) = capture.on_timer(now, level, CLOCK.now(now)) {
                    status::set_debounce_active(false);
                    report(CaptureEvent { outcome, at: now });
                }
            }
            Either::Second(()) => {
                capture.on_edge(uptime());
            }
        }
    }
}

fn report(event: CaptureEvent) {
    match event.outcome {
        CaptureOutcome::Committed(commit) => {
            retained::persist(&METER);
            SIGNAL_PENDING.signal(());
            defmt::debug!("pulse: count={} timestamped={}", commit.count, commit.timestamped);
        }
        CaptureOutcome::Bounce => {
            let bounces = status::record_bounce();
            defmt::debug!("pulse: bounce (total {})", bounces);
        }
    }

    if CAPTURES.try_send(event).is_err() {
        defmt::warn!("pulse: capture queue full, telemetry dropped");
    }
}
