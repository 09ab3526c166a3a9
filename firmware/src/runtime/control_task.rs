//! Scheduler loop: remote calls, publishing, persistence, and sleep.
//!
//! The loop performs the same steps as the blocking controller pass, but the
//! radio and fuel gauge I/O is awaited here and the controller is only asked
//! for the decisions in between.

use core::time::Duration;

use embassy_futures::select::{Either, select};
use embassy_time::Timer;
use meter_core::Timestamp;
use meter_core::config::EVENT_DATA;
use meter_core::publish::{AttemptOutcome, FailureCause, PublishAttempt};
use meter_core::record::PendingPublish;
use meter_core::report::AttemptTelemetry;

use super::{CAPTURES, CLOCK, CaptureEvent, Controller, METER, Modem, retained, uptime};
use crate::clock::embassy_duration;
use crate::fuel_gauge::FuelGauge;
use crate::status;
use crate::telemetry::TelemetryCursor;

/// Interval between checks while something keeps the device awake.
const AWAKE_POLL: Duration = Duration::from_secs(1);

#[embassy_executor::task]
pub async fn run(
    mut controller: Controller,
    mut modem: Modem,
    mut gauge: FuelGauge<'static>,
) -> ! {
    let mut cursor = TelemetryCursor::new();
    if controller.boot_plan().recalibrate_fuel_gauge {
        gauge.quick_start();
    }

    loop {
        drain_captures(&mut controller);
        serve_calls(&mut controller, &mut modem).await;

        if let Some(outcome) = service_publish(&mut controller, &mut modem, &mut gauge).await {
            defmt::info!("publish: {}", defmt::Display2Format(&outcome));
        }
        status::set_faulted(controller.is_faulted());
        retained::persist(&METER);
        cursor.drain(controller.telemetry());

        let planned = sleep_time(&controller);
        if planned.is_zero() {
            if modem.is_link_ready() {
                modem.listen(AWAKE_POLL).await;
            } else {
                wait_for_capture(&mut controller, AWAKE_POLL).await;
            }
            continue;
        }

        if status::link_up() {
            defmt::debug!("modem: closing link before sleep");
        }
        modem
            .disconnect(controller.config().disconnect_timeout)
            .await;
        let sleep = sleep_time(&controller);
        if sleep.is_zero() {
            continue;
        }

        defmt::info!("sleep: {}s ({} bounces since boot)", sleep.as_secs(), status::bounces());
        controller.enter_sleep(sleep, uptime());
        cursor.drain(controller.telemetry());
        wait_for_capture(&mut controller, sleep).await;
    }
}

fn sleep_time(controller: &Controller) -> Duration {
    let now = uptime();
    controller.sleep_time(status::debounce_active(), now, CLOCK.now(now))
}

/// Waits for `duration` or until the pulse task resolves a debounce window.
async fn wait_for_capture(controller: &mut Controller, duration: Duration) {
    let timeout = Timer::after(embassy_duration(duration));
    if let Either::Second(event) = select(timeout, CAPTURES.receive()).await {
        record_capture(controller, event);
    }
}

fn drain_captures(controller: &mut Controller) {
    while let Ok(event) = CAPTURES.try_receive() {
        record_capture(controller, event);
    }
}

fn record_capture(controller: &mut Controller, event: CaptureEvent) {
    controller.record_capture(event.outcome, event.at);
}

async fn serve_calls(controller: &mut Controller, modem: &mut Modem) {
    while let Some(call) = modem.take_call() {
        let now = uptime();
        let reply = controller.handle_remote(call, CLOCK.now(now), now);
        if let Some(antenna) = reply.antenna {
            modem.select_antenna(antenna).await;
        }
        modem.answer(reply.code).await;
    }
}

/// Runs one delivery attempt if a publish is due.
///
/// Without a valid wall clock the link is brought up so the network time can
/// be read, and no attempt is made.
async fn service_publish(
    controller: &mut Controller,
    modem: &mut Modem,
    gauge: &mut FuelGauge<'static>,
) -> Option<AttemptOutcome> {
    let Some(now) = CLOCK.now(uptime()) else {
        if let Err(cause) = modem.connect(controller.config(), &CLOCK).await {
            defmt::warn!("clock: link unavailable for time sync ({})", defmt::Display2Format(&cause));
        }
        return None;
    };
    let pending = controller.begin_attempt(now, uptime())?;

    let result = deliver(controller, modem, gauge, pending, now).await;
    let finished_at = CLOCK.now(uptime()).unwrap_or(now);
    Some(controller.finish_attempt(result.as_ref().map_err(|cause| *cause), finished_at, uptime()))
}

async fn deliver(
    controller: &Controller,
    modem: &mut Modem,
    gauge: &mut FuelGauge<'static>,
    pending: PendingPublish,
    started_at: Timestamp,
) -> Result<PublishAttempt, FailureCause> {
    modem.connect(controller.config(), &CLOCK).await?;

    let telemetry = AttemptTelemetry {
        signal: modem.signal_quality().await,
        battery_voltage: gauge.voltage(),
        battery_charge: gauge.charge(),
    };
    let attempt_at = CLOCK.now(uptime()).unwrap_or(started_at);
    let attempt = controller
        .compose(pending, attempt_at, &telemetry)
        .map_err(|_| FailureCause::ReportOverflow)?;

    if modem.publish(EVENT_DATA, &attempt.payload, true).await {
        Ok(attempt)
    } else {
        Err(FailureCause::NotAcknowledged)
    }
}
