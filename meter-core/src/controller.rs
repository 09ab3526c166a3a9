//! Main-loop controller tying capture, reporting, delivery, and sleep together.
//!
//! [`MeterController`] owns the transient state that is rebuilt on every boot
//! (stay-awake deadline, retry gate, telemetry) and borrows the
//! [`SharedMeter`] that the pulse path writes concurrently. Blocking
//! platforms drive it with [`MeterController::run_pass`]; async platforms use
//! the [`begin_attempt`](MeterController::begin_attempt) /
//! [`compose`](MeterController::compose) /
//! [`finish_attempt`](MeterController::finish_attempt) steps directly and
//! perform the I/O themselves.

use core::time::Duration;

use crate::boot::{BootPlan, ResetReason, plan_boot};
use crate::capture::CaptureOutcome;
use crate::config::{ConfigError, EVENT_DATA, MeterConfig};
use crate::platform::{Clock, Platform, Sensors, Transport};
use crate::publish::{AttemptOutcome, FailureCause, PublishAttempt, PublishMachine, ensure_connected};
use crate::record::{PendingPublish, Validation};
use crate::remote::{Antenna, RESULT_OK, RemoteCall, RemoteError};
use crate::report::{AttemptContext, AttemptTelemetry, ReportBuffer, ReportError, format_report};
use crate::shared::SharedMeter;
use crate::sleep::{SleepInputs, StayAwake, calc_sleep_time};
use crate::telemetry::{MeterEventKind, MeterPayload, TelemetryRecorder, saturate_u8};
use crate::time::{Timestamp, Uptime};

/// Reply to a remote call.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RemoteReply {
    /// Result code returned to the caller.
    pub code: i32,
    /// Antenna selection the caller must forward to the radio.
    pub antenna: Option<Antenna>,
}

/// What a scheduler pass did.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct PassOutcome {
    pub attempt: Option<AttemptOutcome>,
    pub slept: Option<Duration>,
}

/// Main-loop state for one boot of the meter.
pub struct MeterController<'a, const N: usize> {
    meter: &'a SharedMeter<N>,
    config: MeterConfig,
    boot_plan: BootPlan,
    stay_awake: StayAwake,
    publish: PublishMachine,
    telemetry: TelemetryRecorder,
}

impl<'a, const N: usize> MeterController<'a, N> {
    /// Starts a controller after the record has been validated.
    ///
    /// `validation` is the result of restoring or validating the record;
    /// the boot plan for `reason` is applied immediately.
    pub fn boot(
        meter: &'a SharedMeter<N>,
        config: MeterConfig,
        reason: ResetReason,
        validation: Validation,
        uptime: Uptime,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut controller = Self {
            meter,
            config,
            boot_plan: BootPlan::default(),
            stay_awake: StayAwake::new(),
            publish: PublishMachine::new(&config),
            telemetry: TelemetryRecorder::new(),
        };

        if let Validation::Reinitialized(fault) = validation {
            controller.telemetry.record(
                MeterEventKind::RecordReinitialized,
                MeterPayload::Integrity(fault),
                uptime,
            );
        }

        let plan = plan_boot(reason, &config);
        if let Some(window) = plan.stay_awake {
            controller.stay_awake.extend(uptime, window);
        }
        controller.boot_plan = plan;
        controller.telemetry.record(
            MeterEventKind::BootPlanApplied(reason),
            MeterPayload::Boot(plan),
            uptime,
        );

        Ok(controller)
    }

    #[must_use]
    pub const fn config(&self) -> &MeterConfig {
        &self.config
    }

    #[must_use]
    pub const fn meter(&self) -> &'a SharedMeter<N> {
        self.meter
    }

    #[must_use]
    pub const fn boot_plan(&self) -> BootPlan {
        self.boot_plan
    }

    #[must_use]
    pub const fn publish_machine(&self) -> &PublishMachine {
        &self.publish
    }

    #[must_use]
    pub const fn stay_awake(&self) -> StayAwake {
        self.stay_awake
    }

    #[must_use]
    pub const fn telemetry(&self) -> &TelemetryRecorder {
        &self.telemetry
    }

    /// Returns `true` while the fault indicator should be lit.
    #[must_use]
    pub const fn is_faulted(&self) -> bool {
        self.publish.is_faulted()
    }

    /// Keeps the device awake for at least `duration` from `uptime`.
    pub fn extend_stay_awake(&mut self, uptime: Uptime, duration: Duration) {
        self.stay_awake.extend(uptime, duration);
    }

    /// Logs the outcome of a debounce window from the pulse path.
    pub fn record_capture(&mut self, outcome: CaptureOutcome, uptime: Uptime) {
        self.telemetry.record_capture(outcome, uptime);
    }

    /// Returns `true` when a publish is both scheduled and allowed at `now`.
    #[must_use]
    pub fn needs_publish(&self, now: Option<Timestamp>) -> bool {
        now.is_some_and(|now| {
            self.meter.next_publish_time(&self.config).is_due(now) && self.publish.gate_open(now)
        })
    }

    /// Returns the snapshot to deliver, freezing a new one if needed.
    ///
    /// Returns `None` when nothing is due at `now`.
    pub fn begin_attempt(&mut self, now: Timestamp, uptime: Uptime) -> Option<PendingPublish> {
        if !self.needs_publish(Some(now)) {
            return None;
        }
        let snapshot = self
            .meter
            .take_snapshot(now, self.config.max_pulse_times_per_report);
        if snapshot.fresh {
            self.telemetry.record(
                MeterEventKind::SnapshotTaken,
                MeterPayload::Snapshot {
                    captured_at: snapshot.pending.captured_at,
                    pulse_count: snapshot.pending.pulse_count,
                    pulse_times: saturate_u8(snapshot.pending.pulse_times.len()),
                },
                uptime,
            );
        }
        Some(snapshot.pending)
    }

    /// Formats `pending` with this attempt's telemetry.
    pub fn compose(
        &self,
        pending: PendingPublish,
        attempt_at: Timestamp,
        telemetry: &AttemptTelemetry,
    ) -> Result<PublishAttempt, ReportError> {
        let basis = self.meter.report_basis();
        let context = AttemptContext {
            attempt_at,
            retries: self.publish.retries(),
        };
        let mut payload = ReportBuffer::new();
        let summary = format_report(&pending, &basis, &context, telemetry, &mut payload)?;
        Ok(PublishAttempt {
            pending,
            attempt_at,
            sequence: basis.next_sequence(),
            payload,
            summary,
        })
    }

    /// Applies the result of an attempt: commit on acknowledgement, back off otherwise.
    pub fn finish_attempt(
        &mut self,
        result: Result<&PublishAttempt, FailureCause>,
        now: Timestamp,
        uptime: Uptime,
    ) -> AttemptOutcome {
        let outcome = match result {
            Ok(attempt) => {
                self.publish.on_success(now);
                match self.meter.commit_publish(&attempt.pending) {
                    Ok(sequence) => AttemptOutcome::Delivered {
                        sequence,
                        summary: attempt.summary,
                    },
                    Err(_) => AttemptOutcome::Superseded,
                }
            }
            Err(cause) => {
                let retry_in = self.publish.on_failure(now);
                AttemptOutcome::Failed {
                    cause,
                    retry_in,
                    failures: self.publish.retries(),
                }
            }
        };
        self.telemetry.record_attempt(outcome, uptime);
        outcome
    }

    /// Runs one blocking delivery attempt if a publish is due.
    ///
    /// With no valid wall clock the link is brought up so the platform can
    /// synchronise time, and no attempt is made.
    pub fn service_publish<P>(&mut self, platform: &mut P) -> Option<AttemptOutcome>
    where
        P: Clock + Transport + Sensors + ?Sized,
    {
        let Some(now) = platform.now() else {
            // Failures here are retried on the next pass.
            let _ = ensure_connected(platform, &self.config);
            return None;
        };
        let pending = self.begin_attempt(now, platform.uptime())?;

        let result = self.deliver(platform, pending, now);
        let finished_at = platform.now().unwrap_or(now);
        Some(self.finish_attempt(result.as_ref().map_err(|cause| *cause), finished_at, platform.uptime()))
    }

    fn deliver<P>(
        &mut self,
        platform: &mut P,
        pending: PendingPublish,
        started_at: Timestamp,
    ) -> Result<PublishAttempt, FailureCause>
    where
        P: Clock + Transport + Sensors + ?Sized,
    {
        ensure_connected(platform, &self.config)?;

        let telemetry = platform.read_telemetry();
        let attempt_at = platform.now().unwrap_or(started_at);
        let attempt = self
            .compose(pending, attempt_at, &telemetry)
            .map_err(|_| FailureCause::ReportOverflow)?;

        if platform.publish(EVENT_DATA, &attempt.payload, true) {
            Ok(attempt)
        } else {
            Err(FailureCause::NotAcknowledged)
        }
    }

    /// Computes how long it is safe to sleep.
    #[must_use]
    pub fn sleep_time(
        &self,
        debounce_active: bool,
        uptime: Uptime,
        now: Option<Timestamp>,
    ) -> Duration {
        let inputs = SleepInputs {
            debounce_active,
            pulses_to_signal: self.meter.pulses_to_signal(),
            uptime,
            stay_awake: self.stay_awake,
            now,
            next_publish: self.meter.next_publish_time(&self.config),
            earliest_next_attempt: self.publish.earliest_next_attempt(),
        };
        calc_sleep_time(&inputs, self.config.min_sleep)
    }

    /// Logs that the device is about to suspend for `sleep`.
    pub fn enter_sleep(&mut self, sleep: Duration, uptime: Uptime) {
        self.telemetry
            .record(MeterEventKind::SleepEntered, MeterPayload::Sleep(sleep), uptime);
    }

    /// One scheduler pass: publish if due, then sleep if nothing keeps the device awake.
    ///
    /// The sleep time is recomputed after shutting the link down, since pulses
    /// may arrive while disconnecting.
    pub fn run_pass<P: Platform + ?Sized>(&mut self, platform: &mut P) -> PassOutcome {
        let attempt = self.service_publish(platform);

        let planned = self.sleep_time(platform.debounce_active(), platform.uptime(), platform.now());
        if planned.is_zero() {
            return PassOutcome {
                attempt,
                slept: None,
            };
        }

        platform.disconnect(self.config.disconnect_timeout);
        let sleep = self.sleep_time(platform.debounce_active(), platform.uptime(), platform.now());
        if sleep.is_zero() {
            return PassOutcome {
                attempt,
                slept: None,
            };
        }

        self.enter_sleep(sleep, platform.uptime());
        platform.suspend(sleep);
        PassOutcome {
            attempt,
            slept: Some(sleep),
        }
    }

    /// Applies a parsed (or rejected) remote call.
    pub fn handle_remote(
        &mut self,
        call: Result<RemoteCall, RemoteError>,
        now: Option<Timestamp>,
        uptime: Uptime,
    ) -> RemoteReply {
        let reply = match call {
            Err(error) => {
                self.telemetry.record(
                    MeterEventKind::RemoteCallRejected,
                    MeterPayload::Remote {
                        result: error.code(),
                    },
                    uptime,
                );
                return RemoteReply {
                    code: error.code(),
                    antenna: None,
                };
            }
            Ok(RemoteCall::SetReading(reading)) => {
                self.meter.set_reading(reading, now);
                self.publish.reset();
                RemoteReply {
                    code: RESULT_OK,
                    antenna: None,
                }
            }
            Ok(RemoteCall::PublishNow) => {
                self.meter.request_publish();
                RemoteReply {
                    code: RESULT_OK,
                    antenna: None,
                }
            }
            Ok(RemoteCall::SleepNow) => {
                self.stay_awake.clear();
                RemoteReply {
                    code: RESULT_OK,
                    antenna: None,
                }
            }
            Ok(RemoteCall::SelectAntenna(antenna)) => RemoteReply {
                code: RESULT_OK,
                antenna: Some(antenna),
            },
        };

        if let Ok(call) = call {
            self.telemetry.record(
                MeterEventKind::RemoteCallHandled(call.function()),
                MeterPayload::Remote { result: reply.code },
                uptime,
            );
        }
        reply
    }

    /// Parses, applies, and forwards a remote call on a blocking platform.
    pub fn dispatch_remote<P>(&mut self, name: &str, argument: &str, platform: &mut P) -> i32
    where
        P: Clock + Transport + ?Sized,
    {
        let call = RemoteCall::parse(name, argument);
        let reply = self.handle_remote(call, platform.now(), platform.uptime());
        if let Some(antenna) = reply.antenna {
            platform.select_antenna(antenna);
        }
        reply.code
    }
}
