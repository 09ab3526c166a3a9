//! Publish trigger decision and usage-report formatting.
//!
//! A report is built in two stages. The snapshot (count, capture time, and
//! the oldest backlog timestamps) is frozen once by
//! [`SharedMeter::take_snapshot`](crate::shared::SharedMeter::take_snapshot)
//! and retried verbatim. Formatting happens on every attempt and mixes that
//! frozen snapshot with attempt-time telemetry into a compact JSON object.

use core::fmt::{self, Write as _};

use heapless::String;

use crate::config::{FIRMWARE_VERSION, MAX_EVENT_DATA_LENGTH, MeterConfig, TRUNCATION_MARGIN};
use crate::record::{PendingPublish, PersistentRecord};
use crate::time::Timestamp;

/// Bounded buffer holding one formatted report.
pub type ReportBuffer = String<MAX_EVENT_DATA_LENGTH>;

/// When the next publish should happen.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PublishDue {
    Immediately,
    At(Timestamp),
}

impl PublishDue {
    /// Returns `true` when a publish is due at `now`.
    #[must_use]
    pub fn is_due(self, now: Timestamp) -> bool {
        match self {
            PublishDue::Immediately => true,
            PublishDue::At(deadline) => now >= deadline,
        }
    }

    /// Resolves the decision into an absolute deadline.
    #[must_use]
    pub fn deadline(self, now: Timestamp) -> Timestamp {
        match self {
            PublishDue::Immediately => now,
            PublishDue::At(deadline) => deadline,
        }
    }
}

impl fmt::Display for PublishDue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishDue::Immediately => f.write_str("immediately"),
            PublishDue::At(deadline) => write!(f, "at {deadline}"),
        }
    }
}

/// Decides when the next publish is due for `record`.
///
/// A pending snapshot or an explicit request publishes immediately, as does a
/// backlog that is full or already holds a full report's worth of pulses.
/// Otherwise the heartbeat deadline applies, tightened by the in-use interval
/// measured from the oldest unreported pulse.
#[must_use]
pub fn calc_next_publish_time<const N: usize>(
    record: &PersistentRecord<N>,
    publish_immediately: bool,
    config: &MeterConfig,
) -> PublishDue {
    if record.pending().is_some() || publish_immediately {
        return PublishDue::Immediately;
    }

    let backlog = record.backlog();
    if backlog.is_full() || backlog.len() >= config.max_pulse_times_per_report {
        return PublishDue::Immediately;
    }

    let last = record.last_publish_time().unwrap_or_default();
    let heartbeat = last + config.heartbeat_interval;
    match backlog.first() {
        Some(oldest) => PublishDue::At(heartbeat.min(oldest + config.in_use_interval)),
        None => PublishDue::At(heartbeat),
    }
}

/// Confirmed-publish fields a report is encoded against.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ReportBasis {
    pub last_publish_time: Option<Timestamp>,
    pub last_publish_pulse_count: u32,
    pub publish_count: u32,
}

impl ReportBasis {
    pub(crate) fn from_record<const N: usize>(record: &PersistentRecord<N>) -> Self {
        Self {
            last_publish_time: record.last_publish_time(),
            last_publish_pulse_count: record.last_publish_pulse_count(),
            publish_count: record.publish_count(),
        }
    }

    /// Sequence number the pending snapshot will carry once acknowledged.
    #[must_use]
    pub const fn next_sequence(&self) -> u32 {
        self.publish_count.wrapping_add(1)
    }
}

/// Radio signal reading taken at attempt time.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SignalQuality {
    pub strength_dbm: f32,
    pub quality_db: f32,
    pub strength_percent: f32,
    pub quality_percent: f32,
}

/// Telemetry gathered for a single attempt; absent readings are omitted.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct AttemptTelemetry {
    pub signal: Option<SignalQuality>,
    pub battery_voltage: Option<f32>,
    pub battery_charge: Option<f32>,
}

/// Attempt-specific values that are not part of the frozen snapshot.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct AttemptContext {
    pub attempt_at: Timestamp,
    /// Failed attempts already made for this snapshot.
    pub retries: u32,
}

/// Outcome of formatting a report.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ReportSummary {
    pub len: usize,
    pub deltas_written: usize,
    /// `true` when the delta array was cut short to fit the buffer.
    pub truncated: bool,
}

/// Report formatting failures.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ReportError {
    /// The fixed fields alone do not fit the output buffer.
    Overflow,
}

impl fmt::Display for ReportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportError::Overflow => f.write_str("report header exceeds message ceiling"),
        }
    }
}

impl From<fmt::Error> for ReportError {
    fn from(_: fmt::Error) -> Self {
        ReportError::Overflow
    }
}

/// Formats `pending` into `out`, replacing its previous contents.
///
/// Pulse times are delta encoded: the first relative to the last confirmed
/// publish (or to itself when nothing has been published yet), each later one
/// relative to its predecessor. Deltas stop being appended once the buffer
/// has less than [`TRUNCATION_MARGIN`] bytes of headroom left.
pub fn format_report<const CAP: usize>(
    pending: &PendingPublish,
    basis: &ReportBasis,
    attempt: &AttemptContext,
    telemetry: &AttemptTelemetry,
    out: &mut String<CAP>,
) -> Result<ReportSummary, ReportError> {
    out.clear();

    let origin = basis
        .last_publish_time
        .or_else(|| pending.pulse_times.first().copied())
        .unwrap_or(pending.captured_at);
    let usage = pending
        .pulse_count
        .wrapping_sub(basis.last_publish_pulse_count);

    write!(
        out,
        "{{\"t\":{},\"at\":{},\"seq\":{},\"per\":{},\"cur\":{},\"lst\":{},\"use\":{}",
        pending.captured_at,
        attempt.attempt_at,
        basis.next_sequence(),
        pending.captured_at.delta_since(origin),
        pending.pulse_count,
        basis.last_publish_pulse_count,
        usage,
    )?;

    if let Some(signal) = telemetry.signal {
        write_float(out, "sig", signal.strength_dbm, 1)?;
        write_float(out, "snr", signal.quality_db, 1)?;
        write_float(out, "sgp", signal.strength_percent, 1)?;
        write_float(out, "sqp", signal.quality_percent, 1)?;
    }
    if let Some(volts) = telemetry.battery_voltage {
        write_float(out, "btv", volts, 3)?;
    }
    if let Some(charge) = telemetry.battery_charge {
        write_float(out, "btp", charge, 1)?;
    }
    write!(out, ",\"try\":{},\"v\":\"{}\",\"pts\":[", attempt.retries, FIRMWARE_VERSION)?;

    let mut previous = origin;
    let mut deltas_written = 0;
    let mut truncated = false;
    for &pulse in &pending.pulse_times {
        if CAP - out.len() < TRUNCATION_MARGIN {
            truncated = true;
            break;
        }
        if deltas_written > 0 {
            out.push(',').map_err(|_| ReportError::Overflow)?;
        }
        write!(out, "{}", pulse.delta_since(previous))?;
        previous = pulse;
        deltas_written += 1;
    }
    out.push_str("]}").map_err(|_| ReportError::Overflow)?;

    Ok(ReportSummary {
        len: out.len(),
        deltas_written,
        truncated,
    })
}

fn write_float<const CAP: usize>(
    out: &mut String<CAP>,
    key: &str,
    value: f32,
    precision: usize,
) -> fmt::Result {
    if value.is_finite() {
        write!(out, ",\"{key}\":{value:.precision$}")
    } else {
        Ok(())
    }
}
