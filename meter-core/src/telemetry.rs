//! Meter event catalog and the bounded ring that retains recent events.
//!
//! `meter-core` never logs directly. The controller records structured events
//! here; the firmware drains them to its log sink and the emulator prints
//! them on request. Each kind maps to a compact `u16` code (group in the high
//! byte, detail in the low byte) for transport over diagnostics channels.

use core::fmt;
use core::time::Duration;

use heapless::HistoryBuf;

use crate::boot::{BootPlan, ResetReason};
use crate::capture::CaptureOutcome;
use crate::publish::{AttemptOutcome, FailureCause};
use crate::record::IntegrityFault;
use crate::remote::RemoteFunction;
use crate::time::{Timestamp, Uptime};

/// Number of telemetry entries retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 64;

/// Monotonically increasing record identifier.
pub type EventId = u32;

/// Discriminated meter events.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MeterEventKind {
    RecordReinitialized,
    BootPlanApplied(ResetReason),
    PulseCommitted,
    PulseBounced,
    BacklogOverflow,
    PulseUntimed,
    SnapshotTaken,
    PublishSucceeded,
    PublishFailed(FailureCause),
    PublishSuperseded,
    RemoteCallHandled(RemoteFunction),
    RemoteCallRejected,
    SleepEntered,
    Custom(u16),
}

impl MeterEventKind {
    const RECORD_REINITIALIZED: u8 = 0x01;
    const BOOT_PLAN_APPLIED: u8 = 0x02;
    const PULSE_COMMITTED: u8 = 0x03;
    const PULSE_BOUNCED: u8 = 0x04;
    const BACKLOG_OVERFLOW: u8 = 0x05;
    const PULSE_UNTIMED: u8 = 0x06;
    const SNAPSHOT_TAKEN: u8 = 0x07;
    const PUBLISH_SUCCEEDED: u8 = 0x08;
    const PUBLISH_FAILED: u8 = 0x09;
    const PUBLISH_SUPERSEDED: u8 = 0x0A;
    const REMOTE_CALL_HANDLED: u8 = 0x0B;
    const REMOTE_CALL_REJECTED: u8 = 0x0C;
    const SLEEP_ENTERED: u8 = 0x0D;

    const fn code(group: u8, detail: u8) -> u16 {
        ((group as u16) << 8) | detail as u16
    }

    /// Encodes the event into a compact discriminant.
    #[must_use]
    pub const fn to_raw(self) -> u16 {
        match self {
            MeterEventKind::RecordReinitialized => Self::code(Self::RECORD_REINITIALIZED, 0),
            MeterEventKind::BootPlanApplied(reason) => {
                Self::code(Self::BOOT_PLAN_APPLIED, reason.to_raw())
            }
            MeterEventKind::PulseCommitted => Self::code(Self::PULSE_COMMITTED, 0),
            MeterEventKind::PulseBounced => Self::code(Self::PULSE_BOUNCED, 0),
            MeterEventKind::BacklogOverflow => Self::code(Self::BACKLOG_OVERFLOW, 0),
            MeterEventKind::PulseUntimed => Self::code(Self::PULSE_UNTIMED, 0),
            MeterEventKind::SnapshotTaken => Self::code(Self::SNAPSHOT_TAKEN, 0),
            MeterEventKind::PublishSucceeded => Self::code(Self::PUBLISH_SUCCEEDED, 0),
            MeterEventKind::PublishFailed(cause) => Self::code(Self::PUBLISH_FAILED, cause.to_raw()),
            MeterEventKind::PublishSuperseded => Self::code(Self::PUBLISH_SUPERSEDED, 0),
            MeterEventKind::RemoteCallHandled(function) => {
                Self::code(Self::REMOTE_CALL_HANDLED, function.to_raw())
            }
            MeterEventKind::RemoteCallRejected => Self::code(Self::REMOTE_CALL_REJECTED, 0),
            MeterEventKind::SleepEntered => Self::code(Self::SLEEP_ENTERED, 0),
            MeterEventKind::Custom(code) => code,
        }
    }

    /// Decodes a raw discriminant, falling back to [`MeterEventKind::Custom`].
    #[must_use]
    pub fn from_raw(code: u16) -> Self {
        let [group, detail] = code.to_be_bytes();
        let decoded = match (group, detail) {
            (Self::RECORD_REINITIALIZED, 0) => Some(MeterEventKind::RecordReinitialized),
            (Self::BOOT_PLAN_APPLIED, raw) => {
                let reason = ResetReason::from_raw(raw);
                (reason.to_raw() == raw).then_some(MeterEventKind::BootPlanApplied(reason))
            }
            (Self::PULSE_COMMITTED, 0) => Some(MeterEventKind::PulseCommitted),
            (Self::PULSE_BOUNCED, 0) => Some(MeterEventKind::PulseBounced),
            (Self::BACKLOG_OVERFLOW, 0) => Some(MeterEventKind::BacklogOverflow),
            (Self::PULSE_UNTIMED, 0) => Some(MeterEventKind::PulseUntimed),
            (Self::SNAPSHOT_TAKEN, 0) => Some(MeterEventKind::SnapshotTaken),
            (Self::PUBLISH_SUCCEEDED, 0) => Some(MeterEventKind::PublishSucceeded),
            (Self::PUBLISH_FAILED, raw) => FailureCause::from_raw(raw).map(MeterEventKind::PublishFailed),
            (Self::PUBLISH_SUPERSEDED, 0) => Some(MeterEventKind::PublishSuperseded),
            (Self::REMOTE_CALL_HANDLED, raw) => {
                RemoteFunction::from_raw(raw).map(MeterEventKind::RemoteCallHandled)
            }
            (Self::REMOTE_CALL_REJECTED, 0) => Some(MeterEventKind::RemoteCallRejected),
            (Self::SLEEP_ENTERED, 0) => Some(MeterEventKind::SleepEntered),
            _ => None,
        };
        decoded.unwrap_or(MeterEventKind::Custom(code))
    }
}

impl fmt::Display for MeterEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeterEventKind::RecordReinitialized => f.write_str("record-reinitialized"),
            MeterEventKind::BootPlanApplied(reason) => write!(f, "boot ({reason})"),
            MeterEventKind::PulseCommitted => f.write_str("pulse"),
            MeterEventKind::PulseBounced => f.write_str("bounce"),
            MeterEventKind::BacklogOverflow => f.write_str("backlog-overflow"),
            MeterEventKind::PulseUntimed => f.write_str("pulse-untimed"),
            MeterEventKind::SnapshotTaken => f.write_str("snapshot"),
            MeterEventKind::PublishSucceeded => f.write_str("publish-ok"),
            MeterEventKind::PublishFailed(cause) => write!(f, "publish-failed ({cause})"),
            MeterEventKind::PublishSuperseded => f.write_str("publish-superseded"),
            MeterEventKind::RemoteCallHandled(function) => write!(f, "remote {function}"),
            MeterEventKind::RemoteCallRejected => f.write_str("remote-rejected"),
            MeterEventKind::SleepEntered => f.write_str("sleep"),
            MeterEventKind::Custom(code) => write!(f, "custom({code:#06x})"),
        }
    }
}

/// Details carried alongside an event.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MeterPayload {
    None,
    Integrity(IntegrityFault),
    Boot(BootPlan),
    Pulse {
        count: u32,
        evicted: Option<Timestamp>,
    },
    Snapshot {
        captured_at: Timestamp,
        pulse_count: u32,
        pulse_times: u8,
    },
    Publish {
        sequence: u32,
        deltas: u8,
        truncated: bool,
    },
    Retry {
        retry_in: Duration,
        failures: u32,
    },
    Remote {
        result: i32,
    },
    Sleep(Duration),
}

impl fmt::Display for MeterPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeterPayload::None => Ok(()),
            MeterPayload::Integrity(fault) => write!(f, "{fault}"),
            MeterPayload::Boot(plan) => write!(
                f,
                "stay-awake={}s recalibrate={}",
                plan.stay_awake.map_or(0, |d| d.as_secs()),
                plan.recalibrate_fuel_gauge
            ),
            MeterPayload::Pulse { count, evicted } => match evicted {
                Some(lost) => write!(f, "count={count} evicted={lost}"),
                None => write!(f, "count={count}"),
            },
            MeterPayload::Snapshot {
                captured_at,
                pulse_count,
                pulse_times,
            } => write!(f, "t={captured_at} cur={pulse_count} pts={pulse_times}"),
            MeterPayload::Publish {
                sequence,
                deltas,
                truncated,
            } => write!(f, "seq={sequence} deltas={deltas} truncated={truncated}"),
            MeterPayload::Retry { retry_in, failures } => {
                write!(f, "retry-in={}s failures={failures}", retry_in.as_secs())
            }
            MeterPayload::Remote { result } => write!(f, "result={result}"),
            MeterPayload::Sleep(duration) => write!(f, "for={}s", duration.as_secs()),
        }
    }
}

/// Telemetry record stored in the ring buffer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TelemetryRecord {
    pub id: EventId,
    pub timestamp: Uptime,
    pub event: MeterEventKind,
    pub details: MeterPayload,
}

impl fmt::Display for TelemetryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} @{} {}", self.id, self.timestamp, self.event)?;
        if self.details != MeterPayload::None {
            write!(f, " {}", self.details)?;
        }
        Ok(())
    }
}

/// Records meter events into a fixed-size ring buffer.
pub struct TelemetryRecorder<const CAPACITY: usize = TELEMETRY_RING_CAPACITY> {
    ring: HistoryBuf<TelemetryRecord, CAPACITY>,
    next_event_id: EventId,
}

impl<const CAPACITY: usize> TelemetryRecorder<CAPACITY> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            next_event_id: 0,
        }
    }

    /// Returns the recorded events in chronological order.
    pub fn oldest_first(&self) -> impl Iterator<Item = &TelemetryRecord> {
        self.ring.oldest_ordered()
    }

    #[must_use]
    pub fn latest(&self) -> Option<&TelemetryRecord> {
        self.ring.recent()
    }

    /// Returns events recorded with an id of at least `from`, oldest first.
    pub fn since(&self, from: EventId) -> impl Iterator<Item = &TelemetryRecord> {
        self.ring.oldest_ordered().filter(move |record| record.id >= from)
    }

    /// Identifier the next recorded event will receive.
    #[must_use]
    pub const fn next_id(&self) -> EventId {
        self.next_event_id
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Records an arbitrary event with the supplied payload.
    pub fn record(
        &mut self,
        event: MeterEventKind,
        details: MeterPayload,
        timestamp: Uptime,
    ) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);

        self.ring.write(TelemetryRecord {
            id,
            timestamp,
            event,
            details,
        });

        id
    }

    /// Records the outcome of a debounce window.
    pub fn record_capture(&mut self, outcome: CaptureOutcome, timestamp: Uptime) -> EventId {
        match outcome {
            CaptureOutcome::Bounce => {
                self.record(MeterEventKind::PulseBounced, MeterPayload::None, timestamp)
            }
            CaptureOutcome::Committed(commit) => {
                let details = MeterPayload::Pulse {
                    count: commit.count,
                    evicted: commit.evicted,
                };
                let event = if commit.evicted.is_some() {
                    MeterEventKind::BacklogOverflow
                } else if commit.timestamped {
                    MeterEventKind::PulseCommitted
                } else {
                    MeterEventKind::PulseUntimed
                };
                self.record(event, details, timestamp)
            }
        }
    }

    /// Records a finished delivery attempt.
    pub fn record_attempt(&mut self, outcome: AttemptOutcome, timestamp: Uptime) -> EventId {
        match outcome {
            AttemptOutcome::Delivered { sequence, summary } => self.record(
                MeterEventKind::PublishSucceeded,
                MeterPayload::Publish {
                    sequence,
                    deltas: saturate_u8(summary.deltas_written),
                    truncated: summary.truncated,
                },
                timestamp,
            ),
            AttemptOutcome::Superseded => self.record(
                MeterEventKind::PublishSuperseded,
                MeterPayload::None,
                timestamp,
            ),
            AttemptOutcome::Failed {
                cause,
                retry_in,
                failures,
            } => self.record(
                MeterEventKind::PublishFailed(cause),
                MeterPayload::Retry { retry_in, failures },
                timestamp,
            ),
        }
    }
}

impl<const CAPACITY: usize> Default for TelemetryRecorder<CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn saturate_u8(value: usize) -> u8 {
    u8::try_from(value).unwrap_or(u8::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::PulseCommit;

    #[test]
    fn event_codes_round_trip() {
        let fixtures = [
            MeterEventKind::RecordReinitialized,
            MeterEventKind::BootPlanApplied(ResetReason::PinReset),
            MeterEventKind::BootPlanApplied(ResetReason::Other),
            MeterEventKind::PulseCommitted,
            MeterEventKind::BacklogOverflow,
            MeterEventKind::PublishFailed(FailureCause::SessionTimeout),
            MeterEventKind::RemoteCallHandled(RemoteFunction::SelectAntenna),
            MeterEventKind::SleepEntered,
        ];
        for kind in fixtures {
            assert_eq!(MeterEventKind::from_raw(kind.to_raw()), kind, "{kind}");
        }
        assert_eq!(
            MeterEventKind::from_raw(0x09FF),
            MeterEventKind::Custom(0x09FF)
        );
    }

    #[test]
    fn ring_keeps_most_recent_events() {
        let mut recorder = TelemetryRecorder::<2>::new();
        for millis in [10, 20, 30] {
            recorder.record(
                MeterEventKind::PulseBounced,
                MeterPayload::None,
                Uptime::from_millis(millis),
            );
        }

        assert_eq!(recorder.len(), 2);
        let ids: heapless::Vec<EventId, 2> = recorder.oldest_first().map(|r| r.id).collect();
        assert_eq!(ids.as_slice(), &[1, 2]);
        assert_eq!(recorder.since(2).count(), 1);
        assert_eq!(recorder.next_id(), 3);
    }

    #[test]
    fn capture_outcomes_map_to_kinds() {
        let mut recorder = TelemetryRecorder::<8>::new();
        let at = Uptime::from_millis(5);

        recorder.record_capture(
            CaptureOutcome::Committed(PulseCommit {
                count: 3,
                timestamped: false,
                evicted: None,
            }),
            at,
        );
        assert_eq!(
            recorder.latest().map(|r| r.event),
            Some(MeterEventKind::PulseUntimed)
        );

        recorder.record_capture(
            CaptureOutcome::Committed(PulseCommit {
                count: 4,
                timestamped: true,
                evicted: Some(Timestamp::from_secs(1)),
            }),
            at,
        );
        let latest = recorder.latest().copied().unwrap();
        assert_eq!(latest.event, MeterEventKind::BacklogOverflow);
        assert_eq!(
            latest.details,
            MeterPayload::Pulse {
                count: 4,
                evicted: Some(Timestamp::from_secs(1))
            }
        );
    }
}
