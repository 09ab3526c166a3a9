//! Interrupt-safe wrapper around the durable record.
//!
//! The pulse path (interrupt or debounce-timer context) and the main loop are
//! the only two writers of meter state. Both reach it through [`SharedMeter`],
//! which keeps the record and the interrupt-shared transient fields in one
//! `critical_section::Mutex` and exposes whole operations instead of fields.
//! Every method holds the critical section for a bounded amount of work and
//! never across a blocking call.

use core::cell::RefCell;

use critical_section::Mutex;

use crate::config::MeterConfig;
use crate::record::{ImageTooSmall, PendingPublish, PersistentRecord, Validation};
use crate::report::{PublishDue, ReportBasis, calc_next_publish_time};
use crate::time::Timestamp;

/// Result of committing a debounced pulse.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PulseCommit {
    /// Live counter after the increment.
    pub count: u32,
    /// `false` when the wall clock was invalid and no timestamp was recorded.
    pub timestamped: bool,
    /// Backlog entry discarded to make room, if the backlog was full.
    pub evicted: Option<Timestamp>,
}

/// Snapshot returned by [`SharedMeter::take_snapshot`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Snapshot {
    pub pending: PendingPublish,
    /// `true` when this call froze a new snapshot, `false` when one was already pending.
    pub fresh: bool,
}

/// Error returned when committing a snapshot that is no longer pending.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct StaleSnapshot;

/// Point-in-time copy of the counters for status displays.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MeterStatus {
    pub current_pulse_count: u32,
    pub last_publish_time: Option<Timestamp>,
    pub last_publish_pulse_count: u32,
    pub publish_count: u32,
    pub pending_pulse_count: Option<u32>,
    pub pending_pulse_times: usize,
    pub backlog_len: usize,
    pub pulses_to_signal: u32,
    pub publish_immediately: bool,
}

#[derive(Debug)]
struct MeterCell<const N: usize> {
    record: PersistentRecord<N>,
    pulses_to_signal: u32,
    publish_immediately: bool,
}

/// Durable record plus the transient fields touched from interrupt context.
pub struct SharedMeter<const N: usize> {
    inner: Mutex<RefCell<MeterCell<N>>>,
}

impl<const N: usize> SharedMeter<N> {
    /// Creates a meter around a zeroed record, usable in a `static`.
    #[must_use]
    pub const fn new() -> Self {
        Self::with_record(PersistentRecord::new())
    }

    /// Creates a meter around an existing record.
    #[must_use]
    pub const fn with_record(record: PersistentRecord<N>) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(MeterCell {
                record,
                pulses_to_signal: 0,
                publish_immediately: false,
            })),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut MeterCell<N>) -> R) -> R {
        critical_section::with(|cs| f(&mut self.inner.borrow_ref_mut(cs)))
    }

    /// Replaces the record with one decoded from a retained image.
    pub fn restore(&self, image: &[u8]) -> Validation {
        let (record, validation) = PersistentRecord::restore(image);
        self.with(|cell| cell.record = record);
        validation
    }

    /// Validates the in-memory record header, reinitialising it on mismatch.
    pub fn validate_or_reset(&self) -> Validation {
        self.with(|cell| cell.record.validate_or_reset())
    }

    /// Encodes the record into a retained image.
    pub fn persist(&self, image: &mut [u8]) -> Result<usize, ImageTooSmall> {
        self.with(|cell| cell.record.persist(image))
    }

    /// Commits one debounced pulse: counter, visual signal, and (with a valid clock) backlog.
    pub fn commit_pulse(&self, at: Option<Timestamp>) -> PulseCommit {
        self.with(|cell| {
            let record = &mut cell.record;
            record.current_pulse_count = record.current_pulse_count.wrapping_add(1);
            cell.pulses_to_signal = cell.pulses_to_signal.saturating_add(1);
            let evicted = at.and_then(|timestamp| record.backlog.push(timestamp));
            PulseCommit {
                count: record.current_pulse_count,
                timestamped: at.is_some(),
                evicted,
            }
        })
    }

    /// Computes when the next publish is due.
    pub fn next_publish_time(&self, config: &MeterConfig) -> PublishDue {
        self.with(|cell| calc_next_publish_time(&cell.record, cell.publish_immediately, config))
    }

    /// Returns the pending snapshot, freezing a new one first if none exists.
    ///
    /// A new snapshot captures `now`, the live count, and up to `limit` of the
    /// oldest backlog entries not later than `now`, and clears the
    /// immediate-publish request.
    pub fn take_snapshot(&self, now: Timestamp, limit: usize) -> Snapshot {
        self.with(|cell| {
            let record = &mut cell.record;
            let fresh = record.pending.is_none();
            if fresh {
                cell.publish_immediately = false;
            }
            let count = record.current_pulse_count;
            let pending = record
                .pending
                .get_or_insert_with(|| {
                    let mut pulse_times = heapless::Vec::new();
                    record.backlog.drain_into(now, limit, &mut pulse_times);
                    PendingPublish {
                        captured_at: now,
                        pulse_count: count,
                        pulse_times,
                    }
                })
                .clone();
            Snapshot { pending, fresh }
        })
    }

    /// Returns a copy of the pending snapshot, if one exists.
    pub fn pending(&self) -> Option<PendingPublish> {
        self.with(|cell| cell.record.pending.clone())
    }

    /// Reads the confirmed-publish fields a report is encoded against.
    pub fn report_basis(&self) -> ReportBasis {
        self.with(|cell| ReportBasis::from_record(&cell.record))
    }

    /// Marks `delivered` as acknowledged, returning the new publish sequence.
    ///
    /// Fails without mutation when `delivered` is not the snapshot currently
    /// pending (for example after a remote reading reset).
    pub fn commit_publish(&self, delivered: &PendingPublish) -> Result<u32, StaleSnapshot> {
        self.with(|cell| {
            let record = &mut cell.record;
            if record.pending.as_ref() != Some(delivered) {
                return Err(StaleSnapshot);
            }
            record.last_publish_time = Some(delivered.captured_at);
            record.last_publish_pulse_count = delivered.pulse_count;
            record.publish_count = record.publish_count.wrapping_add(1);
            record.pending = None;
            Ok(record.publish_count)
        })
    }

    /// Replaces the reading with a new baseline and requests an immediate publish.
    pub fn set_reading(&self, reading: u32, now: Option<Timestamp>) {
        self.with(|cell| {
            let record = &mut cell.record;
            record.current_pulse_count = reading;
            record.last_publish_pulse_count = reading;
            if now.is_some() {
                record.last_publish_time = now;
            }
            record.backlog.clear();
            record.pending = None;
            cell.publish_immediately = true;
        });
    }

    /// Requests a publish on the next scheduler pass.
    pub fn request_publish(&self) {
        self.with(|cell| cell.publish_immediately = true);
    }

    /// Consumes one pending visual signal, returning `false` when none remain.
    pub fn take_signal(&self) -> bool {
        self.with(|cell| {
            if cell.pulses_to_signal == 0 {
                false
            } else {
                cell.pulses_to_signal -= 1;
                true
            }
        })
    }

    /// Number of pulses still waiting to be signalled.
    pub fn pulses_to_signal(&self) -> u32 {
        self.with(|cell| cell.pulses_to_signal)
    }

    /// Copies the counters for display.
    pub fn status(&self) -> MeterStatus {
        self.with(|cell| {
            let record = &cell.record;
            MeterStatus {
                current_pulse_count: record.current_pulse_count,
                last_publish_time: record.last_publish_time,
                last_publish_pulse_count: record.last_publish_pulse_count,
                publish_count: record.publish_count,
                pending_pulse_count: record.pending.as_ref().map(|p| p.pulse_count),
                pending_pulse_times: record.pending.as_ref().map_or(0, |p| p.pulse_times.len()),
                backlog_len: record.backlog.len(),
                pulses_to_signal: cell.pulses_to_signal,
                publish_immediately: cell.publish_immediately,
            }
        })
    }
}

impl<const N: usize> Default for SharedMeter<N> {
    fn default() -> Self {
        Self::new()
    }
}
