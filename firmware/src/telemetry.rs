//! Log mirror for the controller's telemetry ring.
//!
//! The ring itself lives in `meter-core`. The firmware drains new records
//! after every scheduler pass and mirrors them to defmt on target or stdout
//! on the host, noting how many records were overwritten before they could be
//! drained.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

use meter_core::telemetry::{EventId, TelemetryRecord, TelemetryRecorder};

/// Tracks which telemetry records have already been logged.
pub struct TelemetryCursor {
    next: EventId,
}

impl TelemetryCursor {
    pub const fn new() -> Self {
        Self { next: 0 }
    }

    /// Logs every record added since the previous drain.
    ///
    /// Returns the number of records logged.
    pub fn drain<const CAP: usize>(&mut self, recorder: &TelemetryRecorder<CAP>) -> usize {
        self.drain_with(recorder, log_record)
    }

    fn drain_with<const CAP: usize>(
        &mut self,
        recorder: &TelemetryRecorder<CAP>,
        mut sink: impl FnMut(&TelemetryRecord),
    ) -> usize {
        let mut logged = 0;
        for record in recorder.since(self.next) {
            if logged == 0 && record.id != self.next {
                emit_gap(record.id.wrapping_sub(self.next));
            }
            sink(record);
            logged += 1;
        }
        self.next = recorder.next_id();
        logged
    }
}

fn log_record(record: &TelemetryRecord) {
    emit_log(record);
}

#[cfg(target_os = "none")]
fn emit_log(record: &TelemetryRecord) {
    defmt::info!("telemetry:meter {}", defmt::Display2Format(record));
}

#[cfg(not(target_os = "none"))]
fn emit_log(record: &TelemetryRecord) {
    println!("telemetry:meter {record}");
}

#[cfg(target_os = "none")]
fn emit_gap(missed: u32) {
    defmt::warn!("telemetry:meter {} records overwritten before drain", missed);
}

#[cfg(not(target_os = "none"))]
fn emit_gap(missed: u32) {
    println!("telemetry:meter {missed} records overwritten before drain");
}
