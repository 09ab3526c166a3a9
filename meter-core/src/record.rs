//! Versioned durable record that survives resets and low-power sleep.
//!
//! The record is kept in retained RAM as an explicit byte image rather than a
//! reinterpreted struct: the platform may relocate or resize retained memory
//! across firmware updates, so every boot decodes the image and checks its
//! magic, size, and layout version. Any mismatch reinitialises every field;
//! there is no partial migration.

use core::fmt;

use heapless::Vec;

use crate::backlog::PulseBacklog;
use crate::config::MAX_PULSE_TIMES_PER_REPORT;
use crate::time::Timestamp;

/// Marker identifying a meter record ("WBOT").
pub const RECORD_MAGIC: u32 = 0x5742_4F54;

/// Bumped whenever the encoded layout changes.
pub const RECORD_LAYOUT_VERSION: u16 = 4;

const HEADER_LEN: usize = 4 + 4 + 2;
const SCALAR_FIELDS: usize = 6;
const SLOT_LEN: usize = 4;
const LENGTH_PREFIX: usize = 2;

/// Encoded image size for a record with an `n`-entry backlog.
#[must_use]
pub const fn encoded_len(n: usize) -> usize {
    HEADER_LEN
        + SCALAR_FIELDS * SLOT_LEN
        + LENGTH_PREFIX
        + MAX_PULSE_TIMES_PER_REPORT * SLOT_LEN
        + LENGTH_PREFIX
        + n * SLOT_LEN
}

/// Result of validating a record at boot.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Validation {
    Valid,
    Reinitialized(IntegrityFault),
}

impl Validation {
    #[must_use]
    pub const fn is_valid(self) -> bool {
        matches!(self, Validation::Valid)
    }
}

/// Reason a stored record was discarded.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum IntegrityFault {
    Truncated,
    BadMagic,
    SizeMismatch,
    VersionMismatch,
    LengthOutOfRange,
}

impl fmt::Display for IntegrityFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            IntegrityFault::Truncated => "image shorter than record",
            IntegrityFault::BadMagic => "magic mismatch",
            IntegrityFault::SizeMismatch => "size mismatch",
            IntegrityFault::VersionMismatch => "layout version mismatch",
            IntegrityFault::LengthOutOfRange => "sequence length out of range",
        };
        f.write_str(label)
    }
}

/// Error returned when an output image cannot hold the record.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ImageTooSmall {
    pub required: usize,
    pub provided: usize,
}

impl fmt::Display for ImageTooSmall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "record image needs {} bytes, buffer holds {}",
            self.required, self.provided
        )
    }
}

/// Report contents frozen at the start of a publish attempt.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PendingPublish {
    pub captured_at: Timestamp,
    pub pulse_count: u32,
    pub pulse_times: Vec<Timestamp, MAX_PULSE_TIMES_PER_REPORT>,
}

/// Durable meter state.
#[derive(Clone, Debug)]
pub struct PersistentRecord<const N: usize> {
    magic: u32,
    size: u32,
    layout_version: u16,
    pub(crate) current_pulse_count: u32,
    pub(crate) last_publish_time: Option<Timestamp>,
    pub(crate) last_publish_pulse_count: u32,
    pub(crate) publish_count: u32,
    pub(crate) pending: Option<PendingPublish>,
    pub(crate) backlog: PulseBacklog<N>,
}

impl<const N: usize> PersistentRecord<N> {
    /// Size of the encoded image for this record type.
    pub const ENCODED_LEN: usize = encoded_len(N);

    /// Creates a zeroed record carrying the current header.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            magic: RECORD_MAGIC,
            size: Self::ENCODED_LEN as u32,
            layout_version: RECORD_LAYOUT_VERSION,
            current_pulse_count: 0,
            last_publish_time: None,
            last_publish_pulse_count: 0,
            publish_count: 0,
            pending: None,
            backlog: PulseBacklog::new(),
        }
    }

    /// Checks the header against the compiled layout, reinitialising on mismatch.
    pub fn validate_or_reset(&mut self) -> Validation {
        match self.header_fault() {
            None => Validation::Valid,
            Some(fault) => {
                self.reinitialize();
                Validation::Reinitialized(fault)
            }
        }
    }

    fn header_fault(&self) -> Option<IntegrityFault> {
        if self.magic != RECORD_MAGIC {
            Some(IntegrityFault::BadMagic)
        } else if self.size as usize != Self::ENCODED_LEN {
            Some(IntegrityFault::SizeMismatch)
        } else if self.layout_version != RECORD_LAYOUT_VERSION {
            Some(IntegrityFault::VersionMismatch)
        } else {
            None
        }
    }

    /// Resets every field to its empty state and rewrites the header.
    pub fn reinitialize(&mut self) {
        *self = Self::new();
    }

    /// Decodes a retained image, falling back to a fresh record when it is unusable.
    #[must_use]
    pub fn restore(image: &[u8]) -> (Self, Validation) {
        match Self::decode(image) {
            Ok(record) => (record, Validation::Valid),
            Err(fault) => (Self::new(), Validation::Reinitialized(fault)),
        }
    }

    fn decode(image: &[u8]) -> Result<Self, IntegrityFault> {
        if image.len() < Self::ENCODED_LEN {
            return Err(IntegrityFault::Truncated);
        }
        let mut reader = Reader::new(image);

        let mut record = Self::new();
        record.magic = reader.u32();
        record.size = reader.u32();
        record.layout_version = reader.u16();
        if let Some(fault) = record.header_fault() {
            return Err(fault);
        }

        record.current_pulse_count = reader.u32();
        record.last_publish_time = Timestamp::from_raw(reader.u32());
        record.last_publish_pulse_count = reader.u32();
        record.publish_count = reader.u32();
        let pending_time = Timestamp::from_raw(reader.u32());
        let pending_count = reader.u32();

        let pending_len = usize::from(reader.u16());
        if pending_len > MAX_PULSE_TIMES_PER_REPORT {
            return Err(IntegrityFault::LengthOutOfRange);
        }
        let mut pulse_times = Vec::new();
        for index in 0..MAX_PULSE_TIMES_PER_REPORT {
            let raw = reader.u32();
            if index < pending_len {
                let _ = pulse_times.push(Timestamp::from_secs(raw));
            }
        }
        record.pending = pending_time.map(|captured_at| PendingPublish {
            captured_at,
            pulse_count: pending_count,
            pulse_times,
        });

        let backlog_len = usize::from(reader.u16());
        if backlog_len > N {
            return Err(IntegrityFault::LengthOutOfRange);
        }
        for index in 0..N {
            let raw = reader.u32();
            if index < backlog_len {
                record.backlog.push(Timestamp::from_secs(raw));
            }
        }

        Ok(record)
    }

    /// Writes the full image into `image`, returning the number of bytes used.
    pub fn persist(&self, image: &mut [u8]) -> Result<usize, ImageTooSmall> {
        if image.len() < Self::ENCODED_LEN {
            return Err(ImageTooSmall {
                required: Self::ENCODED_LEN,
                provided: image.len(),
            });
        }
        let mut writer = Writer::new(image);

        writer.u32(self.magic);
        writer.u32(self.size);
        writer.u16(self.layout_version);
        writer.u32(self.current_pulse_count);
        writer.u32(Timestamp::into_raw(self.last_publish_time));
        writer.u32(self.last_publish_pulse_count);
        writer.u32(self.publish_count);

        let pending = self.pending.as_ref();
        writer.u32(Timestamp::into_raw(pending.map(|p| p.captured_at)));
        writer.u32(pending.map_or(0, |p| p.pulse_count));
        let times = pending.map_or(&[][..], |p| p.pulse_times.as_slice());
        writer.sequence(times.iter().copied(), MAX_PULSE_TIMES_PER_REPORT);
        writer.sequence(self.backlog.iter().copied(), N);

        Ok(writer.position())
    }

    #[must_use]
    pub const fn current_pulse_count(&self) -> u32 {
        self.current_pulse_count
    }

    #[must_use]
    pub const fn last_publish_time(&self) -> Option<Timestamp> {
        self.last_publish_time
    }

    #[must_use]
    pub const fn last_publish_pulse_count(&self) -> u32 {
        self.last_publish_pulse_count
    }

    #[must_use]
    pub const fn publish_count(&self) -> u32 {
        self.publish_count
    }

    #[must_use]
    pub const fn pending(&self) -> Option<&PendingPublish> {
        self.pending.as_ref()
    }

    #[must_use]
    pub const fn backlog(&self) -> &PulseBacklog<N> {
        &self.backlog
    }

    #[cfg(test)]
    pub(crate) fn corrupt_header(&mut self, magic: u32, version: u16) {
        self.magic = magic;
        self.layout_version = version;
    }
}

impl<const N: usize> Default for PersistentRecord<N> {
    fn default() -> Self {
        Self::new()
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn take<const W: usize>(&mut self) -> [u8; W] {
        let mut out = [0; W];
        out.copy_from_slice(&self.bytes[self.offset..self.offset + W]);
        self.offset += W;
        out
    }

    fn u16(&mut self) -> u16 {
        u16::from_le_bytes(self.take())
    }

    fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take())
    }
}

struct Writer<'a> {
    bytes: &'a mut [u8],
    offset: usize,
}

impl<'a> Writer<'a> {
    fn new(bytes: &'a mut [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn put(&mut self, chunk: &[u8]) {
        self.bytes[self.offset..self.offset + chunk.len()].copy_from_slice(chunk);
        self.offset += chunk.len();
    }

    fn u16(&mut self, value: u16) {
        self.put(&value.to_le_bytes());
    }

    fn u32(&mut self, value: u32) {
        self.put(&value.to_le_bytes());
    }

    /// Writes a length prefix followed by exactly `slots` entries, zero padded.
    fn sequence(&mut self, values: impl Iterator<Item = Timestamp>, slots: usize) {
        let prefix_at = self.offset;
        self.u16(0);
        let mut written: u16 = 0;
        for value in values.take(slots) {
            self.u32(value.secs());
            written += 1;
        }
        for _ in usize::from(written)..slots {
            self.u32(0);
        }
        self.bytes[prefix_at..prefix_at + LENGTH_PREFIX].copy_from_slice(&written.to_le_bytes());
    }

    fn position(&self) -> usize {
        self.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Record = PersistentRecord<8>;

    fn ts(secs: u32) -> Timestamp {
        Timestamp::from_secs(secs)
    }

    fn populated() -> Record {
        let mut record = Record::new();
        record.current_pulse_count = 42;
        record.last_publish_time = Some(ts(1_000));
        record.last_publish_pulse_count = 40;
        record.publish_count = 7;
        let mut pulse_times = Vec::new();
        pulse_times.push(ts(1_010)).unwrap();
        record.pending = Some(PendingPublish {
            captured_at: ts(1_020),
            pulse_count: 41,
            pulse_times,
        });
        record.backlog.push(ts(1_030));
        record
    }

    #[test]
    fn fresh_record_validates() {
        let mut record = Record::new();
        assert_eq!(record.validate_or_reset(), Validation::Valid);
    }

    #[test]
    fn header_mismatch_reinitializes_every_field() {
        let mut record = populated();
        record.corrupt_header(RECORD_MAGIC, RECORD_LAYOUT_VERSION - 1);

        assert_eq!(
            record.validate_or_reset(),
            Validation::Reinitialized(IntegrityFault::VersionMismatch)
        );
        assert_eq!(record.current_pulse_count(), 0);
        assert!(record.pending().is_none());
        assert!(record.backlog().is_empty());
        assert_eq!(record.last_publish_time(), None);
        assert_eq!(record.validate_or_reset(), Validation::Valid);
    }

    #[test]
    fn restore_reads_back_persisted_image() {
        let record = populated();
        let mut image = [0u8; Record::ENCODED_LEN];
        assert_eq!(record.persist(&mut image), Ok(Record::ENCODED_LEN));

        let (restored, validation) = Record::restore(&image);
        assert!(validation.is_valid());
        assert_eq!(restored.current_pulse_count(), 42);
        assert_eq!(restored.last_publish_time(), Some(ts(1_000)));
        assert_eq!(restored.publish_count(), 7);
        assert_eq!(restored.pending(), record.pending());
        assert_eq!(restored.backlog().first(), Some(ts(1_030)));
    }

    #[test]
    fn blank_memory_is_reinitialized() {
        let image = [0u8; Record::ENCODED_LEN];
        let (record, validation) = Record::restore(&image);
        assert_eq!(validation, Validation::Reinitialized(IntegrityFault::BadMagic));
        assert_eq!(record.current_pulse_count(), 0);
    }

    #[test]
    fn image_from_differently_sized_build_is_rejected() {
        let mut image = [0u8; PersistentRecord::<16>::ENCODED_LEN];
        PersistentRecord::<16>::new().persist(&mut image).unwrap();

        let (_, validation) = Record::restore(&image);
        assert_eq!(validation, Validation::Reinitialized(IntegrityFault::SizeMismatch));
    }

    #[test]
    fn corrupt_length_prefix_is_rejected() {
        let mut image = [0u8; Record::ENCODED_LEN];
        populated().persist(&mut image).unwrap();
        let backlog_prefix = Record::ENCODED_LEN - 8 * SLOT_LEN - LENGTH_PREFIX;
        image[backlog_prefix..backlog_prefix + 2].copy_from_slice(&9u16.to_le_bytes());

        let (_, validation) = Record::restore(&image);
        assert_eq!(
            validation,
            Validation::Reinitialized(IntegrityFault::LengthOutOfRange)
        );
    }

    #[test]
    fn persist_rejects_short_buffer() {
        let mut image = [0u8; 4];
        assert_eq!(
            Record::new().persist(&mut image),
            Err(ImageTooSmall {
                required: Record::ENCODED_LEN,
                provided: 4,
            })
        );
    }
}
