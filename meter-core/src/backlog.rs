//! Bounded FIFO of pulse timestamps awaiting a report.
//!
//! The backlog overwrites its oldest entry when full: the live counter keeps
//! the total exact, so an overflow only costs per-pulse timing detail. None
//! of these operations are interrupt safe on their own; callers reach the
//! backlog through [`SharedMeter`](crate::shared::SharedMeter), which holds the
//! critical section.

use heapless::{Deque, Vec};

use crate::time::Timestamp;

/// Fixed-capacity pulse timestamp FIFO.
#[derive(Clone, Debug)]
pub struct PulseBacklog<const N: usize> {
    entries: Deque<Timestamp, N>,
}

impl<const N: usize> PulseBacklog<N> {
    /// Creates an empty backlog.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Deque::new(),
        }
    }

    /// Appends a timestamp, returning the entry evicted to make room, if any.
    pub fn push(&mut self, timestamp: Timestamp) -> Option<Timestamp> {
        let evicted = if self.entries.is_full() {
            self.shift()
        } else {
            None
        };
        // Cannot fail: a slot was freed above when the deque was full.
        let _ = self.entries.push_back(timestamp);
        evicted
    }

    /// Removes and returns the oldest timestamp.
    pub fn shift(&mut self) -> Option<Timestamp> {
        self.entries.pop_front()
    }

    /// Returns the oldest timestamp without removing it.
    #[must_use]
    pub fn first(&self) -> Option<Timestamp> {
        self.entries.front().copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.entries.is_full()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Iterates oldest-first.
    pub fn iter(&self) -> impl Iterator<Item = &Timestamp> {
        self.entries.iter()
    }

    /// Moves up to `limit` of the oldest entries no later than `cutoff` into `out`.
    ///
    /// Draining stops at the first entry newer than `cutoff` so FIFO order is
    /// preserved, or when `out` is full. Returns the number of entries moved.
    pub fn drain_into<const M: usize>(
        &mut self,
        cutoff: Timestamp,
        limit: usize,
        out: &mut Vec<Timestamp, M>,
    ) -> usize {
        let mut moved = 0;
        while moved < limit && !out.is_full() {
            match self.entries.front() {
                Some(&oldest) if oldest <= cutoff => {
                    self.shift();
                    let _ = out.push(oldest);
                    moved += 1;
                }
                _ => break,
            }
        }
        moved
    }
}

impl<const N: usize> Default for PulseBacklog<N> {
    fn default() -> Self {
        Self::new()
    }
}
