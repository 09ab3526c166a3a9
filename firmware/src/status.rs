#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Shared status flags for the firmware target.
//!
//! The pulse, signal, and control tasks exchange a handful of booleans that
//! do not belong in the durable record. Atomics keep them readable from any
//! task without a lock.

use portable_atomic::{AtomicBool, AtomicU32, Ordering};

/// Set while the pulse task has a debounce window open.
static DEBOUNCE_ACTIVE: AtomicBool = AtomicBool::new(false);
/// Mirrors the publish machine's fault indicator.
static FAULTED: AtomicBool = AtomicBool::new(false);
/// Tracks whether the modem reports the link as attached.
static LINK_UP: AtomicBool = AtomicBool::new(false);
/// Edges rejected as bounces since boot.
static BOUNCES: AtomicU32 = AtomicU32::new(0);

pub fn set_debounce_active(active: bool) {
    DEBOUNCE_ACTIVE.store(active, Ordering::Release);
}

pub fn debounce_active() -> bool {
    DEBOUNCE_ACTIVE.load(Ordering::Acquire)
}

pub fn set_faulted(faulted: bool) {
    FAULTED.store(faulted, Ordering::Relaxed);
}

pub fn faulted() -> bool {
    FAULTED.load(Ordering::Relaxed)
}

pub fn set_link_up(up: bool) {
    LINK_UP.store(up, Ordering::Relaxed);
}

pub fn link_up() -> bool {
    LINK_UP.load(Ordering::Relaxed)
}

/// Counts one rejected edge and returns the running total.
pub fn record_bounce() -> u32 {
    BOUNCES.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
}

pub fn bounces() -> u32 {
    BOUNCES.load(Ordering::Relaxed)
}
