//! Host emulator for the water meter.
//!
//! Drives `meter-core` through a simulated clock, radio, and battery so the
//! capture, publish, and sleep logic can be exercised from a prompt or a
//! script without hardware.

pub mod command;
pub mod platform;
pub mod session;
