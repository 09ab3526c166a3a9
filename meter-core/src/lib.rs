#![no_std]

// Pulse-counting, persistence, and publish-scheduling engine for the water meter.
//
// The crate never touches hardware or allocates. Firmware and host tooling
// supply clocks, transport, sensors, and the sleep primitive through the
// traits in `platform`, and share meter state with the pulse path through
// `shared::SharedMeter`.

pub mod backlog;
pub mod boot;
pub mod capture;
pub mod config;
pub mod controller;
pub mod platform;
pub mod publish;
pub mod record;
pub mod remote;
pub mod report;
pub mod shared;
pub mod sleep;
pub mod telemetry;
pub mod time;

pub use config::{BACKLOG_CAPACITY, MeterConfig};
pub use controller::MeterController;
pub use shared::SharedMeter;
pub use time::{Timestamp, Uptime};

/// Shared meter sized for the production backlog.
pub type Meter = SharedMeter<BACKLOG_CAPACITY>;
