//! Collaborator traits implemented by the firmware and the emulator.
//!
//! All calls are blocking and bounded: the transport waits at most the
//! timeout it is handed, and `suspend` returns on timeout or on a pulse edge.

use core::time::Duration;

use crate::remote::Antenna;
use crate::report::{AttemptTelemetry, SignalQuality};

pub use crate::time::Clock;

/// Wireless link and cloud session.
pub trait Transport {
    fn is_link_ready(&mut self) -> bool;

    /// Starts the link and waits up to `timeout` for it to come up.
    fn connect_link(&mut self, timeout: Duration) -> bool;

    fn is_session_ready(&mut self) -> bool;

    /// Starts the cloud session and waits up to `timeout` for it to come up.
    fn connect_session(&mut self, timeout: Duration) -> bool;

    /// Shuts the session and link down gracefully within `timeout`.
    fn disconnect(&mut self, timeout: Duration);

    /// Sends one event, returning `true` only once it was acknowledged (when requested).
    fn publish(&mut self, event: &str, payload: &str, require_ack: bool) -> bool;

    fn select_antenna(&mut self, antenna: Antenna);
}

/// Attempt-time telemetry sources. Any reading may be unavailable.
pub trait Sensors {
    fn signal_quality(&mut self) -> Option<SignalQuality>;

    fn battery_voltage(&mut self) -> Option<f32>;

    fn battery_charge(&mut self) -> Option<f32>;

    fn read_telemetry(&mut self) -> AttemptTelemetry {
        AttemptTelemetry {
            signal: self.signal_quality(),
            battery_voltage: self.battery_voltage(),
            battery_charge: self.battery_charge(),
        }
    }
}

/// Low-power suspend primitive.
pub trait LowPower {
    /// Suspends until `duration` elapses or the pulse input sees an edge.
    fn suspend(&mut self, duration: Duration);
}

/// View of the interrupt-side pulse state the scheduler must respect.
pub trait PulseMonitor {
    /// Returns `true` while a debounce window is open.
    fn debounce_active(&self) -> bool;
}

/// Everything a scheduler pass needs from the platform.
pub trait Platform: Clock + Transport + Sensors + LowPower + PulseMonitor {}

impl<T> Platform for T where T: Clock + Transport + Sensors + LowPower + PulseMonitor {}
