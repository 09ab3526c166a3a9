//! Simulated clock, radio, battery, and sleep for the emulator.

use std::time::Duration;

use meter_core::platform::{Clock, LowPower, PulseMonitor, Sensors, Transport};
use meter_core::remote::Antenna;
use meter_core::report::SignalQuality;
use meter_core::{Timestamp, Uptime};

/// Network time at emulator uptime zero.
pub const NETWORK_EPOCH: u32 = 1_700_000_000;

/// Time the simulated radio takes to attach.
pub const LINK_LATENCY: Duration = Duration::from_secs(3);

/// Time the simulated cloud session takes to open.
pub const SESSION_LATENCY: Duration = Duration::from_secs(1);

/// Event published through the simulated transport.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Delivery {
    pub event: String,
    pub payload: String,
    pub acknowledged: bool,
}

/// In-memory stand-in for the board and its radio.
///
/// Uptime only moves when the session advances it or the controller sleeps.
/// The wall clock becomes valid once the link has attached, mirroring the
/// firmware's network time sync.
pub struct SimPlatform {
    uptime: Duration,
    clock_synced: bool,
    link_available: bool,
    acknowledge: bool,
    link_up: bool,
    session_up: bool,
    debouncing: bool,
    antenna: Antenna,
    battery_voltage: f32,
    battery_charge: f32,
    deliveries: Vec<Delivery>,
    slept: Vec<Duration>,
}

impl SimPlatform {
    #[must_use]
    pub fn new() -> Self {
        Self {
            uptime: Duration::ZERO,
            clock_synced: true,
            link_available: true,
            acknowledge: true,
            link_up: false,
            session_up: false,
            debouncing: false,
            antenna: Antenna::Automatic,
            battery_voltage: 3.92,
            battery_charge: 81.5,
            deliveries: Vec::new(),
            slept: Vec::new(),
        }
    }

    pub fn advance(&mut self, by: Duration) {
        self.uptime += by;
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.uptime
    }

    /// Simulates a reset: the radio drops and, after a power loss, the clock is lost.
    pub fn reset(&mut self, lose_clock: bool) {
        self.link_up = false;
        self.session_up = false;
        self.debouncing = false;
        if lose_clock {
            self.clock_synced = false;
        }
    }

    pub fn set_link_available(&mut self, available: bool) {
        self.link_available = available;
        if !available {
            self.link_up = false;
            self.session_up = false;
        }
    }

    pub fn set_acknowledge(&mut self, acknowledge: bool) {
        self.acknowledge = acknowledge;
    }

    pub fn set_debouncing(&mut self, debouncing: bool) {
        self.debouncing = debouncing;
    }

    #[must_use]
    pub fn link_available(&self) -> bool {
        self.link_available
    }

    #[must_use]
    pub fn acknowledges(&self) -> bool {
        self.acknowledge
    }

    #[must_use]
    pub fn link_up(&self) -> bool {
        self.link_up
    }

    #[must_use]
    pub fn antenna(&self) -> Antenna {
        self.antenna
    }

    #[must_use]
    pub fn deliveries(&self) -> &[Delivery] {
        &self.deliveries
    }

    #[must_use]
    pub fn slept(&self) -> &[Duration] {
        &self.slept
    }
}

impl Default for SimPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SimPlatform {
    fn uptime(&self) -> Uptime {
        Uptime::from_millis(u64::try_from(self.uptime.as_millis()).unwrap_or(u64::MAX))
    }

    fn now(&self) -> Option<Timestamp> {
        self.clock_synced.then(|| {
            let elapsed = u32::try_from(self.uptime.as_secs()).unwrap_or(u32::MAX);
            Timestamp::from_secs(NETWORK_EPOCH.saturating_add(elapsed))
        })
    }
}

impl Transport for SimPlatform {
    fn is_link_ready(&mut self) -> bool {
        self.link_up
    }

    fn connect_link(&mut self, timeout: Duration) -> bool {
        if self.link_available {
            self.advance(LINK_LATENCY.min(timeout));
            self.link_up = true;
            self.clock_synced = true;
        } else {
            self.advance(timeout);
        }
        self.link_up
    }

    fn is_session_ready(&mut self) -> bool {
        self.session_up
    }

    fn connect_session(&mut self, timeout: Duration) -> bool {
        if self.link_up {
            self.advance(SESSION_LATENCY.min(timeout));
            self.session_up = true;
        } else {
            self.advance(timeout);
        }
        self.session_up
    }

    fn disconnect(&mut self, _timeout: Duration) {
        self.link_up = false;
        self.session_up = false;
    }

    fn publish(&mut self, event: &str, payload: &str, require_ack: bool) -> bool {
        let acknowledged = self.session_up && (self.acknowledge || !require_ack);
        self.deliveries.push(Delivery {
            event: event.to_owned(),
            payload: payload.to_owned(),
            acknowledged,
        });
        acknowledged
    }

    fn select_antenna(&mut self, antenna: Antenna) {
        self.antenna = antenna;
    }
}

impl Sensors for SimPlatform {
    fn signal_quality(&mut self) -> Option<SignalQuality> {
        self.link_up.then_some(SignalQuality {
            strength_dbm: -71.0,
            quality_db: -9.0,
            strength_percent: 67.7,
            quality_percent: 64.7,
        })
    }

    fn battery_voltage(&mut self) -> Option<f32> {
        Some(self.battery_voltage)
    }

    fn battery_charge(&mut self) -> Option<f32> {
        Some(self.battery_charge)
    }
}

impl LowPower for SimPlatform {
    fn suspend(&mut self, duration: Duration) {
        self.slept.push(duration);
        self.advance(duration);
    }
}

impl PulseMonitor for SimPlatform {
    fn debounce_active(&self) -> bool {
        self.debouncing
    }
}
