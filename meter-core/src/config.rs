//! Behavioural constants and the runtime configuration that carries them.
//!
//! Capacities that size static storage are `const` items so the retained
//! record layout is fixed at compile time. Everything that only shapes timing
//! lives in [`MeterConfig`], which the firmware builds once at boot and the
//! emulator can override per scenario.

use core::{fmt, time::Duration};

/// Number of pulse timestamps retained while reports cannot be delivered.
pub const BACKLOG_CAPACITY: usize = 600;

/// Upper bound on pulse timestamps carried by a single report.
pub const MAX_PULSE_TIMES_PER_REPORT: usize = 20;

/// Transport ceiling for a single event payload.
pub const MAX_EVENT_DATA_LENGTH: usize = 622;

/// Space kept free in the payload buffer for closing punctuation.
pub const TRUNCATION_MARGIN: usize = 15;

/// Event name used for usage reports.
pub const EVENT_DATA: &str = "waterbot/data";

/// Firmware version tag reported in every message.
pub const FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);
pub const DEFAULT_IN_USE_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(4 * 60 * 60);
pub const DEFAULT_RESET_STAY_AWAKE: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_MIN_SLEEP: Duration = Duration::from_secs(10);
pub const DEFAULT_MIN_PUBLISH_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_RETRY_INITIAL_DELAY: Duration = Duration::from_secs(60);
pub const DEFAULT_RETRY_MAX_DELAY: Duration = Duration::from_secs(4 * 60 * 60);
pub const DEFAULT_LINK_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_SESSION_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_SIGNAL_ON: Duration = Duration::from_millis(350);
pub const DEFAULT_SIGNAL_OFF: Duration = Duration::from_millis(150);

/// Timing configuration shared by every component of the meter.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MeterConfig {
    /// Minimum closed duration for a switch closure to count as a pulse.
    pub debounce: Duration,
    /// Publish no later than this after the oldest unreported pulse.
    pub in_use_interval: Duration,
    /// Publish at least this often with no pulses at all.
    pub heartbeat_interval: Duration,
    /// Backlog depth that forces an immediate publish.
    pub max_pulse_times_per_report: usize,
    /// Stay-awake window after a physical reset.
    pub reset_stay_awake: Duration,
    /// Sleeps shorter than this are not worth taking.
    pub min_sleep: Duration,
    /// Throttle between consecutive successful publishes.
    pub min_publish_interval: Duration,
    pub retry_initial_delay: Duration,
    pub retry_max_delay: Duration,
    pub link_connect_timeout: Duration,
    pub session_connect_timeout: Duration,
    pub disconnect_timeout: Duration,
    pub signal_on: Duration,
    pub signal_off: Duration,
}

impl MeterConfig {
    /// Configuration populated with the production defaults.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            in_use_interval: DEFAULT_IN_USE_INTERVAL,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            max_pulse_times_per_report: MAX_PULSE_TIMES_PER_REPORT,
            reset_stay_awake: DEFAULT_RESET_STAY_AWAKE,
            min_sleep: DEFAULT_MIN_SLEEP,
            min_publish_interval: DEFAULT_MIN_PUBLISH_INTERVAL,
            retry_initial_delay: DEFAULT_RETRY_INITIAL_DELAY,
            retry_max_delay: DEFAULT_RETRY_MAX_DELAY,
            link_connect_timeout: DEFAULT_LINK_CONNECT_TIMEOUT,
            session_connect_timeout: DEFAULT_SESSION_CONNECT_TIMEOUT,
            disconnect_timeout: DEFAULT_DISCONNECT_TIMEOUT,
            signal_on: DEFAULT_SIGNAL_ON,
            signal_off: DEFAULT_SIGNAL_OFF,
        }
    }

    /// Overrides the debounce window.
    #[must_use]
    pub const fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Overrides the in-use and heartbeat publish intervals.
    #[must_use]
    pub const fn with_publish_intervals(mut self, in_use: Duration, heartbeat: Duration) -> Self {
        self.in_use_interval = in_use;
        self.heartbeat_interval = heartbeat;
        self
    }

    /// Overrides the retry backoff bounds.
    #[must_use]
    pub const fn with_retry_bounds(mut self, initial: Duration, max: Duration) -> Self {
        self.retry_initial_delay = initial;
        self.retry_max_delay = max;
        self
    }

    /// Overrides the burst threshold.
    #[must_use]
    pub const fn with_max_pulse_times_per_report(mut self, max: usize) -> Self {
        self.max_pulse_times_per_report = max;
        self
    }

    /// Overrides the minimum worthwhile sleep.
    #[must_use]
    pub const fn with_min_sleep(mut self, min_sleep: Duration) -> Self {
        self.min_sleep = min_sleep;
        self
    }

    /// Checks the cross-field constraints the scheduler relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.debounce.is_zero() {
            return Err(ConfigError::ZeroDebounce);
        }
        if self.max_pulse_times_per_report == 0
            || self.max_pulse_times_per_report > MAX_PULSE_TIMES_PER_REPORT
        {
            return Err(ConfigError::ReportCapOutOfRange);
        }
        if self.in_use_interval > self.heartbeat_interval {
            return Err(ConfigError::InUseExceedsHeartbeat);
        }
        if self.retry_initial_delay.is_zero() || self.retry_initial_delay > self.retry_max_delay {
            return Err(ConfigError::RetryBoundsInverted);
        }
        Ok(())
    }
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Reasons a [`MeterConfig`] is rejected.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConfigError {
    ZeroDebounce,
    ReportCapOutOfRange,
    InUseExceedsHeartbeat,
    RetryBoundsInverted,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ZeroDebounce => f.write_str("debounce window must be non-zero"),
            ConfigError::ReportCapOutOfRange => write!(
                f,
                "pulse times per report must be 1-{MAX_PULSE_TIMES_PER_REPORT}"
            ),
            ConfigError::InUseExceedsHeartbeat => {
                f.write_str("in-use interval exceeds heartbeat interval")
            }
            ConfigError::RetryBoundsInverted => {
                f.write_str("retry initial delay must be non-zero and below the maximum")
            }
        }
    }
}
