//! Delivery state machine: connect, transmit, and back off on failure.
//!
//! The machine itself only tracks timing (the earliest next attempt and the
//! retry backoff) plus a fault flag for the indicator LED. Whether a publish
//! is pending is owned by the durable record, so a reset mid-attempt resumes
//! with the same snapshot on the next pass.

use core::fmt;
use core::time::Duration;

use crate::config::MeterConfig;
use crate::platform::Transport;
use crate::record::PendingPublish;
use crate::report::{ReportBuffer, ReportSummary};
use crate::time::Timestamp;

/// Why a delivery attempt failed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FailureCause {
    LinkTimeout,
    SessionTimeout,
    NotAcknowledged,
    ReportOverflow,
}

impl FailureCause {
    #[must_use]
    pub const fn to_raw(self) -> u8 {
        match self {
            FailureCause::LinkTimeout => 0x01,
            FailureCause::SessionTimeout => 0x02,
            FailureCause::NotAcknowledged => 0x03,
            FailureCause::ReportOverflow => 0x04,
        }
    }

    #[must_use]
    pub const fn from_raw(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(FailureCause::LinkTimeout),
            0x02 => Some(FailureCause::SessionTimeout),
            0x03 => Some(FailureCause::NotAcknowledged),
            0x04 => Some(FailureCause::ReportOverflow),
            _ => None,
        }
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureCause::LinkTimeout => "link connect timeout",
            FailureCause::SessionTimeout => "session connect timeout",
            FailureCause::NotAcknowledged => "publish not acknowledged",
            FailureCause::ReportOverflow => "report does not fit",
        };
        f.write_str(label)
    }
}

/// Exponential retry delay: `min(initial * 2^k, max)` after `k` consecutive failures.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    failures: u32,
}

impl Backoff {
    #[must_use]
    pub const fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            failures: 0,
        }
    }

    /// Consecutive failures since the last success.
    #[must_use]
    pub const fn failures(&self) -> u32 {
        self.failures
    }

    /// Delay currently in force; zero when no backoff is active.
    #[must_use]
    pub fn current_delay(&self) -> Duration {
        self.delay_after(self.failures)
    }

    /// Registers a failure and returns the delay before the next attempt.
    pub fn record_failure(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        self.current_delay()
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    fn delay_after(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        1u32.checked_shl(failures)
            .and_then(|factor| self.initial.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

/// Attempt gating and fault state for the publish path.
#[derive(Copy, Clone, Debug)]
pub struct PublishMachine {
    backoff: Backoff,
    min_publish_interval: Duration,
    earliest_next_attempt: Option<Timestamp>,
    fault: bool,
}

impl PublishMachine {
    #[must_use]
    pub const fn new(config: &MeterConfig) -> Self {
        Self {
            backoff: Backoff::new(config.retry_initial_delay, config.retry_max_delay),
            min_publish_interval: config.min_publish_interval,
            earliest_next_attempt: None,
            fault: false,
        }
    }

    /// Returns `true` when an attempt may start at `now`.
    #[must_use]
    pub fn gate_open(&self, now: Timestamp) -> bool {
        self.earliest_next_attempt
            .is_none_or(|earliest| now >= earliest)
    }

    #[must_use]
    pub const fn earliest_next_attempt(&self) -> Option<Timestamp> {
        self.earliest_next_attempt
    }

    /// Failed attempts since the last success.
    #[must_use]
    pub const fn retries(&self) -> u32 {
        self.backoff.failures()
    }

    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        self.backoff.current_delay()
    }

    /// Returns `true` while the last attempt failed.
    #[must_use]
    pub const fn is_faulted(&self) -> bool {
        self.fault
    }

    /// Clears the backoff and throttles the next publish.
    pub fn on_success(&mut self, now: Timestamp) {
        self.backoff.reset();
        self.fault = false;
        self.earliest_next_attempt = Some(now + self.min_publish_interval);
    }

    /// Extends the backoff and returns the delay until the next attempt.
    pub fn on_failure(&mut self, now: Timestamp) -> Duration {
        let delay = self.backoff.record_failure();
        self.fault = true;
        self.earliest_next_attempt = Some(now + delay);
        delay
    }

    /// Forgets all retry state.
    pub fn reset(&mut self) {
        self.backoff.reset();
        self.fault = false;
        self.earliest_next_attempt = None;
    }
}

/// A formatted report ready to hand to the transport.
#[derive(Clone, Debug)]
pub struct PublishAttempt {
    pub pending: PendingPublish,
    pub attempt_at: Timestamp,
    pub sequence: u32,
    pub payload: ReportBuffer,
    pub summary: ReportSummary,
}

/// Result of a completed attempt.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AttemptOutcome {
    Delivered {
        sequence: u32,
        summary: ReportSummary,
    },
    /// The snapshot was replaced (by a reading reset) while in flight.
    Superseded,
    Failed {
        cause: FailureCause,
        retry_in: Duration,
        failures: u32,
    },
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptOutcome::Delivered { sequence, summary } => write!(
                f,
                "delivered seq={sequence} deltas={}{}",
                summary.deltas_written,
                if summary.truncated { " (truncated)" } else { "" }
            ),
            AttemptOutcome::Superseded => f.write_str("superseded by reading reset"),
            AttemptOutcome::Failed {
                cause,
                retry_in,
                failures,
            } => write!(
                f,
                "failed: {cause}; retry in {}s (failure {failures})",
                retry_in.as_secs()
            ),
        }
    }
}

/// Brings the link and then the session up, each bounded by its timeout.
pub fn ensure_connected<T: Transport + ?Sized>(
    transport: &mut T,
    config: &MeterConfig,
) -> Result<(), FailureCause> {
    if !transport.is_link_ready() && !transport.connect_link(config.link_connect_timeout) {
        return Err(FailureCause::LinkTimeout);
    }
    if !transport.is_session_ready() && !transport.connect_session(config.session_connect_timeout)
    {
        return Err(FailureCause::SessionTimeout);
    }
    Ok(())
}
