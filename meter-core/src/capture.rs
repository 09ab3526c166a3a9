//! Two-stage pulse debouncing.
//!
//! A falling edge on the meter switch (re)starts a one-shot window. When the
//! window expires the input is sampled again: still closed commits a pulse,
//! already open discards the edge as contact bounce. Only the commit touches
//! shared state, and it does so through a single [`SharedMeter`] operation.

use core::time::Duration;

use crate::shared::{PulseCommit, SharedMeter};
use crate::time::{Timestamp, Uptime};

/// Sampled level of the meter switch.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SwitchLevel {
    Closed,
    Open,
}

/// One-shot debounce window driven by edge and timer events.
#[derive(Copy, Clone, Debug)]
pub struct Debouncer {
    window: Duration,
    deadline: Option<Uptime>,
}

/// State of the debounce window after a poll.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DebounceState {
    Idle,
    Waiting(Uptime),
    Expired,
}

impl Debouncer {
    #[must_use]
    pub const fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    /// Restarts the window at `now`, returning the new expiry time.
    pub fn on_edge(&mut self, now: Uptime) -> Uptime {
        let deadline = now + self.window;
        self.deadline = Some(deadline);
        deadline
    }

    /// Returns `true` while an edge is waiting for its window to expire.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.deadline.is_some()
    }

    #[must_use]
    pub const fn deadline(&self) -> Option<Uptime> {
        self.deadline
    }

    /// Checks the window at `now`, disarming it once expired.
    pub fn poll(&mut self, now: Uptime) -> DebounceState {
        match self.deadline {
            None => DebounceState::Idle,
            Some(deadline) if now < deadline => DebounceState::Waiting(deadline),
            Some(_) => {
                self.deadline = None;
                DebounceState::Expired
            }
        }
    }
}

/// Result of resolving an expired debounce window.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CaptureOutcome {
    Committed(PulseCommit),
    Bounce,
}

/// Debouncer bound to the shared meter it commits into.
pub struct PulseCapture<'a, const N: usize> {
    debouncer: Debouncer,
    meter: &'a SharedMeter<N>,
}

impl<'a, const N: usize> PulseCapture<'a, N> {
    #[must_use]
    pub const fn new(meter: &'a SharedMeter<N>, window: Duration) -> Self {
        Self {
            debouncer: Debouncer::new(window),
            meter,
        }
    }

    /// Handles a falling edge on the switch input.
    pub fn on_edge(&mut self, now: Uptime) -> Uptime {
        self.debouncer.on_edge(now)
    }

    #[must_use]
    pub const fn is_debouncing(&self) -> bool {
        self.debouncer.is_active()
    }

    #[must_use]
    pub const fn deadline(&self) -> Option<Uptime> {
        self.debouncer.deadline()
    }

    /// Resolves the window if it has expired at `now`.
    ///
    /// `level` is the switch level sampled at `now`; `wall` is the wall clock,
    /// if valid, used to timestamp a committed pulse.
    pub fn on_timer(
        &mut self,
        now: Uptime,
        level: SwitchLevel,
        wall: Option<Timestamp>,
    ) -> Option<CaptureOutcome> {
        match self.debouncer.poll(now) {
            DebounceState::Idle | DebounceState::Waiting(_) => None,
            DebounceState::Expired => Some(resolve(self.meter, level, wall)),
        }
    }
}

/// Commits a pulse when the switch is still closed after the window.
pub fn resolve<const N: usize>(
    meter: &SharedMeter<N>,
    level: SwitchLevel,
    wall: Option<Timestamp>,
) -> CaptureOutcome {
    match level {
        SwitchLevel::Closed => CaptureOutcome::Committed(meter.commit_pulse(wall)),
        SwitchLevel::Open => CaptureOutcome::Bounce,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(300);

    fn ms(millis: u64) -> Uptime {
        Uptime::from_millis(millis)
    }

    #[test]
    fn edges_restart_the_window() {
        let mut debouncer = Debouncer::new(WINDOW);
        assert_eq!(debouncer.on_edge(ms(0)), ms(300));
        assert_eq!(debouncer.on_edge(ms(100)), ms(400));

        assert_eq!(debouncer.poll(ms(350)), DebounceState::Waiting(ms(400)));
        assert_eq!(debouncer.poll(ms(400)), DebounceState::Expired);
        assert!(!debouncer.is_active());
        assert_eq!(debouncer.poll(ms(500)), DebounceState::Idle);
    }

    #[test]
    fn closed_switch_commits_once() {
        let meter = SharedMeter::<8>::new();
        let mut capture = PulseCapture::new(&meter, WINDOW);
        capture.on_edge(ms(0));

        assert_eq!(capture.on_timer(ms(299), SwitchLevel::Closed, None), None);
        let outcome = capture.on_timer(ms(300), SwitchLevel::Closed, Some(Timestamp::from_secs(9)));
        assert!(matches!(
            outcome,
            Some(CaptureOutcome::Committed(PulseCommit { count: 1, timestamped: true, .. }))
        ));
        assert_eq!(capture.on_timer(ms(600), SwitchLevel::Closed, None), None);
        assert_eq!(meter.status().current_pulse_count, 1);
    }

    #[test]
    fn released_switch_is_bounce() {
        let meter = SharedMeter::<8>::new();
        let mut capture = PulseCapture::new(&meter, WINDOW);
        capture.on_edge(ms(0));

        assert_eq!(
            capture.on_timer(ms(300), SwitchLevel::Open, None),
            Some(CaptureOutcome::Bounce)
        );
        assert_eq!(meter.status().current_pulse_count, 0);
        assert_eq!(meter.pulses_to_signal(), 0);
    }
}
