//! Safe sleep duration calculation.
//!
//! The device may only suspend when nothing short-lived is outstanding: no
//! open debounce window, no pending LED signal, no stay-awake window. The
//! sleep length is then bounded by the next publish obligation, whichever of
//! the schedule and the retry gate is later.

use core::time::Duration;

use crate::report::PublishDue;
use crate::time::{Timestamp, Uptime};

/// Deadline before which the device must not sleep.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct StayAwake {
    until: Option<Uptime>,
}

impl StayAwake {
    #[must_use]
    pub const fn new() -> Self {
        Self { until: None }
    }

    /// Keeps the device awake for at least `duration` from `now`.
    ///
    /// An existing later deadline is kept.
    pub fn extend(&mut self, now: Uptime, duration: Duration) {
        let candidate = now + duration;
        self.until = Some(self.until.map_or(candidate, |until| until.max(candidate)));
    }

    pub fn clear(&mut self) {
        self.until = None;
    }

    #[must_use]
    pub fn is_active(&self, now: Uptime) -> bool {
        self.until.is_some_and(|until| now < until)
    }

    #[must_use]
    pub const fn until(&self) -> Option<Uptime> {
        self.until
    }
}

/// Inputs to [`calc_sleep_time`], gathered by the controller.
#[derive(Copy, Clone, Debug)]
pub struct SleepInputs {
    pub debounce_active: bool,
    pub pulses_to_signal: u32,
    pub uptime: Uptime,
    pub stay_awake: StayAwake,
    /// Wall clock; `None` keeps the device awake until time is synchronised.
    pub now: Option<Timestamp>,
    pub next_publish: PublishDue,
    pub earliest_next_attempt: Option<Timestamp>,
}

/// Returns how long it is safe to sleep, or zero when the device must stay awake.
///
/// Results shorter than `min_sleep` are rounded down to zero.
#[must_use]
pub fn calc_sleep_time(inputs: &SleepInputs, min_sleep: Duration) -> Duration {
    if inputs.debounce_active
        || inputs.pulses_to_signal > 0
        || inputs.stay_awake.is_active(inputs.uptime)
    {
        return Duration::ZERO;
    }
    let Some(now) = inputs.now else {
        return Duration::ZERO;
    };

    let scheduled = inputs.next_publish.deadline(now);
    let deadline = inputs
        .earliest_next_attempt
        .map_or(scheduled, |earliest| scheduled.max(earliest));

    let sleep = deadline.saturating_duration_since(now);
    if sleep < min_sleep {
        Duration::ZERO
    } else {
        sleep
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN_SLEEP: Duration = Duration::from_secs(10);

    fn idle_inputs() -> SleepInputs {
        SleepInputs {
            debounce_active: false,
            pulses_to_signal: 0,
            uptime: Uptime::from_millis(60_000),
            stay_awake: StayAwake::new(),
            now: Some(Timestamp::from_secs(1_000)),
            next_publish: PublishDue::At(Timestamp::from_secs(1_600)),
            earliest_next_attempt: None,
        }
    }

    #[test]
    fn sleeps_until_next_publish() {
        assert_eq!(
            calc_sleep_time(&idle_inputs(), MIN_SLEEP),
            Duration::from_secs(600)
        );
    }

    #[test]
    fn retry_gate_defers_immediate_publish() {
        let inputs = SleepInputs {
            next_publish: PublishDue::Immediately,
            earliest_next_attempt: Some(Timestamp::from_secs(1_480)),
            ..idle_inputs()
        };
        assert_eq!(calc_sleep_time(&inputs, MIN_SLEEP), Duration::from_secs(480));
    }

    #[test]
    fn short_sleeps_are_not_taken() {
        let inputs = SleepInputs {
            next_publish: PublishDue::At(Timestamp::from_secs(1_009)),
            ..idle_inputs()
        };
        assert_eq!(calc_sleep_time(&inputs, MIN_SLEEP), Duration::ZERO);

        let overdue = SleepInputs {
            next_publish: PublishDue::At(Timestamp::from_secs(900)),
            ..idle_inputs()
        };
        assert_eq!(calc_sleep_time(&overdue, MIN_SLEEP), Duration::ZERO);
    }

    #[test]
    fn awake_obligations_block_sleep() {
        let debouncing = SleepInputs {
            debounce_active: true,
            ..idle_inputs()
        };
        let signalling = SleepInputs {
            pulses_to_signal: 2,
            ..idle_inputs()
        };
        let mut stay_awake = StayAwake::new();
        stay_awake.extend(Uptime::from_millis(0), Duration::from_secs(300));
        let diagnosing = SleepInputs {
            stay_awake,
            ..idle_inputs()
        };
        let unsynced = SleepInputs {
            now: None,
            ..idle_inputs()
        };

        for inputs in [debouncing, signalling, diagnosing, unsynced] {
            assert_eq!(calc_sleep_time(&inputs, MIN_SLEEP), Duration::ZERO);
        }
    }

    #[test]
    fn stay_awake_keeps_latest_deadline() {
        let mut stay_awake = StayAwake::new();
        stay_awake.extend(Uptime::from_millis(0), Duration::from_secs(300));
        stay_awake.extend(Uptime::from_millis(1_000), Duration::from_secs(10));
        assert_eq!(stay_awake.until(), Some(Uptime::from_millis(300_000)));

        assert!(stay_awake.is_active(Uptime::from_millis(299_999)));
        assert!(!stay_awake.is_active(Uptime::from_millis(300_000)));

        stay_awake.clear();
        assert!(!stay_awake.is_active(Uptime::ZERO));
    }
}
