use core::cell::Cell;
use core::time::Duration;

use meter_core::boot::ResetReason;
use meter_core::capture::{CaptureOutcome, PulseCapture, SwitchLevel};
use meter_core::config::MeterConfig;
use meter_core::controller::MeterController;
use meter_core::platform::{Clock, LowPower, PulseMonitor, Sensors, Transport};
use meter_core::record::Validation;
use meter_core::remote::Antenna;
use meter_core::report::SignalQuality;
use meter_core::shared::SharedMeter;
use meter_core::telemetry::MeterEventKind;
use meter_core::time::{Timestamp, Uptime};

const EPOCH_AT_BOOT: u32 = 1_700_000_000;
const CAPACITY: usize = 64;

type Meter = SharedMeter<CAPACITY>;

/// Platform whose wall clock only becomes valid once the link has connected.
struct MockPlatform {
    uptime_ms: Cell<u64>,
    clock_synced: bool,
    link_up: bool,
    debouncing: bool,
    disconnects: usize,
    connects: usize,
    suspended: Vec<Duration>,
}

impl MockPlatform {
    fn new(clock_synced: bool) -> Self {
        Self {
            uptime_ms: Cell::new(0),
            clock_synced,
            link_up: false,
            debouncing: false,
            disconnects: 0,
            connects: 0,
            suspended: Vec::new(),
        }
    }

    fn advance(&self, by: Duration) {
        let millis = u64::try_from(by.as_millis()).unwrap();
        self.uptime_ms.set(self.uptime_ms.get() + millis);
    }
}

impl Clock for MockPlatform {
    fn uptime(&self) -> Uptime {
        Uptime::from_millis(self.uptime_ms.get())
    }

    fn now(&self) -> Option<Timestamp> {
        self.clock_synced.then(|| {
            let elapsed = u32::try_from(self.uptime_ms.get() / 1_000).unwrap();
            Timestamp::from_secs(EPOCH_AT_BOOT + elapsed)
        })
    }
}

impl Transport for MockPlatform {
    fn is_link_ready(&mut self) -> bool {
        self.link_up
    }

    fn connect_link(&mut self, _timeout: Duration) -> bool {
        self.connects += 1;
        self.advance(Duration::from_secs(3));
        self.link_up = true;
        self.clock_synced = true;
        true
    }

    fn is_session_ready(&mut self) -> bool {
        self.link_up
    }

    fn connect_session(&mut self, _timeout: Duration) -> bool {
        self.link_up
    }

    fn disconnect(&mut self, _timeout: Duration) {
        self.disconnects += 1;
        self.link_up = false;
    }

    fn publish(&mut self, _event: &str, _payload: &str, _require_ack: bool) -> bool {
        true
    }

    fn select_antenna(&mut self, _antenna: Antenna) {}
}

impl Sensors for MockPlatform {
    fn signal_quality(&mut self) -> Option<SignalQuality> {
        None
    }

    fn battery_voltage(&mut self) -> Option<f32> {
        None
    }

    fn battery_charge(&mut self) -> Option<f32> {
        None
    }
}

impl LowPower for MockPlatform {
    fn suspend(&mut self, duration: Duration) {
        self.suspended.push(duration);
        self.advance(duration);
    }
}

impl PulseMonitor for MockPlatform {
    fn debounce_active(&self) -> bool {
        self.debouncing
    }
}

fn boot<'a>(
    meter: &'a Meter,
    platform: &MockPlatform,
    reason: ResetReason,
) -> MeterController<'a, CAPACITY> {
    MeterController::boot(
        meter,
        MeterConfig::new(),
        reason,
        Validation::Valid,
        platform.uptime(),
    )
    .unwrap()
}

#[test]
fn idle_meter_sleeps_until_heartbeat() {
    let meter = Meter::new();
    let mut platform = MockPlatform::new(true);
    let mut controller = boot(&meter, &platform, ResetReason::WakeFromSleep);

    let pass = controller.run_pass(&mut platform);
    assert!(pass.attempt.is_some());
    // Heartbeat is four hours after the capture time; the link took 3s.
    assert_eq!(pass.slept, Some(Duration::from_secs(4 * 60 * 60 - 3)));
    assert_eq!(platform.disconnects, 1);
    assert_eq!(platform.suspended, pass.slept.into_iter().collect::<Vec<_>>());
    assert_eq!(
        controller.telemetry().latest().map(|record| record.event),
        Some(MeterEventKind::SleepEntered)
    );
}

#[test]
fn pin_reset_stays_awake_until_sleep_now() {
    let meter = Meter::new();
    let mut platform = MockPlatform::new(true);
    let mut controller = boot(&meter, &platform, ResetReason::PinReset);
    assert_eq!(
        controller.boot_plan().stay_awake,
        Some(Duration::from_secs(300))
    );

    let pass = controller.run_pass(&mut platform);
    assert_eq!(pass.slept, None);
    assert_eq!(platform.disconnects, 0);

    assert_eq!(controller.dispatch_remote("sleepNow", "", &mut platform), 0);
    let pass = controller.run_pass(&mut platform);
    assert!(pass.slept.is_some());
}

#[test]
fn stay_awake_window_expires_on_its_own() {
    let meter = Meter::new();
    let mut platform = MockPlatform::new(true);
    let mut controller = boot(&meter, &platform, ResetReason::PinReset);

    controller.run_pass(&mut platform);
    let elapsed = Duration::from_millis(platform.uptime().as_millis());
    platform.advance(Duration::from_secs(300) - elapsed - Duration::from_millis(1));
    assert_eq!(controller.run_pass(&mut platform).slept, None);
    platform.advance(Duration::from_millis(1));
    assert!(controller.run_pass(&mut platform).slept.is_some());
}

#[test]
fn pending_signal_and_debounce_block_sleep() {
    let meter = Meter::new();
    let mut platform = MockPlatform::new(true);
    let mut controller = boot(&meter, &platform, ResetReason::WakeFromSleep);
    assert!(controller.service_publish(&mut platform).is_some());

    meter.commit_pulse(platform.now());
    let now = platform.now();
    assert_eq!(
        controller.sleep_time(false, platform.uptime(), now),
        Duration::ZERO
    );

    assert!(meter.take_signal());
    assert!(controller.sleep_time(false, platform.uptime(), now) > Duration::ZERO);

    platform.debouncing = true;
    assert_eq!(controller.run_pass(&mut platform).slept, None);
}

#[test]
fn unsynchronised_clock_keeps_device_awake_and_connects() {
    let meter = Meter::new();
    let mut platform = MockPlatform::new(false);
    let mut controller = boot(&meter, &platform, ResetReason::PowerDown);
    assert!(controller.boot_plan().recalibrate_fuel_gauge);

    meter.commit_pulse(platform.now());
    assert_eq!(meter.status().backlog_len, 0);
    assert!(meter.take_signal());

    let pass = controller.run_pass(&mut platform);
    assert_eq!(pass.attempt, None);
    assert_eq!(pass.slept, None);
    assert_eq!(platform.connects, 1);

    let pass = controller.run_pass(&mut platform);
    assert!(pass.attempt.is_some());
    assert_eq!(meter.status().last_publish_pulse_count, 1);
}

fn simulate_closure(chatter_edges: &[u64], closed_for: u64) -> u32 {
    let meter = SharedMeter::<8>::new();
    let window = MeterConfig::new().debounce;
    let mut capture = PulseCapture::new(&meter, window);

    for &edge in chatter_edges {
        capture.on_edge(Uptime::from_millis(edge));
    }
    let settled_at = chatter_edges.last().copied().unwrap_or_default();
    let released_at = settled_at + closed_for;

    let mut outcomes = Vec::new();
    while let Some(deadline) = capture.deadline() {
        let level = if deadline.as_millis() <= released_at {
            SwitchLevel::Closed
        } else {
            SwitchLevel::Open
        };
        outcomes.extend(capture.on_timer(deadline, level, None));
    }

    let committed = outcomes
        .iter()
        .filter(|outcome| matches!(outcome, CaptureOutcome::Committed(_)))
        .count();
    assert_eq!(
        u32::try_from(committed).unwrap(),
        meter.status().current_pulse_count
    );
    meter.status().current_pulse_count
}

#[test]
fn closures_count_only_when_held_for_the_window() {
    for closed_for in (0..=600).step_by(25) {
        let expected = u32::from(closed_for >= 300);
        assert_eq!(simulate_closure(&[1_000], closed_for), expected, "{closed_for}ms");
        assert_eq!(
            simulate_closure(&[1_000, 1_015, 1_040, 1_090], closed_for),
            expected,
            "chatter then {closed_for}ms"
        );
    }
}
