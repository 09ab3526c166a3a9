use core::cell::Cell;
use core::time::Duration;

use meter_core::boot::ResetReason;
use meter_core::config::{BACKLOG_CAPACITY, MeterConfig};
use meter_core::controller::MeterController;
use meter_core::platform::{Clock, Sensors, Transport};
use meter_core::publish::{AttemptOutcome, FailureCause};
use meter_core::record::{PersistentRecord, Validation};
use meter_core::remote::Antenna;
use meter_core::report::SignalQuality;
use meter_core::shared::SharedMeter;
use meter_core::time::{Timestamp, Uptime};

const EPOCH_AT_BOOT: u32 = 1_700_000_000;

type Meter = SharedMeter<BACKLOG_CAPACITY>;

struct MockPlatform {
    uptime_ms: Cell<u64>,
    link_available: bool,
    ack: bool,
    link_up: bool,
    session_up: bool,
    published: Vec<String>,
    antenna: Option<Antenna>,
}

impl MockPlatform {
    fn new() -> Self {
        Self {
            uptime_ms: Cell::new(0),
            link_available: true,
            ack: true,
            link_up: false,
            session_up: false,
            published: Vec::new(),
            antenna: None,
        }
    }

    fn advance(&self, by: Duration) {
        let millis = u64::try_from(by.as_millis()).unwrap();
        self.uptime_ms.set(self.uptime_ms.get() + millis);
    }

    fn advance_to(&self, at: Timestamp) {
        let now = self.now().unwrap();
        self.advance(at.saturating_duration_since(now));
    }

    fn wall(&self) -> Timestamp {
        self.now().unwrap()
    }

    fn last_payload(&self) -> &str {
        self.published.last().map(String::as_str).unwrap()
    }
}

impl Clock for MockPlatform {
    fn uptime(&self) -> Uptime {
        Uptime::from_millis(self.uptime_ms.get())
    }

    fn now(&self) -> Option<Timestamp> {
        let elapsed = u32::try_from(self.uptime_ms.get() / 1_000).unwrap();
        Some(Timestamp::from_secs(EPOCH_AT_BOOT + elapsed))
    }
}

impl Transport for MockPlatform {
    fn is_link_ready(&mut self) -> bool {
        self.link_up
    }

    fn connect_link(&mut self, timeout: Duration) -> bool {
        if self.link_available {
            self.advance(Duration::from_secs(2));
            self.link_up = true;
        } else {
            self.advance(timeout);
        }
        self.link_up
    }

    fn is_session_ready(&mut self) -> bool {
        self.session_up
    }

    fn connect_session(&mut self, _timeout: Duration) -> bool {
        self.session_up = self.link_up;
        self.session_up
    }

    fn disconnect(&mut self, _timeout: Duration) {
        self.link_up = false;
        self.session_up = false;
    }

    fn publish(&mut self, event: &str, payload: &str, require_ack: bool) -> bool {
        assert_eq!(event, "waterbot/data");
        assert!(require_ack, "usage reports must require acknowledgement");
        self.published.push(payload.to_owned());
        self.ack
    }

    fn select_antenna(&mut self, antenna: Antenna) {
        self.antenna = Some(antenna);
    }
}

impl Sensors for MockPlatform {
    fn signal_quality(&mut self) -> Option<SignalQuality> {
        Some(SignalQuality {
            strength_dbm: -80.0,
            quality_db: 7.0,
            strength_percent: 40.0,
            quality_percent: 60.0,
        })
    }

    fn battery_voltage(&mut self) -> Option<f32> {
        Some(3.8)
    }

    fn battery_charge(&mut self) -> Option<f32> {
        None
    }
}

fn boot<'a>(meter: &'a Meter, platform: &MockPlatform) -> MeterController<'a, BACKLOG_CAPACITY> {
    MeterController::boot(
        meter,
        MeterConfig::new(),
        ResetReason::WakeFromSleep,
        Validation::Valid,
        platform.uptime(),
    )
    .expect("default config is valid")
}

/// Delivers the first heartbeat so later reports have a baseline.
fn publish_baseline(controller: &mut MeterController<'_, BACKLOG_CAPACITY>, platform: &mut MockPlatform) {
    let outcome = controller.service_publish(platform);
    assert!(matches!(outcome, Some(AttemptOutcome::Delivered { sequence: 1, .. })));
    platform.advance(Duration::from_secs(10));
}

fn field(payload: &str, key: &str) -> i64 {
    let marker = format!("\"{key}\":");
    let start = payload.find(&marker).unwrap_or_else(|| panic!("{key} missing in {payload}"))
        + marker.len();
    let rest = &payload[start..];
    let end = rest.find([',', '}']).unwrap();
    rest[..end].parse().unwrap()
}

fn deltas(payload: &str) -> Vec<i64> {
    let start = payload.find("\"pts\":[").unwrap() + "\"pts\":[".len();
    let end = payload[start..].find(']').unwrap() + start;
    payload[start..end]
        .split(',')
        .filter(|item| !item.is_empty())
        .map(|item| item.parse().unwrap())
        .collect()
}

#[test]
fn burst_of_pulses_publishes_full_report_and_keeps_remainder() {
    let meter = Meter::new();
    let mut platform = MockPlatform::new();
    let mut controller = boot(&meter, &platform);
    publish_baseline(&mut controller, &mut platform);

    for _ in 0..25 {
        meter.commit_pulse(platform.now());
        platform.advance(Duration::from_millis(400));
    }
    assert!(controller.needs_publish(platform.now()));

    let outcome = controller.service_publish(&mut platform);
    let Some(AttemptOutcome::Delivered { sequence, summary }) = outcome else {
        panic!("unexpected outcome {outcome:?}");
    };
    assert_eq!(sequence, 2);
    assert_eq!(summary.deltas_written, 20);
    assert!(!summary.truncated);

    let payload = platform.last_payload();
    assert_eq!(deltas(payload).len(), 20);
    assert_eq!(field(payload, "use"), 25);
    assert_eq!(field(payload, "seq"), 2);

    let status = meter.status();
    assert_eq!(status.backlog_len, 5);
    assert_eq!(status.pending_pulse_count, None);
    assert_eq!(status.last_publish_pulse_count, 25);
}

#[test]
fn consecutive_failures_back_off_exponentially() {
    let meter = Meter::new();
    let mut platform = MockPlatform::new();
    let mut controller = boot(&meter, &platform);
    publish_baseline(&mut controller, &mut platform);
    platform.disconnect(Duration::from_secs(5));
    platform.link_available = false;
    controller.meter().request_publish();

    let mut expected = [120, 240, 480].into_iter();
    for failure in 1..=3 {
        let outcome = controller.service_publish(&mut platform);
        let retry = expected.next().unwrap();
        assert_eq!(
            outcome,
            Some(AttemptOutcome::Failed {
                cause: FailureCause::LinkTimeout,
                retry_in: Duration::from_secs(retry),
                failures: failure,
            })
        );
        let failed_at = platform.wall();
        let earliest = controller.publish_machine().earliest_next_attempt();
        assert_eq!(earliest, Some(failed_at + Duration::from_secs(retry)));

        assert!(!controller.needs_publish(platform.now()));
        if failure < 3 {
            platform.advance_to(earliest.unwrap());
        }
    }
    assert!(controller.is_faulted());

    platform.link_available = true;
    platform.advance(Duration::from_secs(479));
    assert!(!controller.needs_publish(platform.now()));
    platform.advance(Duration::from_secs(1));
    let outcome = controller.service_publish(&mut platform);
    assert!(matches!(outcome, Some(AttemptOutcome::Delivered { .. })));
    assert_eq!(field(platform.last_payload(), "try"), 3);
    assert!(!controller.is_faulted());
    assert_eq!(controller.publish_machine().retries(), 0);
}

#[test]
fn failed_snapshot_is_retried_verbatim() {
    let meter = Meter::new();
    let mut platform = MockPlatform::new();
    let mut controller = boot(&meter, &platform);
    publish_baseline(&mut controller, &mut platform);

    for _ in 0..3 {
        meter.commit_pulse(platform.now());
        platform.advance(Duration::from_secs(1));
    }
    meter.request_publish();
    platform.ack = false;
    let outcome = controller.service_publish(&mut platform);
    assert!(matches!(
        outcome,
        Some(AttemptOutcome::Failed {
            cause: FailureCause::NotAcknowledged,
            ..
        })
    ));
    let first = platform.last_payload().to_owned();

    // Pulses after the snapshot stay in the backlog for the next report.
    meter.commit_pulse(platform.now());
    meter.commit_pulse(platform.now());

    platform.ack = true;
    platform.advance(Duration::from_secs(120));
    controller.service_publish(&mut platform);
    let second = platform.last_payload().to_owned();

    for key in ["t", "seq", "cur", "lst", "use", "per"] {
        assert_eq!(field(&first, key), field(&second, key), "{key}");
    }
    assert_eq!(deltas(&first), deltas(&second));
    assert_ne!(field(&first, "at"), field(&second, "at"));

    let status = meter.status();
    assert_eq!(status.current_pulse_count, 5);
    assert_eq!(status.last_publish_pulse_count, 3);
    assert_eq!(status.backlog_len, 2);
}

#[test]
fn set_reading_establishes_new_baseline() {
    let meter = Meter::new();
    let mut platform = MockPlatform::new();
    let mut controller = boot(&meter, &platform);
    publish_baseline(&mut controller, &mut platform);

    meter.set_reading(117, platform.now());
    platform.advance(Duration::from_secs(10));
    controller.service_publish(&mut platform);
    for _ in 0..3 {
        meter.commit_pulse(platform.now());
        platform.advance(Duration::from_secs(1));
    }
    assert_eq!(meter.status().current_pulse_count, 120);
    assert_eq!(meter.status().backlog_len, 3);

    assert_eq!(controller.dispatch_remote("setReading", "150", &mut platform), 0);
    let status = meter.status();
    assert_eq!(status.current_pulse_count, 150);
    assert_eq!(status.last_publish_pulse_count, 150);
    assert_eq!(status.backlog_len, 0);
    assert!(status.publish_immediately);

    controller.service_publish(&mut platform);
    let payload = platform.last_payload();
    assert_eq!(field(payload, "cur"), 150);
    assert_eq!(field(payload, "lst"), 150);
    assert_eq!(field(payload, "use"), 0);
    assert!(deltas(payload).is_empty());
}

#[test]
fn malformed_reading_is_rejected_without_mutation() {
    let meter = Meter::new();
    let mut platform = MockPlatform::new();
    let mut controller = boot(&meter, &platform);
    meter.commit_pulse(platform.now());

    assert_eq!(controller.dispatch_remote("setReading", "12abc", &mut platform), -1);
    assert_eq!(controller.dispatch_remote("reboot", "", &mut platform), -2);
    assert_eq!(meter.status().current_pulse_count, 1);
    assert!(!meter.status().publish_immediately);

    assert_eq!(controller.dispatch_remote("selectAntenna", "1", &mut platform), 0);
    assert_eq!(platform.antenna, Some(Antenna::Internal));
}

#[test]
fn pending_snapshot_survives_reset() {
    let meter = Meter::new();
    let mut platform = MockPlatform::new();
    let mut controller = boot(&meter, &platform);
    publish_baseline(&mut controller, &mut platform);

    meter.commit_pulse(platform.now());
    meter.request_publish();
    platform.ack = false;
    controller.service_publish(&mut platform);
    let lost = platform.last_payload().to_owned();

    let mut image = vec![0u8; PersistentRecord::<BACKLOG_CAPACITY>::ENCODED_LEN];
    meter.persist(&mut image).unwrap();

    let rebooted = Meter::new();
    let validation = rebooted.restore(&image);
    assert!(validation.is_valid());
    let mut platform = MockPlatform::new();
    platform.advance(Duration::from_secs(3_600));
    let mut controller = boot(&rebooted, &platform);

    let outcome = controller.service_publish(&mut platform);
    assert!(matches!(outcome, Some(AttemptOutcome::Delivered { sequence: 2, .. })));
    let delivered = platform.last_payload();
    for key in ["t", "seq", "cur", "use"] {
        assert_eq!(field(&lost, key), field(delivered, key), "{key}");
    }
}

#[test]
fn delivered_usage_reconciles_with_counter() {
    let meter = Meter::new();
    let mut platform = MockPlatform::new();
    let mut controller = boot(&meter, &platform);

    let mut delivered_usage = 0;
    for round in 0u32..40 {
        for _ in 0..(round % 7) {
            meter.commit_pulse(platform.now());
            platform.advance(Duration::from_millis(700));
        }
        platform.ack = round % 3 != 0;
        platform.advance(Duration::from_secs(30));
        if let Some(AttemptOutcome::Delivered { .. }) = controller.service_publish(&mut platform) {
            delivered_usage += field(platform.last_payload(), "use");
        }
    }

    let status = meter.status();
    let undelivered = i64::from(status.current_pulse_count - status.last_publish_pulse_count);
    assert_eq!(
        delivered_usage + undelivered,
        i64::from(status.current_pulse_count)
    );
    assert!(status.current_pulse_count > 0);
}
