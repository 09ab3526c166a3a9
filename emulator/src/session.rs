use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use meter_core::boot::ResetReason;
use meter_core::capture::{CaptureOutcome, PulseCapture, SwitchLevel};
use meter_core::controller::MeterController;
use meter_core::platform::Clock;
use meter_core::record::encoded_len;
use meter_core::telemetry::EventId;
use meter_core::{BACKLOG_CAPACITY, Meter, MeterConfig};

use crate::command::{EmulatorCommand, parse_command};
use crate::platform::SimPlatform;

/// How long past the debounce window a simulated closure is held.
const HOLD_MARGIN: Duration = Duration::from_millis(50);

/// Contact chatter before a bounce releases the switch.
const CHATTER: Duration = Duration::from_millis(40);

/// Byte written over the retained image to simulate a power loss.
const POWER_LOSS_FILL: u8 = 0xA5;

pub const HELP_TOPICS: &[(&str, &str)] = &[
    ("pulse", "pulse [n]                      - close the meter switch n times"),
    ("bounce", "bounce                         - chatter the switch without a full closure"),
    ("advance", "advance <secs>                 - let time pass without a scheduler pass"),
    ("link", "link <up|down>                 - make the radio link available or not"),
    ("ack", "ack <on|off>                   - acknowledge or drop published reports"),
    ("call", "call <name> [arg]              - invoke a remote function"),
    ("reset", "reset <pin|power|sleep|update> - restart the device"),
    ("tick", "tick                           - run one scheduler pass"),
    ("status", "status                         - show counters and schedule"),
    ("events", "events                         - show telemetry recorded since last time"),
    ("help", "help [topic]                   - show help for a command"),
    ("exit", "exit                           - leave the emulator"),
];

/// Scripted scenarios recorded by `capture_transcripts`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TranscriptProfile {
    Burst,
    SetReading,
    Backoff,
    Reset,
}

impl TranscriptProfile {
    pub const ALL: [TranscriptProfile; 4] = [
        TranscriptProfile::Burst,
        TranscriptProfile::SetReading,
        TranscriptProfile::Backoff,
        TranscriptProfile::Reset,
    ];

    #[must_use]
    pub fn log_path(self) -> &'static str {
        match self {
            TranscriptProfile::Burst => "transcripts/emulator-burst.log",
            TranscriptProfile::SetReading => "transcripts/emulator-set-reading.log",
            TranscriptProfile::Backoff => "transcripts/emulator-backoff.log",
            TranscriptProfile::Reset => "transcripts/emulator-reset.log",
        }
    }

    #[must_use]
    pub fn header(self) -> &'static str {
        match self {
            TranscriptProfile::Burst => "Water meter emulator burst transcript",
            TranscriptProfile::SetReading => "Water meter emulator set-reading transcript",
            TranscriptProfile::Backoff => "Water meter emulator retry backoff transcript",
            TranscriptProfile::Reset => "Water meter emulator reset transcript",
        }
    }

    /// Prompt lines replayed for this scenario.
    #[must_use]
    pub fn script(self) -> &'static [&'static str] {
        match self {
            TranscriptProfile::Burst => &["pulse 25", "status", "tick", "status", "events"],
            TranscriptProfile::SetReading => &[
                "call setReading 117",
                "tick",
                "pulse 3",
                "status",
                "call setReading 150",
                "tick",
                "status",
                "call setReading 12x",
                "call calibrate",
            ],
            TranscriptProfile::Backoff => &[
                "link down",
                "pulse",
                "tick",
                "tick",
                "tick",
                "tick",
                "status",
                "link up",
                "tick",
                "events",
            ],
            TranscriptProfile::Reset => &[
                "pulse 2",
                "reset pin",
                "tick",
                "call sleepNow",
                "tick",
                "reset power",
                "status",
                "tick",
                "events",
            ],
        }
    }

    pub fn from_tag(tag: &str) -> Result<Self, String> {
        match tag.to_ascii_lowercase().as_str() {
            "burst" => Ok(Self::Burst),
            "set-reading" => Ok(Self::SetReading),
            "backoff" => Ok(Self::Backoff),
            "reset" => Ok(Self::Reset),
            _ => Err(format!("Unknown transcript profile `{tag}`")),
        }
    }
}

/// A running emulated device plus its optional transcript.
pub struct Session<'a> {
    meter: &'a Meter,
    config: MeterConfig,
    controller: MeterController<'a, BACKLOG_CAPACITY>,
    capture: PulseCapture<'a, BACKLOG_CAPACITY>,
    platform: SimPlatform,
    retained: Vec<u8>,
    events_shown: EventId,
    transcript: Option<TranscriptLogger>,
    closed: bool,
}

impl<'a> Session<'a> {
    /// Boots a device as if it had just woken from sleep.
    pub fn new(meter: &'a Meter, transcript: Option<TranscriptLogger>) -> io::Result<Self> {
        let config = MeterConfig::new();
        let platform = SimPlatform::new();
        let validation = meter.validate_or_reset();
        let controller = MeterController::boot(
            meter,
            config,
            ResetReason::WakeFromSleep,
            validation,
            platform.uptime(),
        )
        .map_err(|error| io::Error::other(error.to_string()))?;

        let mut session = Self {
            meter,
            config,
            controller,
            capture: PulseCapture::new(meter, config.debounce),
            platform,
            retained: vec![0; encoded_len(BACKLOG_CAPACITY)],
            events_shown: 0,
            transcript,
            closed: false,
        };
        session.persist()?;
        Ok(session)
    }

    /// Runs the interactive prompt until `exit` or end of input.
    ///
    /// The prompt shows the simulated uptime so scripted input can be read
    /// back against the device's clock.
    pub fn run<R: BufRead, W: Write>(&mut self, mut input: R, mut output: W) -> io::Result<()> {
        writeln!(
            output,
            "Water Meter Emulator ready. Type `help` for commands or `exit` to quit."
        )?;

        let mut line = String::new();
        while !self.closed {
            write!(output, "[{}] meter> ", self.platform.uptime())?;
            output.flush()?;

            line.clear();
            if input.read_line(&mut line)? == 0 {
                writeln!(output)?;
                break;
            }
            for response in self.handle_command(&line)? {
                writeln!(output, "{response}")?;
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn platform(&self) -> &SimPlatform {
        &self.platform
    }

    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<String>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        let elapsed = self.platform.elapsed();
        if let Some(transcript) = self.transcript.as_mut() {
            transcript.append_line(elapsed, TranscriptRole::Host, trimmed)?;
        }

        let lines = match parse_command(trimmed) {
            Ok(command) => self.execute(command)?,
            Err(error) => vec![format!("ERR {error}")],
        };

        let elapsed = self.platform.elapsed();
        if let Some(transcript) = self.transcript.as_mut() {
            for line in &lines {
                transcript.append_line(elapsed, TranscriptRole::Emulator, line)?;
            }
        }
        Ok(lines)
    }

    fn execute(&mut self, command: EmulatorCommand) -> io::Result<Vec<String>> {
        let lines = match command {
            EmulatorCommand::Pulse(count) => self.handle_pulses(count)?,
            EmulatorCommand::Bounce => self.handle_bounce()?,
            EmulatorCommand::Advance(secs) => {
                self.platform.advance(Duration::from_secs(secs));
                vec![format!("advanced {secs}s; uptime {}", self.platform.uptime())]
            }
            EmulatorCommand::Link(available) => {
                self.platform.set_link_available(available);
                vec![format!("link {}", if available { "available" } else { "unavailable" })]
            }
            EmulatorCommand::Ack(acknowledge) => {
                self.platform.set_acknowledge(acknowledge);
                vec![format!("acknowledgements {}", if acknowledge { "on" } else { "off" })]
            }
            EmulatorCommand::Call { name, argument } => {
                let code = self
                    .controller
                    .dispatch_remote(&name, &argument, &mut self.platform);
                self.persist()?;
                vec![format!("call {name}({argument}) -> {code}")]
            }
            EmulatorCommand::Reset(reason) => self.handle_reset(reason)?,
            EmulatorCommand::Tick => self.handle_tick()?,
            EmulatorCommand::Status => self.status_lines(),
            EmulatorCommand::Events => self.event_lines(),
            EmulatorCommand::Help(topic) => help_lines(topic.as_deref()),
            EmulatorCommand::Exit => {
                self.persist()?;
                self.closed = true;
                vec!["Session closed.".to_string()]
            }
        };
        Ok(lines)
    }

    fn handle_pulses(&mut self, count: u32) -> io::Result<Vec<String>> {
        let mut lines = Vec::new();
        let mut committed = 0;
        for _ in 0..count {
            let hold = self.config.debounce + HOLD_MARGIN;
            match self.close_switch(hold, SwitchLevel::Closed) {
                CaptureOutcome::Committed(commit) => {
                    committed += 1;
                    if let Some(lost) = commit.evicted {
                        lines.push(format!("backlog full: dropped pulse time {lost}"));
                    }
                    if !commit.timestamped {
                        lines.push("clock invalid: pulse counted without a timestamp".to_string());
                    }
                }
                CaptureOutcome::Bounce => {}
            }
        }
        self.persist()?;

        let mut blinks = 0;
        while self.meter.take_signal() {
            blinks += 1;
        }

        let status = self.meter.status();
        lines.push(format!(
            "pulses committed={committed} count={} backlog={} blinks={blinks}",
            status.current_pulse_count, status.backlog_len
        ));
        Ok(lines)
    }

    fn handle_bounce(&mut self) -> io::Result<Vec<String>> {
        let outcome = self.close_switch(CHATTER, SwitchLevel::Open);
        self.persist()?;
        let line = match outcome {
            CaptureOutcome::Bounce => "bounce rejected".to_string(),
            CaptureOutcome::Committed(commit) => format!("bounce counted count={}", commit.count),
        };
        Ok(vec![line])
    }

    /// Closes the switch, holds it for `hold`, and resolves the debounce window
    /// with the switch at `level`.
    fn close_switch(&mut self, hold: Duration, level: SwitchLevel) -> CaptureOutcome {
        self.capture.on_edge(self.platform.uptime());
        self.platform.set_debouncing(true);
        self.platform.advance(hold);
        if level == SwitchLevel::Open {
            // Chatter on release restarts the window.
            self.capture.on_edge(self.platform.uptime());
        }

        let now = self.platform.uptime();
        let deadline = self.capture.deadline().unwrap_or(now);
        self.platform.advance(deadline.saturating_duration_since(now));
        let outcome = self
            .capture
            .on_timer(self.platform.uptime(), level, self.platform.now())
            .unwrap_or(CaptureOutcome::Bounce);
        self.platform.set_debouncing(false);

        self.controller
            .record_capture(outcome, self.platform.uptime());
        outcome
    }

    fn handle_reset(&mut self, reason: ResetReason) -> io::Result<Vec<String>> {
        let power_lost = reason == ResetReason::PowerDown;
        if power_lost {
            self.retained.fill(POWER_LOSS_FILL);
        }
        self.platform.reset(power_lost);

        let validation = self.meter.restore(&self.retained);
        self.controller = MeterController::boot(
            self.meter,
            self.config,
            reason,
            validation,
            self.platform.uptime(),
        )
        .map_err(|error| io::Error::other(error.to_string()))?;
        self.capture = PulseCapture::new(self.meter, self.config.debounce);
        self.events_shown = 0;
        self.persist()?;

        let plan = self.controller.boot_plan();
        let mut lines = vec![format!(
            "reset: {reason}; record {}",
            if validation.is_valid() { "retained" } else { "reinitialised" }
        )];
        if let Some(window) = plan.stay_awake {
            lines.push(format!("staying awake for {}s", window.as_secs()));
        }
        if plan.recalibrate_fuel_gauge {
            lines.push("fuel gauge quick-start".to_string());
        }
        Ok(lines)
    }

    fn handle_tick(&mut self) -> io::Result<Vec<String>> {
        let delivered_before = self.platform.deliveries().len();
        let clock_valid = self.platform.now().is_some();
        let pass = self.controller.run_pass(&mut self.platform);
        self.persist()?;

        let mut lines = Vec::new();
        for delivery in &self.platform.deliveries()[delivered_before..] {
            lines.push(format!("sent {} {}", delivery.event, delivery.payload));
        }
        match pass.attempt {
            Some(outcome) => lines.push(format!("publish: {outcome}")),
            None if !clock_valid => {
                let synced = self.platform.now().is_some();
                lines.push(format!(
                    "publish: skipped, network time {}",
                    if synced { "now synchronised" } else { "unavailable" }
                ));
            }
            None => lines.push("publish: not due".to_string()),
        }
        match pass.slept {
            Some(duration) => lines.push(format!("slept {}s", duration.as_secs())),
            None => lines.push("awake".to_string()),
        }
        Ok(lines)
    }

    fn status_lines(&self) -> Vec<String> {
        let status = self.meter.status();
        let publish = self.controller.publish_machine();
        let pending = self.meter.pending().map_or_else(
            || "none".to_string(),
            |snapshot| {
                format!(
                    "t={} cur={} pts={}",
                    snapshot.captured_at,
                    snapshot.pulse_count,
                    snapshot.pulse_times.len()
                )
            },
        );
        let clock = self
            .platform
            .now()
            .map_or_else(|| "unsynchronised".to_string(), |now| now.to_string());
        let last_publish = status
            .last_publish_time
            .map_or_else(|| "never".to_string(), |at| at.to_string());
        let retry_gate = match publish.earliest_next_attempt() {
            None => "open".to_string(),
            Some(at) if publish.retries() > 0 => {
                format!("{at} (backoff {}s)", publish.retry_delay().as_secs())
            }
            Some(at) => at.to_string(),
        };

        vec![
            format!(
                "count={} last_publish={last_publish} last_count={} publishes={}",
                status.current_pulse_count,
                status.last_publish_pulse_count,
                status.publish_count
            ),
            format!(
                "backlog={} pending={pending} signals={}",
                status.backlog_len, status.pulses_to_signal
            ),
            format!(
                "next_publish={} retries={} retry_gate={retry_gate} faulted={}",
                self.meter.next_publish_time(&self.config),
                publish.retries(),
                self.controller.is_faulted()
            ),
            format!(
                "clock={clock} uptime={} link={} ack={} antenna={}",
                self.platform.uptime(),
                if self.platform.link_available() { "available" } else { "unavailable" },
                if self.platform.acknowledges() { "on" } else { "off" },
                self.platform.antenna()
            ),
        ]
    }

    fn event_lines(&mut self) -> Vec<String> {
        let telemetry = self.controller.telemetry();
        let lines: Vec<String> = telemetry
            .since(self.events_shown)
            .map(ToString::to_string)
            .collect();
        self.events_shown = telemetry.next_id();
        if lines.is_empty() {
            vec!["no new events".to_string()]
        } else {
            lines
        }
    }

    fn persist(&mut self) -> io::Result<()> {
        self.meter
            .persist(&mut self.retained)
            .map(|_| ())
            .map_err(|error| io::Error::other(error.to_string()))
    }
}

fn help_lines(topic: Option<&str>) -> Vec<String> {
    let mut lines = Vec::new();
    match topic {
        Some(target) if !target.is_empty() => {
            if let Some((_, detail)) = HELP_TOPICS
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(target))
            {
                lines.push((*detail).to_string());
            } else {
                lines.push(format!("No help available for `{target}`."));
                lines.push(format!("Available topics: {}", help_topic_list()));
            }
        }
        _ => {
            lines.push("Available commands:".to_string());
            for (_, detail) in HELP_TOPICS {
                lines.push(format!("  {detail}"));
            }
            lines.push("Type `help <topic>` for a specific command.".to_string());
        }
    }
    lines
}

fn help_topic_list() -> String {
    HELP_TOPICS
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Appends every prompt exchange to a log file.
pub struct TranscriptLogger {
    writer: BufWriter<File>,
}

impl TranscriptLogger {
    /// Starts a fresh transcript for `profile`, replacing any previous one.
    pub fn for_profile(profile: TranscriptProfile) -> io::Result<Self> {
        let path = Path::new(profile.log_path());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut logger = Self {
            writer: BufWriter::new(file),
        };
        logger.write_header(profile.header())?;
        Ok(logger)
    }

    /// Opens `path` for appending, creating it if needed.
    pub fn append_to(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut logger = Self {
            writer: BufWriter::new(file),
        };
        logger.write_header("Water meter emulator session")?;
        Ok(logger)
    }

    fn write_header(&mut self, header: &str) -> io::Result<()> {
        writeln!(self.writer, "# {header}")?;
        writeln!(
            self.writer,
            "# Timestamps are simulated milliseconds since session start"
        )?;
        writeln!(self.writer)?;
        self.writer.flush()
    }

    fn append_line(
        &mut self,
        elapsed: Duration,
        role: TranscriptRole,
        line: &str,
    ) -> io::Result<()> {
        writeln!(
            self.writer,
            "[+{:>9} ms] {} {}",
            elapsed.as_millis(),
            role.prefix(),
            line
        )?;
        self.writer.flush()
    }
}

#[derive(Clone, Copy)]
enum TranscriptRole {
    Host,
    Emulator,
}

impl TranscriptRole {
    fn prefix(self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Emulator => "EMU <",
        }
    }
}
