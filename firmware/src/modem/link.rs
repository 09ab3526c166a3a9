//! Async client for the radio module over a buffered UART.

use core::time::Duration;

use embassy_time::with_timeout;
use embedded_io_async::{Read, Write};
use heapless::{Deque, String};
use meter_core::MeterConfig;
use meter_core::Timestamp;
use meter_core::publish::FailureCause;
use meter_core::remote::{Antenna, RemoteCall, RemoteError};
use meter_core::report::SignalQuality;

use super::{
    COMMAND_CAPACITY, Command, LINE_CAPACITY, LineBuffer, ModemLine, PUBLISH_TIMEOUT,
    QUERY_TIMEOUT, Resync, drain_stale, parse_line,
};
use crate::clock::{WallClock, embassy_duration};
use crate::status;

/// Remote calls buffered between scheduler passes.
pub const CALL_QUEUE_DEPTH: usize = 4;

const READ_CHUNK: usize = 32;

/// Failure of a single command exchange.
#[derive(Copy, Clone, Debug, Eq, PartialEq, defmt::Format)]
pub enum ModemError {
    Timeout,
    /// The module answered `ERROR`.
    Rejected,
    Io,
    Overflow,
}

/// Information lines collected before the final `OK`.
#[derive(Copy, Clone, Debug, Default)]
pub struct Reply {
    pub time: Option<Timestamp>,
    pub signal: Option<SignalQuality>,
}

/// Command/response client that also collects unsolicited remote calls.
///
/// A timed-out command may still be answered later. Until a resync handshake
/// has succeeded no other command is sent, so a late final is never taken as
/// the reply to a different command.
pub struct ModemLink<R, W> {
    rx: R,
    tx: W,
    lines: LineBuffer<LINE_CAPACITY>,
    calls: Deque<Result<RemoteCall, RemoteError>, CALL_QUEUE_DEPTH>,
    link_up: bool,
    session_up: bool,
    desynced: bool,
    sync_token: u16,
}

impl<R: Read, W: Write> ModemLink<R, W> {
    pub fn new(rx: R, tx: W) -> Self {
        Self {
            rx,
            tx,
            lines: LineBuffer::new(),
            calls: Deque::new(),
            link_up: false,
            session_up: false,
            desynced: false,
            sync_token: 0,
        }
    }

    pub fn is_link_ready(&self) -> bool {
        self.link_up
    }

    /// Brings the link and session up, synchronising `clock` once attached.
    pub async fn connect(
        &mut self,
        config: &MeterConfig,
        clock: &WallClock,
    ) -> Result<(), FailureCause> {
        if !self.link_up {
            self.execute(&Command::Link, config.link_connect_timeout)
                .await
                .map_err(|_| FailureCause::LinkTimeout)?;
            self.link_up = true;
            status::set_link_up(true);
        }

        if !clock.is_synchronised() {
            self.synchronise(clock).await;
        }

        if !self.session_up {
            self.execute(&Command::Session, config.session_connect_timeout)
                .await
                .map_err(|_| FailureCause::SessionTimeout)?;
            self.session_up = true;
        }
        Ok(())
    }

    /// Queries network time and anchors `clock` to it.
    pub async fn synchronise(&mut self, clock: &WallClock) -> bool {
        let Ok(Reply {
            time: Some(epoch), ..
        }) = self.execute(&Command::Time, QUERY_TIMEOUT).await
        else {
            defmt::warn!("modem: network time unavailable");
            return false;
        };
        clock.synchronise(epoch, crate::runtime::uptime())
    }

    pub async fn signal_quality(&mut self) -> Option<SignalQuality> {
        self.execute(&Command::SignalQuality, QUERY_TIMEOUT)
            .await
            .ok()
            .and_then(|reply| reply.signal)
    }

    /// Sends one event; `true` once the module confirms delivery.
    pub async fn publish(&mut self, event: &str, payload: &str, ack: bool) -> bool {
        let command = Command::Publish {
            event,
            payload,
            ack,
        };
        match self.execute(&command, PUBLISH_TIMEOUT).await {
            Ok(_) => true,
            Err(error) => {
                defmt::warn!("modem: publish failed: {}", error);
                false
            }
        }
    }

    pub async fn select_antenna(&mut self, antenna: Antenna) {
        if let Err(error) = self.execute(&Command::Antenna(antenna), QUERY_TIMEOUT).await {
            defmt::warn!("modem: antenna selection failed: {}", error);
        }
    }

    /// Returns a remote call's result code to the caller.
    pub async fn answer(&mut self, code: i32) {
        if let Err(error) = self.execute(&Command::Return(code), QUERY_TIMEOUT).await {
            defmt::warn!("modem: call result not delivered: {}", error);
        }
    }

    /// Shuts the session and link down. The link is considered down afterwards
    /// even if the module did not answer in time.
    pub async fn disconnect(&mut self, timeout: Duration) {
        if self.link_up || self.session_up {
            if let Err(error) = self.execute(&Command::Off, timeout).await {
                defmt::warn!("modem: disconnect not confirmed: {}", error);
            }
        }
        self.link_up = false;
        self.session_up = false;
        status::set_link_up(false);
    }

    /// Listens for unsolicited lines for up to `window`.
    pub async fn listen(&mut self, window: Duration) {
        while let Ok(Ok(line)) = with_timeout(embassy_duration(window), self.read_line()).await {
            if let ModemLine::Call { name, argument } = parse_line(&line) {
                self.queue_call(name, argument);
                return;
            }
        }
    }

    pub fn take_call(&mut self) -> Option<Result<RemoteCall, RemoteError>> {
        self.calls.pop_front()
    }

    /// Sends `command` and waits up to `timeout` for its final response.
    pub async fn execute(
        &mut self,
        command: &Command<'_>,
        timeout: Duration,
    ) -> Result<Reply, ModemError> {
        if self.desynced {
            self.resynchronise().await?;
        }

        let result = with_timeout(embassy_duration(timeout), self.exchange(command))
            .await
            .unwrap_or(Err(ModemError::Timeout));
        if matches!(result, Err(ModemError::Timeout)) {
            self.desynced = true;
        }
        result
    }

    /// Realigns replies with commands after a timeout.
    ///
    /// Everything buffered is discarded, then `AT+SYNC` is sent with a fresh
    /// token and lines are consumed until its echo and `OK` arrive.
    async fn resynchronise(&mut self) -> Result<(), ModemError> {
        self.sync_token = self.sync_token.wrapping_add(1);
        let mut handshake = Resync::new(self.sync_token);
        self.discard_stale();
        self.lines.clear();

        let result = with_timeout(
            embassy_duration(QUERY_TIMEOUT),
            self.handshake(&mut handshake),
        )
        .await
        .unwrap_or(Err(ModemError::Timeout));

        match result {
            Ok(()) => {
                self.desynced = false;
                defmt::info!("modem: replies realigned (token {})", self.sync_token);
            }
            Err(error) => defmt::warn!("modem: resync failed: {}", error),
        }
        result
    }

    async fn handshake(&mut self, handshake: &mut Resync) -> Result<(), ModemError> {
        self.send(&handshake.command()).await?;
        loop {
            let line = self.read_line().await?;
            let parsed = parse_line(&line);
            if let ModemLine::Call { name, argument } = parsed {
                self.queue_call(name, argument);
            }
            if handshake.accept(&parsed) {
                return Ok(());
            }
        }
    }

    fn discard_stale(&mut self) {
        let calls = &mut self.calls;
        let stale = drain_stale(&mut self.lines, |name, argument| {
            if calls.push_back(RemoteCall::parse(name, argument)).is_err() {
                defmt::warn!("modem: remote call queue full, dropping {}", name);
            }
        });
        if stale > 0 {
            defmt::debug!("modem: discarded {} stale replies", stale);
        }
    }

    async fn send(&mut self, command: &Command<'_>) -> Result<(), ModemError> {
        let mut line = String::<COMMAND_CAPACITY>::new();
        command.encode(&mut line).map_err(|_| ModemError::Overflow)?;
        self.tx
            .write_all(line.as_bytes())
            .await
            .map_err(|_| ModemError::Io)?;
        self.tx.flush().await.map_err(|_| ModemError::Io)
    }

    async fn exchange(&mut self, command: &Command<'_>) -> Result<Reply, ModemError> {
        self.discard_stale();
        self.send(command).await?;

        let mut reply = Reply::default();
        loop {
            let line = self.read_line().await?;
            match parse_line(&line) {
                ModemLine::Ok => return Ok(reply),
                ModemLine::Error => return Err(ModemError::Rejected),
                ModemLine::Time(epoch) => reply.time = Some(epoch),
                ModemLine::SignalQuality(signal) => reply.signal = Some(signal),
                ModemLine::Call { name, argument } => self.queue_call(name, argument),
                ModemLine::Sync(token) => defmt::debug!("modem: late sync echo {}", token),
                ModemLine::Other(other) => defmt::debug!("modem: ignoring '{}'", other),
            }
        }
    }

    async fn read_line(&mut self) -> Result<String<LINE_CAPACITY>, ModemError> {
        loop {
            if let Some(line) = self.lines.next_line() {
                return Ok(line);
            }
            let mut chunk = [0u8; READ_CHUNK];
            let count = self.rx.read(&mut chunk).await.map_err(|_| ModemError::Io)?;
            if self.lines.push(&chunk[..count]).is_err() {
                defmt::warn!("modem: dropping oversized line");
            }
        }
    }

    fn queue_call(&mut self, name: &str, argument: &str) {
        let call = RemoteCall::parse(name, argument);
        if self.calls.push_back(call).is_err() {
            defmt::warn!("modem: remote call queue full, dropping {}", name);
        }
    }
}
