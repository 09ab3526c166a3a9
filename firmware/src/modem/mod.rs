#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Line protocol spoken with the companion radio module.
//!
//! Every command is one `AT+...` line terminated by CRLF. The module answers
//! with zero or more information lines followed by `OK` or `ERROR`, and may
//! interleave unsolicited `+CALL:` lines carrying cloud function invocations
//! at any time while the session is up.
//!
//! Replies carry no tag tying them to a command, so a final that arrives after
//! its command timed out would be taken as the answer to the next one. After
//! a timeout the link realigns with an `AT+SYNC=<token>` handshake (see
//! [`Resync`]) before sending anything else.

use core::fmt::{self, Write as _};
use core::time::Duration;

use heapless::{String, Vec};
use meter_core::Timestamp;
use meter_core::config::MAX_EVENT_DATA_LENGTH;
use meter_core::remote::Antenna;
use meter_core::report::SignalQuality;
use winnow::ascii::{dec_int, dec_uint, space0};
use winnow::combinator::{alt, eof, opt, preceded, separated_pair, terminated};
use winnow::error::ContextError;
use winnow::prelude::*;
use winnow::token::{rest, take_till};

#[cfg(target_os = "none")]
pub mod link;

/// Longest command line: the `AT+PUB` prefix plus a full report.
pub const COMMAND_CAPACITY: usize = MAX_EVENT_DATA_LENGTH + 48;

/// Longest response line the module sends.
pub const LINE_CAPACITY: usize = 96;

/// Bound on queries that the module answers from cached state.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound on an acknowledged publish.
pub const PUBLISH_TIMEOUT: Duration = Duration::from_secs(20);

const RSSI_FLOOR_DBM: f32 = -113.0;
const RSSI_SPAN_DB: f32 = 62.0;
const QUALITY_FLOOR_DB: f32 = -20.0;
const QUALITY_SPAN_DB: f32 = 17.0;

/// Commands understood by the radio module.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Command<'a> {
    /// Attach to the cellular network.
    Link,
    /// Open the cloud session.
    Session,
    Publish {
        event: &'a str,
        payload: &'a str,
        ack: bool,
    },
    /// Query network time.
    Time,
    /// Query received signal strength and quality.
    SignalQuality,
    Antenna(Antenna),
    /// Return a remote call's result code to the cloud.
    Return(i32),
    /// Close the session and detach.
    Off,
    /// Ask the module to echo `token`; used to realign after a lost reply.
    Sync(u16),
}

impl Command<'_> {
    /// Writes the command line, CRLF included, into `out`.
    pub fn encode<const N: usize>(&self, out: &mut String<N>) -> fmt::Result {
        out.clear();
        write!(out, "{self}\r\n")
    }
}

impl fmt::Display for Command<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Link => f.write_str("AT+LINK"),
            Command::Session => f.write_str("AT+SESSION"),
            Command::Publish {
                event,
                payload,
                ack,
            } => write!(f, "AT+PUB={event},{},{payload}", u8::from(*ack)),
            Command::Time => f.write_str("AT+TIME?"),
            Command::SignalQuality => f.write_str("AT+CSQ?"),
            Command::Antenna(antenna) => write!(f, "AT+ANT={}", antenna.to_raw()),
            Command::Return(code) => write!(f, "AT+RET={code}"),
            Command::Off => f.write_str("AT+OFF"),
            Command::Sync(token) => write!(f, "AT+SYNC={token}"),
        }
    }
}

/// One decoded line from the module.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum ModemLine<'a> {
    Ok,
    Error,
    Time(Timestamp),
    SignalQuality(SignalQuality),
    Call { name: &'a str, argument: &'a str },
    /// Echo of an `AT+SYNC` token.
    Sync(u16),
    Other(&'a str),
}

/// Decodes a line with its terminator already stripped.
pub fn parse_line(line: &str) -> ModemLine<'_> {
    response().parse(line).unwrap_or(ModemLine::Other(line))
}

fn response<'a>() -> impl Parser<&'a str, ModemLine<'a>, ContextError> {
    alt((
        terminated("OK", eof).value(ModemLine::Ok),
        terminated("ERROR", eof).value(ModemLine::Error),
        preceded(("+TIME:", space0), dec_uint::<_, u32, _>)
            .verify_map(Timestamp::from_raw)
            .map(ModemLine::Time),
        preceded(("+SYNC:", space0), dec_uint::<_, u16, _>).map(ModemLine::Sync),
        preceded(
            ("+CSQ:", space0),
            separated_pair(dec_int::<_, i16, _>, ',', dec_int::<_, i16, _>),
        )
        .map(|(rssi, quality)| ModemLine::SignalQuality(signal_quality(rssi, quality))),
        preceded(
            ("+CALL:", space0),
            (take_till(0.., ','), opt(preceded(',', rest))),
        )
        .map(|(name, argument)| ModemLine::Call {
            name,
            argument: argument.unwrap_or_default(),
        }),
    ))
}

/// Converts a `+CSQ` reading into absolute and percentage terms.
pub fn signal_quality(rssi_dbm: i16, quality_db: i16) -> SignalQuality {
    let strength_dbm = f32::from(rssi_dbm);
    let quality_db = f32::from(quality_db);
    SignalQuality {
        strength_dbm,
        quality_db,
        strength_percent: percent(strength_dbm, RSSI_FLOOR_DBM, RSSI_SPAN_DB),
        quality_percent: percent(quality_db, QUALITY_FLOOR_DB, QUALITY_SPAN_DB),
    }
}

fn percent(value: f32, floor: f32, span: f32) -> f32 {
    ((value - floor) / span * 100.0).clamp(0.0, 100.0)
}

/// Handshake that realigns replies with commands after a reply was lost.
///
/// The module answers strictly in order, so once the echo of a fresh token
/// and the `OK` closing it have been read, every stale final is behind us.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Resync {
    token: u16,
    echoed: bool,
}

impl Resync {
    pub const fn new(token: u16) -> Self {
        Self {
            token,
            echoed: false,
        }
    }

    pub const fn command(&self) -> Command<'static> {
        Command::Sync(self.token)
    }

    /// Feeds one received line; returns `true` once the handshake is complete.
    pub fn accept(&mut self, line: &ModemLine<'_>) -> bool {
        match *line {
            ModemLine::Sync(token) => {
                self.echoed = token == self.token;
                false
            }
            ModemLine::Ok => self.echoed,
            ModemLine::Error => {
                self.echoed = false;
                false
            }
            _ => false,
        }
    }
}

/// Empties the complete lines already buffered before a new command goes out.
///
/// Nothing received before a command is sent can answer it. Remote calls are
/// handed to `on_call`; everything else is dropped. Returns the number of
/// stale `OK`/`ERROR` finals discarded.
pub fn drain_stale<const N: usize>(
    lines: &mut LineBuffer<N>,
    mut on_call: impl FnMut(&str, &str),
) -> usize {
    let mut stale = 0;
    while let Some(line) = lines.next_line() {
        match parse_line(&line) {
            ModemLine::Call { name, argument } => on_call(name, argument),
            ModemLine::Ok | ModemLine::Error => stale += 1,
            _ => {}
        }
    }
    stale
}

/// Error raised when an incoming line outgrows the receive buffer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LineOverflow;

/// Reassembles CRLF-terminated lines from arbitrary UART chunks.
///
/// A line longer than `N` is dropped up to its terminator; complete lines
/// buffered before it and bytes after it are kept.
pub struct LineBuffer<const N: usize> {
    pending: Vec<u8, N>,
    skipping: bool,
}

impl<const N: usize> LineBuffer<N> {
    pub const fn new() -> Self {
        Self {
            pending: Vec::new(),
            skipping: false,
        }
    }

    /// Appends received bytes, reporting whether a line had to be dropped.
    pub fn push(&mut self, bytes: &[u8]) -> Result<(), LineOverflow> {
        let mut overflowed = false;
        for &byte in bytes {
            if self.skipping {
                self.skipping = byte != b'\n';
                continue;
            }
            if self.pending.push(byte).is_err() {
                self.drop_partial_line();
                self.skipping = byte != b'\n';
                overflowed = true;
            }
        }
        if overflowed { Err(LineOverflow) } else { Ok(()) }
    }

    fn drop_partial_line(&mut self) {
        let complete = self
            .pending
            .iter()
            .rposition(|&byte| byte == b'\n')
            .map_or(0, |end| end + 1);
        self.pending.truncate(complete);
    }

    /// Pops the next complete, non-empty line.
    ///
    /// Lines that are not valid UTF-8 are dropped.
    pub fn next_line(&mut self) -> Option<String<N>> {
        while let Some(end) = self.pending.iter().position(|&byte| byte == b'\n') {
            let mut line = String::new();
            let raw = self.pending[..end].trim_ascii();
            let decoded = core::str::from_utf8(raw).ok().map(|text| line.push_str(text));

            let remaining = self.pending.len() - (end + 1);
            self.pending.copy_within(end + 1.., 0);
            self.pending.truncate(remaining);

            if matches!(decoded, Some(Ok(()))) && !line.is_empty() {
                return Some(line);
            }
        }
        None
    }

    /// Forgets everything buffered, including a partial line.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.skipping = false;
    }
}
