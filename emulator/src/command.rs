//! Prompt command grammar.

use std::fmt;

use meter_core::boot::ResetReason;
use winnow::ascii::{dec_uint, space0, space1};
use winnow::combinator::{alt, eof, opt, preceded, terminated};
use winnow::error::ContextError;
use winnow::prelude::*;
use winnow::token::{rest, take_till};

/// One line typed at the emulator prompt.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum EmulatorCommand {
    /// Closes the switch for a full debounce window `count` times.
    Pulse(u32),
    /// Chatters the switch open before the window expires.
    Bounce,
    /// Lets `seconds` pass without running a scheduler pass.
    Advance(u64),
    Link(bool),
    Ack(bool),
    Call { name: String, argument: String },
    Reset(ResetReason),
    Tick,
    Status,
    Events,
    Help(Option<String>),
    Exit,
}

/// Error for a line the grammar does not accept.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandError {
    pub input: String,
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unrecognised command `{}`", self.input)
    }
}

impl std::error::Error for CommandError {}

/// Parses one prompt line. Keywords are case-sensitive.
pub fn parse_command(line: &str) -> Result<EmulatorCommand, CommandError> {
    terminated(command(), (space0, eof))
        .parse(line.trim())
        .map_err(|_| CommandError {
            input: line.trim().to_owned(),
        })
}

fn command<'a>() -> impl Parser<&'a str, EmulatorCommand, ContextError> {
    alt((
        preceded("pulse", opt(preceded(space1, dec_uint::<_, u32, _>)))
            .map(|count| EmulatorCommand::Pulse(count.unwrap_or(1))),
        "bounce".value(EmulatorCommand::Bounce),
        preceded(("advance", space1), dec_uint::<_, u64, _>).map(EmulatorCommand::Advance),
        preceded(("link", space1), switch()).map(EmulatorCommand::Link),
        preceded(("ack", space1), switch()).map(EmulatorCommand::Ack),
        preceded(("call", space1), call()),
        preceded(("reset", space1), reset_reason()).map(EmulatorCommand::Reset),
        "tick".value(EmulatorCommand::Tick),
        "status".value(EmulatorCommand::Status),
        "events".value(EmulatorCommand::Events),
        preceded("help", opt(preceded(space1, rest)))
            .map(|topic: Option<&str>| EmulatorCommand::Help(topic.map(|t| t.trim().to_owned()))),
        alt(("exit", "quit")).value(EmulatorCommand::Exit),
    ))
}

fn switch<'a>() -> impl Parser<&'a str, bool, ContextError> {
    alt((
        alt(("up", "on")).value(true),
        alt(("down", "off")).value(false),
    ))
}

fn call<'a>() -> impl Parser<&'a str, EmulatorCommand, ContextError> {
    (
        take_till(1.., |c: char| c.is_ascii_whitespace()),
        opt(preceded(space1, rest)),
    )
        .map(|(name, argument): (&str, Option<&str>)| EmulatorCommand::Call {
            name: name.to_owned(),
            argument: argument.unwrap_or_default().trim().to_owned(),
        })
}

fn reset_reason<'a>() -> impl Parser<&'a str, ResetReason, ContextError> {
    alt((
        "pin".value(ResetReason::PinReset),
        "power".value(ResetReason::PowerDown),
        "sleep".value(ResetReason::WakeFromSleep),
        "update".value(ResetReason::FirmwareUpdate),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pulse_counts() {
        assert_eq!(parse_command("pulse"), Ok(EmulatorCommand::Pulse(1)));
        assert_eq!(parse_command("pulse 25"), Ok(EmulatorCommand::Pulse(25)));
        assert!(parse_command("pulse many").is_err());
    }

    #[test]
    fn parses_switches_and_resets() {
        assert_eq!(parse_command("link down"), Ok(EmulatorCommand::Link(false)));
        assert_eq!(parse_command("ack on"), Ok(EmulatorCommand::Ack(true)));
        assert_eq!(
            parse_command("reset power"),
            Ok(EmulatorCommand::Reset(ResetReason::PowerDown))
        );
        assert!(parse_command("reset brownout").is_err());
    }

    #[test]
    fn keeps_call_arguments_verbatim() {
        assert_eq!(
            parse_command("call setReading 150"),
            Ok(EmulatorCommand::Call {
                name: "setReading".to_owned(),
                argument: "150".to_owned()
            })
        );
        assert_eq!(
            parse_command("call publishNow"),
            Ok(EmulatorCommand::Call {
                name: "publishNow".to_owned(),
                argument: String::new()
            })
        );
    }

    #[test]
    fn parses_bare_keywords() {
        assert_eq!(parse_command("  tick  "), Ok(EmulatorCommand::Tick));
        assert_eq!(
            parse_command("help call"),
            Ok(EmulatorCommand::Help(Some("call".to_owned())))
        );
        assert_eq!(parse_command("quit"), Ok(EmulatorCommand::Exit));
        assert!(parse_command("ticktock").is_err());
    }
}
