//! Cloud-invoked control functions.
//!
//! Each call arrives as a function name plus a short string argument and is
//! answered with an integer result code: zero on success, negative on
//! rejection. Parsing happens here; the effect of a call is applied by
//! [`MeterController::handle_remote`](crate::controller::MeterController::handle_remote).

use core::fmt;

use winnow::ascii::{digit1, multispace0};
use winnow::combinator::{alt, delimited, eof};
use winnow::error::ContextError;
use winnow::prelude::*;

/// Result code for a call that was applied.
pub const RESULT_OK: i32 = 0;
/// Result code for a malformed argument.
pub const RESULT_INVALID_ARGUMENT: i32 = -1;
/// Result code for an unrecognised function name.
pub const RESULT_UNKNOWN_FUNCTION: i32 = -2;

/// Functions exposed to the cloud side.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RemoteFunction {
    SetReading,
    PublishNow,
    SleepNow,
    SelectAntenna,
}

impl RemoteFunction {
    pub const ALL: [RemoteFunction; 4] = [
        RemoteFunction::SetReading,
        RemoteFunction::PublishNow,
        RemoteFunction::SleepNow,
        RemoteFunction::SelectAntenna,
    ];

    /// Name the function is registered under.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            RemoteFunction::SetReading => "setReading",
            RemoteFunction::PublishNow => "publishNow",
            RemoteFunction::SleepNow => "sleepNow",
            RemoteFunction::SelectAntenna => "selectAntenna",
        }
    }

    /// Looks up a function by its registered name.
    pub fn from_name(name: &str) -> Result<Self, RemoteError> {
        Self::name_parser()
            .parse(name)
            .map_err(|_| RemoteError::UnknownFunction)
    }

    fn name_parser<'a>() -> impl Parser<&'a str, RemoteFunction, ContextError> {
        delimited(
            multispace0,
            alt((
                "setReading".value(RemoteFunction::SetReading),
                "publishNow".value(RemoteFunction::PublishNow),
                "sleepNow".value(RemoteFunction::SleepNow),
                "selectAntenna".value(RemoteFunction::SelectAntenna),
            )),
            multispace0,
        )
    }

    #[must_use]
    pub const fn to_raw(self) -> u8 {
        match self {
            RemoteFunction::SetReading => 0x01,
            RemoteFunction::PublishNow => 0x02,
            RemoteFunction::SleepNow => 0x03,
            RemoteFunction::SelectAntenna => 0x04,
        }
    }

    #[must_use]
    pub const fn from_raw(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(RemoteFunction::SetReading),
            0x02 => Some(RemoteFunction::PublishNow),
            0x03 => Some(RemoteFunction::SleepNow),
            0x04 => Some(RemoteFunction::SelectAntenna),
            _ => None,
        }
    }
}

impl fmt::Display for RemoteFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Radio antenna selection.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum Antenna {
    #[default]
    Automatic,
    Internal,
    External,
}

impl Antenna {
    #[must_use]
    pub const fn from_raw(value: u8) -> Option<Self> {
        match value {
            0 => Some(Antenna::Automatic),
            1 => Some(Antenna::Internal),
            2 => Some(Antenna::External),
            _ => None,
        }
    }

    #[must_use]
    pub const fn to_raw(self) -> u8 {
        match self {
            Antenna::Automatic => 0,
            Antenna::Internal => 1,
            Antenna::External => 2,
        }
    }
}

impl fmt::Display for Antenna {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Antenna::Automatic => "automatic",
            Antenna::Internal => "internal",
            Antenna::External => "external",
        };
        f.write_str(label)
    }
}

/// Parsed remote call.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RemoteCall {
    SetReading(u32),
    PublishNow,
    SleepNow,
    SelectAntenna(Antenna),
}

impl RemoteCall {
    /// Parses a call from its function name and raw argument.
    pub fn parse(name: &str, argument: &str) -> Result<Self, RemoteError> {
        let function = RemoteFunction::from_name(name)?;
        let invalid = RemoteError::InvalidArgument(function);
        match function {
            RemoteFunction::SetReading => decimal::<u32>()
                .parse(argument)
                .map(RemoteCall::SetReading)
                .map_err(|_| invalid),
            RemoteFunction::PublishNow => Ok(RemoteCall::PublishNow),
            RemoteFunction::SleepNow => Ok(RemoteCall::SleepNow),
            RemoteFunction::SelectAntenna => antenna()
                .parse(argument)
                .map(RemoteCall::SelectAntenna)
                .map_err(|_| invalid),
        }
    }

    #[must_use]
    pub const fn function(self) -> RemoteFunction {
        match self {
            RemoteCall::SetReading(_) => RemoteFunction::SetReading,
            RemoteCall::PublishNow => RemoteFunction::PublishNow,
            RemoteCall::SleepNow => RemoteFunction::SleepNow,
            RemoteCall::SelectAntenna(_) => RemoteFunction::SelectAntenna,
        }
    }
}

impl fmt::Display for RemoteCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteCall::SetReading(value) => write!(f, "setReading({value})"),
            RemoteCall::SelectAntenna(antenna) => write!(f, "selectAntenna({antenna})"),
            other => write!(f, "{}()", other.function()),
        }
    }
}

fn decimal<'a, T: core::str::FromStr>() -> impl Parser<&'a str, T, ContextError> {
    delimited(multispace0, digit1.parse_to::<T>(), multispace0)
}

fn antenna<'a>() -> impl Parser<&'a str, Antenna, ContextError> {
    alt((
        (multispace0, eof).value(Antenna::Automatic),
        decimal::<u8>().verify_map(Antenna::from_raw),
    ))
}

/// Reasons a remote call is rejected.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RemoteError {
    UnknownFunction,
    InvalidArgument(RemoteFunction),
}

impl RemoteError {
    /// Result code reported back to the caller.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            RemoteError::UnknownFunction => RESULT_UNKNOWN_FUNCTION,
            RemoteError::InvalidArgument(_) => RESULT_INVALID_ARGUMENT,
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteError::UnknownFunction => f.write_str("unknown function"),
            RemoteError::InvalidArgument(function) => {
                write!(f, "invalid argument for {function}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_reading_accepts_padded_decimal() {
        assert_eq!(
            RemoteCall::parse("setReading", " 150\n"),
            Ok(RemoteCall::SetReading(150))
        );
    }

    #[test]
    fn set_reading_rejects_malformed_input() {
        for argument in ["", "-5", "12a", "1.5", "4294967296", "0x10"] {
            let result = RemoteCall::parse("setReading", argument);
            assert_eq!(
                result,
                Err(RemoteError::InvalidArgument(RemoteFunction::SetReading)),
                "{argument:?}"
            );
            assert_eq!(result.unwrap_err().code(), RESULT_INVALID_ARGUMENT);
        }
    }

    #[test]
    fn antenna_defaults_to_automatic() {
        assert_eq!(
            RemoteCall::parse("selectAntenna", ""),
            Ok(RemoteCall::SelectAntenna(Antenna::Automatic))
        );
        assert_eq!(
            RemoteCall::parse("selectAntenna", "2"),
            Ok(RemoteCall::SelectAntenna(Antenna::External))
        );
        assert_eq!(
            RemoteCall::parse("selectAntenna", "3"),
            Err(RemoteError::InvalidArgument(RemoteFunction::SelectAntenna))
        );
    }

    #[test]
    fn unknown_function_has_distinct_code() {
        let error = RemoteCall::parse("reboot", "").unwrap_err();
        assert_eq!(error, RemoteError::UnknownFunction);
        assert_eq!(error.code(), RESULT_UNKNOWN_FUNCTION);
    }

    #[test]
    fn names_round_trip() {
        for function in RemoteFunction::ALL {
            assert_eq!(RemoteFunction::from_name(function.name()), Ok(function));
            assert_eq!(RemoteFunction::from_raw(function.to_raw()), Some(function));
        }
    }
}
