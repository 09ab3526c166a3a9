use std::env;
use std::io;
use std::path::PathBuf;
use std::process;

use meter_core::Meter;
use meter_emulator::session::{Session, TranscriptLogger};

fn main() -> io::Result<()> {
    let log_path = parse_log_path().unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("Usage: meter-emulator [--log <path>]");
        process::exit(2);
    });
    let transcript = log_path
        .as_deref()
        .map(TranscriptLogger::append_to)
        .transpose()?;

    let meter = Meter::new();
    let mut session = Session::new(&meter, transcript)?;
    session.run(io::stdin().lock(), io::stdout().lock())
}

fn parse_log_path() -> Result<Option<PathBuf>, String> {
    let mut args = env::args().skip(1);
    let Some(arg) = args.next() else {
        return Ok(None);
    };

    if let Some(value) = arg.strip_prefix("--log=") {
        Ok(Some(PathBuf::from(value)))
    } else if arg == "--log" {
        args.next()
            .map(|value| Some(PathBuf::from(value)))
            .ok_or_else(|| "Expected value after --log".to_string())
    } else {
        Err(format!("Unexpected argument `{arg}`"))
    }
}
