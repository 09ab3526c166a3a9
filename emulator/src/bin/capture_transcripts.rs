use std::env;
use std::io;

use meter_core::Meter;
use meter_emulator::session::{Session, TranscriptLogger, TranscriptProfile};

fn main() -> io::Result<()> {
    let requested: Vec<String> = env::args().skip(1).collect();
    let profiles = if requested.is_empty() {
        TranscriptProfile::ALL.to_vec()
    } else {
        requested
            .iter()
            .map(|tag| TranscriptProfile::from_tag(tag).map_err(io::Error::other))
            .collect::<io::Result<Vec<_>>>()?
    };

    for profile in profiles {
        record_profile(profile)?;
        println!("recorded {}", profile.log_path());
    }
    Ok(())
}

fn record_profile(profile: TranscriptProfile) -> io::Result<()> {
    let meter = Meter::new();
    let transcript = TranscriptLogger::for_profile(profile)?;
    let mut session = Session::new(&meter, Some(transcript))?;
    for line in profile.script() {
        let _ = session.handle_command(line)?;
    }
    Ok(())
}
