//! mml-play — play an MML string (or a JSON song definition) on the
//! default output device.
//!
//! ```text
//! mml-play "t150 o5 l8 cdefgab>c"
//! mml-play --song song.json
//! ```

use std::env;
use std::fs;
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use mmlsynth_core::config::EngineConfig;
use mmlsynth_core::error::EngineError;
use mmlsynth_core::mml;
use mmlsynth_core::song::Song;
use tracing_subscriber::EnvFilter;

fn usage() -> ExitCode {
    eprintln!("usage: mml-play <mml> | mml-play --song <file.json>");
    ExitCode::FAILURE
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let song = match args.as_slice() {
        [flag, path] if flag == "--song" => match fs::read_to_string(path) {
            Ok(json) => Song::from_definition(&json, &EngineConfig::default()),
            Err(e) => {
                eprintln!("cannot read {path}: {e}");
                return ExitCode::FAILURE;
            }
        },
        [source] if !source.starts_with("--") => Ok(song_from_mml(source)),
        _ => return usage(),
    };

    match song.and_then(play) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn song_from_mml(source: &str) -> Song {
    let compiled = mml::parse_with_diagnostics(source);
    if !compiled.diagnostics.is_empty() {
        match mml::render_diagnostics("<arg>", source, &compiled.diagnostics) {
            Ok(report) => eprint!("{report}"),
            Err(e) => tracing::warn!("could not render diagnostics: {e}"),
        }
    }

    let mut song = Song::new(1, EngineConfig::default());
    song.set_track_sequence(0, compiled.notes);
    song
}

fn play(mut song: Song) -> Result<(), EngineError> {
    song.start_output()?;
    song.play();
    tracing::info!(tracks = song.track_count(), "playing");

    while song.is_playing() || song.is_sounding() {
        thread::sleep(Duration::from_millis(50));
    }
    // Let the device drain its last buffer.
    thread::sleep(Duration::from_millis(200));
    song.stop();
    Ok(())
}
