//! Offline renderer — runs a host-driven song to completion into a sample
//! buffer, as fast as the CPU allows.

use tracing::{debug, warn};

use crate::config::{EngineConfig, TickMode};
use crate::song::Song;

/// Rendering granularity: the sequencer is advanced once per block.
pub const BLOCK_MS: u32 = 10;

/// Render `song` from the start until every track has finished and every
/// release tail has decayed, or `max_seconds` has been produced.
///
/// Returns interleaved samples in the song's channel layout. The song must
/// use `TickMode::Manual`; a timer-driven song is left untouched.
pub fn render_song(song: &mut Song, max_seconds: f32) -> Vec<f32> {
    if song.config().tick_mode != TickMode::Manual {
        warn!("offline rendering needs TickMode::Manual; nothing rendered");
        return Vec::new();
    }

    let sample_rate = song.sample_rate();
    let channels = song.channels();
    let block_frames = (sample_rate * BLOCK_MS / 1000).max(1) as usize;
    let block_secs = block_frames as f32 / sample_rate as f32;
    let max_frames = (max_seconds.max(0.0) * sample_rate as f32) as usize;

    let mut out = Vec::new();
    let mut block = vec![0.0; block_frames * channels];
    let mut frames = 0;

    song.play();
    while frames < max_frames {
        let n = block_frames.min(max_frames - frames);
        let buf = &mut block[..n * channels];
        song.generate_samples(buf);
        out.extend_from_slice(buf);
        frames += n;

        song.update(block_secs);
        if !song.is_playing() && !song.is_sounding() {
            break;
        }
    }
    song.stop();

    debug!(frames, sample_rate, channels, "offline render finished");
    out
}

/// Compile `source` as a single-track song and render it in mono.
pub fn render_mml(source: &str, sample_rate: u32, max_seconds: f32) -> Vec<f32> {
    let config = EngineConfig {
        sample_rate,
        channels: 1,
        ..EngineConfig::default()
    }
    .manual();
    let mut song = Song::new(1, config);
    song.set_track_mml(0, source);
    render_song(&mut song, max_seconds)
}
