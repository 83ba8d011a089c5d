pub mod bgm;
pub mod config;
pub mod definition;
pub mod dsp;
pub mod error;
pub mod mml;
pub mod note;
pub mod sequencer;
pub mod song;
pub mod synth;
pub mod timer;

pub use config::{EngineConfig, TickMode};
pub use error::{EngineError, OutputError};
pub use note::{NoteEvent, NoteSequence, PitchClass};
pub use sequencer::{LoopMode, Sequencer};
pub use song::Song;

use wasm_bindgen::prelude::*;

/// The crate version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Longest render the WASM entry point will produce, in seconds.
const MAX_RENDER_SECONDS: f32 = 600.0;

/// WASM-exposed: return the mmlsynth-core version string.
#[wasm_bindgen]
pub fn core_version() -> String {
    VERSION.to_string()
}

/// WASM-exposed: compile MML into a JSON array of note events.
#[wasm_bindgen]
pub fn parse_mml(source: &str) -> Result<JsValue, JsValue> {
    let notes = mml::parse(source);
    serde_wasm_bindgen::to_value(&notes).map_err(|e| JsValue::from_str(&format!("{e}")))
}

/// WASM-exposed: render MML to mono f32 samples.
/// Returns the raw audio buffer for AudioWorklet playback.
#[wasm_bindgen]
pub fn render_mml_samples(source: &str, sample_rate: u32) -> Vec<f32> {
    dsp::renderer::render_mml(source, sample_rate.max(1), MAX_RENDER_SECONDS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_matches_manifest() {
        assert_eq!(core_version(), env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn render_entry_point_produces_audio() {
        let samples = render_mml_samples("t240 l16 cdefg", 8000);
        assert!(!samples.is_empty());
        assert!(samples.iter().any(|&s| s != 0.0));
    }
}
