//! JSON song definitions.
//!
//! ```json
//! {
//!   "loop_mode": "forever",
//!   "master_volume": 0.8,
//!   "master_effects": [{ "type": "biquad", "filter_type": "lowpass", "frequency": 4000 }],
//!   "tracks": [
//!     { "mml": "t140 o5 l8 cdefgab>c", "pan": -0.3 },
//!     { "mml": "t140 o3 @1 c2 g2", "envelope": { "attack": 0.0, "release": 0.05 } }
//!   ]
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::dsp::effect::EffectConfig;
use crate::dsp::envelope::Adsr;
use crate::error::EngineError;
use crate::mml;
use crate::sequencer::LoopMode;
use crate::song::Song;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SongDefinition {
    pub tracks: Vec<TrackDefinition>,
    pub loop_mode: LoopMode,
    pub master_volume: f32,
    pub master_effects: Vec<EffectConfig>,
}

impl Default for SongDefinition {
    fn default() -> Self {
        SongDefinition {
            tracks: Vec::new(),
            loop_mode: LoopMode::Once,
            master_volume: 1.0,
            master_effects: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackDefinition {
    pub mml: String,
    /// Voice envelope; the voice default when absent.
    pub envelope: Option<Adsr>,
    /// Stereo position in [-1, 1]; centered when absent.
    pub pan: Option<f32>,
    pub volume: f32,
    pub effects: Vec<EffectConfig>,
}

impl Default for TrackDefinition {
    fn default() -> Self {
        TrackDefinition {
            mml: String::new(),
            envelope: None,
            pan: None,
            volume: 1.0,
            effects: Vec::new(),
        }
    }
}

impl SongDefinition {
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Build a stopped song with one track per definition entry.
    pub fn build(&self, config: &EngineConfig) -> Song {
        let mut song = Song::new(self.tracks.len(), config.clone());

        for (i, track) in self.tracks.iter().enumerate() {
            if let Some(adsr) = track.envelope {
                song.set_track_envelope(i, adsr);
            }
            for effect in &track.effects {
                song.add_track_effect(i, effect.build(config.sample_rate));
            }
            if let Some(pan) = track.pan {
                song.set_pan(i, pan);
            }
            song.set_track_volume(i, track.volume);
            song.set_track_sequence(i, mml::parse(&track.mml));
        }

        for effect in &self.master_effects {
            song.add_master_effect(effect.build(config.sample_rate));
        }
        song.set_master_volume(self.master_volume);
        song.set_loop(self.loop_mode);
        song
    }
}

impl Song {
    /// Parse a JSON `SongDefinition` and build it.
    pub fn from_definition(json: &str, config: &EngineConfig) -> Result<Song, EngineError> {
        Ok(SongDefinition::from_json(json)?.build(config))
    }
}
