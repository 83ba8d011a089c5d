//! Song — a fixed set of (voice, sequencer) tracks summed by one mixer.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::{EngineConfig, TickMode};
use crate::dsp::effect::Effect;
use crate::dsp::envelope::Adsr;
use crate::dsp::mixer::{AudioMixer, MixerHandle, SharedMixer, VoiceId};
use crate::dsp::output::AudioOutput;
use crate::dsp::voice::{Voice, VoiceHandle};
use crate::error::OutputError;
use crate::mml;
use crate::note::NoteSequence;
use crate::sequencer::{LoopMode, Sequencer};

struct SongTrack {
    voice_id: VoiceId,
    voice: VoiceHandle,
    sequencer: Sequencer,
}

/// Multi-track sequencer.
///
/// Every track owns a headless voice registered with the song's mixer. The
/// song renders through `generate_samples` or, after `start_output`, through
/// its own device stream.
pub struct Song {
    config: EngineConfig,
    tracks: Vec<SongTrack>,
    mixer: SharedMixer,
    mixer_handle: MixerHandle,
    paused: bool,
    output: Option<AudioOutput>,
}

pub(crate) fn lock_mixer(mixer: &Mutex<AudioMixer>) -> MutexGuard<'_, AudioMixer> {
    mixer.lock().unwrap_or_else(|e| {
        warn!("mixer mutex poisoned; continuing");
        e.into_inner()
    })
}

impl Song {
    pub fn new(track_count: usize, config: EngineConfig) -> Self {
        let mut mixer = AudioMixer::new(config.sample_rate, config.channels);
        let mixer_handle = mixer.handle();

        let tracks = (0..track_count)
            .map(|_| {
                let voice = Voice::with_capacity(config.sample_rate, config.command_capacity);
                let handle = voice.handle();
                let voice_id = mixer.register(voice);
                SongTrack {
                    voice_id,
                    sequencer: Sequencer::new(handle.clone(), &config),
                    voice: handle,
                }
            })
            .collect();

        debug!(track_count, sample_rate = config.sample_rate, "song created");

        Song {
            config,
            tracks,
            mixer: mixer.into_shared(),
            mixer_handle,
            paused: false,
            output: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.config.channel_count()
    }

    // ── Tracks ─────────────────────────────────────────────────

    /// Assign a note sequence to track `index`. Unknown tracks are ignored.
    pub fn set_track_sequence(&mut self, index: usize, notes: NoteSequence) {
        if let Some(track) = self.tracks.get_mut(index) {
            track.sequencer.set_sequence(notes);
        }
    }

    /// Compile `source` as MML and assign it to track `index`.
    pub fn set_track_mml(&mut self, index: usize, source: &str) {
        if index < self.tracks.len() {
            self.set_track_sequence(index, mml::parse(source));
        }
    }

    pub fn sequencer(&self, index: usize) -> Option<&Sequencer> {
        self.tracks.get(index).map(|t| &t.sequencer)
    }

    pub fn sequencer_mut(&mut self, index: usize) -> Option<&mut Sequencer> {
        self.tracks.get_mut(index).map(|t| &mut t.sequencer)
    }

    /// Control handle for the voice behind track `index`.
    pub fn voice(&self, index: usize) -> Option<&VoiceHandle> {
        self.tracks.get(index).map(|t| &t.voice)
    }

    pub fn set_track_volume(&mut self, index: usize, volume: f32) {
        if let Some(track) = self.tracks.get_mut(index) {
            track.sequencer.set_volume(volume);
        }
    }

    pub fn set_track_envelope(&mut self, index: usize, adsr: Adsr) {
        if let Some(track) = self.tracks.get(index) {
            track.voice.set_envelope(adsr);
        }
    }

    pub fn add_track_effect(&mut self, index: usize, effect: Box<dyn Effect>) {
        if let Some(track) = self.tracks.get(index) {
            track.voice.add_effect(effect);
        }
    }

    pub fn clear_track_effects(&mut self, index: usize) {
        if let Some(track) = self.tracks.get(index) {
            track.voice.clear_effects();
        }
    }

    /// Equal-power stereo position of track `index`, `pan` in [-1, 1].
    pub fn set_pan(&mut self, index: usize, pan: f32) {
        if let Some(track) = self.tracks.get(index) {
            self.mixer_handle.set_pan(track.voice_id, pan);
        }
    }

    pub fn set_send_level(&mut self, index: usize, channel: usize, level: f32) {
        if let Some(track) = self.tracks.get(index) {
            self.mixer_handle
                .set_send_level(track.voice_id, channel, level);
        }
    }

    // ── Song-wide settings ─────────────────────────────────────

    pub fn set_master_volume(&mut self, volume: f32) {
        self.mixer_handle.set_master_volume(volume);
    }

    pub fn master_volume(&self) -> f32 {
        self.mixer_handle.master_volume()
    }

    pub fn add_master_effect(&mut self, effect: Box<dyn Effect>) {
        self.mixer_handle.add_effect(effect);
    }

    pub fn clear_master_effects(&mut self) {
        self.mixer_handle.clear_effects();
    }

    /// Master effects in use as of the last rendered block.
    pub fn master_effect_count(&self) -> usize {
        self.mixer_handle.effect_count()
    }

    pub fn set_loop(&mut self, mode: LoopMode) {
        for track in &mut self.tracks {
            track.sequencer.set_loop(mode);
        }
    }

    pub fn set_tick_interval(&mut self, interval: Duration) {
        for track in &mut self.tracks {
            track.sequencer.set_tick_interval(interval);
        }
    }

    // ── Transport ──────────────────────────────────────────────

    pub fn play(&mut self) {
        self.paused = false;
        for track in &mut self.tracks {
            track.sequencer.play();
        }
    }

    pub fn stop(&mut self) {
        self.paused = false;
        for track in &mut self.tracks {
            track.sequencer.stop();
        }
    }

    pub fn pause(&mut self) {
        if self.paused {
            return;
        }
        self.paused = true;
        for track in &mut self.tracks {
            track.sequencer.pause();
        }
    }

    pub fn resume(&mut self) {
        if !self.paused {
            return;
        }
        self.paused = false;
        for track in &mut self.tracks {
            track.sequencer.resume();
        }
    }

    /// True while any track is still playing its sequence.
    pub fn is_playing(&self) -> bool {
        self.tracks.iter().any(|t| t.sequencer.is_playing())
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// True while any voice is still audible, including release tails.
    pub fn is_sounding(&self) -> bool {
        self.tracks.iter().any(|t| t.voice.is_playing())
    }

    /// Advance every track by `dt` seconds. Sequencers only move in
    /// `TickMode::Manual`; timer-driven tracks advance on their own.
    /// Either way, effects the audio side has released are freed here.
    pub fn update(&mut self, dt: f32) {
        self.mixer_handle.release_retired();
        for track in &self.tracks {
            track.voice.release_retired();
        }
        if self.config.tick_mode != TickMode::Manual {
            return;
        }
        for track in &self.tracks {
            track.sequencer.advance(dt);
        }
    }

    // ── Rendering ──────────────────────────────────────────────

    /// Render interleaved frames in the song's channel layout.
    pub fn generate_samples(&self, out: &mut [f32]) {
        lock_mixer(&self.mixer).generate_samples(out);
    }

    /// The mixer shared with output callbacks.
    pub fn renderer(&self) -> SharedMixer {
        Arc::clone(&self.mixer)
    }

    /// Open the default device and play this song on it. On failure the
    /// song stays usable headless.
    pub fn start_output(&mut self) -> Result<(), OutputError> {
        let output = AudioOutput::open(
            self.config.sample_rate,
            self.config.channels.max(1),
            self.renderer(),
        )?;
        self.output = Some(output);
        Ok(())
    }

    pub fn stop_output(&mut self) {
        self.output = None;
    }

    pub fn has_output(&self) -> bool {
        self.output.is_some()
    }
}

impl std::fmt::Debug for Song {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Song")
            .field("tracks", &self.tracks.len())
            .field("playing", &self.is_playing())
            .field("paused", &self.paused)
            .field("master_volume", &self.master_volume())
            .finish()
    }
}
