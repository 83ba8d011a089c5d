//! Synthesizer — one voice for direct note playback (sound effects, UI
//! beeps, previews), optionally with its own mono output stream.

use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

use tracing::warn;

use crate::config::EngineConfig;
use crate::dsp::effect::Effect;
use crate::dsp::envelope::Adsr;
use crate::dsp::oscillator::Waveform;
use crate::dsp::output::AudioOutput;
use crate::dsp::voice::{Voice, VoiceHandle};
use crate::error::OutputError;

pub struct Synthesizer {
    voice: Arc<Mutex<Voice>>,
    handle: VoiceHandle,
    output: Option<AudioOutput>,
    sample_rate: u32,
}

fn lock_voice(voice: &Mutex<Voice>) -> MutexGuard<'_, Voice> {
    voice.lock().unwrap_or_else(|e| {
        warn!("voice mutex poisoned; continuing");
        e.into_inner()
    })
}

impl Synthesizer {
    /// A headless synthesizer; call `start_output` to hear it.
    pub fn new(config: &EngineConfig) -> Self {
        let voice = Voice::with_capacity(config.sample_rate, config.command_capacity);
        let handle = voice.handle();
        Synthesizer {
            voice: Arc::new(Mutex::new(voice)),
            handle,
            output: None,
            sample_rate: config.sample_rate,
        }
    }

    /// Open the default device (mono) and play this voice on it.
    pub fn start_output(&mut self) -> Result<(), OutputError> {
        let output = AudioOutput::open(self.sample_rate, 1, Arc::clone(&self.voice))?;
        self.output = Some(output);
        Ok(())
    }

    pub fn stop_output(&mut self) {
        self.output = None;
    }

    pub fn has_output(&self) -> bool {
        self.output.is_some()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Control handle usable from other threads.
    pub fn handle(&self) -> VoiceHandle {
        self.handle.clone()
    }

    /// Play `frequency` for `duration` seconds (0 holds until `note_off`).
    pub fn note_on(&self, frequency: f32, duration: f32, volume: f32) -> bool {
        self.handle.note_on(frequency, duration, volume)
    }

    pub fn note_off(&self) -> bool {
        self.handle.note_off()
    }

    pub fn set_waveform(&self, waveform: Waveform) -> bool {
        self.handle.set_waveform(waveform)
    }

    pub fn set_envelope(&self, adsr: Adsr) -> bool {
        self.handle.set_envelope(adsr)
    }

    pub fn add_effect(&self, effect: Box<dyn Effect>) -> bool {
        self.handle.add_effect(effect)
    }

    pub fn clear_effects(&self) -> bool {
        self.handle.clear_effects()
    }

    pub fn effect_count(&self) -> usize {
        self.handle.effect_count()
    }

    pub fn set_master_volume(&self, volume: f32) {
        self.handle.set_master_volume(volume);
    }

    pub fn master_volume(&self) -> f32 {
        self.handle.master_volume()
    }

    pub fn is_playing(&self) -> bool {
        self.handle.is_playing()
    }

    /// Housekeeping for headless use: applies queued commands, ends timed
    /// notes, publishes state and frees effects the voice has released.
    /// Never waits on the voice, so it cannot stall a live output callback;
    /// while one is rendering, that callback does the same work itself.
    pub fn update(&self) {
        self.handle.release_retired();
        let mut voice = match self.voice.try_lock() {
            Ok(voice) => voice,
            Err(TryLockError::Poisoned(poisoned)) => {
                warn!("voice mutex poisoned; continuing");
                poisoned.into_inner()
            }
            Err(TryLockError::WouldBlock) => return,
        };
        voice.process_commands();
        voice.update();
    }

    /// Render mono samples directly (headless mode).
    pub fn generate_samples(&self, out: &mut [f32]) {
        lock_voice(&self.voice).generate_samples(out);
    }
}

impl std::fmt::Debug for Synthesizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Synthesizer")
            .field("sample_rate", &self.sample_rate)
            .field("playing", &self.is_playing())
            .field("output", &self.output.is_some())
            .finish()
    }
}
