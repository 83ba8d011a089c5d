//! Voice — one oscillator shaped by an ADSR envelope, followed by an effect chain.
//!
//! A `Voice` lives on the audio side and is the only writer of its per-sample
//! state. Other threads talk to it through a cloneable `VoiceHandle`, which
//! queues `VoiceCommand`s that are drained at the start of every
//! `generate_samples` call, and reads back published state from atomics.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicUsize, Ordering};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use tracing::{debug, warn};

use crate::config::{DEFAULT_COMMAND_CAPACITY, DEFAULT_FREQUENCY, DEFAULT_VOLUME};
use crate::note::NoteEvent;

use super::effect::{Effect, EffectChain};
use super::retire::{self, Retired, RetiredBin, Retirer};
use super::envelope::{Adsr, Envelope, EnvelopeStage};
use super::oscillator::{Oscillator, Waveform};

/// Intents sent from control or timer threads to a voice.
pub enum VoiceCommand {
    NoteOn {
        frequency: f32,
        /// Seconds; 0 holds until an explicit `NoteOff`.
        duration: f32,
        volume: f32,
        waveform: Option<Waveform>,
    },
    NoteOff,
    SetWaveform(Waveform),
    SetEnvelope(Adsr),
    SetNoiseSeed(u32),
    AddEffect(Box<dyn Effect>),
    ClearEffects,
}

impl VoiceCommand {
    fn name(&self) -> &'static str {
        match self {
            VoiceCommand::NoteOn { .. } => "note-on",
            VoiceCommand::NoteOff => "note-off",
            VoiceCommand::SetWaveform(_) => "set-waveform",
            VoiceCommand::SetEnvelope(_) => "set-envelope",
            VoiceCommand::SetNoiseSeed(_) => "set-noise-seed",
            VoiceCommand::AddEffect(_) => "add-effect",
            VoiceCommand::ClearEffects => "clear-effects",
        }
    }
}

impl std::fmt::Debug for VoiceCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// State published by the audio side, readable from any thread.
#[derive(Debug)]
struct VoiceShared {
    master_volume: AtomicU32,
    playing: AtomicBool,
    gated: AtomicBool,
    stage: AtomicU8,
    effect_count: AtomicUsize,
}

impl VoiceShared {
    fn new() -> Self {
        VoiceShared {
            master_volume: AtomicU32::new(DEFAULT_VOLUME.to_bits()),
            playing: AtomicBool::new(false),
            gated: AtomicBool::new(false),
            stage: AtomicU8::new(EnvelopeStage::Idle as u8),
            effect_count: AtomicUsize::new(0),
        }
    }

    fn master_volume(&self) -> f32 {
        f32::from_bits(self.master_volume.load(Ordering::Relaxed))
    }

    fn set_master_volume(&self, volume: f32) {
        self.master_volume
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }
}

/// A single monophonic voice.
pub struct Voice {
    oscillator: Oscillator,
    envelope: Envelope,
    effects: EffectChain,
    sample_rate: u32,
    /// Samples since the last note-on; drives the oscillator phase.
    sample_index: u64,
    note_volume: f32,
    note_duration: f32,
    /// Seconds after note-on at which the gate dropped.
    note_off_time: Option<f32>,
    gate: bool,
    playing: bool,

    commands: Receiver<VoiceCommand>,
    sender: Sender<VoiceCommand>,
    shared: Arc<VoiceShared>,
    retirer: Retirer,
    retired: RetiredBin,
}

impl Voice {
    pub fn new(sample_rate: u32) -> Self {
        Self::with_capacity(sample_rate, DEFAULT_COMMAND_CAPACITY)
    }

    /// Voice whose intent queue holds at most `capacity` pending commands.
    pub fn with_capacity(sample_rate: u32, capacity: usize) -> Self {
        let (sender, commands) = crossbeam_channel::bounded(capacity.max(1));
        let (retirer, retired) = retire::channel(capacity);
        Voice {
            oscillator: Oscillator::new(Waveform::Sine, DEFAULT_FREQUENCY),
            envelope: Envelope::new(),
            effects: EffectChain::new(),
            sample_rate: sample_rate.max(1),
            sample_index: 0,
            note_volume: DEFAULT_VOLUME,
            note_duration: 0.0,
            note_off_time: None,
            gate: false,
            playing: false,
            commands,
            sender,
            shared: Arc::new(VoiceShared::new()),
            retirer,
            retired,
        }
    }

    /// A control-side handle to this voice.
    pub fn handle(&self) -> VoiceHandle {
        VoiceHandle {
            sender: self.sender.clone(),
            shared: Arc::clone(&self.shared),
            retired: self.retired.clone(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Start a note. `duration` of 0 (or less) holds until `note_off`.
    pub fn note_on(&mut self, frequency: f32, duration: f32, volume: f32) {
        self.oscillator.set_frequency(frequency);
        self.sample_index = 0;
        self.envelope.note_on();
        self.gate = true;
        self.playing = true;
        self.note_volume = volume.clamp(0.0, 1.0);
        self.note_duration = duration.max(0.0);
        self.note_off_time = None;
        self.publish();
    }

    /// Release the current note. No-op if the gate is already closed.
    pub fn note_off(&mut self) {
        if !self.gate {
            return;
        }
        self.note_off_time = Some(self.elapsed());
        self.gate = false;
        self.envelope.note_off();
        self.publish();
    }

    /// Control-rate housekeeping: auto note-off once a timed note has run
    /// its length, and mark the voice idle once the release has finished.
    pub fn update(&mut self) {
        self.check_note_end();
        self.check_idle();
        self.publish();
    }

    /// Apply every queued command.
    pub fn process_commands(&mut self) {
        while let Ok(cmd) = self.commands.try_recv() {
            self.apply(cmd);
        }
    }

    fn apply(&mut self, cmd: VoiceCommand) {
        match cmd {
            VoiceCommand::NoteOn {
                frequency,
                duration,
                volume,
                waveform,
            } => {
                if let Some(waveform) = waveform {
                    self.oscillator.waveform = waveform;
                }
                self.note_on(frequency, duration, volume);
            }
            VoiceCommand::NoteOff => self.note_off(),
            VoiceCommand::SetWaveform(waveform) => self.set_waveform(waveform),
            VoiceCommand::SetEnvelope(adsr) => self.envelope.set_adsr(adsr),
            VoiceCommand::SetNoiseSeed(seed) => self.oscillator.set_noise_seed(seed),
            VoiceCommand::AddEffect(effect) => self.add_effect(effect),
            VoiceCommand::ClearEffects => self.clear_effects(),
        }
    }

    /// Fill `out` with mono samples. Drains pending commands first.
    pub fn generate_samples(&mut self, out: &mut [f32]) {
        self.process_commands();

        let master = self.shared.master_volume();
        for sample in out.iter_mut() {
            *sample = if self.playing {
                self.next_sample(master)
            } else {
                0.0
            };
        }
        self.publish();
    }

    fn next_sample(&mut self, master: f32) -> f32 {
        self.check_note_end();

        let phase = (self.sample_index as f64 * self.oscillator.frequency() as f64
            / self.sample_rate as f64)
            .fract() as f32;
        let wave = self.oscillator.generate(phase);
        let env = self.envelope.process(self.sample_rate);
        let dry = wave * env * self.note_volume * master;
        let out = self.effects.process(dry).clamp(-1.0, 1.0);

        self.sample_index += 1;
        self.check_idle();
        out
    }

    fn elapsed(&self) -> f32 {
        (self.sample_index as f64 / self.sample_rate as f64) as f32
    }

    fn check_note_end(&mut self) {
        if self.gate && self.note_duration > 0.0 && self.elapsed() >= self.note_duration {
            self.note_off();
        }
    }

    fn check_idle(&mut self) {
        if self.playing && !self.gate && self.envelope.is_idle() {
            self.playing = false;
        }
    }

    fn publish(&self) {
        let s = &self.shared;
        s.playing.store(self.playing, Ordering::Relaxed);
        s.gated.store(self.gate, Ordering::Relaxed);
        s.stage
            .store(self.envelope.stage() as u8, Ordering::Relaxed);
        s.effect_count.store(self.effects.len(), Ordering::Relaxed);
    }

    // ── Parameters ─────────────────────────────────────────────

    pub fn set_master_volume(&mut self, volume: f32) {
        self.shared.set_master_volume(volume);
    }

    pub fn master_volume(&self) -> f32 {
        self.shared.master_volume()
    }

    pub fn set_waveform(&mut self, waveform: Waveform) {
        self.oscillator.waveform = waveform;
    }

    pub fn set_envelope(&mut self, adsr: Adsr) {
        self.envelope.set_adsr(adsr);
    }

    /// Append an effect. A full chain rejects it.
    pub fn add_effect(&mut self, effect: Box<dyn Effect>) {
        if let Err(effect) = self.effects.push(effect) {
            self.retirer.retire(Retired::Effect(effect));
        }
        self.publish();
    }

    /// Removed effects are freed by the next `VoiceHandle` command.
    pub fn clear_effects(&mut self) {
        for effect in self.effects.drain() {
            self.retirer.retire(Retired::Effect(effect));
        }
        self.publish();
    }

    pub fn effect_count(&self) -> usize {
        self.effects.len()
    }

    pub fn oscillator_mut(&mut self) -> &mut Oscillator {
        &mut self.oscillator
    }

    // ── State ──────────────────────────────────────────────────

    pub fn stage(&self) -> EnvelopeStage {
        self.envelope.stage()
    }

    /// True from note-on until the release has fully decayed.
    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn is_gated(&self) -> bool {
        self.gate
    }

    pub fn note_off_time(&self) -> Option<f32> {
        self.note_off_time
    }
}

impl std::fmt::Debug for Voice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Voice")
            .field("waveform", &self.oscillator.waveform)
            .field("frequency", &self.oscillator.frequency())
            .field("stage", &self.envelope.stage())
            .field("gate", &self.gate)
            .field("playing", &self.playing)
            .field("effects", &self.effects.len())
            .finish()
    }
}

/// Cloneable, thread-safe handle used to drive a `Voice` from outside the
/// audio callback.
#[derive(Debug, Clone)]
pub struct VoiceHandle {
    sender: Sender<VoiceCommand>,
    shared: Arc<VoiceShared>,
    retired: RetiredBin,
}

impl VoiceHandle {
    /// Queue a command. Returns `false` if it was dropped.
    pub fn send(&self, cmd: VoiceCommand) -> bool {
        self.release_retired();
        match self.sender.try_send(cmd) {
            Ok(()) => true,
            Err(TrySendError::Full(cmd)) => {
                warn!(command = cmd.name(), "voice command queue full, dropping");
                false
            }
            Err(TrySendError::Disconnected(cmd)) => {
                debug!(command = cmd.name(), "voice is gone, dropping command");
                false
            }
        }
    }

    pub fn note_on(&self, frequency: f32, duration: f32, volume: f32) -> bool {
        self.send(VoiceCommand::NoteOn {
            frequency,
            duration,
            volume,
            waveform: None,
        })
    }

    /// Trigger a sequenced note with its own waveform, scaling its volume
    /// by `gain`. Rests release the voice instead.
    pub fn play_event(&self, note: &NoteEvent, duration: f32, gain: f32) -> bool {
        if note.is_rest {
            return self.note_off();
        }
        self.send(VoiceCommand::NoteOn {
            frequency: note.frequency(),
            duration,
            volume: gain * note.volume,
            waveform: Some(note.waveform),
        })
    }

    pub fn note_off(&self) -> bool {
        self.send(VoiceCommand::NoteOff)
    }

    pub fn set_waveform(&self, waveform: Waveform) -> bool {
        self.send(VoiceCommand::SetWaveform(waveform))
    }

    pub fn set_envelope(&self, adsr: Adsr) -> bool {
        self.send(VoiceCommand::SetEnvelope(adsr))
    }

    pub fn set_noise_seed(&self, seed: u32) -> bool {
        self.send(VoiceCommand::SetNoiseSeed(seed))
    }

    pub fn add_effect(&self, effect: Box<dyn Effect>) -> bool {
        self.send(VoiceCommand::AddEffect(effect))
    }

    pub fn clear_effects(&self) -> bool {
        self.send(VoiceCommand::ClearEffects)
    }

    /// Takes effect on the next generated block; clamped to [0, 1].
    pub fn set_master_volume(&self, volume: f32) {
        self.shared.set_master_volume(volume);
    }

    pub fn master_volume(&self) -> f32 {
        self.shared.master_volume()
    }

    /// Last published playing flag.
    pub fn is_playing(&self) -> bool {
        self.shared.playing.load(Ordering::Relaxed)
    }

    pub fn is_gated(&self) -> bool {
        self.shared.gated.load(Ordering::Relaxed)
    }

    pub fn stage(&self) -> EnvelopeStage {
        EnvelopeStage::from_u8(self.shared.stage.load(Ordering::Relaxed))
    }

    /// Effects the audio side has applied so far.
    pub fn effect_count(&self) -> usize {
        self.shared.effect_count.load(Ordering::Relaxed)
    }

    /// Free whatever the voice has let go of since the last command.
    pub fn release_retired(&self) -> usize {
        self.retired.empty()
    }
}
