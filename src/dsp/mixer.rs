//! Mixer — sums headless voices into interleaved output through per-channel sends.
//!
//! Voices are owned by the mixer in an arena and addressed by `VoiceId`
//! (slot index + generation), so an id that outlives its voice simply stops
//! matching. Parameter changes from other threads go through `MixerHandle`.

use std::f32::consts::{FRAC_1_SQRT_2, FRAC_PI_4};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use tracing::{debug, warn};

use crate::config::{DEFAULT_COMMAND_CAPACITY, DEFAULT_VOLUME, MAX_BLOCK_FRAMES};

use super::effect::{Effect, EffectChain};
use super::retire::{self, Retired, RetiredBin, Retirer};
use super::voice::Voice;

/// Generation-checked handle to a voice registered with an `AudioMixer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoiceId {
    index: u32,
    generation: u32,
}

impl VoiceId {
    pub fn index(&self) -> usize {
        self.index as usize
    }
}

struct Slot {
    voice: Option<Voice>,
    generation: u32,
    /// Gain into each output channel, each in [0, 1].
    sends: Vec<f32>,
}

/// Mixer intents sent from control threads.
pub enum MixerCommand {
    SetSend { id: VoiceId, channel: usize, level: f32 },
    SetPan { id: VoiceId, pan: f32 },
    /// One instance per output channel.
    AddEffect(Vec<Box<dyn Effect>>),
    ClearEffects,
}

#[derive(Debug)]
struct MixerShared {
    master_volume: AtomicU32,
    effect_count: AtomicUsize,
}

impl MixerShared {
    fn master_volume(&self) -> f32 {
        f32::from_bits(self.master_volume.load(Ordering::Relaxed))
    }

    fn set_master_volume(&self, volume: f32) {
        self.master_volume
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }
}

/// A mixer shared between its owner and an output callback.
pub type SharedMixer = Arc<Mutex<AudioMixer>>;

/// Default send vector: mono gets unity, stereo an equal-power center,
/// wider layouts `1/sqrt(N)` on every channel.
pub fn default_sends(channels: usize) -> Vec<f32> {
    match channels {
        0 | 1 => vec![1.0],
        2 => vec![FRAC_1_SQRT_2; 2],
        n => vec![1.0 / (n as f32).sqrt(); n],
    }
}

/// Equal-power stereo sends for `pan` in [-1, 1] (clamped).
pub fn pan_sends(pan: f32) -> (f32, f32) {
    let angle = (pan.clamp(-1.0, 1.0) + 1.0) * FRAC_PI_4;
    (angle.cos(), angle.sin())
}

/// Multi-voice mixer with a per-channel master effect chain.
pub struct AudioMixer {
    slots: Vec<Slot>,
    free: Vec<u32>,
    channels: usize,
    sample_rate: u32,
    /// One chain per output channel so filter history never crosses channels.
    master_effects: Vec<EffectChain>,
    /// Mono render target for one voice, `MAX_BLOCK_FRAMES` long.
    scratch: Vec<f32>,

    commands: Receiver<MixerCommand>,
    sender: Sender<MixerCommand>,
    shared: Arc<MixerShared>,
    retirer: Retirer,
    retired: RetiredBin,
}

impl AudioMixer {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        let channels = usize::from(channels.max(1));
        let (sender, commands) = crossbeam_channel::bounded(DEFAULT_COMMAND_CAPACITY);
        let (retirer, retired) = retire::channel(DEFAULT_COMMAND_CAPACITY);
        AudioMixer {
            slots: Vec::new(),
            free: Vec::new(),
            channels,
            sample_rate,
            master_effects: (0..channels).map(|_| EffectChain::new()).collect(),
            scratch: vec![0.0; MAX_BLOCK_FRAMES],
            commands,
            sender,
            shared: Arc::new(MixerShared {
                master_volume: AtomicU32::new(DEFAULT_VOLUME.to_bits()),
                effect_count: AtomicUsize::new(0),
            }),
            retirer,
            retired,
        }
    }

    pub fn into_shared(self) -> SharedMixer {
        Arc::new(Mutex::new(self))
    }

    pub fn handle(&self) -> MixerHandle {
        MixerHandle {
            sender: self.sender.clone(),
            shared: Arc::clone(&self.shared),
            channels: self.channels,
            retired: self.retired.clone(),
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    // ── Voice arena ────────────────────────────────────────────

    /// Take ownership of a voice and give it the default sends.
    pub fn register(&mut self, voice: Voice) -> VoiceId {
        let sends = default_sends(self.channels);
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.voice = Some(voice);
            slot.sends = sends;
            return VoiceId {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            voice: Some(voice),
            generation: 0,
            sends,
        });
        VoiceId {
            index,
            generation: 0,
        }
    }

    /// Remove a voice. Stale or unknown ids return `None`.
    pub fn unregister(&mut self, id: VoiceId) -> Option<Voice> {
        let slot = self.slot_mut(id)?;
        let voice = slot.voice.take();
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        voice
    }

    fn slot(&self, id: VoiceId) -> Option<&Slot> {
        self.slots
            .get(id.index as usize)
            .filter(|s| s.generation == id.generation && s.voice.is_some())
    }

    fn slot_mut(&mut self, id: VoiceId) -> Option<&mut Slot> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation && s.voice.is_some())
    }

    pub fn voice(&self, id: VoiceId) -> Option<&Voice> {
        self.slot(id).and_then(|s| s.voice.as_ref())
    }

    pub fn voice_mut(&mut self, id: VoiceId) -> Option<&mut Voice> {
        self.slot_mut(id).and_then(|s| s.voice.as_mut())
    }

    pub fn voice_count(&self) -> usize {
        self.slots.iter().filter(|s| s.voice.is_some()).count()
    }

    /// True while any registered voice is still producing sound.
    pub fn is_sounding(&self) -> bool {
        self.slots
            .iter()
            .filter_map(|s| s.voice.as_ref())
            .any(Voice::is_playing)
    }

    // ── Routing ────────────────────────────────────────────────

    /// Set one send gain, clamped to [0, 1]. Unknown ids or channels are ignored.
    pub fn set_send_level(&mut self, id: VoiceId, channel: usize, level: f32) {
        if let Some(slot) = self.slot_mut(id) {
            if let Some(send) = slot.sends.get_mut(channel) {
                *send = level.clamp(0.0, 1.0);
            }
        }
    }

    pub fn send_level(&self, id: VoiceId, channel: usize) -> Option<f32> {
        self.slot(id).and_then(|s| s.sends.get(channel).copied())
    }

    /// Equal-power pan across the first two channels. No-op for mono output.
    pub fn set_pan(&mut self, id: VoiceId, pan: f32) {
        if self.channels < 2 {
            return;
        }
        if let Some(slot) = self.slot_mut(id) {
            let (left, right) = pan_sends(pan);
            slot.sends[0] = left;
            slot.sends[1] = right;
        }
    }

    // ── Master section ─────────────────────────────────────────

    /// Add a master effect. Each output channel gets its own copy.
    pub fn add_effect(&mut self, effect: Box<dyn Effect>) {
        let per_channel = replicate(effect, self.channels);
        self.push_effects(per_channel);
    }

    /// Install one effect per channel. A mismatched or over-full set is
    /// ignored; the spent buffer goes to the retire queue either way.
    fn push_effects(&mut self, mut per_channel: Vec<Box<dyn Effect>>) {
        let fits = per_channel.len() == self.channels
            && !self.master_effects.iter().any(EffectChain::is_full);
        if fits {
            for (chain, effect) in self.master_effects.iter_mut().zip(per_channel.drain(..)) {
                if let Err(effect) = chain.push(effect) {
                    self.retirer.retire(Retired::Effect(effect));
                }
            }
        }
        self.retirer.retire(Retired::Effects(per_channel));
        self.publish_effect_count();
    }

    pub fn clear_effects(&mut self) {
        for chain in &mut self.master_effects {
            for effect in chain.drain() {
                self.retirer.retire(Retired::Effect(effect));
            }
        }
        self.publish_effect_count();
    }

    pub fn effect_count(&self) -> usize {
        self.master_effects.first().map_or(0, EffectChain::len)
    }

    fn publish_effect_count(&self) {
        self.shared
            .effect_count
            .store(self.effect_count(), Ordering::Relaxed);
    }

    /// Clamped to [0, 1].
    pub fn set_master_volume(&mut self, volume: f32) {
        self.shared.set_master_volume(volume);
    }

    pub fn master_volume(&self) -> f32 {
        self.shared.master_volume()
    }

    // ── Rendering ──────────────────────────────────────────────

    pub fn process_commands(&mut self) {
        while let Ok(cmd) = self.commands.try_recv() {
            match cmd {
                MixerCommand::SetSend { id, channel, level } => {
                    self.set_send_level(id, channel, level)
                }
                MixerCommand::SetPan { id, pan } => self.set_pan(id, pan),
                MixerCommand::AddEffect(per_channel) => self.push_effects(per_channel),
                MixerCommand::ClearEffects => self.clear_effects(),
            }
        }
    }

    /// Fill `out` with interleaved frames (`out.len() / channels` of them).
    /// Any trailing partial frame is zeroed.
    pub fn generate_samples(&mut self, out: &mut [f32]) {
        self.process_commands();
        out.fill(0.0);

        let channels = self.channels;
        let whole = out.len() / channels * channels;
        let master = self.shared.master_volume();
        for block in out[..whole].chunks_mut(self.scratch.len() * channels) {
            self.render_block(block, master);
        }
    }

    /// Render at most `MAX_BLOCK_FRAMES` whole frames into a zeroed `block`.
    fn render_block(&mut self, block: &mut [f32], master: f32) {
        let channels = self.channels;
        let scratch = &mut self.scratch[..block.len() / channels];

        for slot in &mut self.slots {
            let Some(voice) = slot.voice.as_mut() else {
                continue;
            };
            voice.generate_samples(scratch);
            for (frame, &sample) in block.chunks_exact_mut(channels).zip(scratch.iter()) {
                for (dst, &send) in frame.iter_mut().zip(slot.sends.iter()) {
                    *dst += sample * send;
                }
            }
        }

        for frame in block.chunks_exact_mut(channels) {
            for (sample, chain) in frame.iter_mut().zip(self.master_effects.iter_mut()) {
                *sample = chain.process(*sample * master).clamp(-1.0, 1.0);
            }
        }
    }
}

impl std::fmt::Debug for AudioMixer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioMixer")
            .field("voices", &self.voice_count())
            .field("channels", &self.channels)
            .field("sample_rate", &self.sample_rate)
            .field("master_effects", &self.effect_count())
            .finish()
    }
}

fn replicate(effect: Box<dyn Effect>, channels: usize) -> Vec<Box<dyn Effect>> {
    let mut copies: Vec<Box<dyn Effect>> = (1..channels).map(|_| effect.clone_box()).collect();
    copies.insert(0, effect);
    copies
}

/// Control-side handle to an `AudioMixer`.
#[derive(Debug, Clone)]
pub struct MixerHandle {
    sender: Sender<MixerCommand>,
    shared: Arc<MixerShared>,
    channels: usize,
    retired: RetiredBin,
}

impl MixerHandle {
    fn send(&self, cmd: MixerCommand) -> bool {
        self.release_retired();
        match self.sender.try_send(cmd) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("mixer command queue full, dropping");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("mixer is gone, dropping command");
                false
            }
        }
    }

    pub fn set_send_level(&self, id: VoiceId, channel: usize, level: f32) -> bool {
        self.send(MixerCommand::SetSend { id, channel, level })
    }

    pub fn set_pan(&self, id: VoiceId, pan: f32) -> bool {
        self.send(MixerCommand::SetPan { id, pan })
    }

    pub fn add_effect(&self, effect: Box<dyn Effect>) -> bool {
        self.send(MixerCommand::AddEffect(replicate(effect, self.channels)))
    }

    pub fn clear_effects(&self) -> bool {
        self.send(MixerCommand::ClearEffects)
    }

    /// Master effects applied by the audio side so far.
    pub fn effect_count(&self) -> usize {
        self.shared.effect_count.load(Ordering::Relaxed)
    }

    pub fn set_master_volume(&self, volume: f32) {
        self.shared.set_master_volume(volume);
    }

    pub fn master_volume(&self) -> f32 {
        self.shared.master_volume()
    }

    /// Free master effects the mixer has let go of. Done on every command
    /// send; call it directly when no commands are being sent.
    pub fn release_retired(&self) -> usize {
        self.retired.empty()
    }
}
