//! Background music — named songs, one current, with optional crossfade.
//!
//! Fades are stepped by `update(dt)` from the host loop. The device callback
//! only sees `BgmMix`, a list of attached song mixers it sums and clips.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use tracing::{debug, warn};

use crate::config::{DEFAULT_COMMAND_CAPACITY, EngineConfig, MAX_BLOCK_FRAMES};
use crate::dsp::mixer::SharedMixer;
use crate::dsp::output::{AudioOutput, Render};
use crate::dsp::retire::{self, Retired, RetiredBin, Retirer};
use crate::error::OutputError;
use crate::song::Song;

/// Songs the mix can sum at once: current, fading in, fading out, and one spare.
pub const MAX_ACTIVE_SONGS: usize = 4;

/// Mixers are identified by pointer, so the audio side never touches song ids.
enum BgmCommand {
    Attach(SharedMixer),
    Detach(SharedMixer),
}

/// Audio-side view: the songs currently audible.
pub struct BgmMix {
    active: Vec<SharedMixer>,
    commands: Receiver<BgmCommand>,
    retirer: Retirer,
    channels: usize,
    /// `MAX_BLOCK_FRAMES` interleaved frames.
    scratch: Vec<f32>,
}

impl BgmMix {
    fn process_commands(&mut self) {
        while let Ok(cmd) = self.commands.try_recv() {
            match cmd {
                BgmCommand::Attach(mixer) => {
                    let attached = self.active.iter().any(|m| Arc::ptr_eq(m, &mixer));
                    if attached || self.active.len() >= MAX_ACTIVE_SONGS {
                        self.retirer.retire(Retired::Mixer(mixer));
                    } else {
                        self.active.push(mixer);
                    }
                }
                BgmCommand::Detach(mixer) => {
                    if let Some(pos) = self.active.iter().position(|m| Arc::ptr_eq(m, &mixer)) {
                        self.retirer.retire(Retired::Mixer(self.active.remove(pos)));
                    }
                    self.retirer.retire(Retired::Mixer(mixer));
                }
            }
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}

impl Render for BgmMix {
    fn render(&mut self, out: &mut [f32]) {
        self.process_commands();
        out.fill(0.0);

        let whole = out.len() / self.channels * self.channels;
        for block in out[..whole].chunks_mut(self.scratch.len()) {
            let scratch = &mut self.scratch[..block.len()];
            for mixer in &mut self.active {
                mixer.render(scratch);
                for (dst, &s) in block.iter_mut().zip(scratch.iter()) {
                    *dst += s;
                }
            }
            for sample in block.iter_mut() {
                *sample = sample.clamp(-1.0, 1.0);
            }
        }
    }
}

/// One linear volume ramp.
#[derive(Debug, Clone)]
struct Fade {
    song_id: String,
    start: f32,
    target: f32,
    duration: f32,
    elapsed: f32,
}

impl Fade {
    fn new(song_id: &str, start: f32, target: f32, duration: f32) -> Self {
        Fade {
            song_id: song_id.to_owned(),
            start,
            target,
            duration,
            elapsed: 0.0,
        }
    }

    /// Advance and return `(volume, finished)`.
    fn step(&mut self, dt: f32) -> (f32, bool) {
        self.elapsed += dt;
        let progress = (self.elapsed / self.duration).clamp(0.0, 1.0);
        let volume = self.start + (self.target - self.start) * progress;
        (volume, progress >= 1.0)
    }
}

pub struct BgmManager {
    songs: HashMap<String, Song>,
    current: Option<String>,
    master_volume: f32,
    fade_in: Option<Fade>,
    fade_out: Option<Fade>,
    paused: bool,
    mix: Arc<Mutex<BgmMix>>,
    mix_tx: Sender<BgmCommand>,
    retired: RetiredBin,
    sample_rate: u32,
    channels: usize,
    output: Option<AudioOutput>,
}

fn lock_mix(mix: &Mutex<BgmMix>) -> MutexGuard<'_, BgmMix> {
    mix.lock().unwrap_or_else(|e| {
        warn!("bgm mix mutex poisoned; continuing");
        e.into_inner()
    })
}

impl BgmManager {
    /// Songs registered later must use the same sample rate and channel
    /// count as `config`.
    pub fn new(config: &EngineConfig) -> Self {
        let (mix_tx, commands) = crossbeam_channel::bounded(DEFAULT_COMMAND_CAPACITY);
        let (retirer, retired) = retire::channel(DEFAULT_COMMAND_CAPACITY);
        let channels = config.channel_count();
        BgmManager {
            songs: HashMap::new(),
            current: None,
            master_volume: 1.0,
            fade_in: None,
            fade_out: None,
            paused: false,
            mix: Arc::new(Mutex::new(BgmMix {
                active: Vec::with_capacity(MAX_ACTIVE_SONGS),
                commands,
                retirer,
                channels,
                scratch: vec![0.0; MAX_BLOCK_FRAMES * channels],
            })),
            mix_tx,
            retired,
            sample_rate: config.sample_rate,
            channels,
            output: None,
        }
    }

    // ── Registry ───────────────────────────────────────────────

    /// Register `song` under `id`, replacing (and stopping) any previous
    /// song with that id. Songs in another output format are rejected.
    pub fn register(&mut self, id: impl Into<String>, song: Song) -> bool {
        let id = id.into();
        if song.sample_rate() != self.sample_rate || song.channels() != self.channels {
            warn!(
                id,
                sample_rate = song.sample_rate(),
                channels = song.channels(),
                "song format does not match the bgm output; not registered"
            );
            return false;
        }
        self.unregister(&id);
        debug!(id, "bgm registered");
        self.songs.insert(id, song);
        true
    }

    /// Remove and return the song, stopping it first.
    pub fn unregister(&mut self, id: &str) -> Option<Song> {
        let mut song = self.songs.remove(id)?;
        song.stop();
        self.send(BgmCommand::Detach(song.renderer()));
        if self.current.as_deref() == Some(id) {
            self.current = None;
        }
        if self.fade_in.as_ref().is_some_and(|f| f.song_id == id) {
            self.fade_in = None;
        }
        if self.fade_out.as_ref().is_some_and(|f| f.song_id == id) {
            self.fade_out = None;
        }
        Some(song)
    }

    pub fn get(&self, id: &str) -> Option<&Song> {
        self.songs.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Song> {
        self.songs.get_mut(id)
    }

    pub fn current_id(&self) -> Option<&str> {
        self.current.as_deref()
    }

    // ── Playback ───────────────────────────────────────────────

    /// Switch to `id` immediately at the master volume. Returns false for
    /// an unknown id.
    pub fn play(&mut self, id: &str) -> bool {
        if !self.songs.contains_key(id) {
            return false;
        }
        if self.current.as_deref() != Some(id) {
            self.stop();
        } else {
            self.end_fades_except(id);
        }

        self.paused = false;
        self.start_song(id, self.master_volume);
        self.current = Some(id.to_owned());
        debug!(id, "bgm play");
        true
    }

    /// Fade the current song out and `id` in over `duration` seconds.
    /// Already current is a no-op; a non-positive duration plays directly.
    pub fn play_with_crossfade(&mut self, id: &str, duration: f32) -> bool {
        if !self.songs.contains_key(id) {
            return false;
        }
        if self.current.as_deref() == Some(id) {
            return true;
        }
        if duration <= 0.0 {
            return self.play(id);
        }

        // Only one fade-out at a time; an older one is cut off.
        if let Some(old) = self.fade_out.take() {
            if old.song_id != id {
                self.stop_song(&old.song_id);
            }
        }

        if let Some(current) = self.current.take() {
            let start = self.songs.get(&current).map_or(0.0, Song::master_volume);
            self.fade_out = Some(Fade::new(&current, start, 0.0, duration));
        }

        self.paused = false;
        self.start_song(id, 0.0);
        self.fade_in = Some(Fade::new(id, 0.0, self.master_volume, duration));
        self.current = Some(id.to_owned());
        debug!(id, duration, "bgm crossfade");
        true
    }

    /// Stop every playing or fading song.
    pub fn stop(&mut self) {
        let ids: Vec<String> = self
            .current
            .take()
            .into_iter()
            .chain(self.fade_in.take().map(|f| f.song_id))
            .chain(self.fade_out.take().map(|f| f.song_id))
            .collect();
        for id in ids {
            self.stop_song(&id);
        }
        self.paused = false;
    }

    /// Pause the current song and anything fading. Fades hold until resumed.
    pub fn pause(&mut self) {
        if self.paused {
            return;
        }
        self.paused = true;
        for id in self.audible_ids() {
            if let Some(song) = self.songs.get_mut(&id) {
                song.pause();
            }
        }
    }

    pub fn resume(&mut self) {
        if !self.paused {
            return;
        }
        self.paused = false;
        for id in self.audible_ids() {
            if let Some(song) = self.songs.get_mut(&id) {
                song.resume();
            }
        }
    }

    pub fn is_playing(&self) -> bool {
        self.current
            .as_ref()
            .and_then(|id| self.songs.get(id))
            .is_some_and(Song::is_playing)
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_fading(&self) -> bool {
        self.fade_in.is_some() || self.fade_out.is_some()
    }

    /// Clamped to [0, 1]. During a fade-in this becomes the fade's target.
    pub fn set_master_volume(&mut self, volume: f32) {
        self.master_volume = volume.clamp(0.0, 1.0);
        if let Some(fade) = &mut self.fade_in {
            fade.target = self.master_volume;
        } else if let Some(song) = self.current.as_ref().and_then(|id| self.songs.get_mut(id)) {
            song.set_master_volume(self.master_volume);
        }
    }

    pub fn master_volume(&self) -> f32 {
        self.master_volume
    }

    /// Step fades and advance every song by `dt` seconds.
    pub fn update(&mut self, dt: f32) {
        self.retired.empty();
        if !self.paused {
            self.step_fades(dt);
        }
        for song in self.songs.values_mut() {
            song.update(dt);
        }
    }

    fn step_fades(&mut self, dt: f32) {
        if let Some(fade) = &mut self.fade_in {
            let (volume, done) = fade.step(dt);
            if let Some(song) = self.songs.get_mut(&fade.song_id) {
                song.set_master_volume(volume);
            }
            if done {
                self.fade_in = None;
            }
        }

        if let Some(fade) = &mut self.fade_out {
            let (volume, done) = fade.step(dt);
            let id = fade.song_id.clone();
            if let Some(song) = self.songs.get_mut(&id) {
                song.set_master_volume(volume);
            }
            if done {
                self.fade_out = None;
                debug!(id, "bgm fade-out finished");
                self.stop_song(&id);
            }
        }
    }

    // ── Rendering ──────────────────────────────────────────────

    /// Sum every audible song into `out` and clip.
    pub fn generate_samples(&self, out: &mut [f32]) {
        lock_mix(&self.mix).render(out);
    }

    pub fn renderer(&self) -> Arc<Mutex<BgmMix>> {
        Arc::clone(&self.mix)
    }

    /// Open the default device for the bgm mix. On failure the manager
    /// stays usable headless.
    pub fn start_output(&mut self) -> Result<(), OutputError> {
        let channels = u16::try_from(self.channels).unwrap_or(u16::MAX);
        let output = AudioOutput::open(self.sample_rate, channels, self.renderer())?;
        self.output = Some(output);
        Ok(())
    }

    pub fn stop_output(&mut self) {
        self.output = None;
    }

    pub fn has_output(&self) -> bool {
        self.output.is_some()
    }

    // ── Internals ──────────────────────────────────────────────

    fn start_song(&mut self, id: &str, volume: f32) {
        let Some(song) = self.songs.get_mut(id) else {
            return;
        };
        song.set_master_volume(volume);
        song.play();
        let mixer = song.renderer();
        self.send(BgmCommand::Attach(mixer));
    }

    fn stop_song(&mut self, id: &str) {
        if let Some(song) = self.songs.get_mut(id) {
            song.stop();
        }
        self.detach(id);
    }

    fn detach(&self, id: &str) {
        if let Some(song) = self.songs.get(id) {
            self.send(BgmCommand::Detach(song.renderer()));
        }
    }

    fn send(&self, cmd: BgmCommand) {
        self.retired.empty();
        match self.mix_tx.try_send(cmd) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => warn!("bgm command queue full, dropping"),
            Err(TrySendError::Disconnected(_)) => debug!("bgm mix dropped"),
        }
    }

    /// Stop fading songs other than `keep` and clear both fade slots.
    fn end_fades_except(&mut self, keep: &str) {
        let fading: Vec<String> = self
            .fade_in
            .take()
            .into_iter()
            .chain(self.fade_out.take())
            .map(|f| f.song_id)
            .collect();
        for id in fading {
            if id != keep {
                self.stop_song(&id);
            }
        }
    }

    fn audible_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .current
            .iter()
            .cloned()
            .chain(self.fade_in.iter().map(|f| f.song_id.clone()))
            .chain(self.fade_out.iter().map(|f| f.song_id.clone()))
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

impl std::fmt::Debug for BgmManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BgmManager")
            .field("songs", &self.songs.len())
            .field("current", &self.current)
            .field("master_volume", &self.master_volume)
            .field("fade_in", &self.fade_in)
            .field("fade_out", &self.fade_out)
            .finish()
    }
}
