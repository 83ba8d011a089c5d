//! Sequencer — walks a `NoteSequence` over time and drives one voice.
//!
//! Position and loop bookkeeping sit behind a mutex shared with the timer
//! thread. Notes reach the voice as queued intents through its
//! `VoiceHandle`, so the audio side is never locked by a tick.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::config::{EngineConfig, TickMode};
use crate::dsp::oscillator::Waveform;
use crate::dsp::voice::VoiceHandle;
use crate::note::{NoteEvent, NoteSequence, PitchClass, note_duration};
use crate::timer::Timer;

/// What happens when the last note has played.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopMode {
    /// Play through once and stop.
    #[default]
    Once,
    /// Play once, then repeat this many extra times.
    Repeat(u32),
    Forever,
}

impl LoopMode {
    /// Loop settings in the `(enabled, count)` form: negative counts loop
    /// forever, `count` is the number of extra passes.
    pub fn from_count(enabled: bool, count: i32) -> Self {
        match (enabled, count) {
            (false, _) => LoopMode::Once,
            (true, c) if c < 0 => LoopMode::Forever,
            (true, c) => LoopMode::Repeat(c as u32),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Playing,
    Paused,
}

/// Track state shared with the timer thread.
#[derive(Debug)]
struct Track {
    voice: VoiceHandle,
    notes: NoteSequence,
    index: usize,
    /// Seconds into the current note.
    elapsed: f32,
    state: PlaybackState,
    loop_mode: LoopMode,
    /// Completed passes since `play`.
    current_loop: u32,
    volume: f32,
    bpm: f32,
}

impl Track {
    fn trigger_current(&self) {
        let Some(note) = self.notes.get(self.index) else {
            return;
        };
        let remaining = (note.duration - self.elapsed).max(0.0);
        self.voice.play_event(note, remaining, self.volume);
    }

    /// Advance by `dt` seconds, triggering every note whose start was crossed.
    fn advance(&mut self, dt: f32) {
        if self.state != PlaybackState::Playing || self.notes.is_empty() {
            return;
        }
        self.elapsed += dt;

        // Zero-length notes still advance, but never more than one full pass
        // per tick.
        let max_steps = self.notes.len() + 1;
        let mut steps = 0;
        while let Some(note) = self.notes.get(self.index) {
            if self.elapsed < note.duration {
                break;
            }
            if steps == max_steps {
                self.elapsed = 0.0;
                break;
            }
            steps += 1;
            self.elapsed -= note.duration;
            self.index += 1;

            if self.index >= self.notes.len() && !self.wrap() {
                self.finish();
                return;
            }
            self.start_note();
        }
    }

    /// Trigger the note at `index` from its beginning.
    fn start_note(&self) {
        if let Some(note) = self.notes.get(self.index) {
            self.voice.play_event(note, note.duration, self.volume);
        }
    }

    /// Apply loop policy at the end of the sequence.
    fn wrap(&mut self) -> bool {
        let again = match self.loop_mode {
            LoopMode::Once => false,
            LoopMode::Repeat(extra) => self.current_loop < extra,
            LoopMode::Forever => true,
        };
        if again {
            self.current_loop = self.current_loop.saturating_add(1);
            self.index = 0;
        }
        again
    }

    fn finish(&mut self) {
        debug!(loops = self.current_loop, "sequence finished");
        self.state = PlaybackState::Stopped;
        self.index = 0;
        self.elapsed = 0.0;
        self.voice.note_off();
    }

    fn rewind(&mut self) {
        self.index = 0;
        self.elapsed = 0.0;
    }
}

fn lock(track: &Mutex<Track>) -> MutexGuard<'_, Track> {
    track.lock().unwrap_or_else(|e| {
        warn!("sequencer state mutex poisoned; continuing");
        e.into_inner()
    })
}

/// One track: a note sequence bound to a voice.
pub struct Sequencer {
    track: Arc<Mutex<Track>>,
    timer: Option<Timer>,
    tick_mode: TickMode,
    interval: Duration,
}

impl Sequencer {
    pub fn new(voice: VoiceHandle, config: &EngineConfig) -> Self {
        Sequencer {
            track: Arc::new(Mutex::new(Track {
                voice,
                notes: NoteSequence::new(),
                index: 0,
                elapsed: 0.0,
                state: PlaybackState::Stopped,
                loop_mode: LoopMode::Once,
                current_loop: 0,
                volume: 1.0,
                bpm: config.bpm,
            })),
            timer: None,
            tick_mode: config.tick_mode,
            interval: config.tick_interval(),
        }
    }

    // ── Transport ──────────────────────────────────────────────

    /// Start from the first note. Does nothing if the sequence is empty.
    pub fn play(&mut self) {
        self.disarm();
        {
            let mut track = lock(&self.track);
            if track.notes.is_empty() {
                return;
            }
            track.rewind();
            track.current_loop = 0;
            track.state = PlaybackState::Playing;
            track.start_note();
        }
        self.arm();
    }

    /// Stop and release the voice. The timer is joined before this returns.
    pub fn stop(&mut self) {
        self.disarm();
        let mut track = lock(&self.track);
        if track.state != PlaybackState::Stopped {
            track.state = PlaybackState::Stopped;
            track.voice.note_off();
        }
        track.rewind();
    }

    /// Hold the current position and release the voice.
    pub fn pause(&mut self) {
        self.disarm();
        let mut track = lock(&self.track);
        if track.state == PlaybackState::Playing {
            track.state = PlaybackState::Paused;
            track.voice.note_off();
        }
    }

    /// Continue from the paused position, re-triggering the interrupted
    /// note for whatever length it had left.
    pub fn resume(&mut self) {
        {
            let mut track = lock(&self.track);
            if track.state != PlaybackState::Paused {
                return;
            }
            track.state = PlaybackState::Playing;
            track.trigger_current();
        }
        self.arm();
    }

    /// Advance by `dt` seconds. This is what the timer thread calls; in
    /// `TickMode::Manual` the host calls it instead.
    pub fn advance(&self, dt: f32) {
        lock(&self.track).advance(dt);
    }

    fn arm(&mut self) {
        if self.tick_mode != TickMode::Timer {
            return;
        }
        let track = Arc::clone(&self.track);
        let spawned = Timer::spawn("sequencer", self.interval, move |dt| {
            let mut track = lock(&track);
            track.advance(dt.as_secs_f32());
            track.state == PlaybackState::Playing
        });
        match spawned {
            Ok(timer) => self.timer = Some(timer),
            Err(e) => error!("failed to start sequencer timer: {e}"),
        }
    }

    fn disarm(&mut self) {
        if let Some(mut timer) = self.timer.take() {
            timer.disarm();
        }
    }

    /// Timer resolution. Takes effect immediately if playing.
    pub fn set_tick_interval(&mut self, interval: Duration) {
        self.interval = interval.max(Duration::from_millis(1));
        if self.timer.is_some() {
            self.disarm();
            if self.is_playing() {
                self.arm();
            }
        }
    }

    pub fn tick_interval(&self) -> Duration {
        self.interval
    }

    pub fn tick_mode(&self) -> TickMode {
        self.tick_mode
    }

    // ── Sequence editing ───────────────────────────────────────

    /// Replace the sequence and rewind. A playing track restarts on the new
    /// first note, or stops if the new sequence is empty.
    pub fn set_sequence(&mut self, notes: NoteSequence) {
        let mut track = lock(&self.track);
        track.notes = notes;
        track.rewind();
        if track.state != PlaybackState::Stopped {
            if track.notes.is_empty() {
                track.finish();
            } else if track.state == PlaybackState::Playing {
                track.start_note();
            }
        }
    }

    /// Append a note whose length is `1/division` at the current BPM.
    pub fn add_note(
        &mut self,
        pitch: PitchClass,
        octave: u8,
        division: u32,
        dotted: bool,
        waveform: Waveform,
        volume: f32,
    ) -> bool {
        let mut track = lock(&self.track);
        let duration = note_duration(track.bpm, division.max(1), dotted);
        track.notes.push(NoteEvent {
            pitch,
            octave,
            duration,
            is_rest: false,
            waveform,
            volume: volume.clamp(0.0, 1.0),
        })
    }

    pub fn add_rest(&mut self, division: u32, dotted: bool) -> bool {
        let mut track = lock(&self.track);
        let duration = note_duration(track.bpm, division.max(1), dotted);
        track.notes.push(NoteEvent::rest(duration))
    }

    /// Remove every note. Stops playback.
    pub fn clear(&mut self) {
        self.disarm();
        let mut track = lock(&self.track);
        track.notes.clear();
        if track.state != PlaybackState::Stopped {
            track.finish();
        }
        track.rewind();
    }

    pub fn sequence(&self) -> NoteSequence {
        lock(&self.track).notes.clone()
    }

    // ── Settings ───────────────────────────────────────────────

    pub fn set_loop(&mut self, mode: LoopMode) {
        lock(&self.track).loop_mode = mode;
    }

    pub fn loop_mode(&self) -> LoopMode {
        lock(&self.track).loop_mode
    }

    /// Track gain multiplied into every note's volume, clamped to [0, 1].
    pub fn set_volume(&mut self, volume: f32) {
        lock(&self.track).volume = volume.clamp(0.0, 1.0);
    }

    pub fn volume(&self) -> f32 {
        lock(&self.track).volume
    }

    /// Tempo used by `add_note` and `add_rest`; existing notes keep their length.
    pub fn set_bpm(&mut self, bpm: f32) {
        if bpm > 0.0 {
            lock(&self.track).bpm = bpm;
        }
    }

    pub fn bpm(&self) -> f32 {
        lock(&self.track).bpm
    }

    // ── State ──────────────────────────────────────────────────

    pub fn state(&self) -> PlaybackState {
        lock(&self.track).state
    }

    pub fn is_playing(&self) -> bool {
        self.state() == PlaybackState::Playing
    }

    pub fn is_paused(&self) -> bool {
        self.state() == PlaybackState::Paused
    }

    pub fn current_index(&self) -> usize {
        lock(&self.track).index
    }

    pub fn current_loop(&self) -> u32 {
        lock(&self.track).current_loop
    }

    pub fn elapsed(&self) -> f32 {
        lock(&self.track).elapsed
    }

    pub fn len(&self) -> usize {
        lock(&self.track).notes.len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.track).notes.is_empty()
    }
}

impl Drop for Sequencer {
    fn drop(&mut self) {
        self.disarm();
    }
}

impl std::fmt::Debug for Sequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let track = lock(&self.track);
        f.debug_struct("Sequencer")
            .field("state", &track.state)
            .field("index", &track.index)
            .field("notes", &track.notes.len())
            .field("loop_mode", &track.loop_mode)
            .field("tick_mode", &self.tick_mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::envelope::Adsr;
    use crate::dsp::voice::Voice;
    use crate::mml;
    use std::time::Instant;

    const SR: u32 = 1000;

    fn manual() -> EngineConfig {
        EngineConfig {
            sample_rate: SR,
            ..EngineConfig::default()
        }
        .manual()
    }

    fn setup(mml_src: &str) -> (Voice, Sequencer) {
        let mut voice = Voice::new(SR);
        voice.set_envelope(Adsr {
            attack: 0.0,
            decay: 0.0,
            sustain: 1.0,
            release: 0.0,
        });
        let mut seq = Sequencer::new(voice.handle(), &manual());
        seq.set_sequence(mml::parse(mml_src));
        (voice, seq)
    }

    /// Let the voice apply whatever the sequencer queued.
    fn drain(voice: &mut Voice) {
        voice.generate_samples(&mut []);
    }

    #[test]
    fn play_triggers_first_note() {
        let (mut voice, mut seq) = setup("o4 a4 b4");
        seq.play();
        drain(&mut voice);
        assert!(seq.is_playing());
        assert!(voice.is_gated());
        assert!((voice.oscillator_mut().frequency() - 440.0).abs() < 1e-3);
    }

    #[test]
    fn empty_sequence_does_not_play() {
        let (_voice, mut seq) = setup("");
        seq.play();
        assert!(!seq.is_playing());
    }

    #[test]
    fn advances_through_notes_and_stops() {
        // Three quarter notes at 120 BPM: 0.5s each
        let (mut voice, mut seq) = setup("t120 l4 c d e");
        seq.play();
        seq.advance(0.4);
        assert_eq!(seq.current_index(), 0);
        seq.advance(0.2);
        assert_eq!(seq.current_index(), 1);
        assert!((seq.elapsed() - 0.1).abs() < 1e-5, "leftover time carries over");
        seq.advance(1.0);
        assert!(!seq.is_playing(), "sequence should end after 1.5s");

        drain(&mut voice);
        assert!(!voice.is_gated(), "end of sequence releases the voice");
    }

    #[test]
    fn large_step_crosses_several_notes() {
        let (_voice, mut seq) = setup("t120 l8 c d e f g");
        seq.play();
        seq.advance(0.55);
        assert_eq!(seq.current_index(), 2);
        assert!(seq.elapsed() < 0.25);
    }

    #[test]
    fn rest_releases_voice() {
        let (mut voice, mut seq) = setup("t120 c4 r4 d4");
        seq.play();
        drain(&mut voice);
        assert!(voice.is_gated());
        seq.advance(0.5);
        drain(&mut voice);
        assert!(!voice.is_gated(), "rest should gate the voice off");
        seq.advance(0.5);
        drain(&mut voice);
        assert!(voice.is_gated());
    }

    #[test]
    fn note_volume_is_scaled_by_track_volume() {
        let mut voice = Voice::new(SR);
        voice.set_envelope(Adsr {
            attack: 0.0,
            decay: 0.0,
            sustain: 1.0,
            release: 0.0,
        });
        let mut seq = Sequencer::new(voice.handle(), &manual());
        seq.add_note(PitchClass::C, 0, 1, false, Waveform::Square, 0.5);
        seq.set_volume(0.5);
        seq.play();

        let mut out = [0.0; 4];
        voice.generate_samples(&mut out);
        assert!(out.iter().all(|&s| s == 0.25), "{out:?}");
    }

    #[test]
    fn repeat_counts_extra_passes() {
        let (_voice, mut seq) = setup("t120 l4 c d");
        seq.set_loop(LoopMode::Repeat(2));
        seq.play();
        for pass in 0..3 {
            assert!(seq.is_playing(), "pass {pass} should be playing");
            assert_eq!(seq.current_loop(), pass);
            seq.advance(1.0);
        }
        assert!(!seq.is_playing());
    }

    #[test]
    fn forever_keeps_looping() {
        let (_voice, mut seq) = setup("t120 l4 c");
        seq.set_loop(LoopMode::Forever);
        seq.play();
        for _ in 0..100 {
            seq.advance(0.5);
        }
        assert!(seq.is_playing());
        assert_eq!(seq.current_loop(), 100);
    }

    #[test]
    fn zero_length_notes_do_not_livelock() {
        let (_voice, mut seq) = setup("");
        seq.set_sequence(
            vec![NoteEvent::note(PitchClass::C, 4, 0.0); 3]
                .into_iter()
                .collect(),
        );
        seq.set_loop(LoopMode::Forever);
        seq.play();
        seq.advance(0.01);
        assert!(seq.is_playing());
        assert_eq!(seq.elapsed(), 0.0);
    }

    #[test]
    fn stop_is_idempotent() {
        let (mut voice, mut seq) = setup("t120 c d e");
        seq.play();
        seq.advance(0.6);
        seq.stop();
        drain(&mut voice);
        let once = (seq.state(), seq.current_index(), seq.elapsed(), voice.is_gated());
        seq.stop();
        drain(&mut voice);
        let twice = (seq.state(), seq.current_index(), seq.elapsed(), voice.is_gated());
        assert_eq!(once, twice);
        assert_eq!(once.0, PlaybackState::Stopped);
    }

    #[test]
    fn pause_keeps_position_and_resume_retriggers() {
        let (mut voice, mut seq) = setup("t120 l4 c d e");
        seq.play();
        seq.advance(0.7);
        seq.pause();
        drain(&mut voice);
        assert!(seq.is_paused());
        assert!(!voice.is_gated());

        // Paused tracks ignore time
        seq.advance(5.0);
        assert_eq!(seq.current_index(), 1);

        seq.resume();
        drain(&mut voice);
        assert!(seq.is_playing());
        assert!(voice.is_gated(), "resume should re-trigger the interrupted note");

        // Remaining 0.3s of the second note
        seq.advance(0.31);
        assert_eq!(seq.current_index(), 2);
    }

    #[test]
    fn resume_without_pause_is_ignored() {
        let (_voice, mut seq) = setup("c");
        seq.resume();
        assert_eq!(seq.state(), PlaybackState::Stopped);
    }

    #[test]
    fn add_note_and_rest_use_bpm() {
        let voice = Voice::new(SR);
        let mut seq = Sequencer::new(voice.handle(), &manual());
        seq.set_bpm(60.0);
        seq.add_note(PitchClass::E, 4, 4, true, Waveform::Sine, 1.0);
        seq.add_rest(8, false);
        let notes = seq.sequence();
        assert_eq!(notes.get(0).unwrap().duration, 1.5);
        assert_eq!(notes.get(1).unwrap().duration, 0.5);
        assert!(notes.get(1).unwrap().is_rest);

        seq.clear();
        assert!(seq.is_empty());
    }

    #[test]
    fn loop_count_form() {
        assert_eq!(LoopMode::from_count(false, 3), LoopMode::Once);
        assert_eq!(LoopMode::from_count(true, -1), LoopMode::Forever);
        assert_eq!(LoopMode::from_count(true, 0), LoopMode::Repeat(0));
        assert_eq!(LoopMode::from_count(true, 2), LoopMode::Repeat(2));
    }

    #[test]
    fn timer_mode_plays_to_the_end() {
        let voice = Voice::new(SR);
        let config = EngineConfig {
            tick_interval_ms: 1,
            ..EngineConfig::default()
        };
        let mut seq = Sequencer::new(voice.handle(), &config);
        seq.set_sequence(mml::parse("t600 l16 c d e"));
        seq.play();

        let deadline = Instant::now() + Duration::from_secs(5);
        while seq.is_playing() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
        assert!(!seq.is_playing(), "timer should have driven the track to its end");
        seq.stop();
        seq.stop();
    }
}
