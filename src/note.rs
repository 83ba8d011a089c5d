//! Note data: pitch classes, note events and the bounded note sequence.

use serde::{Deserialize, Serialize};

use crate::dsp::oscillator::Waveform;

/// Maximum number of events a `NoteSequence` holds. Extra notes are dropped.
pub const MAX_NOTE_SEQUENCE_SIZE: usize = 512;

/// Twelve-tone pitch class, C = 0 … B = 11.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PitchClass {
    C,
    Cs,
    D,
    Ds,
    E,
    F,
    Fs,
    G,
    Gs,
    A,
    As,
    B,
}

const PITCH_CLASSES: [PitchClass; 12] = [
    PitchClass::C,
    PitchClass::Cs,
    PitchClass::D,
    PitchClass::Ds,
    PitchClass::E,
    PitchClass::F,
    PitchClass::Fs,
    PitchClass::G,
    PitchClass::Gs,
    PitchClass::A,
    PitchClass::As,
    PitchClass::B,
];

impl PitchClass {
    /// Semitone above C, 0..=11.
    pub fn semitone(self) -> u8 {
        self as u8
    }

    /// Pitch class for a semitone offset, wrapping modulo 12.
    pub fn from_semitone(semitone: i32) -> Self {
        PITCH_CLASSES[semitone.rem_euclid(12) as usize]
    }

    /// Natural pitch class for an MML note letter (`a`–`g`, any case).
    pub fn from_letter(letter: char) -> Option<Self> {
        match letter.to_ascii_lowercase() {
            'c' => Some(PitchClass::C),
            'd' => Some(PitchClass::D),
            'e' => Some(PitchClass::E),
            'f' => Some(PitchClass::F),
            'g' => Some(PitchClass::G),
            'a' => Some(PitchClass::A),
            'b' => Some(PitchClass::B),
            _ => None,
        }
    }

    pub fn sharpened(self) -> Self {
        Self::from_semitone(self.semitone() as i32 + 1)
    }

    pub fn flattened(self) -> Self {
        Self::from_semitone(self.semitone() as i32 + 11)
    }
}

/// Frequency of a pitch class in an octave, A4 = 440 Hz.
pub fn note_to_frequency(pitch: PitchClass, octave: u8) -> f32 {
    let semitones_from_a4 = (octave as i32 - 4) * 12 + (pitch.semitone() as i32 - 9);
    440.0 * 2.0_f32.powf(semitones_from_a4 as f32 / 12.0)
}

/// Length in seconds of a `1/division` note at `bpm`, optionally dotted.
pub fn note_duration(bpm: f32, division: u32, dotted: bool) -> f32 {
    let quarter = 60.0 / bpm;
    let duration = quarter * 4.0 / division as f32;
    if dotted { duration * 1.5 } else { duration }
}

/// A single note or rest.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoteEvent {
    pub pitch: PitchClass,
    /// Octave 0..=8.
    pub octave: u8,
    /// Seconds.
    pub duration: f32,
    pub is_rest: bool,
    pub waveform: Waveform,
    /// Volume [0, 1].
    pub volume: f32,
}

impl Default for NoteEvent {
    fn default() -> Self {
        NoteEvent {
            pitch: PitchClass::C,
            octave: 4,
            duration: 0.5,
            is_rest: false,
            waveform: Waveform::Sine,
            volume: 1.0,
        }
    }
}

impl NoteEvent {
    pub fn note(pitch: PitchClass, octave: u8, duration: f32) -> Self {
        NoteEvent {
            pitch,
            octave,
            duration,
            ..NoteEvent::default()
        }
    }

    pub fn rest(duration: f32) -> Self {
        NoteEvent {
            pitch: PitchClass::C,
            octave: 0,
            duration,
            is_rest: true,
            ..NoteEvent::default()
        }
    }

    /// Oscillator frequency for this event; 0 for rests.
    pub fn frequency(&self) -> f32 {
        if self.is_rest {
            0.0
        } else {
            note_to_frequency(self.pitch, self.octave)
        }
    }
}

/// An ordered, bounded list of note events.
///
/// Pushing past `MAX_NOTE_SEQUENCE_SIZE` silently drops the event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<NoteEvent>", into = "Vec<NoteEvent>")]
pub struct NoteSequence {
    notes: Vec<NoteEvent>,
}

impl NoteSequence {
    pub fn new() -> Self {
        NoteSequence { notes: Vec::new() }
    }

    /// Append an event. Returns `false` when the sequence is full.
    pub fn push(&mut self, note: NoteEvent) -> bool {
        if self.notes.len() >= MAX_NOTE_SEQUENCE_SIZE {
            return false;
        }
        self.notes.push(note);
        true
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn clear(&mut self) {
        self.notes.clear();
    }

    pub fn get(&self, index: usize) -> Option<&NoteEvent> {
        self.notes.get(index)
    }

    pub fn as_slice(&self) -> &[NoteEvent] {
        &self.notes
    }

    pub fn iter(&self) -> std::slice::Iter<'_, NoteEvent> {
        self.notes.iter()
    }
}

impl From<Vec<NoteEvent>> for NoteSequence {
    fn from(mut notes: Vec<NoteEvent>) -> Self {
        notes.truncate(MAX_NOTE_SEQUENCE_SIZE);
        NoteSequence { notes }
    }
}

impl From<NoteSequence> for Vec<NoteEvent> {
    fn from(seq: NoteSequence) -> Self {
        seq.notes
    }
}

impl FromIterator<NoteEvent> for NoteSequence {
    fn from_iter<I: IntoIterator<Item = NoteEvent>>(iter: I) -> Self {
        iter.into_iter()
            .take(MAX_NOTE_SEQUENCE_SIZE)
            .collect::<Vec<_>>()
            .into()
    }
}

impl<'a> IntoIterator for &'a NoteSequence {
    type Item = &'a NoteEvent;
    type IntoIter = std::slice::Iter<'a, NoteEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.notes.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a4_is_440() {
        assert!((note_to_frequency(PitchClass::A, 4) - 440.0).abs() < 1e-3);
        assert!((note_to_frequency(PitchClass::A, 5) - 880.0).abs() < 1e-2);
        // Middle C
        assert!((note_to_frequency(PitchClass::C, 4) - 261.63).abs() < 0.01);
    }

    #[test]
    fn rest_has_no_frequency() {
        assert_eq!(NoteEvent::rest(1.0).frequency(), 0.0);
    }

    #[test]
    fn durations_follow_tempo() {
        assert_eq!(note_duration(120.0, 4, false), 0.5);
        assert_eq!(note_duration(120.0, 2, true), 1.5);
        assert_eq!(note_duration(60.0, 8, false), 0.5);
    }

    #[test]
    fn accidentals_wrap_around() {
        assert_eq!(PitchClass::B.sharpened(), PitchClass::C);
        assert_eq!(PitchClass::C.flattened(), PitchClass::B);
        assert_eq!(PitchClass::F.sharpened(), PitchClass::Fs);
        assert_eq!(PitchClass::from_semitone(-1), PitchClass::B);
    }

    #[test]
    fn sequence_truncates_at_capacity() {
        let mut seq = NoteSequence::new();
        for _ in 0..MAX_NOTE_SEQUENCE_SIZE {
            assert!(seq.push(NoteEvent::default()));
        }
        assert!(!seq.push(NoteEvent::default()), "push past capacity should be rejected");
        assert_eq!(seq.len(), MAX_NOTE_SEQUENCE_SIZE);

        let collected: NoteSequence = std::iter::repeat(NoteEvent::rest(0.1))
            .take(MAX_NOTE_SEQUENCE_SIZE + 10)
            .collect();
        assert_eq!(collected.len(), MAX_NOTE_SEQUENCE_SIZE);
    }

    #[test]
    fn sequence_serializes_as_plain_array() {
        let seq: NoteSequence = vec![NoteEvent::note(PitchClass::E, 3, 0.25)].into();
        let json = serde_json::to_value(&seq).unwrap();
        assert!(json.is_array());
        assert_eq!(json[0]["pitch"], "E");
        assert_eq!(json[0]["octave"], 3);

        let back: NoteSequence = serde_json::from_value(json).unwrap();
        assert_eq!(back, seq);
    }
}
