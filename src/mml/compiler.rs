//! Folds scanned MML commands into a `NoteSequence`.
//!
//! The compiler never rejects input. Anything it cannot use is skipped and
//! reported as a `Diagnostic` so tools can show it; playback ignores them.

use thiserror::Error;

use crate::config::{DEFAULT_BPM, DEFAULT_VOLUME};
use crate::dsp::oscillator::Waveform;
use crate::note::{NoteEvent, NoteSequence, note_duration};

use super::token::{Command, Span, Spanned};

pub const DEFAULT_OCTAVE: u8 = 4;
pub const DEFAULT_LENGTH: u32 = 4;
pub const MAX_OCTAVE: u8 = 8;

/// Something the compiler skipped.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Warning {
    #[error("unknown character '{0}' skipped")]
    UnknownCharacter(char),
    #[error("'{command}{value}' is out of range and was ignored")]
    OutOfRange { command: char, value: u32 },
    #[error("length 0 is not a note length; using the default length")]
    ZeroLength,
    #[error("note sequence is full; remaining notes dropped")]
    Truncated,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub span: Span,
    pub warning: Warning,
}

/// Compilation result.
#[derive(Debug, Clone, Default)]
pub struct Compiled {
    pub notes: NoteSequence,
    pub diagnostics: Vec<Diagnostic>,
}

/// Running parser state.
struct State {
    bpm: f32,
    length: u32,
    octave: u8,
    waveform: Waveform,
    volume: f32,
}

impl Default for State {
    fn default() -> Self {
        State {
            bpm: DEFAULT_BPM,
            length: DEFAULT_LENGTH,
            octave: DEFAULT_OCTAVE,
            waveform: Waveform::Sine,
            volume: DEFAULT_VOLUME,
        }
    }
}

pub fn compile(commands: &[Spanned]) -> Compiled {
    let mut state = State::default();
    let mut out = Compiled::default();
    let mut truncated = false;

    for &Spanned { command, span } in commands {
        let mut warn = |warning| out.diagnostics.push(Diagnostic { span, warning });

        let event = match command {
            Command::Tempo(value) => {
                match value.unwrap_or(0) {
                    0 => warn(Warning::OutOfRange {
                        command: 't',
                        value: 0,
                    }),
                    bpm => state.bpm = bpm as f32,
                }
                None
            }
            Command::Length(value) => {
                match value.unwrap_or(0) {
                    0 => warn(Warning::OutOfRange {
                        command: 'l',
                        value: 0,
                    }),
                    length => state.length = length,
                }
                None
            }
            // A bare `o` reads as octave 0.
            Command::Octave(value) => {
                let octave = value.unwrap_or(0);
                if octave <= u32::from(MAX_OCTAVE) {
                    state.octave = octave as u8;
                } else {
                    warn(Warning::OutOfRange {
                        command: 'o',
                        value: octave,
                    });
                }
                None
            }
            Command::Program(value) => {
                let program = value.unwrap_or(0);
                match Waveform::from_index(program) {
                    Some(waveform) => state.waveform = waveform,
                    None => warn(Warning::OutOfRange {
                        command: '@',
                        value: program,
                    }),
                }
                None
            }
            Command::Volume(value) => {
                state.volume = (value.unwrap_or(0) as f32 / 15.0).clamp(0.0, 1.0);
                None
            }
            Command::OctaveUp => {
                state.octave = (state.octave + 1).min(MAX_OCTAVE);
                None
            }
            Command::OctaveDown => {
                state.octave = state.octave.saturating_sub(1);
                None
            }
            Command::Rest { length, dotted } => {
                let duration = state.duration(length, dotted, &mut warn);
                Some(NoteEvent {
                    waveform: state.waveform,
                    volume: state.volume,
                    ..NoteEvent::rest(duration)
                })
            }
            Command::Note {
                pitch,
                length,
                dotted,
            } => {
                let duration = state.duration(length, dotted, &mut warn);
                Some(NoteEvent {
                    pitch,
                    octave: state.octave,
                    duration,
                    is_rest: false,
                    waveform: state.waveform,
                    volume: state.volume,
                })
            }
            Command::Unknown(ch) => {
                warn(Warning::UnknownCharacter(ch));
                None
            }
        };

        if let Some(event) = event {
            if !out.notes.push(event) && !truncated {
                truncated = true;
                out.diagnostics.push(Diagnostic {
                    span,
                    warning: Warning::Truncated,
                });
            }
        }
    }

    out
}

impl State {
    fn duration(&self, length: Option<u32>, dotted: bool, warn: &mut impl FnMut(Warning)) -> f32 {
        let length = match length {
            Some(0) => {
                warn(Warning::ZeroLength);
                self.length
            }
            Some(length) => length,
            None => self.length,
        };
        note_duration(self.bpm, length, dotted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mml::lexer::Lexer;
    use crate::note::{MAX_NOTE_SEQUENCE_SIZE, PitchClass};

    fn compile_str(input: &str) -> Compiled {
        compile(&Lexer::new(input).tokenize())
    }

    #[test]
    fn scale_with_octave_jump() {
        let out = compile_str("t120 o4 l4 cdefgab>c");
        let notes = out.notes.as_slice();
        assert_eq!(notes.len(), 8);

        let pitches: Vec<PitchClass> = notes.iter().map(|n| n.pitch).collect();
        assert_eq!(
            pitches,
            vec![
                PitchClass::C,
                PitchClass::D,
                PitchClass::E,
                PitchClass::F,
                PitchClass::G,
                PitchClass::A,
                PitchClass::B,
                PitchClass::C,
            ]
        );
        let octaves: Vec<u8> = notes.iter().map(|n| n.octave).collect();
        assert_eq!(octaves, vec![4, 4, 4, 4, 4, 4, 4, 5]);
        for n in notes {
            assert_eq!(n.duration, 0.5);
            assert!(!n.is_rest);
        }
        assert!(out.diagnostics.is_empty());
    }

    #[test]
    fn dotted_half_rest() {
        let out = compile_str("r2.");
        assert_eq!(out.notes.len(), 1);
        let rest = out.notes.get(0).unwrap();
        assert!(rest.is_rest);
        assert_eq!(rest.duration, 1.5);
        assert_eq!(rest.pitch, PitchClass::C);
        assert_eq!(rest.octave, 0);
    }

    #[test]
    fn unknown_characters_do_not_change_state() {
        let clean = compile_str("t90 o3 l8 @1 v9 c d");
        let noisy = compile_str("t90 o3 l8 @1 v9 c ! ; $ d");
        assert_eq!(clean.notes, noisy.notes);
        assert_eq!(noisy.diagnostics.len(), 3);
        assert_eq!(
            noisy.diagnostics[0].warning,
            Warning::UnknownCharacter('!')
        );
    }

    #[test]
    fn settings_apply_to_following_notes() {
        let out = compile_str("@1 v15 c @3 v0 c16 @7 c");
        let notes = out.notes.as_slice();
        assert_eq!(notes[0].waveform, Waveform::Square);
        assert_eq!(notes[0].volume, 1.0);
        assert_eq!(notes[1].waveform, Waveform::Noise);
        assert_eq!(notes[1].volume, 0.0);
        assert_eq!(notes[1].duration, 0.125);
        assert_eq!(notes[2].waveform, Waveform::Noise, "@7 is ignored");
        assert_eq!(
            out.diagnostics[0].warning,
            Warning::OutOfRange {
                command: '@',
                value: 7
            }
        );
    }

    #[test]
    fn octave_limits() {
        let out = compile_str("o8 > c o0 < c o9 c o c");
        let octaves: Vec<u8> = out.notes.iter().map(|n| n.octave).collect();
        assert_eq!(octaves, vec![8, 0, 0, 0]);
    }

    #[test]
    fn accidentals_wrap_pitch_not_octave() {
        let out = compile_str("o4 b+ c-");
        let notes = out.notes.as_slice();
        assert_eq!((notes[0].pitch, notes[0].octave), (PitchClass::C, 4));
        assert_eq!((notes[1].pitch, notes[1].octave), (PitchClass::B, 4));
    }

    #[test]
    fn zero_tempo_and_length_are_ignored() {
        let out = compile_str("t0 l0 c c0");
        for n in out.notes.iter() {
            assert_eq!(n.duration, 0.5);
        }
        assert_eq!(out.diagnostics.len(), 3);
        assert_eq!(out.diagnostics[2].warning, Warning::ZeroLength);
    }

    #[test]
    fn overflow_is_truncated_once() {
        let input = "c".repeat(MAX_NOTE_SEQUENCE_SIZE + 20);
        let out = compile_str(&input);
        assert_eq!(out.notes.len(), MAX_NOTE_SEQUENCE_SIZE);
        let truncations = out
            .diagnostics
            .iter()
            .filter(|d| d.warning == Warning::Truncated)
            .count();
        assert_eq!(truncations, 1);
        assert_eq!(out.diagnostics[0].span.start, MAX_NOTE_SEQUENCE_SIZE);
    }

    #[test]
    fn rests_keep_current_voice_settings() {
        let out = compile_str("@2 v3 r");
        let rest = out.notes.get(0).unwrap();
        assert_eq!(rest.waveform, Waveform::Sawtooth);
        assert_eq!(rest.volume, 0.2);
    }
}
