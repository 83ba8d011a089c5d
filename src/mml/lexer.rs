//! MML scanner. Never fails: every character ends up in some command,
//! unrecognised ones as `Command::Unknown`.

use crate::note::PitchClass;

use super::token::{Command, Span, Spanned};

pub struct Lexer {
    chars: Vec<char>,
    /// `byte_offsets[i]` is the byte offset of `chars[i]`; the extra last
    /// entry is the total length.
    byte_offsets: Vec<usize>,
    pos: usize,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        let chars: Vec<char> = input.chars().collect();
        let mut byte_offsets = Vec::with_capacity(chars.len() + 1);
        let mut offset = 0;
        for ch in &chars {
            byte_offsets.push(offset);
            offset += ch.len_utf8();
        }
        byte_offsets.push(offset);
        Lexer {
            chars,
            byte_offsets,
            pos: 0,
        }
    }

    pub fn tokenize(&mut self) -> Vec<Spanned> {
        let mut commands = Vec::new();
        while let Some(cmd) = self.next_command() {
            commands.push(cmd);
        }
        commands
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(|c| c.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn byte_pos_of(&self, char_idx: usize) -> usize {
        self.byte_offsets[char_idx.min(self.chars.len())]
    }

    fn spanned(&self, command: Command, start: usize) -> Spanned {
        Spanned {
            command,
            span: Span {
                start: self.byte_pos_of(start),
                end: self.byte_pos_of(self.pos),
            },
        }
    }

    /// Decimal digits directly after the cursor; saturates instead of wrapping.
    fn number(&mut self) -> Option<u32> {
        let mut value: Option<u32> = None;
        while let Some(digit) = self.peek().and_then(|c| c.to_digit(10)) {
            self.pos += 1;
            let acc = value.unwrap_or(0);
            value = Some(acc.saturating_mul(10).saturating_add(digit));
        }
        value
    }

    fn next_command(&mut self) -> Option<Spanned> {
        self.skip_whitespace();

        let start = self.pos;
        let ch = self.advance()?;

        let command = match ch.to_ascii_lowercase() {
            't' => Command::Tempo(self.number()),
            'l' => Command::Length(self.number()),
            'o' => Command::Octave(self.number()),
            '@' => Command::Program(self.number()),
            'v' => Command::Volume(self.number()),
            '>' => Command::OctaveUp,
            '<' => Command::OctaveDown,
            'r' => {
                let length = self.number();
                let dotted = self.eat('.');
                Command::Rest { length, dotted }
            }
            letter @ 'a'..='g' => {
                let mut pitch = PitchClass::from_letter(letter).unwrap_or(PitchClass::C);
                if self.eat('+') || self.eat('#') {
                    pitch = pitch.sharpened();
                } else if self.eat('-') {
                    pitch = pitch.flattened();
                }
                let length = self.number();
                let dotted = self.eat('.');
                Command::Note {
                    pitch,
                    length,
                    dotted,
                }
            }
            _ => Command::Unknown(ch),
        };

        Some(self.spanned(command, start))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commands(input: &str) -> Vec<Command> {
        Lexer::new(input)
            .tokenize()
            .into_iter()
            .map(|s| s.command)
            .collect()
    }

    #[test]
    fn lex_settings() {
        assert_eq!(
            commands("t150 L8 o5 @2 v10"),
            vec![
                Command::Tempo(Some(150)),
                Command::Length(Some(8)),
                Command::Octave(Some(5)),
                Command::Program(Some(2)),
                Command::Volume(Some(10)),
            ]
        );
    }

    #[test]
    fn lex_notes_with_accidentals_lengths_and_dots() {
        assert_eq!(
            commands("c d+8 E#16. b-2 r4."),
            vec![
                Command::Note {
                    pitch: PitchClass::C,
                    length: None,
                    dotted: false
                },
                Command::Note {
                    pitch: PitchClass::Ds,
                    length: Some(8),
                    dotted: false
                },
                Command::Note {
                    pitch: PitchClass::F,
                    length: Some(16),
                    dotted: true
                },
                Command::Note {
                    pitch: PitchClass::As,
                    length: Some(2),
                    dotted: false
                },
                Command::Rest {
                    length: Some(4),
                    dotted: true
                },
            ]
        );
    }

    #[test]
    fn lex_missing_numbers_and_unknowns() {
        assert_eq!(
            commands("o x>"),
            vec![Command::Octave(None), Command::Unknown('x'), Command::OctaveUp]
        );
        // Digits must follow the letter directly
        assert_eq!(
            commands("t 9"),
            vec![Command::Tempo(None), Command::Unknown('9')]
        );
    }

    #[test]
    fn lex_huge_number_saturates() {
        assert_eq!(
            commands("t99999999999999"),
            vec![Command::Tempo(Some(u32::MAX))]
        );
    }

    #[test]
    fn spans_are_byte_offsets() {
        let tokens = Lexer::new("ド c4").tokenize();
        assert_eq!(tokens[0].command, Command::Unknown('ド'));
        assert_eq!(tokens[0].span, Span { start: 0, end: 3 });
        assert_eq!(tokens[1].span, Span { start: 4, end: 6 });
    }
}
