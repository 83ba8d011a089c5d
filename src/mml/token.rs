use crate::note::PitchClass;

/// Byte range in the MML source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn range(&self) -> std::ops::Range<usize> {
        self.start..self.end
    }
}

/// One MML command. Numeric arguments are `None` when no digits followed
/// the command letter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Tempo(Option<u32>),   // t120
    Length(Option<u32>),  // l8
    Octave(Option<u32>),  // o4
    Program(Option<u32>), // @1
    Volume(Option<u32>),  // v12
    OctaveUp,             // >
    OctaveDown,           // <
    Rest {
        length: Option<u32>,
        dotted: bool,
    },
    Note {
        pitch: PitchClass,
        length: Option<u32>,
        dotted: bool,
    },
    /// Anything else; skipped by the compiler.
    Unknown(char),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spanned {
    pub command: Command,
    pub span: Span,
}
