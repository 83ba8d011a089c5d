//! MML (Music Macro Language) front end.
//!
//! ```text
//! t<n>  tempo (BPM)          l<n>  default length (4 = quarter)
//! o<n>  octave 0-8           > <   octave up / down
//! @<n>  waveform 0-3         v<n>  volume 0-15
//! a-g   note, + # - accidental, optional length and '.'
//! r     rest, optional length and '.'
//! ```
//!
//! Parsing is permissive: unknown characters are skipped and notes past the
//! sequence capacity are dropped.

pub mod compiler;
pub mod lexer;
pub mod token;

use ariadne::{Config, IndexType, Label, Report, ReportKind, Source};

use crate::note::NoteSequence;

pub use compiler::{Compiled, Diagnostic, Warning};

/// Compile MML text into a note sequence.
pub fn parse(source: &str) -> NoteSequence {
    parse_with_diagnostics(source).notes
}

/// Compile MML text, keeping the list of skipped input.
pub fn parse_with_diagnostics(source: &str) -> Compiled {
    let commands = lexer::Lexer::new(source).tokenize();
    compiler::compile(&commands)
}

/// Render diagnostics as plain-text reports against `source`.
pub fn render_diagnostics(
    name: &str,
    source: &str,
    diagnostics: &[Diagnostic],
) -> std::io::Result<String> {
    let mut buf = Vec::new();
    for diag in diagnostics {
        Report::build(ReportKind::Warning, (name, diag.span.range()))
            .with_config(
                Config::default()
                    .with_color(false)
                    .with_index_type(IndexType::Byte),
            )
            .with_message(diag.warning.to_string())
            .with_label(Label::new((name, diag.span.range())).with_message("skipped"))
            .finish()
            .write((name, Source::from(source)), &mut buf)?;
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
