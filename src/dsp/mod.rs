//! DSP — sample-level synthesis and processing.
//!
//! Everything here runs on the audio side: per-sample state is owned by
//! the rendering thread, and control threads reach it through the queued
//! handles in `voice` and `mixer`.

pub mod effect;
pub mod envelope;
pub mod filter;
pub mod mixer;
pub mod oscillator;
pub mod output;
pub mod renderer;
pub mod retire;
pub mod tremolo;
pub mod voice;
