//! Live output — pulls interleaved f32 frames from a `Render` source inside
//! the device callback.
//!
//! Device support is compiled in with the `device` feature (cpal). Without
//! it, `AudioOutput::open` reports `OutputError::Unsupported` and callers
//! keep running headless.

use std::sync::{Arc, Mutex, TryLockError};

use crate::error::OutputError;

use super::mixer::AudioMixer;
use super::voice::Voice;

/// Something that can fill an interleaved output buffer.
pub trait Render: Send {
    fn render(&mut self, out: &mut [f32]);
}

impl Render for AudioMixer {
    fn render(&mut self, out: &mut [f32]) {
        self.generate_samples(out);
    }
}

/// A voice renders mono.
impl Render for Voice {
    fn render(&mut self, out: &mut [f32]) {
        self.generate_samples(out);
    }
}

/// The callback never waits: if the owner holds the lock, this block is silent.
impl<R: Render> Render for Arc<Mutex<R>> {
    fn render(&mut self, out: &mut [f32]) {
        match self.try_lock() {
            Ok(mut inner) => inner.render(out),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().render(out),
            Err(TryLockError::WouldBlock) => out.fill(0.0),
        }
    }
}

/// An open output stream. Dropping it stops playback.
pub struct AudioOutput {
    #[cfg(feature = "device")]
    _stream: cpal::Stream,
    sample_rate: u32,
    channels: u16,
}

impl AudioOutput {
    /// Open the default output device at `sample_rate` with `channels`
    /// interleaved channels and start pulling from `source`.
    #[cfg(feature = "device")]
    pub fn open<R>(sample_rate: u32, channels: u16, mut source: R) -> Result<Self, OutputError>
    where
        R: Render + 'static,
    {
        use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
        use tracing::{debug, error};

        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(OutputError::NoDevice)?;

        let config = cpal::StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| source.render(data),
                |err| error!("Audio stream error: {}", err),
                None,
            )
            .map_err(|e| OutputError::Build(e.to_string()))?;

        stream
            .play()
            .map_err(|e| OutputError::Play(e.to_string()))?;

        debug!(sample_rate, channels, "audio stream started");

        Ok(AudioOutput {
            _stream: stream,
            sample_rate,
            channels,
        })
    }

    #[cfg(not(feature = "device"))]
    pub fn open<R>(sample_rate: u32, channels: u16, source: R) -> Result<Self, OutputError>
    where
        R: Render + 'static,
    {
        let _ = (sample_rate, channels, source);
        Err(OutputError::Unsupported)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }
}

impl std::fmt::Debug for AudioOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioOutput")
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .finish()
    }
}
