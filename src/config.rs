//! Engine configuration and shared defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;
pub const DEFAULT_CHANNELS: u16 = 2;
pub const DEFAULT_BPM: f32 = 120.0;
/// 15 ms is roughly 32nd-note resolution at 120 BPM.
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 15;
pub const DEFAULT_FREQUENCY: f32 = 440.0;
pub const DEFAULT_VOLUME: f32 = 1.0;
pub const DEFAULT_COMMAND_CAPACITY: usize = 256;
/// Frames rendered per pass through a mixer's scratch buffer. Larger
/// device blocks are rendered in several passes.
pub const MAX_BLOCK_FRAMES: usize = 4096;

pub const DEFAULT_NOISE_SEED: u32 = 0x1234_5678;
pub const LCG_MULTIPLIER: u32 = 1_664_525;
pub const LCG_INCREMENT: u32 = 1_013_904_223;

/// How sequencers are advanced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TickMode {
    /// A dedicated timer thread ticks every `tick_interval_ms`.
    #[default]
    Timer,
    /// The host calls `update(dt)`; used for offline rendering and tests.
    Manual,
}

/// Settings shared by every object built for one output format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Output sample rate in Hz.
    pub sample_rate: u32,
    /// Interleaved output channels for mixers and songs.
    pub channels: u16,
    /// Sequencer timer resolution in milliseconds.
    pub tick_interval_ms: u64,
    pub tick_mode: TickMode,
    /// Tempo used by `Sequencer::add_note`/`add_rest`.
    pub bpm: f32,
    /// Capacity of each voice's intent queue.
    pub command_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            tick_mode: TickMode::default(),
            bpm: DEFAULT_BPM,
            command_capacity: DEFAULT_COMMAND_CAPACITY,
        }
    }
}

impl EngineConfig {
    /// Same settings, but sequencers are advanced by the host.
    pub fn manual(mut self) -> Self {
        self.tick_mode = TickMode::Manual;
        self
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    /// Channel count as used for buffer layout, never zero.
    pub fn channel_count(&self) -> usize {
        usize::from(self.channels.max(1))
    }
}
