//! Tremolo: amplitude modulation by a low-frequency oscillator.

use super::effect::Effect;
use super::oscillator::{Oscillator, Waveform};

pub const MIN_RATE: f32 = 0.1;
pub const MAX_RATE: f32 = 20.0;

/// Volume modulation effect.
///
/// `out = in * (1 - depth + depth * (lfo + 1) / 2)`, so at depth 1 the
/// signal swings between silence and full level.
#[derive(Debug, Clone)]
pub struct VolumeModulation {
    lfo: Oscillator,
    rate: f32,
    depth: f32,
    sample_rate: u32,
    sample_index: u64,
}

impl VolumeModulation {
    pub fn new(sample_rate: u32) -> Self {
        VolumeModulation {
            lfo: Oscillator::new(Waveform::Sine, 5.0),
            rate: 5.0,
            depth: 0.5,
            sample_rate,
            sample_index: 0,
        }
    }

    /// LFO rate in Hz, clamped to [0.1, 20].
    pub fn set_rate(&mut self, rate: f32) {
        self.rate = rate.clamp(MIN_RATE, MAX_RATE);
        self.lfo.set_frequency(self.rate);
    }

    /// Modulation depth, clamped to [0, 1].
    pub fn set_depth(&mut self, depth: f32) {
        self.depth = depth.clamp(0.0, 1.0);
    }

    pub fn set_waveform(&mut self, waveform: Waveform) {
        self.lfo.waveform = waveform;
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }

    pub fn depth(&self) -> f32 {
        self.depth
    }

    fn lfo_phase(&self) -> f32 {
        (self.sample_index as f64 * self.rate as f64 / self.sample_rate as f64).fract() as f32
    }
}

impl Effect for VolumeModulation {
    fn process(&mut self, input: f32) -> f32 {
        let phase = self.lfo_phase();
        let lfo = self.lfo.generate(phase);
        self.sample_index = self.sample_index.wrapping_add(1);

        let unipolar = (lfo + 1.0) * 0.5;
        input * (1.0 - self.depth + self.depth * unipolar)
    }

    fn reset(&mut self) {
        self.sample_index = 0;
    }

    fn clone_box(&self) -> Box<dyn Effect> {
        let mut copy = self.clone();
        copy.reset();
        Box::new(copy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_depth_is_transparent() {
        let mut trem = VolumeModulation::new(1000);
        trem.set_depth(0.0);
        for _ in 0..500 {
            assert_eq!(trem.process(0.8), 0.8);
        }
    }

    #[test]
    fn full_depth_swings_between_silence_and_input() {
        let mut trem = VolumeModulation::new(1000);
        trem.set_rate(1.0);
        trem.set_depth(1.0);

        let out: Vec<f32> = (0..1000).map(|_| trem.process(1.0)).collect();
        // Sine LFO: phase 0 → 0.5, phase 0.25 → 1, phase 0.75 → 0
        assert!((out[0] - 0.5).abs() < 1e-6, "got {}", out[0]);
        assert!((out[250] - 1.0).abs() < 1e-6, "got {}", out[250]);
        assert!(out[750].abs() < 1e-6, "got {}", out[750]);
        assert!(out.iter().all(|s| (0.0..=1.0).contains(s)));
    }

    #[test]
    fn parameters_are_clamped() {
        let mut trem = VolumeModulation::new(44_100);
        trem.set_rate(0.0);
        assert_eq!(trem.rate(), MIN_RATE);
        trem.set_rate(100.0);
        assert_eq!(trem.rate(), MAX_RATE);
        trem.set_depth(-1.0);
        assert_eq!(trem.depth(), 0.0);
        trem.set_depth(3.0);
        assert_eq!(trem.depth(), 1.0);
    }

    #[test]
    fn reset_restarts_lfo() {
        let mut trem = VolumeModulation::new(1000);
        trem.set_depth(1.0);
        let first = trem.process(1.0);
        for _ in 0..123 {
            trem.process(1.0);
        }
        trem.reset();
        assert_eq!(trem.process(1.0), first);
    }
}
