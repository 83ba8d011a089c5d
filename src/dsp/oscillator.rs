//! Phase-driven oscillators.

use std::f32::consts::PI;

use serde::{Deserialize, Serialize};

use crate::config::{DEFAULT_FREQUENCY, DEFAULT_NOISE_SEED, LCG_INCREMENT, LCG_MULTIPLIER};

/// Supported waveform shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Waveform {
    Sine,
    Square,
    Sawtooth,
    /// White noise from a 32-bit LCG; ignores phase.
    Noise,
}

impl Waveform {
    /// Waveform for an MML `@n` program number.
    pub fn from_index(index: u32) -> Option<Self> {
        match index {
            0 => Some(Waveform::Sine),
            1 => Some(Waveform::Square),
            2 => Some(Waveform::Sawtooth),
            3 => Some(Waveform::Noise),
            _ => None,
        }
    }
}

/// A stateless-by-phase oscillator. The caller owns the phase; only the
/// noise generator keeps state between calls.
#[derive(Debug, Clone)]
pub struct Oscillator {
    pub waveform: Waveform,
    frequency: f32,
    noise_state: u32,
}

impl Oscillator {
    pub fn new(waveform: Waveform, frequency: f32) -> Self {
        Oscillator {
            waveform,
            frequency,
            noise_state: DEFAULT_NOISE_SEED,
        }
    }

    /// Unchecked: callers must not pass a non-positive frequency.
    pub fn set_frequency(&mut self, frequency: f32) {
        self.frequency = frequency;
    }

    pub fn frequency(&self) -> f32 {
        self.frequency
    }

    pub fn set_noise_seed(&mut self, seed: u32) {
        self.noise_state = seed;
    }

    /// Generate one sample for `phase` in [0, 1).
    pub fn generate(&mut self, phase: f32) -> f32 {
        match self.waveform {
            Waveform::Sine => (2.0 * PI * phase).sin(),
            Waveform::Square => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::Sawtooth => 2.0 * phase - 1.0,
            Waveform::Noise => self.next_noise(),
        }
    }

    /// Advance the LCG and map the state, read as i32, onto [-1, 1).
    fn next_noise(&mut self) -> f32 {
        self.noise_state = self
            .noise_state
            .wrapping_mul(LCG_MULTIPLIER)
            .wrapping_add(LCG_INCREMENT);
        self.noise_state as i32 as f32 / 2_147_483_648.0
    }
}

impl Default for Oscillator {
    fn default() -> Self {
        Oscillator::new(Waveform::Sine, DEFAULT_FREQUENCY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sine_reference_points() {
        let mut osc = Oscillator::new(Waveform::Sine, 440.0);
        assert_eq!(osc.generate(0.0), 0.0);
        assert!((osc.generate(0.25) - 1.0).abs() < 1e-6);
        assert!((osc.generate(0.75) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn square_switches_at_half() {
        let mut osc = Oscillator::new(Waveform::Square, 440.0);
        assert_eq!(osc.generate(0.4), 1.0);
        assert_eq!(osc.generate(0.6), -1.0);
    }

    #[test]
    fn sawtooth_ramps() {
        let mut osc = Oscillator::new(Waveform::Sawtooth, 440.0);
        assert_eq!(osc.generate(0.0), -1.0);
        assert_eq!(osc.generate(0.5), 0.0);
        assert!((osc.generate(0.9999) - 1.0).abs() < 1e-3);
    }

    #[test]
    fn noise_is_reproducible_from_seed() {
        let mut osc = Oscillator::new(Waveform::Noise, 440.0);
        osc.set_noise_seed(0x1234_5678);

        let expected = [0.916_111_9, -0.396_961_4, 0.295_775_7, 0.588_762_9];
        for (i, want) in expected.iter().enumerate() {
            let got = osc.generate(0.0);
            assert!((got - want).abs() < 1e-6, "noise[{i}] = {got}, expected {want}");
        }
        assert_eq!(osc.noise_state, 0x4b5c_952c);
    }

    #[test]
    fn noise_ignores_phase_and_stays_in_range() {
        let mut a = Oscillator::new(Waveform::Noise, 440.0);
        let mut b = Oscillator::new(Waveform::Noise, 440.0);
        for i in 0..10_000 {
            let sa = a.generate(0.1);
            let sb = b.generate((i % 100) as f32 / 100.0);
            assert_eq!(sa, sb, "noise must not depend on phase");
            assert!((-1.0..1.0).contains(&sa), "noise out of range: {sa}");
        }
    }

    #[test]
    fn program_numbers_map_to_waveforms() {
        assert_eq!(Waveform::from_index(0), Some(Waveform::Sine));
        assert_eq!(Waveform::from_index(3), Some(Waveform::Noise));
        assert_eq!(Waveform::from_index(4), None);
    }
}
