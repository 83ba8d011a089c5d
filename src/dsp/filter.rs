//! Biquad filter — RBJ Audio EQ Cookbook coefficients, Direct Form I.

use std::f32::consts::PI;

use serde::{Deserialize, Serialize};

use super::effect::Effect;

/// Filter type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterType {
    Lowpass,
    Highpass,
    Bandpass,
    Notch,
    Allpass,
    Peaking,
    Lowshelf,
    Highshelf,
}

/// A biquad IIR filter (2nd order).
///
/// Coefficients are recomputed only when a parameter changes. All setters
/// clamp: frequency to [10, nyquist - 1], Q to [1e-4, 1000], gain to
/// ±40 dB, detune to ±1200 cents.
#[derive(Debug, Clone)]
pub struct BiquadFilter {
    filter_type: FilterType,
    frequency: f32,
    q: f32,
    gain_db: f32,
    detune: f32,
    sample_rate: u32,

    // Coefficients, normalized by a0
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,

    // History (Direct Form I)
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl BiquadFilter {
    pub fn new(filter_type: FilterType, sample_rate: u32) -> Self {
        let mut f = BiquadFilter {
            filter_type,
            frequency: 1000.0,
            q: 1.0,
            gain_db: 0.0,
            detune: 0.0,
            sample_rate,
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        };
        f.frequency = f.clamp_frequency(f.frequency);
        f.update_coefficients();
        f
    }

    pub fn filter_type(&self) -> FilterType {
        self.filter_type
    }

    pub fn frequency(&self) -> f32 {
        self.frequency
    }

    pub fn q(&self) -> f32 {
        self.q
    }

    pub fn gain(&self) -> f32 {
        self.gain_db
    }

    pub fn detune(&self) -> f32 {
        self.detune
    }

    pub fn set_type(&mut self, filter_type: FilterType) {
        if self.filter_type != filter_type {
            self.filter_type = filter_type;
            self.update_coefficients();
        }
    }

    pub fn set_frequency(&mut self, frequency: f32) {
        let frequency = self.clamp_frequency(frequency);
        if self.frequency != frequency {
            self.frequency = frequency;
            self.update_coefficients();
        }
    }

    pub fn set_q(&mut self, q: f32) {
        let q = q.clamp(1.0e-4, 1000.0);
        if self.q != q {
            self.q = q;
            self.update_coefficients();
        }
    }

    /// Gain in dB; only Peaking and the shelves use it.
    pub fn set_gain(&mut self, gain_db: f32) {
        let gain_db = gain_db.clamp(-40.0, 40.0);
        if self.gain_db != gain_db {
            self.gain_db = gain_db;
            self.update_coefficients();
        }
    }

    /// Detune in cents, applied as `frequency * 2^(cents / 1200)`.
    pub fn set_detune(&mut self, cents: f32) {
        let cents = cents.clamp(-1200.0, 1200.0);
        if self.detune != cents {
            self.detune = cents;
            self.update_coefficients();
        }
    }

    fn clamp_frequency(&self, frequency: f32) -> f32 {
        let nyquist = self.sample_rate as f32 / 2.0;
        frequency.clamp(10.0, (nyquist - 1.0).max(10.0))
    }

    /// Cutoff/center frequency after detune, kept inside (10 Hz, Nyquist).
    pub fn detuned_frequency(&self) -> f32 {
        if self.detune == 0.0 {
            self.frequency
        } else {
            self.clamp_frequency(self.frequency * 2.0_f32.powf(self.detune / 1200.0))
        }
    }

    fn update_coefficients(&mut self) {
        let w0 = 2.0 * PI * self.detuned_frequency() / self.sample_rate as f32;
        let cos_w0 = w0.cos();
        let sin_w0 = w0.sin();
        let alpha = sin_w0 / (2.0 * self.q);
        let a = 10.0_f32.powf(self.gain_db / 40.0);

        let (b0, b1, b2, a0, a1, a2) = match self.filter_type {
            FilterType::Lowpass => (
                (1.0 - cos_w0) / 2.0,
                1.0 - cos_w0,
                (1.0 - cos_w0) / 2.0,
                1.0 + alpha,
                -2.0 * cos_w0,
                1.0 - alpha,
            ),
            FilterType::Highpass => (
                (1.0 + cos_w0) / 2.0,
                -(1.0 + cos_w0),
                (1.0 + cos_w0) / 2.0,
                1.0 + alpha,
                -2.0 * cos_w0,
                1.0 - alpha,
            ),
            // Constant skirt gain, peak gain = Q
            FilterType::Bandpass => (
                alpha,
                0.0,
                -alpha,
                1.0 + alpha,
                -2.0 * cos_w0,
                1.0 - alpha,
            ),
            FilterType::Notch => (
                1.0,
                -2.0 * cos_w0,
                1.0,
                1.0 + alpha,
                -2.0 * cos_w0,
                1.0 - alpha,
            ),
            FilterType::Allpass => (
                1.0 - alpha,
                -2.0 * cos_w0,
                1.0 + alpha,
                1.0 + alpha,
                -2.0 * cos_w0,
                1.0 - alpha,
            ),
            FilterType::Peaking => (
                1.0 + alpha * a,
                -2.0 * cos_w0,
                1.0 - alpha * a,
                1.0 + alpha / a,
                -2.0 * cos_w0,
                1.0 - alpha / a,
            ),
            FilterType::Lowshelf => {
                let sqrt_a2 = 2.0 * a.sqrt() * alpha;
                (
                    a * ((a + 1.0) - (a - 1.0) * cos_w0 + sqrt_a2),
                    2.0 * a * ((a - 1.0) - (a + 1.0) * cos_w0),
                    a * ((a + 1.0) - (a - 1.0) * cos_w0 - sqrt_a2),
                    (a + 1.0) + (a - 1.0) * cos_w0 + sqrt_a2,
                    -2.0 * ((a - 1.0) + (a + 1.0) * cos_w0),
                    (a + 1.0) + (a - 1.0) * cos_w0 - sqrt_a2,
                )
            }
            FilterType::Highshelf => {
                let sqrt_a2 = 2.0 * a.sqrt() * alpha;
                (
                    a * ((a + 1.0) + (a - 1.0) * cos_w0 + sqrt_a2),
                    -2.0 * a * ((a - 1.0) + (a + 1.0) * cos_w0),
                    a * ((a + 1.0) + (a - 1.0) * cos_w0 - sqrt_a2),
                    (a + 1.0) - (a - 1.0) * cos_w0 + sqrt_a2,
                    2.0 * ((a - 1.0) - (a + 1.0) * cos_w0),
                    (a + 1.0) - (a - 1.0) * cos_w0 - sqrt_a2,
                )
            }
        };

        self.b0 = b0 / a0;
        self.b1 = b1 / a0;
        self.b2 = b2 / a0;
        self.a1 = a1 / a0;
        self.a2 = a2 / a0;
    }
}

impl Effect for BiquadFilter {
    fn process(&mut self, input: f32) -> f32 {
        let output = self.b0 * input + self.b1 * self.x1 + self.b2 * self.x2
            - self.a1 * self.y1
            - self.a2 * self.y2;

        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;
        output
    }

    fn reset(&mut self) {
        self.x1 = 0.0;
        self.x2 = 0.0;
        self.y1 = 0.0;
        self.y2 = 0.0;
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

    const SR: u32 = 44_100;

    /// Feed a sine at `freq` and return (peak output, peak |out - in|) after the transient.
    fn steady_state(filter: &mut BiquadFilter, freq: f32) -> (f32, f32) {
        let mut peak = 0.0_f32;
        let mut peak_diff = 0.0_f32;
        for i in 0..(SR as usize / 2) {
            let t = i as f32 / SR as f32;
            let input = (2.0 * PI * freq * t).sin();
            let out = filter.process(input);
            if i > SR as usize / 4 {
                peak = peak.max(out.abs());
                peak_diff = peak_diff.max((out - input).abs());
            }
        }
        (peak, peak_diff)
    }

    #[test]
    fn lowpass_passes_dc() {
        let mut f = BiquadFilter::new(FilterType::Lowpass, SR);
        f.set_frequency(5000.0);
        let mut output = 0.0;
        for _ in 0..2000 {
            output = f.process(1.0);
        }
        assert!((output - 1.0).abs() < 1e-3, "Lowpass should pass DC, got {output}");
    }

    #[test]
    fn highpass_blocks_dc() {
        let mut f = BiquadFilter::new(FilterType::Highpass, SR);
        f.set_frequency(1000.0);
        let mut output = 1.0;
        for _ in 0..5000 {
            output = f.process(1.0);
        }
        assert!(output.abs() < 1e-3, "Highpass should block DC, got {output}");
    }

    #[test]
    fn lowpass_attenuates_far_above_cutoff() {
        let mut f = BiquadFilter::new(FilterType::Lowpass, SR);
        f.set_frequency(200.0);
        f.set_q(0.707);
        let (peak, _) = steady_state(&mut f, 5000.0);
        assert!(peak < 0.1, "Lowpass@200Hz should attenuate 5kHz below 0.1, got {peak}");
    }

    #[test]
    fn allpass_keeps_amplitude_but_shifts_phase() {
        let mut f = BiquadFilter::new(FilterType::Allpass, SR);
        f.set_frequency(1000.0);
        let (peak, peak_diff) = steady_state(&mut f, 1000.0);
        assert!((peak - 1.0).abs() < 0.02, "Allpass should keep amplitude, got {peak}");
        assert!(peak_diff > 0.5, "Allpass should shift phase, max |out-in| = {peak_diff}");
    }

    #[test]
    fn notch_removes_center_frequency() {
        let mut f = BiquadFilter::new(FilterType::Notch, SR);
        f.set_frequency(1000.0);
        f.set_q(2.0);
        let (peak, _) = steady_state(&mut f, 1000.0);
        assert!(peak < 0.05, "Notch should remove 1kHz, got {peak}");
    }

    #[test]
    fn peaking_boosts_center_frequency() {
        let mut f = BiquadFilter::new(FilterType::Peaking, SR);
        f.set_frequency(1000.0);
        f.set_gain(6.0);
        let (peak, _) = steady_state(&mut f, 1000.0);
        // +6 dB is roughly 2x
        assert!((peak - 1.995).abs() < 0.05, "Peaking +6dB should double 1kHz, got {peak}");
    }

    #[test]
    fn shelves_scale_dc() {
        let mut low = BiquadFilter::new(FilterType::Lowshelf, SR);
        low.set_frequency(500.0);
        low.set_gain(-12.0);
        let mut high = BiquadFilter::new(FilterType::Highshelf, SR);
        high.set_frequency(500.0);
        high.set_gain(-12.0);

        let (mut lo, mut hi) = (0.0, 0.0);
        for _ in 0..20_000 {
            lo = low.process(1.0);
            hi = high.process(1.0);
        }
        assert!((lo - 0.251).abs() < 0.01, "Lowshelf -12dB at DC, got {lo}");
        assert!((hi - 1.0).abs() < 0.01, "Highshelf leaves DC alone, got {hi}");
    }

    #[test]
    fn setters_clamp() {
        let mut f = BiquadFilter::new(FilterType::Lowpass, SR);
        f.set_frequency(1.0);
        assert_eq!(f.frequency(), 10.0);
        f.set_frequency(1.0e6);
        assert_eq!(f.frequency(), 22_049.0);
        f.set_q(0.0);
        assert_eq!(f.q(), 1.0e-4);
        f.set_q(5000.0);
        assert_eq!(f.q(), 1000.0);
        f.set_gain(90.0);
        assert_eq!(f.gain(), 40.0);
        f.set_detune(-5000.0);
        assert_eq!(f.detune(), -1200.0);
    }

    #[test]
    fn detune_shifts_cutoff_by_octaves() {
        let mut f = BiquadFilter::new(FilterType::Lowpass, SR);
        f.set_frequency(1000.0);
        f.set_detune(1200.0);
        assert!((f.detuned_frequency() - 2000.0).abs() < 0.01);
        f.set_detune(-1200.0);
        assert!((f.detuned_frequency() - 500.0).abs() < 0.01);
    }

    #[test]
    fn detune_past_nyquist_stays_stable() {
        let mut f = BiquadFilter::new(FilterType::Lowpass, SR);
        f.set_frequency(20_000.0);
        f.set_detune(1200.0);
        assert_eq!(f.detuned_frequency(), 22_049.0);

        let mut low = BiquadFilter::new(FilterType::Highpass, SR);
        low.set_frequency(10.0);
        low.set_detune(-1200.0);
        assert_eq!(low.detuned_frequency(), 10.0);

        for i in 0..2000 {
            let input = 0.5 * (2.0 * PI * 440.0 * i as f32 / SR as f32).sin();
            let out = f.process(input);
            assert!(out.is_finite() && out.abs() <= 1.0, "sample {i} = {out}");
        }
    }

    #[test]
    fn reset_clears_history() {
        let mut f = BiquadFilter::new(FilterType::Lowpass, SR);
        for _ in 0..100 {
            f.process(1.0);
        }
        f.reset();
        let mut fresh = BiquadFilter::new(FilterType::Lowpass, SR);
        assert_eq!(f.process(0.5), fresh.process(0.5));
    }

    #[test]
    fn output_finite_for_every_type() {
        for ty in [
            FilterType::Lowpass,
            FilterType::Highpass,
            FilterType::Bandpass,
            FilterType::Notch,
            FilterType::Allpass,
            FilterType::Peaking,
            FilterType::Lowshelf,
            FilterType::Highshelf,
        ] {
            let mut f = BiquadFilter::new(FilterType::Lowpass, SR);
            f.set_type(ty);
            assert_eq!(f.filter_type(), ty);
            for i in 0..10_000 {
                let input = if i % 100 == 0 { 1.0 } else { 0.0 };
                let out = f.process(input);
                assert!(out.is_finite(), "{ty:?} output not finite at sample {i}");
            }
        }
    }
}
