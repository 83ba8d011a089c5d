//! Effect capability and ordered effect chains.

use serde::{Deserialize, Serialize};

use super::filter::{BiquadFilter, FilterType};
use super::oscillator::Waveform;
use super::tremolo::VolumeModulation;

/// A mono, sample-at-a-time audio processor.
pub trait Effect: Send {
    fn process(&mut self, input: f32) -> f32;

    /// Clear internal history without touching parameters.
    fn reset(&mut self);

    /// Fresh copy with the same parameters, used to give each output
    /// channel its own state.
    fn clone_box(&self) -> Box<dyn Effect>;
}

/// Most effects one chain holds. Storage is reserved up front, so adding
/// an effect on the audio side never reallocates.
pub const MAX_EFFECTS: usize = 16;

/// Effects applied in insertion order.
pub struct EffectChain {
    effects: Vec<Box<dyn Effect>>,
}

impl EffectChain {
    pub fn new() -> Self {
        EffectChain {
            effects: Vec::with_capacity(MAX_EFFECTS),
        }
    }

    /// Append `effect`, or hand it back if the chain is full.
    pub fn push(&mut self, effect: Box<dyn Effect>) -> Result<(), Box<dyn Effect>> {
        if self.effects.len() >= MAX_EFFECTS {
            return Err(effect);
        }
        self.effects.push(effect);
        Ok(())
    }

    pub fn is_full(&self) -> bool {
        self.effects.len() >= MAX_EFFECTS
    }

    /// Remove every effect, keeping the storage.
    pub fn drain(&mut self) -> std::vec::Drain<'_, Box<dyn Effect>> {
        self.effects.drain(..)
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    #[inline]
    pub fn process(&mut self, input: f32) -> f32 {
        self.effects
            .iter_mut()
            .fold(input, |sample, effect| effect.process(sample))
    }
}

impl Default for EffectChain {
    fn default() -> Self {
        EffectChain::new()
    }
}

impl std::fmt::Debug for EffectChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectChain")
            .field("len", &self.effects.len())
            .finish()
    }
}

/// Serializable effect description, used by song definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EffectConfig {
    Biquad {
        filter_type: FilterType,
        frequency: f32,
        #[serde(default = "default_q")]
        q: f32,
        #[serde(default)]
        gain_db: f32,
        #[serde(default)]
        detune: f32,
    },
    Tremolo {
        rate: f32,
        depth: f32,
        #[serde(default = "default_lfo")]
        waveform: Waveform,
    },
}

fn default_q() -> f32 {
    1.0
}

fn default_lfo() -> Waveform {
    Waveform::Sine
}

impl EffectConfig {
    pub fn build(&self, sample_rate: u32) -> Box<dyn Effect> {
        match *self {
            EffectConfig::Biquad {
                filter_type,
                frequency,
                q,
                gain_db,
                detune,
            } => {
                let mut filter = BiquadFilter::new(filter_type, sample_rate);
                filter.set_frequency(frequency);
                filter.set_q(q);
                filter.set_gain(gain_db);
                filter.set_detune(detune);
                Box::new(filter)
            }
            EffectConfig::Tremolo {
                rate,
                depth,
                waveform,
            } => {
                let mut trem = VolumeModulation::new(sample_rate);
                trem.set_rate(rate);
                trem.set_depth(depth);
                trem.set_waveform(waveform);
                Box::new(trem)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    struct Gain(f32);

    impl Effect for Gain {
        fn process(&mut self, input: f32) -> f32 {
            input * self.0
        }
        fn reset(&mut self) {}
        fn clone_box(&self) -> Box<dyn Effect> {
            Box::new(self.clone())
        }
    }

    #[derive(Clone)]
    struct Offset(f32);

    impl Effect for Offset {
        fn process(&mut self, input: f32) -> f32 {
            input + self.0
        }
        fn reset(&mut self) {}
        fn clone_box(&self) -> Box<dyn Effect> {
            Box::new(self.clone())
        }
    }

    #[test]
    fn empty_chain_is_transparent() {
        let mut chain = EffectChain::new();
        assert_eq!(chain.process(0.3), 0.3);
    }

    #[test]
    fn chain_applies_in_insertion_order() {
        let mut chain = EffectChain::new();
        assert!(chain.push(Box::new(Gain(2.0))).is_ok());
        assert!(chain.push(Box::new(Offset(1.0))).is_ok());
        // (0.5 * 2) + 1, not (0.5 + 1) * 2
        assert_eq!(chain.process(0.5), 2.0);
        assert_eq!(chain.len(), 2);

        assert_eq!(chain.drain().count(), 2);
        assert!(chain.is_empty());
        assert_eq!(chain.process(0.5), 0.5);
    }

    #[test]
    fn full_chain_hands_effect_back() {
        let mut chain = EffectChain::new();
        for _ in 0..MAX_EFFECTS {
            assert!(chain.push(Box::new(Gain(1.0))).is_ok());
        }
        assert!(chain.is_full());
        let rejected = chain.push(Box::new(Gain(3.0)));
        let mut back = rejected.err().expect("a full chain returns the effect");
        assert_eq!(back.process(1.0), 3.0);
        assert_eq!(chain.len(), MAX_EFFECTS);
    }

    #[test]
    fn drain_empties_and_keeps_storage() {
        let mut chain = EffectChain::new();
        assert!(chain.push(Box::new(Gain(2.0))).is_ok());
        assert!(chain.push(Box::new(Offset(1.0))).is_ok());
        let removed: Vec<Box<dyn Effect>> = chain.drain().collect();
        assert_eq!(removed.len(), 2);
        assert!(chain.is_empty());
        assert!(chain.effects.capacity() >= MAX_EFFECTS);
    }

    #[test]
    fn config_from_json_builds_effects() {
        let configs: Vec<EffectConfig> = serde_json::from_str(
            r#"[
                { "type": "biquad", "filter_type": "lowpass", "frequency": 800.0 },
                { "type": "tremolo", "rate": 6.0, "depth": 0.3 }
            ]"#,
        )
        .unwrap();

        assert_eq!(
            configs[0],
            EffectConfig::Biquad {
                filter_type: FilterType::Lowpass,
                frequency: 800.0,
                q: 1.0,
                gain_db: 0.0,
                detune: 0.0,
            }
        );

        let mut chain = EffectChain::new();
        for cfg in &configs {
            assert!(chain.push(cfg.build(44_100)).is_ok());
        }
        assert_eq!(chain.len(), 2);
        for _ in 0..1000 {
            assert!(chain.process(0.5).is_finite());
        }
    }
}
