//! ADSR envelope generator, advanced one sample at a time.

use serde::{Deserialize, Serialize};

/// Release level at or below which the envelope snaps to zero and goes idle
/// (about -80 dB). Multiplicative release never reaches zero on its own.
pub const RELEASE_EPSILON: f32 = 1.0e-4;

/// Envelope stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum EnvelopeStage {
    Idle = 0,
    Attack = 1,
    Decay = 2,
    Sustain = 3,
    Release = 4,
}

impl EnvelopeStage {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => EnvelopeStage::Attack,
            2 => EnvelopeStage::Decay,
            3 => EnvelopeStage::Sustain,
            4 => EnvelopeStage::Release,
            _ => EnvelopeStage::Idle,
        }
    }
}

/// ADSR parameters. Times are in seconds, sustain is a level in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Adsr {
    pub attack: f32,
    pub decay: f32,
    pub sustain: f32,
    pub release: f32,
}

impl Default for Adsr {
    fn default() -> Self {
        Adsr {
            attack: 0.01,
            decay: 0.1,
            sustain: 0.7,
            release: 0.2,
        }
    }
}

/// ADSR envelope: linear attack and decay, exponential release.
#[derive(Debug, Clone)]
pub struct Envelope {
    attack: f32,
    decay: f32,
    sustain: f32,
    release: f32,

    stage: EnvelopeStage,
    level: f32,
}

impl Envelope {
    pub fn new() -> Self {
        Self::with_adsr(Adsr::default())
    }

    pub fn with_adsr(adsr: Adsr) -> Self {
        let mut env = Envelope {
            attack: 0.0,
            decay: 0.0,
            sustain: 0.0,
            release: 0.0,
            stage: EnvelopeStage::Idle,
            level: 0.0,
        };
        env.set_adsr(adsr);
        env
    }

    pub fn set_adsr(&mut self, adsr: Adsr) {
        self.attack = adsr.attack;
        self.decay = adsr.decay;
        self.set_sustain(adsr.sustain);
        self.release = adsr.release;
    }

    pub fn adsr(&self) -> Adsr {
        Adsr {
            attack: self.attack,
            decay: self.decay,
            sustain: self.sustain,
            release: self.release,
        }
    }

    pub fn set_attack(&mut self, seconds: f32) {
        self.attack = seconds;
    }

    pub fn set_decay(&mut self, seconds: f32) {
        self.decay = seconds;
    }

    pub fn set_sustain(&mut self, level: f32) {
        self.sustain = level.clamp(0.0, 1.0);
    }

    pub fn set_release(&mut self, seconds: f32) {
        self.release = seconds;
    }

    /// Restart from silence in the attack stage.
    pub fn note_on(&mut self) {
        self.stage = EnvelopeStage::Attack;
        self.level = 0.0;
    }

    /// Enter release from the current level. No-op when idle.
    pub fn note_off(&mut self) {
        if self.stage != EnvelopeStage::Idle {
            self.stage = EnvelopeStage::Release;
        }
    }

    /// Advance one sample and return the level in [0, 1].
    pub fn process(&mut self, sample_rate: u32) -> f32 {
        let dt = 1.0 / sample_rate as f32;

        match self.stage {
            EnvelopeStage::Idle => 0.0,
            EnvelopeStage::Attack => {
                if self.attack > 0.0 {
                    self.level += dt / self.attack;
                    if self.level >= 1.0 {
                        self.level = 1.0;
                        self.stage = EnvelopeStage::Decay;
                    }
                } else {
                    self.level = 1.0;
                    self.stage = EnvelopeStage::Decay;
                }
                self.level
            }
            EnvelopeStage::Decay => {
                if self.decay > 0.0 {
                    self.level -= dt * (1.0 - self.sustain) / self.decay;
                    if self.level <= self.sustain {
                        self.level = self.sustain;
                        self.stage = EnvelopeStage::Sustain;
                    }
                } else {
                    self.level = self.sustain;
                    self.stage = EnvelopeStage::Sustain;
                }
                self.level
            }
            EnvelopeStage::Sustain => self.sustain,
            EnvelopeStage::Release => {
                if self.release > 0.0 {
                    self.level *= (1.0 - dt / self.release).max(0.0);
                    if self.level <= RELEASE_EPSILON {
                        self.level = 0.0;
                        self.stage = EnvelopeStage::Idle;
                    }
                } else {
                    self.level = 0.0;
                    self.stage = EnvelopeStage::Idle;
                }
                self.level
            }
        }
    }

    pub fn stage(&self) -> EnvelopeStage {
        self.stage
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    pub fn is_idle(&self) -> bool {
        self.stage == EnvelopeStage::Idle
    }
}

impl Default for Envelope {
    fn default() -> Self {
        Envelope::new()
    }
}
