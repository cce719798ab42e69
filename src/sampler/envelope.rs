// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

use crate::audio::AudioBuffer;

/// Envelope times in seconds and the sustain level (0 to 1).
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EnvelopeParameters {
    pub attack: f32,
    pub decay: f32,
    pub sustain: f32,
    pub release: f32,
}

impl Default for EnvelopeParameters {
    fn default() -> Self {
        Self {
            attack: 0.0,
            decay: 0.0,
            sustain: 1.0,
            release: 0.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Attack,
    Decay,
    Sustain,
    Release,
}

/// An attack/decay/sustain/release gain generator, one value per sample.
#[derive(Clone, Debug)]
pub struct Envelope {
    parameters: EnvelopeParameters,
    sample_rate: f64,
    stage: Stage,
    value: f32,
    attack_rate: f32,
    decay_rate: f32,
    release_rate: f32,
}

impl Envelope {
    pub fn new(parameters: EnvelopeParameters, sample_rate: f64) -> Envelope {
        let mut envelope = Envelope {
            parameters,
            sample_rate,
            stage: Stage::Idle,
            value: 0.0,
            attack_rate: 0.0,
            decay_rate: 0.0,
            release_rate: 0.0,
        };
        envelope.recalculate_rates();
        envelope
    }

    /// Changes only the release time, e.g. to fit the release into what's left to play.
    pub fn set_release(&mut self, release: f32) {
        self.parameters.release = release;
        self.recalculate_rates();
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Returns to idle at zero.
    pub fn reset(&mut self) {
        self.value = 0.0;
        self.stage = Stage::Idle;
    }

    /// Starts the envelope from zero, skipping any stages with no length.
    pub fn note_on(&mut self) {
        self.reset();
        if self.attack_rate > 0.0 {
            self.stage = Stage::Attack;
        } else if self.decay_rate > 0.0 {
            self.value = 1.0;
            self.stage = Stage::Decay;
        } else {
            self.value = self.parameters.sustain;
            self.stage = Stage::Sustain;
        }
    }

    /// Moves into release from the current level, or goes idle if there's no release time.
    pub fn note_off(&mut self) {
        if self.stage == Stage::Idle {
            return;
        }

        if self.parameters.release > 0.0 {
            self.release_rate =
                (self.value as f64 / (self.parameters.release as f64 * self.sample_rate)) as f32;
            self.stage = Stage::Release;
        } else {
            self.reset();
        }
    }

    /// Advances by one sample and returns the new gain.
    pub fn next_sample(&mut self) -> f32 {
        match self.stage {
            Stage::Idle => return 0.0,
            Stage::Attack => {
                self.value += self.attack_rate;
                if self.value >= 1.0 {
                    self.value = 1.0;
                    self.go_to_next_stage();
                }
            }
            Stage::Decay => {
                self.value -= self.decay_rate;
                if self.value <= self.parameters.sustain {
                    self.value = self.parameters.sustain;
                    self.go_to_next_stage();
                }
            }
            Stage::Sustain => self.value = self.parameters.sustain,
            Stage::Release => {
                self.value -= self.release_rate;
                if self.value <= 0.0 {
                    self.go_to_next_stage();
                }
            }
        }
        self.value
    }

    /// Fills `gains` with successive envelope values.
    pub fn fill(&mut self, gains: &mut [f32]) {
        for gain in gains.iter_mut() {
            *gain = self.next_sample();
        }
    }

    /// Multiplies `num` frames of the buffer, starting at `start`, by successive
    /// envelope values. Every channel of a frame gets the same value.
    pub fn apply(&mut self, buffer: &mut AudioBuffer, start: usize, num: usize) {
        let end = start.saturating_add(num).min(buffer.num_frames());
        for frame in start..end {
            let gain = self.next_sample();
            for channel in 0..buffer.num_channels() {
                buffer.channel_mut(channel)[frame] *= gain;
            }
        }
    }

    fn rate(&self, distance: f32, time: f32) -> f32 {
        if time > 0.0 {
            (distance as f64 / (time as f64 * self.sample_rate)) as f32
        } else {
            -1.0
        }
    }

    fn recalculate_rates(&mut self) {
        let p = self.parameters;
        self.attack_rate = self.rate(1.0, p.attack);
        self.decay_rate = self.rate(1.0 - p.sustain, p.decay);
        self.release_rate = self.rate(p.sustain, p.release);

        if (self.stage == Stage::Attack && self.attack_rate <= 0.0)
            || (self.stage == Stage::Decay
                && (self.decay_rate <= 0.0 || self.value <= p.sustain))
            || (self.stage == Stage::Release && self.release_rate <= 0.0)
        {
            self.go_to_next_stage();
        }
    }

    fn go_to_next_stage(&mut self) {
        match self.stage {
            Stage::Attack => {
                self.stage = if self.decay_rate > 0.0 {
                    Stage::Decay
                } else {
                    Stage::Sustain
                };
            }
            Stage::Decay => self.stage = Stage::Sustain,
            Stage::Release => self.reset(),
            Stage::Idle | Stage::Sustain => {}
        }
    }
}

/// Envelope parameters shared between the control and audio threads.
/// Each value is stored as the bits of an f32.
#[derive(Debug)]
pub struct SharedEnvelopeParameters {
    attack: AtomicU32,
    decay: AtomicU32,
    sustain: AtomicU32,
    release: AtomicU32,
}

impl SharedEnvelopeParameters {
    pub fn new(parameters: EnvelopeParameters) -> Self {
        Self {
            attack: AtomicU32::new(parameters.attack.to_bits()),
            decay: AtomicU32::new(parameters.decay.to_bits()),
            sustain: AtomicU32::new(parameters.sustain.to_bits()),
            release: AtomicU32::new(parameters.release.to_bits()),
        }
    }

    pub fn load(&self) -> EnvelopeParameters {
        EnvelopeParameters {
            attack: self.attack(),
            decay: self.decay(),
            sustain: self.sustain(),
            release: self.release(),
        }
    }

    pub fn store(&self, parameters: EnvelopeParameters) {
        self.set_attack(parameters.attack);
        self.set_decay(parameters.decay);
        self.set_sustain(parameters.sustain);
        self.set_release(parameters.release);
    }

    pub fn attack(&self) -> f32 {
        f32::from_bits(self.attack.load(Ordering::Relaxed))
    }

    pub fn decay(&self) -> f32 {
        f32::from_bits(self.decay.load(Ordering::Relaxed))
    }

    pub fn sustain(&self) -> f32 {
        f32::from_bits(self.sustain.load(Ordering::Relaxed))
    }

    pub fn release(&self) -> f32 {
        f32::from_bits(self.release.load(Ordering::Relaxed))
    }

    /// Times are in seconds. Negative values are treated as zero.
    pub fn set_attack(&self, seconds: f32) {
        self.attack
            .store(seconds.max(0.0).to_bits(), Ordering::Relaxed);
    }

    pub fn set_decay(&self, seconds: f32) {
        self.decay.store(seconds.max(0.0).to_bits(), Ordering::Relaxed);
    }

    /// The level is clamped to 0 to 1.
    pub fn set_sustain(&self, level: f32) {
        self.sustain
            .store(level.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn set_release(&self, seconds: f32) {
        self.release
            .store(seconds.max(0.0).to_bits(), Ordering::Relaxed);
    }
}

impl Default for SharedEnvelopeParameters {
    fn default() -> Self {
        Self::new(EnvelopeParameters::default())
    }
}
