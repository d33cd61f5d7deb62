//! Limiter Effect
//!
//! Brickwall limiter. Prevents output from exceeding a ceiling level.

use crate::dsp::effect::{Effect, StageParams};
use crate::engine::buffer::{db_to_linear, linear_to_db};
use crate::engine::AudioBuffer;
use crate::impl_stage_common;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

const MIN_CEILING_DB: f32 = -12.0;
const MAX_CEILING_DB: f32 = 0.0;

const MIN_RELEASE_MS: f32 = 10.0;
const MAX_RELEASE_MS: f32 = 1000.0;

/// Reduction onset, fast enough to act as brickwall
const ATTACK_MS: f32 = 0.1;

/// One-pole smoothing coefficient for a time constant
#[inline]
fn smoothing(time_ms: f32, sample_rate: f32) -> f32 {
    (-1000.0 / (time_ms * sample_rate)).exp()
}

/// Brickwall ceiling stage
///
/// Gain reduction follows the frame peak with a 0.1 ms attack and the
/// configured release; a final clamp guarantees no sample leaves above
/// `ceiling_db`, whatever the envelope is doing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Limiter {
    params: StageParams,
    ceiling_db: f32,
    release_ms: f32,
    #[serde(skip)]
    reduction_db: f32,
    #[serde(skip)]
    sample_rate: f32,
    #[serde(skip)]
    attack: f32,
    #[serde(skip)]
    release: f32,
}

impl Limiter {
    /// Ceiling is clamped to -12..=0 dB
    pub fn new(ceiling_db: f32) -> Self {
        let mut limiter = Self {
            params: StageParams::default(),
            ceiling_db: ceiling_db.clamp(MIN_CEILING_DB, MAX_CEILING_DB),
            release_ms: 100.0,
            reduction_db: 0.0,
            sample_rate: 48000.0,
            attack: 0.0,
            release: 0.0,
        };
        limiter.recompute();
        limiter
    }

    pub fn set_ceiling_db(&mut self, db: f32) {
        self.ceiling_db = db.clamp(MIN_CEILING_DB, MAX_CEILING_DB);
    }

    pub fn ceiling_db(&self) -> f32 {
        self.ceiling_db
    }

    pub fn set_release_ms(&mut self, ms: f32) {
        self.release_ms = ms.clamp(MIN_RELEASE_MS, MAX_RELEASE_MS);
        self.recompute();
    }

    pub fn release_ms(&self) -> f32 {
        self.release_ms
    }

    fn recompute(&mut self) {
        self.attack = smoothing(ATTACK_MS, self.sample_rate);
        self.release = smoothing(self.release_ms, self.sample_rate);
    }
}

impl Default for Limiter {
    fn default() -> Self {
        Self::new(-1.0)
    }
}

impl Effect for Limiter {
    impl_stage_common!("limiter");

    fn process(&mut self, buffer: &mut AudioBuffer) {
        if self.params.bypassed || buffer.is_empty() {
            return;
        }
        let ceiling = db_to_linear(self.ceiling_db);

        for frame in 0..buffer.len() {
            let peak = buffer
                .samples
                .iter()
                .fold(0.0_f32, |acc, lane| acc.max(lane[frame].abs()));
            let wanted = (linear_to_db(peak) - self.ceiling_db).max(0.0);

            let coeff = if wanted > self.reduction_db {
                self.attack
            } else {
                self.release
            };
            self.reduction_db = wanted + coeff * (self.reduction_db - wanted);

            let gain = db_to_linear(-self.reduction_db);
            for lane in buffer.samples.iter_mut() {
                lane[frame] = (lane[frame] * gain).clamp(-ceiling, ceiling);
            }
        }
    }

    fn prepare(&mut self, sample_rate: u32, _max_block_size: usize) {
        self.sample_rate = sample_rate.max(1) as f32;
        self.recompute();
    }

    fn reset(&mut self) {
        self.reduction_db = 0.0;
    }

    fn describe(&self) -> Value {
        json!({
            "ceiling_db": self.ceiling_db,
            "release_ms": self.release_ms,
            "bypassed": self.params.bypassed
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
