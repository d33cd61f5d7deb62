//! Compressor Effect
//!
//! Feed-forward dynamics processor with linked stereo detection, an optional
//! soft knee and one-pole attack/release smoothing of the gain reduction.

use crate::dsp::effect::{Effect, StageParams};
use crate::engine::buffer::{db_to_linear, linear_to_db};
use crate::engine::AudioBuffer;
use crate::impl_stage_common;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

// ============================================================================
// Constants
// ============================================================================

const MIN_THRESHOLD_DB: f32 = -60.0;
const MAX_THRESHOLD_DB: f32 = 0.0;

const MIN_RATIO: f32 = 1.0;
const MAX_RATIO: f32 = 20.0;

const MIN_ATTACK_MS: f32 = 0.1;
const MAX_ATTACK_MS: f32 = 100.0;

const MIN_RELEASE_MS: f32 = 10.0;
const MAX_RELEASE_MS: f32 = 1000.0;

const MAX_KNEE_DB: f32 = 12.0;
const MAX_MAKEUP_DB: f32 = 24.0;

// ============================================================================
// Compressor Effect
// ============================================================================

/// Feed-forward compressor
///
/// # Parameters
/// - `threshold_db`: level above which compression starts (-60 to 0 dB)
/// - `ratio`: compression ratio (1:1 to 20:1)
/// - `attack_ms`: 0.1 to 100 ms
/// - `release_ms`: 10 to 1000 ms
/// - `knee_db`: 0 = hard knee, up to 12 dB
/// - `makeup_gain_db`: 0 to 24 dB
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Compressor {
    params: StageParams,
    threshold_db: f32,
    ratio: f32,
    attack_ms: f32,
    release_ms: f32,
    knee_db: f32,
    makeup_gain_db: f32,
    #[serde(skip)]
    sample_rate: f32,
    #[serde(skip)]
    attack_coeff: f32,
    #[serde(skip)]
    release_coeff: f32,
    /// Current smoothed gain (linear, 1.0 = no reduction)
    #[serde(skip)]
    gain: f32,
}

impl Compressor {
    pub fn new() -> Self {
        let mut comp = Self {
            params: StageParams::default(),
            threshold_db: -18.0,
            ratio: 4.0,
            attack_ms: 10.0,
            release_ms: 100.0,
            knee_db: 0.0,
            makeup_gain_db: 0.0,
            sample_rate: 48000.0,
            attack_coeff: 0.0,
            release_coeff: 0.0,
            gain: 1.0,
        };
        comp.update_coefficients();
        comp
    }

    /// Create a compressor with threshold, ratio and timing set
    pub fn with_params(threshold_db: f32, ratio: f32, attack_ms: f32, release_ms: f32) -> Self {
        let mut comp = Self::new();
        comp.set_threshold_db(threshold_db);
        comp.set_ratio(ratio);
        comp.set_attack_ms(attack_ms);
        comp.set_release_ms(release_ms);
        comp
    }

    pub fn set_threshold_db(&mut self, threshold_db: f32) {
        self.threshold_db = threshold_db.clamp(MIN_THRESHOLD_DB, MAX_THRESHOLD_DB);
    }

    pub fn threshold_db(&self) -> f32 {
        self.threshold_db
    }

    pub fn set_ratio(&mut self, ratio: f32) {
        self.ratio = ratio.clamp(MIN_RATIO, MAX_RATIO);
    }

    pub fn ratio(&self) -> f32 {
        self.ratio
    }

    pub fn set_attack_ms(&mut self, attack_ms: f32) {
        self.attack_ms = attack_ms.clamp(MIN_ATTACK_MS, MAX_ATTACK_MS);
        self.update_coefficients();
    }

    pub fn attack_ms(&self) -> f32 {
        self.attack_ms
    }

    pub fn set_release_ms(&mut self, release_ms: f32) {
        self.release_ms = release_ms.clamp(MIN_RELEASE_MS, MAX_RELEASE_MS);
        self.update_coefficients();
    }

    pub fn release_ms(&self) -> f32 {
        self.release_ms
    }

    pub fn set_knee_db(&mut self, knee_db: f32) {
        self.knee_db = knee_db.clamp(0.0, MAX_KNEE_DB);
    }

    pub fn set_makeup_gain_db(&mut self, makeup_gain_db: f32) {
        self.makeup_gain_db = makeup_gain_db.clamp(0.0, MAX_MAKEUP_DB);
    }

    /// Current gain reduction in dB (0 or negative)
    pub fn gain_reduction_db(&self) -> f32 {
        linear_to_db(self.gain)
    }

    /// coeff = exp(-1 / time_in_samples)
    fn update_coefficients(&mut self) {
        let attack_samples = self.attack_ms / 1000.0 * self.sample_rate;
        let release_samples = self.release_ms / 1000.0 * self.sample_rate;

        self.attack_coeff = if attack_samples > 0.0 {
            (-1.0 / attack_samples).exp()
        } else {
            0.0
        };
        self.release_coeff = if release_samples > 0.0 {
            (-1.0 / release_samples).exp()
        } else {
            0.0
        };
    }

    /// Static gain curve: reduction in dB (negative) for an input level
    fn compute_gain_reduction_db(&self, input_db: f32) -> f32 {
        let threshold = self.threshold_db;
        let ratio = self.ratio;
        let knee = self.knee_db;

        if knee > 0.0 {
            let knee_start = threshold - knee / 2.0;
            let knee_end = threshold + knee / 2.0;

            if input_db <= knee_start {
                0.0
            } else if input_db >= knee_end {
                (threshold + (input_db - threshold) / ratio) - input_db
            } else {
                // Quadratic interpolation from 1:1 to the full ratio
                let t = (input_db - knee_start) / knee;
                let effective_ratio = 1.0 + (ratio - 1.0) * t * t;
                (knee_start + (input_db - knee_start) / effective_ratio) - input_db
            }
        } else if input_db <= threshold {
            0.0
        } else {
            (threshold + (input_db - threshold) / ratio) - input_db
        }
    }
}

impl Default for Compressor {
    fn default() -> Self {
        Self::new()
    }
}

impl Effect for Compressor {
    impl_stage_common!("compressor");

    fn process(&mut self, buffer: &mut AudioBuffer) {
        if self.params.bypassed {
            return;
        }

        let makeup = db_to_linear(self.makeup_gain_db);

        for frame in 0..buffer.num_samples() {
            // Linked detection: loudest channel drives all channels
            let level = buffer
                .samples
                .iter()
                .map(|ch| ch[frame].abs())
                .fold(0.0_f32, f32::max);

            let target = db_to_linear(self.compute_gain_reduction_db(linear_to_db(level)));
            let coeff = if target < self.gain {
                self.attack_coeff
            } else {
                self.release_coeff
            };
            self.gain = coeff * self.gain + (1.0 - coeff) * target;

            let total = self.gain * makeup;
            for ch in buffer.samples.iter_mut() {
                ch[frame] *= total;
            }
        }
    }

    fn prepare(&mut self, sample_rate: u32, _max_block_size: usize) {
        self.sample_rate = sample_rate.max(1) as f32;
        self.update_coefficients();
    }

    fn reset(&mut self) {
        self.gain = 1.0;
    }

    fn describe(&self) -> Value {
        json!({
            "threshold_db": self.threshold_db,
            "ratio": self.ratio,
            "attack_ms": self.attack_ms,
            "release_ms": self.release_ms,
            "knee_db": self.knee_db,
            "makeup_gain_db": self.makeup_gain_db,
            "bypassed": self.params.bypassed
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
