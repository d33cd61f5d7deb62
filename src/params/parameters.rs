//! Processing parameters
//!
//! One value per file, built once and read-only afterwards. Every bounded
//! field is normalized into its documented range: out-of-range values clamp
//! and NaN becomes the range minimum.

use crate::dsp::DistortionPreset;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

// ============================================================================
// Ranges
// ============================================================================

pub const DISTORTION_AMOUNT: RangeInclusive<f32> = 0.0..=1.0;
pub const HIGH_PASS_HZ: RangeInclusive<f32> = 20.0..=1000.0;
pub const LOW_PASS_HZ: RangeInclusive<f32> = 1000.0..=20000.0;
pub const MID_FREQUENCY_HZ: RangeInclusive<f32> = 100.0..=8000.0;
pub const MID_GAIN_DB: RangeInclusive<f32> = -12.0..=12.0;
pub const COMPRESSION_RATIO: RangeInclusive<f32> = 1.0..=20.0;
pub const COMPRESSION_THRESHOLD_DB: RangeInclusive<f32> = -60.0..=0.0;
pub const COMPRESSION_ATTACK_MS: RangeInclusive<f32> = 0.1..=100.0;
pub const COMPRESSION_RELEASE_MS: RangeInclusive<f32> = 10.0..=1000.0;
pub const LIMITER_THRESHOLD_DB: RangeInclusive<f32> = -12.0..=0.0;
pub const REVERB_AMOUNT: RangeInclusive<f32> = 0.0..=1.0;
pub const DELAY_TIME_MS: RangeInclusive<f32> = 1.0..=2000.0;
/// Feedback above 0.9 never decays
pub const DELAY_FEEDBACK: RangeInclusive<f32> = 0.0..=0.9;
pub const OUTPUT_GAIN_DB: RangeInclusive<f32> = -24.0..=12.0;

/// Clamp into `range`; NaN maps to the range minimum
#[inline]
pub fn normalize(value: f32, range: &RangeInclusive<f32>) -> f32 {
    if value.is_nan() {
        *range.start()
    } else {
        value.clamp(*range.start(), *range.end())
    }
}

// ============================================================================
// ProcessingParameters
// ============================================================================

/// Signal-processing parameters for one file
///
/// Fractions (`distortion_amount`, `reverb_amount`, `delay_feedback`) are
/// converted to percentages by the effects pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ProcessingParameters {
    pub distortion_amount: f32,
    pub distortion_preset: DistortionPreset,
    pub high_pass_hz: f32,
    pub low_pass_hz: f32,
    pub mid_frequency_hz: f32,
    pub mid_gain_db: f32,
    pub compression_ratio: f32,
    pub compression_threshold_db: f32,
    pub compression_attack_ms: f32,
    pub compression_release_ms: f32,
    pub limiter_threshold_db: f32,
    pub reverb_amount: f32,
    pub delay_time_ms: f32,
    pub delay_feedback: f32,
    pub output_gain_db: f32,
}

impl Default for ProcessingParameters {
    /// Neutral settings: mild shaping, no time effects, unity output
    fn default() -> Self {
        Self {
            distortion_amount: 0.0,
            distortion_preset: DistortionPreset::Warm,
            high_pass_hz: 20.0,
            low_pass_hz: 20000.0,
            mid_frequency_hz: 1000.0,
            mid_gain_db: 0.0,
            compression_ratio: 1.0,
            compression_threshold_db: 0.0,
            compression_attack_ms: 10.0,
            compression_release_ms: 100.0,
            limiter_threshold_db: 0.0,
            reverb_amount: 0.0,
            delay_time_ms: 250.0,
            delay_feedback: 0.0,
            output_gain_db: 0.0,
        }
    }
}

impl ProcessingParameters {
    /// Copy with every field inside its documented range
    pub fn normalized(self) -> Self {
        Self {
            distortion_amount: normalize(self.distortion_amount, &DISTORTION_AMOUNT),
            distortion_preset: self.distortion_preset,
            high_pass_hz: normalize(self.high_pass_hz, &HIGH_PASS_HZ),
            low_pass_hz: normalize(self.low_pass_hz, &LOW_PASS_HZ),
            mid_frequency_hz: normalize(self.mid_frequency_hz, &MID_FREQUENCY_HZ),
            mid_gain_db: normalize(self.mid_gain_db, &MID_GAIN_DB),
            compression_ratio: normalize(self.compression_ratio, &COMPRESSION_RATIO),
            compression_threshold_db: normalize(
                self.compression_threshold_db,
                &COMPRESSION_THRESHOLD_DB,
            ),
            compression_attack_ms: normalize(self.compression_attack_ms, &COMPRESSION_ATTACK_MS),
            compression_release_ms: normalize(
                self.compression_release_ms,
                &COMPRESSION_RELEASE_MS,
            ),
            limiter_threshold_db: normalize(self.limiter_threshold_db, &LIMITER_THRESHOLD_DB),
            reverb_amount: normalize(self.reverb_amount, &REVERB_AMOUNT),
            delay_time_ms: normalize(self.delay_time_ms, &DELAY_TIME_MS),
            delay_feedback: normalize(self.delay_feedback, &DELAY_FEEDBACK),
            output_gain_db: normalize(self.output_gain_db, &OUTPUT_GAIN_DB),
        }
    }

    /// True when every field is already inside its range
    pub fn is_normalized(&self) -> bool {
        *self == self.normalized()
    }

    pub fn distortion_mix_percent(&self) -> f32 {
        self.distortion_amount * 100.0
    }

    pub fn reverb_mix_percent(&self) -> f32 {
        self.reverb_amount * 100.0
    }

    pub fn delay_feedback_percent(&self) -> f32 {
        self.delay_feedback * 100.0
    }
}

// ============================================================================
// Tests
// ============================================================================
