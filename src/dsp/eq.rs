//! Parametric EQ Effect
//!
//! Multi-band equalizer built from cascaded biquad filters.
//! Supports peak, shelf, and pass filters; each band can be bypassed on its
//! own so a long-lived EQ can be reconfigured between streams.

use crate::dsp::effect::{Effect, StageParams};
use crate::engine::AudioBuffer;
use crate::error::{MareaError, Result};
use crate::impl_stage_common;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::f64::consts::PI;

// ============================================================================
// Constants
// ============================================================================

/// Maximum number of EQ bands
pub const MAX_BANDS: usize = 8;

const MIN_FREQUENCY: f32 = 20.0;
const MAX_FREQUENCY: f32 = 20000.0;
const MIN_GAIN_DB: f32 = -24.0;
const MAX_GAIN_DB: f32 = 24.0;
const MIN_Q: f32 = 0.1;
const MAX_Q: f32 = 10.0;

// ============================================================================
// Filter Types
// ============================================================================

/// Filter type for EQ bands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterType {
    /// Bell curve boost/cut
    #[default]
    Peak,
    /// Boost/cut below frequency
    LowShelf,
    /// Boost/cut above frequency
    HighShelf,
    /// Remove above frequency (low-pass filter)
    LowPass,
    /// Remove below frequency (high-pass filter)
    HighPass,
}

/// Biquad filter coefficients, normalized by a0
#[derive(Debug, Clone, Copy)]
struct BiquadCoeffs {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl Default for BiquadCoeffs {
    fn default() -> Self {
        Self::UNITY
    }
}

impl BiquadCoeffs {
    const UNITY: BiquadCoeffs = BiquadCoeffs {
        b0: 1.0,
        b1: 0.0,
        b2: 0.0,
        a1: 0.0,
        a2: 0.0,
    };

    /// Audio EQ Cookbook formulas
    fn calculate(
        filter_type: FilterType,
        sample_rate: f64,
        frequency: f64,
        gain_db: f64,
        q: f64,
    ) -> Self {
        // Keep below Nyquist
        let freq = frequency.clamp(20.0, (sample_rate / 2.0 - 1.0).max(21.0));
        let q = q.clamp(0.1, 10.0);

        let w0 = 2.0 * PI * freq / sample_rate;
        let cos_w0 = w0.cos();
        let sin_w0 = w0.sin();
        let alpha = sin_w0 / (2.0 * q);
        let a = 10.0_f64.powf(gain_db / 40.0);

        let (b0, b1, b2, a0, a1, a2) = match filter_type {
            FilterType::Peak => (
                1.0 + alpha * a,
                -2.0 * cos_w0,
                1.0 - alpha * a,
                1.0 + alpha / a,
                -2.0 * cos_w0,
                1.0 - alpha / a,
            ),
            FilterType::LowShelf => {
                let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;
                (
                    a * ((a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha),
                    2.0 * a * ((a - 1.0) - (a + 1.0) * cos_w0),
                    a * ((a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha),
                    (a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha,
                    -2.0 * ((a - 1.0) + (a + 1.0) * cos_w0),
                    (a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha,
                )
            }
            FilterType::HighShelf => {
                let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;
                (
                    a * ((a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha),
                    -2.0 * a * ((a - 1.0) + (a + 1.0) * cos_w0),
                    a * ((a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha),
                    (a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha,
                    2.0 * ((a - 1.0) - (a + 1.0) * cos_w0),
                    (a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha,
                )
            }
            FilterType::LowPass => (
                (1.0 - cos_w0) / 2.0,
                1.0 - cos_w0,
                (1.0 - cos_w0) / 2.0,
                1.0 + alpha,
                -2.0 * cos_w0,
                1.0 - alpha,
            ),
            FilterType::HighPass => (
                (1.0 + cos_w0) / 2.0,
                -(1.0 + cos_w0),
                (1.0 + cos_w0) / 2.0,
                1.0 + alpha,
                -2.0 * cos_w0,
                1.0 - alpha,
            ),
        };

        BiquadCoeffs {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }
}

/// Biquad filter state for one channel
#[derive(Debug, Clone, Copy, Default)]
struct BiquadState {
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl BiquadState {
    #[inline]
    fn process(&mut self, input: f64, c: &BiquadCoeffs) -> f64 {
        let output = c.b0 * input + c.b1 * self.x1 + c.b2 * self.x2 - c.a1 * self.y1 - c.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;
        output
    }
}

// ============================================================================
// EQ Band
// ============================================================================

/// Single EQ band configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EQBand {
    /// Center/corner frequency in Hz (20-20000)
    pub frequency: f32,
    /// Gain in dB (-24 to +24), ignored by pass filters
    pub gain_db: f32,
    /// Q factor (0.1 to 10.0)
    pub q: f32,
    pub filter_type: FilterType,
    /// Bypassed bands leave the signal untouched
    pub bypass: bool,
}

impl Default for EQBand {
    fn default() -> Self {
        Self {
            frequency: 1000.0,
            gain_db: 0.0,
            q: 1.0,
            filter_type: FilterType::Peak,
            bypass: true,
        }
    }
}

impl EQBand {
    /// Create an active band; values are clamped to their valid ranges
    pub fn new(frequency: f32, gain_db: f32, q: f32, filter_type: FilterType) -> Self {
        Self {
            frequency: frequency.clamp(MIN_FREQUENCY, MAX_FREQUENCY),
            gain_db: gain_db.clamp(MIN_GAIN_DB, MAX_GAIN_DB),
            q: q.clamp(MIN_Q, MAX_Q),
            filter_type,
            bypass: false,
        }
    }

    pub fn peak(frequency: f32, gain_db: f32, q: f32) -> Self {
        Self::new(frequency, gain_db, q, FilterType::Peak)
    }

    pub fn low_shelf(frequency: f32, gain_db: f32, q: f32) -> Self {
        Self::new(frequency, gain_db, q, FilterType::LowShelf)
    }

    pub fn high_shelf(frequency: f32, gain_db: f32, q: f32) -> Self {
        Self::new(frequency, gain_db, q, FilterType::HighShelf)
    }

    pub fn low_pass(frequency: f32, q: f32) -> Self {
        Self::new(frequency, 0.0, q, FilterType::LowPass)
    }

    pub fn high_pass(frequency: f32, q: f32) -> Self {
        Self::new(frequency, 0.0, q, FilterType::HighPass)
    }

    /// Whether this band leaves audio untouched
    fn is_transparent(&self) -> bool {
        self.bypass
            || match self.filter_type {
                FilterType::Peak | FilterType::LowShelf | FilterType::HighShelf => {
                    self.gain_db.abs() < 0.01
                }
                FilterType::LowPass | FilterType::HighPass => false,
            }
    }
}

// ============================================================================
// Parametric EQ Effect
// ============================================================================

/// Per-band runtime state
#[derive(Debug, Clone, Default)]
struct BandState {
    coeffs: BiquadCoeffs,
    states: Vec<BiquadState>,
}

/// Parametric EQ with up to [`MAX_BANDS`] bands
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParametricEQ {
    params: StageParams,
    bands: Vec<EQBand>,
    #[serde(skip)]
    sample_rate: f64,
    #[serde(skip)]
    band_states: Vec<BandState>,
    #[serde(skip)]
    coeffs_dirty: bool,
}

impl Default for ParametricEQ {
    fn default() -> Self {
        Self {
            params: StageParams::default(),
            bands: Vec::new(),
            sample_rate: 48000.0,
            band_states: Vec::new(),
            coeffs_dirty: true,
        }
    }
}

impl ParametricEQ {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an EQ with the given bands
    pub fn with_bands(bands: Vec<EQBand>) -> Result<Self> {
        if bands.len() > MAX_BANDS {
            return Err(MareaError::Processing {
                reason: format!("{} EQ bands requested, maximum is {}", bands.len(), MAX_BANDS),
            });
        }
        Ok(Self {
            bands,
            ..Default::default()
        })
    }

    /// Create an EQ with `count` bypassed bands
    pub fn with_band_count(count: usize) -> Result<Self> {
        Self::with_bands(vec![EQBand::default(); count])
    }

    pub fn bands(&self) -> &[EQBand] {
        &self.bands
    }

    /// Replace the band at `index`
    pub fn set_band(&mut self, index: usize, band: EQBand) -> Result<()> {
        let slot = self
            .bands
            .get_mut(index)
            .ok_or_else(|| MareaError::Processing {
                reason: format!("EQ band index {} out of range", index),
            })?;
        *slot = band;
        self.coeffs_dirty = true;
        Ok(())
    }

    /// Put every band into bypass
    pub fn bypass_all(&mut self) {
        for band in &mut self.bands {
            band.bypass = true;
        }
        self.coeffs_dirty = true;
    }

    /// Number of bands that currently alter the signal
    pub fn active_band_count(&self) -> usize {
        self.bands.iter().filter(|b| !b.is_transparent()).count()
    }

    fn update_coefficients(&mut self, num_channels: usize) {
        let channels_changed = self
            .band_states
            .first()
            .map(|s| s.states.len() != num_channels)
            .unwrap_or(true);
        if !self.coeffs_dirty && !channels_changed {
            return;
        }

        self.band_states
            .resize_with(self.bands.len(), BandState::default);

        for (band, state) in self.bands.iter().zip(self.band_states.iter_mut()) {
            state.states.resize_with(num_channels, BiquadState::default);
            state.coeffs = if band.is_transparent() {
                BiquadCoeffs::UNITY
            } else {
                BiquadCoeffs::calculate(
                    band.filter_type,
                    self.sample_rate,
                    band.frequency as f64,
                    band.gain_db as f64,
                    band.q as f64,
                )
            };
        }

        self.coeffs_dirty = false;
    }
}

impl Effect for ParametricEQ {
    impl_stage_common!("parametric_eq");

    fn process(&mut self, buffer: &mut AudioBuffer) {
        if self.params.bypassed || self.bands.is_empty() {
            return;
        }

        let num_channels = buffer.num_channels();
        self.update_coefficients(num_channels);

        for (band, state) in self.bands.iter().zip(self.band_states.iter_mut()) {
            if band.is_transparent() {
                continue;
            }
            for (ch, samples) in buffer.samples.iter_mut().enumerate() {
                let filter = &mut state.states[ch];
                for sample in samples.iter_mut() {
                    *sample = filter.process(*sample as f64, &state.coeffs) as f32;
                }
            }
        }
    }

    fn prepare(&mut self, sample_rate: u32, _max_block_size: usize) {
        self.sample_rate = sample_rate as f64;
        self.coeffs_dirty = true;
    }

    fn reset(&mut self) {
        for band_state in &mut self.band_states {
            for state in &mut band_state.states {
                *state = BiquadState::default();
            }
        }
    }

    fn describe(&self) -> Value {
        json!({
            "bands": self.bands,
            "active_bands": self.active_band_count(),
            "bypassed": self.params.bypassed
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::buffer::ChannelLayout;

    fn create_sine_buffer(frequency: f32, sample_rate: u32, num_samples: usize) -> AudioBuffer {
        let mut buffer =
            AudioBuffer::new(num_samples, ChannelLayout::Mono).with_sample_rate(sample_rate);
        for (i, s) in buffer.samples[0].iter_mut().enumerate() {
            let t = i as f32 / sample_rate as f32;
            *s = 0.5 * (2.0 * std::f32::consts::PI * frequency * t).sin();
        }
        buffer
    }

    fn processed_rms(eq: &mut ParametricEQ, frequency: f32) -> f32 {
        eq.prepare(48000, 4096);
        eq.reset();
        let mut buffer = create_sine_buffer(frequency, 48000, 48000);
        eq.process(&mut buffer);
        // Skip the filter settling time
        let tail = AudioBuffer {
            samples: vec![buffer.samples[0][4800..].to_vec()],
            sample_rate: 48000,
        };
        tail.rms_db()
    }

    #[test]
    fn test_band_values_are_clamped() {
        let band = EQBand::peak(5.0, 40.0, 50.0);
        assert_eq!(band.frequency, MIN_FREQUENCY);
        assert_eq!(band.gain_db, MAX_GAIN_DB);
        assert_eq!(band.q, MAX_Q);
        assert!(!band.bypass);
        assert!(EQBand::default().bypass);
    }

    #[test]
    fn test_too_many_bands() {
        assert!(ParametricEQ::with_band_count(MAX_BANDS).is_ok());
        assert!(ParametricEQ::with_band_count(MAX_BANDS + 1).is_err());
    }

    #[test]
    fn test_bypassed_eq_is_transparent() {
        let mut eq = ParametricEQ::with_band_count(3).unwrap();
        eq.prepare(48000, 4096);
        let original = create_sine_buffer(440.0, 48000, 4800);
        let mut buffer = original.clone();
        eq.process(&mut buffer);
        assert_eq!(buffer.samples, original.samples);
        assert_eq!(eq.active_band_count(), 0);
    }

    #[test]
    fn test_high_pass_attenuates_lows() {
        let mut eq = ParametricEQ::with_band_count(1).unwrap();
        eq.set_band(0, EQBand::high_pass(1000.0, 0.707)).unwrap();
        let low = processed_rms(&mut eq, 100.0);
        let high = processed_rms(&mut eq, 5000.0);
        assert!(low < high - 20.0, "low {} high {}", low, high);
    }

    #[test]
    fn test_low_pass_attenuates_highs() {
        let mut eq = ParametricEQ::with_band_count(1).unwrap();
        eq.set_band(0, EQBand::low_pass(1000.0, 0.707)).unwrap();
        let low = processed_rms(&mut eq, 100.0);
        let high = processed_rms(&mut eq, 10000.0);
        assert!(high < low - 20.0, "low {} high {}", low, high);
    }

    #[test]
    fn test_peak_boost() {
        let mut flat = ParametricEQ::with_band_count(1).unwrap();
        let reference = processed_rms(&mut flat, 1000.0);

        let mut eq = ParametricEQ::with_band_count(1).unwrap();
        eq.set_band(0, EQBand::peak(1000.0, 6.0, 1.0)).unwrap();
        let boosted = processed_rms(&mut eq, 1000.0);
        assert!((boosted - reference - 6.0).abs() < 0.5);
    }

    #[test]
    fn test_bypass_all_after_configuration() {
        let mut eq = ParametricEQ::with_band_count(2).unwrap();
        eq.set_band(0, EQBand::high_pass(500.0, 0.707)).unwrap();
        eq.set_band(1, EQBand::peak(2000.0, -6.0, 1.0)).unwrap();
        assert_eq!(eq.active_band_count(), 2);
        eq.bypass_all();
        assert_eq!(eq.active_band_count(), 0);
        assert!(eq.set_band(5, EQBand::default()).is_err());
    }

    #[test]
    fn test_stereo_channels_filtered_independently() {
        let mut eq = ParametricEQ::with_band_count(1).unwrap();
        eq.set_band(0, EQBand::high_pass(1000.0, 0.707)).unwrap();
        eq.prepare(48000, 4096);
        let mut buffer = AudioBuffer::new(1024, ChannelLayout::Stereo).with_sample_rate(48000);
        buffer.samples[0][0] = 1.0;
        eq.process(&mut buffer);
        assert!(buffer.samples[0][0] != 0.0);
        assert!(buffer.samples[1].iter().all(|&s| s == 0.0));
    }
}
