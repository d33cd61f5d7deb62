//! Natural parameter generator
//!
//! Derives a deterministic seed from (lunar phase, hour, day of month) and
//! draws every parameter from the sub-range owned by the current phase band.
//! Identical triples always reproduce identical parameters.

use super::lunar::{lunar_phase_percent, PhaseBand};
use super::parameters::ProcessingParameters;
use crate::dsp::DistortionPreset;
use chrono::{DateTime, Datelike, Timelike, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

// ============================================================================
// Clock
// ============================================================================

/// Source of "now" for [`NaturalParameterGenerator::generate`]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock frozen at one instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

// ============================================================================
// Natural Seed
// ============================================================================

/// The (phase, hour, day) triple a parameter set is derived from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct NaturalSeed {
    pub phase_percent: f64,
    pub hour: u32,
    pub day: u32,
}

impl NaturalSeed {
    /// Seed components for an instant (hour and day in UTC)
    pub fn at(instant: DateTime<Utc>) -> Self {
        Self {
            phase_percent: lunar_phase_percent(instant),
            hour: instant.hour(),
            day: instant.day(),
        }
    }

    pub fn band(&self) -> PhaseBand {
        PhaseBand::from_percent(self.phase_percent)
    }

    /// floor(phase) * 10000 + hour * 100 + day, mixed into 64 bits
    pub fn value(&self) -> u64 {
        let phase = if self.phase_percent.is_finite() {
            self.phase_percent.floor().clamp(0.0, 100.0) as u64
        } else {
            0
        };
        let raw = phase * 10_000 + u64::from(self.hour % 24) * 100 + u64::from(self.day % 32);
        splitmix64(raw)
    }
}

/// SplitMix64 finalizer
fn splitmix64(x: u64) -> u64 {
    let mut z = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

// ============================================================================
// Band Ranges
// ============================================================================

/// Inclusive (low, high) draw range
pub type Span = (f32, f32);

/// Sub-ranges and preset pair owned by one phase band
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BandRanges {
    pub distortion_amount: Span,
    pub presets: [DistortionPreset; 2],
    pub high_pass_hz: Span,
    pub low_pass_hz: Span,
    pub mid_frequency_hz: Span,
    pub mid_gain_db: Span,
    pub compression_ratio: Span,
    pub compression_threshold_db: Span,
    pub compression_attack_ms: Span,
    pub compression_release_ms: Span,
    pub limiter_threshold_db: Span,
    pub reverb_amount: Span,
    pub delay_time_ms: Span,
    pub delay_feedback: Span,
    pub output_gain_db: Span,
}

impl BandRanges {
    /// Built-in ranges for a band
    pub fn for_band(band: PhaseBand) -> Self {
        match band {
            // Dark, sparse, spacious
            PhaseBand::New => Self {
                distortion_amount: (0.05, 0.25),
                presets: [DistortionPreset::Warm, DistortionPreset::Radio],
                high_pass_hz: (20.0, 80.0),
                low_pass_hz: (6000.0, 10000.0),
                mid_frequency_hz: (200.0, 800.0),
                mid_gain_db: (-6.0, -1.0),
                compression_ratio: (1.5, 3.0),
                compression_threshold_db: (-24.0, -12.0),
                compression_attack_ms: (10.0, 40.0),
                compression_release_ms: (150.0, 400.0),
                limiter_threshold_db: (-3.0, -1.0),
                reverb_amount: (0.3, 0.6),
                delay_time_ms: (400.0, 900.0),
                delay_feedback: (0.3, 0.6),
                output_gain_db: (-6.0, -2.0),
            },
            PhaseBand::Waxing => Self {
                distortion_amount: (0.2, 0.5),
                presets: [DistortionPreset::Overdrive, DistortionPreset::Crunch],
                high_pass_hz: (40.0, 150.0),
                low_pass_hz: (9000.0, 15000.0),
                mid_frequency_hz: (800.0, 2500.0),
                mid_gain_db: (-2.0, 4.0),
                compression_ratio: (2.0, 5.0),
                compression_threshold_db: (-20.0, -10.0),
                compression_attack_ms: (5.0, 20.0),
                compression_release_ms: (80.0, 250.0),
                limiter_threshold_db: (-2.0, -0.5),
                reverb_amount: (0.15, 0.35),
                delay_time_ms: (200.0, 500.0),
                delay_feedback: (0.2, 0.45),
                output_gain_db: (-3.0, 0.0),
            },
            // Bright, dense, aggressive
            PhaseBand::Full => Self {
                distortion_amount: (0.5, 0.9),
                presets: [DistortionPreset::Fuzz, DistortionPreset::BitCrush],
                high_pass_hz: (80.0, 300.0),
                low_pass_hz: (12000.0, 20000.0),
                mid_frequency_hz: (2500.0, 6000.0),
                mid_gain_db: (2.0, 8.0),
                compression_ratio: (4.0, 10.0),
                compression_threshold_db: (-30.0, -15.0),
                compression_attack_ms: (1.0, 10.0),
                compression_release_ms: (50.0, 150.0),
                limiter_threshold_db: (-1.0, -0.1),
                reverb_amount: (0.05, 0.2),
                delay_time_ms: (80.0, 250.0),
                delay_feedback: (0.1, 0.3),
                output_gain_db: (-2.0, 2.0),
            },
            PhaseBand::Waning => Self {
                distortion_amount: (0.3, 0.7),
                presets: [DistortionPreset::Decimate, DistortionPreset::BrokenSpeaker],
                high_pass_hz: (150.0, 600.0),
                low_pass_hz: (3000.0, 8000.0),
                mid_frequency_hz: (500.0, 1500.0),
                mid_gain_db: (-4.0, 2.0),
                compression_ratio: (3.0, 8.0),
                compression_threshold_db: (-36.0, -18.0),
                compression_attack_ms: (20.0, 60.0),
                compression_release_ms: (300.0, 800.0),
                limiter_threshold_db: (-4.0, -1.5),
                reverb_amount: (0.4, 0.8),
                delay_time_ms: (600.0, 1500.0),
                delay_feedback: (0.4, 0.9),
                output_gain_db: (-8.0, -3.0),
            },
        }
    }
}

/// Per-band range table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RangeTable {
    bands: HashMap<PhaseBand, BandRanges>,
}

impl RangeTable {
    pub fn get(&self, band: PhaseBand) -> BandRanges {
        self.bands
            .get(&band)
            .copied()
            .unwrap_or_else(|| BandRanges::for_band(band))
    }

    /// Replace the ranges of one band
    pub fn with_band(mut self, band: PhaseBand, ranges: BandRanges) -> Self {
        self.bands.insert(band, ranges);
        self
    }
}

impl Default for RangeTable {
    fn default() -> Self {
        Self {
            bands: PhaseBand::ALL
                .iter()
                .map(|&band| (band, BandRanges::for_band(band)))
                .collect(),
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Uniform draw from a span; reversed spans are swapped, non-finite bounds
/// return the low bound untouched so normalization can handle it.
fn draw(rng: &mut StdRng, (lo, hi): Span) -> f32 {
    if !lo.is_finite() || !hi.is_finite() {
        return lo;
    }
    let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
    rng.gen_range(lo..=hi)
}

// ============================================================================
// Generator
// ============================================================================

/// Deterministic, naturally varying parameter generator
pub struct NaturalParameterGenerator {
    clock: Box<dyn Clock>,
    ranges: RangeTable,
}

impl NaturalParameterGenerator {
    pub fn new(clock: Box<dyn Clock>) -> Self {
        Self {
            clock,
            ranges: RangeTable::default(),
        }
    }

    /// Generator reading the wall clock
    pub fn system() -> Self {
        Self::new(Box::new(SystemClock))
    }

    /// Override the band range table
    pub fn with_ranges(mut self, ranges: RangeTable) -> Self {
        self.ranges = ranges;
        self
    }

    pub fn ranges(&self) -> &RangeTable {
        &self.ranges
    }

    /// Parameters for the clock's current instant
    pub fn generate(&self) -> ProcessingParameters {
        self.generate_at(self.clock.now())
    }

    /// Current seed triple
    pub fn seed(&self) -> NaturalSeed {
        NaturalSeed::at(self.clock.now())
    }

    pub fn generate_at(&self, instant: DateTime<Utc>) -> ProcessingParameters {
        self.generate_from(NaturalSeed::at(instant))
    }

    pub fn generate_for(&self, phase_percent: f64, hour: u32, day: u32) -> ProcessingParameters {
        self.generate_from(NaturalSeed {
            phase_percent,
            hour,
            day,
        })
    }

    /// Draw order is fixed; changing it changes every generated set
    pub fn generate_from(&self, seed: NaturalSeed) -> ProcessingParameters {
        let band = seed.band();
        let r = self.ranges.get(band);
        let mut rng = StdRng::seed_from_u64(seed.value());

        let params = ProcessingParameters {
            distortion_amount: draw(&mut rng, r.distortion_amount),
            distortion_preset: r.presets[rng.gen_range(0..r.presets.len())],
            high_pass_hz: draw(&mut rng, r.high_pass_hz),
            low_pass_hz: draw(&mut rng, r.low_pass_hz),
            mid_frequency_hz: draw(&mut rng, r.mid_frequency_hz),
            mid_gain_db: draw(&mut rng, r.mid_gain_db),
            compression_ratio: draw(&mut rng, r.compression_ratio),
            compression_threshold_db: draw(&mut rng, r.compression_threshold_db),
            compression_attack_ms: draw(&mut rng, r.compression_attack_ms),
            compression_release_ms: draw(&mut rng, r.compression_release_ms),
            limiter_threshold_db: draw(&mut rng, r.limiter_threshold_db),
            reverb_amount: draw(&mut rng, r.reverb_amount),
            delay_time_ms: draw(&mut rng, r.delay_time_ms),
            delay_feedback: draw(&mut rng, r.delay_feedback),
            output_gain_db: draw(&mut rng, r.output_gain_db),
        }
        .normalized();

        debug!(
            phase = seed.phase_percent,
            hour = seed.hour,
            day = seed.day,
            %band,
            preset = params.distortion_preset.to_str(),
            "Generated processing parameters"
        );
        params
    }
}

impl Default for NaturalParameterGenerator {
    fn default() -> Self {
        Self::system()
    }
}

impl std::fmt::Debug for NaturalParameterGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NaturalParameterGenerator")
            .field("now", &self.clock.now())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn generator() -> NaturalParameterGenerator {
        NaturalParameterGenerator::new(Box::new(FixedClock(
            Utc.with_ymd_and_hms(2024, 3, 10, 9, 30, 0).single().unwrap(),
        )))
    }

    #[test]
    fn test_same_triple_same_parameters() {
        let gen = generator();
        assert_eq!(gen.generate_for(37.4, 14, 22), gen.generate_for(37.9, 14, 22));
        assert_eq!(gen.generate(), gen.generate());
    }

    #[test]
    fn test_different_triples_differ() {
        let gen = generator();
        let a = gen.generate_for(30.0, 14, 22);
        assert_ne!(a, gen.generate_for(30.0, 15, 22));
        assert_ne!(a, gen.generate_for(30.0, 14, 23));
        assert_ne!(a, gen.generate_for(31.0, 14, 22));
    }

    #[test]
    fn test_draws_stay_inside_band_ranges() {
        let gen = generator();
        for band in PhaseBand::ALL {
            let r = BandRanges::for_band(band);
            for hour in 0..24 {
                let p = gen.generate_for(band.representative_percent(), hour, 15);
                assert!(p.is_normalized());
                assert!(r.presets.contains(&p.distortion_preset));
                assert!(p.reverb_amount >= r.reverb_amount.0 && p.reverb_amount <= r.reverb_amount.1);
                assert!(p.delay_feedback <= 0.9);
            }
        }
    }

    #[test]
    fn test_override_is_normalized() {
        let ranges = BandRanges {
            delay_feedback: (1.5, 1.5),
            high_pass_hz: (2000.0, 1500.0),
            ..BandRanges::for_band(PhaseBand::Full)
        };
        let gen = generator().with_ranges(RangeTable::default().with_band(PhaseBand::Full, ranges));
        let p = gen.generate_for(50.0, 12, 1);
        assert_eq!(p.delay_feedback, 0.9);
        assert_eq!(p.high_pass_hz, 1000.0);
    }

    #[test]
    fn test_seed_value_components() {
        let a = NaturalSeed { phase_percent: 12.9, hour: 3, day: 4 };
        let b = NaturalSeed { phase_percent: 12.1, hour: 3, day: 4 };
        assert_eq!(a.value(), b.value());
        assert_eq!(a.value(), splitmix64(120_304));
        assert_eq!(a.band(), PhaseBand::Waxing);
    }

    #[test]
    fn test_generate_at_uses_utc_components() {
        let gen = generator();
        let instant = Utc.with_ymd_and_hms(2024, 6, 21, 23, 5, 0).single().unwrap();
        let seed = NaturalSeed::at(instant);
        assert_eq!(seed.hour, 23);
        assert_eq!(seed.day, 21);
        assert_eq!(gen.generate_at(instant), gen.generate_from(seed));
    }
}
