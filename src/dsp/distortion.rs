//! Distortion Effect
//!
//! Preset-driven waveshaping distortion with a wet/dry mix in percent.
//! Four presets are stateless waveshapers; the other four carry
//! per-channel state (sample-and-hold, filters) between chunks.

use crate::dsp::effect::{Effect, StageParams};
use crate::engine::AudioBuffer;
use crate::impl_stage_common;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::f32::consts::PI;

// ============================================================================
// Constants
// ============================================================================

const MIN_AMOUNT: f32 = 0.0;
const MAX_AMOUNT: f32 = 1.0;

const MIN_MIX_PERCENT: f32 = 0.0;
const MAX_MIX_PERCENT: f32 = 100.0;

/// Highest sample-and-hold factor used by `Decimate`
const MAX_DECIMATION: f32 = 16.0;

// ============================================================================
// Distortion Preset
// ============================================================================

/// Distortion character
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum DistortionPreset {
    /// Soft tape-like saturation
    #[default]
    Warm,
    /// Asymmetric tube drive
    Overdrive,
    /// Transistor clipping with odd harmonics
    Crunch,
    /// Heavy exponential clipping
    Fuzz,
    /// Bit-depth reduction
    BitCrush,
    /// Sample-rate reduction
    Decimate,
    /// Asymmetric clipping through a resonant, band-limited cone
    BrokenSpeaker,
    /// Narrow telephone-style band with soft clipping
    Radio,
}

impl DistortionPreset {
    pub const ALL: [DistortionPreset; 8] = [
        DistortionPreset::Warm,
        DistortionPreset::Overdrive,
        DistortionPreset::Crunch,
        DistortionPreset::Fuzz,
        DistortionPreset::BitCrush,
        DistortionPreset::Decimate,
        DistortionPreset::BrokenSpeaker,
        DistortionPreset::Radio,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            DistortionPreset::Warm => "Warm",
            DistortionPreset::Overdrive => "Overdrive",
            DistortionPreset::Crunch => "Crunch",
            DistortionPreset::Fuzz => "Fuzz",
            DistortionPreset::BitCrush => "Bit Crush",
            DistortionPreset::Decimate => "Decimate",
            DistortionPreset::BrokenSpeaker => "Broken Speaker",
            DistortionPreset::Radio => "Radio",
        }
    }

    pub fn to_str(&self) -> &'static str {
        match self {
            DistortionPreset::Warm => "warm",
            DistortionPreset::Overdrive => "overdrive",
            DistortionPreset::Crunch => "crunch",
            DistortionPreset::Fuzz => "fuzz",
            DistortionPreset::BitCrush => "bit_crush",
            DistortionPreset::Decimate => "decimate",
            DistortionPreset::BrokenSpeaker => "broken_speaker",
            DistortionPreset::Radio => "radio",
        }
    }
}

// ============================================================================
// Waveshaping Functions
// ============================================================================

/// tanh(x * (1 + drive * 4)) with slight asymmetry
#[inline]
fn waveshape_warm(x: f32, drive: f32) -> f32 {
    let shaped = (x * (1.0 + drive * 4.0)).tanh();
    shaped + 0.1 * drive * shaped * shaped
}

/// Soft knee that bites harder on positive half-waves
#[inline]
fn waveshape_overdrive(x: f32, drive: f32) -> f32 {
    let driven = x * (1.0 + drive * 6.0);
    if driven >= 0.0 {
        driven / (1.0 + driven.powf(1.0 + drive))
    } else {
        driven / (1.0 + driven.abs())
    }
}

/// x * g / (1 + |x * g|)
#[inline]
fn waveshape_crunch(x: f32, drive: f32) -> f32 {
    let driven = x * (1.0 + drive * 3.0);
    driven / (1.0 + driven.abs())
}

/// sign(x) * (1 - exp(-|x * g|))
#[inline]
fn waveshape_fuzz(x: f32, drive: f32) -> f32 {
    let driven = x * (1.0 + drive * 20.0);
    driven.signum() * (1.0 - (-driven.abs()).exp())
}

/// Quantize to 16 bits at drive 0 down to 2 bits at drive 1
#[inline]
fn bit_crush(x: f32, drive: f32) -> f32 {
    let bits = 16.0 - drive * 14.0;
    let steps = 2.0_f32.powf(bits - 1.0);
    (x * steps).round() / steps
}

// ============================================================================
// Distortion Effect
// ============================================================================

/// Per-channel runtime state
#[derive(Debug, Clone, Copy, Default)]
struct ChannelState {
    held: f32,
    hold_counter: f32,
    low: f32,
    high_prev_in: f32,
    high_prev_out: f32,
}

/// Preset-driven distortion
///
/// # Parameters
/// - `preset`: one of eight [`DistortionPreset`]s
/// - `amount`: distortion intensity (0.0 to 1.0)
/// - `wet_dry_mix`: percent of processed signal (0 = dry, 100 = wet)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Distortion {
    params: StageParams,
    preset: DistortionPreset,
    amount: f32,
    wet_dry_mix: f32,
    #[serde(skip)]
    sample_rate: f32,
    #[serde(skip)]
    channels: Vec<ChannelState>,
}

impl Distortion {
    /// Create a distortion with the Warm preset, 0.5 amount, fully wet
    pub fn new() -> Self {
        Self {
            params: StageParams::default(),
            preset: DistortionPreset::Warm,
            amount: 0.5,
            wet_dry_mix: 100.0,
            sample_rate: 48000.0,
            channels: Vec::new(),
        }
    }

    pub fn with_params(preset: DistortionPreset, amount: f32, wet_dry_mix: f32) -> Self {
        let mut distortion = Self::new();
        distortion.set_preset(preset);
        distortion.set_amount(amount);
        distortion.set_wet_dry_mix(wet_dry_mix);
        distortion
    }

    pub fn set_preset(&mut self, preset: DistortionPreset) {
        self.preset = preset;
    }

    pub fn preset(&self) -> DistortionPreset {
        self.preset
    }

    pub fn set_amount(&mut self, amount: f32) {
        self.amount = amount.clamp(MIN_AMOUNT, MAX_AMOUNT);
    }

    pub fn amount(&self) -> f32 {
        self.amount
    }

    /// Set the wet/dry mix in percent (clamped to 0-100)
    pub fn set_wet_dry_mix(&mut self, percent: f32) {
        self.wet_dry_mix = percent.clamp(MIN_MIX_PERCENT, MAX_MIX_PERCENT);
    }

    pub fn wet_dry_mix(&self) -> f32 {
        self.wet_dry_mix
    }

    /// One-pole coefficient for a cutoff in Hz
    #[inline]
    fn one_pole_coeff(&self, cutoff: f32) -> f32 {
        1.0 - (-2.0 * PI * cutoff / self.sample_rate).exp()
    }

    #[inline]
    fn shape(&self, x: f32, state: &mut ChannelState, lp: f32, hp_r: f32) -> f32 {
        let drive = self.amount;
        match self.preset {
            DistortionPreset::Warm => waveshape_warm(x, drive),
            DistortionPreset::Overdrive => waveshape_overdrive(x, drive),
            DistortionPreset::Crunch => waveshape_crunch(x, drive),
            DistortionPreset::Fuzz => waveshape_fuzz(x, drive),
            DistortionPreset::BitCrush => bit_crush(x, drive),
            DistortionPreset::Decimate => {
                let factor = 1.0 + drive * (MAX_DECIMATION - 1.0);
                if state.hold_counter <= 0.0 {
                    state.held = x;
                    state.hold_counter += factor;
                }
                state.hold_counter -= 1.0;
                state.held
            }
            DistortionPreset::BrokenSpeaker => {
                let clipped = if x > 0.0 {
                    (x * (1.0 + drive * 8.0)).min(0.6)
                } else {
                    waveshape_crunch(x, drive)
                };
                state.low += lp * (clipped - state.low);
                state.low
            }
            DistortionPreset::Radio => {
                // High-pass then low-pass then soft clip
                let hp = hp_r * (state.high_prev_out + x - state.high_prev_in);
                state.high_prev_in = x;
                state.high_prev_out = hp;
                state.low += lp * (hp - state.low);
                waveshape_warm(state.low * 2.0, drive)
            }
        }
    }
}

impl Default for Distortion {
    fn default() -> Self {
        Self::new()
    }
}

impl Effect for Distortion {
    impl_stage_common!("distortion");

    fn process(&mut self, buffer: &mut AudioBuffer) {
        if self.params.bypassed || self.wet_dry_mix < f32::EPSILON {
            return;
        }

        if self.channels.len() < buffer.num_channels() {
            self.channels
                .resize(buffer.num_channels(), ChannelState::default());
        }

        let wet = self.wet_dry_mix / 100.0;
        let dry = 1.0 - wet;
        let lp = match self.preset {
            DistortionPreset::Radio => self.one_pole_coeff(3000.0),
            _ => self.one_pole_coeff(4500.0 - self.amount * 2500.0),
        };
        // One-pole high-pass at 300 Hz
        let hp_r = 1.0 / (1.0 + 2.0 * PI * 300.0 / self.sample_rate);

        let mut channels = std::mem::take(&mut self.channels);
        for (samples, state) in buffer.samples.iter_mut().zip(channels.iter_mut()) {
            for sample in samples.iter_mut() {
                let input = *sample;
                let shaped = self.shape(input, state, lp, hp_r);
                *sample = input * dry + shaped * wet;
            }
        }
        self.channels = channels;
    }

    fn prepare(&mut self, sample_rate: u32, _max_block_size: usize) {
        self.sample_rate = sample_rate.max(1) as f32;
    }

    fn reset(&mut self) {
        for state in &mut self.channels {
            *state = ChannelState::default();
        }
    }

    fn describe(&self) -> Value {
        json!({
            "preset": self.preset.to_str(),
            "preset_display": self.preset.display_name(),
            "amount": self.amount,
            "wet_dry_mix": self.wet_dry_mix,
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
    use test_case::test_case;

    fn create_sine_buffer(amplitude: f32, num_samples: usize) -> AudioBuffer {
        let mut buffer = AudioBuffer::new(num_samples, ChannelLayout::Stereo).with_sample_rate(48000);
        for ch in 0..buffer.num_channels() {
            for i in 0..num_samples {
                let t = i as f32 / 48000.0;
                buffer.set_sample(ch, i, amplitude * (2.0 * PI * 220.0 * t).sin());
            }
        }
        buffer
    }

    #[test]
    fn test_setters_clamp() {
        let mut d = Distortion::new();
        d.set_amount(3.0);
        d.set_wet_dry_mix(250.0);
        assert_eq!(d.amount(), 1.0);
        assert_eq!(d.wet_dry_mix(), 100.0);
        d.set_wet_dry_mix(-5.0);
        assert_eq!(d.wet_dry_mix(), 0.0);
    }

    #[test]
    fn test_dry_mix_is_passthrough() {
        let mut d = Distortion::with_params(DistortionPreset::Fuzz, 1.0, 0.0);
        d.prepare(48000, 4096);
        let original = create_sine_buffer(0.8, 1024);
        let mut buffer = original.clone();
        d.process(&mut buffer);
        assert_eq!(buffer.samples, original.samples);
    }

    #[test]
    fn test_waveshapers_are_bounded() {
        for x in [-4.0_f32, -1.0, -0.1, 0.0, 0.1, 1.0, 4.0] {
            assert!(waveshape_crunch(x, 1.0).abs() < 1.0);
            assert!(waveshape_fuzz(x, 1.0).abs() <= 1.0);
            assert!(waveshape_overdrive(x, 1.0).abs() <= 1.0);
        }
        assert!(waveshape_fuzz(0.0, 0.7).abs() < f32::EPSILON);
    }

    #[test]
    fn test_bit_crush_quantizes() {
        let crushed = bit_crush(0.3, 1.0);
        // 2 bits: steps of 0.5
        assert!((crushed - 0.5).abs() < 1e-6);
        assert!((bit_crush(0.3, 0.0) - 0.3).abs() < 1e-4);
    }

    #[test]
    fn test_decimate_holds_samples() {
        let mut d = Distortion::with_params(DistortionPreset::Decimate, 1.0, 100.0);
        d.prepare(48000, 4096);
        let mut buffer = create_sine_buffer(0.5, 64);
        d.process(&mut buffer);
        let ch = buffer.channel(0);
        assert_eq!(ch[1], ch[0]);
        assert_eq!(ch[15], ch[0]);
        assert_ne!(ch[16], ch[0]);
    }

    #[test_case(DistortionPreset::Warm)]
    #[test_case(DistortionPreset::Overdrive)]
    #[test_case(DistortionPreset::Crunch)]
    #[test_case(DistortionPreset::Fuzz)]
    #[test_case(DistortionPreset::BitCrush)]
    #[test_case(DistortionPreset::Decimate)]
    #[test_case(DistortionPreset::BrokenSpeaker)]
    #[test_case(DistortionPreset::Radio)]
    fn test_every_preset_stays_finite(preset: DistortionPreset) {
        let mut d = Distortion::with_params(preset, 0.9, 100.0);
        d.prepare(44100, 4096);
        let mut buffer = create_sine_buffer(1.0, 4096);
        d.process(&mut buffer);
        assert!(buffer.is_finite());
        assert!(buffer.samples.iter().flatten().all(|s| s.abs() < 2.0));
    }

    #[test]
    fn test_reset_clears_state() {
        let mut d = Distortion::with_params(DistortionPreset::Radio, 0.5, 100.0);
        d.prepare(48000, 4096);
        let mut buffer = create_sine_buffer(0.5, 256);
        d.process(&mut buffer);
        d.reset();
        let mut silent = AudioBuffer::new(16, ChannelLayout::Stereo);
        d.process(&mut silent);
        assert!(silent.samples.iter().flatten().all(|&s| s.abs() < 1e-6));
    }

    #[test]
    fn test_all_presets_listed() {
        assert_eq!(DistortionPreset::ALL.len(), 8);
        let json = serde_json::to_string(&DistortionPreset::BrokenSpeaker).unwrap();
        assert_eq!(json, "\"broken_speaker\"");
    }
}
