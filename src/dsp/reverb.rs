//! Reverb Effect
//!
//! Freeverb-style algorithmic reverb: per channel, eight parallel damped comb
//! filters feed four series allpass diffusers. Stereo channels use a small
//! delay spread for decorrelation. Wet mix is expressed in percent.

use crate::dsp::effect::{Effect, StageParams};
use crate::engine::AudioBuffer;
use crate::impl_stage_common;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

// ============================================================================
// Constants
// ============================================================================

/// Delay tunings are specified at this rate and scaled to the actual one
const REFERENCE_SAMPLE_RATE: f32 = 44100.0;

const COMB_DELAYS: [usize; 8] = [1116, 1188, 1277, 1356, 1422, 1491, 1557, 1617];

const ALLPASS_DELAYS: [usize; 4] = [556, 441, 341, 225];

/// Extra samples added to every delay of odd channels
const STEREO_SPREAD: usize = 23;

const ALLPASS_GAIN: f32 = 0.5;

const ROOM_SCALE: f32 = 0.28;
const ROOM_OFFSET: f32 = 0.7;
const DAMP_SCALE: f32 = 0.4;

/// Input attenuation before the comb bank
const FIXED_GAIN: f32 = 0.015;
/// Wet output scaling
const WET_SCALE: f32 = 3.0;

// ============================================================================
// Filter Components
// ============================================================================

/// Low-pass feedback comb filter
#[derive(Debug, Clone)]
struct CombFilter {
    buffer: Vec<f32>,
    pos: usize,
    filter_state: f32,
}

impl CombFilter {
    fn new(len: usize) -> Self {
        Self {
            buffer: vec![0.0; len.max(1)],
            pos: 0,
            filter_state: 0.0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32, feedback: f32, damp1: f32, damp2: f32) -> f32 {
        let output = self.buffer[self.pos];
        self.filter_state = output * damp1 + self.filter_state * damp2;
        self.buffer[self.pos] = input + self.filter_state * feedback;
        self.pos = (self.pos + 1) % self.buffer.len();
        output
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.filter_state = 0.0;
        self.pos = 0;
    }
}

/// Schroeder allpass diffuser
#[derive(Debug, Clone)]
struct AllpassFilter {
    buffer: Vec<f32>,
    pos: usize,
}

impl AllpassFilter {
    fn new(len: usize) -> Self {
        Self {
            buffer: vec![0.0; len.max(1)],
            pos: 0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let delayed = self.buffer[self.pos];
        let output = delayed - input;
        self.buffer[self.pos] = input + delayed * ALLPASS_GAIN;
        self.pos = (self.pos + 1) % self.buffer.len();
        output
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.pos = 0;
    }
}

/// Comb bank plus diffusers for one channel
#[derive(Debug, Clone)]
struct Tank {
    combs: Vec<CombFilter>,
    allpasses: Vec<AllpassFilter>,
}

impl Tank {
    fn new(sample_rate: f32, spread: usize) -> Self {
        let scale = sample_rate / REFERENCE_SAMPLE_RATE;
        let scaled = |d: usize| (((d + spread) as f32) * scale) as usize;
        Self {
            combs: COMB_DELAYS.iter().map(|&d| CombFilter::new(scaled(d))).collect(),
            allpasses: ALLPASS_DELAYS
                .iter()
                .map(|&d| AllpassFilter::new(scaled(d)))
                .collect(),
        }
    }

    #[inline]
    fn process(&mut self, input: f32, feedback: f32, damp1: f32, damp2: f32) -> f32 {
        let mut out = self
            .combs
            .iter_mut()
            .map(|c| c.process(input, feedback, damp1, damp2))
            .sum::<f32>();
        for allpass in &mut self.allpasses {
            out = allpass.process(out);
        }
        out
    }

    fn clear(&mut self) {
        self.combs.iter_mut().for_each(CombFilter::clear);
        self.allpasses.iter_mut().for_each(AllpassFilter::clear);
    }
}

// ============================================================================
// Reverb Effect
// ============================================================================

/// Algorithmic reverb
///
/// # Parameters
/// - `room_size`: 0 (small) to 1 (large hall)
/// - `damping`: 0 (bright) to 1 (dark)
/// - `wet_mix`: percent of reverberated signal (0 = dry, 100 = wet only)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reverb {
    params: StageParams,
    room_size: f32,
    damping: f32,
    wet_mix: f32,
    #[serde(skip)]
    sample_rate: f32,
    #[serde(skip)]
    tanks: Vec<Tank>,
}

impl Reverb {
    pub fn new() -> Self {
        Self {
            params: StageParams::default(),
            room_size: 0.5,
            damping: 0.5,
            wet_mix: 25.0,
            sample_rate: REFERENCE_SAMPLE_RATE,
            tanks: Vec::new(),
        }
    }

    /// Reverb with the given wet mix in percent
    pub fn with_wet_mix(wet_mix: f32) -> Self {
        let mut reverb = Self::new();
        reverb.set_wet_mix(wet_mix);
        reverb
    }

    pub fn set_room_size(&mut self, room_size: f32) {
        self.room_size = room_size.clamp(0.0, 1.0);
    }

    pub fn room_size(&self) -> f32 {
        self.room_size
    }

    pub fn set_damping(&mut self, damping: f32) {
        self.damping = damping.clamp(0.0, 1.0);
    }

    /// Set wet mix in percent (0-100)
    pub fn set_wet_mix(&mut self, percent: f32) {
        self.wet_mix = percent.clamp(0.0, 100.0);
    }

    pub fn wet_mix(&self) -> f32 {
        self.wet_mix
    }

    fn build_tanks(&mut self, channels: usize) {
        let rate = self.sample_rate;
        self.tanks = (0..channels)
            .map(|ch| Tank::new(rate, if ch % 2 == 1 { STEREO_SPREAD } else { 0 }))
            .collect();
    }
}

impl Default for Reverb {
    fn default() -> Self {
        Self::new()
    }
}

impl Effect for Reverb {
    impl_stage_common!("reverb");

    fn process(&mut self, buffer: &mut AudioBuffer) {
        if self.params.bypassed || self.wet_mix < f32::EPSILON || buffer.is_empty() {
            return;
        }
        if self.tanks.len() != buffer.num_channels() {
            self.build_tanks(buffer.num_channels());
        }

        let feedback = self.room_size * ROOM_SCALE + ROOM_OFFSET;
        let damp2 = self.damping * DAMP_SCALE;
        let damp1 = 1.0 - damp2;
        let wet = self.wet_mix / 100.0;
        let dry = 1.0 - wet;

        for i in 0..buffer.num_samples() {
            // Every tank is fed the channel mix so stereo images stay centred
            let mono = buffer.samples.iter().map(|ch| ch[i]).sum::<f32>()
                / buffer.num_channels() as f32;
            let input = mono * FIXED_GAIN;

            for (samples, tank) in buffer.samples.iter_mut().zip(self.tanks.iter_mut()) {
                let out = tank.process(input, feedback, damp1, damp2);
                samples[i] = samples[i] * dry + out * WET_SCALE * wet;
            }
        }
    }

    fn prepare(&mut self, sample_rate: u32, _max_block_size: usize) {
        self.sample_rate = sample_rate.max(1) as f32;
        let channels = self.tanks.len();
        self.build_tanks(channels);
    }

    fn reset(&mut self) {
        self.tanks.iter_mut().for_each(Tank::clear);
    }

    fn describe(&self) -> Value {
        json!({
            "room_size": self.room_size,
            "damping": self.damping,
            "wet_mix": self.wet_mix,
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

    fn create_impulse_buffer(num_samples: usize) -> AudioBuffer {
        let mut buffer = AudioBuffer::new(num_samples, ChannelLayout::Stereo).with_sample_rate(44100);
        buffer.set_sample(0, 0, 1.0);
        buffer.set_sample(1, 0, 1.0);
        buffer
    }

    #[test]
    fn test_setters_clamp() {
        let mut reverb = Reverb::new();
        reverb.set_wet_mix(140.0);
        reverb.set_room_size(-1.0);
        assert_eq!(reverb.wet_mix(), 100.0);
        assert_eq!(reverb.room_size(), 0.0);
    }

    #[test]
    fn test_zero_wet_is_passthrough() {
        let mut reverb = Reverb::with_wet_mix(0.0);
        reverb.prepare(44100, 4096);
        let mut buffer = create_impulse_buffer(2048);
        reverb.process(&mut buffer);
        assert_eq!(buffer.channel(0)[0], 1.0);
        assert!(buffer.channel(0)[1..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_impulse_produces_tail() {
        let mut reverb = Reverb::with_wet_mix(50.0);
        reverb.prepare(44100, 8192);
        let mut buffer = create_impulse_buffer(8192);
        reverb.process(&mut buffer);
        let tail_energy: f32 = buffer.channel(0)[2000..].iter().map(|s| s * s).sum();
        assert!(tail_energy > 0.0);
        assert!(buffer.is_finite());
    }

    #[test]
    fn test_channels_decorrelated() {
        let mut reverb = Reverb::with_wet_mix(100.0);
        reverb.prepare(44100, 8192);
        let mut buffer = create_impulse_buffer(4096);
        reverb.process(&mut buffer);
        assert_ne!(buffer.channel(0)[2000..2100], buffer.channel(1)[2000..2100]);
    }

    #[test]
    fn test_reset_clears_tail() {
        let mut reverb = Reverb::with_wet_mix(100.0);
        reverb.prepare(44100, 4096);
        let mut buffer = create_impulse_buffer(1024);
        reverb.process(&mut buffer);
        reverb.reset();
        let mut silent = AudioBuffer::new(4096, ChannelLayout::Stereo);
        reverb.process(&mut silent);
        assert!(silent.samples.iter().flatten().all(|&s| s == 0.0));
    }
}
