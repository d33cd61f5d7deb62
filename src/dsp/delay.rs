//! Delay Effect
//!
//! Multi-channel feedback delay with a low-passed feedback path.
//! Feedback and wet mix are expressed in percent.

use crate::dsp::effect::{Effect, StageParams};
use crate::engine::AudioBuffer;
use crate::impl_stage_common;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::f32::consts::PI;

// ============================================================================
// Constants
// ============================================================================

const MIN_DELAY_MS: f32 = 1.0;
const MAX_DELAY_MS: f32 = 2000.0;

/// Hard ceiling on feedback; higher values never decay
pub const MAX_FEEDBACK_PERCENT: f32 = 90.0;

const MAX_WET_PERCENT: f32 = 100.0;

// ============================================================================
// Delay Line
// ============================================================================

/// Circular buffer plus feedback filter state for one channel
#[derive(Debug, Clone, Default)]
struct DelayLine {
    buffer: Vec<f32>,
    filter_state: f32,
}

impl DelayLine {
    fn with_len(len: usize) -> Self {
        Self {
            buffer: vec![0.0; len],
            filter_state: 0.0,
        }
    }

    #[inline]
    fn read(&self, write_pos: usize, delay_samples: usize) -> f32 {
        let size = self.buffer.len();
        if size == 0 {
            return 0.0;
        }
        self.buffer[(write_pos + size - delay_samples % size) % size]
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.filter_state = 0.0;
    }
}

// ============================================================================
// Delay Effect
// ============================================================================

/// Feedback delay
///
/// # Parameters
/// - `delay_time_ms`: 1 to 2000 ms
/// - `feedback`: percent of the delayed signal fed back (0 to 90)
/// - `wet_mix`: percent of delayed signal added to the dry signal (0 to 100)
/// - `filter_freq`: low-pass cutoff on the feedback path
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delay {
    params: StageParams,
    delay_time_ms: f32,
    feedback: f32,
    wet_mix: f32,
    filter_freq: f32,
    #[serde(skip)]
    lines: Vec<DelayLine>,
    #[serde(skip)]
    write_pos: usize,
    #[serde(skip)]
    sample_rate: f32,
}

impl Delay {
    /// Create a delay with 30% feedback and 30% wet mix
    pub fn new(delay_time_ms: f32) -> Self {
        Self {
            params: StageParams::default(),
            delay_time_ms: delay_time_ms.clamp(MIN_DELAY_MS, MAX_DELAY_MS),
            feedback: 30.0,
            wet_mix: 30.0,
            filter_freq: 8000.0,
            lines: Vec::new(),
            write_pos: 0,
            sample_rate: 48000.0,
        }
    }

    pub fn set_delay_time_ms(&mut self, ms: f32) {
        self.delay_time_ms = ms.clamp(MIN_DELAY_MS, MAX_DELAY_MS);
        let channels = self.lines.len();
        self.allocate(channels);
    }

    pub fn delay_time_ms(&self) -> f32 {
        self.delay_time_ms
    }

    /// Set feedback in percent, capped at [`MAX_FEEDBACK_PERCENT`]
    pub fn set_feedback(&mut self, percent: f32) {
        self.feedback = if percent.is_nan() {
            0.0
        } else {
            percent.clamp(0.0, MAX_FEEDBACK_PERCENT)
        };
    }

    pub fn feedback(&self) -> f32 {
        self.feedback
    }

    /// Set wet mix in percent (0-100)
    pub fn set_wet_mix(&mut self, percent: f32) {
        self.wet_mix = percent.clamp(0.0, MAX_WET_PERCENT);
    }

    pub fn wet_mix(&self) -> f32 {
        self.wet_mix
    }

    pub fn set_filter_freq(&mut self, freq: f32) {
        self.filter_freq = freq.clamp(20.0, 20000.0);
    }

    fn delay_samples(&self) -> usize {
        ((self.delay_time_ms * self.sample_rate / 1000.0) as usize).max(1)
    }

    /// Buffer length with a 10 ms margin over the delay time
    fn required_len(&self) -> usize {
        (((self.delay_time_ms + 10.0) * self.sample_rate / 1000.0) as usize).max(2)
    }

    fn allocate(&mut self, channels: usize) {
        let len = self.required_len();
        self.lines = (0..channels).map(|_| DelayLine::with_len(len)).collect();
        self.write_pos = 0;
    }

    /// One-pole coefficient: 1 - exp(-2 * PI * fc / fs)
    fn filter_coeff(&self) -> f32 {
        let fc = self.filter_freq.min(self.sample_rate * 0.45);
        1.0 - (-2.0 * PI * fc / self.sample_rate).exp()
    }
}

impl Default for Delay {
    fn default() -> Self {
        Self::new(250.0)
    }
}

impl Effect for Delay {
    impl_stage_common!("delay");

    fn process(&mut self, buffer: &mut AudioBuffer) {
        if self.params.bypassed || buffer.is_empty() {
            return;
        }

        let channels = buffer.num_channels();
        if self.lines.len() != channels || self.lines.iter().any(|l| l.buffer.is_empty()) {
            self.allocate(channels);
        }

        let delay_samples = self.delay_samples();
        let coeff = self.filter_coeff();
        let feedback = self.feedback / 100.0;
        let wet = self.wet_mix / 100.0;
        let len = self.lines[0].buffer.len();
        let start = self.write_pos;

        for (samples, line) in buffer.samples.iter_mut().zip(self.lines.iter_mut()) {
            let mut pos = start;
            for sample in samples.iter_mut() {
                let input = *sample;
                let delayed = line.read(pos, delay_samples);
                line.filter_state += coeff * (delayed * feedback - line.filter_state);
                line.buffer[pos] = input + line.filter_state;
                *sample = input + delayed * wet;
                pos = (pos + 1) % len;
            }
        }

        self.write_pos = (start + buffer.num_samples()) % len;
    }

    fn prepare(&mut self, sample_rate: u32, _max_block_size: usize) {
        self.sample_rate = sample_rate.max(1) as f32;
        let channels = self.lines.len();
        self.allocate(channels);
    }

    fn reset(&mut self) {
        for line in &mut self.lines {
            line.clear();
        }
        self.write_pos = 0;
    }

    fn describe(&self) -> Value {
        json!({
            "delay_time_ms": self.delay_time_ms,
            "feedback": self.feedback,
            "wet_mix": self.wet_mix,
            "filter_freq": self.filter_freq,
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
        let mut buffer = AudioBuffer::new(num_samples, ChannelLayout::Stereo).with_sample_rate(1000);
        buffer.set_sample(0, 0, 1.0);
        buffer.set_sample(1, 0, 1.0);
        buffer
    }

    #[test]
    fn test_feedback_capped_at_ninety_percent() {
        let mut delay = Delay::new(100.0);
        delay.set_feedback(150.0);
        assert_eq!(delay.feedback(), MAX_FEEDBACK_PERCENT);
        delay.set_feedback(f32::NAN);
        assert_eq!(delay.feedback(), 0.0);
        delay.set_feedback(-3.0);
        assert_eq!(delay.feedback(), 0.0);
    }

    #[test]
    fn test_delay_time_clamps() {
        assert_eq!(Delay::new(0.0).delay_time_ms(), 1.0);
        assert_eq!(Delay::new(10_000.0).delay_time_ms(), 2000.0);
    }

    #[test]
    fn test_echo_appears_after_delay_time() {
        // 1 kHz sample rate: 10 ms = 10 samples
        let mut delay = Delay::new(10.0);
        delay.set_wet_mix(100.0);
        delay.set_feedback(0.0);
        delay.prepare(1000, 64);
        let mut buffer = create_impulse_buffer(32);
        delay.process(&mut buffer);
        let ch = buffer.channel(0);
        assert_eq!(ch[0], 1.0);
        assert_eq!(ch[5], 0.0);
        assert!((ch[10] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_echo_carries_across_chunks() {
        let mut delay = Delay::new(10.0);
        delay.set_wet_mix(100.0);
        delay.prepare(1000, 64);
        let mut first = create_impulse_buffer(6);
        delay.process(&mut first);
        let mut second = AudioBuffer::new(8, ChannelLayout::Stereo).with_sample_rate(1000);
        delay.process(&mut second);
        assert!((second.channel(1)[4] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_max_feedback_decays() {
        let mut delay = Delay::new(5.0);
        delay.set_wet_mix(100.0);
        delay.set_feedback(100.0);
        delay.set_filter_freq(20000.0);
        delay.prepare(1000, 64);
        let mut buffer = create_impulse_buffer(1000);
        delay.process(&mut buffer);
        let tail = buffer.channel(0)[900..].iter().fold(0.0_f32, |m, s| m.max(s.abs()));
        assert!(tail < 0.01, "feedback did not decay: {}", tail);
    }

    #[test]
    fn test_reset_silences_tail() {
        let mut delay = Delay::new(10.0);
        delay.set_wet_mix(100.0);
        delay.prepare(1000, 64);
        let mut buffer = create_impulse_buffer(5);
        delay.process(&mut buffer);
        delay.reset();
        let mut silent = AudioBuffer::new(20, ChannelLayout::Stereo);
        delay.process(&mut silent);
        assert!(silent.samples.iter().flatten().all(|&s| s == 0.0));
    }
}
