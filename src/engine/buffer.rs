//! Audio Buffer Management
//!
//! The unit of work for every DSP stage: one chunk of non-interleaved
//! 32-bit float frames at the source sample rate.

use crate::error::{MareaError, Result};

/// Sample rate stamped on buffers built without one
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

// ============================================================================
// Level Conversions
// ============================================================================

/// Decibels to linear gain
#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Linear gain to decibels; silence maps to negative infinity
#[inline]
pub fn linear_to_db(linear: f32) -> f32 {
    match linear {
        l if l > 0.0 => 20.0 * l.log10(),
        _ => f32::NEG_INFINITY,
    }
}

// ============================================================================
// Channel Layout
// ============================================================================

/// Channel counts the pipeline can render
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChannelLayout {
    Mono,
    #[default]
    Stereo,
}

impl ChannelLayout {
    pub fn num_channels(&self) -> usize {
        match self {
            ChannelLayout::Mono => 1,
            ChannelLayout::Stereo => 2,
        }
    }
}

impl TryFrom<u16> for ChannelLayout {
    type Error = MareaError;

    fn try_from(channels: u16) -> Result<Self> {
        match channels {
            1 => Ok(ChannelLayout::Mono),
            2 => Ok(ChannelLayout::Stereo),
            n => Err(MareaError::UnsupportedFormat {
                format: format!("{}-channel audio (only mono/stereo supported)", n),
            }),
        }
    }
}

// ============================================================================
// Audio Buffer
// ============================================================================

/// Chunk of audio flowing through the pipeline
///
/// Planar 32-bit float: `samples[channel][frame]`. Decoders append
/// interleaved packets with [`extend_interleaved`](Self::extend_interleaved);
/// sinks interleave on write.
///
/// # Example
/// ```
/// use marea::engine::buffer::{AudioBuffer, ChannelLayout};
///
/// let chunk = AudioBuffer::new(4096, ChannelLayout::Stereo).with_sample_rate(48000);
/// assert_eq!(chunk.channels(), 2);
/// assert_eq!(chunk.byte_len(), 4096 * 2 * 4);
/// ```
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    pub samples: Vec<Vec<f32>>,
    pub sample_rate: u32,
}

impl AudioBuffer {
    /// Zeroed chunk of `frames` frames
    pub fn new(frames: usize, layout: ChannelLayout) -> Self {
        Self {
            samples: vec![vec![0.0; frames]; layout.num_channels()],
            sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }

    /// Empty chunk with room for `capacity` frames per channel
    ///
    /// Allocation failure surfaces as `BufferAllocation` so the session can
    /// step down to a lighter tier.
    pub fn try_with_capacity(
        capacity: usize,
        layout: ChannelLayout,
        sample_rate: u32,
    ) -> Result<Self> {
        let oom = |_| MareaError::BufferAllocation { frames: capacity };
        let mut samples = Vec::new();
        samples.try_reserve_exact(layout.num_channels()).map_err(oom)?;
        for _ in 0..layout.num_channels() {
            let mut lane: Vec<f32> = Vec::new();
            lane.try_reserve_exact(capacity).map_err(oom)?;
            samples.push(lane);
        }
        Ok(Self {
            samples,
            sample_rate,
        })
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn num_channels(&self) -> usize {
        self.samples.len()
    }

    /// Frames per channel
    #[inline]
    pub fn len(&self) -> usize {
        self.samples.first().map_or(0, Vec::len)
    }

    /// An empty chunk marks end of stream
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn num_samples(&self) -> usize {
        self.len()
    }

    /// Bytes held by the sample data
    pub fn byte_len(&self) -> usize {
        self.channels() * self.len() * std::mem::size_of::<f32>()
    }

    /// Panics if `index` is out of bounds
    #[inline]
    pub fn channel(&self, index: usize) -> &[f32] {
        &self.samples[index]
    }

    /// Panics if `index` is out of bounds
    #[inline]
    pub fn channel_mut(&mut self, index: usize) -> &mut [f32] {
        &mut self.samples[index]
    }

    /// Returns false when out of bounds
    pub fn set_sample(&mut self, channel: usize, frame: usize, value: f32) -> bool {
        match self.samples.get_mut(channel).and_then(|lane| lane.get_mut(frame)) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Append interleaved frames; a trailing partial frame is dropped
    pub fn extend_interleaved(&mut self, interleaved: &[f32]) {
        let width = self.channels();
        if width == 0 {
            return;
        }
        for frame in interleaved.chunks_exact(width) {
            for (lane, &sample) in self.samples.iter_mut().zip(frame) {
                lane.push(sample);
            }
        }
    }

    fn iter_samples(&self) -> impl Iterator<Item = f32> + '_ {
        self.samples.iter().flatten().copied()
    }

    /// No NaN or infinite samples
    pub fn is_finite(&self) -> bool {
        self.iter_samples().all(f32::is_finite)
    }

    /// Peak absolute level in dB
    pub fn peak_db(&self) -> f32 {
        linear_to_db(self.iter_samples().map(f32::abs).fold(0.0, f32::max))
    }

    /// RMS level across all channels in dB
    pub fn rms_db(&self) -> f32 {
        let count = self.channels() * self.len();
        if count == 0 {
            return f32::NEG_INFINITY;
        }
        let energy: f64 = self.iter_samples().map(|s| f64::from(s).powi(2)).sum();
        linear_to_db((energy / count as f64).sqrt() as f32)
    }

    /// Replace non-finite samples with silence and clamp to full scale
    pub fn sanitize(&mut self) {
        for sample in self.samples.iter_mut().flatten() {
            *sample = if sample.is_finite() {
                sample.clamp(-1.0, 1.0)
            } else {
                0.0
            };
        }
    }

    pub fn apply_gain(&mut self, gain_db: f32) {
        let factor = db_to_linear(gain_db);
        self.samples
            .iter_mut()
            .flatten()
            .for_each(|sample| *sample *= factor);
    }
}

impl Default for AudioBuffer {
    fn default() -> Self {
        Self::new(0, ChannelLayout::Stereo)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn mono(samples: Vec<f32>) -> AudioBuffer {
        AudioBuffer {
            samples: vec![samples],
            sample_rate: 48000,
        }
    }

    #[test]
    fn test_db_conversions() {
        assert_relative_eq!(db_to_linear(0.0), 1.0);
        assert_relative_eq!(db_to_linear(-20.0), 0.1, epsilon = 1e-6);
        assert_relative_eq!(linear_to_db(0.5), -6.0206, epsilon = 1e-3);
        assert_eq!(linear_to_db(0.0), f32::NEG_INFINITY);
        assert_eq!(linear_to_db(-1.0), f32::NEG_INFINITY);
    }

    #[test]
    fn test_levels() {
        let sine: Vec<f32> = (0..48000)
            .map(|i| (2.0 * std::f32::consts::PI * 1000.0 * i as f32 / 48000.0).sin())
            .collect();
        assert_relative_eq!(mono(sine).rms_db(), -3.01, epsilon = 0.05);

        let mut spike = vec![0.0; 1000];
        spike[500] = -0.5;
        assert_relative_eq!(mono(spike).peak_db(), -6.02, epsilon = 0.01);
        assert_eq!(AudioBuffer::default().rms_db(), f32::NEG_INFINITY);
    }

    #[test]
    fn test_layout_from_channel_count() {
        assert_eq!(ChannelLayout::try_from(1).unwrap(), ChannelLayout::Mono);
        assert_eq!(ChannelLayout::try_from(2).unwrap().num_channels(), 2);
        assert!(matches!(
            ChannelLayout::try_from(6),
            Err(MareaError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn test_try_with_capacity() {
        let chunk = AudioBuffer::try_with_capacity(1024, ChannelLayout::Stereo, 48000).unwrap();
        assert_eq!(chunk.channels(), 2);
        assert!(chunk.is_empty());
        assert!(chunk.samples[0].capacity() >= 1024);

        let err = AudioBuffer::try_with_capacity(usize::MAX, ChannelLayout::Mono, 48000);
        assert!(matches!(err, Err(MareaError::BufferAllocation { .. })));
    }

    #[test]
    fn test_extend_interleaved_drops_partial_frame() {
        let mut chunk = AudioBuffer::try_with_capacity(4, ChannelLayout::Stereo, 48000).unwrap();
        chunk.extend_interleaved(&[1.0, -1.0, 0.5, -0.5, 0.25]);
        assert_eq!(chunk.len(), 2);
        assert_eq!(chunk.channel(1), &[-1.0, -0.5]);
        assert_eq!(chunk.byte_len(), 16);
    }

    #[test]
    fn test_set_sample_bounds() {
        let mut chunk = AudioBuffer::new(100, ChannelLayout::Stereo);
        assert!(chunk.set_sample(1, 99, 0.5));
        assert_eq!(chunk.channel(1)[99], 0.5);
        assert!(!chunk.set_sample(2, 0, 0.5));
        assert!(!chunk.set_sample(0, 100, 0.5));
    }

    #[test]
    fn test_sanitize_and_gain() {
        let mut chunk = mono(vec![f32::NAN, 2.0, -0.5, f32::NEG_INFINITY]);
        assert!(!chunk.is_finite());
        chunk.sanitize();
        assert_eq!(chunk.channel(0), &[0.0, 1.0, -0.5, 0.0]);

        chunk.apply_gain(-6.0206);
        assert_relative_eq!(chunk.channel(0)[1], 0.5, epsilon = 1e-3);
    }
}
