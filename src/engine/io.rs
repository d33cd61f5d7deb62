//! Streaming audio I/O for Marea
//!
//! Sources hand out bounded chunks and sinks accept them one at a time, so a
//! render never holds more than one chunk of decoded audio. Output is always
//! WAV at the source sample rate and channel count.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavSpec, WavWriter};
use serde::{Deserialize, Serialize};

use crate::engine::buffer::{AudioBuffer, ChannelLayout};
use crate::error::{MareaError, Result};

/// Container extensions accepted as input
pub const SUPPORTED_EXTENSIONS: [&str; 8] =
    ["wav", "wave", "aif", "aiff", "flac", "mp3", "m4a", "aac"];

// ============================================================================
// Stream Traits
// ============================================================================

/// Sample rate and channel count of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpec {
    pub sample_rate: u32,
    pub channels: u16,
}

impl SourceSpec {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// Channel layout, or `UnsupportedFormat` for more than two channels
    pub fn layout(&self) -> Result<ChannelLayout> {
        ChannelLayout::try_from(self.channels)
    }
}

/// A pull-based source of audio chunks
pub trait AudioSource: Send {
    /// Stream format
    fn spec(&self) -> SourceSpec;

    /// Total frames the stream is expected to deliver
    fn total_frames(&self) -> u64;

    /// Read at most `max_frames` frames
    ///
    /// An empty buffer signals end of stream.
    fn read_chunk(&mut self, max_frames: usize) -> Result<AudioBuffer>;
}

/// A push-based destination for audio chunks
pub trait AudioSink: Send {
    fn write_chunk(&mut self, chunk: &AudioBuffer) -> Result<()>;

    /// Flush and close; further writes are errors
    fn finalize(&mut self) -> Result<()>;
}

// ============================================================================
// Export Format
// ============================================================================

/// Output sample encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportFormat {
    /// Bit depth: 16, 24 (integer) or 32 (float)
    pub bit_depth: u16,
}

impl Default for ExportFormat {
    fn default() -> Self {
        ExportFormat { bit_depth: 24 }
    }
}

impl ExportFormat {
    pub fn new(bit_depth: u16) -> Result<Self> {
        match bit_depth {
            16 | 24 | 32 => Ok(ExportFormat { bit_depth }),
            _ => Err(MareaError::UnsupportedFormat {
                format: format!("{}-bit audio (only 16, 24, 32 supported)", bit_depth),
            }),
        }
    }

    /// hound spec for a stream with the given format
    pub fn wav_spec(&self, spec: SourceSpec) -> WavSpec {
        WavSpec {
            channels: spec.channels,
            sample_rate: spec.sample_rate,
            bits_per_sample: self.bit_depth,
            sample_format: if self.bit_depth == 32 {
                SampleFormat::Float
            } else {
                SampleFormat::Int
            },
        }
    }

    /// Matching PCM codec name for the external encoder
    pub fn pcm_codec(&self) -> &'static str {
        match self.bit_depth {
            16 => "pcm_s16le",
            32 => "pcm_f32le",
            _ => "pcm_s24le",
        }
    }
}

// ============================================================================
// WAV Sink
// ============================================================================

/// Streaming WAV writer
pub struct WavSink {
    writer: Option<WavWriter<BufWriter<File>>>,
    format: ExportFormat,
    path: PathBuf,
    frames_written: u64,
}

impl WavSink {
    /// Create (or truncate) the file at `path`
    pub fn create(path: &Path, spec: SourceSpec, format: ExportFormat) -> Result<Self> {
        let writer = WavWriter::create(path, format.wav_spec(spec))?;
        Ok(Self {
            writer: Some(writer),
            format,
            path: path.to_path_buf(),
            frames_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

impl AudioSink for WavSink {
    fn write_chunk(&mut self, chunk: &AudioBuffer) -> Result<()> {
        let writer = self.writer.as_mut().ok_or_else(|| MareaError::Processing {
            reason: format!("write after finalize: {}", self.path.display()),
        })?;

        let num_channels = chunk.num_channels();
        for i in 0..chunk.num_samples() {
            for ch in 0..num_channels {
                let sample = chunk.samples[ch][i];
                match self.format.bit_depth {
                    16 => {
                        let scaled = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
                        writer.write_sample(scaled)?;
                    }
                    24 => {
                        // 24-bit stored as i32 in hound
                        let scaled = (sample * 8388607.0).clamp(-8388608.0, 8388607.0) as i32;
                        writer.write_sample(scaled)?;
                    }
                    _ => writer.write_sample(sample)?,
                }
            }
        }
        self.frames_written += chunk.num_samples() as u64;
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer.finalize()?;
        }
        Ok(())
    }
}

// ============================================================================
// Whole-buffer helpers
// ============================================================================

/// Write a complete buffer to a WAV file
pub fn export_audio(buffer: &AudioBuffer, path: &Path, format: ExportFormat) -> Result<()> {
    let spec = SourceSpec::new(buffer.sample_rate, buffer.num_channels() as u16);
    let mut sink = WavSink::create(path, spec, format)?;
    sink.write_chunk(buffer)?;
    sink.finalize()
}

/// Generate a mono sine test tone
pub fn generate_test_tone(frequency: f32, duration_secs: f32, sample_rate: u32) -> AudioBuffer {
    let num_samples = (duration_secs * sample_rate as f32) as usize;
    let mut buffer = AudioBuffer::new(num_samples, ChannelLayout::Mono).with_sample_rate(sample_rate);

    let angular_freq = 2.0 * std::f32::consts::PI * frequency / sample_rate as f32;
    for (i, sample) in buffer.samples[0].iter_mut().enumerate() {
        *sample = 0.5 * (angular_freq * i as f32).sin();
    }

    buffer
}

/// Generate a stereo test tone with a different frequency per channel
pub fn generate_stereo_test_tone(
    freq_left: f32,
    freq_right: f32,
    duration_secs: f32,
    sample_rate: u32,
) -> AudioBuffer {
    let num_samples = (duration_secs * sample_rate as f32) as usize;
    let mut buffer =
        AudioBuffer::new(num_samples, ChannelLayout::Stereo).with_sample_rate(sample_rate);

    for (ch, freq) in [freq_left, freq_right].into_iter().enumerate() {
        let angular_freq = 2.0 * std::f32::consts::PI * freq / sample_rate as f32;
        for (i, sample) in buffer.samples[ch].iter_mut().enumerate() {
            *sample = 0.5 * (angular_freq * i as f32).sin();
        }
    }

    buffer
}

// ============================================================================
// Tests
// ============================================================================
