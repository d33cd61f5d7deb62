//! Audio decoder using symphonia
//!
//! [`DecodedSource`] decodes packet by packet and keeps at most one decoded
//! packet beyond the chunk being handed out. [`probe_asset`] validates an
//! input and gathers what the pipeline needs to plan a render without
//! decoding any audio.

use std::fs::File;
use std::path::{Path, PathBuf};

use serde::Serialize;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

use crate::engine::buffer::AudioBuffer;
use crate::engine::io::{AudioSource, SourceSpec, SUPPORTED_EXTENSIONS};
use crate::error::{MareaError, Result};

// ============================================================================
// Asset probing
// ============================================================================

/// Everything known about an input before rendering starts
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudioAsset {
    pub path: PathBuf,
    /// Lowercase container extension
    pub format: String,
    pub spec: SourceSpec,
    pub total_frames: u64,
    pub byte_len: u64,
}

impl AudioAsset {
    pub fn duration_secs(&self) -> f64 {
        if self.spec.sample_rate == 0 {
            return 0.0;
        }
        self.total_frames as f64 / self.spec.sample_rate as f64
    }
}

/// Check existence, size and container of an input file
///
/// Returns the lowercase extension and the byte length.
pub fn validate_input(path: &Path) -> Result<(String, u64)> {
    let metadata = std::fs::metadata(path).map_err(|_| MareaError::FileNotFound {
        path: path.display().to_string(),
    })?;
    if !metadata.is_file() {
        return Err(MareaError::FileNotFound {
            path: path.display().to_string(),
        });
    }
    if metadata.len() == 0 {
        return Err(MareaError::EmptyFile {
            path: path.display().to_string(),
        });
    }

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if !SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(MareaError::UnsupportedFormat {
            format: if ext.is_empty() {
                "file without extension".to_string()
            } else {
                format!(".{}", ext)
            },
        });
    }

    Ok((ext, metadata.len()))
}

/// Validate and probe an input without decoding its audio
pub fn probe_asset(path: &Path) -> Result<AudioAsset> {
    let (format, byte_len) = validate_input(path)?;
    let source = DecodedSource::open(path)?;

    let asset = AudioAsset {
        path: path.to_path_buf(),
        format,
        spec: source.spec(),
        total_frames: source.total_frames(),
        byte_len,
    };
    debug!(
        path = %path.display(),
        sample_rate = asset.spec.sample_rate,
        channels = asset.spec.channels,
        frames = asset.total_frames,
        "probed asset"
    );
    Ok(asset)
}

// ============================================================================
// Decoded Source
// ============================================================================

/// Chunked decoder over a file
pub struct DecodedSource {
    path: PathBuf,
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    spec: SourceSpec,
    total_frames: u64,
    /// Interleaved samples of the last decoded packet not yet handed out
    pending: Vec<f32>,
    pending_pos: usize,
    sample_buf: Option<SampleBuffer<f32>>,
    sample_buf_frames: u64,
    finished: bool,
}

impl DecodedSource {
    /// Open a file and prepare its first audio track for decoding
    pub fn open(path: &Path) -> Result<Self> {
        let (format, track_id, params) = open_format(path)?;

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| unreadable(path, "no decoder for codec", e))?;

        let declared_spec = match (params.sample_rate, params.channels) {
            (Some(rate), Some(channels)) => Some(SourceSpec::new(rate, channels.count() as u16)),
            _ => None,
        };

        let mut source = Self {
            path: path.to_path_buf(),
            format,
            decoder,
            track_id,
            spec: declared_spec.unwrap_or(SourceSpec::new(0, 0)),
            total_frames: 0,
            pending: Vec::new(),
            pending_pos: 0,
            sample_buf: None,
            sample_buf_frames: 0,
            finished: false,
        };

        // Some codecs only reveal their layout in the first decoded packet
        if declared_spec.is_none() {
            match source.decode_next()? {
                Some(spec) => source.spec = spec,
                None => {
                    return Err(MareaError::NoAudioTrack {
                        path: path.display().to_string(),
                    })
                }
            }
        }
        source.spec.layout()?;

        source.total_frames = match params.n_frames {
            Some(frames) => frames,
            None => count_frames(path)?,
        };

        Ok(source)
    }

    /// Override the frame count (e.g. with a cached probe result)
    pub fn with_total_frames(mut self, total_frames: u64) -> Self {
        self.total_frames = total_frames;
        self
    }

    /// Decode the next packet of our track into `pending`
    ///
    /// Returns the decoded signal spec, or None at end of stream.
    fn decode_next(&mut self) -> Result<Option<SourceSpec>> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(SymphoniaError::ResetRequired) => return Ok(None),
                Err(e) => return Err(unreadable(&self.path, "failed to read packet", e)),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    let signal = *decoded.spec();
                    let frames = decoded.capacity() as u64;
                    if self.sample_buf.is_none() || self.sample_buf_frames < frames {
                        self.sample_buf = Some(SampleBuffer::<f32>::new(frames, signal));
                        self.sample_buf_frames = frames;
                    }
                    if let Some(buf) = self.sample_buf.as_mut() {
                        buf.copy_interleaved_ref(decoded);
                        self.pending.clear();
                        self.pending.extend_from_slice(buf.samples());
                        self.pending_pos = 0;
                    }
                    return Ok(Some(SourceSpec::new(
                        signal.rate,
                        signal.channels.count() as u16,
                    )));
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!(path = %self.path.display(), "skipping undecodable packet: {}", e);
                    continue;
                }
                Err(e) => return Err(unreadable(&self.path, "decode failed", e)),
            }
        }
    }
}

impl AudioSource for DecodedSource {
    fn spec(&self) -> SourceSpec {
        self.spec
    }

    fn total_frames(&self) -> u64 {
        self.total_frames
    }

    fn read_chunk(&mut self, max_frames: usize) -> Result<AudioBuffer> {
        let layout = self.spec.layout()?;
        let channels = layout.num_channels();
        let wanted = max_frames * channels;
        let mut chunk = AudioBuffer::try_with_capacity(max_frames, layout, self.spec.sample_rate)?;
        let mut taken = 0;

        while taken < wanted {
            if self.pending_pos < self.pending.len() {
                let available = self.pending.len() - self.pending_pos;
                // Whole frames only
                let n = available.min(wanted - taken) / channels * channels;
                if n == 0 {
                    self.pending_pos = self.pending.len();
                    continue;
                }
                chunk.extend_interleaved(&self.pending[self.pending_pos..self.pending_pos + n]);
                self.pending_pos += n;
                taken += n;
                continue;
            }
            if self.finished {
                break;
            }
            if self.decode_next()?.is_none() {
                self.finished = true;
            }
        }

        Ok(chunk)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn unreadable(path: &Path, what: &str, e: SymphoniaError) -> MareaError {
    MareaError::UnreadableInput {
        path: path.display().to_string(),
        reason: format!("{}: {}", what, e),
        source: Some(Box::new(e)),
    }
}

fn open_format(
    path: &Path,
) -> Result<(Box<dyn FormatReader>, u32, symphonia::core::codecs::CodecParameters)> {
    let file = File::open(path).map_err(|_| MareaError::FileNotFound {
        path: path.display().to_string(),
    })?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| unreadable(path, "unrecognised container", e))?;

    let format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| MareaError::NoAudioTrack {
            path: path.display().to_string(),
        })?;
    let track_id = track.id;
    let params = track.codec_params.clone();

    Ok((format, track_id, params))
}

/// Count frames by walking packet durations when the container does not
/// declare a length
fn count_frames(path: &Path) -> Result<u64> {
    let (mut format, track_id, _) = open_format(path)?;
    let mut frames = 0u64;
    loop {
        match format.next_packet() {
            Ok(packet) if packet.track_id() == track_id => frames += packet.dur,
            Ok(_) => continue,
            Err(SymphoniaError::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(unreadable(path, "failed to count frames", e)),
        }
    }
    debug!(path = %path.display(), frames, "counted frames");
    Ok(frames)
}

// ============================================================================
// Tests
// ============================================================================
