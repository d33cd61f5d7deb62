//! Audio Engine Module
//!
//! Core audio plumbing:
//! - Audio buffer management
//! - Chunked decoding of input files
//! - Streaming WAV output

pub mod buffer;
pub mod decode;
pub mod io;

pub use buffer::{AudioBuffer, ChannelLayout};
pub use decode::{probe_asset, validate_input, AudioAsset, DecodedSource};
pub use io::{
    export_audio, generate_stereo_test_tone, generate_test_tone, AudioSink, AudioSource,
    ExportFormat, SourceSpec, WavSink,
};
