//! Marea - Batch Audio Transformation Engine
//!
//! Marea renders audio files through a lunar-seeded effects pipeline and a
//! fixed mastering chain, then embeds tags and cover art.
//!
//! # Architecture
//!
//! Each file runs as one session through a validated stage machine:
//! - Validating: probe the input (through the shared asset cache)
//! - Converting: pick the processing tier, parameters and time budgets
//! - ApplyingEffects: stream chunks through the tier's effects graph
//! - Mastering: in-process chain, external encoder, or skipped
//! - EmbeddingMetadata: ID3v2 tags and cover, then an atomic commit
//!
//! Memory telemetry and a hardware probe choose between the Full,
//! ExternalTool, Simplified and Bypass tiers; recoverable failures step down
//! the ladder instead of failing the file.

pub mod cache;
pub mod cli;
pub mod config;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod mastering;
pub mod metadata;
pub mod params;
pub mod pipeline;
pub mod policy;
pub mod session;

pub use config::EngineConfig;
pub use error::{ErrorKind, MareaError, Result};
pub use params::{NaturalParameterGenerator, ProcessingParameters};
pub use pipeline::ProgressCallback;
pub use policy::ProcessingTier;
pub use session::{Engine, EngineBuilder, ProcessRequest, SessionOutcome, SessionStage};
