//! Effects Pipeline and streaming execution
//!
//! - `graph`: the persistent, tier-dependent effects graph
//! - `scheduler`: bounded chunk loop with cancellation
//! - `progress`: cadence-gated progress tracking and emission

pub mod graph;
pub mod progress;
pub mod scheduler;

pub use graph::{EffectsPipeline, Topology};
pub use progress::{ProgressCallback, ProgressEmitter, ProgressStage, ProgressTracker};
pub use scheduler::{ChunkProcessor, ChunkScheduler, Passthrough, ScheduleReport};
