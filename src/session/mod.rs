//! Processing sessions
//!
//! - `state`: the validated stage machine
//! - `staging`: session-owned intermediate files
//! - `engine`: the orchestrator driving one session per file

pub mod engine;
pub mod staging;
pub mod state;

pub use engine::{
    sha256_file, Engine, EngineBuilder, ProcessRequest, SessionOutcome, TierFallback,
};
pub use staging::{copy_streamed, StagingFiles};
pub use state::{SessionStage, StageMachine, StageRecord};
