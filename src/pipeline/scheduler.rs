//! Chunk scheduler
//!
//! Drives a source through a processor into a sink one bounded chunk at a
//! time. End of stream is an empty chunk that is still scheduled and still
//! completes, so the loop ends exactly when `eos && completed == scheduled`,
//! zero-length inputs included.

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::progress::ProgressTracker;
use crate::engine::{AudioBuffer, AudioSink, AudioSource};
use crate::error::{MareaError, Result};

/// A stage that transforms chunks in place
pub trait ChunkProcessor: Send {
    fn process_chunk(&mut self, chunk: &mut AudioBuffer) -> Result<()>;
}

/// Leaves chunks untouched
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl ChunkProcessor for Passthrough {
    fn process_chunk(&mut self, _chunk: &mut AudioBuffer) -> Result<()> {
        Ok(())
    }
}

/// What one scheduled render did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScheduleReport {
    /// Chunks completed, the end-of-stream chunk included
    pub chunks: u64,
    pub frames: u64,
    /// Largest chunk held at once, in bytes of sample data
    pub peak_chunk_bytes: usize,
}

/// Sequential chunk loop with cancellation and progress
#[derive(Debug, Clone)]
pub struct ChunkScheduler {
    chunk_frames: usize,
    cancel: CancellationToken,
    tracker: Option<Arc<ProgressTracker>>,
}

impl ChunkScheduler {
    pub fn new(chunk_frames: usize, cancel: CancellationToken) -> Self {
        Self {
            chunk_frames: chunk_frames.max(1),
            cancel,
            tracker: None,
        }
    }

    pub fn with_tracker(mut self, tracker: Arc<ProgressTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn chunk_frames(&self) -> usize {
        self.chunk_frames
    }

    /// Render `source` through `processor` into `sink` and finalize the sink
    pub fn run(
        &self,
        source: &mut dyn AudioSource,
        processor: &mut dyn ChunkProcessor,
        sink: &mut dyn AudioSink,
    ) -> Result<ScheduleReport> {
        let mut scheduled: u64 = 0;
        let mut completed: u64 = 0;
        let mut frames: u64 = 0;
        let mut peak_chunk_bytes = 0;
        let mut eos = false;

        loop {
            if self.cancel.is_cancelled() {
                debug!(completed, "Render cancelled between chunks");
                return Err(MareaError::Cancelled);
            }

            let mut chunk = source.read_chunk(self.chunk_frames)?;
            scheduled += 1;
            let len = chunk.num_samples();
            peak_chunk_bytes = peak_chunk_bytes.max(chunk.byte_len());
            if len == 0 {
                eos = true;
            }

            processor.process_chunk(&mut chunk)?;
            sink.write_chunk(&chunk)?;

            completed += 1;
            frames += len as u64;
            if let Some(tracker) = &self.tracker {
                tracker.record_chunk(len as u64);
            }

            if eos && completed == scheduled {
                break;
            }
        }

        sink.finalize()?;
        if let Some(tracker) = &self.tracker {
            tracker.finish();
        }

        debug!(chunks = completed, frames, peak_chunk_bytes, "Render finished");
        Ok(ScheduleReport {
            chunks: completed,
            frames,
            peak_chunk_bytes,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
