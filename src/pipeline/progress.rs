//! Progress reporting
//!
//! A [`ProgressTracker`] is fed by the render loop and publishes a snapshot
//! at a bounded cadence. A [`ProgressEmitter`] maps stage-local fractions to
//! overall session progress and forwards them to the caller's callback,
//! never decreasing and never after cancellation.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Caller-supplied progress callback
pub type ProgressCallback = Arc<dyn Fn(f32) + Send + Sync>;

// ============================================================================
// Stage Spans
// ============================================================================

/// Session phases that report progress
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStage {
    Validating,
    Converting,
    Effects,
    Mastering,
    Metadata,
}

impl ProgressStage {
    pub fn name(&self) -> &'static str {
        match self {
            ProgressStage::Validating => "validating",
            ProgressStage::Converting => "converting",
            ProgressStage::Effects => "effects",
            ProgressStage::Mastering => "mastering",
            ProgressStage::Metadata => "metadata",
        }
    }

    /// Share of overall progress owned by the stage
    pub fn span(&self) -> (f32, f32) {
        match self {
            ProgressStage::Validating => (0.0, 0.02),
            ProgressStage::Converting => (0.02, 0.05),
            ProgressStage::Effects => (0.05, 0.70),
            ProgressStage::Mastering => (0.70, 0.95),
            ProgressStage::Metadata => (0.95, 1.0),
        }
    }

    /// Overall progress for a stage-local fraction
    pub fn map(&self, fraction: f32) -> f32 {
        let (start, end) = self.span();
        let fraction = if fraction.is_nan() { 0.0 } else { fraction.clamp(0.0, 1.0) };
        start + (end - start) * fraction
    }
}

// ============================================================================
// Progress Tracker
// ============================================================================

/// Lock-free accumulator of work done by one stage
#[derive(Debug)]
pub struct ProgressTracker {
    total: u64,
    done: AtomicU64,
    chunks: AtomicU64,
    last_published_done: AtomicU64,
    last_published_chunks: AtomicU64,
    /// f32 bits of the last published fraction
    published: AtomicU32,
    step: f32,
    chunk_interval: u64,
}

impl ProgressTracker {
    /// `total` is in frames (or bytes for copies)
    pub fn new(total: u64, step: f32, chunk_interval: u32) -> Self {
        Self {
            total,
            done: AtomicU64::new(0),
            chunks: AtomicU64::new(0),
            last_published_done: AtomicU64::new(0),
            last_published_chunks: AtomicU64::new(0),
            published: AtomicU32::new(0.0_f32.to_bits()),
            step: if step.is_finite() && step > 0.0 { step } else { 0.05 },
            chunk_interval: u64::from(chunk_interval.max(1)),
        }
    }

    /// Record one completed chunk of `amount` units
    ///
    /// Publishes when the work since the last publish reaches the step, or
    /// after `chunk_interval` chunks, whichever comes first.
    pub fn record_chunk(&self, amount: u64) {
        let done = self.done.fetch_add(amount, Ordering::AcqRel) + amount;
        let chunks = self.chunks.fetch_add(1, Ordering::AcqRel) + 1;

        let step_units = ((self.total as f64) * self.step as f64).max(1.0) as u64;
        let since_done = done.saturating_sub(self.last_published_done.load(Ordering::Acquire));
        let since_chunks =
            chunks.saturating_sub(self.last_published_chunks.load(Ordering::Acquire));

        if since_done >= step_units || since_chunks >= self.chunk_interval {
            self.last_published_done.store(done, Ordering::Release);
            self.last_published_chunks.store(chunks, Ordering::Release);
            self.publish(self.fraction_of(done));
        }
    }

    /// Publish completion
    pub fn finish(&self) {
        self.publish(1.0);
    }

    /// Last published fraction in [0, 1]
    pub fn published(&self) -> f32 {
        f32::from_bits(self.published.load(Ordering::Acquire))
    }

    pub fn done(&self) -> u64 {
        self.done.load(Ordering::Acquire)
    }

    pub fn chunks(&self) -> u64 {
        self.chunks.load(Ordering::Acquire)
    }

    fn fraction_of(&self, done: u64) -> f32 {
        if self.total == 0 {
            return 0.0;
        }
        (done as f64 / self.total as f64).min(1.0) as f32
    }

    fn publish(&self, fraction: f32) {
        // Keep the snapshot monotonic under concurrent publishers
        let mut current = self.published.load(Ordering::Acquire);
        while f32::from_bits(current) < fraction {
            match self.published.compare_exchange_weak(
                current,
                fraction.to_bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }
}

// ============================================================================
// Progress Emitter
// ============================================================================

/// Forwards overall progress to the caller
pub struct ProgressEmitter {
    callback: Option<ProgressCallback>,
    /// Last emitted value; the lock also serializes callback invocations
    last: Mutex<f32>,
    closed: AtomicBool,
    /// Set once the session is past the point where a cancel can act
    sealed: AtomicBool,
    cancel: CancellationToken,
}

impl ProgressEmitter {
    pub fn new(callback: Option<ProgressCallback>, cancel: CancellationToken) -> Self {
        Self {
            callback,
            last: Mutex::new(0.0),
            closed: AtomicBool::new(false),
            sealed: AtomicBool::new(false),
            cancel,
        }
    }

    /// Emitter with no callback
    pub fn silent() -> Self {
        Self::new(None, CancellationToken::new())
    }

    /// Emit `value` if it advances progress
    pub fn emit(&self, value: f32) {
        if self.is_silenced() {
            return;
        }
        let value = if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) };
        let mut last = self.last.lock().unwrap_or_else(|p| p.into_inner());
        if value <= *last {
            return;
        }
        // Re-check under the lock so nothing slips out after close()
        if self.is_silenced() {
            return;
        }
        *last = value;
        if let Some(callback) = &self.callback {
            callback(value);
        }
    }

    /// Emit a stage-local fraction
    pub fn emit_stage(&self, stage: ProgressStage, fraction: f32) {
        self.emit(stage.map(fraction));
    }

    fn is_silenced(&self) -> bool {
        self.closed.load(Ordering::Acquire)
            || (self.cancel.is_cancelled() && !self.sealed.load(Ordering::Acquire))
    }

    /// Decide cancellation for good
    ///
    /// Returns false if the session was already cancelled or closed. After a
    /// successful seal later cancels no longer silence the emitter, so the
    /// session that commits its output still reports 1.0.
    pub fn seal(&self) -> bool {
        let _guard = self.last.lock().unwrap_or_else(|p| p.into_inner());
        if self.closed.load(Ordering::Acquire) || self.cancel.is_cancelled() {
            return false;
        }
        self.sealed.store(true, Ordering::Release);
        true
    }

    /// Emit exactly 1.0 and stop
    pub fn complete(&self) {
        self.emit(1.0);
        self.close();
    }

    /// Stop emitting
    pub fn close(&self) {
        let _guard = self.last.lock().unwrap_or_else(|p| p.into_inner());
        self.closed.store(true, Ordering::Release);
    }

    /// Last value emitted
    pub fn last(&self) -> f32 {
        *self.last.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl std::fmt::Debug for ProgressEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressEmitter")
            .field("last", &self.last())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .field("sealed", &self.sealed.load(Ordering::Relaxed))
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
