//! Processing tier selection
//!
//! Chooses how much processing a file gets from the memory headroom and the
//! hardware class, sizes the render chunks, and maps recoverable errors to
//! the next tier down.

use super::hardware::{CapabilityProbe, HardwareToken};
use super::memory::{MemoryProbe, MIB};
use crate::config::{ChunkConfig, PolicyConfig};
use crate::error::{ErrorKind, MareaError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Smallest chunk the scheduler will be asked to render
const MIN_CHUNK_FRAMES: usize = 64;

// ============================================================================
// Processing Tier
// ============================================================================

/// How a file is processed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingTier {
    /// Complete in-process effects graph plus in-process mastering
    Full,
    /// Unity mix-out only, in-process mastering
    Simplified,
    /// Effects and mastering delegated to the external encoder
    ExternalTool,
    /// Byte-for-byte copy
    Bypass,
}

impl ProcessingTier {
    /// Next tier down, `None` below Bypass
    pub fn downgrade(&self) -> Option<ProcessingTier> {
        match self {
            ProcessingTier::Full => Some(ProcessingTier::Simplified),
            ProcessingTier::ExternalTool => Some(ProcessingTier::Simplified),
            ProcessingTier::Simplified => Some(ProcessingTier::Bypass),
            ProcessingTier::Bypass => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ProcessingTier::Full => "full",
            ProcessingTier::Simplified => "simplified",
            ProcessingTier::ExternalTool => "external_tool",
            ProcessingTier::Bypass => "bypass",
        }
    }
}

impl std::fmt::Display for ProcessingTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Tier ladder, evaluated top-down
pub fn select_tier(
    available_bytes: u64,
    hardware: &HardwareToken,
    policy: &PolicyConfig,
) -> ProcessingTier {
    if hardware.is_problematic() && available_bytes < policy.critical_floor_bytes {
        ProcessingTier::Bypass
    } else if hardware.is_problematic() {
        ProcessingTier::ExternalTool
    } else if available_bytes < policy.soft_floor_bytes {
        ProcessingTier::Simplified
    } else {
        ProcessingTier::Full
    }
}

/// Chunk size for a tier
pub fn chunk_frames_for(tier: ProcessingTier, available_bytes: u64, chunk: &ChunkConfig) -> usize {
    let base = chunk.base_frames.max(MIN_CHUNK_FRAMES);
    match tier {
        ProcessingTier::Simplified => (base / 2).max(MIN_CHUNK_FRAMES),
        ProcessingTier::Full if available_bytes >= chunk.abundant_memory_bytes => base * 2,
        _ => base,
    }
}

// ============================================================================
// Hardware Policy
// ============================================================================

/// Outcome of one policy evaluation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TierDecision {
    pub tier: ProcessingTier,
    pub available_bytes: u64,
    pub hardware: HardwareToken,
    pub chunk_frames: usize,
}

impl TierDecision {
    /// Same telemetry, different tier
    pub fn with_tier(&self, tier: ProcessingTier, chunk: &ChunkConfig) -> Self {
        Self {
            tier,
            available_bytes: self.available_bytes,
            hardware: self.hardware.clone(),
            chunk_frames: chunk_frames_for(tier, self.available_bytes, chunk),
        }
    }
}

/// Combines memory and capability probes into tier decisions
#[derive(Clone)]
pub struct HardwarePolicy {
    policy: PolicyConfig,
    chunk: ChunkConfig,
    memory: Arc<dyn MemoryProbe>,
    capability: Arc<dyn CapabilityProbe>,
}

impl HardwarePolicy {
    pub fn new(
        policy: PolicyConfig,
        chunk: ChunkConfig,
        memory: Arc<dyn MemoryProbe>,
        capability: Arc<dyn CapabilityProbe>,
    ) -> Self {
        Self {
            policy,
            chunk,
            memory,
            capability,
        }
    }

    /// Sample both probes once and pick a tier
    pub fn evaluate(&self) -> TierDecision {
        let available_bytes = self.memory.snapshot_or_plentiful().available_bytes;
        let hardware = self.capability.probe();
        let tier = select_tier(available_bytes, &hardware, &self.policy);
        let decision = TierDecision {
            tier,
            available_bytes,
            chunk_frames: chunk_frames_for(tier, available_bytes, &self.chunk),
            hardware,
        };
        info!(
            tier = %decision.tier,
            available_mib = decision.available_bytes / MIB,
            chunk_frames = decision.chunk_frames,
            "Selected processing tier"
        );
        decision
    }

    /// Next tier after `error` at `tier`
    ///
    /// Resource and external tool errors step down one tier; everything else,
    /// or an error at the lowest tier, is returned unchanged.
    pub fn fallback(&self, tier: ProcessingTier, error: MareaError) -> Result<ProcessingTier> {
        match error.kind() {
            ErrorKind::Resource | ErrorKind::ExternalTool => match tier.downgrade() {
                Some(next) => {
                    warn!(from = %tier, to = %next, error = %error, "Falling back to a lower tier");
                    Ok(next)
                }
                None => Err(error),
            },
            _ => Err(error),
        }
    }

    pub fn chunk_config(&self) -> &ChunkConfig {
        &self.chunk
    }

    pub fn memory_probe(&self) -> Arc<dyn MemoryProbe> {
        Arc::clone(&self.memory)
    }
}

impl std::fmt::Debug for HardwarePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HardwarePolicy")
            .field("policy", &self.policy)
            .field("chunk", &self.chunk)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
