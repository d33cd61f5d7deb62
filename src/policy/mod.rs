//! Hardware/Memory Policy
//!
//! Memory telemetry and hardware capability probing feed the tier ladder
//! that decides how much processing each file receives.

pub mod hardware;
pub mod memory;
pub mod tier;

pub use hardware::{
    CapabilityProbe, HardwareClass, HardwareToken, StaticCapabilityProbe, SystemCapabilityProbe,
};
pub use memory::{MemoryProbe, MemorySnapshot, StaticMemoryProbe, SystemMemoryProbe};
pub use tier::{chunk_frames_for, select_tier, HardwarePolicy, ProcessingTier, TierDecision};
