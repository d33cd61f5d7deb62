//! Memory telemetry
//!
//! A probe reports (used, available) bytes. A probe that cannot read the
//! system reports nothing, which callers treat as plentiful memory.

use serde::{Deserialize, Serialize};
use std::fs;

/// Bytes in one mebibyte
pub const MIB: u64 = 1024 * 1024;

/// Point-in-time memory reading
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemorySnapshot {
    pub used_bytes: u64,
    pub available_bytes: u64,
}

impl MemorySnapshot {
    /// Reading used when the probe fails
    pub fn plentiful() -> Self {
        Self {
            used_bytes: 0,
            available_bytes: u64::MAX,
        }
    }

    pub fn available_mib(&self) -> u64 {
        self.available_bytes / MIB
    }
}

/// Source of memory readings
pub trait MemoryProbe: Send + Sync {
    /// `None` when the reading is unavailable
    fn snapshot(&self) -> Option<MemorySnapshot>;

    /// Reading with failure mapped to plentiful
    fn snapshot_or_plentiful(&self) -> MemorySnapshot {
        self.snapshot().unwrap_or_else(MemorySnapshot::plentiful)
    }
}

// ============================================================================
// System Probe
// ============================================================================

/// Reads `/proc/meminfo` on Linux; reports nothing elsewhere
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemMemoryProbe;

impl MemoryProbe for SystemMemoryProbe {
    fn snapshot(&self) -> Option<MemorySnapshot> {
        let text = fs::read_to_string("/proc/meminfo").ok()?;
        parse_meminfo(&text)
    }
}

/// Parse `MemTotal` and `MemAvailable` (kB) from meminfo text
pub fn parse_meminfo(text: &str) -> Option<MemorySnapshot> {
    let field = |name: &str| -> Option<u64> {
        text.lines()
            .find(|line| line.starts_with(name))?
            .split_whitespace()
            .nth(1)?
            .parse::<u64>()
            .ok()
            .map(|kb| kb * 1024)
    };

    let total = field("MemTotal:")?;
    let available = field("MemAvailable:").or_else(|| field("MemFree:"))?;
    Some(MemorySnapshot {
        used_bytes: total.saturating_sub(available),
        available_bytes: available,
    })
}

// ============================================================================
// Static Probe
// ============================================================================

/// Fixed reading, for tests and forced tiers
#[derive(Debug, Clone, Copy)]
pub struct StaticMemoryProbe(pub Option<MemorySnapshot>);

impl StaticMemoryProbe {
    pub fn available(bytes: u64) -> Self {
        Self(Some(MemorySnapshot {
            used_bytes: 0,
            available_bytes: bytes,
        }))
    }

    pub fn failing() -> Self {
        Self(None)
    }
}

impl MemoryProbe for StaticMemoryProbe {
    fn snapshot(&self) -> Option<MemorySnapshot> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MEMINFO: &str = "MemTotal:       16314352 kB\n\
                           MemFree:         1203940 kB\n\
                           MemAvailable:    9823412 kB\n\
                           Buffers:          512000 kB\n";

    #[test]
    fn test_parse_meminfo() {
        let snap = parse_meminfo(MEMINFO).unwrap();
        assert_eq!(snap.available_bytes, 9_823_412 * 1024);
        assert_eq!(snap.used_bytes, (16_314_352 - 9_823_412) * 1024);
    }

    #[test]
    fn test_parse_meminfo_falls_back_to_free() {
        let text = "MemTotal: 1000 kB\nMemFree: 400 kB\n";
        assert_eq!(parse_meminfo(text).unwrap().available_bytes, 400 * 1024);
        assert!(parse_meminfo("garbage").is_none());
    }

    #[test]
    fn test_failing_probe_is_plentiful() {
        let probe = StaticMemoryProbe::failing();
        assert_eq!(probe.snapshot_or_plentiful(), MemorySnapshot::plentiful());
    }
}
