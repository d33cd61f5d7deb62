//! Engine configuration
//!
//! Defaults are compiled in, an optional JSON file overrides them, and
//! `MAREA_*` environment variables override the file.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{MareaError, Result};

// ============================================================================
// Constants
// ============================================================================

const MIB: u64 = 1024 * 1024;

/// Model identifier prefixes that stall or crash the in-process graph:
/// dual-core Intel Macs that shipped with 4 GiB or less. An empty
/// `MAREA_PROBLEMATIC_HARDWARE` clears the list.
pub const DEFAULT_PROBLEMATIC_HARDWARE: [&str; 7] = [
    "MacBookAir6,",
    "MacBookAir7,",
    "MacBook8,",
    "MacBook9,",
    "MacBook10,",
    "Macmini6,",
    "iMac14,",
];

/// Well-known install locations of the external encoder
pub const DEFAULT_ENCODER_PATHS: [&str; 2] = ["/opt/homebrew/bin/ffmpeg", "/usr/local/bin/ffmpeg"];

// ============================================================================
// Sections
// ============================================================================

/// Chunked rendering and progress cadence
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChunkConfig {
    /// Base chunk size in frames
    pub base_frames: usize,
    /// Available memory at or above which Full tier doubles the chunk size
    pub abundant_memory_bytes: u64,
    /// Publish progress after this fraction of the total has been written
    pub progress_step: f32,
    /// ...or after this many completed chunks, whichever comes first
    pub progress_chunk_interval: u32,
    /// Polling interval of the progress task
    pub poll_interval_ms: u64,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            base_frames: 4096,
            abundant_memory_bytes: 4 * 1024 * MIB,
            progress_step: 0.05,
            progress_chunk_interval: 100,
            poll_interval_ms: 100,
        }
    }
}

/// Tier selection thresholds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PolicyConfig {
    pub critical_floor_bytes: u64,
    pub soft_floor_bytes: u64,
    /// Model identifier prefixes of hardware known to misbehave with the
    /// in-process graph
    pub problematic_hardware: Vec<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            critical_floor_bytes: 150 * MIB,
            soft_floor_bytes: 1024 * MIB,
            problematic_hardware: DEFAULT_PROBLEMATIC_HARDWARE
                .iter()
                .map(|model| model.to_string())
                .collect(),
        }
    }
}

/// Asset cache sizing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub capacity: usize,
    pub memory_check_interval_secs: u64,
    /// Clear the whole cache when available memory drops below this
    pub pressure_threshold_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 8,
            memory_check_interval_secs: 30,
            pressure_threshold_bytes: 512 * MIB,
        }
    }
}

/// Per-stage time budgets
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimeoutConfig {
    pub realtime_multiplier: f64,
    pub floor_secs: u64,
    pub ceiling_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            realtime_multiplier: 2.0,
            floor_secs: 30,
            ceiling_secs: 300,
        }
    }
}

impl TimeoutConfig {
    /// Budget for one stage over media of the given duration
    pub fn budget_for(&self, media_secs: f64) -> Duration {
        let floor = self.floor_secs as f64;
        let ceiling = (self.ceiling_secs as f64).max(floor);
        let scaled = if media_secs.is_finite() {
            media_secs.max(0.0) * self.realtime_multiplier
        } else {
            ceiling
        };
        Duration::from_secs_f64(scaled.clamp(floor, ceiling))
    }
}

/// External encoder discovery
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExternalConfig {
    pub encoder_paths: Vec<PathBuf>,
}

impl Default for ExternalConfig {
    fn default() -> Self {
        Self {
            encoder_paths: DEFAULT_ENCODER_PATHS.iter().map(PathBuf::from).collect(),
        }
    }
}

/// Output container settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    /// 16, 24 or 32 (float)
    pub bit_depth: u16,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { bit_depth: 24 }
    }
}

// ============================================================================
// Engine Configuration
// ============================================================================

/// Complete engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub chunk: ChunkConfig,
    pub policy: PolicyConfig,
    pub cache: CacheConfig,
    pub timeouts: TimeoutConfig,
    pub external: ExternalConfig,
    pub output: OutputConfig,
}

impl EngineConfig {
    /// Load configuration from an optional JSON file, then apply environment
    /// overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| MareaError::Config {
            reason: format!("cannot read {}: {}", path.display(), e),
        })?;
        serde_json::from_str(&text).map_err(|e| MareaError::Config {
            reason: format!("invalid JSON in {}: {}", path.display(), e),
        })
    }

    /// Apply `MAREA_*` environment variables
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("MAREA_CHUNK_FRAMES") {
            self.chunk.base_frames = parse_var("MAREA_CHUNK_FRAMES", &v)?;
        }
        if let Some(v) = lookup("MAREA_SOFT_FLOOR_MB") {
            self.policy.soft_floor_bytes = parse_mib("MAREA_SOFT_FLOOR_MB", &v)?;
        }
        if let Some(v) = lookup("MAREA_CRITICAL_FLOOR_MB") {
            self.policy.critical_floor_bytes = parse_mib("MAREA_CRITICAL_FLOOR_MB", &v)?;
        }
        if let Some(v) = lookup("MAREA_PROBLEMATIC_HARDWARE") {
            self.policy.problematic_hardware = split_list(&v);
        }
        if let Some(v) = lookup("MAREA_ENCODER_PATHS") {
            self.external.encoder_paths = split_list(&v).into_iter().map(PathBuf::from).collect();
        }
        if let Some(v) = lookup("MAREA_TIMEOUT_CEILING_SECS") {
            self.timeouts.ceiling_secs = parse_var("MAREA_TIMEOUT_CEILING_SECS", &v)?;
        }
        if let Some(v) = lookup("MAREA_BIT_DEPTH") {
            self.output.bit_depth = parse_var("MAREA_BIT_DEPTH", &v)?;
        }
        Ok(())
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.chunk.base_frames < 64 {
            return Err(MareaError::Config {
                reason: format!(
                    "chunk.base_frames must be at least 64, got {}",
                    self.chunk.base_frames
                ),
            });
        }
        if !matches!(self.output.bit_depth, 16 | 24 | 32) {
            return Err(MareaError::Config {
                reason: format!(
                    "output.bit_depth must be 16, 24 or 32, got {}",
                    self.output.bit_depth
                ),
            });
        }
        if self.policy.critical_floor_bytes > self.policy.soft_floor_bytes {
            return Err(MareaError::Config {
                reason: "policy.critical_floor_bytes exceeds policy.soft_floor_bytes".to_string(),
            });
        }
        if self.cache.capacity == 0 {
            return Err(MareaError::Config {
                reason: "cache.capacity must be at least 1".to_string(),
            });
        }
        debug!(config = ?self, "configuration validated");
        Ok(())
    }

    /// Progress polling interval
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.chunk.poll_interval_ms.max(1))
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| MareaError::Config {
        reason: format!("{} has invalid value '{}'", key, value),
    })
}

/// Parse a MiB count into bytes
fn parse_mib(key: &str, value: &str) -> Result<u64> {
    parse_var::<u64>(key, value)?
        .checked_mul(MIB)
        .ok_or_else(|| MareaError::Config {
            reason: format!("{} is too large: '{}' MiB", key, value),
        })
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.chunk.base_frames, 4096);
        assert_eq!(config.cache.capacity, 8);
        assert_eq!(config.policy.critical_floor_bytes, 150 * MIB);
        assert_eq!(config.cache.pressure_threshold_bytes, 512 * MIB);
        assert_eq!(config.external.encoder_paths.len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_budget_is_clamped() {
        let timeouts = TimeoutConfig::default();
        assert_eq!(timeouts.budget_for(2.0), Duration::from_secs(30));
        assert_eq!(timeouts.budget_for(60.0), Duration::from_secs(120));
        assert_eq!(timeouts.budget_for(3600.0), Duration::from_secs(300));
        assert_eq!(timeouts.budget_for(f64::NAN), Duration::from_secs(300));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = EngineConfig::default();
        config
            .apply_overrides(lookup(&[
                ("MAREA_CHUNK_FRAMES", "2048"),
                ("MAREA_SOFT_FLOOR_MB", "2048"),
                ("MAREA_PROBLEMATIC_HARDWARE", "MacBookPro11, iMac14 ,"),
                ("MAREA_ENCODER_PATHS", "/usr/bin/ffmpeg"),
            ]))
            .unwrap();

        assert_eq!(config.chunk.base_frames, 2048);
        assert_eq!(config.policy.soft_floor_bytes, 2048 * MIB);
        assert_eq!(
            config.policy.problematic_hardware,
            vec!["MacBookPro11".to_string(), "iMac14".to_string()]
        );
        assert_eq!(
            config.external.encoder_paths,
            vec![PathBuf::from("/usr/bin/ffmpeg")]
        );
    }

    #[test]
    fn test_default_hardware_list_flags_known_models() {
        use crate::policy::HardwareToken;

        let prefixes = EngineConfig::default().policy.problematic_hardware;
        assert_eq!(prefixes.len(), DEFAULT_PROBLEMATIC_HARDWARE.len());
        assert!(HardwareToken::classify(Some("MacBookAir7,2".into()), &prefixes).is_problematic());
        assert!(HardwareToken::classify(Some("iMac14,1".into()), &prefixes).is_problematic());
        // Prefixes end at the comma so later generations do not match
        assert!(!HardwareToken::classify(Some("iMac141,1".into()), &prefixes).is_problematic());
        assert!(!HardwareToken::classify(Some("Mac14,2".into()), &prefixes).is_problematic());
        assert!(!HardwareToken::classify(None, &prefixes).is_problematic());
    }

    #[test]
    fn test_empty_hardware_override_clears_defaults() {
        let mut config = EngineConfig::default();
        config
            .apply_overrides(lookup(&[("MAREA_PROBLEMATIC_HARDWARE", "")]))
            .unwrap();
        assert!(config.policy.problematic_hardware.is_empty());
    }

    #[test]
    fn test_oversized_mib_value_is_config_error() {
        let mut config = EngineConfig::default();
        let huge = u64::MAX.to_string();
        let err = config
            .apply_overrides(lookup(&[("MAREA_SOFT_FLOOR_MB", huge.as_str())]))
            .unwrap_err();
        assert_eq!(err.error_code(), "CONFIG_ERROR");

        let err = config
            .apply_overrides(lookup(&[("MAREA_CRITICAL_FLOOR_MB", "17592186044416")]))
            .unwrap_err();
        assert!(matches!(err, MareaError::Config { .. }));
        assert_eq!(config.policy.soft_floor_bytes, 1024 * MIB);
    }

    #[test]
    fn test_invalid_env_value() {
        let mut config = EngineConfig::default();
        let err = config
            .apply_overrides(lookup(&[("MAREA_CHUNK_FRAMES", "lots")]))
            .unwrap_err();
        assert_eq!(err.error_code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_partial_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("marea.json");
        std::fs::write(&path, r#"{ "output": { "bit_depth": 16 }, "cache": { "capacity": 2 } }"#)
            .unwrap();

        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.output.bit_depth, 16);
        assert_eq!(config.cache.capacity, 2);
        assert_eq!(config.chunk, ChunkConfig::default());
    }

    #[test]
    fn test_validate_rejects_bad_bit_depth() {
        let mut config = EngineConfig::default();
        config.output.bit_depth = 12;
        assert!(config.validate().is_err());
    }
}
