//! Hardware capability probe
//!
//! Identifies the machine model and classifies it against a list of
//! known-problematic model prefixes.

use serde::{Deserialize, Serialize};
use std::fs;
use std::process::Command;
use tracing::debug;

/// Capability class of the host
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HardwareClass {
    Standard,
    /// Model known to misbehave under the in-process effects engine
    Problematic,
}

/// Opaque description of the host
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HardwareToken {
    /// Model identifier, when one could be read
    pub model: Option<String>,
    pub class: HardwareClass,
}

impl HardwareToken {
    pub fn standard() -> Self {
        Self {
            model: None,
            class: HardwareClass::Standard,
        }
    }

    pub fn problematic(model: impl Into<String>) -> Self {
        Self {
            model: Some(model.into()),
            class: HardwareClass::Problematic,
        }
    }

    pub fn is_problematic(&self) -> bool {
        self.class == HardwareClass::Problematic
    }

    /// Classify `model` against known-problematic prefixes
    pub fn classify(model: Option<String>, problematic_prefixes: &[String]) -> Self {
        let class = match &model {
            Some(m) if problematic_prefixes.iter().any(|p| !p.is_empty() && m.starts_with(p.as_str())) => {
                HardwareClass::Problematic
            }
            _ => HardwareClass::Standard,
        };
        Self { model, class }
    }
}

/// Source of hardware tokens
pub trait CapabilityProbe: Send + Sync {
    fn probe(&self) -> HardwareToken;
}

// ============================================================================
// System Probe
// ============================================================================

/// Reads the model via `sysctl hw.model` (macOS) or DMI (Linux)
#[derive(Debug, Clone, Default)]
pub struct SystemCapabilityProbe {
    problematic_prefixes: Vec<String>,
}

impl SystemCapabilityProbe {
    pub fn new(problematic_prefixes: Vec<String>) -> Self {
        Self {
            problematic_prefixes,
        }
    }

    fn read_sysctl_model() -> Option<String> {
        let output = Command::new("sysctl").args(["-n", "hw.model"]).output().ok()?;
        if !output.status.success() {
            return None;
        }
        let model = String::from_utf8_lossy(&output.stdout).trim().to_string();
        (!model.is_empty()).then_some(model)
    }

    fn read_dmi_model() -> Option<String> {
        let model = fs::read_to_string("/sys/devices/virtual/dmi/id/product_name").ok()?;
        let model = model.trim().to_string();
        (!model.is_empty()).then_some(model)
    }

    /// Model identifier of this machine
    pub fn model_identifier() -> Option<String> {
        if cfg!(target_os = "macos") {
            Self::read_sysctl_model()
        } else {
            Self::read_dmi_model()
        }
    }
}

impl CapabilityProbe for SystemCapabilityProbe {
    fn probe(&self) -> HardwareToken {
        let token = HardwareToken::classify(Self::model_identifier(), &self.problematic_prefixes);
        debug!(model = ?token.model, class = ?token.class, "Probed hardware");
        token
    }
}

// ============================================================================
// Static Probe
// ============================================================================

/// Fixed token, for tests and forced tiers
#[derive(Debug, Clone)]
pub struct StaticCapabilityProbe(pub HardwareToken);

impl CapabilityProbe for StaticCapabilityProbe {
    fn probe(&self) -> HardwareToken {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_by_prefix() {
        let prefixes = vec!["MacBookAir7".to_string(), "iMac14".to_string()];
        let token = HardwareToken::classify(Some("MacBookAir7,2".into()), &prefixes);
        assert!(token.is_problematic());
        let token = HardwareToken::classify(Some("MacBookPro18,1".into()), &prefixes);
        assert!(!token.is_problematic());
        assert!(!HardwareToken::classify(None, &prefixes).is_problematic());
    }

    #[test]
    fn test_empty_prefix_never_matches() {
        let token = HardwareToken::classify(Some("Anything".into()), &[String::new()]);
        assert_eq!(token.class, HardwareClass::Standard);
    }

    #[test]
    fn test_system_probe_without_prefixes_is_standard() {
        let probe = SystemCapabilityProbe::default();
        assert_eq!(probe.probe().class, HardwareClass::Standard);
    }
}
