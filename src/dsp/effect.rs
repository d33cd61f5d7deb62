//! Effect trait definition
//!
//! Every stage of the effects graph and the mastering chain is an [`Effect`]:
//! it is prepared once per stream, fed consecutive chunks in place, and reset
//! before the next stream.

use crate::engine::AudioBuffer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Bookkeeping shared by all stages
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageParams {
    /// Position-specific name; empty means "use the effect type"
    pub label: String,
    /// Bypassed stages pass chunks through untouched
    pub bypassed: bool,
}

impl StageParams {
    pub fn labeled(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            bypassed: false,
        }
    }
}

/// A streaming DSP stage
///
/// Implementations keep their filter history and delay lines across chunks
/// of one stream, so chunk boundaries are inaudible.
pub trait Effect: Send + Sync {
    /// Process one chunk in place
    fn process(&mut self, buffer: &mut AudioBuffer);

    /// Size internal state for a stream
    fn prepare(&mut self, sample_rate: u32, max_block_size: usize);

    /// Drop all stream state
    fn reset(&mut self);

    /// Stable effect type identifier, e.g. `"limiter"`
    fn effect_type(&self) -> &'static str;

    /// Name of this stage within its chain
    fn label(&self) -> &str;

    fn set_label(&mut self, label: String);

    fn is_bypassed(&self) -> bool;

    fn set_bypassed(&mut self, bypassed: bool);

    /// Current settings as JSON, for logs and reports
    fn describe(&self) -> Value;

    fn box_clone(&self) -> Box<dyn Effect>;
}

impl Clone for Box<dyn Effect> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

/// Implements the bookkeeping half of [`Effect`] over a `params: StageParams`
/// field
#[macro_export]
macro_rules! impl_stage_common {
    ($effect_type:expr) => {
        fn effect_type(&self) -> &'static str {
            $effect_type
        }

        fn label(&self) -> &str {
            if self.params.label.is_empty() {
                $effect_type
            } else {
                &self.params.label
            }
        }

        fn set_label(&mut self, label: String) {
            self.params.label = label;
        }

        fn is_bypassed(&self) -> bool {
            self.params.bypassed
        }

        fn set_bypassed(&mut self, bypassed: bool) {
            self.params.bypassed = bypassed;
        }

        fn box_clone(&self) -> Box<dyn Effect> {
            Box::new(self.clone())
        }
    };
}

/// Give a stage a position-specific label
pub fn labeled<E: Effect + 'static>(label: &str, mut effect: E) -> Box<dyn Effect> {
    effect.set_label(label.to_string());
    Box::new(effect)
}
