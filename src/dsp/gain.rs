//! Gain Effect
//!
//! Output level stage. The effects pipeline uses it as the final mix-out,
//! at unity when the simplified topology is active.

use crate::dsp::effect::{Effect, StageParams};
use crate::engine::buffer::db_to_linear;
use crate::engine::AudioBuffer;
use crate::impl_stage_common;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Quietest settable level; effectively silent
const MIN_GAIN_DB: f32 = -96.0;
const MAX_GAIN_DB: f32 = 24.0;

/// Static level change, `gain_db` clamped to -96..=+24 dB
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gain {
    params: StageParams,
    gain_db: f32,
    #[serde(skip)]
    factor: f32,
}

impl Gain {
    pub fn new(gain_db: f32) -> Self {
        let mut gain = Self {
            params: StageParams::default(),
            gain_db: 0.0,
            factor: 1.0,
        };
        gain.set_gain_db(gain_db);
        gain
    }

    pub fn unity() -> Self {
        Self::new(0.0)
    }

    pub fn set_gain_db(&mut self, db: f32) {
        self.gain_db = db.clamp(MIN_GAIN_DB, MAX_GAIN_DB);
        self.factor = db_to_linear(self.gain_db);
    }

    pub fn gain_db(&self) -> f32 {
        self.gain_db
    }

    /// Unity leaves samples bit-identical
    pub fn is_unity(&self) -> bool {
        self.gain_db == 0.0
    }
}

impl Default for Gain {
    fn default() -> Self {
        Self::unity()
    }
}

impl Effect for Gain {
    impl_stage_common!("gain");

    fn process(&mut self, buffer: &mut AudioBuffer) {
        if self.params.bypassed || self.is_unity() {
            return;
        }
        let factor = self.factor;
        buffer
            .samples
            .iter_mut()
            .flatten()
            .for_each(|sample| *sample *= factor);
    }

    fn prepare(&mut self, _sample_rate: u32, _max_block_size: usize) {
        // factor is not serialized
        self.factor = db_to_linear(self.gain_db);
    }

    fn reset(&mut self) {}

    fn describe(&self) -> Value {
        json!({ "gain_db": self.gain_db, "bypassed": self.params.bypassed })
    }
}
