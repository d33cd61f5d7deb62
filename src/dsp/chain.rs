//! Effect Chain
//!
//! An ordered list of boxed effects processed index 0 first. Used by the
//! mastering stage, whose topology is fixed at construction.

use super::Effect;
use crate::engine::AudioBuffer;
use serde_json::Value;

/// Chain of effects for processing
#[derive(Clone)]
pub struct EffectChain {
    effects: Vec<Box<dyn Effect>>,
    sample_rate: u32,
    max_block_size: usize,
}

impl EffectChain {
    pub fn new() -> Self {
        Self {
            effects: Vec::new(),
            sample_rate: crate::engine::buffer::DEFAULT_SAMPLE_RATE,
            max_block_size: 4096,
        }
    }

    /// Prepare all effects for processing
    pub fn prepare(&mut self, sample_rate: u32, max_block_size: usize) {
        self.sample_rate = sample_rate;
        self.max_block_size = max_block_size;
        for effect in &mut self.effects {
            effect.prepare(sample_rate, max_block_size);
        }
    }

    pub fn reset(&mut self) {
        for effect in &mut self.effects {
            effect.reset();
        }
    }

    /// Append an effect at the end of the chain
    pub fn push(&mut self, mut effect: Box<dyn Effect>) {
        effect.prepare(self.sample_rate, self.max_block_size);
        self.effects.push(effect);
    }

    /// Builder-style [`push`](Self::push)
    pub fn with(mut self, effect: Box<dyn Effect>) -> Self {
        self.push(effect);
        self
    }

    /// Stage by label
    pub fn get(&self, label: &str) -> Option<&dyn Effect> {
        self.effects
            .iter()
            .find(|e| e.label() == label)
            .map(|e| e.as_ref())
    }

    pub fn get_mut(&mut self, label: &str) -> Option<&mut Box<dyn Effect>> {
        self.effects.iter_mut().find(|e| e.label() == label)
    }

    /// Process the entire chain in order
    pub fn process(&mut self, buffer: &mut AudioBuffer) {
        for effect in &mut self.effects {
            effect.process(buffer);
        }
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Effect> {
        self.effects.iter().map(|e| e.as_ref())
    }

    /// Effect type identifiers in processing order
    pub fn effect_types(&self) -> Vec<&'static str> {
        self.effects.iter().map(|e| e.effect_type()).collect()
    }

    /// Stage labels in processing order
    pub fn labels(&self) -> Vec<&str> {
        self.effects.iter().map(|e| e.label()).collect()
    }

    /// Settings of every stage, for logs and reports
    pub fn describe(&self) -> Value {
        Value::Array(
            self.effects
                .iter()
                .map(|e| {
                    serde_json::json!({
                        "stage": e.label(),
                        "type": e.effect_type(),
                        "settings": e.describe(),
                    })
                })
                .collect(),
        )
    }
}

impl Default for EffectChain {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EffectChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectChain")
            .field("effects", &self.effect_types())
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::{labeled, Gain, Limiter};
    use crate::engine::buffer::ChannelLayout;

    #[test]
    fn test_chain_new() {
        let chain = EffectChain::new();
        assert!(chain.is_empty());
        assert_eq!(chain.len(), 0);
    }

    #[test]
    fn test_chain_processes_in_order() {
        // +12 dB then limit: order matters
        let mut chain = EffectChain::new()
            .with(Box::new(Gain::new(12.0)))
            .with(Box::new(Limiter::new(-6.0)));
        chain.prepare(48000, 256);
        assert_eq!(chain.effect_types(), vec!["gain", "limiter"]);

        let mut buffer = AudioBuffer::new(256, ChannelLayout::Mono);
        buffer.channel_mut(0).fill(0.5);
        chain.process(&mut buffer);
        let ceiling = crate::engine::buffer::db_to_linear(-6.0);
        assert!(buffer.channel(0).iter().all(|s| s.abs() <= ceiling + 1e-6));
    }

    #[test]
    fn test_lookup_by_label() {
        let mut chain = EffectChain::new()
            .with(labeled("trim", Gain::new(-3.0)))
            .with(Box::new(Limiter::new(-1.0)));
        assert_eq!(chain.labels(), vec!["trim", "limiter"]);
        assert_eq!(chain.get("trim").map(|e| e.effect_type()), Some("gain"));
        assert!(chain.get("missing").is_none());

        chain.get_mut("trim").unwrap().set_bypassed(true);
        let described = chain.describe();
        assert_eq!(described[0]["stage"], "trim");
        assert_eq!(described[0]["settings"]["bypassed"], true);
    }

    #[test]
    fn test_bypassed_stage_passes_through() {
        let mut chain = EffectChain::new().with(labeled("trim", Gain::new(-12.0)));
        chain.get_mut("trim").unwrap().set_bypassed(true);
        let mut buffer = AudioBuffer::new(16, ChannelLayout::Mono);
        buffer.channel_mut(0).fill(0.5);
        chain.process(&mut buffer);
        assert!(buffer.channel(0).iter().all(|&s| s == 0.5));
    }
}
