//! Fixed mastering chain
//!
//! 4-band EQ → compressor → limiter. The same chain is available as an
//! in-process [`EffectChain`] and as a textual filter graph for the external
//! encoder.

use tracing::debug;

use crate::dsp::{labeled, Compressor, EQBand, EffectChain, Limiter, ParametricEQ};
use crate::engine::buffer::db_to_linear;
use crate::engine::AudioBuffer;
use crate::error::Result;
use crate::pipeline::ChunkProcessor;

// ============================================================================
// Chain Constants
// ============================================================================

pub const LOW_SHELF_HZ: f32 = 60.0;
pub const LOW_SHELF_GAIN_DB: f32 = 1.5;
pub const LOW_MID_HZ: f32 = 250.0;
pub const LOW_MID_GAIN_DB: f32 = -1.0;
pub const PRESENCE_HZ: f32 = 3000.0;
pub const PRESENCE_GAIN_DB: f32 = 1.0;
pub const HIGH_SHELF_HZ: f32 = 10_000.0;
pub const HIGH_SHELF_GAIN_DB: f32 = 1.5;

pub const COMPRESSOR_THRESHOLD_DB: f32 = -14.0;
pub const COMPRESSOR_RATIO: f32 = 2.5;
pub const COMPRESSOR_ATTACK_MS: f32 = 20.0;
pub const COMPRESSOR_RELEASE_MS: f32 = 200.0;

pub const LIMITER_CEILING_DB: f32 = -0.3;

const SHELF_Q: f32 = 0.707;
const PEAK_Q: f32 = 1.0;

// ============================================================================
// Mastering Chain
// ============================================================================

/// In-process mastering pass
#[derive(Debug, Clone)]
pub struct MasteringChain {
    chain: EffectChain,
}

impl MasteringChain {
    pub fn new() -> Self {
        let eq = ParametricEQ::with_bands(vec![
            EQBand::low_shelf(LOW_SHELF_HZ, LOW_SHELF_GAIN_DB, SHELF_Q),
            EQBand::peak(LOW_MID_HZ, LOW_MID_GAIN_DB, PEAK_Q),
            EQBand::peak(PRESENCE_HZ, PRESENCE_GAIN_DB, PEAK_Q),
            EQBand::high_shelf(HIGH_SHELF_HZ, HIGH_SHELF_GAIN_DB, SHELF_Q),
        ])
        .unwrap_or_default();

        let compressor = Compressor::with_params(
            COMPRESSOR_THRESHOLD_DB,
            COMPRESSOR_RATIO,
            COMPRESSOR_ATTACK_MS,
            COMPRESSOR_RELEASE_MS,
        );

        let chain = EffectChain::new()
            .with(labeled("tone", eq))
            .with(labeled("glue", compressor))
            .with(labeled("ceiling", Limiter::new(LIMITER_CEILING_DB)));

        Self { chain }
    }

    /// Prepare for a stream and clear state from any previous file
    pub fn prepare(&mut self, sample_rate: u32) {
        self.chain.reset();
        self.chain.prepare(sample_rate, 0);
        debug!(sample_rate, stages = %self.chain.describe(), "Mastering chain prepared");
    }

    pub fn process(&mut self, chunk: &mut AudioBuffer) {
        self.chain.process(chunk);
        chunk.sanitize();
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.chain.effect_types()
    }

    pub fn stage_labels(&self) -> Vec<&str> {
        self.chain.labels()
    }

    /// Textual equivalent of the chain for the external encoder
    pub fn filter_graph() -> String {
        [
            format!("lowshelf=f={}:g={}", LOW_SHELF_HZ, LOW_SHELF_GAIN_DB),
            format!(
                "equalizer=f={}:t=q:w={}:g={}",
                LOW_MID_HZ, PEAK_Q, LOW_MID_GAIN_DB
            ),
            format!(
                "equalizer=f={}:t=q:w={}:g={}",
                PRESENCE_HZ, PEAK_Q, PRESENCE_GAIN_DB
            ),
            format!("highshelf=f={}:g={}", HIGH_SHELF_HZ, HIGH_SHELF_GAIN_DB),
            format!(
                "acompressor=threshold={:.6}:ratio={}:attack={}:release={}",
                db_to_linear(COMPRESSOR_THRESHOLD_DB),
                COMPRESSOR_RATIO,
                COMPRESSOR_ATTACK_MS,
                COMPRESSOR_RELEASE_MS
            ),
            format!("alimiter=limit={:.6}", db_to_linear(LIMITER_CEILING_DB)),
        ]
        .join(",")
    }
}

impl Default for MasteringChain {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkProcessor for MasteringChain {
    fn process_chunk(&mut self, chunk: &mut AudioBuffer) -> Result<()> {
        self.process(chunk);
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::generate_stereo_test_tone;

    #[test]
    fn test_chain_order() {
        let chain = MasteringChain::new();
        assert_eq!(
            chain.stage_names(),
            vec!["parametric_eq", "compressor", "limiter"]
        );
        assert_eq!(chain.stage_labels(), vec!["tone", "glue", "ceiling"]);
    }

    #[test]
    fn test_output_respects_ceiling() {
        let mut chain = MasteringChain::new();
        chain.prepare(44100);
        let mut chunk = generate_stereo_test_tone(100.0, 3000.0, 0.5, 44100);
        chunk.apply_gain(12.0);
        chain.process(&mut chunk);
        assert!(chunk.peak_db() <= LIMITER_CEILING_DB + 1e-3);
    }

    #[test]
    fn test_prepare_clears_previous_file() {
        let tone = generate_stereo_test_tone(440.0, 440.0, 0.1, 48000);

        let mut fresh = MasteringChain::new();
        fresh.prepare(48000);
        let mut expected = tone.clone();
        fresh.process(&mut expected);

        let mut reused = MasteringChain::new();
        reused.prepare(48000);
        let mut loud = generate_stereo_test_tone(60.0, 80.0, 0.2, 48000);
        loud.apply_gain(18.0);
        reused.process(&mut loud);
        reused.prepare(48000);
        let mut again = tone.clone();
        reused.process(&mut again);

        assert_eq!(again.samples, expected.samples);
    }

    #[test]
    fn test_filter_graph_text() {
        assert_eq!(
            MasteringChain::filter_graph(),
            "lowshelf=f=60:g=1.5,\
             equalizer=f=250:t=q:w=1:g=-1,\
             equalizer=f=3000:t=q:w=1:g=1,\
             highshelf=f=10000:g=1.5,\
             acompressor=threshold=0.199526:ratio=2.5:attack=20:release=200,\
             alimiter=limit=0.966051"
        );
    }
}
