//! Effects Pipeline
//!
//! A persistent processing graph reused across the files of a batch. Each
//! configuration bypasses every EQ band and clears all DSP state before the
//! new parameters are applied, so nothing leaks from one file into the next.
//!
//! Full topology:
//! EQ (high-pass, low-pass, mid) → distortion → compressor → limiter →
//! reverb → delay → mix-out
//!
//! Simplified topology: mix-out at unity.

use serde::Serialize;
use tracing::debug;

use super::scheduler::ChunkProcessor;
use crate::dsp::{
    Compressor, Delay, Distortion, EQBand, Effect, Gain, Limiter, ParametricEQ, Reverb,
};
use crate::engine::AudioBuffer;
use crate::error::{MareaError, Result};
use crate::params::ProcessingParameters;
use crate::policy::ProcessingTier;

// ============================================================================
// Constants
// ============================================================================

/// Sample rates the full graph can start at
pub const MIN_GRAPH_SAMPLE_RATE: u32 = 8_000;
pub const MAX_GRAPH_SAMPLE_RATE: u32 = 192_000;

const EQ_BANDS: usize = 3;
const BAND_HIGH_PASS: usize = 0;
const BAND_LOW_PASS: usize = 1;
const BAND_MID: usize = 2;

const PASS_Q: f32 = 0.707;
const MID_Q: f32 = 1.0;

/// Filter corners are kept below this fraction of the sample rate
const MAX_CORNER_RATIO: f32 = 0.45;

// ============================================================================
// Topology
// ============================================================================

/// Which stages run, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    Full,
    Simplified,
}

impl Topology {
    /// In-process topology for a tier; external and bypass tiers have none
    pub fn for_tier(tier: ProcessingTier) -> Option<Self> {
        match tier {
            ProcessingTier::Full => Some(Topology::Full),
            ProcessingTier::Simplified => Some(Topology::Simplified),
            ProcessingTier::ExternalTool | ProcessingTier::Bypass => None,
        }
    }

    pub fn stage_names(&self) -> &'static [&'static str] {
        match self {
            Topology::Full => &[
                "eq",
                "distortion",
                "compressor",
                "limiter",
                "reverb",
                "delay",
                "mix_out",
            ],
            Topology::Simplified => &["mix_out"],
        }
    }
}

// ============================================================================
// Effects Pipeline
// ============================================================================

/// Persistent effects graph
#[derive(Debug, Clone)]
pub struct EffectsPipeline {
    eq: ParametricEQ,
    distortion: Distortion,
    compressor: Compressor,
    limiter: Limiter,
    reverb: Reverb,
    delay: Delay,
    mix_out: Gain,
    topology: Option<Topology>,
    sample_rate: u32,
    channels: u16,
}

impl EffectsPipeline {
    pub fn new() -> Self {
        Self {
            // Three bands never exceeds the band limit
            eq: ParametricEQ::with_band_count(EQ_BANDS).unwrap_or_default(),
            distortion: Distortion::new(),
            compressor: Compressor::new(),
            limiter: Limiter::default(),
            reverb: Reverb::new(),
            delay: Delay::default(),
            mix_out: Gain::unity(),
            topology: None,
            sample_rate: 0,
            channels: 0,
        }
    }

    /// Configure the graph for one file
    ///
    /// Fails with a resource error when the graph cannot start at the given
    /// format; no retry happens here.
    pub fn configure(
        &mut self,
        params: &ProcessingParameters,
        tier: ProcessingTier,
        sample_rate: u32,
        channels: u16,
    ) -> Result<()> {
        self.topology = None;
        self.eq.bypass_all();
        self.reset_dsp();

        let topology = Topology::for_tier(tier).ok_or_else(|| MareaError::Processing {
            reason: format!("tier {} has no in-process effects graph", tier),
        })?;
        // Only the full graph has rate-dependent stages
        let rate_ok = match topology {
            Topology::Full => {
                (MIN_GRAPH_SAMPLE_RATE..=MAX_GRAPH_SAMPLE_RATE).contains(&sample_rate)
            }
            Topology::Simplified => sample_rate > 0,
        };
        if !rate_ok {
            return Err(MareaError::InvalidSampleRate { sample_rate });
        }
        if !(1..=2).contains(&channels) {
            return Err(MareaError::EngineStart {
                reason: format!("{} channels (graph supports mono and stereo)", channels),
            });
        }

        let params = params.normalized();
        self.mix_out = Gain::unity();

        if topology == Topology::Full {
            let max_corner = sample_rate as f32 * MAX_CORNER_RATIO;
            self.eq.set_band(
                BAND_HIGH_PASS,
                EQBand::high_pass(params.high_pass_hz.min(max_corner), PASS_Q),
            )?;
            self.eq.set_band(
                BAND_LOW_PASS,
                EQBand::low_pass(params.low_pass_hz.min(max_corner), PASS_Q),
            )?;
            self.eq.set_band(
                BAND_MID,
                EQBand::peak(params.mid_frequency_hz.min(max_corner), params.mid_gain_db, MID_Q),
            )?;

            self.distortion.set_preset(params.distortion_preset);
            self.distortion.set_amount(params.distortion_amount);
            self.distortion.set_wet_dry_mix(params.distortion_mix_percent());

            self.compressor.set_threshold_db(params.compression_threshold_db);
            self.compressor.set_ratio(params.compression_ratio);
            self.compressor.set_attack_ms(params.compression_attack_ms);
            self.compressor.set_release_ms(params.compression_release_ms);

            self.limiter.set_ceiling_db(params.limiter_threshold_db);

            self.reverb.set_wet_mix(params.reverb_mix_percent());

            self.delay.set_delay_time_ms(params.delay_time_ms);
            self.delay.set_feedback(params.delay_feedback_percent());

            self.mix_out.set_gain_db(params.output_gain_db);
        }

        self.sample_rate = sample_rate;
        self.channels = channels;
        for effect in self.effects_mut() {
            effect.prepare(sample_rate, 0);
        }
        self.topology = Some(topology);

        debug!(
            ?topology,
            sample_rate,
            channels,
            stages = ?topology.stage_names(),
            "Effects pipeline configured"
        );
        Ok(())
    }

    /// Run one chunk through the configured topology
    pub fn process(&mut self, chunk: &mut AudioBuffer) -> Result<()> {
        let topology = self.topology.ok_or_else(|| MareaError::EngineStart {
            reason: "effects pipeline used before configuration".to_string(),
        })?;

        match topology {
            Topology::Full => {
                self.eq.process(chunk);
                self.distortion.process(chunk);
                self.compressor.process(chunk);
                self.limiter.process(chunk);
                self.reverb.process(chunk);
                self.delay.process(chunk);
                self.mix_out.process(chunk);
                chunk.sanitize();
            }
            Topology::Simplified => self.mix_out.process(chunk),
        }
        Ok(())
    }

    /// Stage names of the configured topology, empty when unconfigured
    pub fn stage_names(&self) -> &'static [&'static str] {
        self.topology.map(|t| t.stage_names()).unwrap_or(&[])
    }

    pub fn topology(&self) -> Option<Topology> {
        self.topology
    }

    pub fn eq(&self) -> &ParametricEQ {
        &self.eq
    }

    pub fn delay(&self) -> &Delay {
        &self.delay
    }

    /// Drop the configuration and clear all state
    pub fn reset(&mut self) {
        self.topology = None;
        self.eq.bypass_all();
        self.reset_dsp();
    }

    fn reset_dsp(&mut self) {
        for effect in self.effects_mut() {
            effect.reset();
        }
    }

    fn effects_mut(&mut self) -> [&mut dyn Effect; 7] {
        [
            &mut self.eq,
            &mut self.distortion,
            &mut self.compressor,
            &mut self.limiter,
            &mut self.reverb,
            &mut self.delay,
            &mut self.mix_out,
        ]
    }
}

impl Default for EffectsPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkProcessor for EffectsPipeline {
    fn process_chunk(&mut self, chunk: &mut AudioBuffer) -> Result<()> {
        self.process(chunk)
    }
}

// ============================================================================
// Tests
// ============================================================================
