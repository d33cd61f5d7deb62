//! DSP Effects Library
//!
//! Signal processing stages shared by the effects pipeline and the mastering
//! chain. All effects implement the `Effect` trait for uniform processing.

mod chain;
mod compressor;
mod delay;
mod distortion;
pub mod effect;
mod eq;
mod gain;
mod limiter;
mod reverb;

pub use chain::EffectChain;
pub use compressor::Compressor;
pub use delay::{Delay, MAX_FEEDBACK_PERCENT};
pub use distortion::{Distortion, DistortionPreset};
pub use effect::{labeled, Effect, StageParams};
pub use eq::{EQBand, FilterType, ParametricEQ, MAX_BANDS};
pub use gain::Gain;
pub use limiter::Limiter;
pub use reverb::Reverb;
