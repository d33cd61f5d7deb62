//! Parameter Derivation
//!
//! - Lunar phase arithmetic and phase bands
//! - Seeded, band-driven parameter generation
//! - The normalized parameter value type

pub mod generator;
pub mod lunar;
pub mod parameters;

pub use generator::{
    BandRanges, Clock, FixedClock, NaturalParameterGenerator, NaturalSeed, RangeTable, SystemClock,
};
pub use lunar::{lunar_phase_percent, PhaseBand};
pub use parameters::ProcessingParameters;
