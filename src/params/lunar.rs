//! Lunar phase arithmetic
//!
//! Phase is the time elapsed since a reference new moon, modulo the mean
//! synodic month, expressed as a percentage of one cycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Constants
// ============================================================================

/// Mean synodic month in days
pub const SYNODIC_MONTH_DAYS: f64 = 29.530588853;

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Reference new moon, 2000-01-06 18:14 UTC, in Unix milliseconds
pub const REFERENCE_NEW_MOON_MILLIS: i64 = 947_182_440_000;

/// Lunar phase at `instant` as a percentage in [0, 100)
pub fn lunar_phase_percent(instant: DateTime<Utc>) -> f64 {
    let elapsed = instant.timestamp_millis() - REFERENCE_NEW_MOON_MILLIS;
    let days = elapsed as f64 / MILLIS_PER_DAY;
    let cycle = days.rem_euclid(SYNODIC_MONTH_DAYS) / SYNODIC_MONTH_DAYS;
    // rem_euclid can round up to exactly the period for tiny negatives
    (cycle * 100.0).min(100.0 - f64::EPSILON * 100.0)
}

// ============================================================================
// Phase Bands
// ============================================================================

/// Coarse phase band driving parameter ranges
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PhaseBand {
    New,
    Waxing,
    Full,
    Waning,
}

impl PhaseBand {
    pub const ALL: [PhaseBand; 4] = [
        PhaseBand::New,
        PhaseBand::Waxing,
        PhaseBand::Full,
        PhaseBand::Waning,
    ];

    /// Band for a phase percentage
    ///
    /// `[0,5)` New, `[5,45)` Waxing, `[45,55)` Full, `[55,95)` Waning,
    /// `[95,100]` New. Values outside 0..=100 wrap; NaN maps to New.
    pub fn from_percent(percent: f64) -> Self {
        if percent.is_nan() {
            return PhaseBand::New;
        }
        let p = if (0.0..=100.0).contains(&percent) {
            percent
        } else {
            percent.rem_euclid(100.0)
        };
        match p {
            p if p < 5.0 => PhaseBand::New,
            p if p < 45.0 => PhaseBand::Waxing,
            p if p < 55.0 => PhaseBand::Full,
            p if p < 95.0 => PhaseBand::Waning,
            _ => PhaseBand::New,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PhaseBand::New => "new",
            PhaseBand::Waxing => "waxing",
            PhaseBand::Full => "full",
            PhaseBand::Waning => "waning",
        }
    }

    /// A representative phase inside the band
    pub fn representative_percent(&self) -> f64 {
        match self {
            PhaseBand::New => 2.0,
            PhaseBand::Waxing => 25.0,
            PhaseBand::Full => 50.0,
            PhaseBand::Waning => 75.0,
        }
    }
}

impl std::fmt::Display for PhaseBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Tests
// ============================================================================
