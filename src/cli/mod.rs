//! CLI Module
//!
//! Command-line interface for the Marea batch engine.

pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Marea - lunar-seeded batch audio transformation
#[derive(Parser, Debug)]
#[command(name = "marea-cli")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// JSON configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Process audio files or directories
    #[command(name = "process")]
    Process {
        /// Input files or directories
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Directory for rendered files
        #[arg(short, long)]
        output_dir: PathBuf,

        #[arg(long)]
        artist: Option<String>,

        #[arg(long)]
        album: Option<String>,

        #[arg(long)]
        title: Option<String>,

        /// PNG front cover
        #[arg(long)]
        cover: Option<PathBuf>,
    },

    /// Print generated parameters as JSON
    #[command(name = "params")]
    Params {
        /// Instant to seed from (RFC 3339); defaults to now
        #[arg(long, conflicts_with_all = ["phase", "hour", "day"])]
        at: Option<String>,

        /// Lunar phase percent [0, 100]
        #[arg(long, requires_all = ["hour", "day"])]
        phase: Option<f64>,

        /// Hour of day [0, 23]
        #[arg(long, requires_all = ["phase", "day"])]
        hour: Option<u32>,

        /// Day of month [1, 31]
        #[arg(long, requires_all = ["phase", "hour"])]
        day: Option<u32>,
    },

    /// Show memory telemetry, hardware token and the selected tier
    #[command(name = "tier")]
    Tier,
}
