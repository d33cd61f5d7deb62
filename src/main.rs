//! Marea CLI - batch audio transformation
//!
//! Command-line interface for the Marea engine.

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use marea::cli::{commands, Cli, Commands};
use marea::metadata::TrackTags;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over the verbosity flag
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("Marea v{}", env!("CARGO_PKG_VERSION"));

    let engine = commands::engine_from(cli.config.as_deref()).context("engine setup failed")?;

    match cli.command {
        Commands::Process {
            inputs,
            output_dir,
            artist,
            album,
            title,
            cover,
        } => {
            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received, cancelling");
                    on_interrupt.cancel();
                }
            });

            let tags = TrackTags {
                artist,
                album,
                title,
                cover,
            };
            let failures = commands::process(&engine, &inputs, &output_dir, tags, cancel)
                .await
                .context("batch failed")?;
            if failures > 0 {
                anyhow::bail!("{} file(s) failed", failures);
            }
        }
        Commands::Params {
            at,
            phase,
            hour,
            day,
        } => {
            let seed = match (phase, hour, day) {
                (Some(phase), Some(hour), Some(day)) => Some((phase, hour, day)),
                _ => None,
            };
            commands::params(&engine, at.as_deref(), seed)?;
        }
        Commands::Tier => commands::tier(&engine)?,
    }

    Ok(())
}
