//! CLI Command Implementations
//!
//! Implements the actual logic for each CLI command.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::EngineConfig;
use crate::engine::io::SUPPORTED_EXTENSIONS;
use crate::error::{MareaError, Result};
use crate::metadata::TrackTags;
use crate::policy::{MemoryProbe, MemorySnapshot, TierDecision};
use crate::session::{Engine, ProcessRequest};

/// Expand files and directories into a sorted list of audio inputs
///
/// Directories are walked recursively; only supported extensions are kept
/// from them. Explicit files are passed through for validation to judge.
pub fn expand_inputs(inputs: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut found: Vec<PathBuf> = WalkDir::new(input)
                .follow_links(true)
                .into_iter()
                .filter_map(|entry| match entry {
                    Ok(entry) => Some(entry),
                    Err(e) => {
                        warn!(error = %e, "Skipping unreadable entry");
                        None
                    }
                })
                .filter(|entry| entry.file_type().is_file())
                .map(|entry| entry.into_path())
                .filter(|path| is_supported(path))
                .collect();
            found.sort();
            files.extend(found);
        } else {
            files.push(input.clone());
        }
    }
    files
}

fn is_supported(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(true);
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    !hidden && SUPPORTED_EXTENSIONS.contains(&ext.as_str())
}

/// Output path for `input` inside `output_dir`
pub fn output_path_for(input: &Path, output_dir: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    output_dir.join(format!("{}.wav", stem))
}

/// Destinations for a batch, one per input and never shared
///
/// Inputs from different directories may share a stem; later ones get a
/// numeric suffix (`song.wav`, `song-1.wav`, ...) in input order.
pub fn plan_outputs(inputs: &[PathBuf], output_dir: &Path) -> Vec<PathBuf> {
    let mut taken = HashSet::new();
    inputs
        .iter()
        .map(|input| {
            let preferred = output_path_for(input, output_dir);
            let mut candidate = preferred.clone();
            let mut n = 0;
            while !taken.insert(candidate.clone()) {
                n += 1;
                candidate = with_suffix(&preferred, n);
            }
            if n > 0 {
                warn!(
                    input = %input.display(),
                    output = %candidate.display(),
                    "Output name already used in this batch, renamed"
                );
            }
            candidate
        })
        .collect()
}

fn with_suffix(path: &Path, n: usize) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{}-{}.wav", stem, n))
}

/// Process every input sequentially and print one JSON report per file.
///
/// Returns the number of failed files.
pub async fn process(
    engine: &Engine,
    inputs: &[PathBuf],
    output_dir: &Path,
    tags: TrackTags,
    cancel: CancellationToken,
) -> Result<usize> {
    tokio::fs::create_dir_all(output_dir).await?;

    let files = expand_inputs(inputs);
    if files.is_empty() {
        return Err(MareaError::Processing {
            reason: "no audio files found in the given inputs".to_string(),
        });
    }
    info!(count = files.len(), output_dir = %output_dir.display(), "Starting batch");

    let requests = files
        .iter()
        .zip(plan_outputs(&files, output_dir))
        .map(|(input, output)| ProcessRequest::new(input.clone(), output).with_tags(tags.clone()))
        .collect();

    let results = engine.process_batch(requests, None, cancel).await;

    let mut failures = 0;
    for (input, result) in files.iter().zip(results) {
        match result {
            Ok(outcome) => {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            }
            Err(e) => {
                failures += 1;
                eprintln!("{}: {} [{}]", input.display(), e, e.error_code());
                for suggestion in e.recovery_suggestions() {
                    eprintln!("  - {}", suggestion);
                }
            }
        }
    }

    println!(
        "Processed {} of {} file(s)",
        files.len() - failures,
        files.len()
    );
    Ok(failures)
}

/// Print generated parameters.
pub fn params(
    engine: &Engine,
    at: Option<&str>,
    seed: Option<(f64, u32, u32)>,
) -> Result<()> {
    let parameters = match (at, seed) {
        (Some(at), _) => {
            let instant = DateTime::parse_from_rfc3339(at)
                .map_err(|e| MareaError::Config {
                    reason: format!("invalid --at timestamp '{}': {}", at, e),
                })?
                .with_timezone(&Utc);
            engine.generator().generate_at(instant)
        }
        (None, Some((phase, hour, day))) => engine.generator().generate_for(phase, hour, day),
        (None, None) => engine.generator().generate(),
    };

    println!("{}", serde_json::to_string_pretty(&parameters)?);
    Ok(())
}

#[derive(Serialize)]
struct TierReport {
    memory: Option<MemorySnapshot>,
    decision: TierDecision,
}

/// Print the current tier decision.
pub fn tier(engine: &Engine) -> Result<()> {
    let report = TierReport {
        memory: engine.policy().memory_probe().snapshot(),
        decision: engine.policy().evaluate(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Build an engine from an optional config file plus environment overrides
pub fn engine_from(config_path: Option<&Path>) -> Result<Engine> {
    Engine::builder(EngineConfig::load(config_path)?).build()
}
