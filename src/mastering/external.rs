//! External encoder
//!
//! Runs ffmpeg with a fixed argument template. Only the exit status is
//! consumed; stderr is captured and truncated for diagnostics. The child is
//! killed when the run is abandoned (timeout, cancellation or drop), and a
//! failed run never leaves its output behind.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::dsp::Delay;
use crate::engine::buffer::db_to_linear;
use crate::engine::ExportFormat;
use crate::error::{MareaError, Result};
use crate::params::ProcessingParameters;

/// Bytes of stderr kept for diagnostics
pub const STDERR_LIMIT: usize = 4096;

/// A located encoder binary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalEncoder {
    binary: PathBuf,
}

impl ExternalEncoder {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// First candidate path that exists as a file
    pub fn locate(candidates: &[PathBuf]) -> Result<Self> {
        candidates
            .iter()
            .find(|path| path.is_file())
            .map(|path| {
                debug!(encoder = %path.display(), "Located external encoder");
                Self::new(path.clone())
            })
            .ok_or_else(|| MareaError::ExternalToolMissing {
                candidates: candidates.iter().map(|p| p.display().to_string()).collect(),
            })
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// `-hide_banner -nostdin -y -i <in> -af <graph> -c:a <codec> <out>`
    pub fn args(input: &Path, output: &Path, graph: &str, format: ExportFormat) -> Vec<OsString> {
        vec![
            "-hide_banner".into(),
            "-nostdin".into(),
            "-y".into(),
            "-i".into(),
            input.as_os_str().to_owned(),
            "-af".into(),
            graph.into(),
            "-c:a".into(),
            format.pcm_codec().into(),
            output.as_os_str().to_owned(),
        ]
    }

    /// Render `input` through `graph` into `output`
    pub async fn run(
        &self,
        input: &Path,
        output: &Path,
        graph: &str,
        format: ExportFormat,
        budget: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        debug!(
            encoder = %self.binary.display(),
            input = %input.display(),
            output = %output.display(),
            graph,
            "Starting external encoder"
        );

        let child = Command::new(&self.binary)
            .args(Self::args(input, output, graph, format))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(MareaError::ExternalToolSpawn)?;

        // Dropping the wait future drops the child, which kills it
        let result = tokio::select! {
            waited = child.wait_with_output() => match waited {
                Ok(out) if out.status.success() => Ok(()),
                Ok(out) => Err(MareaError::ExternalToolFailed {
                    status: out.status.code(),
                    stderr: truncate_stderr(&out.stderr),
                }),
                Err(e) => Err(MareaError::ExternalToolSpawn(e)),
            },
            _ = tokio::time::sleep(budget) => Err(MareaError::Timeout {
                stage: "external encoder".to_string(),
                budget_secs: budget.as_secs_f64(),
            }),
            _ = cancel.cancelled() => Err(MareaError::Cancelled),
        };

        if let Err(e) = &result {
            warn!(error = %e, "External encoder run failed, discarding its output");
            discard(output).await;
        }
        result
    }
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Could not remove encoder output");
        }
    }
}

/// Lossy UTF-8 of the last `STDERR_LIMIT` bytes
fn truncate_stderr(stderr: &[u8]) -> String {
    let start = stderr.len().saturating_sub(STDERR_LIMIT);
    String::from_utf8_lossy(&stderr[start..]).trim().to_string()
}

// ============================================================================
// Effects Filter Graph
// ============================================================================

const MAX_ECHO_TAPS: usize = 3;

/// Textual filter graph equivalent to the Full effects topology
///
/// Distortion and reverb are omitted when their parameters make them
/// inaudible.
pub fn effects_filter_graph(params: &ProcessingParameters) -> String {
    let p = params.normalized();
    let mut filters = vec![
        format!("highpass=f={:.1}", p.high_pass_hz),
        format!("lowpass=f={:.1}", p.low_pass_hz),
        format!(
            "equalizer=f={:.1}:t=q:w=1:g={:.2}",
            p.mid_frequency_hz, p.mid_gain_db
        ),
    ];

    if p.distortion_amount > 0.0 {
        // Harder clipping threshold as the amount rises
        let threshold = (1.0 - 0.9 * p.distortion_amount).max(0.1);
        filters.push(format!("asoftclip=type=tanh:threshold={:.3}", threshold));
    }

    filters.push(format!(
        "acompressor=threshold={:.6}:ratio={:.2}:attack={:.1}:release={:.1}",
        db_to_linear(p.compression_threshold_db),
        p.compression_ratio,
        p.compression_attack_ms,
        p.compression_release_ms
    ));
    filters.push(format!(
        "alimiter=limit={:.6}",
        db_to_linear(p.limiter_threshold_db)
    ));

    if p.reverb_amount > 0.0 {
        let decay = p.reverb_amount.min(0.9);
        filters.push(format!(
            "aecho=0.8:0.9:40|61|83:{:.3}|{:.3}|{:.3}",
            decay,
            decay * 0.7,
            decay * 0.5
        ));
    }

    // First tap at the delay's wet level, then feedback repeats
    let mut delays = vec![format!("{:.1}", p.delay_time_ms)];
    let mut decay = Delay::default().wet_mix() / 100.0;
    let mut decays = vec![format!("{:.3}", decay)];
    for tap in 2..=MAX_ECHO_TAPS {
        decay *= p.delay_feedback;
        if decay < 0.001 {
            break;
        }
        delays.push(format!("{:.1}", p.delay_time_ms * tap as f32));
        decays.push(format!("{:.3}", decay));
    }
    filters.push(format!(
        "aecho=1.0:1.0:{}:{}",
        delays.join("|"),
        decays.join("|")
    ));

    filters.push(format!("volume={:.2}dB", p.output_gain_db));
    filters.join(",")
}

// ============================================================================
// Tests
// ============================================================================
