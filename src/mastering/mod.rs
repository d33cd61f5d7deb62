//! Mastering stage
//!
//! In-process for the Full and Simplified tiers, external for the
//! ExternalTool tier, skipped for Bypass. A missing or failing encoder
//! degrades to an unmodified copy of the pre-mastering file.

pub mod chain;
pub mod external;

pub use chain::MasteringChain;
pub use external::{effects_filter_graph, ExternalEncoder};

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::engine::ExportFormat;
use crate::error::{ErrorKind, Result};

/// How the mastering stage was carried out
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum MasteringOutcome {
    InProcess,
    External { encoder: PathBuf },
    /// External mastering was unavailable; the input was copied unchanged
    NoOpCopy { reason: String },
    Skipped,
}

impl MasteringOutcome {
    pub fn name(&self) -> &'static str {
        match self {
            MasteringOutcome::InProcess => "in_process",
            MasteringOutcome::External { .. } => "external",
            MasteringOutcome::NoOpCopy { .. } => "no_op_copy",
            MasteringOutcome::Skipped => "skipped",
        }
    }
}

/// Master `input` into `output` with the external encoder
///
/// External tool errors are logged and absorbed into a copy. Timeouts,
/// cancellation and I/O errors are returned.
pub async fn master_external(
    candidates: &[PathBuf],
    input: &Path,
    output: &Path,
    format: ExportFormat,
    budget: Duration,
    cancel: &CancellationToken,
) -> Result<MasteringOutcome> {
    let attempt = match ExternalEncoder::locate(candidates) {
        Ok(encoder) => encoder
            .run(
                input,
                output,
                &MasteringChain::filter_graph(),
                format,
                budget,
                cancel,
            )
            .await
            .map(|()| encoder),
        Err(e) => Err(e),
    };

    match attempt {
        Ok(encoder) => {
            info!(encoder = %encoder.binary().display(), "External mastering complete");
            Ok(MasteringOutcome::External {
                encoder: encoder.binary().to_path_buf(),
            })
        }
        Err(e) if e.kind() == ErrorKind::ExternalTool => {
            warn!(error = %e, "External mastering unavailable, copying unmastered audio");
            tokio::fs::copy(input, output).await?;
            Ok(MasteringOutcome::NoOpCopy {
                reason: e.to_string(),
            })
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_encoder_copies_input() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("effects.wav");
        let output = dir.path().join("mastered.wav");
        std::fs::write(&input, b"unmastered bytes").unwrap();

        let outcome = master_external(
            &[dir.path().join("no-such-ffmpeg")],
            &input,
            &output,
            ExportFormat::default(),
            Duration::from_secs(5),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.name(), "no_op_copy");
        assert_eq!(std::fs::read(&output).unwrap(), b"unmastered bytes");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancellation_is_not_absorbed() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let tool = dir.path().join("slow-ffmpeg");
        std::fs::write(&tool, "#!/bin/sh\nsleep 10\n").unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();
        let input = dir.path().join("effects.wav");
        let output = dir.path().join("mastered.wav");
        std::fs::write(&input, b"x").unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = master_external(
            &[tool],
            &input,
            &output,
            ExportFormat::default(),
            Duration::from_secs(5),
            &cancel,
        )
        .await;

        assert!(matches!(result, Err(crate::error::MareaError::Cancelled)));
        assert!(!output.exists());
    }
}
