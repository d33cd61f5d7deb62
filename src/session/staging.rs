//! Staging files
//!
//! Every intermediate render goes to a hidden file next to the destination.
//! The session owns them exclusively; they are removed on drop unless the
//! final one was committed, so no exit path leaves partial output behind.

use std::path::{Path, PathBuf};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{MareaError, Result};
use crate::pipeline::ProgressTracker;

/// Bytes per read in a streamed copy
pub const COPY_CHUNK_BYTES: usize = 64 * 1024;

/// Intermediate files of one session
#[derive(Debug)]
pub struct StagingFiles {
    destination: PathBuf,
    tag: String,
    staged: Vec<PathBuf>,
    committed: bool,
}

impl StagingFiles {
    pub fn new(destination: &Path, session_id: Uuid) -> Self {
        let simple = session_id.simple().to_string();
        Self {
            destination: destination.to_path_buf(),
            tag: simple[..8].to_string(),
            staged: Vec::new(),
            committed: false,
        }
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Register and return a new WAV staging path for `label`
    pub fn stage(&mut self, label: &str) -> PathBuf {
        self.stage_with_extension(label, "wav")
    }

    /// Register and return a new staging path with the given extension
    pub fn stage_with_extension(&mut self, label: &str, extension: &str) -> PathBuf {
        let dir = self
            .destination
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let stem = self
            .destination
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());
        let path = dir.join(format!(".{}.{}.{}.{}", stem, self.tag, label, extension));
        self.staged.push(path.clone());
        path
    }

    pub fn staged(&self) -> &[PathBuf] {
        &self.staged
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Move `staged` into place as the destination and drop the rest
    pub async fn commit(&mut self, staged: &Path) -> Result<PathBuf> {
        let destination = self.destination.clone();
        self.commit_to(staged, destination).await
    }

    /// Commit under the destination name with `extension` instead
    ///
    /// A verbatim copy keeps the source container, so its name must say so.
    pub async fn commit_as(&mut self, staged: &Path, extension: &str) -> Result<PathBuf> {
        let destination = self.destination.with_extension(extension);
        self.commit_to(staged, destination).await
    }

    async fn commit_to(&mut self, staged: &Path, destination: PathBuf) -> Result<PathBuf> {
        if !self.staged.iter().any(|p| p == staged) {
            return Err(MareaError::Processing {
                reason: format!("{} is not a staging file of this session", staged.display()),
            });
        }
        tokio::fs::rename(staged, &destination).await?;
        self.staged.retain(|p| p != staged);
        self.committed = true;
        self.remove_all().await;
        debug!(destination = %destination.display(), "Committed output");
        Ok(destination)
    }

    /// Remove one staging file now, e.g. after a failed attempt
    pub async fn discard(&mut self, path: &Path) {
        if let Some(index) = self.staged.iter().position(|p| p == path) {
            let path = self.staged.remove(index);
            report_removal(&path, tokio::fs::remove_file(&path).await);
        }
    }

    /// Remove every staging file still on disk
    pub async fn remove_all(&mut self) {
        for path in std::mem::take(&mut self.staged) {
            report_removal(&path, tokio::fs::remove_file(&path).await);
        }
    }
}

fn report_removal(path: &Path, result: std::io::Result<()>) {
    match result {
        Ok(()) => debug!(path = %path.display(), "Removed staging file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Could not remove staging file"),
    }
}

// Last resort when a session future is dropped mid-flight
impl Drop for StagingFiles {
    fn drop(&mut self) {
        if !self.committed {
            for path in self.staged.drain(..) {
                report_removal(&path, std::fs::remove_file(&path));
            }
        }
    }
}

/// Copy `src` to `dst` in bounded chunks, checking `cancel` between chunks
///
/// Progress is recorded in bytes.
pub async fn copy_streamed(
    src: &Path,
    dst: &Path,
    tracker: &ProgressTracker,
    cancel: &CancellationToken,
) -> Result<u64> {
    let mut reader = tokio::fs::File::open(src).await?;
    let mut writer = tokio::fs::File::create(dst).await?;
    let mut buf = vec![0u8; COPY_CHUNK_BYTES];
    let mut copied: u64 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(MareaError::Cancelled);
        }
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await?;
        copied += n as u64;
        tracker.record_chunk(n as u64);
    }

    writer.flush().await?;
    writer.sync_all().await?;
    tracker.finish();
    Ok(copied)
}
