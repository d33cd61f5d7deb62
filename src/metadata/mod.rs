//! Metadata embedding
//!
//! Writes ID3v2 artist/album/title frames and an optional PNG front cover
//! into rendered WAV files with lofty.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use lofty::config::WriteOptions;
use lofty::picture::{Picture, PictureType};
use lofty::prelude::*;
use lofty::probe::Probe;
use lofty::tag::{Tag, TagType};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{MareaError, Result};

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Tags requested for an output file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackTags {
    pub artist: Option<String>,
    pub album: Option<String>,
    pub title: Option<String>,
    /// PNG image embedded as the front cover
    pub cover: Option<PathBuf>,
}

impl TrackTags {
    pub fn is_empty(&self) -> bool {
        self.artist.is_none() && self.album.is_none() && self.title.is_none() && self.cover.is_none()
    }

    /// Fill a missing title from the input file stem
    ///
    /// Only applies when some tag was requested; empty tags stay empty so
    /// untagged output is left alone.
    pub fn with_default_title(mut self, input: &Path) -> Self {
        if self.title.is_none() && !self.is_empty() {
            self.title = input
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned());
        }
        self
    }
}

/// Tags as read back from a file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmbeddedTags {
    pub artist: Option<String>,
    pub album: Option<String>,
    pub title: Option<String>,
    pub cover_bytes: Option<usize>,
}

fn metadata_error(path: &Path, e: impl std::fmt::Display) -> MareaError {
    MareaError::Metadata {
        reason: format!("{}: {}", path.display(), e),
    }
}

/// Check a cover file before any tag is written
pub fn validate_cover(path: &Path) -> Result<()> {
    let bytes = std::fs::read(path).map_err(|e| metadata_error(path, e))?;
    if !bytes.starts_with(&PNG_SIGNATURE) {
        return Err(metadata_error(path, "cover art must be a PNG image"));
    }
    Ok(())
}

/// Embed `tags` into the audio file at `path`
///
/// Nothing is written when `tags` is empty.
pub fn write_tags(path: &Path, tags: &TrackTags) -> Result<()> {
    if tags.is_empty() {
        debug!(path = %path.display(), "No tags requested");
        return Ok(());
    }

    let mut tag = Tag::new(TagType::Id3v2);
    if let Some(artist) = &tags.artist {
        tag.set_artist(artist.clone());
    }
    if let Some(album) = &tags.album {
        tag.set_album(album.clone());
    }
    if let Some(title) = &tags.title {
        tag.set_title(title.clone());
    }

    if let Some(cover) = &tags.cover {
        validate_cover(cover)?;
        let file = File::open(cover).map_err(|e| metadata_error(cover, e))?;
        let mut reader = BufReader::new(file);
        let mut picture = Picture::from_reader(&mut reader).map_err(|e| metadata_error(cover, e))?;
        picture.set_pic_type(PictureType::CoverFront);
        tag.push_picture(picture);
    }

    tag.save_to_path(path, WriteOptions::default())
        .map_err(|e| metadata_error(path, e))?;

    debug!(
        path = %path.display(),
        artist = tags.artist.as_deref(),
        album = tags.album.as_deref(),
        title = tags.title.as_deref(),
        cover = tags.cover.is_some(),
        "Embedded tags"
    );
    Ok(())
}

/// Read back the tags Marea writes
pub fn read_tags(path: &Path) -> Result<EmbeddedTags> {
    // Sniff the content; bypass copies keep their original container
    let tagged_file = Probe::open(path)
        .map_err(|e| metadata_error(path, e))?
        .guess_file_type()
        .map_err(|e| metadata_error(path, e))?
        .read()
        .map_err(|e| metadata_error(path, e))?;

    let tag = tagged_file
        .tag(TagType::Id3v2)
        .or_else(|| tagged_file.primary_tag())
        .or_else(|| tagged_file.first_tag());

    Ok(tag
        .map(|tag| EmbeddedTags {
            artist: tag.artist().map(|s| s.to_string()),
            album: tag.album().map(|s| s.to_string()),
            title: tag.title().map(|s| s.to_string()),
            cover_bytes: tag
                .pictures()
                .iter()
                .find(|p| p.pic_type() == PictureType::CoverFront)
                .map(|p| p.data().len()),
        })
        .unwrap_or_default())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{export_audio, generate_stereo_test_tone, ExportFormat};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    /// 1x1 transparent PNG
    const TINY_PNG: [u8; 67] = [
        0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
        0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F,
        0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0A, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00,
        0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49,
        0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
    ];

    fn rendered_wav(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("out.wav");
        let tone = generate_stereo_test_tone(440.0, 550.0, 0.1, 44100);
        export_audio(&tone, &path, ExportFormat::default()).unwrap();
        path
    }

    #[test]
    fn test_tags_round_trip_through_wav() {
        let dir = TempDir::new().unwrap();
        let wav = rendered_wav(&dir);
        let cover = dir.path().join("cover.png");
        std::fs::write(&cover, TINY_PNG).unwrap();

        let tags = TrackTags {
            artist: Some("Tide Pool".to_string()),
            album: Some("Neap".to_string()),
            title: Some("Spring".to_string()),
            cover: Some(cover),
        };
        write_tags(&wav, &tags).unwrap();

        let read = read_tags(&wav).unwrap();
        assert_eq!(
            read,
            EmbeddedTags {
                artist: Some("Tide Pool".to_string()),
                album: Some("Neap".to_string()),
                title: Some("Spring".to_string()),
                cover_bytes: Some(TINY_PNG.len()),
            }
        );
    }

    #[test]
    fn test_default_title_from_stem() {
        let tags = TrackTags {
            artist: Some("Tide Pool".to_string()),
            ..TrackTags::default()
        }
        .with_default_title(Path::new("/in/high water.flac"));
        assert_eq!(tags.title.as_deref(), Some("high water"));

        let explicit = TrackTags {
            title: Some("Spring".to_string()),
            ..TrackTags::default()
        }
        .with_default_title(Path::new("/in/other.wav"));
        assert_eq!(explicit.title.as_deref(), Some("Spring"));

        assert!(TrackTags::default()
            .with_default_title(Path::new("/in/x.wav"))
            .is_empty());
    }

    #[test]
    fn test_empty_tags_leave_file_untouched() {
        let dir = TempDir::new().unwrap();
        let wav = rendered_wav(&dir);
        let before = std::fs::read(&wav).unwrap();
        write_tags(&wav, &TrackTags::default()).unwrap();
        assert_eq!(std::fs::read(&wav).unwrap(), before);
    }

    #[test]
    fn test_rejects_non_png_cover() {
        let dir = TempDir::new().unwrap();
        let wav = rendered_wav(&dir);
        let cover = dir.path().join("cover.jpg");
        std::fs::write(&cover, [0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10]).unwrap();
        let tags = TrackTags {
            cover: Some(cover),
            ..TrackTags::default()
        };
        let err = write_tags(&wav, &tags).unwrap_err();
        assert_eq!(err.error_code(), "METADATA_ERROR");
    }
}
