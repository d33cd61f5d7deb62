//! Session Tests
//!
//! End-to-end runs of the engine over generated WAV fixtures.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use marea::engine::{export_audio, generate_stereo_test_tone, probe_asset, ExportFormat};
use marea::mastering::MasteringOutcome;
use marea::metadata::{read_tags, TrackTags};
use marea::params::FixedClock;
use marea::policy::memory::MIB;
use marea::policy::{HardwareToken, StaticCapabilityProbe, StaticMemoryProbe};
use marea::session::sha256_file;
use marea::{
    Engine, EngineConfig, ErrorKind, MareaError, ProcessRequest, ProcessingTier, ProgressCallback,
    SessionStage,
};

// === Fixtures ===

struct Workspace {
    _dir: TempDir,
    input_dir: PathBuf,
    output_dir: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let input_dir = dir.path().join("in");
        let output_dir = dir.path().join("out");
        std::fs::create_dir_all(&input_dir).unwrap();
        std::fs::create_dir_all(&output_dir).unwrap();
        Self {
            _dir: dir,
            input_dir,
            output_dir,
        }
    }

    fn tone(&self, name: &str, secs: f32, sample_rate: u32) -> PathBuf {
        let path = self.input_dir.join(name);
        let tone = generate_stereo_test_tone(440.0, 660.0, secs, sample_rate);
        export_audio(&tone, &path, ExportFormat::default()).unwrap();
        path
    }

    fn output(&self, name: &str) -> PathBuf {
        self.output_dir.join(name)
    }

    fn output_entries(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(&self.output_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

fn config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.external.encoder_paths = vec![PathBuf::from("/nonexistent/marea-test-ffmpeg")];
    config
}

fn engine_with(config: EngineConfig, available_mib: u64, hardware: HardwareToken) -> Engine {
    Engine::builder(config)
        .memory_probe(Arc::new(StaticMemoryProbe::available(available_mib * MIB)))
        .capability_probe(Arc::new(StaticCapabilityProbe(hardware)))
        .clock(Box::new(FixedClock(
            Utc.with_ymd_and_hms(2024, 3, 25, 7, 0, 0).unwrap(),
        )))
        .build()
        .unwrap()
}

fn full_engine() -> Engine {
    engine_with(config(), 8 * 1024, HardwareToken::standard())
}

fn recorder() -> (ProgressCallback, Arc<Mutex<Vec<f32>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let callback: ProgressCallback = Arc::new(move |p| sink.lock().unwrap().push(p));
    (callback, seen)
}

const TINY_PNG: [u8; 67] = [
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F, 0x15, 0xC4,
    0x89, 0x00, 0x00, 0x00, 0x0A, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00, 0x01, 0x00, 0x00,
    0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4E, 0x44, 0xAE,
    0x42, 0x60, 0x82,
];

// === End to End ===

#[tokio::test]
async fn test_full_tier_end_to_end_with_tags() {
    let ws = Workspace::new();
    let input = ws.tone("song.wav", 2.0, 44100);
    let output = ws.output("song.wav");
    let cover = ws.input_dir.join("cover.png");
    std::fs::write(&cover, TINY_PNG).unwrap();

    let tags = TrackTags {
        artist: Some("Tide Pool".to_string()),
        album: Some("Neap".to_string()),
        title: Some("Spring".to_string()),
        cover: Some(cover),
    };
    let engine = full_engine();
    let outcome = engine
        .process(
            ProcessRequest::new(&input, &output).with_tags(tags),
            None,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.tier, ProcessingTier::Full);
    assert!(outcome.fallbacks.is_empty());
    assert_eq!(outcome.mastering, MasteringOutcome::InProcess);
    assert!(outcome.tags_embedded);
    assert_eq!(outcome.output, output);
    assert_eq!(
        outcome.stage_history,
        vec![
            SessionStage::Idle,
            SessionStage::Validating,
            SessionStage::Converting,
            SessionStage::ApplyingEffects,
            SessionStage::Mastering,
            SessionStage::EmbeddingMetadata,
            SessionStage::Completed,
        ]
    );

    let rendered = probe_asset(&output).unwrap();
    assert_eq!(rendered.spec.sample_rate, 44100);
    assert_eq!(rendered.spec.channels, 2);
    assert!((rendered.duration_secs() - 2.0).abs() <= 0.1);

    let embedded = read_tags(&output).unwrap();
    assert_eq!(embedded.artist.as_deref(), Some("Tide Pool"));
    assert_eq!(embedded.album.as_deref(), Some("Neap"));
    assert_eq!(embedded.title.as_deref(), Some("Spring"));
    assert_eq!(embedded.cover_bytes, Some(TINY_PNG.len()));

    assert_eq!(outcome.output_sha256, sha256_file(&output).await.unwrap());
    assert_eq!(ws.output_entries(), vec!["song.wav".to_string()]);
}

#[tokio::test]
async fn test_progress_is_monotonic_and_ends_at_one() {
    let ws = Workspace::new();
    let input = ws.tone("song.wav", 2.0, 44100);
    let (callback, seen) = recorder();

    full_engine()
        .process(
            ProcessRequest::new(&input, ws.output("song.wav")),
            Some(callback),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    let values = seen.lock().unwrap().clone();
    assert!(!values.is_empty());
    assert!(values.windows(2).all(|w| w[0] < w[1]), "{:?}", values);
    assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));
    assert_eq!(*values.last().unwrap(), 1.0);
}

#[tokio::test]
async fn test_fixed_clock_renders_identical_output() {
    let ws = Workspace::new();
    let input = ws.tone("song.wav", 1.0, 44100);

    let first = full_engine()
        .process(
            ProcessRequest::new(&input, ws.output("a.wav")),
            None,
            CancellationToken::new(),
        )
        .await
        .unwrap();
    let second = full_engine()
        .process(
            ProcessRequest::new(&input, ws.output("b.wav")),
            None,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(first.parameters, second.parameters);
    assert_eq!(first.output_sha256, second.output_sha256);
}

// === Cancellation and Failure ===

#[tokio::test]
async fn test_cancellation_leaves_no_files_and_silences_progress() {
    let ws = Workspace::new();
    let input = ws.tone("long.wav", 20.0, 44100);
    let output = ws.output("long.wav");

    let mut config = config();
    config.chunk.poll_interval_ms = 5;
    let engine = engine_with(config, 8 * 1024, HardwareToken::standard());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let after_cancel = Arc::new(Mutex::new(0usize));
    let callback: ProgressCallback = {
        let seen = Arc::clone(&seen);
        let after_cancel = Arc::clone(&after_cancel);
        Arc::new(move |p| {
            if trigger.is_cancelled() {
                *after_cancel.lock().unwrap() += 1;
            }
            seen.lock().unwrap().push(p);
            if p >= 0.05 {
                trigger.cancel();
            }
        })
    };

    let err = engine
        .process(ProcessRequest::new(&input, &output), Some(callback), cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, MareaError::Cancelled));
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(!output.exists());
    assert!(ws.output_entries().is_empty());
    assert_eq!(*after_cancel.lock().unwrap(), 0);
    assert!(seen.lock().unwrap().iter().all(|v| *v < 1.0));
}

#[tokio::test]
async fn test_unsupported_input_fails_without_output() {
    let ws = Workspace::new();
    let input = ws.input_dir.join("notes.txt");
    std::fs::write(&input, b"not audio").unwrap();
    let output = ws.output("notes.wav");

    let err = full_engine()
        .process(ProcessRequest::new(&input, &output), None, CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Input);
    assert!(ws.output_entries().is_empty());
}

#[tokio::test]
async fn test_invalid_cover_fails_before_rendering() {
    let ws = Workspace::new();
    let input = ws.tone("song.wav", 0.5, 44100);
    let cover = ws.input_dir.join("cover.jpg");
    std::fs::write(&cover, [0xFF, 0xD8, 0xFF, 0xE0]).unwrap();
    let tags = TrackTags {
        cover: Some(cover),
        ..TrackTags::default()
    };

    let err = full_engine()
        .process(
            ProcessRequest::new(&input, ws.output("song.wav")).with_tags(tags),
            None,
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.error_code(), "METADATA_ERROR");
    assert!(ws.output_entries().is_empty());
}

// === Tier Fallback ===

#[tokio::test]
async fn test_low_sample_rate_falls_back_to_simplified() {
    let ws = Workspace::new();
    let input = ws.tone("low.wav", 1.0, 4000);

    let outcome = full_engine()
        .process(
            ProcessRequest::new(&input, ws.output("low.wav")),
            None,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.tier, ProcessingTier::Simplified);
    assert_eq!(outcome.fallbacks.len(), 1);
    assert_eq!(outcome.fallbacks[0].from, ProcessingTier::Full);
    assert_eq!(outcome.fallbacks[0].to, ProcessingTier::Simplified);
    assert_eq!(outcome.mastering, MasteringOutcome::InProcess);
    assert_eq!(probe_asset(&outcome.output).unwrap().spec.sample_rate, 4000);
}

#[tokio::test]
async fn test_low_memory_selects_simplified() {
    let ws = Workspace::new();
    let input = ws.tone("song.wav", 0.5, 44100);
    let engine = engine_with(config(), 512, HardwareToken::standard());

    let outcome = engine
        .process(
            ProcessRequest::new(&input, ws.output("song.wav")),
            None,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.tier, ProcessingTier::Simplified);
    assert!(outcome.fallbacks.is_empty());
}

#[tokio::test]
async fn test_missing_encoder_falls_back_to_simplified() {
    let ws = Workspace::new();
    let input = ws.tone("song.wav", 0.5, 44100);
    let engine = engine_with(config(), 8 * 1024, HardwareToken::problematic("Mac14,2"));

    let outcome = engine
        .process(
            ProcessRequest::new(&input, ws.output("song.wav")),
            None,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.tier, ProcessingTier::Simplified);
    assert_eq!(outcome.fallbacks[0].from, ProcessingTier::ExternalTool);
    assert_eq!(outcome.mastering, MasteringOutcome::InProcess);
    assert_eq!(ws.output_entries(), vec!["song.wav".to_string()]);
}

#[tokio::test]
async fn test_critical_memory_on_problematic_hardware_bypasses() {
    let ws = Workspace::new();
    let input = ws.tone("song.wav", 0.5, 44100);
    let output = ws.output("song.wav");
    let engine = engine_with(config(), 100, HardwareToken::problematic("Mac14,2"));

    let outcome = engine
        .process(ProcessRequest::new(&input, &output), None, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.tier, ProcessingTier::Bypass);
    assert_eq!(outcome.mastering, MasteringOutcome::Skipped);
    assert!(!outcome.tags_embedded);
    assert_eq!(std::fs::read(&output).unwrap(), std::fs::read(&input).unwrap());
}

#[tokio::test]
async fn test_bypass_copy_keeps_source_container_name() {
    let ws = Workspace::new();
    // RIFF bytes under an AIFF name; the decoder goes by content
    let input = ws.tone("song.aif", 0.5, 44100);
    let engine = engine_with(config(), 100, HardwareToken::problematic("Mac14,2"));

    let outcome = engine
        .process(
            ProcessRequest::new(&input, ws.output("song.wav")),
            None,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.tier, ProcessingTier::Bypass);
    assert_eq!(outcome.output, ws.output("song.aif"));
    assert_eq!(ws.output_entries(), vec!["song.aif".to_string()]);
    assert_eq!(std::fs::read(&outcome.output).unwrap(), std::fs::read(&input).unwrap());
    assert_eq!(sha256_file(&outcome.output).await.unwrap(), outcome.output_sha256);
}

#[cfg(unix)]
fn fake_encoder(dir: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    // -hide_banner -nostdin -y -i <in> -af <graph> -c:a <codec> <out>
    let tool = dir.join("fake-ffmpeg");
    std::fs::write(&tool, "#!/bin/sh\nfor last; do :; done\ncp \"$5\" \"$last\"\n").unwrap();
    std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();
    tool
}

#[cfg(unix)]
#[tokio::test]
async fn test_external_tier_uses_encoder_for_both_passes() {
    let ws = Workspace::new();
    let input = ws.tone("song.wav", 0.5, 44100);
    let tool = fake_encoder(&ws.input_dir);

    let mut config = config();
    config.external.encoder_paths = vec![tool.clone()];
    let engine = engine_with(config, 8 * 1024, HardwareToken::problematic("Mac14,2"));

    let outcome = engine
        .process(
            ProcessRequest::new(&input, ws.output("song.wav")),
            None,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.tier, ProcessingTier::ExternalTool);
    assert_eq!(outcome.mastering, MasteringOutcome::External { encoder: tool });
    assert_eq!(outcome.frames_written, probe_asset(&input).unwrap().total_frames);
    assert_eq!(ws.output_entries(), vec!["song.wav".to_string()]);
}

// === Batch and Cache ===

#[tokio::test]
async fn test_batch_is_sequential_and_shares_the_cache() {
    let ws = Workspace::new();
    let a = ws.tone("a.wav", 0.5, 44100);
    let b = ws.tone("b.wav", 0.5, 48000);
    let engine = full_engine();

    let results = engine
        .process_batch(
            vec![
                ProcessRequest::new(&a, ws.output("a.wav")),
                ProcessRequest::new(&b, ws.output("b.wav")),
                ProcessRequest::new(&a, ws.output("a-again.wav")),
            ],
            None,
            CancellationToken::new(),
        )
        .await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(engine.cache().len(), 2);
    assert!(engine.cache().contains(&a));
    assert_eq!(
        ws.output_entries(),
        vec!["a-again.wav".to_string(), "a.wav".to_string(), "b.wav".to_string()]
    );
}
