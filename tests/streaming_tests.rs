//! Streaming Tests
//!
//! Chunked decode, effects and write over real files, with a source wrapper
//! that records how much audio is ever held at once.

use std::sync::Arc;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use marea::engine::{
    export_audio, generate_stereo_test_tone, probe_asset, AudioBuffer, AudioSource,
    DecodedSource, ExportFormat, SourceSpec, WavSink,
};
use marea::error::Result;
use marea::mastering::MasteringChain;
use marea::pipeline::{ChunkScheduler, EffectsPipeline, ProgressTracker};
use marea::{MareaError, NaturalParameterGenerator, ProcessingTier};

/// Delegating source that records the largest chunk it handed out
struct TrackingSource {
    inner: DecodedSource,
    largest: usize,
    delivered: u64,
}

impl AudioSource for TrackingSource {
    fn spec(&self) -> SourceSpec {
        self.inner.spec()
    }

    fn total_frames(&self) -> u64 {
        self.inner.total_frames()
    }

    fn read_chunk(&mut self, max_frames: usize) -> Result<AudioBuffer> {
        let chunk = self.inner.read_chunk(max_frames)?;
        self.largest = self.largest.max(chunk.num_samples());
        self.delivered += chunk.num_samples() as u64;
        Ok(chunk)
    }
}

fn fixture(dir: &TempDir, secs: f32) -> std::path::PathBuf {
    let path = dir.path().join("input.wav");
    let tone = generate_stereo_test_tone(220.0, 330.0, secs, 48000);
    export_audio(&tone, &path, ExportFormat::default()).unwrap();
    path
}

#[test]
fn test_render_never_holds_more_than_one_chunk() {
    let dir = TempDir::new().unwrap();
    let input = fixture(&dir, 30.0);
    let output = dir.path().join("output.wav");
    let asset = probe_asset(&input).unwrap();

    let params = NaturalParameterGenerator::system().generate_for(72.0, 21, 14);
    let mut pipeline = EffectsPipeline::new();
    pipeline
        .configure(&params, ProcessingTier::Full, 48000, 2)
        .unwrap();

    let mut source = TrackingSource {
        inner: DecodedSource::open(&input)
            .unwrap()
            .with_total_frames(asset.total_frames),
        largest: 0,
        delivered: 0,
    };
    let mut sink = WavSink::create(&output, asset.spec, ExportFormat::default()).unwrap();
    let tracker = Arc::new(ProgressTracker::new(asset.total_frames, 0.05, 100));

    let report = ChunkScheduler::new(2048, CancellationToken::new())
        .with_tracker(Arc::clone(&tracker))
        .run(&mut source, &mut pipeline, &mut sink)
        .unwrap();

    assert!(source.largest <= 2048, "largest chunk {}", source.largest);
    assert!(report.peak_chunk_bytes <= 2048 * 2 * std::mem::size_of::<f32>());
    assert_eq!(source.delivered, asset.total_frames);
    assert_eq!(report.frames, asset.total_frames);
    assert_eq!(tracker.published(), 1.0);
    assert_eq!(probe_asset(&output).unwrap().total_frames, asset.total_frames);
}

#[test]
fn test_mastering_pass_streams_and_stays_bounded() {
    let dir = TempDir::new().unwrap();
    let input = fixture(&dir, 5.0);
    let output = dir.path().join("mastered.wav");
    let asset = probe_asset(&input).unwrap();

    let mut chain = MasteringChain::new();
    chain.prepare(48000);
    let mut source = DecodedSource::open(&input).unwrap();
    let mut sink = WavSink::create(&output, asset.spec, ExportFormat::new(16).unwrap()).unwrap();

    let report = ChunkScheduler::new(1024, CancellationToken::new())
        .run(&mut source, &mut chain, &mut sink)
        .unwrap();

    assert_eq!(report.frames, asset.total_frames);
    let mastered = probe_asset(&output).unwrap();
    assert_eq!(mastered.spec, asset.spec);
}

#[test]
fn test_cancelled_scheduler_stops_before_reading() {
    let dir = TempDir::new().unwrap();
    let input = fixture(&dir, 1.0);
    let output = dir.path().join("output.wav");
    let asset = probe_asset(&input).unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let mut source = TrackingSource {
        inner: DecodedSource::open(&input).unwrap(),
        largest: 0,
        delivered: 0,
    };
    let mut sink = WavSink::create(&output, asset.spec, ExportFormat::default()).unwrap();
    let mut pipeline = EffectsPipeline::new();
    pipeline
        .configure(
            &marea::ProcessingParameters::default(),
            ProcessingTier::Simplified,
            48000,
            2,
        )
        .unwrap();

    let err = ChunkScheduler::new(512, cancel)
        .run(&mut source, &mut pipeline, &mut sink)
        .unwrap_err();

    assert!(matches!(err, MareaError::Cancelled));
    assert_eq!(source.delivered, 0);
}
