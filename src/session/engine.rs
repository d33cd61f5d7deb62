//! Processing engine
//!
//! Owns the long-lived pieces (effects graph, mastering chain, asset cache,
//! policy, parameter generator) and drives one session per file through the
//! stage machine. Renders run on the blocking pool; each stage races its
//! work against a watchdog and the session's cancellation token, and the
//! losers are cancelled.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use super::staging::{copy_streamed, StagingFiles};
use super::state::{SessionStage, StageMachine};
use crate::cache::AssetCache;
use crate::config::EngineConfig;
use crate::engine::{AudioAsset, AudioSource, DecodedSource, ExportFormat, WavSink};
use crate::error::{MareaError, Result};
use crate::mastering::{
    effects_filter_graph, master_external, ExternalEncoder, MasteringChain, MasteringOutcome,
};
use crate::metadata::{validate_cover, write_tags, TrackTags};
use crate::params::{Clock, NaturalParameterGenerator, ProcessingParameters, RangeTable};
use crate::pipeline::{
    ChunkScheduler, EffectsPipeline, ProgressCallback, ProgressEmitter, ProgressStage,
    ProgressTracker,
};
use crate::policy::{
    CapabilityProbe, HardwarePolicy, MemoryProbe, ProcessingTier, SystemCapabilityProbe,
    SystemMemoryProbe, TierDecision,
};

/// How long a cancelled render may take to notice its token
const LOSER_GRACE: Duration = Duration::from_secs(5);

// ============================================================================
// Requests and Outcomes
// ============================================================================

/// One file to process
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    pub tags: TrackTags,
    /// Fixed parameters instead of generated ones
    pub parameters: Option<ProcessingParameters>,
}

impl ProcessRequest {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            tags: TrackTags::default(),
            parameters: None,
        }
    }

    pub fn with_tags(mut self, tags: TrackTags) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_parameters(mut self, parameters: ProcessingParameters) -> Self {
        self.parameters = Some(parameters);
        self
    }
}

/// A tier step taken after a recoverable error
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierFallback {
    pub from: ProcessingTier,
    pub to: ProcessingTier,
    pub reason: String,
}

/// Report of a completed session
#[derive(Debug, Clone, Serialize)]
pub struct SessionOutcome {
    pub session_id: Uuid,
    pub input: PathBuf,
    pub output: PathBuf,
    /// Tier that produced the output
    pub tier: ProcessingTier,
    pub fallbacks: Vec<TierFallback>,
    pub parameters: ProcessingParameters,
    pub frames_written: u64,
    pub mastering: MasteringOutcome,
    pub tags_embedded: bool,
    pub stage_history: Vec<SessionStage>,
    pub output_sha256: String,
    pub elapsed_ms: u64,
}

/// Result of the effects stage
#[derive(Debug, Clone)]
struct EffectsRender {
    tier: ProcessingTier,
    path: PathBuf,
    frames: u64,
    chunk_frames: usize,
}

// ============================================================================
// Engine Builder
// ============================================================================

/// Builder for [`Engine`]
pub struct EngineBuilder {
    config: EngineConfig,
    memory: Option<Arc<dyn MemoryProbe>>,
    capability: Option<Arc<dyn CapabilityProbe>>,
    clock: Option<Box<dyn Clock>>,
    ranges: Option<RangeTable>,
    cache: Option<Arc<AssetCache>>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            memory: None,
            capability: None,
            clock: None,
            ranges: None,
            cache: None,
        }
    }

    pub fn memory_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.memory = Some(probe);
        self
    }

    pub fn capability_probe(mut self, probe: Arc<dyn CapabilityProbe>) -> Self {
        self.capability = Some(probe);
        self
    }

    pub fn clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn ranges(mut self, ranges: RangeTable) -> Self {
        self.ranges = Some(ranges);
        self
    }

    /// Share an existing cache instead of creating one
    pub fn cache(mut self, cache: Arc<AssetCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn build(self) -> Result<Engine> {
        self.config.validate()?;

        let memory = self
            .memory
            .unwrap_or_else(|| Arc::new(SystemMemoryProbe));
        let capability = self.capability.unwrap_or_else(|| {
            Arc::new(SystemCapabilityProbe::new(
                self.config.policy.problematic_hardware.clone(),
            ))
        });
        let policy = HardwarePolicy::new(
            self.config.policy.clone(),
            self.config.chunk.clone(),
            Arc::clone(&memory),
            capability,
        );

        let mut generator = match self.clock {
            Some(clock) => NaturalParameterGenerator::new(clock),
            None => NaturalParameterGenerator::system(),
        };
        if let Some(ranges) = self.ranges {
            generator = generator.with_ranges(ranges);
        }

        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(AssetCache::new(self.config.cache.clone(), memory)));

        Ok(Engine {
            config: self.config,
            policy,
            generator: Arc::new(generator),
            cache,
            pipeline: Arc::new(Mutex::new(EffectsPipeline::new())),
            mastering: Arc::new(Mutex::new(MasteringChain::new())),
        })
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Batch audio transformation engine
pub struct Engine {
    config: EngineConfig,
    policy: HardwarePolicy,
    generator: Arc<NaturalParameterGenerator>,
    cache: Arc<AssetCache>,
    pipeline: Arc<Mutex<EffectsPipeline>>,
    mastering: Arc<Mutex<MasteringChain>>,
}

impl Engine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn policy(&self) -> &HardwarePolicy {
        &self.policy
    }

    pub fn generator(&self) -> &NaturalParameterGenerator {
        &self.generator
    }

    pub fn cache(&self) -> &Arc<AssetCache> {
        &self.cache
    }

    /// Process one file
    ///
    /// On any failure every staging file is removed and the destination is
    /// left untouched. Progress reaches exactly 1.0 only on success and goes
    /// silent once `cancel` fires.
    pub async fn process(
        &self,
        request: ProcessRequest,
        callback: Option<ProgressCallback>,
        cancel: CancellationToken,
    ) -> Result<SessionOutcome> {
        let session_id = Uuid::new_v4();
        let span = info_span!("session", id = %session_id, input = %request.input.display());
        self.run_session(session_id, request, callback, cancel)
            .instrument(span)
            .await
    }

    /// Process files strictly one after another
    ///
    /// Once `cancel` fires the remaining files are reported as cancelled
    /// without being started.
    pub async fn process_batch(
        &self,
        requests: Vec<ProcessRequest>,
        callback: Option<ProgressCallback>,
        cancel: CancellationToken,
    ) -> Vec<Result<SessionOutcome>> {
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            if cancel.is_cancelled() {
                results.push(Err(MareaError::Cancelled));
                continue;
            }
            results.push(self.process(request, callback.clone(), cancel.clone()).await);
        }
        results
    }

    async fn run_session(
        &self,
        session_id: Uuid,
        request: ProcessRequest,
        callback: Option<ProgressCallback>,
        cancel: CancellationToken,
    ) -> Result<SessionOutcome> {
        let emitter = Arc::new(ProgressEmitter::new(callback, cancel.clone()));
        let mut machine = StageMachine::new();
        let mut staging = StagingFiles::new(&request.output, session_id);

        let result = self
            .drive(session_id, &request, &mut machine, &mut staging, &emitter, &cancel)
            .await;

        match result {
            Ok(outcome) => {
                emitter.complete();
                info!(
                    tier = %outcome.tier,
                    output = %outcome.output.display(),
                    frames = outcome.frames_written,
                    mastering = outcome.mastering.name(),
                    elapsed_ms = outcome.elapsed_ms,
                    "Session completed"
                );
                Ok(outcome)
            }
            Err(error) => {
                emitter.close();
                let (terminal, error) = if cancel.is_cancelled() {
                    (SessionStage::Cancelled, MareaError::Cancelled)
                } else if matches!(error, MareaError::Cancelled) {
                    (SessionStage::Cancelled, error)
                } else {
                    (SessionStage::Failed, error)
                };
                if let Err(e) = machine.transition(terminal) {
                    warn!(error = %e, "Could not record terminal stage");
                }
                staging.remove_all().await;
                self.reset_pipeline().await;

                match terminal {
                    SessionStage::Cancelled => info!("Session cancelled"),
                    _ => warn!(
                        error = %error,
                        code = error.error_code(),
                        kind = %error.kind(),
                        "Session failed"
                    ),
                }
                Err(error)
            }
        }
    }

    async fn drive(
        &self,
        session_id: Uuid,
        request: &ProcessRequest,
        machine: &mut StageMachine,
        staging: &mut StagingFiles,
        emitter: &Arc<ProgressEmitter>,
        cancel: &CancellationToken,
    ) -> Result<SessionOutcome> {
        let started = Instant::now();

        // Validating
        machine.advance()?;
        check_cancelled(cancel)?;
        emitter.emit_stage(ProgressStage::Validating, 0.0);
        if request.input == request.output {
            return Err(MareaError::Processing {
                reason: format!("output would overwrite input {}", request.input.display()),
            });
        }
        let asset = self.load_asset(&request.input).await?;
        asset.spec.layout()?;
        emitter.emit_stage(ProgressStage::Validating, 1.0);

        // Converting
        machine.advance()?;
        check_cancelled(cancel)?;
        let decision = self.policy.evaluate();
        let parameters = request
            .parameters
            .map(ProcessingParameters::normalized)
            .unwrap_or_else(|| self.generator.generate());
        let format = ExportFormat::new(self.config.output.bit_depth)?;
        let budget = self.config.timeouts.budget_for(asset.duration_secs());
        if let Some(cover) = &request.tags.cover {
            validate_cover(cover)?;
        }
        self.prove_decodable(&asset).await?;
        info!(
            tier = %decision.tier,
            sample_rate = asset.spec.sample_rate,
            channels = asset.spec.channels,
            frames = asset.total_frames,
            budget_secs = budget.as_secs_f64(),
            "Session planned"
        );
        emitter.emit_stage(ProgressStage::Converting, 1.0);

        // ApplyingEffects
        machine.advance()?;
        let (effects, fallbacks) = self
            .apply_effects(&asset, &parameters, &decision, format, budget, staging, emitter, cancel)
            .await?;

        // Mastering
        machine.advance()?;
        check_cancelled(cancel)?;
        let (final_path, mastering) = self
            .master(&effects, &asset, format, budget, staging, emitter, cancel)
            .await?;

        // EmbeddingMetadata
        machine.advance()?;
        check_cancelled(cancel)?;
        let tags = request.tags.clone().with_default_title(&request.input);
        let tags_embedded = self.embed_tags(&final_path, &tags, effects.tier).await?;
        let output_sha256 = sha256_file(&final_path).await?;

        // A verbatim copy is named for the container it actually holds
        let bypass = effects.tier == ProcessingTier::Bypass;
        if bypass && request.output.with_extension(&asset.format) == request.input {
            return Err(MareaError::Processing {
                reason: format!("bypass copy would overwrite input {}", request.input.display()),
            });
        }

        // Past the seal a cancel can no longer undo the session
        if !emitter.seal() {
            return Err(MareaError::Cancelled);
        }
        let output = if bypass {
            staging.commit_as(&final_path, &asset.format).await?
        } else {
            staging.commit(&final_path).await?
        };

        machine.advance()?;
        Ok(SessionOutcome {
            session_id,
            input: request.input.clone(),
            output,
            tier: effects.tier,
            fallbacks,
            parameters,
            frames_written: effects.frames,
            mastering,
            tags_embedded,
            stage_history: machine.history().iter().map(|r| r.stage).collect(),
            output_sha256,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn reset_pipeline(&self) {
        let pipeline = Arc::clone(&self.pipeline);
        let reset = tokio::task::spawn_blocking(move || {
            pipeline.lock().unwrap_or_else(|p| p.into_inner()).reset();
        });
        if let Err(e) = reset.await {
            warn!(error = %e, "Pipeline reset did not complete");
        }
    }

    // ------------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------------

    async fn load_asset(&self, path: &Path) -> Result<Arc<AudioAsset>> {
        let cache = Arc::clone(&self.cache);
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || cache.get(&path))
            .await
            .map_err(join_error)?
    }

    /// Open the decoder once so undecodable streams fail before rendering
    async fn prove_decodable(&self, asset: &AudioAsset) -> Result<()> {
        let path = asset.path.clone();
        tokio::task::spawn_blocking(move || DecodedSource::open(&path).map(drop))
            .await
            .map_err(join_error)?
    }

    // ------------------------------------------------------------------------
    // Effects
    // ------------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    async fn apply_effects(
        &self,
        asset: &AudioAsset,
        parameters: &ProcessingParameters,
        decision: &TierDecision,
        format: ExportFormat,
        budget: Duration,
        staging: &mut StagingFiles,
        emitter: &Arc<ProgressEmitter>,
        cancel: &CancellationToken,
    ) -> Result<(EffectsRender, Vec<TierFallback>)> {
        let mut tier = decision.tier;
        let mut fallbacks = Vec::new();

        loop {
            check_cancelled(cancel)?;
            let attempt = decision.with_tier(tier, self.policy.chunk_config());
            let result = match tier {
                ProcessingTier::Full | ProcessingTier::Simplified => {
                    self.render_effects(asset, parameters, &attempt, format, budget, staging, emitter, cancel)
                        .await
                }
                ProcessingTier::ExternalTool => {
                    self.external_effects(asset, parameters, &attempt, format, budget, staging, emitter, cancel)
                        .await
                }
                ProcessingTier::Bypass => {
                    self.bypass_copy(asset, &attempt, budget, staging, emitter, cancel)
                        .await
                }
            };

            match result {
                Ok(render) => return Ok((render, fallbacks)),
                Err(error) => {
                    let reason = error.to_string();
                    let next = self.policy.fallback(tier, error)?;
                    fallbacks.push(TierFallback {
                        from: tier,
                        to: next,
                        reason,
                    });
                    tier = next;
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn render_effects(
        &self,
        asset: &AudioAsset,
        parameters: &ProcessingParameters,
        decision: &TierDecision,
        format: ExportFormat,
        budget: Duration,
        staging: &mut StagingFiles,
        emitter: &Arc<ProgressEmitter>,
        cancel: &CancellationToken,
    ) -> Result<EffectsRender> {
        let staged = staging.stage(&format!("effects-{}", decision.tier));
        let tracker = Arc::new(self.tracker(asset.total_frames));
        let child = cancel.child_token();

        let task = {
            let pipeline = Arc::clone(&self.pipeline);
            let tracker = Arc::clone(&tracker);
            let child = child.clone();
            let input = asset.path.clone();
            let output = staged.clone();
            let spec = asset.spec;
            let total_frames = asset.total_frames;
            let params = *parameters;
            let tier = decision.tier;
            let chunk_frames = decision.chunk_frames;

            tokio::task::spawn_blocking(move || {
                let mut pipeline = pipeline.lock().unwrap_or_else(|p| p.into_inner());
                pipeline.configure(&params, tier, spec.sample_rate, spec.channels)?;
                let mut source = DecodedSource::open(&input)?.with_total_frames(total_frames);
                let mut sink = WavSink::create(&output, spec, format)?;
                let report = ChunkScheduler::new(chunk_frames, child)
                    .with_tracker(tracker)
                    .run(&mut source, &mut *pipeline, &mut sink);
                pipeline.reset();
                report.map(|r| r.frames)
            })
        };

        match self
            .supervise(ProgressStage::Effects, task, tracker, budget, emitter, cancel, child)
            .await
        {
            Ok(frames) => Ok(EffectsRender {
                tier: decision.tier,
                path: staged,
                frames,
                chunk_frames: decision.chunk_frames,
            }),
            Err(e) => {
                staging.discard(&staged).await;
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn external_effects(
        &self,
        asset: &AudioAsset,
        parameters: &ProcessingParameters,
        decision: &TierDecision,
        format: ExportFormat,
        budget: Duration,
        staging: &mut StagingFiles,
        emitter: &Arc<ProgressEmitter>,
        cancel: &CancellationToken,
    ) -> Result<EffectsRender> {
        let encoder = ExternalEncoder::locate(&self.config.external.encoder_paths)?;
        let staged = staging.stage("effects-external");
        emitter.emit_stage(ProgressStage::Effects, 0.0);

        let rendered = encoder
            .run(
                &asset.path,
                &staged,
                &effects_filter_graph(parameters),
                format,
                budget,
                cancel,
            )
            .await;
        if let Err(e) = rendered {
            staging.discard(&staged).await;
            return Err(e);
        }

        let probe_path = staged.clone();
        let frames = tokio::task::spawn_blocking(move || {
            DecodedSource::open(&probe_path).map(|s| s.total_frames())
        })
        .await
        .map_err(join_error)?
        .map_err(|e| {
            // Unreadable encoder output counts as an encoder failure
            MareaError::ExternalToolFailed {
                status: None,
                stderr: e.to_string(),
            }
        });
        let frames = match frames {
            Ok(frames) => frames,
            Err(e) => {
                staging.discard(&staged).await;
                return Err(e);
            }
        };

        emitter.emit_stage(ProgressStage::Effects, 1.0);
        Ok(EffectsRender {
            tier: ProcessingTier::ExternalTool,
            path: staged,
            frames,
            chunk_frames: decision.chunk_frames,
        })
    }

    async fn bypass_copy(
        &self,
        asset: &AudioAsset,
        decision: &TierDecision,
        budget: Duration,
        staging: &mut StagingFiles,
        emitter: &Arc<ProgressEmitter>,
        cancel: &CancellationToken,
    ) -> Result<EffectsRender> {
        let staged = staging.stage_with_extension("bypass", &asset.format);
        let tracker = Arc::new(self.tracker(asset.byte_len));
        let child = cancel.child_token();

        let task = {
            let tracker = Arc::clone(&tracker);
            let child = child.clone();
            let input = asset.path.clone();
            let output = staged.clone();
            tokio::spawn(async move { copy_streamed(&input, &output, &tracker, &child).await })
        };

        match self
            .supervise(ProgressStage::Effects, task, tracker, budget, emitter, cancel, child)
            .await
        {
            Ok(bytes) => {
                info!(bytes, "Bypass copy complete");
                Ok(EffectsRender {
                    tier: ProcessingTier::Bypass,
                    path: staged,
                    frames: asset.total_frames,
                    chunk_frames: decision.chunk_frames,
                })
            }
            Err(e) => {
                staging.discard(&staged).await;
                Err(e)
            }
        }
    }

    // ------------------------------------------------------------------------
    // Mastering
    // ------------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    async fn master(
        &self,
        effects: &EffectsRender,
        asset: &AudioAsset,
        format: ExportFormat,
        budget: Duration,
        staging: &mut StagingFiles,
        emitter: &Arc<ProgressEmitter>,
        cancel: &CancellationToken,
    ) -> Result<(PathBuf, MasteringOutcome)> {
        match effects.tier {
            ProcessingTier::Bypass => {
                info!("Mastering skipped for bypass copy");
                Ok((effects.path.clone(), MasteringOutcome::Skipped))
            }
            ProcessingTier::ExternalTool => {
                let staged = staging.stage("mastered-external");
                emitter.emit_stage(ProgressStage::Mastering, 0.0);
                match master_external(
                    &self.config.external.encoder_paths,
                    &effects.path,
                    &staged,
                    format,
                    budget,
                    cancel,
                )
                .await
                {
                    Ok(outcome) => {
                        emitter.emit_stage(ProgressStage::Mastering, 1.0);
                        Ok((staged, outcome))
                    }
                    Err(e) => {
                        staging.discard(&staged).await;
                        Err(e)
                    }
                }
            }
            ProcessingTier::Full | ProcessingTier::Simplified => {
                let staged = staging.stage("mastered");
                let tracker = Arc::new(self.tracker(effects.frames));
                let child = cancel.child_token();

                let task = {
                    let chain = Arc::clone(&self.mastering);
                    let tracker = Arc::clone(&tracker);
                    let child = child.clone();
                    let input = effects.path.clone();
                    let output = staged.clone();
                    let spec = asset.spec;
                    let total_frames = effects.frames;
                    let chunk_frames = effects.chunk_frames;

                    tokio::task::spawn_blocking(move || {
                        let mut chain = chain.lock().unwrap_or_else(|p| p.into_inner());
                        chain.prepare(spec.sample_rate);
                        let mut source =
                            DecodedSource::open(&input)?.with_total_frames(total_frames);
                        let mut sink = WavSink::create(&output, spec, format)?;
                        ChunkScheduler::new(chunk_frames, child)
                            .with_tracker(tracker)
                            .run(&mut source, &mut *chain, &mut sink)
                    })
                };

                match self
                    .supervise(ProgressStage::Mastering, task, tracker, budget, emitter, cancel, child)
                    .await
                {
                    Ok(_) => {
                        // The pre-mastering render is no longer needed
                        staging.discard(&effects.path).await;
                        Ok((staged, MasteringOutcome::InProcess))
                    }
                    Err(e) => {
                        staging.discard(&staged).await;
                        Err(e)
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Metadata
    // ------------------------------------------------------------------------

    async fn embed_tags(
        &self,
        path: &Path,
        tags: &TrackTags,
        tier: ProcessingTier,
    ) -> Result<bool> {
        if tags.is_empty() {
            return Ok(false);
        }
        let target = path.to_path_buf();
        let requested = tags.clone();
        let written = tokio::task::spawn_blocking(move || write_tags(&target, &requested))
            .await
            .map_err(join_error)?;

        match written {
            Ok(()) => Ok(true),
            // A bypass copy keeps its container, which may not take ID3v2
            Err(e) if tier == ProcessingTier::Bypass => {
                warn!(error = %e, "Tags not embedded in bypass copy");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    // ------------------------------------------------------------------------
    // Supervision
    // ------------------------------------------------------------------------

    fn tracker(&self, total: u64) -> ProgressTracker {
        ProgressTracker::new(
            total,
            self.config.chunk.progress_step,
            self.config.chunk.progress_chunk_interval,
        )
    }

    /// Race `task` against the stage budget and the session token
    ///
    /// A poller forwards the tracker's snapshot on the configured interval.
    /// Whatever loses is cancelled: the poller is aborted and, if the task
    /// lost, its child token fires and the task gets a grace period to stop.
    #[allow(clippy::too_many_arguments)]
    async fn supervise<T: Send + 'static>(
        &self,
        stage: ProgressStage,
        mut task: JoinHandle<Result<T>>,
        tracker: Arc<ProgressTracker>,
        budget: Duration,
        emitter: &Arc<ProgressEmitter>,
        cancel: &CancellationToken,
        child: CancellationToken,
    ) -> Result<T> {
        let poller = {
            let emitter = Arc::clone(emitter);
            let period = self.config.poll_interval();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                loop {
                    ticker.tick().await;
                    emitter.emit_stage(stage, tracker.published());
                }
            })
        };

        let mut finished = false;
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(MareaError::Cancelled),
            joined = &mut task => {
                finished = true;
                joined.map_err(join_error).and_then(|r| r)
            }
            _ = tokio::time::sleep(budget) => Err(MareaError::Timeout {
                stage: stage.name().to_string(),
                budget_secs: budget.as_secs_f64(),
            }),
        };
        poller.abort();

        if !finished {
            child.cancel();
            if tokio::time::timeout(LOSER_GRACE, &mut task).await.is_err() {
                warn!(stage = stage.name(), "Render did not stop within the grace period");
                task.abort();
            }
        }

        if outcome.is_ok() {
            emitter.emit_stage(stage, 1.0);
        }
        outcome
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("cached_assets", &self.cache.len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(MareaError::Cancelled)
    } else {
        Ok(())
    }
}

fn join_error(e: JoinError) -> MareaError {
    MareaError::Processing {
        reason: format!("render task failed: {}", e),
    }
}

/// SHA-256 of a file as lowercase hex
pub async fn sha256_file(path: &Path) -> Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut file = std::fs::File::open(&path)?;
        let mut hasher = Sha256::new();
        let mut buffer = [0u8; 8192];

        loop {
            let bytes_read = file.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }

        Ok(format!("{:x}", hasher.finalize()))
    })
    .await
    .map_err(join_error)?
}

// ============================================================================
// Tests
// ============================================================================
