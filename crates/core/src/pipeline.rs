//! Pipeline orchestration: `Fetched -> Narrated -> Aligned -> BackgroundReady
//! -> Composed -> Done`, with background preparation overlapping the
//! narration/alignment leg.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::align::{AlignmentEngine, CaptionAligner};
use crate::background::{BackgroundSelector, MediaCatalog};
use crate::cache::{ArtifactStore, fingerprint};
use crate::compose::{SEGMENT_GAP_SECS, VideoComposer, narration_duration, output_duration};
use crate::content::ContentSource;
use crate::error::{PipelineFailure, ReelError, Stage};
use crate::synth::{NarrationSynthesizer, TtsEngine, plan_units, sanitize};
use crate::types::{BackgroundAsset, RenderConfig, RenderJob, RenderedVideo};

/// Rough speaking rate used to size the background before the narration track
/// exists. Only an optimization: a bad guess costs one extra preparation.
pub const ESTIMATED_SECS_PER_CHAR: f64 = 0.06;

/// The estimated-duration background is reused only when it overshoots the
/// exact target by at most this many seconds.
pub const ESTIMATE_TOLERANCE_SECS: f64 = 0.5;

/// Expected narration length for a set of planned text units. Counts the
/// sanitized characters, the same text the TTS engine will actually speak.
pub fn estimate_narration_secs(units: &[String]) -> f64 {
    let chars: usize = units.iter().map(|u| sanitize(u).chars().count()).sum();
    let gaps = units.len().saturating_sub(1) as f64 * SEGMENT_GAP_SECS;
    chars as f64 * ESTIMATED_SECS_PER_CHAR + gaps
}

/// Whether the background prepared from the estimate must be thrown away and
/// re-prepared with the exact narration duration. Reuse requires the
/// speculative asset to cover the exact target: the mux trims it down to the
/// exact duration, whereas an undershooting background would end before the
/// narration does.
pub fn needs_exact_prepare(estimated_target: f64, exact_target: f64) -> bool {
    estimated_target < exact_target || estimated_target - exact_target > ESTIMATE_TOLERANCE_SECS
}

pub struct Pipeline {
    content: Arc<dyn ContentSource>,
    tts: Arc<dyn TtsEngine>,
    aligner: Arc<dyn AlignmentEngine>,
    catalog: Arc<dyn MediaCatalog>,
    store: ArtifactStore,
}

impl Pipeline {
    pub fn new(
        content: Arc<dyn ContentSource>,
        tts: Arc<dyn TtsEngine>,
        aligner: Arc<dyn AlignmentEngine>,
        catalog: Arc<dyn MediaCatalog>,
        store: ArtifactStore,
    ) -> Self {
        Self {
            content,
            tts,
            aligner,
            catalog,
            store,
        }
    }

    /// Run the whole pipeline for one post. Yields exactly one rendered video
    /// or the failing stage with its reason; there is no partial output.
    pub async fn run(
        &self,
        post_reference: &str,
        config: &RenderConfig,
        output_path: &Path,
    ) -> std::result::Result<RenderedVideo, PipelineFailure> {
        let result = self.run_inner(post_reference, config, output_path).await;
        if let Err(failure) = &result {
            tracing::error!(stage = %failure.stage, error = %failure.error, "pipeline run failed");
        }
        result
    }

    async fn run_inner(
        &self,
        post_reference: &str,
        config: &RenderConfig,
        output_path: &Path,
    ) -> std::result::Result<RenderedVideo, PipelineFailure> {
        let fail = PipelineFailure::new;

        // Fetched
        let post = self
            .content
            .fetch(post_reference)
            .await
            .map_err(|e| fail(Stage::Fetched, e))?;

        let units = plan_units(&post);
        if units.is_empty() {
            return Err(fail(
                Stage::Fetched,
                ReelError::ContentUnavailable {
                    reference: post_reference.to_string(),
                    reason: "post has no narratable text".to_string(),
                },
            ));
        }

        let run_key = fingerprint(&[
            &post.id,
            &units.join("\n"),
            &self.tts.id(),
            &self.aligner.id(),
            &format!(
                "{}x{}@{}",
                config.screen_width, config.screen_height, config.min_video_duration
            ),
        ]);
        let run_dir = self.store.run_dir(&run_key);
        tokio::fs::create_dir_all(&run_dir)
            .await
            .map_err(|e| fail(Stage::Fetched, e.into()))?;

        // Background preparation overlaps narration synthesis and alignment,
        // sized from a text-length estimate until the exact duration exists.
        let estimated_target = output_duration(
            estimate_narration_secs(&units),
            config.min_video_duration,
        );
        let background_task = self.spawn_background(estimated_target, config, &run_dir);

        // Narrated
        let synthesizer = NarrationSynthesizer::new(self.tts.clone(), self.store.clone());
        let segments = match synthesizer.synthesize_all(&units).await {
            Ok(segments) => segments,
            Err(e) => {
                return Err(self
                    .cancel_run(background_task, &run_dir, fail(Stage::Narrated, e))
                    .await);
            }
        };

        // Aligned
        let aligner = CaptionAligner::new(self.aligner.clone(), self.store.clone());
        let (cues, used_fallback) = match aligner.align_all(&segments, SEGMENT_GAP_SECS).await {
            Ok(aligned) => aligned,
            Err(e) => {
                return Err(self
                    .cancel_run(background_task, &run_dir, fail(Stage::Aligned, e))
                    .await);
            }
        };

        // BackgroundReady
        let total_narration = narration_duration(&segments);
        let exact_target = output_duration(total_narration, config.min_video_duration);

        let background = match background_task.await {
            Ok(Ok(asset)) if !needs_exact_prepare(estimated_target, exact_target) => asset,
            Ok(Ok(_)) | Ok(Err(_)) | Err(_) => {
                // estimate missed or the speculative task failed: prepare with
                // the exact duration before composing
                tracing::debug!(
                    estimated_target,
                    exact_target,
                    "re-invoking background selector with exact duration"
                );
                let selector = BackgroundSelector::new(self.catalog.clone());
                selector
                    .prepare(exact_target, config, &run_dir.join("background_exact.mp4"))
                    .await
                    .map_err(|e| fail(Stage::BackgroundReady, e))?
            }
        };

        // Composed
        let job = RenderJob {
            segments,
            cues,
            background,
            total_narration_duration: total_narration,
            config: config.clone(),
            output_path: output_path.to_path_buf(),
        };
        let composer = VideoComposer::new(run_dir.clone());
        let mut rendered = composer
            .compose(&job)
            .await
            .map_err(|e| fail(Stage::Composed, e))?;
        rendered.used_proportional_fallback = used_fallback;

        // Done
        tracing::info!(
            output = %rendered.output_path.display(),
            duration_secs = rendered.duration_secs,
            "pipeline run complete"
        );
        Ok(rendered)
    }

    fn spawn_background(
        &self,
        target_duration: f64,
        config: &RenderConfig,
        run_dir: &Path,
    ) -> JoinHandle<crate::error::Result<BackgroundAsset>> {
        let selector = BackgroundSelector::new(self.catalog.clone());
        let config = config.clone();
        let out: PathBuf = run_dir.join("background_estimate.mp4");
        tokio::spawn(async move { selector.prepare(target_duration, &config, &out).await })
    }

    /// Fatal stage failure: cancel the in-flight background task and discard
    /// the run's uncommitted intermediates. The fingerprint-keyed segment and
    /// cue caches are committed artifacts and stay.
    async fn cancel_run(
        &self,
        background_task: JoinHandle<crate::error::Result<BackgroundAsset>>,
        run_dir: &Path,
        failure: PipelineFailure,
    ) -> PipelineFailure {
        background_task.abort();
        let _ = background_task.await;
        let _ = tokio::fs::remove_dir_all(run_dir).await;
        failure
    }
}
