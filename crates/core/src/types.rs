use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A fetched post, immutable for the lifetime of a pipeline run. Comments
/// keep their insertion order, which is also their narration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostContent {
    pub id: String,
    pub title: String,
    pub body: String,
    pub comments: Vec<String>,
}

impl PostContent {
    /// Raw narration units in display order: title, body, then each comment.
    /// Empty units are skipped; splitting and coalescing happen later in the
    /// synthesizer.
    pub fn narration_units(&self) -> Vec<String> {
        let mut units = Vec::new();
        if !self.title.trim().is_empty() {
            units.push(self.title.trim().to_string());
        }
        if !self.body.trim().is_empty() {
            units.push(self.body.trim().to_string());
        }
        for comment in &self.comments {
            if !comment.trim().is_empty() {
                units.push(comment.trim().to_string());
            }
        }
        units
    }
}

/// One synthesized narration unit. Audio lives on disk in the per-run artifact
/// cache; `order_index` fixes the concatenation order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrationSegment {
    pub order_index: usize,
    pub text: String,
    pub audio_path: PathBuf,
    pub duration_secs: f64,
}

/// A timed caption fragment, relative to the start of its segment until the
/// composer shifts it onto the run timeline. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptionCue {
    pub text: String,
    pub start: f64,
    pub end: f64,
}

/// Aligner output for one segment. `proportional_fallback` is set when exact
/// alignment was unavailable and timing was derived from character weights, so
/// callers can surface degraded accuracy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlignedCaptions {
    pub cues: Vec<CaptionCue>,
    pub proportional_fallback: bool,
}

/// One candidate from the background media catalog.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub storage_path: PathBuf,
    pub source_duration: f64,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackgroundKind {
    Video,
    AudioOnly,
}

/// A background asset prepared to exactly `target_duration` at the output
/// resolution. Scoped to a single pipeline run.
#[derive(Debug, Clone)]
pub struct BackgroundAsset {
    pub kind: BackgroundKind,
    pub source_path: PathBuf,
    pub prepared_path: PathBuf,
    pub source_duration: f64,
    pub target_duration: f64,
    pub width: u32,
    pub height: u32,
    /// Number of extra restarts at offset 0 needed to cover the target.
    pub loops: u32,
}

/// Output parameters for a run. Defaults match the original short-form reel
/// format: 1080x1920 portrait with a 70 second floor.
#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub screen_width: u32,
    pub screen_height: u32,
    pub min_video_duration: f64,
    pub voice: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            screen_width: 1080,
            screen_height: 1920,
            min_video_duration: 70.0,
            voice: "en_US-amy-medium".to_string(),
        }
    }
}

/// Everything the composer needs to produce one output file: the ordered
/// narration track, run-timeline caption cues, the prepared background, and
/// output parameters.
#[derive(Debug)]
pub struct RenderJob {
    pub segments: Vec<NarrationSegment>,
    pub cues: Vec<CaptionCue>,
    pub background: BackgroundAsset,
    pub total_narration_duration: f64,
    pub config: RenderConfig,
    pub output_path: PathBuf,
}

/// Successful pipeline result.
#[derive(Debug, Clone)]
pub struct RenderedVideo {
    pub output_path: PathBuf,
    /// `None` when thumbnail extraction failed; the video itself still stands.
    pub thumbnail_path: Option<PathBuf>,
    pub duration_secs: f64,
    pub used_proportional_fallback: bool,
}
