use std::path::PathBuf;
use thiserror::Error;

/// Pipeline stages, in execution order. `Failed` results carry the stage
/// that was active when the error surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetched,
    Narrated,
    Aligned,
    BackgroundReady,
    Composed,
    Done,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Fetched => "Fetched",
            Stage::Narrated => "Narrated",
            Stage::Aligned => "Aligned",
            Stage::BackgroundReady => "BackgroundReady",
            Stage::Composed => "Composed",
            Stage::Done => "Done",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Error, Debug)]
pub enum ReelError {
    #[error("Content unavailable for {reference}: {reason}")]
    ContentUnavailable { reference: String, reason: String },

    #[error("Narration synthesis failed for {text:?}: {reason}")]
    Synthesis { text: String, reason: String },

    #[error("Caption alignment failed for {audio_path:?}: {reason}")]
    Alignment { audio_path: PathBuf, reason: String },

    #[error("No eligible background asset: {reason}")]
    NoEligibleAsset { reason: String },

    #[error("Render failed: {reason}")]
    Render { reason: String },

    #[error("Media probe failed for {path:?}: {reason}")]
    Probe { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid WAV data: {0}")]
    Wav(#[from] hound::Error),
}

pub type Result<T> = std::result::Result<T, ReelError>;

/// Terminal failure of a pipeline run: the failing stage plus the error that
/// killed it. The orchestrator never recovers across stages, so every failed
/// run surfaces exactly one of these.
#[derive(Error, Debug)]
#[error("pipeline failed at stage {stage}: {error}")]
pub struct PipelineFailure {
    pub stage: Stage,
    #[source]
    pub error: ReelError,
}

impl PipelineFailure {
    pub fn new(stage: Stage, error: ReelError) -> Self {
        Self { stage, error }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_reports_stage_and_reason() {
        let failure = PipelineFailure::new(
            Stage::Fetched,
            ReelError::ContentUnavailable {
                reference: "abc123".into(),
                reason: "post removed".into(),
            },
        );
        let msg = failure.to_string();
        assert!(msg.contains("Fetched"));
        assert!(msg.contains("abc123"));
    }
}
