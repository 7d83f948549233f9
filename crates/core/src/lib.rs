//! storyreel core library
//!
//! Turns a social-media text post into a short vertical video: synthesized
//! narration, time-aligned captions, and a looped/cropped background clip,
//! muxed at a fixed resolution with a minimum duration floor.

pub mod align;
pub mod background;
pub mod cache;
pub mod compose;
pub mod content;
pub mod error;
pub mod media;
pub mod pipeline;
pub mod synth;
pub mod types;

// Re-export commonly used items at crate root
pub use align::{AlignmentEngine, CaptionAligner, TokenSpan, WhisperCliAligner};
pub use background::{BackgroundSelector, DirCatalog, MediaCatalog};
pub use cache::{ArtifactStore, fingerprint, root_cache_dir};
pub use compose::{SEGMENT_GAP_SECS, VideoComposer};
pub use content::{ContentSource, RedditClient};
pub use error::{PipelineFailure, ReelError, Result, Stage};
pub use pipeline::Pipeline;
pub use synth::{NarrationSynthesizer, PiperTts, TtsEngine};
pub use types::{
    AlignedCaptions, BackgroundAsset, CaptionCue, CatalogEntry, NarrationSegment, PostContent,
    RenderConfig, RenderJob, RenderedVideo,
};
