//! Caption timing: per-word cues derived from synthesized audio.
//!
//! Alignment is approximate. Decoded token boundaries get a deterministic
//! cleanup pass (midpoint tie-break, clamp to segment duration), and when the
//! engine fails or returns nothing the aligner falls back to proportional
//! timing weighted by character count. Only unreadable audio is an error.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::cache::{ArtifactStore, fingerprint};
use crate::error::{ReelError, Result};
use crate::media::tool_command;
use crate::types::{AlignedCaptions, CaptionCue, NarrationSegment};

/// One decoded token with its approximate time span, as reported by the
/// alignment capability.
#[derive(Debug, Clone)]
pub struct TokenSpan {
    pub token: String,
    pub start: f64,
    pub end: f64,
}

#[async_trait]
pub trait AlignmentEngine: Send + Sync {
    /// Stable identifier (engine + model version), part of the cue cache key.
    fn id(&self) -> String;

    async fn align(&self, audio_path: &Path, text: &str) -> Result<Vec<TokenSpan>>;
}

/// OpenAI whisper CLI with word timestamps. The JSON output lands next to the
/// audio file, named after its stem.
pub struct WhisperCliAligner {
    pub model: String,
}

#[derive(Debug, Deserialize)]
struct WhisperOutput {
    #[serde(default)]
    segments: Vec<WhisperSegment>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    start: f64,
    end: f64,
    text: String,
    #[serde(default)]
    words: Vec<WhisperWord>,
}

#[derive(Debug, Deserialize)]
struct WhisperWord {
    word: String,
    start: f64,
    end: f64,
}

#[async_trait]
impl AlignmentEngine for WhisperCliAligner {
    fn id(&self) -> String {
        format!("whisper-cli:{}", self.model)
    }

    async fn align(&self, audio_path: &Path, _text: &str) -> Result<Vec<TokenSpan>> {
        let output_dir = audio_path.parent().unwrap_or(Path::new("."));
        let output = tool_command("whisper")
            .arg(audio_path)
            .args(["--model", &self.model])
            .args(["--word_timestamps", "True"])
            .args(["--output_format", "json"])
            .arg("--output_dir")
            .arg(output_dir)
            .output()
            .await?;

        if !output.status.success() {
            return Err(ReelError::Alignment {
                audio_path: audio_path.to_path_buf(),
                reason: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        let stem = audio_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "audio".to_string());
        let json_path = output_dir.join(format!("{stem}.json"));
        let json = tokio::fs::read_to_string(&json_path).await?;
        let parsed: WhisperOutput = serde_json::from_str(&json)?;

        let mut tokens = Vec::new();
        for segment in parsed.segments {
            if segment.words.is_empty() {
                tokens.push(TokenSpan {
                    token: segment.text.trim().to_string(),
                    start: segment.start,
                    end: segment.end,
                });
            } else {
                for word in segment.words {
                    tokens.push(TokenSpan {
                        token: word.word.trim().to_string(),
                        start: word.start,
                        end: word.end,
                    });
                }
            }
        }
        Ok(tokens)
    }
}

/// Build non-overlapping, monotonic cues from decoded tokens. Adjacent
/// boundaries are tied off at the midpoint between the earlier cue's decoded
/// end and the next cue's decoded start; the final end is clamped to the
/// segment duration.
fn cues_from_tokens(tokens: &[TokenSpan], duration: f64) -> Vec<CaptionCue> {
    let mut cues: Vec<CaptionCue> = tokens
        .iter()
        .filter(|t| !t.token.is_empty())
        .map(|t| CaptionCue {
            text: t.token.clone(),
            start: t.start.max(0.0),
            end: t.end.max(0.0),
        })
        .collect();

    for i in 1..cues.len() {
        let boundary = (cues[i - 1].end + cues[i].start) / 2.0;
        cues[i - 1].end = boundary;
        cues[i].start = cues[i].start.max(boundary);
    }

    for cue in cues.iter_mut() {
        cue.start = cue.start.min(duration);
        cue.end = cue.end.min(duration);
    }

    cues.retain(|c| c.end > c.start);
    cues
}

/// Proportional fallback: the segment duration is split across words by
/// character-count weight.
fn proportional_cues(text: &str, duration: f64) -> Vec<CaptionCue> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() || duration <= 0.0 {
        return Vec::new();
    }
    let total_weight: f64 = words.iter().map(|w| w.chars().count() as f64).sum();

    let mut cues = Vec::with_capacity(words.len());
    let mut cursor = 0.0;
    for word in &words {
        let weight = word.chars().count() as f64;
        let end = cursor + duration * weight / total_weight;
        cues.push(CaptionCue {
            text: (*word).to_string(),
            start: cursor,
            end: end.min(duration),
        });
        cursor = end;
    }
    if let Some(last) = cues.last_mut() {
        last.end = duration;
    }
    cues
}

pub struct CaptionAligner {
    engine: Arc<dyn AlignmentEngine>,
    store: ArtifactStore,
}

impl CaptionAligner {
    pub fn new(engine: Arc<dyn AlignmentEngine>, store: ArtifactStore) -> Self {
        Self { engine, store }
    }

    /// Align one segment. Errors only when the audio itself is unreadable or
    /// empty; every alignment-quality problem lands in the fallback path.
    pub async fn align_segment(&self, segment: &NarrationSegment) -> Result<AlignedCaptions> {
        // Cue timings are derived from the synthesized audio, so the audio
        // identity (its cache stem carries the TTS engine/voice fingerprint)
        // is part of the key: a voice change must not serve stale cues.
        let audio_key = segment
            .audio_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let key = fingerprint(&[&segment.text, &audio_key, &self.engine.id(), "cues"]);
        let cues_path = self.store.cues_path(&key);
        if let Some(cached) = self.store.get_json::<AlignedCaptions>(&cues_path).await? {
            tracing::debug!(order_index = segment.order_index, key, "caption cue cache hit");
            return Ok(cached);
        }

        let readable = hound::WavReader::open(&segment.audio_path)
            .map(|r| r.len() > 0)
            .unwrap_or(false);
        if !readable {
            return Err(ReelError::Alignment {
                audio_path: segment.audio_path.clone(),
                reason: "audio buffer unreadable or empty".to_string(),
            });
        }

        let aligned = match self.engine.align(&segment.audio_path, &segment.text).await {
            Ok(tokens) if !tokens.is_empty() => AlignedCaptions {
                cues: cues_from_tokens(&tokens, segment.duration_secs),
                proportional_fallback: false,
            },
            Ok(_) | Err(_) => {
                tracing::warn!(
                    order_index = segment.order_index,
                    "alignment unavailable, using proportional timing"
                );
                AlignedCaptions {
                    cues: proportional_cues(&segment.text, segment.duration_secs),
                    proportional_fallback: true,
                }
            }
        };

        self.store.put_json(&cues_path, &aligned).await?;
        Ok(aligned)
    }

    /// Align every segment and shift cues onto the run timeline using
    /// cumulative segment offsets (`gap_secs` of silence sits between
    /// concatenated segments). Returns the full ordered cue list plus whether
    /// any segment used the proportional fallback.
    pub async fn align_all(
        &self,
        segments: &[NarrationSegment],
        gap_secs: f64,
    ) -> Result<(Vec<CaptionCue>, bool)> {
        let mut all = Vec::new();
        let mut any_fallback = false;
        let mut offset = 0.0;

        for segment in segments {
            let aligned = self.align_segment(segment).await?;
            any_fallback |= aligned.proportional_fallback;
            for cue in aligned.cues {
                all.push(CaptionCue {
                    text: cue.text,
                    start: offset + cue.start,
                    end: offset + cue.end,
                });
            }
            offset += segment.duration_secs + gap_secs;
        }

        Ok((all, any_fallback))
    }
}
