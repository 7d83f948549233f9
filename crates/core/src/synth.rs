//! Narration synthesis: post text -> ordered audio segments.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use tokio::io::AsyncWriteExt;

use crate::cache::{ArtifactStore, fingerprint};
use crate::error::{ReelError, Result};
use crate::media::{tool_command, wav_duration_secs};
use crate::types::{NarrationSegment, PostContent};

/// Units longer than this are split at sentence boundaries before synthesis;
/// neural TTS quality degrades on very long inputs.
pub const MAX_UNIT_CHARS: usize = 200;

/// Units shorter than this are coalesced with the following unit. Very short
/// clips produce degenerate audio that throws off alignment.
pub const MIN_UNIT_CHARS: usize = 12;

/// Text the sanitized retry is truncated to before giving up on a segment.
const RETRY_TRUNCATE_CHARS: usize = 500;

/// Capability boundary over the TTS engine: text in, a WAV file out.
#[async_trait]
pub trait TtsEngine: Send + Sync {
    /// Stable identifier (engine + voice/model version), part of the cache
    /// fingerprint so a voice change invalidates cached segments.
    fn id(&self) -> String;

    async fn synthesize(&self, text: &str, output_path: &Path) -> Result<()>;
}

/// Piper TTS driven as a subprocess: text on stdin, WAV at `--output_file`.
pub struct PiperTts {
    pub model_path: std::path::PathBuf,
}

#[async_trait]
impl TtsEngine for PiperTts {
    fn id(&self) -> String {
        format!("piper:{}", self.model_path.display())
    }

    async fn synthesize(&self, text: &str, output_path: &Path) -> Result<()> {
        let mut child = tool_command("piper")
            .arg("--model")
            .arg(&self.model_path)
            .arg("--output_file")
            .arg(output_path)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(text.as_bytes()).await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(ReelError::Synthesis {
                text: text.chars().take(80).collect(),
                reason: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }
        Ok(())
    }
}

/// Strip URLs and characters the TTS engine reads aloud or chokes on.
/// Apostrophes survive; "+" and "&" are spelled out.
pub fn sanitize(text: &str) -> String {
    let urls = Regex::new(
        r"((http|https)://)?[a-zA-Z0-9./?:@\-_=#]+\.([a-zA-Z]){2,6}([a-zA-Z0-9.&/?:@\-_=#])*",
    )
    .expect("static regex");
    let text = urls.replace_all(text, " ");

    let text = text.replace('+', " plus ").replace('&', " and ");

    let symbols = Regex::new(r#"[\^_~@!;#:%—“”‘"*/{}\[\]()\\|<>=]"#).expect("static regex");
    let text = symbols.replace_all(&text, " ");

    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.trim_end_matches('.').trim().to_string()
}

fn split_sentences(text: &str) -> Vec<String> {
    let re = Regex::new(r"(?s)([^.!?]+[.!?]+)|([^.!?]+$)").expect("static regex");
    let sentences: Vec<String> = re
        .find_iter(text)
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if sentences.is_empty() {
        vec![text.trim().to_string()]
    } else {
        sentences
    }
}

/// Pack sentences into chunks of at most `max_chars`, never splitting a
/// sentence across chunks (an over-long single sentence stays whole).
fn pack_sentences(sentences: Vec<String>, max_chars: usize) -> Vec<String> {
    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();
    for sentence in sentences {
        if current.is_empty() {
            current = sentence;
        } else if current.len() + 1 + sentence.len() <= max_chars {
            current.push(' ');
            current.push_str(&sentence);
        } else {
            chunks.push(std::mem::replace(&mut current, sentence));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Deterministic, order-preserving coalescing: a unit under `MIN_UNIT_CHARS`
/// merges into the unit that follows it; a short trailing unit merges into
/// its predecessor.
fn coalesce_short(units: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(units.len());
    let mut pending: Option<String> = None;

    for unit in units {
        let merged = match pending.take() {
            Some(prefix) => format!("{prefix} {unit}"),
            None => unit,
        };
        if merged.len() < MIN_UNIT_CHARS {
            pending = Some(merged);
        } else {
            out.push(merged);
        }
    }

    if let Some(trailing) = pending {
        match out.last_mut() {
            Some(last) => {
                last.push(' ');
                last.push_str(&trailing);
            }
            None => out.push(trailing),
        }
    }
    out
}

/// Final ordered list of text units to synthesize for a post.
pub fn plan_units(post: &PostContent) -> Vec<String> {
    let mut units = Vec::new();
    for raw in post.narration_units() {
        if raw.len() <= MAX_UNIT_CHARS {
            units.push(raw);
        } else {
            units.extend(pack_sentences(split_sentences(&raw), MAX_UNIT_CHARS));
        }
    }
    coalesce_short(units)
}

pub struct NarrationSynthesizer {
    engine: Arc<dyn TtsEngine>,
    store: ArtifactStore,
}

impl NarrationSynthesizer {
    pub fn new(engine: Arc<dyn TtsEngine>, store: ArtifactStore) -> Self {
        Self { engine, store }
    }

    /// Synthesize every unit in order, one `NarrationSegment` per unit.
    /// Cached segments are reused without invoking the engine. A declined
    /// unit is retried once with a sanitized, truncated variant before the
    /// failure is treated as fatal.
    pub async fn synthesize_all(&self, units: &[String]) -> Result<Vec<NarrationSegment>> {
        let mut segments = Vec::with_capacity(units.len());
        for (order_index, text) in units.iter().enumerate() {
            let segment = self.synthesize_unit(order_index, text).await?;
            segments.push(segment);
        }
        Ok(segments)
    }

    async fn synthesize_unit(&self, order_index: usize, text: &str) -> Result<NarrationSegment> {
        let engine_id = self.engine.id();
        let key = fingerprint(&[text, &engine_id]);
        let audio_path = self.store.segment_audio_path(&key);

        if !tokio::fs::try_exists(&audio_path).await? {
            ArtifactStore::ensure_parent(&audio_path).await?;
            if let Err(first) = self.engine.synthesize(text, &audio_path).await {
                let fallback: String = sanitize(text).chars().take(RETRY_TRUNCATE_CHARS).collect();
                if fallback.is_empty() {
                    return Err(first);
                }
                tracing::warn!(
                    order_index,
                    error = %first,
                    "synthesis declined input, retrying with sanitized variant"
                );
                self.engine.synthesize(&fallback, &audio_path).await?;
            }
        } else {
            tracing::debug!(order_index, key, "narration segment cache hit");
        }

        let duration_secs = wav_duration_secs(&audio_path)?;
        if duration_secs <= 0.0 {
            return Err(ReelError::Synthesis {
                text: text.chars().take(80).collect(),
                reason: "engine produced an empty waveform".to_string(),
            });
        }

        Ok(NarrationSegment {
            order_index,
            text: text.to_string(),
            audio_path,
            duration_secs,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Writes a silent WAV whose duration is proportional to the text length,
    /// and counts invocations so cache behavior is observable.
    pub(crate) struct StubTts {
        pub calls: std::sync::atomic::AtomicUsize,
        pub decline_containing: Option<String>,
    }

    impl StubTts {
        pub fn new() -> Self {
            Self {
                calls: std::sync::atomic::AtomicUsize::new(0),
                decline_containing: None,
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    pub(crate) fn write_silent_wav(path: &Path, secs: f64) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for _ in 0..((secs * 16000.0) as usize) {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[async_trait]
    impl TtsEngine for StubTts {
        fn id(&self) -> String {
            "stub:v1".to_string()
        }

        async fn synthesize(&self, text: &str, output_path: &Path) -> Result<()> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if let Some(marker) = &self.decline_containing {
                if text.contains(marker.as_str()) {
                    return Err(ReelError::Synthesis {
                        text: text.to_string(),
                        reason: "unsupported characters".to_string(),
                    });
                }
            }
            // 0.05 s per character keeps durations text-proportional
            write_silent_wav(output_path, 0.05 * text.len() as f64);
            Ok(())
        }
    }

    fn post(title: &str, body: &str, comments: &[&str]) -> PostContent {
        PostContent {
            id: "t".into(),
            title: title.into(),
            body: body.into(),
            comments: comments.iter().map(|c| c.to_string()).collect(),
        }
    }

    #[test]
    fn sanitize_strips_urls_and_symbols() {
        let cleaned = sanitize("check https://example.com/x (wow) [ok] a+b");
        assert!(!cleaned.contains("example"));
        assert!(!cleaned.contains('('));
        assert!(cleaned.contains("plus"));
    }

    #[test]
    fn sanitize_keeps_apostrophes() {
        assert_eq!(sanitize("it's fine"), "it's fine");
    }

    #[test]
    fn long_body_splits_at_sentence_boundaries() {
        let sentence = "This is a fairly ordinary sentence of some length. ";
        let body = sentence.repeat(10);
        let units = plan_units(&post("A reasonable title", &body, &[]));
        assert!(units.len() > 2);
        for unit in &units[1..] {
            assert!(unit.len() <= MAX_UNIT_CHARS);
        }
    }

    #[test]
    fn short_units_coalesce_forward() {
        let units = coalesce_short(vec![
            "Hi.".to_string(),
            "This one is long enough to stand alone.".to_string(),
        ]);
        assert_eq!(units, vec!["Hi. This one is long enough to stand alone."]);
    }

    #[test]
    fn short_trailing_unit_merges_backward() {
        let units = coalesce_short(vec![
            "This one is long enough to stand alone.".to_string(),
            "Bye.".to_string(),
        ]);
        assert_eq!(units.len(), 1);
        assert!(units[0].ends_with("Bye."));
    }

    #[test]
    fn plan_units_preserve_source_order() {
        let units = plan_units(&post(
            "An adequately sized title",
            "The body paragraph comes second here.",
            &["The first comment arrives third in order."],
        ));
        assert_eq!(units.len(), 3);
        assert!(units[0].starts_with("An adequately"));
        assert!(units[1].starts_with("The body"));
        assert!(units[2].starts_with("The first comment"));
    }

    #[tokio::test]
    async fn synthesize_all_orders_and_caches() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().to_path_buf());
        let engine = Arc::new(StubTts::new());
        let synth = NarrationSynthesizer::new(engine.clone(), store.clone());

        let units = vec![
            "The first narration unit text.".to_string(),
            "The second narration unit text.".to_string(),
        ];
        let segments = synth.synthesize_all(&units).await.unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].order_index, 0);
        assert_eq!(segments[1].order_index, 1);
        assert!(segments.iter().all(|s| s.duration_secs > 0.0));
        assert_eq!(engine.call_count(), 2);

        // warm cache: zero additional engine invocations
        let again = synth.synthesize_all(&units).await.unwrap();
        assert_eq!(engine.call_count(), 2);
        assert_eq!(again[0].audio_path, segments[0].audio_path);
    }

    #[tokio::test]
    async fn declined_unit_retries_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().to_path_buf());
        let engine = Arc::new(StubTts {
            calls: std::sync::atomic::AtomicUsize::new(0),
            decline_containing: Some("[".to_string()),
        });
        let synth = NarrationSynthesizer::new(engine.clone(), store);

        let units = vec!["A unit with [brackets] the engine rejects.".to_string()];
        let segments = synth.synthesize_all(&units).await.unwrap();
        assert_eq!(segments.len(), 1);
        // one declined attempt plus one sanitized retry
        assert_eq!(engine.call_count(), 2);
    }
}
