//! Per-run artifact cache keyed by content fingerprints.
//!
//! Synthesized audio and caption cues are expensive to produce (neural TTS,
//! alignment), so each is cached on disk under a fingerprint of its inputs
//! plus the engine identifiers that produced it. Re-running the pipeline on
//! identical input hits the cache and invokes the engines zero times.

use std::path::{Path, PathBuf};

use serde::{Serialize, de::DeserializeOwned};
use sha2::{Digest, Sha256};
use tokio::fs;

use crate::error::Result;

/// Deterministic fingerprint over a set of input parts. Engine/model
/// identifiers are included by the caller so that switching a voice or an
/// aligner version invalidates the key.
pub fn fingerprint(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        // length-prefix separator, so ["ab","c"] != ["a","bc"]
        hasher.update([0u8]);
        hasher.update(part.len().to_le_bytes());
    }
    let digest = hasher.finalize();
    let mut out = String::with_capacity(32);
    for byte in &digest[..16] {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

pub fn root_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("storyreel")
}

/// Disk-backed artifact store. Writes are at-most-once per key: an existing
/// artifact is never overwritten, so re-writing an identical value is a no-op.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn open_default() -> Self {
        Self::new(root_cache_dir())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Cached WAV path for a synthesized narration segment.
    pub fn segment_audio_path(&self, key: &str) -> PathBuf {
        self.root.join("segments").join(format!("{key}.wav"))
    }

    /// Cached cue sequence path for an aligned segment.
    pub fn cues_path(&self, key: &str) -> PathBuf {
        self.root.join("cues").join(format!("{key}.json"))
    }

    /// Scratch directory for one pipeline run's intermediates (narration
    /// track, prepared background, subtitle file). Not shared across runs.
    pub fn run_dir(&self, key: &str) -> PathBuf {
        self.root.join("runs").join(key)
    }

    pub async fn ensure_parent(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Serialize `value` to `path` unless the artifact already exists.
    pub async fn put_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        if fs::try_exists(path).await? {
            tracing::debug!(path = %path.display(), "artifact already cached, skipping write");
            return Ok(());
        }
        Self::ensure_parent(path).await?;
        let json = serde_json::to_string_pretty(value)?;
        fs::write(path, json).await?;
        Ok(())
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
        if !fs::try_exists(path).await? {
            return Ok(None);
        }
        let json = fs::read_to_string(path).await?;
        Ok(Some(serde_json::from_str(&json)?))
    }
}
