//! Background asset selection and preparation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;

use crate::error::{ReelError, Result};
use crate::media::{probe, run_ffmpeg};
use crate::types::{BackgroundAsset, BackgroundKind, CatalogEntry, RenderConfig};

/// Minimum source resolution accepted from the catalog. Anything smaller
/// upscales too visibly at 1080x1920.
pub const DEFAULT_RESOLUTION_FLOOR: (u32, u32) = (1280, 720);

const VIDEO_EXTENSIONS: [&str; 5] = ["mp4", "webm", "mkv", "mov", "avi"];

/// Read-only catalog of precomputed background candidates.
#[async_trait]
pub trait MediaCatalog: Send + Sync {
    async fn list_candidates(&self, resolution_floor: (u32, u32)) -> Result<Vec<CatalogEntry>>;
}

/// Catalog backed by a directory of downloaded clips, probed for duration and
/// dimensions on listing. The downloader that fills the directory is a
/// separate tool; this side never writes to it.
pub struct DirCatalog {
    pub root: PathBuf,
}

#[async_trait]
impl MediaCatalog for DirCatalog {
    async fn list_candidates(&self, resolution_floor: (u32, u32)) -> Result<Vec<CatalogEntry>> {
        let mut entries = Vec::new();
        let mut reader = match fs::read_dir(&self.root).await {
            Ok(reader) => reader,
            Err(_) => return Ok(entries),
        };

        while let Some(entry) = reader.next_entry().await? {
            let path = entry.path();
            let is_video = path
                .extension()
                .map(|e| {
                    let ext = e.to_string_lossy().to_lowercase();
                    VIDEO_EXTENSIONS.contains(&ext.as_str())
                })
                .unwrap_or(false);
            if !is_video {
                continue;
            }

            let info = match probe(&path).await {
                Ok(info) => info,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unprobeable candidate");
                    continue;
                }
            };
            let (Some(duration), Some((width, height))) =
                (info.duration_secs(), info.video_dimensions())
            else {
                continue;
            };
            if width < resolution_floor.0 || height < resolution_floor.1 {
                continue;
            }
            entries.push(CatalogEntry {
                storage_path: path,
                source_duration: duration,
                width,
                height,
            });
        }

        // deterministic listing order regardless of directory iteration
        entries.sort_by(|a, b| a.storage_path.cmp(&b.storage_path));
        Ok(entries)
    }
}

/// Selection policy: the candidate whose duration is closest to but not less
/// than the target wins (least trimming waste); if nothing is long enough,
/// the longest available gets looped. Ties break on path order.
pub fn select_entry(candidates: &[CatalogEntry], target_duration: f64) -> Result<CatalogEntry> {
    if candidates.is_empty() {
        return Err(ReelError::NoEligibleAsset {
            reason: "catalog is empty or no candidate meets the resolution floor".to_string(),
        });
    }

    let covering = candidates
        .iter()
        .filter(|c| c.source_duration >= target_duration)
        .min_by(|a, b| {
            a.source_duration
                .total_cmp(&b.source_duration)
                .then_with(|| a.storage_path.cmp(&b.storage_path))
        });

    let chosen = covering.unwrap_or_else(|| {
        candidates
            .iter()
            .max_by(|a, b| {
                a.source_duration
                    .total_cmp(&b.source_duration)
                    .then_with(|| b.storage_path.cmp(&a.storage_path))
            })
            .expect("non-empty candidates")
    });

    Ok(chosen.clone())
}

/// Number of extra playbacks (restarts at offset 0) needed to cover the
/// target. Zero when trimming suffices.
pub fn loops_needed(source_duration: f64, target_duration: f64) -> u32 {
    if source_duration <= 0.0 || source_duration >= target_duration {
        return 0;
    }
    ((target_duration / source_duration).ceil() as u32).saturating_sub(1)
}

pub struct BackgroundSelector {
    catalog: Arc<dyn MediaCatalog>,
    resolution_floor: (u32, u32),
}

impl BackgroundSelector {
    pub fn new(catalog: Arc<dyn MediaCatalog>) -> Self {
        Self {
            catalog,
            resolution_floor: DEFAULT_RESOLUTION_FLOOR,
        }
    }

    /// Select a candidate and re-encode it to exactly `target_duration` at
    /// the configured output resolution. Short sources loop by restarting at
    /// offset 0; long sources trim start-aligned. Resolution mismatches are
    /// covered by scale-to-cover plus center crop, never stretched.
    pub async fn prepare(
        &self,
        target_duration: f64,
        config: &RenderConfig,
        output_path: &Path,
    ) -> Result<BackgroundAsset> {
        let candidates = self.catalog.list_candidates(self.resolution_floor).await?;
        let entry = select_entry(&candidates, target_duration)?;
        let loops = loops_needed(entry.source_duration, target_duration);

        tracing::info!(
            source = %entry.storage_path.display(),
            source_duration = entry.source_duration,
            target_duration,
            loops,
            "preparing background asset"
        );

        let filter = format!(
            "scale=w={w}:h={h}:force_original_aspect_ratio=increase,crop={w}:{h}",
            w = config.screen_width,
            h = config.screen_height,
        );

        let mut args: Vec<String> = Vec::new();
        if loops > 0 {
            args.push("-stream_loop".into());
            args.push(loops.to_string());
        }
        args.push("-i".into());
        args.push(entry.storage_path.to_string_lossy().into_owned());
        args.push("-t".into());
        args.push(format!("{target_duration:.3}"));
        args.push("-vf".into());
        args.push(filter);
        args.push("-an".into());
        args.extend(["-c:v", "libx264", "-pix_fmt", "yuv420p", "-preset", "fast"].map(String::from));
        args.push(output_path.to_string_lossy().into_owned());

        run_ffmpeg(&args).await.map_err(|e| match e {
            ReelError::Render { reason } => ReelError::NoEligibleAsset {
                reason: format!("background preparation failed: {reason}"),
            },
            other => other,
        })?;

        Ok(BackgroundAsset {
            kind: BackgroundKind::Video,
            source_path: entry.storage_path,
            prepared_path: output_path.to_path_buf(),
            source_duration: entry.source_duration,
            target_duration,
            width: config.screen_width,
            height: config.screen_height,
            loops,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, duration: f64) -> CatalogEntry {
        CatalogEntry {
            storage_path: PathBuf::from(path),
            source_duration: duration,
            width: 1920,
            height: 1080,
        }
    }

    #[test]
    fn prefers_closest_not_less_than_target() {
        let candidates = vec![entry("a.mp4", 300.0), entry("b.mp4", 80.0), entry("c.mp4", 65.0)];
        let chosen = select_entry(&candidates, 70.0).unwrap();
        assert_eq!(chosen.storage_path, PathBuf::from("b.mp4"));
    }

    #[test]
    fn falls_back_to_longest_when_none_cover() {
        let candidates = vec![entry("a.mp4", 40.0), entry("b.mp4", 25.0)];
        let chosen = select_entry(&candidates, 70.0).unwrap();
        assert_eq!(chosen.storage_path, PathBuf::from("a.mp4"));
    }

    #[test]
    fn empty_catalog_is_fatal() {
        let err = select_entry(&[], 70.0).unwrap_err();
        assert!(matches!(err, ReelError::NoEligibleAsset { .. }));
    }

    #[test]
    fn forty_second_source_loops_once_for_seventy() {
        // one full playback plus a 30 s remainder after the seam at t=40
        assert_eq!(loops_needed(40.0, 70.0), 1);
    }

    #[test]
    fn covering_source_needs_no_loop() {
        assert_eq!(loops_needed(90.0, 70.0), 0);
        assert_eq!(loops_needed(70.0, 70.0), 0);
    }

    #[test]
    fn tiny_source_loops_many_times() {
        assert_eq!(loops_needed(10.0, 70.0), 6);
    }

    #[tokio::test]
    async fn dir_catalog_skips_missing_directory() {
        let catalog = DirCatalog {
            root: PathBuf::from("/nonexistent/backgrounds"),
        };
        let candidates = catalog.list_candidates(DEFAULT_RESOLUTION_FLOOR).await.unwrap();
        assert!(candidates.is_empty());
    }
}
