//! Final composition: narration concat, tail padding, caption overlay, mux.

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::error::{ReelError, Result};
use crate::media::run_ffmpeg;
use crate::types::{CaptionCue, NarrationSegment, RenderJob, RenderedVideo};

/// Silence inserted between concatenated narration segments. Caption offsets
/// in the aligner must use the same value.
pub const SEGMENT_GAP_SECS: f64 = 0.2;

/// Subtitle styling applied at mux time: bold centered captions with a dark
/// outline for readability over video.
const CAPTION_STYLE: &str =
    "Fontsize=22,Bold=1,Alignment=10,OutlineColour=&H1E1E1E&,Outline=2,Shadow=0";

/// The composed output always covers the narration and never undercuts the
/// configured floor. Underruns are padded with background and silence, not by
/// stretching narration.
pub fn output_duration(total_narration: f64, min_duration: f64) -> f64 {
    total_narration.max(min_duration)
}

/// Total timeline length of the narration track before padding: segment
/// durations plus one inter-segment gap per boundary.
pub fn narration_duration(segments: &[NarrationSegment]) -> f64 {
    let audio: f64 = segments.iter().map(|s| s.duration_secs).sum();
    let gaps = segments.len().saturating_sub(1) as f64 * SEGMENT_GAP_SECS;
    audio + gaps
}

/// Concatenate segment WAVs in `order_index` order into one track, inserting
/// the inter-segment gap and padding the tail with silence up to `pad_to`
/// seconds. Padding only ever extends the tail, so caption timing stays
/// anchored at t=0.
pub fn concat_narration(
    segments: &[NarrationSegment],
    pad_to: f64,
    output_path: &Path,
) -> Result<f64> {
    let mut ordered: Vec<&NarrationSegment> = segments.iter().collect();
    ordered.sort_by_key(|s| s.order_index);

    let first = ordered.first().ok_or_else(|| ReelError::Render {
        reason: "no narration segments to concatenate".to_string(),
    })?;
    let spec = hound::WavReader::open(&first.audio_path)?.spec();

    let mut writer = hound::WavWriter::create(output_path, spec)?;
    let gap_samples = (SEGMENT_GAP_SECS * spec.sample_rate as f64) as usize * spec.channels as usize;
    let mut written: u64 = 0;

    for (i, segment) in ordered.iter().enumerate() {
        let mut reader = hound::WavReader::open(&segment.audio_path)?;
        if reader.spec() != spec {
            return Err(ReelError::Render {
                reason: format!(
                    "segment {} WAV spec differs from the first segment",
                    segment.order_index
                ),
            });
        }
        for sample in reader.samples::<i16>() {
            writer.write_sample(sample?)?;
            written += 1;
        }
        if i + 1 < ordered.len() {
            for _ in 0..gap_samples {
                writer.write_sample(0i16)?;
            }
            written += gap_samples as u64;
        }
    }

    let frame_secs = |samples: u64| samples as f64 / spec.channels as f64 / spec.sample_rate as f64;
    if pad_to > frame_secs(written) {
        let pad_samples = ((pad_to - frame_secs(written)) * spec.sample_rate as f64) as usize
            * spec.channels as usize;
        for _ in 0..pad_samples {
            writer.write_sample(0i16)?;
        }
        written += pad_samples as u64;
    }

    writer.finalize()?;
    Ok(frame_secs(written))
}

fn format_srt_time(seconds: f64) -> String {
    let total_ms = (seconds * 1000.0).round() as u64;
    let ms = total_ms % 1000;
    let s = (total_ms / 1000) % 60;
    let m = (total_ms / 60_000) % 60;
    let h = total_ms / 3_600_000;
    format!("{h:02}:{m:02}:{s:02},{ms:03}")
}

/// Emit caption cues as an SRT file for ffmpeg's subtitles filter.
pub async fn write_srt(cues: &[CaptionCue], path: &Path) -> Result<()> {
    let mut out = String::new();
    for (i, cue) in cues.iter().enumerate() {
        out.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            i + 1,
            format_srt_time(cue.start),
            format_srt_time(cue.end),
            cue.text
        ));
    }
    fs::write(path, out).await?;
    Ok(())
}

pub struct VideoComposer {
    work_dir: PathBuf,
}

impl VideoComposer {
    pub fn new(work_dir: PathBuf) -> Self {
        Self { work_dir }
    }

    /// Produce exactly one output file from a fully-resolved render job. Any
    /// partially written output is deleted on failure.
    pub async fn compose(&self, job: &RenderJob) -> Result<RenderedVideo> {
        fs::create_dir_all(&self.work_dir).await?;

        let target = output_duration(job.total_narration_duration, job.config.min_video_duration);

        let narration_path = self.work_dir.join("narration.wav");
        let padded_secs = concat_narration(&job.segments, target, &narration_path)?;

        let srt_path = self.work_dir.join("captions.srt");
        write_srt(&job.cues, &srt_path).await?;

        tracing::info!(
            narration_secs = job.total_narration_duration,
            output_secs = target,
            cues = job.cues.len(),
            "muxing final video"
        );

        let subtitles = format!(
            "subtitles={}:force_style='{}'",
            srt_path.display(),
            CAPTION_STYLE
        );
        let size = format!("{}x{}", job.config.screen_width, job.config.screen_height);

        let mut args: Vec<String> = vec![
            "-i".into(),
            job.background.prepared_path.to_string_lossy().into_owned(),
            "-i".into(),
            narration_path.to_string_lossy().into_owned(),
            "-vf".into(),
            subtitles,
            "-s".into(),
            size,
            "-t".into(),
            format!("{target:.3}"),
        ];
        args.extend(
            [
                "-map",
                "0:v:0",
                "-map",
                "1:a:0",
                "-c:v",
                "libx264",
                "-c:a",
                "aac",
                "-pix_fmt",
                "yuv420p",
                "-movflags",
                "+faststart",
            ]
            .map(String::from),
        );
        args.push(job.output_path.to_string_lossy().into_owned());

        let result = run_ffmpeg(&args).await;

        if let Err(e) = result {
            // no partial output retained
            let _ = fs::remove_file(&job.output_path).await;
            return Err(e);
        }

        let thumbnail_path = self.extract_thumbnail(&job.output_path).await;

        Ok(RenderedVideo {
            output_path: job.output_path.clone(),
            thumbnail_path,
            duration_secs: padded_secs.max(target),
            used_proportional_fallback: false,
        })
    }

    /// Best-effort thumbnail from one second into the rendered video. A
    /// failure here keeps the finished video and simply yields no thumbnail.
    async fn extract_thumbnail(&self, video_path: &Path) -> Option<PathBuf> {
        let thumbnail_path = video_path.with_extension("png");
        let args: Vec<String> = vec![
            "-ss".into(),
            "1".into(),
            "-i".into(),
            video_path.to_string_lossy().into_owned(),
            "-vframes".into(),
            "1".into(),
            thumbnail_path.to_string_lossy().into_owned(),
        ];
        match run_ffmpeg(&args).await {
            Ok(()) => Some(thumbnail_path),
            Err(e) => {
                tracing::warn!(error = %e, "thumbnail extraction failed, keeping the video");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::tests::write_silent_wav;

    fn segment(dir: &Path, index: usize, secs: f64) -> NarrationSegment {
        let path = dir.join(format!("seg_{index}.wav"));
        write_silent_wav(&path, secs);
        NarrationSegment {
            order_index: index,
            text: format!("segment {index}"),
            audio_path: path,
            duration_secs: secs,
        }
    }

    #[tokio::test]
    async fn failed_thumbnail_extraction_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        let composer = VideoComposer::new(dir.path().to_path_buf());
        // no such video: extraction fails but does not error the render
        let missing = dir.path().join("missing.mp4");
        assert!(composer.extract_thumbnail(&missing).await.is_none());
    }

    #[test]
    fn output_duration_is_max_of_narration_and_floor() {
        assert_eq!(output_duration(12.3, 70.0), 70.0);
        assert_eq!(output_duration(90.0, 70.0), 90.0);
    }

    #[test]
    fn narration_duration_includes_inter_segment_gaps() {
        let dir = tempfile::tempdir().unwrap();
        let segments = vec![segment(dir.path(), 0, 1.0), segment(dir.path(), 1, 2.0)];
        let total = narration_duration(&segments);
        assert!((total - 3.2).abs() < 1e-9);
    }

    #[test]
    fn concat_pads_tail_to_requested_duration() {
        let dir = tempfile::tempdir().unwrap();
        let segments = vec![segment(dir.path(), 0, 1.0), segment(dir.path(), 1, 1.0)];
        let out = dir.path().join("track.wav");

        let secs = concat_narration(&segments, 10.0, &out).unwrap();
        assert!((secs - 10.0).abs() < 1e-3);
    }

    #[test]
    fn concat_respects_order_index_not_slice_order() {
        let dir = tempfile::tempdir().unwrap();
        // slice order reversed on purpose
        let segments = vec![segment(dir.path(), 1, 2.0), segment(dir.path(), 0, 1.0)];
        let out = dir.path().join("track.wav");

        let secs = concat_narration(&segments, 0.0, &out).unwrap();
        // 1.0 + gap + 2.0 regardless of slice order
        assert!((secs - 3.2).abs() < 1e-3);
    }

    #[test]
    fn concat_with_no_segments_is_a_render_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = concat_narration(&[], 5.0, &dir.path().join("x.wav")).unwrap_err();
        assert!(matches!(err, ReelError::Render { .. }));
    }

    #[test]
    fn srt_timestamps_are_millisecond_precise() {
        assert_eq!(format_srt_time(0.0), "00:00:00,000");
        assert_eq!(format_srt_time(61.5), "00:01:01,500");
        assert_eq!(format_srt_time(3723.042), "01:02:03,042");
    }

    #[tokio::test]
    async fn srt_file_numbers_cues_sequentially() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subs.srt");
        let cues = vec![
            CaptionCue {
                text: "hello".into(),
                start: 0.0,
                end: 0.5,
            },
            CaptionCue {
                text: "world".into(),
                start: 0.5,
                end: 1.0,
            },
        ];
        write_srt(&cues, &path).await.unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("1\n00:00:00,000 --> 00:00:00,500\nhello"));
        assert!(content.contains("2\n00:00:00,500 --> 00:00:01,000\nworld"));
    }
}
