//! ffprobe/ffmpeg process helpers shared by the background selector and the
//! composer.

use std::path::Path;

use serde::Deserialize;
use tokio::process::Command;

use crate::error::{ReelError, Result};

/// Top-level ffprobe JSON output (`-print_format json -show_format -show_streams`).
#[derive(Debug, Deserialize)]
pub struct FfprobeOutput {
    #[serde(default)]
    pub streams: Vec<FfprobeStream>,
    pub format: FfprobeFormat,
}

#[derive(Debug, Deserialize)]
pub struct FfprobeStream {
    pub codec_type: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FfprobeFormat {
    pub duration: Option<String>,
}

impl FfprobeOutput {
    pub fn duration_secs(&self) -> Option<f64> {
        self.format
            .duration
            .as_deref()
            .and_then(|d| d.parse::<f64>().ok())
    }

    /// Dimensions of the first video stream, if any.
    pub fn video_dimensions(&self) -> Option<(u32, u32)> {
        self.streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some("video"))
            .and_then(|s| Some((s.width?, s.height?)))
    }
}

/// Builder for external tool invocations. `kill_on_drop` ties the child to
/// the owning task, so aborting a speculative stage also stops its subprocess.
pub(crate) fn tool_command(program: &str) -> Command {
    let mut command = Command::new(program);
    command.kill_on_drop(true);
    command
}

/// Run ffprobe on a media file and return the parsed JSON output.
pub async fn probe(path: &Path) -> Result<FfprobeOutput> {
    let output = tool_command("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .output()
        .await?;

    if !output.status.success() {
        return Err(ReelError::Probe {
            path: path.to_path_buf(),
            reason: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str::<FfprobeOutput>(&stdout).map_err(|e| ReelError::Probe {
        path: path.to_path_buf(),
        reason: format!("unparseable ffprobe output: {e}"),
    })
}

/// Run an ffmpeg invocation, mapping a non-zero exit into `RenderError` with
/// the captured stderr as reason.
pub async fn run_ffmpeg<I, S>(args: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<std::ffi::OsStr>,
{
    let output = tool_command("ffmpeg").arg("-y").args(args).output().await?;

    if !output.status.success() {
        return Err(ReelError::Render {
            reason: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    Ok(())
}

/// Duration of a WAV file in seconds, read from the header without decoding.
pub fn wav_duration_secs(path: &Path) -> Result<f64> {
    let reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let frames = reader.len() as f64 / spec.channels as f64;
    Ok(frames / spec.sample_rate as f64)
}
