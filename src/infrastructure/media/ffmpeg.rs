use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info};

use super::archive::pack_frames;
use super::error::{TransformError, TransformResult};
use super::{Frame, MediaTransformer};

const FRAME_PREFIX: &str = "frame-";
const FRAME_EXTENSION: &str = ".png";
const STDERR_TAIL: usize = 2048;

/// Extracts PNG stills with the `ffmpeg` binary and zips them in-process.
#[derive(Clone, Debug)]
pub struct FfmpegTransformer {
    binary: PathBuf,
    frame_rate: u32,
}

impl FfmpegTransformer {
    pub fn new(frame_rate: u32) -> Self {
        Self::with_binary("ffmpeg", frame_rate)
    }

    pub fn with_binary(binary: impl Into<PathBuf>, frame_rate: u32) -> Self {
        Self {
            binary: binary.into(),
            frame_rate: frame_rate.max(1),
        }
    }
}

fn ffmpeg_args(input: &Path, output_pattern: &Path, frame_rate: u32) -> Vec<String> {
    vec![
        "-hide_banner".to_string(),
        "-nostdin".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-y".to_string(),
        "-i".to_string(),
        input.display().to_string(),
        "-map_metadata".to_string(),
        "-1".to_string(),
        "-vf".to_string(),
        format!("fps={}", frame_rate),
        "-fflags".to_string(),
        "+bitexact".to_string(),
        "-flags:v".to_string(),
        "+bitexact".to_string(),
        output_pattern.display().to_string(),
    ]
}

/// Frames written by ffmpeg, ordered by their zero-padded sequence number.
async fn collect_frames(dir: &Path) -> TransformResult<Vec<Frame>> {
    let mut names = Vec::new();
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if let Some(name) = entry.file_name().to_str() {
            if name.starts_with(FRAME_PREFIX) && name.ends_with(FRAME_EXTENSION) {
                names.push(name.to_string());
            }
        }
    }
    names.sort();

    let mut frames = Vec::with_capacity(names.len());
    for name in names {
        let data = fs::read(dir.join(&name)).await?;
        frames.push(Frame { name, data });
    }
    Ok(frames)
}

fn tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.len() <= STDERR_TAIL {
        return text.to_string();
    }
    let mut start = text.len() - STDERR_TAIL;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}

#[async_trait]
impl MediaTransformer for FfmpegTransformer {
    async fn extract(&self, source: &[u8]) -> TransformResult<Vec<Frame>> {
        let workdir = TempDir::new()?;
        let input = workdir.path().join("source");
        let frames_dir = workdir.path().join("frames");
        fs::write(&input, source).await?;
        fs::create_dir(&frames_dir).await?;

        let pattern = frames_dir.join(format!("{}%05d{}", FRAME_PREFIX, FRAME_EXTENSION));
        let args = ffmpeg_args(&input, &pattern, self.frame_rate);
        debug!(?args, "Running ffmpeg");

        let output = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => TransformError::FfmpegNotFound,
                _ => TransformError::Io(e),
            })?;

        if !output.status.success() {
            return Err(TransformError::FfmpegFailed {
                exit_code: output.status.code(),
                stderr: tail(&output.stderr),
            });
        }

        let frames = collect_frames(&frames_dir).await?;
        if frames.is_empty() {
            return Err(TransformError::NoFrames);
        }

        info!("🎞️ Extracted {} frames at {} fps", frames.len(), self.frame_rate);
        Ok(frames)
    }

    async fn pack(&self, frames: &[Frame]) -> TransformResult<Vec<u8>> {
        let frames = frames.to_vec();
        tokio::task::spawn_blocking(move || pack_frames(&frames))
            .await
            .map_err(std::io::Error::other)?
    }
}
