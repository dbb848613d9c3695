//! External transcoder boundary.
//!
//! A [`Transcoder`] turns an input media file into a normalized audio file.
//! The ffmpeg-backed implementation is constructed once at process start
//! with an explicit binary path and shared by reference; nothing here
//! mutates process-wide state.

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Target format parameters for normalization.
#[derive(Debug, Clone)]
pub struct AudioTarget {
    pub channels: u8,
    pub sample_rate: u32,
    /// Container format as understood by the tool (`wav`).
    pub container: &'static str,
}

impl AudioTarget {
    /// Canonical speech format: mono 16 kHz WAV.
    pub fn speech() -> Self {
        Self {
            channels: 1,
            sample_rate: 16_000,
            container: "wav",
        }
    }
}

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("failed to launch `{tool}`: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: io::Error,
    },
    #[error("`{tool}` failed: {message}")]
    Failed { tool: String, message: String },
}

#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Normalize `input` into `output` at the given target format.
    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        target: &AudioTarget,
    ) -> Result<(), TranscodeError>;
}

pub struct FfmpegTranscoder {
    ffmpeg_path: PathBuf,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg_path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    /// Probe the configured binary. Used at startup to warn early when the
    /// tool is missing; jobs would otherwise only fail once dequeued.
    pub async fn is_available(&self) -> bool {
        Command::new(&self.ffmpeg_path)
            .arg("-version")
            .output()
            .await
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    fn tool(&self) -> String {
        self.ffmpeg_path.display().to_string()
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        target: &AudioTarget,
    ) -> Result<(), TranscodeError> {
        debug!(
            "transcoding {} -> {} ({}ch @ {} Hz)",
            input.display(),
            output.display(),
            target.channels,
            target.sample_rate
        );

        // -vn drops any video stream; a no-op for audio-only inputs.
        let result = Command::new(&self.ffmpeg_path)
            .arg("-i")
            .arg(input)
            .arg("-vn")
            .args(["-ac", &target.channels.to_string()])
            .args(["-ar", &target.sample_rate.to_string()])
            .args(["-f", target.container])
            .arg("-y")
            .arg(output)
            .output()
            .await
            .map_err(|source| TranscodeError::Spawn {
                tool: self.tool(),
                source,
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(TranscodeError::Failed {
                tool: self.tool(),
                message: tail(&stderr, 500).to_string(),
            });
        }

        Ok(())
    }
}

/// Last `max_chars` characters of `text` — tool errors accumulate at the end
/// of stderr.
fn tail(text: &str, max_chars: usize) -> &str {
    let char_count = text.chars().count();
    if char_count <= max_chars {
        return text;
    }
    let skip = char_count - max_chars;
    match text.char_indices().nth(skip) {
        Some((byte_offset, _)) => &text[byte_offset..],
        None => text,
    }
}
