pub mod ffmpeg_cli;
pub mod ffmpeg_reader;

use crate::config::EncodeConfig;
use crate::pipeline::types::EventInterval;
use anyhow::Result;
use image::RgbImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub type MediaResult<T> = std::result::Result<T, MediaError>;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("{0} not found in PATH")]
    ToolNotFound(&'static str),

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("Probe failed: {0}")]
    Probe(String),

    #[error("Decoder error: {0}")]
    Decode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Frame rate as stored in the container, kept rational to avoid drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRate {
    pub num: i32,
    pub den: i32,
}

impl FrameRate {
    pub fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    pub fn is_valid(&self) -> bool {
        self.num > 0 && self.den > 0
    }

    pub fn as_f64(&self) -> f64 {
        self.num as f64 / self.den as f64
    }
}

/// Immutable description of the input video.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceVideo {
    pub path: PathBuf,
    pub duration_secs: f64,
    pub frame_rate: FrameRate,
    /// Frame count reported by the container, 0 if unknown
    pub frame_count: u64,
}

impl SourceVideo {
    pub fn fps(&self) -> f64 {
        self.frame_rate.as_f64()
    }

    /// Reported frame count, or an estimate from duration and rate.
    pub fn estimated_frames(&self) -> u64 {
        if self.frame_count > 0 {
            self.frame_count
        } else {
            (self.duration_secs * self.fps()).round().max(0.0) as u64
        }
    }
}

/// Sequential frame source. `Ok(None)` marks the end of the stream; an `Err`
/// means the next frame could not be decoded.
pub trait VideoReader {
    fn frame_count(&self) -> usize;
    fn next_frame(&mut self) -> Result<Option<RgbImage>>;
}

/// Everything the pipeline needs from the media toolchain.
pub trait MediaTool {
    fn probe(&self, path: &Path) -> MediaResult<SourceVideo>;

    /// Number of frames in a (reduced) stream, 0 if the container does not say.
    fn count_frames(&self, path: &Path) -> MediaResult<usize>;

    fn open_reader(&self, path: &Path) -> MediaResult<Box<dyn VideoReader>>;

    /// Writes a stream keeping every `stride`-th frame of `input`, without audio.
    fn downsample(
        &self,
        input: &Path,
        output: &Path,
        stride: u32,
        preset: &str,
        crf: u8,
    ) -> MediaResult<()>;

    fn extract_clip(
        &self,
        input: &Path,
        output: &Path,
        interval: &EventInterval,
        encode: &EncodeConfig,
    ) -> MediaResult<()>;

    /// Stream-copies the files listed in a concat manifest into `output`.
    fn concat(&self, manifest: &Path, output: &Path) -> MediaResult<()>;
}
