// The `ffmpeg` command-line tool plus ffmpeg-next probing behind `MediaTool`.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use super::ffmpeg_reader::{probe_video, FfmpegReader};
use super::{MediaError, MediaResult, MediaTool, SourceVideo, VideoReader};
use crate::config::EncodeConfig;
use crate::pipeline::types::EventInterval;

/// Builder for a single ffmpeg invocation.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    input: PathBuf,
    output: PathBuf,
    /// Arguments placed before -i
    input_args: Vec<String>,
    /// Arguments placed after -i
    output_args: Vec<String>,
}

impl FfmpegCommand {
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            input_args: Vec::new(),
            output_args: Vec::new(),
        }
    }

    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Input-side seek range. Both bounds are positions in the source.
    pub fn range(self, start: f64, end: f64) -> Self {
        self.input_arg("-ss")
            .input_arg(start.to_string())
            .input_arg("-to")
            .input_arg(end.to_string())
    }

    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    /// x264 video at the given preset and quality.
    pub fn h264(self, preset: &str, crf: u8) -> Self {
        self.output_arg("-c:v")
            .output_arg("libx264")
            .output_arg("-preset")
            .output_arg(preset)
            .output_arg("-crf")
            .output_arg(crf.to_string())
    }

    pub fn aac(self, bitrate: &str) -> Self {
        self.output_arg("-c:a")
            .output_arg("aac")
            .output_arg("-b:a")
            .output_arg(bitrate)
    }

    pub fn no_audio(self) -> Self {
        self.output_arg("-an")
    }

    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
        ];
        args.extend(self.input_args.iter().cloned());
        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().to_string());
        args.extend(self.output_args.iter().cloned());
        args.push(self.output.to_string_lossy().to_string());
        args
    }
}

/// Selects every `stride`-th frame and keeps the selected frames' timing.
pub fn select_every_nth_filter(stride: u32) -> String {
    format!("select='not(mod(n\\,{}))'", stride.max(1))
}

/// Escapes a path for a single-quoted entry in a concat manifest.
pub fn concat_entry(path: &Path) -> String {
    format!("file '{}'", path.to_string_lossy().replace('\'', "'\\''"))
}

/// [`MediaTool`] backed by the ffmpeg binary found on PATH.
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    binary: PathBuf,
}

impl Ffmpeg {
    pub fn locate() -> MediaResult<Self> {
        let binary = which::which("ffmpeg").map_err(|_| MediaError::ToolNotFound("ffmpeg"))?;
        tracing::debug!("Using ffmpeg at {}", binary.display());
        Ok(Self { binary })
    }

    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn run(&self, args: &[String], what: &str) -> MediaResult<()> {
        tracing::debug!("ffmpeg {}", args.join(" "));

        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let exit_code = output.status.code();
        let mut message = match exit_code {
            Some(code) => format!("{} failed (exit code {})", what, code),
            None => format!("{} terminated by signal", what),
        };
        if !stderr.is_empty() {
            message.push_str(": ");
            message.push_str(&stderr_tail(&stderr, STDERR_TAIL_LINES));
        }
        Err(MediaError::FfmpegFailed {
            message,
            stderr: (!stderr.is_empty()).then_some(stderr),
            exit_code,
        })
    }
}

const STDERR_TAIL_LINES: usize = 5;

/// Last `lines` non-empty lines of ffmpeg's stderr, joined with " | ".
pub fn stderr_tail(stderr: &str, lines: usize) -> String {
    let kept: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    kept[kept.len().saturating_sub(lines)..].join(" | ")
}

impl MediaTool for Ffmpeg {
    fn probe(&self, path: &Path) -> MediaResult<SourceVideo> {
        probe_video(path)
    }

    fn count_frames(&self, path: &Path) -> MediaResult<usize> {
        Ok(probe_video(path)?.frame_count as usize)
    }

    fn open_reader(&self, path: &Path) -> MediaResult<Box<dyn VideoReader>> {
        let reader = FfmpegReader::new(path).map_err(|e| MediaError::Decode(format!("{:#}", e)))?;
        Ok(Box::new(reader))
    }

    fn downsample(
        &self,
        input: &Path,
        output: &Path,
        stride: u32,
        preset: &str,
        crf: u8,
    ) -> MediaResult<()> {
        let cmd = FfmpegCommand::new(input, output)
            .video_filter(select_every_nth_filter(stride))
            .output_arg("-fps_mode")
            .output_arg("passthrough")
            .h264(preset, crf)
            .no_audio();
        self.run(&cmd.build_args(), "downsampling")
    }

    fn extract_clip(
        &self,
        input: &Path,
        output: &Path,
        interval: &EventInterval,
        encode: &EncodeConfig,
    ) -> MediaResult<()> {
        let cmd = FfmpegCommand::new(input, output)
            .range(interval.start, interval.end)
            .h264(&encode.preset, encode.crf)
            .aac(&encode.audio_bitrate);
        self.run(&cmd.build_args(), "clip extraction")
    }

    fn concat(&self, manifest: &Path, output: &Path) -> MediaResult<()> {
        let cmd = FfmpegCommand::new(manifest, output)
            .input_arg("-f")
            .input_arg("concat")
            .input_arg("-safe")
            .input_arg("0")
            .output_arg("-c")
            .output_arg("copy");
        self.run(&cmd.build_args(), "concatenation")
    }
}
