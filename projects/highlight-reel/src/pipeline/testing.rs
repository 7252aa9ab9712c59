// Scripted stand-ins for the media toolchain and the model server.

use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use crate::config::EncodeConfig;
use crate::pipeline::backend::{BackendError, GeneratedAnswer, InferenceBackend};
use crate::pipeline::types::EventInterval;
use crate::video::{FrameRate, MediaError, MediaResult, MediaTool, SourceVideo, VideoReader};

/// Frame whose pixels encode `index` so it survives crop and resize.
pub fn uniform_frame(index: usize) -> RgbImage {
    let value = (index * 3 + 1).min(u8::MAX as usize) as u8;
    RgbImage::from_pixel(16, 8, Rgb([value, value, value]))
}

fn frame_index(image: &RgbImage) -> usize {
    image.get_pixel(0, 0).0[0] as usize / 3
}

pub struct FrameStream {
    total: usize,
    next: usize,
    fail_at: Option<usize>,
}

impl FrameStream {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            next: 0,
            fail_at: None,
        }
    }

    pub fn failing_at(mut self, index: usize) -> Self {
        self.fail_at = Some(index);
        self
    }
}

impl VideoReader for FrameStream {
    fn frame_count(&self) -> usize {
        self.total
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        if self.fail_at == Some(self.next) {
            return Err(anyhow!("corrupt frame {}", self.next));
        }
        if self.next >= self.total {
            return Ok(None);
        }
        let frame = uniform_frame(self.next);
        self.next += 1;
        Ok(Some(frame))
    }
}

/// Says "yes" to every frame: confidence 0.9 for `positives`, 0.1 otherwise.
pub struct ScriptedBackend {
    positives: HashSet<usize>,
}

impl ScriptedBackend {
    pub fn new(positives: &[usize]) -> Self {
        Self {
            positives: positives.iter().copied().collect(),
        }
    }
}

impl InferenceBackend for ScriptedBackend {
    fn input_size(&self) -> (u32, u32) {
        (32, 32)
    }

    fn generate(
        &mut self,
        images: &[RgbImage],
        _prompt: &str,
        _max_new_tokens: usize,
    ) -> Result<Vec<GeneratedAnswer>, BackendError> {
        let logits = vec![0.9f32.ln(), 0.1f32.ln()];
        Ok(images
            .iter()
            .map(|img| {
                let token = if self.positives.contains(&frame_index(img)) { 0 } else { 1 };
                GeneratedAnswer {
                    text: "yes".to_string(),
                    token_ids: vec![42, token],
                    step_logits: vec![logits.clone()],
                }
            })
            .collect())
    }
}

pub struct FailingBackend;

impl InferenceBackend for FailingBackend {
    fn input_size(&self) -> (u32, u32) {
        (32, 32)
    }

    fn generate(
        &mut self,
        _images: &[RgbImage],
        _prompt: &str,
        _max_new_tokens: usize,
    ) -> Result<Vec<GeneratedAnswer>, BackendError> {
        Err(BackendError::Protocol("model server unavailable".to_string()))
    }
}

#[derive(Debug, Default)]
struct FakeState {
    stride: u32,
    clip_calls: usize,
    fail_clips: HashSet<usize>,
    fail_concat: bool,
    extracted: Vec<EventInterval>,
    manifest: Option<String>,
}

/// In-memory media tool: synthetic frames and placeholder output files.
pub struct FakeMedia {
    frame_rate: FrameRate,
    duration_secs: f64,
    state: Mutex<FakeState>,
}

impl FakeMedia {
    pub fn new(frame_rate: FrameRate, duration_secs: f64) -> Self {
        Self {
            frame_rate,
            duration_secs,
            state: Mutex::new(FakeState {
                stride: 1,
                ..Default::default()
            }),
        }
    }

    pub fn source(&self, path: &Path) -> SourceVideo {
        SourceVideo {
            path: path.to_path_buf(),
            duration_secs: self.duration_secs,
            frame_rate: self.frame_rate,
            frame_count: (self.duration_secs * self.frame_rate.as_f64()).round() as u64,
        }
    }

    /// Make the clip with this ordinal fail.
    pub fn fail_clip(&self, ordinal: usize) {
        self.state.lock().unwrap().fail_clips.insert(ordinal);
    }

    pub fn fail_concat(&self) {
        self.state.lock().unwrap().fail_concat = true;
    }

    pub fn extracted(&self) -> Vec<EventInterval> {
        self.state.lock().unwrap().extracted.clone()
    }

    pub fn manifest(&self) -> Option<String> {
        self.state.lock().unwrap().manifest.clone()
    }

    fn sampled_frames(&self) -> usize {
        let stride = self.state.lock().unwrap().stride.max(1) as u64;
        self.source(Path::new("")).frame_count.div_ceil(stride) as usize
    }

    fn failure(message: &str) -> MediaError {
        MediaError::FfmpegFailed {
            message: message.to_string(),
            stderr: Some("scripted failure".to_string()),
            exit_code: Some(1),
        }
    }
}

impl MediaTool for FakeMedia {
    fn probe(&self, path: &Path) -> MediaResult<SourceVideo> {
        Ok(self.source(path))
    }

    fn count_frames(&self, _path: &Path) -> MediaResult<usize> {
        Ok(self.sampled_frames())
    }

    fn open_reader(&self, _path: &Path) -> MediaResult<Box<dyn VideoReader>> {
        Ok(Box::new(FrameStream::new(self.sampled_frames())))
    }

    fn downsample(
        &self,
        _input: &Path,
        output: &Path,
        stride: u32,
        _preset: &str,
        _crf: u8,
    ) -> MediaResult<()> {
        self.state.lock().unwrap().stride = stride;
        fs::write(output, b"reduced")?;
        Ok(())
    }

    fn extract_clip(
        &self,
        _input: &Path,
        output: &Path,
        interval: &EventInterval,
        _encode: &EncodeConfig,
    ) -> MediaResult<()> {
        let mut state = self.state.lock().unwrap();
        let ordinal = state.clip_calls;
        state.clip_calls += 1;
        if state.fail_clips.contains(&ordinal) {
            return Err(Self::failure("clip extraction failed"));
        }
        fs::write(output, format!("{}-{}", interval.start, interval.end))?;
        state.extracted.push(*interval);
        Ok(())
    }

    fn concat(&self, manifest: &Path, output: &Path) -> MediaResult<()> {
        let mut state = self.state.lock().unwrap();
        state.manifest = Some(fs::read_to_string(manifest)?);
        if state.fail_concat {
            fs::write(output, b"partial")?;
            return Err(Self::failure("concatenation failed"));
        }
        fs::write(output, b"reel")?;
        Ok(())
    }
}
