// Stage 2: batched yes/no classification of sampled frames.

use image::RgbImage;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::{Duration, Instant};

use crate::config::InferenceConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::backend::{BackendError, GeneratedAnswer, InferenceBackend};
use crate::pipeline::crop::{preprocess_frame, WidthCrop};
use crate::pipeline::progress::{InferencePercent, ProcessingState};
use crate::pipeline::types::{ClassificationRecord, Label};
use crate::pipeline::utilization::{NvidiaSmi, UtilizationMonitor};
use crate::video::VideoReader;

/// Mean per-step probability of the emitted tokens.
///
/// Generated tokens are the tail of `token_ids`, aligned with the last
/// `step_logits.len()` ids. Out-of-vocabulary ids contribute 0.
pub fn answer_confidence(answer: &GeneratedAnswer) -> f32 {
    let pairs: Vec<(&Vec<f32>, u32)> = answer
        .step_logits
        .iter()
        .rev()
        .zip(answer.token_ids.iter().rev().copied())
        .collect();
    if pairs.is_empty() {
        return 0.0;
    }

    let total: f64 = pairs
        .iter()
        .map(|(logits, token)| token_probability(logits, *token as usize))
        .sum();
    let mean = total / pairs.len() as f64;

    if mean.is_finite() {
        mean.clamp(0.0, 1.0) as f32
    } else {
        0.0
    }
}

fn token_probability(logits: &[f32], token: usize) -> f64 {
    let Some(&target) = logits.get(token) else {
        return 0.0;
    };
    let max = logits
        .iter()
        .copied()
        .fold(f32::NEG_INFINITY, f32::max) as f64;
    let denom: f64 = logits.iter().map(|&l| (l as f64 - max).exp()).sum();
    if denom > 0.0 {
        (target as f64 - max).exp() / denom
    } else {
        0.0
    }
}

#[derive(Debug, Clone)]
pub struct ClassifierSettings {
    pub prompt: String,
    pub max_new_tokens: usize,
    pub batch_size: usize,
    pub crop: WidthCrop,
    pub monitor_utilization: bool,
    pub utilization_interval: Duration,
}

impl From<&InferenceConfig> for ClassifierSettings {
    fn from(config: &InferenceConfig) -> Self {
        Self {
            prompt: config.prompt.clone(),
            max_new_tokens: config.max_new_tokens,
            batch_size: config.batch_size.max(1),
            crop: WidthCrop::new(config.crop_width_start, config.crop_width_end),
            monitor_utilization: config.monitor_utilization,
            utilization_interval: Duration::from_millis(config.utilization_interval_ms.max(1)),
        }
    }
}

/// A loaded backend plus the settings every frame is classified with.
pub struct ClassifierSession {
    backend: Box<dyn InferenceBackend>,
    settings: ClassifierSettings,
}

impl ClassifierSession {
    pub fn new(backend: Box<dyn InferenceBackend>, settings: ClassifierSettings) -> Self {
        Self { backend, settings }
    }

    /// One backend call for the whole batch. Records come back sorted by index.
    pub fn classify_batch(
        &mut self,
        batch: &[(usize, RgbImage)],
    ) -> PipelineResult<Vec<ClassificationRecord>> {
        let Some(batch_start) = batch.iter().map(|(i, _)| *i).min() else {
            return Ok(Vec::new());
        };

        let size = self.backend.input_size();
        let inputs = batch
            .iter()
            .map(|(index, frame)| {
                preprocess_frame(frame, self.settings.crop, size).map_err(|e| {
                    PipelineError::configuration(format!(
                        "frame {} cannot be prepared for inference: {:#}",
                        index, e
                    ))
                })
            })
            .collect::<PipelineResult<Vec<_>>>()?;

        let answers = self
            .backend
            .generate(&inputs, &self.settings.prompt, self.settings.max_new_tokens)
            .map_err(|source| PipelineError::InferenceBackend {
                batch_start,
                source,
            })?;

        if answers.len() != batch.len() {
            return Err(PipelineError::InferenceBackend {
                batch_start,
                source: BackendError::Protocol(format!(
                    "expected {} answers, got {}",
                    batch.len(),
                    answers.len()
                )),
            });
        }

        let mut records: Vec<ClassificationRecord> = batch
            .iter()
            .zip(answers.iter())
            .map(|((index, _), answer)| ClassificationRecord {
                sampled_index: *index,
                label: Label::from_answer(&answer.text),
                confidence: answer_confidence(answer),
            })
            .collect();
        records.sort_by_key(|r| r.sampled_index);
        Ok(records)
    }

    pub fn classify_image(&mut self, image: RgbImage) -> PipelineResult<ClassificationRecord> {
        self.classify_batch(&[(0, image)])?
            .pop()
            .ok_or_else(|| PipelineError::configuration("backend returned no answer"))
    }
}

/// Classify every frame the reader yields, `batch_size` frames per backend call.
///
/// A frame that fails to decode ends the stream; records gathered so far are
/// returned. Backend failures abort the stage.
pub fn run_classification(
    session: &mut ClassifierSession,
    reader: &mut dyn VideoReader,
    expected_frames: usize,
    state: Option<&ProcessingState>,
) -> PipelineResult<Vec<ClassificationRecord>> {
    let batch_size = session.settings.batch_size;
    let monitor = session.settings.monitor_utilization.then(|| {
        UtilizationMonitor::start(NvidiaSmi, session.settings.utilization_interval)
    });

    let pb = ProgressBar::new(expected_frames as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} frames ({per_sec})")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let mut percent = InferencePercent::new(expected_frames);
    percent.advance(0);

    let start = Instant::now();
    let mut records = Vec::with_capacity(expected_frames);
    let mut batch: Vec<(usize, RgbImage)> = Vec::with_capacity(batch_size);
    let mut next_index = 0usize;
    let mut exhausted = false;

    while !exhausted {
        match reader.next_frame() {
            Ok(Some(frame)) => {
                batch.push((next_index, frame));
                next_index += 1;
            }
            Ok(None) => exhausted = true,
            Err(e) => {
                tracing::warn!(
                    "Failed to read sampled frame {}: {:#}. Ending stream early.",
                    next_index,
                    e
                );
                exhausted = true;
            }
        }

        if batch.len() == batch_size || (exhausted && !batch.is_empty()) {
            let batch_started = Instant::now();
            let batch_len = batch.len();
            records.extend(session.classify_batch(&batch)?);
            batch.clear();

            pb.inc(batch_len as u64);
            percent.advance(records.len());
            if let Some(state) = state {
                let ms_per_frame =
                    batch_started.elapsed().as_secs_f64() * 1000.0 / batch_len as f64;
                state.update_stage("classify", records.len(), ms_per_frame);
            }
        }
    }
    pb.finish_and_clear();

    let elapsed = start.elapsed().as_secs_f64();
    tracing::info!(
        "Classified {} frames in {:.2}s ({:.2} frames/s)",
        records.len(),
        elapsed,
        if elapsed > 0.0 { records.len() as f64 / elapsed } else { 0.0 }
    );
    if records.len() < expected_frames {
        tracing::warn!(
            "Classified {} of {} expected frames",
            records.len(),
            expected_frames
        );
    }

    if let Some(monitor) = monitor {
        let summary = monitor.stop();
        tracing::info!(
            "GPU utilization: avg {:.1}%, peak {}% ({} samples)",
            summary.average,
            summary.peak,
            summary.samples
        );
    }

    records.sort_by_key(|r| r.sampled_index);
    Ok(records)
}
