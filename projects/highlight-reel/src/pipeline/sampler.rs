// Stage 1: reduce the source to the classification rate and map every kept
// frame back to its position in the original video.

use std::path::{Path, PathBuf};

use crate::config::SamplingConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::types::{SampledFrame, TimestampTable};
use crate::run_artifacts::{self, TIMESTAMPS_CSV};
use crate::video::{FrameRate, MediaTool, SourceVideo};

pub const REDUCED_STREAM: &str = "downsampled.mp4";

#[derive(Debug)]
pub struct SamplingOutput {
    pub reduced_path: PathBuf,
    pub stride: u32,
    pub table: TimestampTable,
}

/// Keep one frame in `stride`; never less than 1.
pub fn compute_stride(frame_rate: FrameRate, target_fps: i32) -> PipelineResult<u32> {
    if target_fps <= 0 {
        return Err(PipelineError::configuration(format!(
            "target_fps must be > 0, got {}",
            target_fps
        )));
    }
    if !frame_rate.is_valid() {
        return Err(PipelineError::configuration(format!(
            "invalid source frame rate {}/{}",
            frame_rate.num, frame_rate.den
        )));
    }
    let stride = (frame_rate.as_f64() / target_fps as f64).round();
    Ok(stride.max(1.0) as u32)
}

fn round_ms(secs: f64) -> f64 {
    (secs * 1000.0).round() / 1000.0
}

pub fn build_timestamp_table(frame_rate: FrameRate, stride: u32, sampled_count: usize) -> TimestampTable {
    let fps = frame_rate.as_f64();
    let frames = (0..sampled_count)
        .map(|i| {
            let original_frame_number = i as u64 * u64::from(stride);
            SampledFrame {
                sampled_index: i,
                original_frame_number,
                timestamp_sec: round_ms(original_frame_number as f64 / fps),
            }
        })
        .collect();
    TimestampTable::new(frames)
}

/// Write the reduced stream and `timestamps.csv` into `work_dir`.
pub fn run_sampling(
    media: &dyn MediaTool,
    source: &SourceVideo,
    config: &SamplingConfig,
    work_dir: &Path,
) -> PipelineResult<SamplingOutput> {
    let stride = compute_stride(source.frame_rate, config.target_fps)?;
    if config.target_fps as f64 >= source.fps() {
        tracing::warn!(
            "target_fps {} is not below the source rate {:.3}; keeping every frame",
            config.target_fps,
            source.fps()
        );
    }
    tracing::info!(
        "Sampling {} at {} fps (stride {})",
        source.path.display(),
        config.target_fps,
        stride
    );

    let reduced_path = work_dir.join(REDUCED_STREAM);
    media
        .downsample(&source.path, &reduced_path, stride, &config.preset, config.crf)
        .map_err(|e| PipelineError::source_read(&source.path, e))?;

    let mut sampled_count = media
        .count_frames(&reduced_path)
        .map_err(|e| PipelineError::source_read(&reduced_path, e))?;
    if sampled_count == 0 {
        sampled_count = source.estimated_frames().div_ceil(u64::from(stride)) as usize;
        tracing::debug!(
            "Reduced stream has no frame count, estimated {} frames",
            sampled_count
        );
    }

    let table = build_timestamp_table(source.frame_rate, stride, sampled_count);
    run_artifacts::write_csv(&work_dir.join(TIMESTAMPS_CSV), table.frames())?;

    tracing::info!(
        "Reduced stream {} holds {} frames",
        reduced_path.display(),
        table.len()
    );

    Ok(SamplingOutput {
        reduced_path,
        stride,
        table,
    })
}
