// Pipeline orchestrator: runs the three stages for one video
//
// Owns the run's working area, hands each stage's output to the next and
// publishes the reel (or reports that there was nothing to publish).

use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::assembler;
use crate::pipeline::backend::InferenceBackend;
use crate::pipeline::classifier::{self, ClassifierSession, ClassifierSettings};
use crate::pipeline::intervals;
use crate::pipeline::progress::{self, ProcessingState};
use crate::pipeline::sampler;
use crate::pipeline::types::{EventInterval, RunOutcome};
use crate::run_artifacts::{self, PredictionRow, INTERVALS_CSV, PREDICTIONS_CSV, TIMESTAMPS_CSV};
use crate::run_context::{self, RunContext};
use crate::video::{MediaTool, SourceVideo};

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    /// Parent for the temporary working area; system temp dir if unset
    pub work_root: Option<PathBuf>,
    /// Copy the CSV tables next to the reel
    pub save_artifacts: bool,
}

/// How event intervals are obtained.
pub enum RunMode {
    /// Sample and classify the video
    Detect(Box<dyn InferenceBackend>),
    /// Use these intervals and skip sampling and classification
    FixedIntervals(Vec<EventInterval>),
}

fn elapsed_ms_per_unit(start: Instant, units: usize) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0 / units.max(1) as f64
}

fn detect_intervals(
    media: &dyn MediaTool,
    config: &PipelineConfig,
    source: &SourceVideo,
    ctx: &RunContext,
    state: &ProcessingState,
    backend: Box<dyn InferenceBackend>,
) -> PipelineResult<Vec<EventInterval>> {
    let started = Instant::now();
    let sampling = sampler::run_sampling(media, source, &config.sampling, ctx.dir())?;
    let sampled = sampling.table.len();
    state.set_total("sample", sampled);
    state.update_stage("sample", sampled, elapsed_ms_per_unit(started, sampled));
    tracing::info!("{}", progress::STAGE1_COMPLETED);

    let mut reader = media
        .open_reader(&sampling.reduced_path)
        .map_err(|e| PipelineError::source_read(&sampling.reduced_path, e))?;
    if reader.frame_count() > 0 && reader.frame_count() != sampled {
        tracing::debug!(
            "Reader reports {} frames, timestamp table has {}",
            reader.frame_count(),
            sampled
        );
    }
    let mut session = ClassifierSession::new(backend, ClassifierSettings::from(&config.inference));
    state.set_total("classify", sampled);
    let records =
        classifier::run_classification(&mut session, reader.as_mut(), sampled, Some(state))?;

    let rows: Vec<PredictionRow> = records
        .iter()
        .map(|r| PredictionRow::from_record(r, &sampling.table))
        .collect();
    run_artifacts::write_csv(&ctx.artifact_path(PREDICTIONS_CSV), &rows)?;
    tracing::info!("{}", progress::STAGE2_COMPLETED);

    let started = Instant::now();
    let events = intervals::derive_intervals(
        &records,
        &sampling.table,
        intervals::TimestampFallback::Stride {
            stride: sampling.stride,
            fps: source.fps(),
        },
        &config.post_processing,
        source_duration(source),
    );
    state.set_total("postprocess", records.len());
    state.update_stage(
        "postprocess",
        records.len(),
        elapsed_ms_per_unit(started, records.len()),
    );
    Ok(events)
}

fn source_duration(source: &SourceVideo) -> f64 {
    if source.duration_secs > 0.0 {
        source.duration_secs
    } else {
        f64::INFINITY
    }
}

fn save_artifacts(ctx: &RunContext, output_dir: &Path, stem: &str) -> PipelineResult<()> {
    std::fs::create_dir_all(output_dir)?;
    for name in [TIMESTAMPS_CSV, PREDICTIONS_CSV, INTERVALS_CSV] {
        let src = ctx.artifact_path(name);
        if src.exists() {
            let dst = output_dir.join(format!("{}_{}", stem, name));
            std::fs::copy(&src, &dst)?;
            tracing::info!("Saved {}", dst.display());
        }
    }
    Ok(())
}

/// Run one video through the pipeline.
///
/// The working area is removed on every exit path. A reel is only reported
/// once it has been moved into `request.output_dir`.
pub fn run_pipeline(
    media: &dyn MediaTool,
    config: &PipelineConfig,
    request: &RunRequest,
    mode: RunMode,
) -> PipelineResult<RunOutcome> {
    config.validate()?;

    let input = &request.input;
    if !input.is_file() {
        return Err(PipelineError::source_read(input, "file not found"));
    }
    let stem = run_context::video_stem(input)?;
    let reel_name = run_context::reel_file_name(input)?;

    let ctx = RunContext::create(input, request.work_root.as_deref())?;
    let state = ProcessingState::new(ctx.metadata.run_id.clone());
    tracing::info!("Processing {} (run {})", input.display(), ctx.metadata.run_id);

    let source = media
        .probe(input)
        .map_err(|e| PipelineError::source_read(input, e))?;

    let events = match mode {
        RunMode::Detect(backend) => detect_intervals(media, config, &source, &ctx, &state, backend)?,
        RunMode::FixedIntervals(list) => {
            tracing::info!(
                "Using {} supplied intervals, skipping downsampling and inference",
                list.len()
            );
            intervals::normalize_intervals(&list, source_duration(&source))
        }
    };
    run_artifacts::write_csv(&ctx.artifact_path(INTERVALS_CSV), &events)?;
    for interval in &events {
        tracing::info!("Event interval: {:.2}s - {:.2}s", interval.start, interval.end);
    }
    if !events.is_empty() {
        let total: f64 = events.iter().map(EventInterval::duration).sum();
        tracing::info!("{} event intervals covering {:.2}s", events.len(), total);
    }

    let started = Instant::now();
    let name = ctx.metadata.original_name.clone();
    tracing::info!("{}", progress::clipping_started(&name));
    state.set_total("assemble", events.len());
    let assembled = assembler::assemble(
        media,
        input,
        &events,
        &config.encoding,
        ctx.dir(),
        &ctx.artifact_path(&reel_name),
    )?;
    state.update_stage(
        "assemble",
        events.len(),
        elapsed_ms_per_unit(started, events.len()),
    );

    let outcome = match assembled {
        Some(reel) => {
            let dest = request.output_dir.join(&reel_name);
            run_context::move_file(&reel, &dest)?;
            tracing::info!("{}", progress::reel_saved(&dest));
            RunOutcome::Reel(dest)
        }
        None => {
            tracing::info!("No events detected in '{}', no highlight reel produced", name);
            RunOutcome::NoEvents
        }
    };
    tracing::info!("{}", progress::STAGE3_COMPLETED);

    // Reel is already published at this point; copy failures only warn
    if request.save_artifacts {
        if let Err(e) = save_artifacts(&ctx, &request.output_dir, &stem) {
            tracing::warn!("Could not save run artifacts to {}: {}", request.output_dir.display(), e);
        }
    }

    tracing::debug!("Working area files: {:?}", ctx.list_files());
    tracing::info!("Run summary: {}", state.to_progress_json());
    tracing::info!("{}", progress::RUN_FINISHED);
    Ok(outcome)
}
