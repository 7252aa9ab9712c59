mod cli;
mod config;
mod error;
mod evaluate;
mod pipeline;
mod run_artifacts;
mod run_context;
mod video;

use anyhow::{Context, Result};
use cli::{AssembleArgs, Cli, Command, EvaluateArgs, PostprocessArgs, RunArgs, SampleArgs};
use pipeline::backend::HttpBackend;
use pipeline::classifier::{ClassifierSession, ClassifierSettings};
use pipeline::orchestrator::{run_pipeline, RunMode, RunRequest};
use pipeline::types::{EventInterval, RunOutcome};
use tracing_subscriber::EnvFilter;
use video::ffmpeg_cli::Ffmpeg;
use video::MediaTool;

/// Intervals cut when inference is skipped for pipeline smoke tests.
const TEST_INTERVALS: [(f64, f64); 2] = [(5.0, 10.0), (25.0, 30.0)];

fn run(args: RunArgs) -> Result<()> {
    let config = args.config.load()?;
    let media = Ffmpeg::locate()?;

    let mode = if let Some(path) = &args.intervals_csv {
        let intervals: Vec<EventInterval> = run_artifacts::read_csv(path)?;
        RunMode::FixedIntervals(intervals)
    } else if args.skip_inference {
        tracing::info!("Skipping inference, using test intervals");
        RunMode::FixedIntervals(
            TEST_INTERVALS
                .iter()
                .map(|&(start, end)| EventInterval::new(start, end))
                .collect(),
        )
    } else {
        let backend = HttpBackend::connect(&config.inference).with_context(|| {
            format!(
                "Failed to reach inference backend at {}",
                config.inference.endpoint
            )
        })?;
        RunMode::Detect(Box::new(backend))
    };

    let request = RunRequest {
        input: args.input,
        output_dir: args.output_dir,
        work_root: args.work_root,
        save_artifacts: args.save_artifacts,
    };

    match run_pipeline(&media, &config, &request, mode)? {
        RunOutcome::Reel(path) => tracing::info!("Highlight reel: {}", path.display()),
        RunOutcome::NoEvents => tracing::info!("No highlight reel produced"),
    }
    Ok(())
}

fn sample(args: SampleArgs) -> Result<()> {
    let config = args.config.load()?;
    let media = Ffmpeg::locate()?;
    std::fs::create_dir_all(&args.output_dir)?;

    let source = media
        .probe(&args.input)
        .with_context(|| format!("Failed to probe {}", args.input.display()))?;
    let output =
        pipeline::sampler::run_sampling(&media, &source, &config.sampling, &args.output_dir)?;
    tracing::info!(
        "Wrote {} ({} frames, stride {})",
        output.reduced_path.display(),
        output.table.len(),
        output.stride
    );
    Ok(())
}

fn postprocess(args: PostprocessArgs) -> Result<()> {
    let config = args.config.load()?;
    let rows: Vec<run_artifacts::PredictionRow> = run_artifacts::read_csv(&args.predictions)?;
    let intervals = pipeline::intervals::derive_from_rows(
        &rows,
        config.sampling.target_fps,
        &config.post_processing,
        args.duration.unwrap_or(f64::INFINITY),
    );
    run_artifacts::write_csv(&args.output, &intervals)?;
    tracing::info!(
        "Wrote {} intervals to {}",
        intervals.len(),
        args.output.display()
    );
    Ok(())
}

fn assemble(args: AssembleArgs) -> Result<()> {
    let config = args.config.load()?;
    let media = Ffmpeg::locate()?;
    let intervals: Vec<EventInterval> = run_artifacts::read_csv(&args.intervals)?;

    let request = RunRequest {
        input: args.input,
        output_dir: args.output_dir,
        work_root: args.work_root,
        save_artifacts: false,
    };
    if let RunOutcome::Reel(path) =
        run_pipeline(&media, &config, &request, RunMode::FixedIntervals(intervals))?
    {
        tracing::info!("Highlight reel: {}", path.display());
    }
    Ok(())
}

fn evaluate_classifier(args: EvaluateArgs) -> Result<()> {
    let config = args.config.load()?;
    let backend = HttpBackend::connect(&config.inference).with_context(|| {
        format!(
            "Failed to reach inference backend at {}",
            config.inference.endpoint
        )
    })?;
    let settings = ClassifierSettings {
        monitor_utilization: false,
        ..ClassifierSettings::from(&config.inference)
    };
    let mut session = ClassifierSession::new(Box::new(backend), settings);
    evaluate::evaluate(
        &mut session,
        &args.images_dir,
        config.post_processing.confidence_threshold,
    )?;
    Ok(())
}

fn main() -> Result<()> {
    // Load environment variables from .env if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match Cli::parse_args().command {
        Command::Run(args) => run(args),
        Command::Sample(args) => sample(args),
        Command::Postprocess(args) => postprocess(args),
        Command::Assemble(args) => assemble(args),
        Command::Evaluate(args) => evaluate_classifier(args),
    }
}
