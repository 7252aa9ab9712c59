use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{ConfigOverrides, PipelineConfig};
use crate::error::PipelineResult;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Turn a practice video into a highlight reel
    Run(RunArgs),
    /// Write the reduced-rate stream and timestamps.csv
    Sample(SampleArgs),
    /// Derive predicted_intervals.csv from predictions.csv
    Postprocess(PostprocessArgs),
    /// Cut and merge the intervals listed in a CSV file
    Assemble(AssembleArgs),
    /// Score the classifier on labelled frames
    Evaluate(EvaluateArgs),
}

/// Settings shared by every subcommand. Flags win over the config file.
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// JSON configuration file
    #[arg(long, env = "HIGHLIGHT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Frames per second kept for classification
    #[arg(long)]
    pub target_fps: Option<i32>,

    /// Model server base URL
    #[arg(long, env = "HIGHLIGHT_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Question asked about every frame
    #[arg(long, env = "EVENT_PROMPT")]
    pub prompt: Option<String>,

    #[arg(long)]
    pub batch_size: Option<usize>,

    #[arg(long)]
    pub confidence_threshold: Option<f64>,
}

impl ConfigArgs {
    pub fn load(&self) -> PipelineResult<PipelineConfig> {
        let overrides = ConfigOverrides {
            target_fps: self.target_fps,
            endpoint: self.endpoint.clone(),
            prompt: self.prompt.clone(),
            batch_size: self.batch_size,
            confidence_threshold: self.confidence_threshold,
        };
        PipelineConfig::load(self.config.as_deref(), &overrides)
    }
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Source video
    #[arg(long)]
    pub input: PathBuf,

    /// Directory the reel is written to
    #[arg(long)]
    pub output_dir: PathBuf,

    /// Use these intervals (start,end CSV) instead of running inference
    #[arg(long, conflicts_with = "skip_inference")]
    pub intervals_csv: Option<PathBuf>,

    /// Skip inference and cut fixed test intervals
    #[arg(
        long,
        env = "SKIP_INFERENCE_TEST",
        value_parser = clap::builder::BoolishValueParser::new()
    )]
    pub skip_inference: bool,

    /// Parent directory for the temporary working area
    #[arg(long)]
    pub work_root: Option<PathBuf>,

    /// Copy timestamps, predictions and intervals CSVs next to the reel
    #[arg(long)]
    pub save_artifacts: bool,

    #[command(flatten)]
    pub config: ConfigArgs,
}

#[derive(Args, Debug)]
pub struct SampleArgs {
    #[arg(long)]
    pub input: PathBuf,

    /// Directory for the reduced stream and timestamps.csv
    #[arg(long)]
    pub output_dir: PathBuf,

    #[command(flatten)]
    pub config: ConfigArgs,
}

#[derive(Args, Debug)]
pub struct PostprocessArgs {
    /// predictions.csv from a previous run
    #[arg(long)]
    pub predictions: PathBuf,

    /// Where to write the intervals CSV
    #[arg(long)]
    pub output: PathBuf,

    /// Source duration in seconds, used to clamp interval ends
    #[arg(long)]
    pub duration: Option<f64>,

    #[command(flatten)]
    pub config: ConfigArgs,
}

#[derive(Args, Debug)]
pub struct AssembleArgs {
    #[arg(long)]
    pub input: PathBuf,

    /// start,end CSV of intervals to cut
    #[arg(long)]
    pub intervals: PathBuf,

    #[arg(long)]
    pub output_dir: PathBuf,

    #[arg(long)]
    pub work_root: Option<PathBuf>,

    #[command(flatten)]
    pub config: ConfigArgs,
}

#[derive(Args, Debug)]
pub struct EvaluateArgs {
    /// Folder with positive/ and negative/ subfolders
    #[arg(long)]
    pub images_dir: PathBuf,

    #[command(flatten)]
    pub config: ConfigArgs,
}
