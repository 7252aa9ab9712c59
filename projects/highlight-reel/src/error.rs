// Error types shared by the pipeline stages.

use std::path::PathBuf;
use thiserror::Error;

use crate::pipeline::backend::BackendError;

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors that can end (or, for extraction, degrade) a highlight run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Cannot read source video {path}: {message}")]
    SourceRead { path: PathBuf, message: String },

    #[error("Inference backend failed on batch starting at frame {batch_start}: {source}")]
    InferenceBackend {
        batch_start: usize,
        #[source]
        source: BackendError,
    },

    #[error("Clip extraction failed for {start:.2}s-{end:.2}s: {message}")]
    Extraction { start: f64, end: f64, message: String },

    #[error("Assembly failed: {0}")]
    Assembly(String),

    #[error("Artifact {path} could not be processed: {source}")]
    Artifact {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn source_read(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::SourceRead {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn assembly(message: impl Into<String>) -> Self {
        Self::Assembly(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_failure() {
        let err = PipelineError::source_read("/videos/practice.mp4", "no video stream");
        assert_eq!(
            err.to_string(),
            "Cannot read source video /videos/practice.mp4: no video stream"
        );
    }
}
