// Run artifact definitions
//
// Tables persisted as CSV files within a run's working area. Column names are
// stable; downstream tooling reads them by header.

use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::types::{ClassificationRecord, Label, TimestampTable};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const TIMESTAMPS_CSV: &str = "timestamps.csv";
pub const PREDICTIONS_CSV: &str = "predictions.csv";
pub const INTERVALS_CSV: &str = "predicted_intervals.csv";

/// One row of predictions.csv
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PredictionRow {
    pub inference_frame_number: usize,
    pub original_frame_number: Option<u64>,
    pub timestamp_sec: Option<f64>,
    pub predicted_label: Label,
    pub confidence: f32,
}

impl PredictionRow {
    pub fn from_record(record: &ClassificationRecord, table: &TimestampTable) -> Self {
        let frame = table.get(record.sampled_index);
        Self {
            inference_frame_number: record.sampled_index,
            original_frame_number: frame.map(|f| f.original_frame_number),
            timestamp_sec: frame.map(|f| f.timestamp_sec),
            predicted_label: record.label,
            confidence: record.confidence,
        }
    }

    pub fn to_record(&self) -> ClassificationRecord {
        ClassificationRecord {
            sampled_index: self.inference_frame_number,
            label: self.predicted_label,
            confidence: self.confidence,
        }
    }
}

pub fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> PipelineResult<()> {
    let artifact_err = |source| PipelineError::Artifact {
        path: path.to_path_buf(),
        source,
    };

    let mut writer = csv::Writer::from_path(path).map_err(artifact_err)?;
    for row in rows {
        writer.serialize(row).map_err(artifact_err)?;
    }
    writer.flush()?;
    tracing::debug!("Wrote {} rows to {}", rows.len(), path.display());
    Ok(())
}

pub fn read_csv<T: DeserializeOwned>(path: &Path) -> PipelineResult<Vec<T>> {
    let artifact_err = |source| PipelineError::Artifact {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = csv::Reader::from_path(path).map_err(artifact_err)?;
    reader
        .deserialize()
        .collect::<Result<Vec<T>, _>>()
        .map_err(artifact_err)
}
