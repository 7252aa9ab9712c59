use crate::error::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const DEFAULT_PROMPT: &str = "<image> Is there a person in the air jumping into the water?";

/// Full pipeline configuration, one section per stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub sampling: SamplingConfig,
    pub inference: InferenceConfig,
    pub post_processing: PostProcessConfig,
    pub encoding: EncodeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Frames per second kept for classification
    pub target_fps: i32,
    /// Encoder settings for the reduced-rate stream
    pub preset: String,
    pub crf: u8,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            target_fps: 4,
            preset: "fast".to_string(),
            crf: 28,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Base URL of the vision-language model server
    pub endpoint: String,
    pub prompt: String,
    pub batch_size: usize,
    /// Horizontal crop as fractions of the frame width, [start, end)
    pub crop_width_start: f32,
    pub crop_width_end: f32,
    pub input_width: u32,
    pub input_height: u32,
    pub max_new_tokens: usize,
    pub request_timeout_secs: u64,
    pub monitor_utilization: bool,
    pub utilization_interval_ms: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8008".to_string(),
            prompt: DEFAULT_PROMPT.to_string(),
            batch_size: 8,
            crop_width_start: 0.0,
            crop_width_end: 1.0,
            input_width: 224,
            input_height: 224,
            max_new_tokens: 5,
            request_timeout_secs: 300,
            monitor_utilization: true,
            utilization_interval_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PostProcessConfig {
    pub confidence_threshold: f64,
    pub grouping_threshold_sec: f64,
    pub buffer_start_sec: f64,
    pub buffer_end_sec: f64,
    pub merge_gap_sec: f64,
}

impl Default for PostProcessConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.845,
            grouping_threshold_sec: 2.5,
            buffer_start_sec: 1.5,
            buffer_end_sec: 3.0,
            merge_gap_sec: 3.5,
        }
    }
}

/// Encoder settings for extracted clips. Every clip uses the same settings so
/// the final concat can be a stream copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodeConfig {
    pub preset: String,
    pub crf: u8,
    pub audio_bitrate: String,
}

impl Default for EncodeConfig {
    fn default() -> Self {
        Self {
            preset: "veryfast".to_string(),
            crf: 23,
            audio_bitrate: "128k".to_string(),
        }
    }
}

/// Values supplied on the command line or through the environment.
/// Anything set here wins over the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub target_fps: Option<i32>,
    pub endpoint: Option<String>,
    pub prompt: Option<String>,
    pub batch_size: Option<usize>,
    pub confidence_threshold: Option<f64>,
}

impl PipelineConfig {
    /// Load from an optional JSON file, apply overrides and validate.
    pub fn load(path: Option<&Path>, overrides: &ConfigOverrides) -> PipelineResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply(overrides);
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> PipelineResult<Self> {
        if !path.exists() {
            return Err(PipelineError::configuration(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        let content = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            PipelineError::configuration(format!("{}: {}", path.display(), e))
        })?;
        tracing::info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    pub fn apply(&mut self, overrides: &ConfigOverrides) {
        if let Some(fps) = overrides.target_fps {
            self.sampling.target_fps = fps;
        }
        if let Some(endpoint) = &overrides.endpoint {
            self.inference.endpoint = endpoint.clone();
        }
        if let Some(prompt) = &overrides.prompt {
            self.inference.prompt = prompt.clone();
        }
        if let Some(batch_size) = overrides.batch_size {
            self.inference.batch_size = batch_size;
        }
        if let Some(threshold) = overrides.confidence_threshold {
            self.post_processing.confidence_threshold = threshold;
        }
    }

    pub fn validate(&self) -> PipelineResult<()> {
        let fail = |msg: String| Err(PipelineError::configuration(msg));

        if self.sampling.target_fps <= 0 {
            return fail(format!(
                "target_fps must be > 0, got {}",
                self.sampling.target_fps
            ));
        }
        check_encoder("sampling", &self.sampling.preset, self.sampling.crf)?;

        let inf = &self.inference;
        if inf.batch_size == 0 {
            return fail("batch_size must be > 0".to_string());
        }
        if !(0.0..1.0).contains(&inf.crop_width_start)
            || !(inf.crop_width_end > inf.crop_width_start && inf.crop_width_end <= 1.0)
        {
            return fail(format!(
                "crop bounds must satisfy 0 <= start < end <= 1, got [{}, {})",
                inf.crop_width_start, inf.crop_width_end
            ));
        }
        if inf.input_width == 0 || inf.input_height == 0 {
            return fail("input dimensions must be non-zero".to_string());
        }
        if inf.max_new_tokens == 0 {
            return fail("max_new_tokens must be > 0".to_string());
        }
        if inf.prompt.trim().is_empty() {
            return fail("prompt must not be empty".to_string());
        }

        let pp = &self.post_processing;
        if !(0.0..=1.0).contains(&pp.confidence_threshold) {
            return fail(format!(
                "confidence_threshold must be within [0, 1], got {}",
                pp.confidence_threshold
            ));
        }
        for (name, value) in [
            ("grouping_threshold_sec", pp.grouping_threshold_sec),
            ("buffer_start_sec", pp.buffer_start_sec),
            ("buffer_end_sec", pp.buffer_end_sec),
            ("merge_gap_sec", pp.merge_gap_sec),
        ] {
            if !value.is_finite() || value < 0.0 {
                return fail(format!("{} must be a non-negative number, got {}", name, value));
            }
        }

        check_encoder("encoding", &self.encoding.preset, self.encoding.crf)?;
        if self.encoding.audio_bitrate.trim().is_empty() {
            return fail("encoding.audio_bitrate must not be empty".to_string());
        }

        Ok(())
    }
}

fn check_encoder(section: &str, preset: &str, crf: u8) -> PipelineResult<()> {
    if preset.trim().is_empty() {
        return Err(PipelineError::configuration(format!(
            "{}.preset must not be empty",
            section
        )));
    }
    if crf > 51 {
        return Err(PipelineError::configuration(format!(
            "{}.crf must be within 0..=51, got {}",
            section, crf
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_non_positive_fps() {
        for fps in [0, -4] {
            let mut config = PipelineConfig::default();
            config.sampling.target_fps = fps;
            let err = config.validate().unwrap_err();
            assert!(matches!(err, PipelineError::Configuration(_)));
        }
    }

    #[test]
    fn test_rejects_bad_crop_and_thresholds() {
        let mut config = PipelineConfig::default();
        config.inference.crop_width_start = 0.6;
        config.inference.crop_width_end = 0.4;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.post_processing.confidence_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.post_processing.merge_gap_sec = -1.0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.inference.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_file_keeps_defaults_and_overrides_win() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"sampling": {{"target_fps": 2}}, "post_processing": {{"merge_gap_sec": 1.0}}}}"#
        )
        .unwrap();

        let overrides = ConfigOverrides {
            batch_size: Some(4),
            prompt: Some("<image> Is a player shooting?".to_string()),
            ..Default::default()
        };
        let config = PipelineConfig::load(Some(file.path()), &overrides).unwrap();

        assert_eq!(config.sampling.target_fps, 2);
        assert_eq!(config.sampling.crf, 28);
        assert_eq!(config.post_processing.merge_gap_sec, 1.0);
        assert_eq!(config.post_processing.grouping_threshold_sec, 2.5);
        assert_eq!(config.inference.batch_size, 4);
        assert_eq!(config.inference.prompt, "<image> Is a player shooting?");
    }

    #[test]
    fn test_missing_file_is_configuration_error() {
        let err = PipelineConfig::load(
            Some(Path::new("/nonexistent/highlight.json")),
            &ConfigOverrides::default(),
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }
}
