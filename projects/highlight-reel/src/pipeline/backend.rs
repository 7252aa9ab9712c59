// Vision-language model backends.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::{ImageFormat, RgbImage};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::time::Duration;
use thiserror::Error;

use crate::config::InferenceConfig;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Image encoding failed: {0}")]
    Encode(#[from] image::ImageError),
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Output of one generation for one image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneratedAnswer {
    /// Decoded answer text
    pub text: String,
    /// Full token sequence; the generated tokens are the last `step_logits.len()`
    pub token_ids: Vec<u32>,
    /// Raw scores over the vocabulary for each generation step
    #[serde(default)]
    pub step_logits: Vec<Vec<f32>>,
}

/// Anything that can answer a prompt about a batch of images.
pub trait InferenceBackend {
    /// Width and height images are resized to before inference.
    fn input_size(&self) -> (u32, u32);

    /// One answer per image, in input order.
    fn generate(
        &mut self,
        images: &[RgbImage],
        prompt: &str,
        max_new_tokens: usize,
    ) -> Result<Vec<GeneratedAnswer>, BackendError>;
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    prompts: Vec<&'a str>,
    max_new_tokens: usize,
    images: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    results: Vec<GeneratedAnswer>,
}

pub fn encode_png_base64(image: &RgbImage) -> Result<String, BackendError> {
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, ImageFormat::Png)?;
    Ok(STANDARD.encode(buf.into_inner()))
}

/// JSON-over-HTTP client for a model server exposing `/health` and `/generate`.
pub struct HttpBackend {
    client: Client,
    endpoint: String,
    input_size: (u32, u32),
}

impl HttpBackend {
    /// Build the client and check that the server is up.
    pub fn connect(config: &InferenceConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        let endpoint = config.endpoint.trim_end_matches('/').to_string();

        client
            .get(format!("{}/health", endpoint))
            .send()?
            .error_for_status()?;
        tracing::info!("Inference backend ready at {}", endpoint);

        Ok(Self {
            client,
            endpoint,
            input_size: (config.input_width, config.input_height),
        })
    }
}

impl InferenceBackend for HttpBackend {
    fn input_size(&self) -> (u32, u32) {
        self.input_size
    }

    fn generate(
        &mut self,
        images: &[RgbImage],
        prompt: &str,
        max_new_tokens: usize,
    ) -> Result<Vec<GeneratedAnswer>, BackendError> {
        let request = GenerateRequest {
            prompts: vec![prompt; images.len()],
            max_new_tokens,
            images: images
                .iter()
                .map(encode_png_base64)
                .collect::<Result<_, _>>()?,
        };

        let response: GenerateResponse = self
            .client
            .post(format!("{}/generate", self.endpoint))
            .json(&request)
            .send()?
            .error_for_status()?
            .json()?;

        if response.results.len() != images.len() {
            return Err(BackendError::Protocol(format!(
                "expected {} results, got {}",
                images.len(),
                response.results.len()
            )));
        }
        Ok(response.results)
    }
}
