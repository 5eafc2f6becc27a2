use crate::config::InferenceConfig;
use crate::preprocess::PreprocessedImage;
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum ModelServiceError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Failed to encode image: {0}")]
    Encode(#[from] image::ImageError),
    #[error("Invalid response from model: {0}")]
    InvalidResponse(String),
}

/// Remote vision-language model transport. One call per invocation, no retries.
///
/// `Ok(None)` means the model answered without any text.
#[async_trait]
pub trait VisionModel: Send + Sync + 'static {
    async fn generate(
        &self,
        image: &PreprocessedImage,
        prompt: &str,
    ) -> Result<Option<String>, ModelServiceError>;
}

#[async_trait]
impl VisionModel for Box<dyn VisionModel> {
    async fn generate(
        &self,
        image: &PreprocessedImage,
        prompt: &str,
    ) -> Result<Option<String>, ModelServiceError> {
        (**self).generate(image, prompt).await
    }
}

/// `generateContent` client for the Gemini REST API.
pub struct GeminiModel {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
    temperature: f64,
}

impl GeminiModel {
    pub fn new(config: &InferenceConfig, api_key: String) -> Result<Self, ModelServiceError> {
        let client = Client::builder().timeout(config.request_timeout()).build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }

    fn request_body(&self, jpeg: &[u8], prompt: &str) -> serde_json::Value {
        json!({
            "contents": [{
                "role": "user",
                "parts": [
                    {
                        "inline_data": {
                            "mime_type": "image/jpeg",
                            "data": general_purpose::STANDARD.encode(jpeg),
                        }
                    },
                    { "text": prompt }
                ]
            }],
            "generationConfig": {
                "temperature": self.temperature,
                "responseMimeType": "application/json",
            }
        })
    }
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

impl GenerateContentResponse {
    fn into_text(self) -> Option<String> {
        let content = self.candidates.into_iter().next()?.content?;
        let text: String = content.parts.into_iter().filter_map(|p| p.text).collect();
        (!text.is_empty()).then_some(text)
    }
}

#[async_trait]
impl VisionModel for GeminiModel {
    #[instrument(skip_all, fields(model = %self.model))]
    async fn generate(
        &self,
        image: &PreprocessedImage,
        prompt: &str,
    ) -> Result<Option<String>, ModelServiceError> {
        let jpeg = image.to_jpeg()?;
        let body = self.request_body(&jpeg, prompt);

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ModelServiceError::Http {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&text)
            .map_err(|e| ModelServiceError::InvalidResponse(e.to_string()))?;

        tracing::debug!(bytes = text.len(), "Model responded");
        Ok(parsed.into_text())
    }
}

/// Replies with a fixed text after an optional delay.
#[derive(Debug, Clone)]
pub struct CannedModel {
    reply: Option<String>,
    delay: Duration,
}

impl CannedModel {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: Some(reply.into()),
            delay: Duration::ZERO,
        }
    }

    pub fn silent() -> Self {
        Self {
            reply: None,
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// The reply used by the `offline` backend.
    pub fn demo() -> Self {
        Self::new(r#"{"objects":["synthetic gradient"],"scenario":"Offline demo, no model attached"}"#)
            .with_delay(Duration::from_millis(250))
    }
}

#[async_trait]
impl VisionModel for CannedModel {
    async fn generate(
        &self,
        _image: &PreprocessedImage,
        _prompt: &str,
    ) -> Result<Option<String>, ModelServiceError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.reply.clone())
    }
}
