use crate::http::{build_client, env_u64};
use crate::models::Photo;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::future::Future;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct VisionConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_output_tokens: u32,
}

impl VisionConfig {
    pub fn from_env() -> Self {
        Self {
            api_url: std::env::var("VISION_API_URL")
                .unwrap_or_else(|_| "https://generativelanguage.googleapis.com".into()),
            api_key: std::env::var("VISION_API_KEY")
                .ok()
                .filter(|key| !key.trim().is_empty()),
            model: std::env::var("VISION_MODEL").unwrap_or_else(|_| "gemini-1.5-flash".into()),
            timeout_secs: env_u64("VISION_TIMEOUT_SECS", 120),
            max_output_tokens: env_u64("VISION_MAX_OUTPUT_TOKENS", 2048) as u32,
        }
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("missing vision api url")]
    MissingApiUrl,
    #[error("http error: {0}")]
    Http(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// A vision-capable model that receives every photo in one request and
/// answers with free-form text.
pub trait VisionModel: Send + Sync {
    fn analyze(
        &self,
        prompt: &str,
        photos: &[Photo],
    ) -> impl Future<Output = Result<String, LlmError>> + Send;
}

pub struct VisionClient {
    http: Client,
    config: VisionConfig,
}

impl VisionClient {
    pub fn new(config: VisionConfig) -> Self {
        Self {
            http: build_client(config.timeout_secs),
            config,
        }
    }

    fn request_body(&self, prompt: &str, photos: &[Photo]) -> GenerateRequest {
        let mut parts = Vec::with_capacity(photos.len() + 1);
        parts.push(Part::Text {
            text: prompt.to_string(),
        });
        for photo in photos {
            let mime_type = if photo.mime_type.trim().is_empty() {
                "image/jpeg".to_string()
            } else {
                photo.mime_type.clone()
            };
            parts.push(Part::InlineData {
                inline_data: InlineData {
                    mime_type,
                    data: BASE64.encode(&photo.data),
                },
            });
        }
        GenerateRequest {
            contents: vec![Content {
                role: "user".into(),
                parts,
            }],
            generation_config: GenerationConfig {
                temperature: 0.2,
                max_output_tokens: self.config.max_output_tokens,
            },
        }
    }
}

impl VisionModel for VisionClient {
    async fn analyze(&self, prompt: &str, photos: &[Photo]) -> Result<String, LlmError> {
        let base = self.config.api_url.trim().trim_end_matches('/');
        if base.is_empty() {
            return Err(LlmError::MissingApiUrl);
        }
        let url = format!(
            "{base}/v1beta/models/{}:generateContent",
            self.config.model
        );
        let body = self.request_body(prompt, photos);

        let mut request = self.http.post(url).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.header("x-goog-api-key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|err| LlmError::Http(err.to_string()))?;

        if !response.status().is_success() {
            return Err(LlmError::Http(format!("HTTP {}", response.status())));
        }

        let payload: GenerateResponse = response
            .json()
            .await
            .map_err(|err| LlmError::InvalidResponse(err.to_string()))?;
        if let Some(usage) = &payload.usage_metadata {
            debug!(
                target = "relay.analysis",
                prompt_tokens = usage.prompt_token_count,
                output_tokens = usage.candidates_token_count,
                "vision_usage"
            );
        }
        payload.into_text()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    Text { text: String },
    InlineData { inline_data: InlineData },
}

#[derive(Debug, Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: Option<u32>,
    #[serde(default)]
    candidates_token_count: Option<u32>,
}

impl GenerateResponse {
    fn into_text(self) -> Result<String, LlmError> {
        let text = self
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(LlmError::InvalidResponse("missing text".into()));
        }
        Ok(text)
    }
}
