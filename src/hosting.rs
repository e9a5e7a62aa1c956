use crate::http::{build_client, env_u64};
use crate::models::Photo;
use reqwest::{
    Client, Url,
    multipart::{Form, Part},
};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::future::Future;
use thiserror::Error;
use tracing::{debug, warn};
use urlencoding::encode;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct HostingConfig {
    pub upload_url: String,
    /// Base used when the host answers with a bare filename.
    pub public_base: Option<String>,
    pub field_name: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub max_bytes: usize,
}

impl HostingConfig {
    pub fn from_env() -> Self {
        Self {
            upload_url: std::env::var("PHOTO_HOST_URL").unwrap_or_default(),
            public_base: std::env::var("PHOTO_HOST_PUBLIC_BASE")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            field_name: std::env::var("PHOTO_HOST_FIELD").unwrap_or_else(|_| "image".into()),
            api_key: std::env::var("PHOTO_HOST_API_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            timeout_secs: env_u64("PHOTO_UPLOAD_TIMEOUT_SECS", 300),
            max_bytes: env_u64("PHOTO_MAX_BYTES", 20 * 1024 * 1024) as usize,
        }
    }

    fn fallback_base(&self) -> Option<String> {
        if let Some(base) = &self.public_base {
            return Some(base.trim_end_matches('/').to_string());
        }
        let parsed = Url::parse(self.upload_url.trim()).ok()?;
        let host = parsed.host_str()?;
        Some(match parsed.port() {
            Some(port) => format!("{}://{host}:{port}", parsed.scheme()),
            None => format!("{}://{host}", parsed.scheme()),
        })
    }
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("photo host endpoint is not configured")]
    MissingEndpoint,
    #[error("photo is empty")]
    Empty,
    #[error("photo is {size} bytes, limit is {max}")]
    TooLarge { size: usize, max: usize },
    #[error("upload failed: {0}")]
    Request(String),
    #[error("photo host rejected upload: HTTP {0}")]
    Host(u16),
    #[error("invalid host response: {0}")]
    InvalidResponse(String),
}

/// Result of one upload. Never an `Err`: every failure is folded in here.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UploadOutcome {
    pub success: bool,
    pub hosted_url: Option<String>,
    pub error: Option<String>,
}

impl UploadOutcome {
    pub fn hosted(url: impl Into<String>) -> Self {
        Self {
            success: true,
            hosted_url: Some(url.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            hosted_url: None,
            error: Some(error.into()),
        }
    }
}

impl From<Result<String, UploadError>> for UploadOutcome {
    fn from(value: Result<String, UploadError>) -> Self {
        match value {
            Ok(url) => UploadOutcome::hosted(url),
            Err(err) => UploadOutcome::failed(err.to_string()),
        }
    }
}

pub trait PhotoHost: Send + Sync {
    fn upload(&self, photo: &Photo) -> impl Future<Output = UploadOutcome> + Send;
}

pub struct PhotoHostingClient {
    http: Client,
    config: HostingConfig,
}

#[derive(Debug, Deserialize)]
struct HostResponse {
    #[serde(default, alias = "link")]
    url: Option<String>,
    #[serde(default, alias = "file", alias = "name")]
    filename: Option<String>,
}

impl PhotoHostingClient {
    pub fn new(config: HostingConfig) -> Self {
        Self {
            http: build_client(config.timeout_secs),
            config,
        }
    }

    pub async fn upload_bytes(&self, data: &[u8], filename: &str, mime_type: &str) -> UploadOutcome {
        let result = self.try_upload(data, filename, mime_type).await;
        if let Err(err) = &result {
            warn!(target = "relay.hosting", filename = %filename, error = %err, "photo_upload_failed");
        }
        result.into()
    }

    async fn try_upload(
        &self,
        data: &[u8],
        filename: &str,
        mime_type: &str,
    ) -> Result<String, UploadError> {
        let endpoint = self.config.upload_url.trim();
        if endpoint.is_empty() {
            return Err(UploadError::MissingEndpoint);
        }
        if data.is_empty() {
            return Err(UploadError::Empty);
        }
        if data.len() > self.config.max_bytes {
            return Err(UploadError::TooLarge {
                size: data.len(),
                max: self.config.max_bytes,
            });
        }

        let filename = upload_filename(filename, mime_type);
        let part = Part::bytes(data.to_vec())
            .file_name(filename.clone())
            .mime_str(if mime_type.trim().is_empty() {
                "image/jpeg"
            } else {
                mime_type
            })
            .map_err(|err| UploadError::Request(err.to_string()))?;
        let form = Form::new().part(self.config.field_name.clone(), part);

        let mut request = self.http.post(endpoint).multipart(form);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|err| UploadError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(UploadError::Host(response.status().as_u16()));
        }

        let payload: HostResponse = response
            .json()
            .await
            .map_err(|err| UploadError::InvalidResponse(err.to_string()))?;
        let url = resolve_hosted_url(payload, self.config.fallback_base().as_deref())?;
        debug!(target = "relay.hosting", filename = %filename, url = %url, "photo_hosted");
        Ok(url)
    }
}

impl PhotoHost for PhotoHostingClient {
    async fn upload(&self, photo: &Photo) -> UploadOutcome {
        self.upload_bytes(&photo.data, &photo.filename, &photo.mime_type)
            .await
    }
}

fn upload_filename(filename: &str, mime_type: &str) -> String {
    let trimmed = filename.trim();
    if !trimmed.is_empty() {
        return trimmed.to_string();
    }
    let ext = match mime_type.trim() {
        "image/png" => "png",
        "image/webp" => "webp",
        "image/heic" => "heic",
        _ => "jpg",
    };
    format!("photo-{}.{ext}", Uuid::new_v4().simple())
}

/// `{url}` wins. A bare `{filename}` is joined onto the fallback base with
/// the filename percent-encoded, so the same filename always yields the same URL.
fn resolve_hosted_url(payload: HostResponse, base: Option<&str>) -> Result<String, UploadError> {
    if let Some(url) = payload.url.map(|u| u.trim().to_string()).filter(|u| !u.is_empty()) {
        if url.starts_with("http://") || url.starts_with("https://") {
            return Ok(url);
        }
        return join_base(base, url.trim_start_matches('/'), false);
    }
    if let Some(name) = payload
        .filename
        .map(|f| f.trim().to_string())
        .filter(|f| !f.is_empty())
    {
        if name.starts_with("http://") || name.starts_with("https://") {
            return Ok(name);
        }
        return join_base(base, name.trim_start_matches('/'), true);
    }
    Err(UploadError::InvalidResponse(
        "response has neither url nor filename".into(),
    ))
}

fn join_base(base: Option<&str>, path: &str, encode_path: bool) -> Result<String, UploadError> {
    let base = base.ok_or_else(|| {
        UploadError::InvalidResponse("relative photo location without a public base".into())
    })?;
    let path = if encode_path {
        encode(path).into_owned()
    } else {
        path.to_string()
    };
    Ok(format!("{}/{path}", base.trim_end_matches('/')))
}
