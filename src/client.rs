use anyhow::{anyhow, Result};
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::path::PathBuf;

use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::models::{HealthResponse, ImageDetectionResult, VideoDetectionResult};

pub const DEFAULT_DETECT_CONFIDENCE: f64 = 0.25;
pub const DEFAULT_FRAME_SKIP: u32 = 3;

// ===== DETECTION API =====

/// Operations of the remote detection service.
///
/// `DetectionClient` is the HTTP implementation; the query layer and the
/// analysis workflow only depend on this trait.
pub trait DetectionApi: Send + Sync {
    fn detect_image(
        &self,
        media_uri: &str,
        confidence: f64,
    ) -> impl Future<Output = Result<ImageDetectionResult, ApiError>> + Send;

    fn detect_video(
        &self,
        media_uri: &str,
        confidence: f64,
        frame_skip: u32,
    ) -> impl Future<Output = Result<VideoDetectionResult, ApiError>> + Send;

    fn check_health(&self) -> impl Future<Output = Result<HealthResponse, ApiError>> + Send;
}

// ===== MEDIA UPLOADS =====

/// File part sent as the `file` field of a detection request
#[derive(Debug, Clone, PartialEq)]
pub struct MediaUpload {
    pub uri: String,
    pub file_name: String,
    pub mime_type: String,
}

impl MediaUpload {
    /// Describes a still image: `jpg` maps to `image/jpeg`, no extension means jpeg
    pub fn image(uri: &str) -> Self {
        let file_name = file_name_of(uri, "photo.jpg");
        let ext = extension_of(&file_name).unwrap_or_else(|| "jpeg".to_string());
        let mime_type = if ext == "jpg" {
            "image/jpeg".to_string()
        } else {
            format!("image/{}", ext)
        };

        Self {
            uri: uri.to_string(),
            file_name,
            mime_type,
        }
    }

    /// Describes a video: `mov` maps to `video/quicktime`, no extension means mp4
    pub fn video(uri: &str) -> Self {
        let file_name = file_name_of(uri, "video.mp4");
        let ext = extension_of(&file_name).unwrap_or_else(|| "mp4".to_string());
        let mime_type = if ext == "mov" {
            "video/quicktime".to_string()
        } else {
            format!("video/{}", ext)
        };

        Self {
            uri: uri.to_string(),
            file_name,
            mime_type,
        }
    }

    /// Resolves the URI to a local path. `file://` URIs are decoded, anything else is taken as a path.
    pub fn local_path(&self) -> Result<PathBuf, ApiError> {
        if self.uri.starts_with("file:") {
            let url = url::Url::parse(&self.uri).map_err(|e| ApiError::media_read(&self.uri, e))?;
            url.to_file_path()
                .map_err(|_| ApiError::media_read(&self.uri, "not a local file URI"))
        } else {
            Ok(PathBuf::from(&self.uri))
        }
    }

    async fn into_form(self) -> Result<Form, ApiError> {
        let path = self.local_path()?;
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| ApiError::media_read(&self.uri, e))?;

        tracing::debug!(
            "Prepared upload {} ({} bytes, {})",
            self.file_name,
            bytes.len(),
            self.mime_type
        );

        let part = Part::bytes(bytes)
            .file_name(self.file_name)
            .mime_str(&self.mime_type)
            .map_err(|e| ApiError::media_read(&self.uri, e))?;

        Ok(Form::new().part("file", part))
    }
}

/// Last path segment of the URI, or `default` when the URI ends in `/`
fn file_name_of(uri: &str, default: &str) -> String {
    match uri.rsplit('/').next() {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => default.to_string(),
    }
}

/// Lowercased word characters after the final dot, if the name ends in such an extension
fn extension_of(file_name: &str) -> Option<String> {
    let (_, ext) = file_name.rsplit_once('.')?;
    if ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

// ===== CLIENT IMPLEMENTATION =====

#[derive(Debug, Clone)]
pub struct DetectionClient {
    config: ClientConfig,
    http_client: reqwest::Client,
}

impl DetectionClient {
    /// Creates a new DetectionClient for the configured service
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .build()
            .map_err(|e| anyhow!("Failed to build HTTP client: {}", e))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    /// Creates a client for the service named by `CROPSCAN_API_URL`
    pub fn from_env() -> Result<Self> {
        Self::new(ClientConfig::from_env()?)
    }

    pub fn base_url(&self) -> &str {
        self.config.get_api_url()
    }

    /// Uploads an image for diagnosis.
    /// `annotated_url` is returned exactly as the service sent it.
    pub async fn detect_image(
        &self,
        media_uri: &str,
        confidence: f64,
    ) -> Result<ImageDetectionResult, ApiError> {
        let form = MediaUpload::image(media_uri).into_form().await?;
        let url = format!("{}/predict?confidence={}", self.base_url(), confidence);

        tracing::info!("Submitting image {} for detection", media_uri);
        self.execute(self.http_client.post(&url).multipart(form))
            .await
    }

    /// Uploads a video for frame-sampled detection.
    /// The relative `annotated_url` of the response is made absolute against the base URL.
    pub async fn detect_video(
        &self,
        media_uri: &str,
        confidence: f64,
        frame_skip: u32,
    ) -> Result<VideoDetectionResult, ApiError> {
        let form = MediaUpload::video(media_uri).into_form().await?;
        let url = format!(
            "{}/detect/video?confidence={}&frame_skip={}",
            self.base_url(),
            confidence,
            frame_skip
        );

        tracing::info!("Submitting video {} for detection", media_uri);
        let mut result: VideoDetectionResult = self
            .execute(self.http_client.post(&url).multipart(form))
            .await?;

        result.annotated_url = format!("{}{}", self.base_url(), result.annotated_url);
        Ok(result)
    }

    /// Checks that the detection service is reachable and reports its model
    pub async fn check_health(&self) -> Result<HealthResponse, ApiError> {
        let url = format!("{}/health", self.base_url());
        self.execute(self.http_client.get(&url)).await
    }

    // ===== HELPER METHODS =====

    /// Sends a request and translates every failure into an `ApiError`
    async fn execute<T>(&self, request: reqwest::RequestBuilder) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
    {
        let response = request.send().await.map_err(|e| {
            tracing::warn!("Detection service unreachable: {}", e);
            ApiError::network()
        })?;

        let status = response.status();

        if !status.is_success() {
            let body = response.bytes().await.unwrap_or_default();
            let error = ApiError::from_response_body(status.as_u16(), &body);
            tracing::warn!("Detection service rejected request: {}", error);
            return Err(error);
        }

        let body = response.bytes().await.map_err(|e| {
            tracing::warn!("Failed to read detection service response: {}", e);
            ApiError::network()
        })?;

        serde_json::from_slice::<T>(&body).map_err(|e| {
            tracing::error!("Unexpected response shape from detection service: {}", e);
            ApiError::malformed(status.as_u16(), e)
        })
    }
}

impl DetectionApi for DetectionClient {
    async fn detect_image(
        &self,
        media_uri: &str,
        confidence: f64,
    ) -> Result<ImageDetectionResult, ApiError> {
        DetectionClient::detect_image(self, media_uri, confidence).await
    }

    async fn detect_video(
        &self,
        media_uri: &str,
        confidence: f64,
        frame_skip: u32,
    ) -> Result<VideoDetectionResult, ApiError> {
        DetectionClient::detect_video(self, media_uri, confidence, frame_skip).await
    }

    async fn check_health(&self) -> Result<HealthResponse, ApiError> {
        DetectionClient::check_health(self).await
    }
}
