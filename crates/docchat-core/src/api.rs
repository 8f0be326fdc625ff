use std::path::Path;
use std::time::Duration;

use futures_util::Stream;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::Config;
use crate::error::ApiError;
use crate::state::ChatMessage;
use crate::stream::{envelopes, LineMode, StreamEnvelope};

const PDF_MAGIC_BYTES: &[u8] = b"%PDF";

#[derive(Serialize)]
struct ChatRequest<'a> {
    question: &'a str,
}

#[derive(Deserialize)]
struct ErrorDetail {
    detail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StatusResponse {
    #[serde(default)]
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HealthResponse {
    pub status: Option<String>,
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UploadResponse {
    pub filename: String,
    pub status: String,
    pub chunks: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ResetResponse {
    pub status: String,
}

/// HTTP client for the RAG service.
#[derive(Clone)]
pub struct RagClient {
    client: Client,
    base_url: String,
    request_timeout: Duration,
    health_timeout: Duration,
    upload_timeout: Duration,
    max_upload_bytes: u64,
}

impl RagClient {
    pub fn new(base_url: &str) -> Self {
        let mut config = Config::new();
        config.api_url = base_url.to_string();
        Self::from_config(&config)
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            client: Client::new(),
            base_url: config.base_url().to_string(),
            request_timeout: config.request_timeout(),
            health_timeout: config.health_timeout(),
            upload_timeout: config.upload_timeout(),
            max_upload_bytes: config.max_upload_bytes(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn fetch_history(&self) -> Result<Vec<ChatMessage>, ApiError> {
        let response = self.get("/history", self.request_timeout).await?;
        if !response.status().is_success() {
            return Err(ApiError::network(format!(
                "Failed to fetch history: {}",
                response.status()
            )));
        }
        Ok(response.json().await?)
    }

    pub async fn fetch_status(&self) -> Result<StatusResponse, ApiError> {
        let response = self.get("/status", self.request_timeout).await?;
        if !response.status().is_success() {
            return Err(ApiError::network(format!(
                "Failed to fetch status: {}",
                response.status()
            )));
        }
        Ok(response.json().await?)
    }

    /// History and status fetched concurrently; each result stands alone.
    pub async fn fetch_snapshot(
        &self,
    ) -> (
        Result<Vec<ChatMessage>, ApiError>,
        Result<StatusResponse, ApiError>,
    ) {
        tokio::join!(self.fetch_history(), self.fetch_status())
    }

    /// A 2xx reply means online, whatever the body says.
    pub async fn check_health(&self) -> Result<HealthResponse, ApiError> {
        let response = self.get("/health", self.health_timeout).await?;
        if !response.status().is_success() {
            return Err(ApiError::network(format!(
                "Backend offline: {}",
                response.status()
            )));
        }
        Ok(response.json().await.unwrap_or_default())
    }

    pub async fn reset_session(&self) -> Result<ResetResponse, ApiError> {
        self.post_empty("/reset", "Failed to reset session").await
    }

    pub async fn clear_chat(&self) -> Result<ResetResponse, ApiError> {
        self.post_empty("/clear_chat", "Failed to clear chat").await
    }

    /// Read a PDF from disk, pre-check it, and upload it.
    pub async fn upload_path(&self, path: &Path) -> Result<UploadResponse, ApiError> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| ApiError::InvalidDocument {
                message: format!("{} is not a file", path.display()),
            })?;
        let unreadable = |e: std::io::Error| ApiError::InvalidDocument {
            message: format!("Failed to read {}: {}", path.display(), e),
        };
        // Reject oversized files before pulling them into memory
        let size = tokio::fs::metadata(path).await.map_err(unreadable)?.len();
        if size > self.max_upload_bytes {
            return Err(too_large(self.max_upload_bytes));
        }
        let bytes = tokio::fs::read(path).await.map_err(unreadable)?;
        self.upload_document(&file_name, bytes).await
    }

    pub async fn upload_document(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<UploadResponse, ApiError> {
        validate_document(file_name, &bytes, self.max_upload_bytes)?;
        debug!(file_name, size = bytes.len(), "uploading document");

        let part = Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str("application/pdf")
            .map_err(upload_error)?;
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(self.url("/upload"))
            .multipart(form)
            .timeout(self.upload_timeout)
            .send()
            .await
            .map_err(upload_error)?;

        if !response.status().is_success() {
            let message = error_message(response, "Upload failed").await;
            return Err(ApiError::Upload { message });
        }

        response.json().await.map_err(upload_error)
    }

    /// Open the streaming answer for `question`. No timeout applies; the
    /// caller bounds the stream by cancelling it.
    pub async fn send_chat_message(&self, question: &str) -> Result<ChatStream, ApiError> {
        debug!(question_len = question.len(), "opening chat stream");
        let response = self
            .client
            .post(self.url("/chat"))
            .json(&ChatRequest { question })
            .send()
            .await?;

        if !response.status().is_success() {
            let message = error_message(response, "Chat request failed").await;
            return Err(ApiError::ChatRequest { message });
        }

        Ok(ChatStream { response })
    }

    async fn get(&self, path: &str, timeout: Duration) -> Result<Response, ApiError> {
        debug!(path, "GET");
        Ok(self
            .client
            .get(self.url(path))
            .timeout(timeout)
            .send()
            .await?)
    }

    async fn post_empty<T>(&self, path: &str, failure: &str) -> Result<T, ApiError>
    where
        T: for<'de> Deserialize<'de>,
    {
        debug!(path, "POST");
        let response = self
            .client
            .post(self.url(path))
            .timeout(self.request_timeout)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ApiError::network(format!("{}: {}", failure, response.status())));
        }
        Ok(response.json().await?)
    }
}

/// An open `/chat` response body.
pub struct ChatStream {
    response: Response,
}

impl ChatStream {
    pub fn envelopes(
        self,
        mode: LineMode,
        cancel: Option<CancellationToken>,
    ) -> impl Stream<Item = Result<StreamEnvelope, ApiError>> {
        envelopes(self.response.bytes_stream(), mode, cancel)
    }
}

/// Client-side mirror of the server's upload validation.
pub fn validate_document(file_name: &str, bytes: &[u8], max_bytes: u64) -> Result<(), ApiError> {
    if bytes.len() as u64 > max_bytes {
        return Err(too_large(max_bytes));
    }
    if !file_name.to_lowercase().ends_with(".pdf") {
        return Err(ApiError::InvalidDocument {
            message: "Invalid file type. Only PDF files are accepted.".to_string(),
        });
    }
    if !bytes.starts_with(PDF_MAGIC_BYTES) {
        return Err(ApiError::InvalidDocument {
            message: "The file does not appear to be a valid PDF.".to_string(),
        });
    }
    Ok(())
}

fn too_large(max_bytes: u64) -> ApiError {
    ApiError::InvalidDocument {
        message: format!(
            "File too large. Maximum size is {}MB.",
            max_bytes / (1024 * 1024)
        ),
    }
}

fn upload_error(err: reqwest::Error) -> ApiError {
    ApiError::Upload {
        message: err.to_string(),
    }
}

/// Prefer the server's `detail` text, then the raw body, then `fallback`.
async fn error_message(response: Response, fallback: &str) -> String {
    let text = response.text().await.unwrap_or_default();
    if let Ok(detail) = serde_json::from_str::<ErrorDetail>(&text) {
        return detail.detail;
    }
    if text.trim().is_empty() {
        fallback.to_string()
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_accepts_pdf() {
        assert!(validate_document("Report.PDF", b"%PDF-1.7 ...", 1024).is_ok());
    }

    #[test]
    fn validate_rejects_wrong_extension_magic_and_size() {
        assert!(matches!(
            validate_document("notes.txt", b"%PDF-1.7", 1024),
            Err(ApiError::InvalidDocument { .. })
        ));
        assert!(matches!(
            validate_document("fake.pdf", b"<html>", 1024),
            Err(ApiError::InvalidDocument { .. })
        ));
        assert!(matches!(
            validate_document("big.pdf", &[b'%'; 2048], 1024),
            Err(ApiError::InvalidDocument { .. })
        ));
    }

    #[test]
    fn base_url_is_trimmed() {
        let client = RagClient::new("http://localhost:8001/");
        assert_eq!(client.base_url(), "http://localhost:8001");
        assert_eq!(client.url("/history"), "http://localhost:8001/history");
    }
}
