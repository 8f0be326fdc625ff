use thiserror::Error;

/// Failures of calls against the RAG service.
///
/// None of these escape the chat session: it turns each one into visible
/// state (an upload status, an assistant message, or the connection
/// indicator). `Aborted` is cancellation, not a failure, and is never shown.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("network error: {message}")]
    Network { message: String },
    #[error("upload failed: {message}")]
    Upload { message: String },
    #[error("chat request failed: {message}")]
    ChatRequest { message: String },
    #[error("invalid document: {message}")]
    InvalidDocument { message: String },
    #[error("request aborted")]
    Aborted,
}

impl ApiError {
    pub fn network(message: impl Into<String>) -> Self {
        ApiError::Network {
            message: message.into(),
        }
    }

    pub fn is_abort(&self) -> bool {
        matches!(self, ApiError::Aborted)
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::network(format!("request timed out: {err}"))
        } else {
            ApiError::network(err.to_string())
        }
    }
}

/// Failures of the durable message cache. Always logged and swallowed.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("storage io: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage json: {0}")]
    Json(#[from] serde_json::Error),
}
