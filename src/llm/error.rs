//! Typed errors for LLM operations
//!
//! Lets the pipeline and the presenters tell a refused request from a
//! stream that broke halfway without matching on strings.

use thiserror::Error;

/// LLM operation errors with typed variants
///
/// - `Unauthorized` (401/403) - missing or rejected API key
/// - `ModelNotFound` (404) - model not pulled / unknown to the endpoint
/// - `RateLimited` (429) - quota exceeded
/// - `BadRequest` (400) - malformed request
/// - `ServiceError` (5xx) - server-side issue
/// - `Network` - connection refused, request timeout
/// - `StreamIdle` - streamed answer went silent for too long
/// - `Stream` - malformed or truncated streamed answer
/// - `Other` - catch-all
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Ollama answers 404 when the model has not been pulled
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Service error: {0}")]
    ServiceError(String),

    #[error("Network error: {0}")]
    Network(String),

    /// No bytes received on a streaming response within the idle window
    #[error("Stream idle for {0} seconds")]
    StreamIdle(u64),

    /// Streaming response could not be read or decoded
    #[error("Stream error: {0}")]
    Stream(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl LlmError {
    /// True when a stream that had started was cut short
    pub fn is_stream_failure(&self) -> bool {
        matches!(self, LlmError::StreamIdle(_) | LlmError::Stream(_))
    }

    /// Convert HTTP status code and error text into typed LlmError
    pub fn from_http_status(status: reqwest::StatusCode, error_text: String) -> Self {
        match status.as_u16() {
            401 | 403 => LlmError::Unauthorized(error_text),
            404 => LlmError::ModelNotFound(error_text),
            429 => LlmError::RateLimited(error_text),
            400 => LlmError::BadRequest(error_text),
            500..=599 => LlmError::ServiceError(error_text),
            _ => LlmError::Other(anyhow::anyhow!("HTTP {}: {}", status, error_text)),
        }
    }

    /// Convert network/connection errors into typed LlmError
    pub fn from_network_error(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            LlmError::Network(format!("Request timeout: {}", e))
        } else if e.is_connect() {
            LlmError::Network(format!("Connection failed: {}", e))
        } else if let Some(status) = e.status() {
            let error_text = e.to_string();
            Self::from_http_status(status, error_text)
        } else {
            LlmError::Other(e.into())
        }
    }
}
