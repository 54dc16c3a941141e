//! Error types for the job tracking subsystem.

use thiserror::Error;

/// Errors surfaced by transports, reconcilers and the configuration layer.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Request failed with status {status}: {message}")]
    RequestFailed { status: u16, message: String },

    #[error("Request timeout: {0}")]
    Timeout(String),

    #[error("Failed to decode response: {0}")]
    DecodeError(String),

    #[error("Stream error: {0}")]
    StreamError(String),

    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Download of {model} failed: {reason}")]
    DownloadFailed { model: String, reason: String },

    #[error("A job is already running: {0}")]
    AlreadyRunning(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl ApiError {
    /// Whether the failure happened below the application protocol (connect, timeout,
    /// broken channel) rather than as a well-formed backend answer.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ApiError::TransportError(_) | ApiError::Timeout(_) | ApiError::StreamError(_)
        )
    }
}

impl From<config::ConfigError> for ApiError {
    fn from(err: config::ConfigError) -> Self {
        ApiError::ConfigError(err.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::DecodeError(err.to_string())
    }
}
