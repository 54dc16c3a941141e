//! Configuration Management
//!
//! Layered configuration for the backend connection, job and download tracking, the
//! model catalog and logging. Sources are merged by [`ConfigLoader`].

use crate::error::ApiError;
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

mod facade;
mod merge;
mod sources;

pub use facade::ConfigLoader;

/// Complete configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobwatchConfig {
    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub tracking: TrackingConfig,

    /// Models offered for download; the built-in catalog when absent
    #[serde(default = "ModelSpec::builtin")]
    pub models: Vec<ModelSpec>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for JobwatchConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            tracking: TrackingConfig::default(),
            models: ModelSpec::builtin(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Backend connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// API root, e.g. `http://127.0.0.1:8000/api`
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Timeout for the batch submit call, which blocks until the backend has queued the job
    #[serde(default = "default_submit_timeout_ms")]
    pub submit_timeout_ms: u64,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8000/api".to_string()
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_submit_timeout_ms() -> u64 {
    1_200_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_ms: default_request_timeout_ms(),
            submit_timeout_ms: default_submit_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl BackendConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(format!(
                "base_url must start with http:// or https://, got '{}'",
                self.base_url
            ));
        }
        if self.request_timeout_ms == 0 || self.submit_timeout_ms == 0 {
            return Err("timeouts must be greater than zero".to_string());
        }
        if self.connect_timeout_ms == 0 {
            return Err("connect_timeout_ms must be greater than zero".to_string());
        }
        Ok(())
    }
}

/// Job and download tracking settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Job status poll interval
    #[serde(default = "default_interval_ms")]
    pub poll_interval_ms: u64,

    /// Consecutive failed status polls before a job is abandoned; 0 polls forever
    #[serde(default = "default_max_failures")]
    pub max_consecutive_poll_failures: u32,

    /// Hand a failed progress stream over to polling instead of reverting the download
    #[serde(default)]
    pub stream_fallback_to_polling: bool,

    #[serde(default = "default_interval_ms")]
    pub download_poll_interval_ms: u64,
}

fn default_interval_ms() -> u64 {
    1_000
}

fn default_max_failures() -> u32 {
    10
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_interval_ms(),
            max_consecutive_poll_failures: default_max_failures(),
            stream_fallback_to_polling: false,
            download_poll_interval_ms: default_interval_ms(),
        }
    }
}

impl TrackingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be greater than zero".to_string());
        }
        if self.download_poll_interval_ms == 0 {
            return Err("download_poll_interval_ms must be greater than zero".to_string());
        }
        Ok(())
    }
}

/// A model the backend can download, with its descriptive metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    #[serde(default)]
    pub released: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub supported_languages: Option<String>,
    #[serde(default)]
    pub parameters: Option<String>,
    #[serde(default)]
    pub context_length: Option<String>,
    #[serde(default)]
    pub source_url: Option<String>,
}

impl ModelSpec {
    /// A spec with a name and no metadata.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            released: None,
            size: None,
            supported_languages: None,
            parameters: None,
            context_length: None,
            source_url: None,
        }
    }

    /// The catalog used when the configuration lists no models.
    pub fn builtin() -> Vec<ModelSpec> {
        vec![ModelSpec {
            name: "Qwen/Qwen3-Embedding-0.6B".to_string(),
            released: Some("2025-5".to_string()),
            size: Some("1.19GB".to_string()),
            supported_languages: Some("100+ Languages".to_string()),
            parameters: Some("0.6B".to_string()),
            context_length: Some("32k".to_string()),
            source_url: Some("https://huggingface.co/Qwen/Qwen3-Embedding-0.6B".to_string()),
        }]
    }
}

/// Configuration validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    Backend(String),
    Tracking(String),
    Model(String, String),
    Logging(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Backend(msg) => write!(f, "Backend: {}", msg),
            ValidationError::Tracking(msg) => write!(f, "Tracking: {}", msg),
            ValidationError::Model(name, msg) => write!(f, "Model '{}': {}", name, msg),
            ValidationError::Logging(msg) => write!(f, "Logging: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl JobwatchConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Err(e) = self.backend.validate() {
            errors.push(ValidationError::Backend(e));
        }
        if let Err(e) = self.tracking.validate() {
            errors.push(ValidationError::Tracking(e));
        }
        if let Err(e) = crate::logging::validate(&self.logging) {
            errors.push(ValidationError::Logging(e));
        }

        let mut seen = HashSet::new();
        for model in &self.models {
            if model.name.trim().is_empty() {
                errors.push(ValidationError::Model(
                    model.name.clone(),
                    "name cannot be empty".to_string(),
                ));
            } else if !seen.insert(model.name.as_str()) {
                errors.push(ValidationError::Model(
                    model.name.clone(),
                    "listed more than once".to_string(),
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validate, folding every problem into one [`ApiError::ConfigError`].
    pub fn ensure_valid(&self) -> Result<(), ApiError> {
        self.validate().map_err(|errors| {
            let error_msgs: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            ApiError::ConfigError(format!(
                "Configuration validation failed:\n{}",
                error_msgs.join("\n")
            ))
        })
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String, ApiError> {
        toml::to_string_pretty(self)
            .map_err(|e| ApiError::ConfigError(format!("Failed to serialize config: {}", e)))
    }
}
