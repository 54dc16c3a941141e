//! Backend transport seam.
//!
//! Wire types for the job and download endpoints plus the async traits the reconcilers
//! talk to. The reconcilers never see HTTP; tests drive them through in-memory
//! implementations of [`JobTransport`] and [`ModelTransport`].

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ApiError;

pub mod http;

pub use http::HttpBackend;

/// Backend identifier for a batch job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reply to a start-job request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobTicket {
    pub job_id: JobId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Aggregate job state. Anything the backend reports other than `completed` is
/// treated as still running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Completed,
    #[serde(other)]
    Running,
}

/// Per-entity outcome reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ResultStatus {
    Success,
    EmptyFile,
    Other(String),
}

impl From<String> for ResultStatus {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "success" => ResultStatus::Success,
            "empty_file" => ResultStatus::EmptyFile,
            _ => ResultStatus::Other(raw),
        }
    }
}

impl From<ResultStatus> for String {
    fn from(status: ResultStatus) -> Self {
        match status {
            ResultStatus::Success => "success".to_string(),
            ResultStatus::EmptyFile => "empty_file".to_string(),
            ResultStatus::Other(raw) => raw,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub source: String,
    pub status: ResultStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// One fetched snapshot of a batch job. Never cached across poll ticks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    pub status: JobState,
    #[serde(default)]
    pub processed: u64,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub results: Vec<JobResult>,
}

/// Status carried by a download progress event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DownloadStatus {
    Running,
    Completed,
    Error,
    Other(String),
}

impl DownloadStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DownloadStatus::Completed | DownloadStatus::Error)
    }
}

impl From<String> for DownloadStatus {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "running" | "downloading" => DownloadStatus::Running,
            "completed" => DownloadStatus::Completed,
            "error" => DownloadStatus::Error,
            _ => DownloadStatus::Other(raw),
        }
    }
}

impl From<DownloadStatus> for String {
    fn from(status: DownloadStatus) -> Self {
        match status {
            DownloadStatus::Running => "running".to_string(),
            DownloadStatus::Completed => "completed".to_string(),
            DownloadStatus::Error => "error".to_string(),
            DownloadStatus::Other(raw) => raw,
        }
    }
}

/// Incremental download progress for one model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    #[serde(default, deserialize_with = "deserialize_percent")]
    pub progress: u8,
    pub status: DownloadStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressEvent {
    pub fn running(progress: u8) -> Self {
        Self {
            progress: progress.min(100),
            status: DownloadStatus::Running,
            error: None,
        }
    }

    pub fn completed() -> Self {
        Self {
            progress: 100,
            status: DownloadStatus::Completed,
            error: None,
        }
    }

    pub fn failed(progress: u8, error: impl Into<String>) -> Self {
        Self {
            progress: progress.min(100),
            status: DownloadStatus::Error,
            error: Some(error.into()),
        }
    }
}

// The backend reports progress as a float percentage in some versions.
fn deserialize_percent<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = f64::deserialize(deserializer)?;
    if raw.is_nan() {
        return Ok(0);
    }
    Ok(raw.round().clamp(0.0, 100.0) as u8)
}

/// Reply to a model activation request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActivationReply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
}

/// Raw event stream behind a [`ProgressSubscription`].
pub type ProgressStream = Pin<Box<dyn Stream<Item = Result<ProgressEvent, ApiError>> + Send>>;

/// A push channel for one key with a single consumer and explicit close.
///
/// Closing drops the underlying stream, which for HTTP closes the connection. After
/// close, [`ProgressSubscription::next_event`] yields `None`.
pub struct ProgressSubscription {
    key: String,
    inner: Option<ProgressStream>,
}

impl ProgressSubscription {
    pub fn new(key: impl Into<String>, stream: ProgressStream) -> Self {
        Self {
            key: key.into(),
            inner: Some(stream),
        }
    }

    /// Subscription over a fixed sequence of events.
    pub fn from_events<I>(key: impl Into<String>, events: I) -> Self
    where
        I: IntoIterator<Item = Result<ProgressEvent, ApiError>>,
        I::IntoIter: Send + 'static,
    {
        Self::new(key, Box::pin(futures::stream::iter(events)))
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn next_event(&mut self) -> Option<Result<ProgressEvent, ApiError>> {
        match self.inner.as_mut() {
            Some(stream) => stream.next().await,
            None => None,
        }
    }

    pub fn close(&mut self) {
        self.inner = None;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }
}

impl fmt::Debug for ProgressSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressSubscription")
            .field("key", &self.key)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Batch job endpoints.
#[async_trait]
pub trait JobTransport: Send + Sync {
    /// Start a batch job over the given entity paths. Uses the extended submit timeout.
    async fn start_job(&self, paths: &[String]) -> Result<JobTicket, ApiError>;

    /// Fetch the current status of a job.
    async fn job_status(&self, job_id: &JobId) -> Result<Job, ApiError>;
}

/// Model download and activation endpoints.
#[async_trait]
pub trait ModelTransport: Send + Sync {
    /// Ask the backend to start downloading a model in the background.
    async fn request_download(&self, model: &str) -> Result<(), ApiError>;

    /// Open the push channel for a model's download progress.
    async fn subscribe_progress(&self, model: &str) -> Result<ProgressSubscription, ApiError>;

    /// One-shot progress read, used by the polling watcher.
    async fn download_progress(&self, model: &str) -> Result<ProgressEvent, ApiError>;

    /// Names of the models present locally on the backend.
    async fn list_downloaded(&self) -> Result<Vec<String>, ApiError>;

    /// Currently configured active model, if any.
    async fn active_model(&self) -> Result<Option<String>, ApiError>;

    async fn activate(&self, model: &str) -> Result<ActivationReply, ApiError>;
}
