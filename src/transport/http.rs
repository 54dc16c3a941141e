//! HTTP implementation of the backend transports.
//!
//! Plain request/response calls go through one `reqwest` client with a per-request
//! timeout; job submission uses the longer submit timeout. The download progress channel
//! is a server-sent event stream decoded with `eventsource-stream`, opened without a
//! request timeout so it stays up for the length of the download.

use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::BackendConfig;
use crate::error::ApiError;
use crate::transport::{
    ActivationReply, Job, JobId, JobTicket, JobTransport, ModelTransport, ProgressEvent,
    ProgressSubscription,
};

// Helper function to map reqwest errors to ApiError
fn map_http_error(error: reqwest::Error) -> ApiError {
    if error.is_timeout() {
        ApiError::Timeout(error.to_string())
    } else if error.is_connect() {
        ApiError::TransportError(format!("Connection error: {}", error))
    } else if error.is_decode() {
        ApiError::DecodeError(error.to_string())
    } else if let Some(status) = error.status() {
        ApiError::RequestFailed {
            status: status.as_u16(),
            message: error.to_string(),
        }
    } else {
        ApiError::TransportError(error.to_string())
    }
}

/// Pull a human readable cause out of an error body: `detail`, then `message`.
fn error_cause(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        detail: Option<serde_json::Value>,
        message: Option<String>,
    }

    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    match parsed.detail {
        Some(serde_json::Value::String(detail)) => Some(detail),
        Some(other) if !other.is_null() => Some(other.to_string()),
        _ => parsed.message,
    }
}

async fn check_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = error_cause(&body).unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("Unknown error")
            .to_string()
    });
    Err(ApiError::RequestFailed {
        status: status.as_u16(),
        message,
    })
}

/// HTTP client for the document and embedding-model endpoints.
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    request_timeout: Duration,
    submit_timeout: Duration,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> Result<Self, ApiError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .build()
            .map_err(|e| ApiError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            request_timeout: Duration::from_millis(config.request_timeout_ms),
            submit_timeout: Duration::from_millis(config.submit_timeout_ms),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T>(&self, path: &str) -> Result<T, ApiError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let response = self
            .client
            .get(self.url(path))
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(map_http_error)?;
        let response = check_status(response).await?;
        response.json().await.map_err(map_http_error)
    }
}

#[async_trait]
impl JobTransport for HttpBackend {
    async fn start_job(&self, paths: &[String]) -> Result<JobTicket, ApiError> {
        debug!(paths = paths.len(), "Submitting batch job");
        let response = self
            .client
            .post(self.url("/v1/documents/batch-process-and-index"))
            .timeout(self.submit_timeout)
            .json(&json!({ "file_paths": paths }))
            .send()
            .await
            .map_err(map_http_error)?;
        let response = check_status(response).await?;
        response.json().await.map_err(map_http_error)
    }

    async fn job_status(&self, job_id: &JobId) -> Result<Job, ApiError> {
        self.get_json(&format!("/v1/documents/batch-status/{}", job_id))
            .await
    }
}

#[async_trait]
impl ModelTransport for HttpBackend {
    async fn request_download(&self, model: &str) -> Result<(), ApiError> {
        let response = self
            .client
            .post(self.url("/Embedding/download"))
            .timeout(self.request_timeout)
            .json(&json!({ "model_name": model, "use_custom_dir": false }))
            .send()
            .await
            .map_err(map_http_error)?;
        check_status(response).await?;
        Ok(())
    }

    async fn subscribe_progress(&self, model: &str) -> Result<ProgressSubscription, ApiError> {
        let response = self
            .client
            .get(self.url(&format!("/Embedding/download-progress-sse/{}", model)))
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(map_http_error)?;
        let response = check_status(response).await?;

        let key = model.to_string();
        let events = response
            .bytes_stream()
            .eventsource()
            .filter_map(move |frame| {
                let key = key.clone();
                async move {
                    match frame {
                        Ok(event) if event.data.trim().is_empty() => None,
                        Ok(event) => Some(
                            serde_json::from_str::<ProgressEvent>(&event.data).map_err(|e| {
                                warn!(model = %key, error = %e, "Unparseable progress event");
                                ApiError::DecodeError(e.to_string())
                            }),
                        ),
                        Err(err) => Some(Err(ApiError::StreamError(err.to_string()))),
                    }
                }
            });

        Ok(ProgressSubscription::new(model, Box::pin(events)))
    }

    async fn download_progress(&self, model: &str) -> Result<ProgressEvent, ApiError> {
        self.get_json(&format!("/Embedding/download-progress/{}", model))
            .await
    }

    async fn list_downloaded(&self) -> Result<Vec<String>, ApiError> {
        #[derive(Deserialize)]
        struct LocalModel {
            name: String,
        }

        let models: Vec<LocalModel> = self.get_json("/Embedding/EmModel").await?;
        Ok(models.into_iter().map(|m| m.name).collect())
    }

    async fn active_model(&self) -> Result<Option<String>, ApiError> {
        #[derive(Deserialize)]
        struct ActiveModel {
            active_model: Option<String>,
        }

        let active: ActiveModel = self.get_json("/Embedding/active").await?;
        Ok(active.active_model.filter(|name| !name.is_empty()))
    }

    async fn activate(&self, model: &str) -> Result<ActivationReply, ApiError> {
        let response = self
            .client
            .post(self.url("/Embedding/active"))
            .timeout(self.request_timeout)
            .json(&json!({ "model_name": model }))
            .send()
            .await
            .map_err(map_http_error)?;
        let response = check_status(response).await?;
        response.json().await.map_err(map_http_error)
    }
}
