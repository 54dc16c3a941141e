//! Embedding model downloads.
//!
//! Each catalog entry is watched by at most one push subscription or poller at a time,
//! keyed `model:<name>` in the shared [`SubscriptionRegistry`]. Both watcher kinds apply
//! progress events the same way through [`ModelCatalog::apply_event`].

pub mod poll;
pub mod stream;

pub use poll::DownloadPoller;
pub use stream::StreamReconciler;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{ModelSpec, TrackingConfig};
use crate::error::ApiError;
use crate::registry::{Liveness, SubscriptionRegistry, Transport};
use crate::transport::{ActivationReply, DownloadStatus, ModelTransport, ProgressEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelStatus {
    NotDownloaded,
    Downloading,
    Downloaded,
    Active,
}

impl ModelStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelStatus::NotDownloaded => "not_downloaded",
            ModelStatus::Downloading => "downloading",
            ModelStatus::Downloaded => "downloaded",
            ModelStatus::Active => "active",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelEntry {
    pub spec: ModelSpec,
    pub status: ModelStatus,
    pub progress: u8,
}

impl ModelEntry {
    pub fn new(spec: ModelSpec) -> Self {
        Self {
            spec,
            status: ModelStatus::NotDownloaded,
            progress: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }
}

/// What a progress event did to its entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventEffect {
    Progress,
    Completed,
    Failed(Option<String>),
}

/// Shared list of known models and their local status.
#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
    entries: Arc<Mutex<Vec<ModelEntry>>>,
}

impl ModelCatalog {
    pub fn new<I>(specs: I) -> Self
    where
        I: IntoIterator<Item = ModelSpec>,
    {
        let entries = specs.into_iter().map(ModelEntry::new).collect();
        Self {
            entries: Arc::new(Mutex::new(entries)),
        }
    }

    pub fn snapshot(&self) -> Vec<ModelEntry> {
        self.entries.lock().clone()
    }

    pub fn get(&self, name: &str) -> Option<ModelEntry> {
        self.entries.lock().iter().find(|e| e.name() == name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.lock().iter().any(|e| e.name() == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.lock().iter().map(|e| e.spec.name.clone()).collect()
    }

    fn update<R>(&self, name: &str, f: impl FnOnce(&mut ModelEntry) -> R) -> Option<R> {
        let mut entries = self.entries.lock();
        entries.iter_mut().find(|e| e.name() == name).map(f)
    }

    pub fn mark_downloading(&self, name: &str) -> bool {
        self.update(name, |entry| {
            entry.status = ModelStatus::Downloading;
            entry.progress = 0;
        })
        .is_some()
    }

    /// Back to the initial negative state.
    pub fn revert(&self, name: &str) -> bool {
        self.update(name, |entry| {
            entry.status = ModelStatus::NotDownloaded;
            entry.progress = 0;
        })
        .is_some()
    }

    /// Revert unless the watcher owning `liveness` has been disposed.
    pub(crate) fn revert_if_alive(&self, name: &str, liveness: &Liveness) -> bool {
        self.update(name, |entry| {
            if !liveness.is_alive() {
                return false;
            }
            entry.status = ModelStatus::NotDownloaded;
            entry.progress = 0;
            true
        })
        .unwrap_or(false)
    }

    /// Apply one progress event. Returns `None` when the watcher is no longer live or
    /// the model is not in the catalog; nothing is changed in that case.
    pub fn apply_event(
        &self,
        name: &str,
        event: &ProgressEvent,
        liveness: &Liveness,
    ) -> Option<EventEffect> {
        self.update(name, |entry| {
            if !liveness.is_alive() {
                return None;
            }
            entry.progress = event.progress.min(100);
            let effect = match &event.status {
                DownloadStatus::Completed => {
                    entry.status = ModelStatus::Downloaded;
                    entry.progress = 100;
                    EventEffect::Completed
                }
                DownloadStatus::Error => {
                    entry.status = ModelStatus::NotDownloaded;
                    entry.progress = 0;
                    EventEffect::Failed(event.error.clone())
                }
                DownloadStatus::Running | DownloadStatus::Other(_) => EventEffect::Progress,
            };
            Some(effect)
        })
        .flatten()
    }

    /// Reconcile statuses with the backend's view. Entries mid-download keep their state.
    pub fn apply_refresh(&self, downloaded: &[String], active: Option<&str>) {
        for entry in self.entries.lock().iter_mut() {
            if entry.status == ModelStatus::Downloading {
                continue;
            }
            let present = downloaded.iter().any(|name| name == entry.name());
            entry.status = if present && active == Some(entry.name()) {
                ModelStatus::Active
            } else if present {
                ModelStatus::Downloaded
            } else {
                ModelStatus::NotDownloaded
            };
            entry.progress = 0;
        }
    }
}

/// Notified when a download reaches a terminal state.
pub trait DownloadObserver: Send + Sync {
    fn download_completed(&self, model: &str);

    fn download_failed(&self, _model: &str, _reason: &str) {}
}

/// Observer that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingObserver;

impl DownloadObserver for LoggingObserver {
    fn download_completed(&self, model: &str) {
        info!(model = %model, "Model downloaded; reload to start using it");
    }

    fn download_failed(&self, model: &str, reason: &str) {
        warn!(model = %model, reason = %reason, "Model download failed");
    }
}

/// Watcher preferences for downloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadSettings {
    /// Watcher used for a freshly requested download.
    pub watch_with: Transport,
    /// Hand a failed push channel over to a poller instead of failing the entry.
    pub fallback_to_polling: bool,
    pub poll_interval: Duration,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            watch_with: Transport::Stream,
            fallback_to_polling: false,
            poll_interval: Duration::from_millis(1000),
        }
    }
}

impl From<&TrackingConfig> for DownloadSettings {
    fn from(config: &TrackingConfig) -> Self {
        Self {
            watch_with: Transport::Stream,
            fallback_to_polling: config.stream_fallback_to_polling,
            poll_interval: Duration::from_millis(config.download_poll_interval_ms),
        }
    }
}

/// Everything a download watcher needs, cheap to clone into a task.
#[derive(Clone)]
pub struct DownloadContext {
    pub transport: Arc<dyn ModelTransport>,
    pub registry: SubscriptionRegistry,
    pub catalog: ModelCatalog,
    pub observer: Arc<dyn DownloadObserver>,
    pub settings: DownloadSettings,
}

impl DownloadContext {
    pub fn registry_key(model: &str) -> String {
        format!("model:{}", model)
    }

    /// Post-completion side effects: notify, then refresh from the backend.
    pub(crate) async fn on_completed(&self, model: &str) {
        self.observer.download_completed(model);
        if let Err(err) = refresh_catalog(self.transport.as_ref(), &self.catalog).await {
            warn!(model = %model, error = %err, "Failed to refresh model statuses");
        }
    }

    pub(crate) fn on_failed(&self, model: &str, reason: &str) {
        self.observer.download_failed(model, reason);
    }
}

/// Fetch downloaded and active models together and fold them into the catalog.
pub async fn refresh_catalog(
    transport: &dyn ModelTransport,
    catalog: &ModelCatalog,
) -> Result<(), ApiError> {
    let (downloaded, active) =
        futures::try_join!(transport.list_downloaded(), transport.active_model())?;
    catalog.apply_refresh(&downloaded, active.as_deref());
    Ok(())
}

/// Download, activation and status refresh for a model catalog.
///
/// Dropping it disposes the watchers of its catalog entries.
pub struct ModelDownloads {
    ctx: DownloadContext,
    stream: StreamReconciler,
    poller: DownloadPoller,
}

impl ModelDownloads {
    pub fn new(
        transport: Arc<dyn ModelTransport>,
        registry: SubscriptionRegistry,
        catalog: ModelCatalog,
        observer: Arc<dyn DownloadObserver>,
        settings: DownloadSettings,
    ) -> Self {
        let ctx = DownloadContext {
            transport,
            registry,
            catalog,
            observer,
            settings,
        };
        Self {
            stream: StreamReconciler::new(ctx.clone()),
            poller: DownloadPoller::new(ctx.clone()),
            ctx,
        }
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.ctx.catalog
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.ctx.registry
    }

    /// Request a download and start watching it with the configured watcher.
    pub async fn download(&self, model: &str) -> Result<Liveness, ApiError> {
        self.download_with(model, self.ctx.settings.watch_with).await
    }

    /// Request a download and watch it with the given transport.
    pub async fn download_with(&self, model: &str, watch: Transport) -> Result<Liveness, ApiError> {
        if !self.ctx.catalog.mark_downloading(model) {
            return Err(ApiError::UnknownModel(model.to_string()));
        }

        if let Err(err) = self.ctx.transport.request_download(model).await {
            warn!(model = %model, error = %err, "Download request failed");
            self.ctx.catalog.revert(model);
            return Err(err);
        }

        info!(model = %model, watch = watch.as_str(), "Download requested");
        let liveness = match watch {
            Transport::Stream => self.stream.start_stream(model),
            Transport::Poll => self.poller.start(model),
        };
        Ok(liveness)
    }

    pub async fn activate(&self, model: &str) -> Result<ActivationReply, ApiError> {
        if !self.ctx.catalog.contains(model) {
            return Err(ApiError::UnknownModel(model.to_string()));
        }
        let reply = self.ctx.transport.activate(model).await?;
        info!(
            model = %model,
            message = ?reply.message,
            notice = ?reply.notice,
            "Model activated"
        );
        self.refresh().await?;
        Ok(reply)
    }

    pub async fn refresh(&self) -> Result<(), ApiError> {
        refresh_catalog(self.ctx.transport.as_ref(), &self.ctx.catalog)
            .await
            .map_err(|err| {
                warn!(error = %err, "Failed to fetch model statuses");
                err
            })
    }

    pub fn is_watching(&self, model: &str) -> bool {
        self.ctx
            .registry
            .is_live(&DownloadContext::registry_key(model))
    }

    pub fn watcher_of(&self, model: &str) -> Option<Transport> {
        self.ctx
            .registry
            .transport_of(&DownloadContext::registry_key(model))
    }

    pub fn stop(&self, model: &str) -> bool {
        self.ctx
            .registry
            .dispose(&DownloadContext::registry_key(model))
    }

    /// Dispose the watcher of every catalog entry.
    pub fn stop_all(&self) -> usize {
        self.ctx
            .catalog
            .names()
            .iter()
            .filter(|name| self.stop(name))
            .count()
    }
}

impl Drop for ModelDownloads {
    fn drop(&mut self) {
        self.stop_all();
    }
}
