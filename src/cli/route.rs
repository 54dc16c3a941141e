//! CLI route: single route table and run context. Dispatches to domain services and presentation.

use crate::build::{BuildTracker, ItemSet, PollSettings};
use crate::cli::help::command_name;
use crate::cli::parse::Commands;
use crate::cli::presentation::{
    format_activation_result, format_build_result_json, format_build_result_text,
    format_models_json, format_models_text,
};
use crate::config::{ConfigLoader, JobwatchConfig};
use crate::downloads::{
    DownloadObserver, DownloadSettings, ModelCatalog, ModelDownloads, ModelStatus,
};
use crate::error::ApiError;
use crate::registry::{SubscriptionRegistry, Transport};
use crate::transport::HttpBackend;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::sync::Notify;
use tracing::{info, warn};

/// How often a waiting `download` checks that its watcher still exists.
const WATCHER_CHECK_INTERVAL: Duration = Duration::from_millis(500);

/// Runtime context for CLI execution: configuration, backend client, watcher registry and
/// the tokio runtime the watchers run on.
pub struct RunContext {
    config: JobwatchConfig,
    workspace_root: PathBuf,
    backend: Arc<HttpBackend>,
    registry: SubscriptionRegistry,
    runtime: Runtime,
}

impl RunContext {
    /// Create run context from workspace root and optional config path. Uses ConfigLoader only.
    pub fn new(workspace_root: PathBuf, config_path: Option<PathBuf>) -> Result<Self, ApiError> {
        let config = if let Some(ref cfg_path) = config_path {
            ConfigLoader::load_from_file(cfg_path)?
        } else {
            ConfigLoader::load(&workspace_root)?
        };
        config.ensure_valid()?;

        let backend = Arc::new(HttpBackend::new(&config.backend)?);
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|e| ApiError::ConfigError(format!("Failed to start runtime: {}", e)))?;

        Ok(Self {
            config,
            workspace_root,
            backend,
            registry: SubscriptionRegistry::new(),
            runtime,
        })
    }

    pub fn config(&self) -> &JobwatchConfig {
        &self.config
    }

    /// Execute a CLI command via the single route table.
    pub fn execute(&self, command: &Commands) -> Result<String, ApiError> {
        info!(
            command = command_name(command),
            workspace = %self.workspace_root.display(),
            "Running command"
        );
        match command {
            Commands::Build { paths, format } => self.handle_build(paths, format),
            Commands::Models { format } => self.handle_models(format),
            Commands::Download { model, poll } => {
                let watch = if *poll { Transport::Poll } else { Transport::Stream };
                self.handle_download(model, watch)
            }
            Commands::Activate { model } => self.handle_activate(model),
            Commands::Config => self.config.to_toml_string(),
        }
    }

    fn handle_build(&self, paths: &[String], format: &str) -> Result<String, ApiError> {
        let tracker = BuildTracker::new(
            self.backend.clone(),
            self.registry.clone(),
            ItemSet::new(paths.iter().cloned()),
            PollSettings::from(&self.config.tracking),
        );

        self.runtime.block_on(async {
            let handle = tracker.start().await?;
            info!(key = handle.key(), items = paths.len(), "Tracking build");
            let state = tracker.wait_finished().await;
            let items = tracker.snapshot();
            Ok(if format == "json" {
                format_build_result_json(&items, state.as_ref())
            } else {
                format_build_result_text(&items, state.as_ref())
            })
        })
    }

    fn model_downloads(&self, watch: Transport, observer: Arc<dyn DownloadObserver>) -> ModelDownloads {
        let settings = DownloadSettings {
            watch_with: watch,
            ..DownloadSettings::from(&self.config.tracking)
        };
        ModelDownloads::new(
            self.backend.clone(),
            self.registry.clone(),
            ModelCatalog::new(self.config.models.clone()),
            observer,
            settings,
        )
    }

    fn handle_models(&self, format: &str) -> Result<String, ApiError> {
        let downloads = self.model_downloads(Transport::Stream, Arc::new(CliObserver::default()));
        self.runtime.block_on(downloads.refresh())?;
        let entries = downloads.catalog().snapshot();
        Ok(if format == "json" {
            format_models_json(&entries)
        } else {
            format_models_text(&entries)
        })
    }

    fn handle_download(&self, model: &str, watch: Transport) -> Result<String, ApiError> {
        let observer = Arc::new(CliObserver::default());
        let downloads = self.model_downloads(watch, observer.clone());

        self.runtime.block_on(async {
            downloads.download(model).await?;
            loop {
                tokio::select! {
                    _ = observer.notify.notified() => break,
                    _ = tokio::time::sleep(WATCHER_CHECK_INTERVAL) => {
                        if !downloads.is_watching(model) {
                            break;
                        }
                    }
                }
            }

            let downloaded = downloads
                .catalog()
                .get(model)
                .map(|entry| entry.status == ModelStatus::Downloaded)
                .unwrap_or(false);
            match observer.outcome.lock().take() {
                Some(Err(reason)) => {
                    return Err(ApiError::DownloadFailed {
                        model: model.to_string(),
                        reason,
                    })
                }
                None if !downloaded => {
                    return Err(ApiError::DownloadFailed {
                        model: model.to_string(),
                        reason: "watcher stopped before the download finished".to_string(),
                    })
                }
                _ => {}
            }

            if let Err(err) = downloads.refresh().await {
                warn!(model = %model, error = %err, "Downloaded, but status refresh failed");
            }
            Ok(format!("Downloaded {}", model))
        })
    }

    fn handle_activate(&self, model: &str) -> Result<String, ApiError> {
        let downloads = self.model_downloads(Transport::Stream, Arc::new(CliObserver::default()));
        let reply = self.runtime.block_on(downloads.activate(model))?;
        Ok(format_activation_result(model, &reply))
    }
}

impl Drop for RunContext {
    fn drop(&mut self) {
        self.registry.dispose_all();
    }
}

/// Records how a watched download ended and wakes the waiting command.
#[derive(Default)]
struct CliObserver {
    outcome: Mutex<Option<Result<(), String>>>,
    notify: Notify,
}

impl DownloadObserver for CliObserver {
    fn download_completed(&self, model: &str) {
        info!(model = %model, "Model downloaded");
        *self.outcome.lock() = Some(Ok(()));
        self.notify.notify_one();
    }

    fn download_failed(&self, model: &str, reason: &str) {
        warn!(model = %model, reason = %reason, "Model download failed");
        *self.outcome.lock() = Some(Err(reason.to_string()));
        self.notify.notify_one();
    }
}
