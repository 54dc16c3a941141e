//! Entry points for loading a [`JobwatchConfig`].

use super::merge::merge_policy;
use super::sources::{environment, global_file, workspace_file};
use super::JobwatchConfig;
use crate::error::ApiError;
use config::{Config, File};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Loads configuration from the layered sources.
///
/// Order (lowest to highest precedence): built-in defaults, global file, workspace
/// `config/config.toml`, workspace `config/{JOBWATCH_ENV}.toml`, `JOBWATCH__*` variables.
pub struct ConfigLoader;

impl ConfigLoader {
    pub fn load(workspace_root: &Path) -> Result<JobwatchConfig, ApiError> {
        let builder = merge_policy::builder_with_defaults()?;
        let builder = global_file::add_to_builder(builder)?;
        let builder = workspace_file::add_to_builder(builder, workspace_root)?;
        let builder = environment::add_to_builder(builder);

        let config: JobwatchConfig = builder.build()?.try_deserialize()?;
        debug!(
            base_url = %config.backend.base_url,
            models = config.models.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Load a single file on top of the defaults, ignoring every other source.
    pub fn load_from_file(path: &Path) -> Result<JobwatchConfig, ApiError> {
        if !path.exists() {
            return Err(ApiError::ConfigError(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }
        let config = merge_policy::builder_with_defaults()?
            .add_source(File::from(path))
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    pub fn global_config_path() -> Option<PathBuf> {
        global_file::global_config_path()
    }

    /// Defaults only, as if no source were present.
    pub fn defaults() -> Result<JobwatchConfig, ApiError> {
        let config: Config = merge_policy::builder_with_defaults()?.build()?;
        Ok(config.try_deserialize()?)
    }
}
