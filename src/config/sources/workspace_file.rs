//! Workspace config files: `config/config.toml`, then `config/{JOBWATCH_ENV}.toml`

use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError, File};
use std::path::{Path, PathBuf};
use tracing::debug;

const DEFAULT_ENVIRONMENT: &str = "development";

/// Deployment environment selecting the overlay file.
pub fn environment_name() -> String {
    std::env::var("JOBWATCH_ENV")
        .ok()
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string())
}

/// Candidate files in merge order; later files override earlier ones.
pub fn candidate_paths(workspace_root: &Path) -> Vec<PathBuf> {
    let dir = workspace_root.join("config");
    vec![
        dir.join("config.toml"),
        dir.join(format!("{}.toml", environment_name())),
    ]
}

pub fn add_to_builder(
    mut builder: ConfigBuilder<DefaultState>,
    workspace_root: &Path,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    for path in candidate_paths(workspace_root) {
        if !path.exists() {
            continue;
        }
        debug!(config_path = %path.display(), "Adding workspace configuration");
        builder = builder.add_source(File::from(path.as_path()).required(false));
    }
    Ok(builder)
}
