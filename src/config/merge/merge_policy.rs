//! Merge rules: defaults first, every later source overrides earlier ones.

use config::builder::DefaultState;
use config::Config;
use config::ConfigBuilder;
use config::ConfigError;

/// Create a Config builder with the scalar defaults applied.
///
/// Structured defaults (the model list, logging) come from serde defaults instead.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default("backend.base_url", "http://127.0.0.1:8000/api")?
        .set_default("backend.request_timeout_ms", 30_000)?
        .set_default("backend.submit_timeout_ms", 1_200_000)?
        .set_default("backend.connect_timeout_ms", 10_000)?
        .set_default("tracking.poll_interval_ms", 1_000)?
        .set_default("tracking.max_consecutive_poll_failures", 10)?
        .set_default("tracking.stream_fallback_to_polling", false)?
        .set_default("tracking.download_poll_interval_ms", 1_000)
}
