//! CLI presentation: text and json formatters per command family.

mod build;
mod models;

pub use build::{format_build_result_json, format_build_result_text};
pub use models::{format_activation_result, format_models_json, format_models_text};

use owo_colors::OwoColorize;

/// Format a section heading with bold/underline.
pub(crate) fn format_section_heading(title: &str) -> String {
    format!("{}", title.bold().underline())
}
