//! Model command presentation: catalog table and activation reply.

use crate::cli::presentation::format_section_heading;
use crate::downloads::{ModelEntry, ModelStatus};
use crate::transport::ActivationReply;
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use owo_colors::OwoColorize;
use serde_json::json;

fn status_label(entry: &ModelEntry) -> String {
    match entry.status {
        ModelStatus::Downloading => format!("downloading {}%", entry.progress),
        status => status.as_str().to_string(),
    }
}

pub fn format_models_text(entries: &[ModelEntry]) -> String {
    if entries.is_empty() {
        return "No models configured.\n\nAdd [[models]] entries to the configuration.".to_string();
    }
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Model", "Status", "Size", "Parameters", "Context", "Languages"]);
    for entry in entries {
        let spec = &entry.spec;
        table.add_row(vec![
            spec.name.clone(),
            status_label(entry),
            spec.size.clone().unwrap_or_else(|| "-".to_string()),
            spec.parameters.clone().unwrap_or_else(|| "-".to_string()),
            spec.context_length.clone().unwrap_or_else(|| "-".to_string()),
            spec.supported_languages.clone().unwrap_or_else(|| "-".to_string()),
        ]);
    }

    let mut output = format_section_heading("Models");
    output.push('\n');
    output.push_str(&table.to_string());
    if let Some(active) = entries.iter().find(|e| e.status == ModelStatus::Active) {
        output.push_str(&format!("\n\nActive: {}", active.name().green()));
    }
    output
}

pub fn format_models_json(entries: &[ModelEntry]) -> String {
    let models: Vec<_> = entries
        .iter()
        .map(|entry| {
            json!({
                "name": entry.name(),
                "status": entry.status.as_str(),
                "progress": entry.progress,
                "released": entry.spec.released,
                "size": entry.spec.size,
                "parameters": entry.spec.parameters,
                "context_length": entry.spec.context_length,
                "supported_languages": entry.spec.supported_languages,
                "source_url": entry.spec.source_url,
            })
        })
        .collect();
    let out = json!({ "models": models, "total": entries.len() });
    serde_json::to_string_pretty(&out).unwrap_or_else(|_| "{}".to_string())
}

pub fn format_activation_result(model: &str, reply: &ActivationReply) -> String {
    let mut output = format!("Activated {}", model.green());
    if let Some(message) = &reply.message {
        output.push_str(&format!("\n{}", message));
    }
    if let Some(notice) = &reply.notice {
        output.push_str(&format!("\n{} {}", "Note:".yellow(), notice));
    }
    output
}
