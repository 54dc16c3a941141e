//! Build command presentation: per-item table and job summary.

use crate::build::{ItemStatus, PollOutcome, PollState, StatusCounts, TrackedItem};
use crate::cli::presentation::format_section_heading;
use crate::estimator;
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use owo_colors::OwoColorize;
use serde_json::json;

fn counts_of(items: &[TrackedItem]) -> StatusCounts {
    let mut counts = StatusCounts::default();
    for item in items {
        match item.status {
            ItemStatus::Waiting => counts.waiting += 1,
            ItemStatus::Processing => counts.processing += 1,
            ItemStatus::Completed => counts.completed += 1,
            ItemStatus::Error => counts.error += 1,
            ItemStatus::Empty => counts.empty += 1,
        }
    }
    counts
}

fn outcome_line(state: &PollState) -> String {
    match &state.outcome {
        Some(PollOutcome::Completed) => format!("{}", "Job completed".green()),
        Some(PollOutcome::Abandoned { reason }) => {
            format!("{}: {}", "Job abandoned".red(), reason)
        }
        Some(PollOutcome::Stopped) => format!("{}", "Tracking stopped".yellow()),
        None => match state.formatted_remaining() {
            Some(eta) => format!("Job running, about {} remaining", eta),
            None => "Job running".to_string(),
        },
    }
}

pub fn format_build_result_text(items: &[TrackedItem], state: Option<&PollState>) -> String {
    let mut output = format_section_heading("Build");
    output.push('\n');
    if let Some(state) = state {
        output.push_str(&format!("Job: {}\n", state.job_id));
        output.push_str(&outcome_line(state));
        output.push('\n');
    }

    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["File", "Status", "Progress", "Message"]);
    for item in items {
        table.add_row(vec![
            item.path.clone(),
            item.status.as_str().to_string(),
            format!("{}%", item.progress),
            item.message.clone(),
        ]);
    }
    output.push_str(&table.to_string());

    let counts = counts_of(items);
    let overall = estimator::overall_progress(items.iter().map(|i| i.progress));
    output.push_str(&format!(
        "\n\n{} completed, {} empty, {} failed ({:.0}% overall)",
        counts.completed.to_string().green(),
        counts.empty,
        counts.error.to_string().red(),
        overall
    ));
    output
}

pub fn format_build_result_json(items: &[TrackedItem], state: Option<&PollState>) -> String {
    let counts = counts_of(items);
    let outcome = state.and_then(|s| s.outcome.as_ref()).map(|o| match o {
        PollOutcome::Completed => json!({ "kind": "completed" }),
        PollOutcome::Abandoned { reason } => json!({ "kind": "abandoned", "reason": reason }),
        PollOutcome::Stopped => json!({ "kind": "stopped" }),
    });
    let out = json!({
        "job_id": state.map(|s| s.job_id.to_string()),
        "outcome": outcome,
        "remaining_secs": state.and_then(|s| s.remaining_secs),
        "items": items,
        "counts": counts,
        "overall_progress": estimator::overall_progress(items.iter().map(|i| i.progress)),
    });
    serde_json::to_string_pretty(&out).unwrap_or_else(|_| "{}".to_string())
}
