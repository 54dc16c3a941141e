//! Remaining-time estimation.
//!
//! Linear extrapolation from the average time per processed entity. Every call starts
//! from scratch: there is no window and no smoothing, so the estimate swings with bursty
//! throughput.

use std::time::Duration;

use crate::transport::{Job, JobState};

/// Estimate the seconds left for `total - processed` entities.
///
/// Returns `None` when nothing has been processed yet or nothing remains.
pub fn estimate(elapsed_secs: f64, processed: u64, total: u64) -> Option<u64> {
    if processed == 0 || total <= processed {
        return None;
    }
    let per_entity = elapsed_secs / processed as f64;
    let remaining = per_entity * (total - processed) as f64;
    Some(remaining.round().max(0.0) as u64)
}

/// Remaining time for a fetched job: zero once the backend reports completion.
pub fn remaining_for(job: &Job, elapsed: Duration) -> Option<u64> {
    if job.status == JobState::Completed {
        return Some(0);
    }
    estimate(elapsed.as_secs_f64(), job.processed, job.total)
}

/// Render seconds as `42s`, `3m 5s` or `1h 2m 3s`.
pub fn format_remaining(secs: u64) -> String {
    if secs < 60 {
        return format!("{}s", secs);
    }
    let minutes = secs / 60;
    let seconds = secs % 60;
    if minutes < 60 {
        return format!("{}m {}s", minutes, seconds);
    }
    format!("{}h {}m {}s", minutes / 60, minutes % 60, seconds)
}

/// Mean of per-item progress values; 0 for an empty collection.
pub fn overall_progress<I>(progress: I) -> f64
where
    I: IntoIterator<Item = u8>,
{
    let (sum, count) = progress
        .into_iter()
        .fold((0u64, 0u64), |(sum, count), p| (sum + p as u64, count + 1));
    if count == 0 {
        0.0
    } else {
        sum as f64 / count as f64
    }
}
