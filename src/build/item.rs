//! Per-entity state for a batch build.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::estimator;
use crate::transport::ResultStatus;

pub const MSG_WAITING: &str = "Waiting";
pub const MSG_PROCESSING: &str = "Processing";
pub const MSG_COMPLETED: &str = "Completed";
pub const MSG_FAILED: &str = "Failed";
pub const MSG_NO_RESULT: &str = "Backend returned no result for this item";

/// Progress shown for an item the backend is presumably working on.
pub const PROCESSING_PROGRESS: u8 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Waiting,
    Processing,
    Completed,
    Error,
    Empty,
}

impl ItemStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ItemStatus::Completed | ItemStatus::Error | ItemStatus::Empty)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ItemStatus::Waiting => "waiting",
            ItemStatus::Processing => "processing",
            ItemStatus::Completed => "completed",
            ItemStatus::Error => "error",
            ItemStatus::Empty => "empty",
        }
    }

    /// Local status for a backend result: `success` and `empty_file` map one to one,
    /// everything else is an error.
    pub fn from_result(status: &ResultStatus) -> Self {
        match status {
            ResultStatus::Success => ItemStatus::Completed,
            ResultStatus::EmptyFile => ItemStatus::Empty,
            ResultStatus::Other(_) => ItemStatus::Error,
        }
    }
}

/// A file whose indexing outcome is being tracked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedItem {
    pub path: String,
    pub status: ItemStatus,
    pub message: String,
    pub progress: u8,
}

impl TrackedItem {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            status: ItemStatus::Waiting,
            message: MSG_WAITING.to_string(),
            progress: 0,
        }
    }

    pub fn reset(&mut self) {
        self.status = ItemStatus::Waiting;
        self.message = MSG_WAITING.to_string();
        self.progress = 0;
    }

    pub fn promote(&mut self) {
        self.status = ItemStatus::Processing;
        self.message = MSG_PROCESSING.to_string();
        self.progress = PROCESSING_PROGRESS;
    }

    /// Move to a terminal status with full progress.
    pub fn finish(&mut self, status: ItemStatus, message: Option<String>) {
        debug_assert!(status.is_terminal());
        self.message = message.unwrap_or_else(|| match status {
            ItemStatus::Completed => MSG_COMPLETED.to_string(),
            _ => MSG_FAILED.to_string(),
        });
        self.status = status;
        self.progress = 100;
    }
}

/// Tally of items per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub waiting: usize,
    pub processing: usize,
    pub completed: usize,
    pub error: usize,
    pub empty: usize,
}

impl StatusCounts {
    pub fn unfinished(&self) -> usize {
        self.waiting + self.processing
    }
}

/// Caller-owned collection of tracked items, shared with the reconciler driving it.
#[derive(Debug, Clone, Default)]
pub struct ItemSet {
    items: Arc<Mutex<Vec<TrackedItem>>>,
}

impl ItemSet {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let items = paths.into_iter().map(TrackedItem::new).collect();
        Self {
            items: Arc::new(Mutex::new(items)),
        }
    }

    pub fn paths(&self) -> Vec<String> {
        self.items.lock().iter().map(|i| i.path.clone()).collect()
    }

    pub fn snapshot(&self) -> Vec<TrackedItem> {
        self.items.lock().clone()
    }

    pub fn get(&self, path: &str) -> Option<TrackedItem> {
        self.items.lock().iter().find(|i| i.path == path).cloned()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn reset_all(&self) {
        self.items.lock().iter_mut().for_each(TrackedItem::reset);
    }

    /// Force every item into `error` with the same message.
    pub fn fail_all(&self, message: &str) {
        for item in self.items.lock().iter_mut() {
            item.finish(ItemStatus::Error, Some(message.to_string()));
        }
    }

    /// Force every non-terminal item into `error`. Returns how many changed.
    pub fn fail_unfinished(&self, message: &str) -> usize {
        let mut items = self.items.lock();
        fail_unfinished(&mut items, message)
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for item in self.items.lock().iter() {
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

    pub fn overall_progress(&self) -> f64 {
        estimator::overall_progress(self.items.lock().iter().map(|i| i.progress))
    }

    /// Run `f` with exclusive access to the items.
    pub(crate) fn with_items<R>(&self, f: impl FnOnce(&mut [TrackedItem]) -> R) -> R {
        let mut items = self.items.lock();
        f(&mut items)
    }
}

pub(crate) fn fail_unfinished(items: &mut [TrackedItem], message: &str) -> usize {
    let mut changed = 0;
    for item in items.iter_mut().filter(|i| !i.status.is_terminal()) {
        item.finish(ItemStatus::Error, Some(message.to_string()));
        changed += 1;
    }
    changed
}
