//! Batch build tracking: submit a set of files as one backend job, then poll it to
//! completion while keeping per-file state current.

pub mod item;
pub mod poll;
pub mod submit;

pub use item::{ItemSet, ItemStatus, StatusCounts, TrackedItem};
pub use poll::{reconcile_tick, PollHandle, PollOutcome, PollSettings, PollState, PollingReconciler, TickOutcome};
pub use submit::JobSubmitter;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::error::ApiError;
use crate::registry::SubscriptionRegistry;
use crate::transport::JobTransport;

/// Job slot of a tracker. `Starting` is claimed before submission so overlapping starts
/// are rejected instead of racing.
enum Slot {
    Idle,
    /// Claimed by the start call holding this generation.
    Starting(u64),
    Polling(PollHandle),
}

impl Slot {
    fn handle(&self) -> Option<&PollHandle> {
        match self {
            Slot::Polling(handle) => Some(handle),
            _ => None,
        }
    }
}

/// Releases a `Starting` claim when submission fails or the start future is dropped.
struct StartClaim<'a> {
    slot: &'a Mutex<Slot>,
    generation: u64,
    armed: bool,
}

impl StartClaim<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for StartClaim<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut slot = self.slot.lock();
        if matches!(*slot, Slot::Starting(g) if g == self.generation) {
            *slot = Slot::Idle;
        }
    }
}

/// One batch build over a fixed item set.
///
/// At most one job runs per tracker. Dropping the tracker stops its poller.
pub struct BuildTracker {
    items: ItemSet,
    submitter: JobSubmitter,
    reconciler: PollingReconciler,
    slot: Mutex<Slot>,
    claims: AtomicU64,
}

impl BuildTracker {
    pub fn new(
        transport: Arc<dyn JobTransport>,
        registry: SubscriptionRegistry,
        items: ItemSet,
        settings: PollSettings,
    ) -> Self {
        Self {
            submitter: JobSubmitter::new(Arc::clone(&transport)),
            reconciler: PollingReconciler::new(transport, registry, items.clone(), settings),
            items,
            slot: Mutex::new(Slot::Idle),
            claims: AtomicU64::new(0),
        }
    }

    pub fn items(&self) -> &ItemSet {
        &self.items
    }

    /// Submit the items and start polling the resulting job.
    ///
    /// Fails with [`ApiError::AlreadyRunning`] while a previous job is being submitted or
    /// is still polled.
    pub async fn start(&self) -> Result<PollHandle, ApiError> {
        let claim = self.claim()?;

        let started = Instant::now();
        let job_id = self.submitter.submit(&self.items).await?;
        let handle = self.reconciler.start_at(job_id, started);

        let mut slot = self.slot.lock();
        if matches!(*slot, Slot::Starting(g) if g == claim.generation) {
            *slot = Slot::Polling(handle.clone());
        } else {
            // Reset while the submission was in flight.
            debug!(key = handle.key(), "Tracker reset during submission; stopping poller");
            handle.stop();
        }
        drop(slot);
        claim.disarm();
        Ok(handle)
    }

    fn claim(&self) -> Result<StartClaim<'_>, ApiError> {
        let mut slot = self.slot.lock();
        match &*slot {
            Slot::Starting(_) => {
                return Err(ApiError::AlreadyRunning("submission in progress".to_string()))
            }
            Slot::Polling(handle) if handle.is_running() => {
                return Err(ApiError::AlreadyRunning(handle.state().job_id.to_string()))
            }
            _ => {}
        }
        let generation = self.claims.fetch_add(1, Ordering::Relaxed);
        *slot = Slot::Starting(generation);
        Ok(StartClaim {
            slot: &self.slot,
            generation,
            armed: true,
        })
    }

    pub fn snapshot(&self) -> Vec<TrackedItem> {
        self.items.snapshot()
    }

    /// Wait for the current job's watcher to finish. `None` when nothing was started.
    pub async fn wait_finished(&self) -> Option<PollState> {
        let handle = self.slot.lock().handle().cloned();
        match handle {
            Some(mut handle) => Some(handle.wait_finished().await),
            None => None,
        }
    }

    pub fn state(&self) -> Option<PollState> {
        self.slot.lock().handle().map(PollHandle::state)
    }

    pub fn is_running(&self) -> bool {
        self.slot
            .lock()
            .handle()
            .map(PollHandle::is_running)
            .unwrap_or(false)
    }

    pub fn overall_progress(&self) -> f64 {
        self.items.overall_progress()
    }

    pub fn formatted_remaining(&self) -> Option<String> {
        self.state().and_then(|state| state.formatted_remaining())
    }

    /// Stop the current poller, if any, and forget its job. A submission in flight is
    /// stopped as soon as its job is known.
    pub fn reset(&self) {
        let previous = std::mem::replace(&mut *self.slot.lock(), Slot::Idle);
        if let Slot::Polling(handle) = previous {
            handle.stop();
        }
    }
}

impl Drop for BuildTracker {
    fn drop(&mut self) {
        self.reset();
    }
}
