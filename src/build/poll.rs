//! Job status polling.
//!
//! One watcher per job. Each tick fetches the job, merges results into the item set,
//! promotes one waiting item, and finalizes everything once the backend says the job is
//! done. The merge, promotion and completion steps run in that order under a single lock
//! of the item set: promoting after completion would resurrect a finished item.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::build::item::{self, ItemSet, ItemStatus, TrackedItem, MSG_NO_RESULT};
use crate::config::TrackingConfig;
use crate::estimator;
use crate::registry::{Liveness, SubscriptionRegistry, Transport};
use crate::transport::{Job, JobId, JobState, JobTransport};

/// Polling cadence and failure tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    /// Consecutive failed fetches tolerated before giving up on the job; 0 never gives up.
    pub max_consecutive_failures: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1000),
            max_consecutive_failures: 10,
        }
    }
}

impl From<&TrackingConfig> for PollSettings {
    fn from(config: &TrackingConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.poll_interval_ms),
            max_consecutive_failures: config.max_consecutive_poll_failures,
        }
    }
}

/// Changes applied by one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickOutcome {
    /// Items moved to a terminal status from a backend result.
    pub finalized: usize,
    /// Item promoted from `waiting` to `processing`.
    pub promoted: Option<String>,
    /// Items forced to `error` because the job completed without their result.
    pub forced_errors: usize,
    pub completed: bool,
}

/// Merge one fetched job snapshot into the items.
pub fn reconcile_tick(items: &mut [TrackedItem], job: &Job) -> TickOutcome {
    let mut outcome = TickOutcome::default();

    for result in &job.results {
        let Some(item) = items.iter_mut().find(|i| i.path == result.source) else {
            debug!(source = %result.source, "Result for untracked item");
            continue;
        };
        if item.status.is_terminal() {
            continue;
        }
        item.finish(ItemStatus::from_result(&result.status), result.message.clone());
        outcome.finalized += 1;
    }

    if let Some(item) = items.iter_mut().find(|i| i.status == ItemStatus::Waiting) {
        item.promote();
        outcome.promoted = Some(item.path.clone());
    }

    if job.status == JobState::Completed {
        outcome.completed = true;
        outcome.forced_errors = item::fail_unfinished(items, MSG_NO_RESULT);
    }

    outcome
}

/// Why a poll watcher stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Completed,
    /// Too many consecutive fetch failures.
    Abandoned { reason: String },
    /// Stopped or disposed before the job completed.
    Stopped,
}

/// Observable state of one poll watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollState {
    pub job_id: JobId,
    pub remaining_secs: Option<u64>,
    pub processed: u64,
    pub total: u64,
    pub ticks: u64,
    pub consecutive_failures: u32,
    pub outcome: Option<PollOutcome>,
}

impl PollState {
    fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            remaining_secs: None,
            processed: 0,
            total: 0,
            ticks: 0,
            consecutive_failures: 0,
            outcome: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn formatted_remaining(&self) -> Option<String> {
        self.remaining_secs.map(estimator::format_remaining)
    }
}

/// Owns the state sender for a watcher task. Marks the watcher stopped if the task goes
/// away (aborted or returned) without recording an outcome.
struct StatePublisher {
    tx: watch::Sender<PollState>,
}

impl StatePublisher {
    fn update(&self, f: impl FnOnce(&mut PollState)) {
        self.tx.send_modify(f);
    }
}

impl Drop for StatePublisher {
    fn drop(&mut self) {
        self.tx.send_modify(|state| {
            if state.outcome.is_none() {
                state.outcome = Some(PollOutcome::Stopped);
            }
        });
    }
}

/// Handle to a running poll watcher.
#[derive(Clone)]
pub struct PollHandle {
    key: String,
    registry: SubscriptionRegistry,
    liveness: Liveness,
    state: watch::Receiver<PollState>,
}

impl PollHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn state(&self) -> PollState {
        self.state.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        self.liveness.is_alive() && !self.state.borrow().is_finished()
    }

    /// Stop polling. An in-flight fetch is not cancelled; its response is discarded.
    pub fn stop(&self) {
        self.registry.release(&self.key, &self.liveness);
    }

    /// Wait until the watcher records an outcome.
    pub async fn wait_finished(&mut self) -> PollState {
        loop {
            if self.state.borrow().is_finished() {
                break;
            }
            if self.state.changed().await.is_err() {
                break;
            }
        }
        self.state.borrow().clone()
    }
}

impl fmt::Debug for PollHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollHandle")
            .field("key", &self.key)
            .field("alive", &self.liveness.is_alive())
            .field("state", &*self.state.borrow())
            .finish()
    }
}

/// Drives an [`ItemSet`] from periodic job status fetches.
#[derive(Clone)]
pub struct PollingReconciler {
    transport: Arc<dyn JobTransport>,
    registry: SubscriptionRegistry,
    items: ItemSet,
    settings: PollSettings,
}

impl PollingReconciler {
    pub fn new(
        transport: Arc<dyn JobTransport>,
        registry: SubscriptionRegistry,
        items: ItemSet,
        settings: PollSettings,
    ) -> Self {
        Self {
            transport,
            registry,
            items,
            settings,
        }
    }

    pub fn registry_key(job_id: &JobId) -> String {
        format!("job:{}", job_id)
    }

    /// Start polling `job_id`, measuring elapsed time from now.
    pub fn start(&self, job_id: JobId) -> PollHandle {
        self.start_at(job_id, Instant::now())
    }

    /// Start polling `job_id`, measuring elapsed time from `started`.
    pub fn start_at(&self, job_id: JobId, started: Instant) -> PollHandle {
        let key = Self::registry_key(&job_id);
        let (tx, rx) = watch::channel(PollState::new(job_id.clone()));
        let publisher = StatePublisher { tx };
        let worker = PollWorker {
            key: key.clone(),
            job_id,
            transport: Arc::clone(&self.transport),
            registry: self.registry.clone(),
            items: self.items.clone(),
            settings: self.settings,
            started,
        };

        info!(
            key = %key,
            interval_ms = self.settings.interval.as_millis() as u64,
            "Starting job poller"
        );
        let liveness = self.registry.ensure_single(&key, Transport::Poll, move |liveness| {
            tokio::spawn(worker.run(liveness, publisher))
        });

        PollHandle {
            key,
            registry: self.registry.clone(),
            liveness,
            state: rx,
        }
    }
}

struct PollWorker {
    key: String,
    job_id: JobId,
    transport: Arc<dyn JobTransport>,
    registry: SubscriptionRegistry,
    items: ItemSet,
    settings: PollSettings,
    started: Instant,
}

impl PollWorker {
    async fn run(self, liveness: Liveness, publisher: StatePublisher) {
        let mut ticker = interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; the first fetch waits one full interval.
        ticker.tick().await;

        let mut failures: u32 = 0;
        loop {
            ticker.tick().await;
            if !liveness.is_alive() {
                break;
            }

            let fetched = self.transport.job_status(&self.job_id).await;
            if !liveness.is_alive() {
                debug!(key = %self.key, "Discarding status for stopped poller");
                break;
            }

            let job = match fetched {
                Ok(job) => job,
                Err(err) => {
                    failures += 1;
                    warn!(
                        key = %self.key,
                        failures,
                        error = %err,
                        "Job status poll failed"
                    );
                    publisher.update(|state| {
                        state.ticks += 1;
                        state.consecutive_failures = failures;
                    });

                    let limit = self.settings.max_consecutive_failures;
                    if limit > 0 && failures >= limit {
                        let reason = format!("Lost contact with backend: {}", err);
                        let failed = self.items.with_items(|items| {
                            liveness
                                .is_alive()
                                .then(|| item::fail_unfinished(items, &reason))
                        });
                        warn!(
                            key = %self.key,
                            failures,
                            items_failed = failed.unwrap_or(0),
                            "Giving up on job after consecutive poll failures"
                        );
                        publisher.update(|state| {
                            state.outcome = Some(PollOutcome::Abandoned { reason });
                        });
                        self.registry.release(&self.key, &liveness);
                        break;
                    }
                    continue;
                }
            };

            failures = 0;
            let remaining = estimator::remaining_for(&job, self.started.elapsed());
            let outcome = self.items.with_items(|items| {
                liveness.is_alive().then(|| reconcile_tick(items, &job))
            });
            let Some(outcome) = outcome else {
                debug!(key = %self.key, "Discarding status for stopped poller");
                break;
            };

            debug!(
                key = %self.key,
                processed = job.processed,
                total = job.total,
                finalized = outcome.finalized,
                promoted = ?outcome.promoted,
                remaining_secs = ?remaining,
                "Poll tick applied"
            );
            publisher.update(|state| {
                state.ticks += 1;
                state.consecutive_failures = 0;
                state.processed = job.processed;
                state.total = job.total;
                state.remaining_secs = remaining;
                if outcome.completed {
                    state.outcome = Some(PollOutcome::Completed);
                }
            });

            if outcome.completed {
                if outcome.forced_errors > 0 {
                    warn!(
                        key = %self.key,
                        items = outcome.forced_errors,
                        "Job completed without results for some items"
                    );
                }
                info!(key = %self.key, processed = job.processed, "Job completed");
                self.registry.release(&self.key, &liveness);
                break;
            }
        }
    }
}
