//! Polling watcher for a single model download.

use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::downloads::{DownloadContext, EventEffect};
use crate::registry::{Liveness, Transport};

/// Reads a download's progress once per interval until it completes or fails.
///
/// Unlike the job poller, a single failed read ends the watch and reverts the entry to
/// [`ModelStatus::NotDownloaded`](crate::downloads::ModelStatus), the same as a failed
/// stream without fallback; the model's status is not left as `Downloading`.
#[derive(Clone)]
pub struct DownloadPoller {
    ctx: DownloadContext,
}

impl DownloadPoller {
    pub fn new(ctx: DownloadContext) -> Self {
        Self { ctx }
    }

    pub fn start(&self, model: &str) -> Liveness {
        let key = DownloadContext::registry_key(model);
        let ctx = self.ctx.clone();
        let model = model.to_string();
        self.ctx
            .registry
            .ensure_single(&key, Transport::Poll, move |liveness| {
                tokio::spawn(run_poll(ctx, model, liveness))
            })
    }
}

async fn run_poll(ctx: DownloadContext, model: String, liveness: Liveness) {
    let key = DownloadContext::registry_key(&model);
    let mut ticker = interval(ctx.settings.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if !liveness.is_alive() {
            return;
        }

        let fetched = ctx.transport.download_progress(&model).await;
        if !liveness.is_alive() {
            debug!(model = %model, "Discarding progress for stopped poller");
            return;
        }

        let event = match fetched {
            Ok(event) => event,
            Err(err) => {
                warn!(model = %model, error = %err, "Download progress poll failed");
                ctx.catalog.revert_if_alive(&model, &liveness);
                ctx.registry.release(&key, &liveness);
                ctx.on_failed(&model, &err.to_string());
                return;
            }
        };

        match ctx.catalog.apply_event(&model, &event, &liveness) {
            Some(EventEffect::Progress) => {
                debug!(model = %model, progress = event.progress, "Download progress");
            }
            Some(EventEffect::Completed) => {
                ctx.registry.release(&key, &liveness);
                info!(model = %model, "Download completed");
                ctx.on_completed(&model).await;
                return;
            }
            Some(EventEffect::Failed(reason)) => {
                ctx.registry.release(&key, &liveness);
                let reason = reason.unwrap_or_else(|| "download failed".to_string());
                warn!(model = %model, reason = %reason, "Download reported an error");
                ctx.on_failed(&model, &reason);
                return;
            }
            None => {
                ctx.registry.release(&key, &liveness);
                return;
            }
        }
    }
}
