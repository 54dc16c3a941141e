//! Push-channel watcher for a single model download.

use tracing::{debug, info, warn};

use crate::downloads::{DownloadContext, DownloadPoller, EventEffect};
use crate::error::ApiError;
use crate::registry::{Liveness, Transport};
use crate::transport::ProgressSubscription;

/// Follows a download through the backend's progress event stream.
///
/// A transport-level failure (subscribe error, broken channel, channel ending before a
/// terminal event) reverts the entry, unless fallback to polling is enabled, in which
/// case the key is handed to a [`DownloadPoller`].
#[derive(Clone)]
pub struct StreamReconciler {
    ctx: DownloadContext,
}

impl StreamReconciler {
    pub fn new(ctx: DownloadContext) -> Self {
        Self { ctx }
    }

    /// Open a subscription for `model`, replacing any watcher it already has.
    pub fn start_stream(&self, model: &str) -> Liveness {
        let key = DownloadContext::registry_key(model);
        let ctx = self.ctx.clone();
        let model = model.to_string();
        self.ctx
            .registry
            .ensure_single(&key, Transport::Stream, move |liveness| {
                tokio::spawn(run_stream(ctx, model, liveness))
            })
    }
}

async fn run_stream(ctx: DownloadContext, model: String, liveness: Liveness) {
    let key = DownloadContext::registry_key(&model);
    let mut subscription = match ctx.transport.subscribe_progress(&model).await {
        Ok(subscription) => subscription,
        Err(err) => {
            if liveness.is_alive() {
                transport_failed(&ctx, &model, &liveness, err);
            }
            return;
        }
    };
    debug!(model = %model, "Progress stream opened");

    loop {
        let next = subscription.next_event().await;
        if !liveness.is_alive() {
            debug!(model = %model, "Discarding event for closed stream");
            subscription.close();
            return;
        }

        let event = match next {
            Some(Ok(event)) => event,
            Some(Err(err)) if !err.is_transport() => {
                warn!(model = %model, error = %err, "Skipping malformed progress event");
                continue;
            }
            Some(Err(err)) => {
                close(&mut subscription);
                transport_failed(&ctx, &model, &liveness, err);
                return;
            }
            None => {
                close(&mut subscription);
                transport_failed(
                    &ctx,
                    &model,
                    &liveness,
                    ApiError::StreamError("stream ended before the download finished".to_string()),
                );
                return;
            }
        };

        match ctx.catalog.apply_event(&model, &event, &liveness) {
            Some(EventEffect::Progress) => {
                debug!(model = %model, progress = event.progress, "Download progress");
            }
            Some(EventEffect::Completed) => {
                close(&mut subscription);
                ctx.registry.release(&key, &liveness);
                info!(model = %model, "Download completed");
                ctx.on_completed(&model).await;
                return;
            }
            Some(EventEffect::Failed(reason)) => {
                close(&mut subscription);
                ctx.registry.release(&key, &liveness);
                let reason = reason.unwrap_or_else(|| "download failed".to_string());
                warn!(model = %model, reason = %reason, "Download reported an error");
                ctx.on_failed(&model, &reason);
                return;
            }
            None => {
                close(&mut subscription);
                ctx.registry.release(&key, &liveness);
                return;
            }
        }
    }
}

fn close(subscription: &mut ProgressSubscription) {
    subscription.close();
    debug!(key = %subscription.key(), "Progress stream closed");
}

fn transport_failed(ctx: &DownloadContext, model: &str, liveness: &Liveness, err: ApiError) {
    let key = DownloadContext::registry_key(model);
    if ctx.settings.fallback_to_polling {
        warn!(
            model = %model,
            error = %err,
            "Progress stream failed; falling back to polling"
        );
        // Replaces this watcher's registry entry; nothing may follow in this task.
        DownloadPoller::new(ctx.clone()).start(model);
        return;
    }

    warn!(model = %model, error = %err, "Progress stream failed");
    ctx.catalog.revert_if_alive(model, liveness);
    ctx.registry.release(&key, liveness);
    ctx.on_failed(model, &err.to_string());
}
