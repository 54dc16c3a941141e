//! Watcher lifecycle: at most one live poll timer or push channel per tracked key.
//!
//! The key→subscription map is the only shared mutable structure between watchers.
//! Reconcilers never touch it directly; they go through [`SubscriptionRegistry`]
//! methods, and check their [`Liveness`] before applying any state change so a response
//! that lands after disposal is dropped on the floor.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

/// How a watcher observes its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Poll,
    Stream,
}

impl Transport {
    pub fn as_str(self) -> &'static str {
        match self {
            Transport::Poll => "poll",
            Transport::Stream => "stream",
        }
    }
}

/// Liveness flag shared between a registry entry and the watcher task it owns.
#[derive(Debug, Clone)]
pub struct Liveness(Arc<AtomicBool>);

impl Liveness {
    fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    /// Flag for a watcher running outside any registry.
    pub fn detached() -> Self {
        Self::new()
    }

    pub fn is_alive(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn revoke(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub fn same_as(&self, other: &Liveness) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

struct Subscription {
    transport: Transport,
    liveness: Liveness,
    task: JoinHandle<()>,
}

impl Subscription {
    fn dispose(self) {
        self.liveness.revoke();
        self.task.abort();
    }
}

/// Explicit, cloneable registry of live watchers. Clones share the same map.
#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    subscriptions: Arc<Mutex<HashMap<String, Subscription>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace whatever watches `key` with the watcher built by `factory`.
    ///
    /// A live subscription for `key` is disposed before `factory` runs. The factory gets
    /// the new watcher's liveness flag and returns its task handle; it must not call back
    /// into the registry.
    pub fn ensure_single<F>(&self, key: &str, transport: Transport, factory: F) -> Liveness
    where
        F: FnOnce(Liveness) -> JoinHandle<()>,
    {
        let mut subscriptions = self.subscriptions.lock();
        if let Some(previous) = subscriptions.remove(key) {
            debug!(
                key = %key,
                transport = previous.transport.as_str(),
                "Disposing previous watcher"
            );
            previous.dispose();
        }

        let liveness = Liveness::new();
        let task = factory(liveness.clone());
        subscriptions.insert(
            key.to_string(),
            Subscription {
                transport,
                liveness: liveness.clone(),
                task,
            },
        );
        debug!(key = %key, transport = transport.as_str(), "Watcher registered");
        liveness
    }

    /// Remove the entry for `key` if it still belongs to `liveness`.
    ///
    /// Called by a watcher finishing on its own; a replacement registered meanwhile
    /// is left untouched. The task handle is detached, not aborted.
    pub fn release(&self, key: &str, liveness: &Liveness) -> bool {
        let mut subscriptions = self.subscriptions.lock();
        let owned = subscriptions
            .get(key)
            .map(|sub| sub.liveness.same_as(liveness))
            .unwrap_or(false);
        if owned {
            if let Some(sub) = subscriptions.remove(key) {
                sub.liveness.revoke();
            }
            debug!(key = %key, "Watcher released");
        }
        liveness.revoke();
        owned
    }

    /// Dispose the watcher for `key`: revoke its liveness and abort its task.
    pub fn dispose(&self, key: &str) -> bool {
        let removed = self.subscriptions.lock().remove(key);
        match removed {
            Some(sub) => {
                debug!(key = %key, transport = sub.transport.as_str(), "Watcher disposed");
                sub.dispose();
                true
            }
            None => false,
        }
    }

    /// Dispose every live watcher. Returns how many were disposed.
    pub fn dispose_all(&self) -> usize {
        let drained: Vec<(String, Subscription)> = self.subscriptions.lock().drain().collect();
        let count = drained.len();
        for (key, sub) in drained {
            debug!(key = %key, transport = sub.transport.as_str(), "Watcher disposed");
            sub.dispose();
        }
        count
    }

    pub fn is_live(&self, key: &str) -> bool {
        self.subscriptions
            .lock()
            .get(key)
            .map(|sub| sub.liveness.is_alive())
            .unwrap_or(false)
    }

    pub fn transport_of(&self, key: &str) -> Option<Transport> {
        self.subscriptions.lock().get(key).map(|sub| sub.transport)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.subscriptions.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.subscriptions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
