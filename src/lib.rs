//! Jobwatch: client-side tracking of long-running backend jobs
//!
//! Submits batch indexing jobs and model downloads to a backend service and keeps local
//! per-item state reconciled with the backend's status reports, delivered by polling or
//! by a server-sent event stream.

pub mod build;
pub mod cli;
pub mod config;
pub mod downloads;
pub mod error;
pub mod estimator;
pub mod logging;
pub mod registry;
pub mod transport;

pub use build::{BuildTracker, ItemSet, ItemStatus, PollingReconciler, TrackedItem};
pub use downloads::{ModelCatalog, ModelDownloads, ModelStatus, StreamReconciler};
pub use error::ApiError;
pub use registry::SubscriptionRegistry;
