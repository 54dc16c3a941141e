//! Batch job submission.

use std::sync::Arc;

use tracing::{error, info};

use crate::build::item::ItemSet;
use crate::error::ApiError;
use crate::transport::{JobId, JobTransport};

/// Starts a backend batch job for every item in a set.
#[derive(Clone)]
pub struct JobSubmitter {
    transport: Arc<dyn JobTransport>,
}

impl JobSubmitter {
    pub fn new(transport: Arc<dyn JobTransport>) -> Self {
        Self { transport }
    }

    /// Reset every item to `waiting` and submit their paths as one job.
    ///
    /// An empty set is submitted as-is. When the request fails every item is moved to
    /// `error` with the cause in its message before the error is returned.
    pub async fn submit(&self, items: &ItemSet) -> Result<JobId, ApiError> {
        items.reset_all();
        let paths = items.paths();

        match self.transport.start_job(&paths).await {
            Ok(ticket) => {
                info!(
                    job_id = %ticket.job_id,
                    paths = paths.len(),
                    "Batch job started"
                );
                Ok(ticket.job_id)
            }
            Err(err) => {
                error!(paths = paths.len(), error = %err, "Failed to start batch job");
                items.fail_all(&format!("Request failed: {}", err));
                Err(err)
            }
        }
    }
}
