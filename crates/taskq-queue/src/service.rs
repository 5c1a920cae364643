//! Producer and status surface over a job store.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{info, warn};

use taskq_models::{JobId, JobRecord, JobStatus};

use crate::error::{QueueError, QueueResult};
use crate::registry::TaskRegistry;
use crate::store::JobStore;

/// Submits jobs and answers status queries.
///
/// With a registry attached, submissions are validated before anything is
/// written (unknown task or argument mismatch never creates a record).
/// Without one, validation is left to the worker.
#[derive(Clone)]
pub struct JobService {
    store: Arc<dyn JobStore>,
    registry: Option<Arc<TaskRegistry>>,
}

impl JobService {
    /// Service that validates submissions against `registry`.
    pub fn new(store: Arc<dyn JobStore>, registry: Arc<TaskRegistry>) -> Self {
        Self {
            store,
            registry: Some(registry),
        }
    }

    /// Service that accepts any submission and defers validation.
    pub fn deferred(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            registry: None,
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn registry(&self) -> Option<&Arc<TaskRegistry>> {
        self.registry.as_ref()
    }

    pub fn validates_eagerly(&self) -> bool {
        self.registry.is_some()
    }

    /// Validate (when eager), persist and publish a new job.
    pub async fn submit(
        &self,
        task_name: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> QueueResult<JobId> {
        if let Some(registry) = &self.registry {
            if let Err(e) = registry.validate(task_name, &args, &kwargs) {
                warn!(task_name = %task_name, "Rejected submission: {}", e);
                return Err(e.into());
            }
        }

        let record = JobRecord::new(task_name, args, kwargs);
        let id = self.store.enqueue(&record).await?;
        info!(job_id = %id, task_name = %task_name, "Submitted job");
        Ok(id)
    }

    /// Current record of a job.
    pub async fn get_status(&self, id: &JobId) -> QueueResult<JobRecord> {
        self.store
            .read(id)
            .await?
            .ok_or_else(|| QueueError::JobNotFound(id.clone()))
    }

    /// Records in any of `statuses` (all records when empty).
    pub async fn list(&self, statuses: &[JobStatus]) -> QueueResult<Vec<JobRecord>> {
        self.store.list(statuses).await
    }

    /// Delete a job. Fails with `JobNotFound` when it does not exist.
    pub async fn delete(&self, id: &JobId) -> QueueResult<()> {
        if self.store.delete(id).await? {
            Ok(())
        } else {
            Err(QueueError::JobNotFound(id.clone()))
        }
    }

    /// Drop every job, queued or finished. Returns how many records went.
    pub async fn clear(&self) -> QueueResult<u64> {
        let removed = self.store.clear().await?;
        warn!(removed, "Cleared all jobs");
        Ok(removed)
    }

    pub async fn pending_len(&self) -> QueueResult<u64> {
        self.store.pending_len().await
    }
}
