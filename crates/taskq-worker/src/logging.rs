//! Structured job logging.
//!
//! Every lifecycle line carries the same `job_id`, `task_name` and `worker`
//! fields so a job can be followed across log aggregation.

use std::time::Duration;

use tracing::{error, info, warn, Span};

use taskq_models::{JobId, JobRecord};

/// Job logger for one claimed job.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: JobId,
    task_name: String,
    worker: String,
}

impl JobLogger {
    pub fn new(record: &JobRecord, worker: &str) -> Self {
        Self {
            job_id: record.id.clone(),
            task_name: record.task_name.clone(),
            worker: worker.to_string(),
        }
    }

    pub fn claimed(&self) {
        info!(
            job_id = %self.job_id,
            task_name = %self.task_name,
            worker = %self.worker,
            "Job claimed"
        );
    }

    pub fn running(&self) {
        info!(
            job_id = %self.job_id,
            task_name = %self.task_name,
            worker = %self.worker,
            status = "running",
            "Job running"
        );
    }

    pub fn done(&self, elapsed: Duration) {
        info!(
            job_id = %self.job_id,
            task_name = %self.task_name,
            worker = %self.worker,
            status = "done",
            elapsed_ms = elapsed.as_millis() as u64,
            "Job done"
        );
    }

    pub fn failed(&self, reason: &str, elapsed: Duration) {
        warn!(
            job_id = %self.job_id,
            task_name = %self.task_name,
            worker = %self.worker,
            status = "failed",
            elapsed_ms = elapsed.as_millis() as u64,
            "Job failed: {}", reason
        );
    }

    /// The job could not be started or reported; its record is left as is.
    pub fn abandoned(&self, reason: &str) {
        error!(
            job_id = %self.job_id,
            task_name = %self.task_name,
            worker = %self.worker,
            "Job abandoned: {}", reason
        );
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn task_name(&self) -> &str {
        &self.task_name
    }

    /// Span covering the job's execution.
    pub fn span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            task_name = %self.task_name
        )
    }
}
