//! Worker error types.

use thiserror::Error;

use taskq_models::JobId;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Status write failed for job {id}: {reason}")]
    StatusWriteFailed { id: JobId, reason: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl WorkerError {
    pub fn status_write_failed(id: &JobId, reason: impl Into<String>) -> Self {
        Self::StatusWriteFailed {
            id: id.clone(),
            reason: reason.into(),
        }
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}
