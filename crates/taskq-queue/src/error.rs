//! Queue, registry and task error types.

use thiserror::Error;

use taskq_models::{JobId, JobStatus};

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Enqueue failed: {0}")]
    EnqueueFailed(String),

    #[error("Dequeue failed: {0}")]
    DequeueFailed(String),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Invalid transition for job {id}: {from} -> {to}")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A claimed record could not be decoded. The ID has already left the
    /// hand-off channel, so the caller owns the job.
    #[error("invalid job record: {reason}")]
    CorruptRecord { id: JobId, reason: String },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueueError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    pub fn enqueue_failed(msg: impl Into<String>) -> Self {
        Self::EnqueueFailed(msg.into())
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    pub fn corrupt_record(id: impl Into<JobId>, reason: impl Into<String>) -> Self {
        Self::CorruptRecord {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error came from the backing store being unreachable or
    /// misbehaving, as opposed to a problem with the request itself.
    pub fn is_transient(&self) -> bool {
        match self {
            QueueError::ConnectionFailed(_)
            | QueueError::EnqueueFailed(_)
            | QueueError::DequeueFailed(_) => true,
            QueueError::Redis(e) => {
                e.is_io_error() || e.is_connection_dropped() || e.is_timeout() || e.is_connection_refusal()
            }
            _ => false,
        }
    }
}

/// Errors raised while building or querying the task registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Task already registered: {0}")]
    DuplicateTask(String),

    #[error("Unknown task: {0}")]
    UnknownTask(String),

    #[error("Invalid arguments for task '{task}': {reason}")]
    InvalidArguments { task: String, reason: String },
}

impl RegistryError {
    pub fn invalid_arguments(task: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            task: task.into(),
            reason: reason.into(),
        }
    }
}

pub type TaskResult<T> = Result<T, TaskError>;

/// Error returned by a task handler. Its display string becomes the job's
/// `error` field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("{0}")]
    Failed(String),

    #[error("invalid argument '{name}': {reason}")]
    InvalidArgument { name: String, reason: String },
}

impl TaskError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    pub fn invalid_argument(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name: name.into(),
            reason: reason.into(),
        }
    }
}
