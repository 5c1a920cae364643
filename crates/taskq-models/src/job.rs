//! Job record persisted by the queue store.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::status::JobStatus;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The persisted unit of work and its lifecycle state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Unique job ID, immutable
    pub id: JobId,
    /// Registry key of the handler to run
    pub task_name: String,
    /// Positional arguments
    #[serde(default)]
    pub args: Vec<Value>,
    /// Keyword arguments
    #[serde(default)]
    pub kwargs: Map<String, Value>,
    /// Current status
    pub status: JobStatus,
    /// Handler result, only when status is `done`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure description, only when status is `failed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the job was submitted
    pub created_at: DateTime<Utc>,
    /// When the status last changed
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Create a freshly queued record with a new ID.
    pub fn new(task_name: impl Into<String>, args: Vec<Value>, kwargs: Map<String, Value>) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            task_name: task_name.into(),
            args,
            kwargs,
            status: JobStatus::Queued,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply a status update in place.
    ///
    /// Returns `false` and leaves the record untouched when the update is
    /// not a legal transition from the current status.
    pub fn apply(&mut self, update: &StatusUpdate) -> bool {
        let next = update.status();
        if !self.status.can_transition_to(next) {
            return false;
        }

        self.status = next;
        self.updated_at = Utc::now();
        match update {
            StatusUpdate::Running => {}
            StatusUpdate::Done(value) => self.result = Some(value.clone()),
            StatusUpdate::Failed(message) => self.error = Some(message.clone()),
        }
        true
    }
}

/// A status write issued by a worker.
///
/// Terminal variants carry their payload so a record can never end up
/// with both (or neither) of `result` and `error`.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusUpdate {
    Running,
    Done(Value),
    Failed(String),
}

impl StatusUpdate {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Status the record moves to.
    pub fn status(&self) -> JobStatus {
        match self {
            StatusUpdate::Running => JobStatus::Running,
            StatusUpdate::Done(_) => JobStatus::Done,
            StatusUpdate::Failed(_) => JobStatus::Failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> JobRecord {
        JobRecord::new("add", vec![json!(2), json!(3)], Map::new())
    }

    #[test]
    fn new_record_is_queued_without_outcome() {
        let record = record();
        assert_eq!(record.status, JobStatus::Queued);
        assert!(record.result.is_none());
        assert!(record.error.is_none());
        assert_eq!(record.created_at, record.updated_at);
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(record().id, record().id);
    }

    #[test]
    fn apply_follows_state_machine() {
        let mut record = record();
        assert!(!record.apply(&StatusUpdate::Done(json!(5))));
        assert_eq!(record.status, JobStatus::Queued);

        assert!(record.apply(&StatusUpdate::Running));
        assert!(record.apply(&StatusUpdate::Done(json!(5))));
        assert_eq!(record.result, Some(json!(5)));
        assert!(record.error.is_none());

        // terminal status is never reverted
        assert!(!record.apply(&StatusUpdate::failed("late")));
        assert!(!record.apply(&StatusUpdate::Running));
        assert_eq!(record.status, JobStatus::Done);
        assert!(record.error.is_none());
    }

    #[test]
    fn json_omits_absent_outcome() {
        let value = serde_json::to_value(record()).unwrap();
        assert_eq!(value["status"], "queued");
        assert!(value.get("result").is_none());
        assert!(value.get("error").is_none());
    }
}
