//! Request and response payloads for the producer/status surface.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use validator::Validate;

use crate::job::JobId;
use crate::status::{JobStatus, ParseStatusError};

/// Body of `POST /tasks`.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct SubmitTaskRequest {
    /// Registered task name
    #[serde(alias = "func_path")]
    #[validate(length(min = 1, max = 128))]
    pub task_name: String,
    /// Positional arguments
    #[serde(default, deserialize_with = "null_as_empty")]
    pub args: Vec<Value>,
    /// Keyword arguments
    #[serde(default, deserialize_with = "null_as_empty")]
    pub kwargs: Map<String, Value>,
}

/// An explicit `null` means the same as an absent field.
fn null_as_empty<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Response to a successful submission.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SubmitTaskResponse {
    pub id: JobId,
}

/// Query string of `GET /tasks`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListTasksQuery {
    /// Comma separated status filter, e.g. `queued,running`
    #[serde(default)]
    pub status: Option<String>,
}

impl ListTasksQuery {
    /// Parse the status filter. An absent or empty filter yields no statuses,
    /// which means "all".
    pub fn statuses(&self) -> Result<Vec<JobStatus>, ParseStatusError> {
        let Some(raw) = self.status.as_deref() else {
            return Ok(Vec::new());
        };

        let mut statuses = Vec::new();
        for part in raw.split(',').filter(|p| !p.trim().is_empty()) {
            let status: JobStatus = part.parse()?;
            if !statuses.contains(&status) {
                statuses.push(status);
            }
        }
        Ok(statuses)
    }
}
