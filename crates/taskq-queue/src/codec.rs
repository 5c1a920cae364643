//! Flat string-map layout of a job record.
//!
//! The backing store only holds flat string values, so nested fields
//! (`args`, `kwargs`, `result`, `error`) are stored as embedded JSON text.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use taskq_models::{JobId, JobRecord, JobStatus, StatusUpdate};

use crate::error::{QueueError, QueueResult};

pub const FIELD_ID: &str = "id";
pub const FIELD_TASK_NAME: &str = "task_name";
pub const FIELD_ARGS: &str = "args";
pub const FIELD_KWARGS: &str = "kwargs";
pub const FIELD_STATUS: &str = "status";
pub const FIELD_RESULT: &str = "result";
pub const FIELD_ERROR: &str = "error";
pub const FIELD_CREATED_AT: &str = "created_at";
pub const FIELD_UPDATED_AT: &str = "updated_at";

/// Encode a record into hash fields.
pub fn encode_record(record: &JobRecord) -> QueueResult<Vec<(&'static str, String)>> {
    let mut fields = vec![
        (FIELD_ID, record.id.to_string()),
        (FIELD_TASK_NAME, record.task_name.clone()),
        (FIELD_ARGS, serde_json::to_string(&record.args)?),
        (FIELD_KWARGS, serde_json::to_string(&record.kwargs)?),
        (FIELD_STATUS, record.status.as_str().to_string()),
        (FIELD_CREATED_AT, record.created_at.to_rfc3339()),
        (FIELD_UPDATED_AT, record.updated_at.to_rfc3339()),
    ];
    if let Some(result) = &record.result {
        fields.push((FIELD_RESULT, serde_json::to_string(result)?));
    }
    if let Some(error) = &record.error {
        fields.push((FIELD_ERROR, serde_json::to_string(error)?));
    }
    Ok(fields)
}

/// Encode the payload field written alongside a status update, if any.
pub fn encode_update(update: &StatusUpdate) -> QueueResult<Option<(&'static str, String)>> {
    Ok(match update {
        StatusUpdate::Running => None,
        StatusUpdate::Done(value) => Some((FIELD_RESULT, serde_json::to_string(value)?)),
        StatusUpdate::Failed(message) => Some((FIELD_ERROR, serde_json::to_string(message)?)),
    })
}

/// Decode hash fields into a record. An empty map means the key does not
/// exist (or has expired).
pub fn decode_record(mut fields: HashMap<String, String>) -> QueueResult<Option<JobRecord>> {
    if fields.is_empty() {
        return Ok(None);
    }

    let id = take(&mut fields, FIELD_ID)?;
    let task_name = take(&mut fields, FIELD_TASK_NAME)?;
    let status: JobStatus = take(&mut fields, FIELD_STATUS)?
        .parse()
        .map_err(|e| QueueError::serialization(format!("{}", e)))?;

    let args: Vec<Value> = match fields.remove(FIELD_ARGS) {
        Some(raw) if !raw.is_empty() => serde_json::from_str(&raw)?,
        _ => Vec::new(),
    };
    let kwargs: Map<String, Value> = match fields.remove(FIELD_KWARGS) {
        Some(raw) if !raw.is_empty() => serde_json::from_str(&raw)?,
        _ => Map::new(),
    };

    // Outcome fields are only meaningful once the matching terminal status is set.
    let result = match (status, fields.remove(FIELD_RESULT)) {
        (JobStatus::Done, Some(raw)) => Some(serde_json::from_str(&raw)?),
        (JobStatus::Done, None) => Some(Value::Null),
        _ => None,
    };
    let error = match (status, fields.remove(FIELD_ERROR)) {
        (JobStatus::Failed, Some(raw)) => Some(decode_error(raw)),
        (JobStatus::Failed, None) => Some(String::new()),
        _ => None,
    };

    let created_at = parse_time(fields.remove(FIELD_CREATED_AT))?;
    let updated_at = match fields.remove(FIELD_UPDATED_AT) {
        Some(raw) => parse_time(Some(raw))?,
        None => created_at,
    };

    Ok(Some(JobRecord {
        id: JobId::from(id),
        task_name,
        args,
        kwargs,
        status,
        result,
        error,
        created_at,
        updated_at,
    }))
}

/// Decode a record whose ID was just popped from the hand-off channel.
///
/// Any decode failure is reported as `CorruptRecord` carrying the popped ID,
/// since the job can no longer be claimed by anyone else.
pub fn decode_claimed(id: &str, fields: HashMap<String, String>) -> QueueResult<Option<JobRecord>> {
    decode_record(fields).map_err(|e| {
        let reason = match e {
            QueueError::Serialization(msg) => msg,
            other => other.to_string(),
        };
        QueueError::corrupt_record(id, reason)
    })
}

fn take(fields: &mut HashMap<String, String>, name: &str) -> QueueResult<String> {
    fields
        .remove(name)
        .ok_or_else(|| QueueError::serialization(format!("job record missing field '{}'", name)))
}

/// Errors are stored as JSON strings; older writers stored plain text.
fn decode_error(raw: String) -> String {
    match serde_json::from_str::<String>(&raw) {
        Ok(message) => message,
        Err(_) => raw,
    }
}

fn parse_time(raw: Option<String>) -> QueueResult<DateTime<Utc>> {
    match raw {
        Some(raw) => DateTime::parse_from_rfc3339(&raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| QueueError::serialization(format!("invalid timestamp '{}': {}", raw, e))),
        None => Ok(Utc::now()),
    }
}
