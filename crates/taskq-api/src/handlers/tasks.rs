//! Task submission and status handlers.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, Uri};
use axum::Json;
use serde::Serialize;
use tracing::warn;
use validator::Validate;

use taskq_models::{JobId, JobRecord, ListTasksQuery, SubmitTaskRequest, SubmitTaskResponse};
use taskq_queue::{QueueError, RegistryError, TaskDescriptor};

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

/// Metrics label for submissions whose task is not registered (deferred mode).
const UNREGISTERED_TASK_LABEL: &str = "unregistered";

/// POST /tasks
///
/// Returns:
/// - 202: `{ "id": ... }`, job queued
/// - 400: malformed body
/// - 404: unknown task (eager validation)
/// - 422: arguments do not fit the task's parameters (eager validation)
pub async fn submit_task(
    State(state): State<AppState>,
    payload: Result<Json<SubmitTaskRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SubmitTaskResponse>)> {
    let Json(request) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;
    request
        .validate()
        .map_err(|e| ApiError::validation(e.to_string()))?;

    let task_name = request.task_name;
    match state.jobs.submit(&task_name, request.args, request.kwargs).await {
        Ok(id) => {
            let label = if state.registry.contains(&task_name) {
                task_name.as_str()
            } else {
                UNREGISTERED_TASK_LABEL
            };
            metrics::record_job_submitted(label);
            Ok((StatusCode::ACCEPTED, Json(SubmitTaskResponse { id })))
        }
        Err(e) => {
            match &e {
                QueueError::Registry(RegistryError::UnknownTask(_)) => {
                    metrics::record_job_rejected("unknown_task")
                }
                QueueError::Registry(RegistryError::InvalidArguments { .. }) => {
                    metrics::record_job_rejected("invalid_arguments")
                }
                _ => warn!(task_name = %task_name, "Failed to enqueue task: {}", e),
            }
            Err(e.into())
        }
    }
}

/// GET /tasks/:id
///
/// Returns the job record, or 404 once it is gone (never existed, deleted,
/// or expired after its retention window).
pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobRecord>> {
    if !is_valid_job_id(&id) {
        return Err(ApiError::bad_request("Invalid job ID format"));
    }

    let record = state.jobs.get_status(&JobId::from(id)).await?;
    Ok(Json(record))
}

/// GET /tasks?status=a,b
///
/// Records matching any of the listed statuses (all records without a
/// filter), oldest first.
pub async fn list_tasks(
    State(state): State<AppState>,
    query: Result<Query<ListTasksQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<JobRecord>>> {
    let Query(query) = query.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let statuses = query
        .statuses()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let mut records = state.jobs.list(&statuses).await?;
    records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    Ok(Json(records))
}

/// DELETE /tasks/:id
///
/// Removes the record and any pending hand-off entry. A worker already
/// running the job keeps running it; its final status write is dropped.
pub async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    if !is_valid_job_id(&id) {
        return Err(ApiError::bad_request("Invalid job ID format"));
    }

    let id = JobId::from(id);
    state.jobs.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /tasks
///
/// Drops every record and empties the pending list.
pub async fn clear_tasks(State(state): State<AppState>) -> ApiResult<StatusCode> {
    state.jobs.clear().await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /registry
pub async fn list_registry(State(state): State<AppState>) -> Json<Vec<TaskDescriptor>> {
    Json(state.registry.describe())
}

/// Queue depth response.
#[derive(Debug, Serialize)]
pub struct QueueInfoResponse {
    pub pending: u64,
    pub validates_on_submit: bool,
}

/// GET /queue
pub async fn queue_info(State(state): State<AppState>) -> ApiResult<Json<QueueInfoResponse>> {
    let pending = state.jobs.pending_len().await?;
    metrics::set_queue_length(pending);

    Ok(Json(QueueInfoResponse {
        pending,
        validates_on_submit: state.jobs.validates_eagerly(),
    }))
}

/// Fallback for unmatched routes.
pub async fn not_found(uri: Uri) -> ApiError {
    ApiError::not_found(format!("No route for {}", uri.path()))
}

/// Validate job ID format: 1-64 alphanumerics, hyphens or underscores.
fn is_valid_job_id(id: &str) -> bool {
    if id.is_empty() || id.len() > 64 {
        return false;
    }
    id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_job_ids() {
        assert!(is_valid_job_id("550e8400-e29b-41d4-a716-446655440000"));
        assert!(is_valid_job_id("job_1"));
    }

    #[test]
    fn test_invalid_job_ids() {
        assert!(!is_valid_job_id(""));
        assert!(!is_valid_job_id("../etc/passwd"));
        assert!(!is_valid_job_id("a b"));
        assert!(!is_valid_job_id(&"a".repeat(65)));
    }
}
