//! API error types.

use std::sync::atomic::{AtomicBool, Ordering};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use taskq_queue::{QueueError, RegistryError};

pub type ApiResult<T> = Result<T, ApiError>;

static HIDE_INTERNAL_DETAILS: AtomicBool = AtomicBool::new(false);

/// Replace server-error details with a generic message in responses.
/// Set once at startup from [`ApiConfig::is_production`](crate::ApiConfig::is_production).
pub fn hide_internal_details(hide: bool) {
    HIDE_INTERNAL_DETAILS.store(hide, Ordering::Relaxed);
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("{0}")]
    Queue(#[from] QueueError),
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) | ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Queue(e) => match e {
                QueueError::JobNotFound(_) => StatusCode::NOT_FOUND,
                QueueError::Registry(RegistryError::UnknownTask(_)) => StatusCode::NOT_FOUND,
                QueueError::Registry(RegistryError::InvalidArguments { .. }) => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                QueueError::InvalidTransition { .. } => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "not_found",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Validation(_) => "validation_error",
            ApiError::RateLimited => "rate_limited",
            ApiError::Queue(e) => match e {
                QueueError::JobNotFound(_) => "job_not_found",
                QueueError::Registry(RegistryError::UnknownTask(_)) => "unknown_task",
                QueueError::Registry(RegistryError::InvalidArguments { .. }) => "invalid_arguments",
                QueueError::InvalidTransition { .. } => "invalid_transition",
                _ => "store_error",
            },
        }
    }

    fn is_internal(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Response detail, with store errors masked when `hide_internal` is set.
    fn detail(&self, hide_internal: bool) -> String {
        if hide_internal && self.is_internal() {
            "An internal error occurred".to_string()
        } else {
            self.to_string()
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
    code: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let body = ErrorResponse {
            detail: self.detail(HIDE_INTERNAL_DETAILS.load(Ordering::Relaxed)),
            code: self.code(),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use taskq_models::JobId;

    use super::*;

    #[test]
    fn test_queue_errors_map_to_http_statuses() {
        let cases = [
            (QueueError::JobNotFound(JobId::from("abc")), StatusCode::NOT_FOUND),
            (
                QueueError::Registry(RegistryError::UnknownTask("nope".into())),
                StatusCode::NOT_FOUND,
            ),
            (
                QueueError::Registry(RegistryError::invalid_arguments("add", "missing")),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                QueueError::connection_failed("refused"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, status) in cases {
            assert_eq!(ApiError::from(error).status_code(), status);
        }
    }

    #[test]
    fn test_internal_details_can_be_hidden() {
        let store = ApiError::from(QueueError::connection_failed("redis://secret:6379 refused"));
        assert_eq!(store.detail(true), "An internal error occurred");
        assert!(store.detail(false).contains("secret"));

        // client errors always keep their message
        let missing = ApiError::not_found("Job abc not found");
        assert_eq!(missing.detail(true), "Not found: Job abc not found");
    }

    #[test]
    fn test_registry_errors_keep_their_message() {
        let error = ApiError::from(QueueError::Registry(RegistryError::UnknownTask("nope".into())));
        assert_eq!(error.to_string(), "Unknown task: nope");
        assert_eq!(error.code(), "unknown_task");
    }
}
