//! Prometheus metrics for the API server.

use std::sync::OnceLock;
use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use regex_lite::Regex;

/// Install the Prometheus recorder and return the handle used to render it.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "taskq_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "taskq_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "taskq_http_requests_in_flight";

    // Queue metrics
    pub const JOBS_SUBMITTED_TOTAL: &str = "taskq_jobs_submitted_total";
    pub const JOBS_REJECTED_TOTAL: &str = "taskq_jobs_rejected_total";
    pub const QUEUE_LENGTH: &str = "taskq_queue_length";

    // Rate limiting metrics
    pub const RATE_LIMIT_HITS_TOTAL: &str = "taskq_rate_limit_hits_total";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record an accepted submission.
pub fn record_job_submitted(task: &str) {
    let labels = [("task", task.to_string())];
    counter!(names::JOBS_SUBMITTED_TOTAL, &labels).increment(1);
}

/// Record a submission refused before enqueueing.
pub fn record_job_rejected(reason: &str) {
    let labels = [("reason", reason.to_string())];
    counter!(names::JOBS_REJECTED_TOTAL, &labels).increment(1);
}

/// Update queue length gauge.
pub fn set_queue_length(length: u64) {
    gauge!(names::QUEUE_LENGTH).set(length as f64);
}

/// Record rate limit hit.
pub fn record_rate_limit_hit(endpoint: &str) {
    let labels = [("endpoint", sanitize_path(endpoint))];
    counter!(names::RATE_LIMIT_HITS_TOTAL, &labels).increment(1);
}

/// Collapse job IDs in a path so labels stay bounded.
fn sanitize_path(path: &str) -> String {
    static TASK_ID: OnceLock<Regex> = OnceLock::new();
    let re = TASK_ID.get_or_init(|| Regex::new(r"^/tasks/[^/]+").expect("valid regex"));
    re.replace(path, "/tasks/:id").into_owned()
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);
    let response = next.run(request).await;
    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    let status = response.status().as_u16();
    let duration = start.elapsed().as_secs_f64();

    record_http_request(&method, &path, status, duration);

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_path() {
        assert_eq!(
            sanitize_path("/tasks/550e8400-e29b-41d4-a716-446655440000"),
            "/tasks/:id"
        );
        assert_eq!(sanitize_path("/tasks"), "/tasks");
        assert_eq!(sanitize_path("/registry"), "/registry");
    }
}
