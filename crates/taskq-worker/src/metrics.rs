//! Worker metrics.

use std::time::Duration;

use metrics::{counter, histogram};

pub mod names {
    pub const JOBS_CLAIMED: &str = "taskq_jobs_claimed_total";
    pub const JOBS_COMPLETED: &str = "taskq_jobs_completed_total";
    pub const JOBS_FAILED: &str = "taskq_jobs_failed_total";
    pub const JOB_DURATION: &str = "taskq_job_duration_seconds";
    pub const CLAIM_ERRORS: &str = "taskq_claim_errors_total";
}

pub fn record_claimed(task_name: &str) {
    counter!(names::JOBS_CLAIMED, "task" => task_name.to_string()).increment(1);
}

pub fn record_finished(task_name: &str, succeeded: bool, elapsed: Duration) {
    let task = task_name.to_string();
    if succeeded {
        counter!(names::JOBS_COMPLETED, "task" => task.clone()).increment(1);
    } else {
        counter!(names::JOBS_FAILED, "task" => task.clone()).increment(1);
    }
    histogram!(names::JOB_DURATION, "task" => task).record(elapsed.as_secs_f64());
}

pub fn record_claim_error() {
    counter!(names::CLAIM_ERRORS).increment(1);
}
