//! Shared data models for TaskQ.
//!
//! This crate provides Serde-serializable types for:
//! - Job identifiers and the persisted job record
//! - The job status state machine
//! - Submission and listing payloads used by the HTTP surface

pub mod job;
pub mod request;
pub mod status;

// Re-export common types
pub use job::{JobId, JobRecord, StatusUpdate};
pub use request::{ListTasksQuery, SubmitTaskRequest, SubmitTaskResponse};
pub use status::{JobStatus, ParseStatusError};
