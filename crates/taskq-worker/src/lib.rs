//! Task queue worker.
//!
//! This crate provides:
//! - The claim/execute/report loop (`JobExecutor`)
//! - Claim backoff and status-write retries
//! - Structured per-job logging and worker metrics
//! - Graceful shutdown that lets the in-flight job finish

pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod retry;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use executor::{JobExecutor, JobOutcome};
pub use logging::JobLogger;
