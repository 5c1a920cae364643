//! Axum HTTP API for the task queue.
//!
//! This crate provides:
//! - Task submission, status, listing and deletion endpoints
//! - Registry and queue-depth introspection
//! - Rate limiting, request IDs and security headers
//! - Prometheus metrics

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
