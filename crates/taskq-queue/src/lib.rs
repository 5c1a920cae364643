//! Job store, task registry and producer/status service.
//!
//! This crate provides:
//! - The `JobStore` abstraction (persistence + hand-off channel + atomic claim)
//! - A Redis backend and an in-process backend behind the same trait
//! - The task registry with parameter-shape binding
//! - `JobService`, the submit/status/list surface shared by the API

pub mod codec;
pub mod config;
pub mod error;
pub mod memory;
pub mod redis_store;
pub mod registry;
pub mod service;
pub mod store;

pub use config::QueueConfig;
pub use error::{QueueError, QueueResult, RegistryError, TaskError, TaskResult};
pub use memory::MemoryJobStore;
pub use redis_store::RedisJobStore;
pub use registry::{
    FnTask, ParamSpec, TaskArgs, TaskDescriptor, TaskHandler, TaskRegistry, TaskRegistryBuilder,
    TaskSignature,
};
pub use service::JobService;
pub use store::JobStore;
