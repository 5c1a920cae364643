//! Application state.

use std::sync::Arc;

use taskq_queue::{JobService, JobStore, RedisJobStore, TaskRegistry};

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub jobs: JobService,
    pub registry: Arc<TaskRegistry>,
}

impl AppState {
    /// Create state backed by Redis and the built-in task registry.
    pub fn new(config: ApiConfig) -> anyhow::Result<Self> {
        let store = RedisJobStore::from_env()?;
        let registry = taskq_tasks::default_registry()?;
        Ok(Self::with_store(config, Arc::new(store), registry))
    }

    /// Create state over an arbitrary store.
    pub fn with_store(config: ApiConfig, store: Arc<dyn JobStore>, registry: TaskRegistry) -> Self {
        let registry = Arc::new(registry);
        let jobs = if config.validate_on_submit {
            JobService::new(store, Arc::clone(&registry))
        } else {
            JobService::deferred(store)
        };

        Self {
            config,
            jobs,
            registry,
        }
    }
}
