//! Queue store configuration.

use std::time::Duration;

const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";
const DEFAULT_KEY_PREFIX: &str = "taskq";

/// Queue store configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Prefix for every key the store writes
    pub key_prefix: String,
    /// List holding pending job IDs
    pub pending_list: String,
    /// How long finished jobs are kept before eviction
    pub retention: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: DEFAULT_REDIS_URL.to_string(),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            pending_list: format!("{}:pending", DEFAULT_KEY_PREFIX),
            retention: Duration::from_secs(600), // 10 minutes
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let key_prefix =
            std::env::var("QUEUE_KEY_PREFIX").unwrap_or_else(|_| DEFAULT_KEY_PREFIX.to_string());

        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or_else(|_| DEFAULT_REDIS_URL.to_string()),
            pending_list: std::env::var("QUEUE_PENDING_LIST")
                .unwrap_or_else(|_| format!("{}:pending", key_prefix)),
            retention: Duration::from_secs(
                std::env::var("QUEUE_RETENTION_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(600),
            ),
            key_prefix,
        }
    }

    /// Override the retention window.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Key of the hash holding one job record.
    pub fn job_key(&self, id: &str) -> String {
        format!("{}:job:{}", self.key_prefix, id)
    }

    /// `SCAN` pattern matching every job record.
    pub fn job_pattern(&self) -> String {
        format!("{}:job:*", self.key_prefix)
    }

    /// Retention in whole seconds, never less than one so `EXPIRE` does not
    /// delete the record immediately.
    pub fn retention_secs(&self) -> u64 {
        self.retention.as_secs().max(1)
    }
}
