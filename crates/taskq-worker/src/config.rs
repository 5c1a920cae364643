//! Worker configuration.

use std::time::Duration;

use uuid::Uuid;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Name used in logs
    pub name: String,
    /// Idle sleep after an empty non-blocking claim
    pub poll_interval: Duration,
    /// Bounded wait for a blocking claim; zero selects non-blocking claims
    pub claim_block: Duration,
    /// First delay after a failed claim (doubles per consecutive failure)
    pub backoff_base: Duration,
    /// Upper bound on the claim backoff
    pub backoff_max: Duration,
    /// Attempts for a status write before giving up on it
    pub status_write_retries: u32,
    /// How long the binary waits for the in-flight job after a shutdown signal
    pub shutdown_timeout: Duration,
    /// Port for the Prometheus scrape endpoint, if any
    pub metrics_port: Option<u16>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: format!("worker-{}", Uuid::new_v4()),
            poll_interval: Duration::from_millis(1000),
            claim_block: Duration::from_secs(5),
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(30),
            status_write_retries: 3,
            shutdown_timeout: Duration::from_secs(30),
            metrics_port: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            name: std::env::var("WORKER_NAME").unwrap_or(defaults.name),
            poll_interval: Duration::from_millis(
                std::env::var("WORKER_POLL_INTERVAL_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1000),
            ),
            claim_block: Duration::from_secs(
                std::env::var("WORKER_CLAIM_BLOCK_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5),
            ),
            backoff_base: Duration::from_millis(
                std::env::var("WORKER_BACKOFF_BASE_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(500),
            ),
            backoff_max: Duration::from_secs(
                std::env::var("WORKER_BACKOFF_MAX_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            status_write_retries: std::env::var("WORKER_STATUS_WRITE_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
            shutdown_timeout: Duration::from_secs(
                std::env::var("WORKER_SHUTDOWN_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            metrics_port: std::env::var("WORKER_METRICS_PORT")
                .ok()
                .and_then(|s| s.parse().ok()),
        }
    }

    /// Wait passed to `JobStore::claim`. `None` means poll.
    pub fn claim_wait(&self) -> Option<Duration> {
        (!self.claim_block.is_zero()).then_some(self.claim_block)
    }
}
