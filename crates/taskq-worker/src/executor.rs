//! Job executor.
//!
//! One executor claims and runs one job at a time. Throughput comes from
//! running more worker processes against the same store.

use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn, Instrument};

use taskq_models::{JobId, JobRecord, StatusUpdate};
use taskq_queue::{JobStore, QueueError, TaskRegistry};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::retry::{retry_async, Backoff, FailureTracker, RetryConfig};

/// Label used for metrics when the claimed task name is not registered.
const UNKNOWN_TASK_LABEL: &str = "unknown";

/// How a claimed job ended, as far as this worker is concerned.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// `done` was written with this result.
    Done(Value),
    /// `failed` was written with this message.
    Failed(String),
    /// The job never reached a terminal status written by this worker.
    Abandoned(String),
}

/// Claims jobs from the store and runs them through the registry.
pub struct JobExecutor {
    config: WorkerConfig,
    store: Arc<dyn JobStore>,
    registry: Arc<TaskRegistry>,
    shutdown: watch::Sender<bool>,
}

impl JobExecutor {
    pub fn new(config: WorkerConfig, store: Arc<dyn JobStore>, registry: Arc<TaskRegistry>) -> Self {
        let (shutdown, _) = watch::channel(false);

        Self {
            config,
            store,
            registry,
            shutdown,
        }
    }

    /// Signal shutdown. The in-flight job, if any, runs to completion.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Run the claim loop until [`shutdown`](Self::shutdown) is called.
    ///
    /// Store failures never end the loop; they are logged and followed by a
    /// growing pause.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            worker = %self.config.name,
            tasks = ?self.registry.names(),
            "Starting job executor"
        );

        let mut shutdown_rx = self.shutdown.subscribe();
        let mut backoff = Backoff::new(
            RetryConfig::new("claim")
                .with_base_delay(self.config.backoff_base)
                .with_max_delay(self.config.backoff_max),
        );
        let mut failures = FailureTracker::new(5);
        let wait = self.config.claim_wait();

        loop {
            if *shutdown_rx.borrow_and_update() {
                break;
            }

            // Never cancelled: an ID popped by an abandoned claim would be lost.
            match self.store.claim(wait).await {
                Ok(Some(record)) => {
                    backoff.reset();
                    failures.record_success();
                    self.execute(record).await;
                }
                Ok(None) => {
                    backoff.reset();
                    failures.record_success();
                    if wait.is_none() {
                        Self::pause(&mut shutdown_rx, self.config.poll_interval).await;
                    }
                }
                Err(QueueError::CorruptRecord { id, reason }) => {
                    backoff.reset();
                    failures.record_success();
                    self.reject(&id, &reason).await;
                }
                Err(e) => {
                    metrics::record_claim_error();
                    let delay = backoff.next_delay();
                    if failures.record_failure() {
                        warn!(
                            worker = %self.config.name,
                            "Claim failed, retrying in {:?}: {}", delay, e
                        );
                    }
                    Self::pause(&mut shutdown_rx, delay).await;
                }
            }
        }

        info!(worker = %self.config.name, "Job executor stopped");
        Ok(())
    }

    /// Sleep for `duration` unless shutdown is signalled first.
    async fn pause(shutdown_rx: &mut watch::Receiver<bool>, duration: Duration) {
        tokio::select! {
            _ = shutdown_rx.changed() => {}
            _ = tokio::time::sleep(duration) => {}
        }
    }

    /// Fail a claimed job whose record could not be decoded.
    ///
    /// The ID is already off the pending list, so the job is reported here
    /// rather than left looking as if it was never claimed.
    pub async fn reject(&self, id: &JobId, reason: &str) -> JobOutcome {
        let message = format!("invalid job record: {}", reason);
        warn!(job_id = %id, worker = %self.config.name, "{}", message);
        metrics::record_claimed(UNKNOWN_TASK_LABEL);

        for update in [StatusUpdate::Running, StatusUpdate::failed(message.clone())] {
            if let Err(e) = self.report(id, update).await {
                let reason = e.to_string();
                warn!(job_id = %id, "Abandoned unreadable job: {}", reason);
                return JobOutcome::Abandoned(reason);
            }
        }

        metrics::record_finished(UNKNOWN_TASK_LABEL, false, Duration::ZERO);
        JobOutcome::Failed(message)
    }

    /// Drive one claimed job to a terminal status.
    pub async fn execute(&self, record: JobRecord) -> JobOutcome {
        let logger = JobLogger::new(&record, &self.config.name);
        let span = logger.span();
        self.execute_inner(record, logger).instrument(span).await
    }

    async fn execute_inner(&self, record: JobRecord, logger: JobLogger) -> JobOutcome {
        let started = Instant::now();
        let label = if self.registry.contains(&record.task_name) {
            record.task_name.as_str()
        } else {
            UNKNOWN_TASK_LABEL
        };

        logger.claimed();
        metrics::record_claimed(label);

        if let Err(e) = self.report(&record.id, StatusUpdate::Running).await {
            let reason = e.to_string();
            logger.abandoned(&reason);
            return JobOutcome::Abandoned(reason);
        }
        logger.running();

        let (update, outcome) = match self.run_handler(&record).await {
            Ok(value) => (StatusUpdate::Done(value.clone()), JobOutcome::Done(value)),
            Err(message) => (StatusUpdate::failed(message.clone()), JobOutcome::Failed(message)),
        };
        let elapsed = started.elapsed();

        if let Err(e) = self.report(&record.id, update).await {
            let reason = e.to_string();
            logger.abandoned(&reason);
            return JobOutcome::Abandoned(reason);
        }

        match &outcome {
            JobOutcome::Done(_) => logger.done(elapsed),
            JobOutcome::Failed(message) => logger.failed(message, elapsed),
            JobOutcome::Abandoned(_) => {}
        }
        metrics::record_finished(label, matches!(outcome, JobOutcome::Done(_)), elapsed);
        outcome
    }

    /// Resolve, bind and run the handler. The error is the job's `error` text.
    async fn run_handler(&self, record: &JobRecord) -> Result<Value, String> {
        let handler = self
            .registry
            .resolve(&record.task_name)
            .map_err(|_| format!("unknown task: {}", record.task_name))?;

        let args = handler
            .signature()
            .bind(&record.args, &record.kwargs)
            .map_err(|reason| format!("invalid arguments: {}", reason))?;

        debug!("Invoking handler");
        let handle = tokio::spawn(async move { handler.call(args).await });

        match handle.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(e.to_string()),
            Err(join) if join.is_panic() => {
                Err(format!("task panicked: {}", panic_message(join.into_panic())))
            }
            Err(_) => Err("task cancelled".to_string()),
        }
    }

    /// Write a status update, retrying while the store is unreachable.
    async fn report(&self, id: &JobId, update: StatusUpdate) -> WorkerResult<()> {
        let target = update.status();
        let config = RetryConfig::new(format!("write_status({})", target))
            .with_max_retries(self.config.status_write_retries)
            .with_base_delay(self.config.backoff_base)
            .with_max_delay(self.config.backoff_max);

        let result = retry_async(&config, QueueError::is_transient, || {
            self.store.write_status(id, &update)
        })
        .await;

        match result {
            Ok(()) => Ok(()),
            // A retried write that had already landed before the connection dropped.
            Err(QueueError::InvalidTransition { from, .. }) if from == target => {
                Ok(())
            }
            Err(e) => Err(WorkerError::status_write_failed(id, e.to_string())),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_variants() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new("boom".to_string())), "boom");
        assert_eq!(panic_message(Box::new(7u8)), "non-string panic payload");
    }
}
