//! In-process job store.
//!
//! Implements the same contract as the Redis store for tests and
//! single-process setups. State does not survive a restart.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::debug;

use taskq_models::{JobId, JobRecord, JobStatus, StatusUpdate};

use crate::error::{QueueError, QueueResult};
use crate::store::{matches_filter, JobStore};

struct Entry {
    record: JobRecord,
    expires_at: Option<Instant>,
}

#[derive(Default)]
struct Inner {
    records: HashMap<JobId, Entry>,
    pending: VecDeque<JobId>,
}

impl Inner {
    /// Drop records whose retention window has elapsed.
    fn evict_expired(&mut self, now: Instant) {
        self.records
            .retain(|_, entry| entry.expires_at.map_or(true, |at| at > now));
    }
}

/// Job store kept in process memory.
pub struct MemoryJobStore {
    inner: Mutex<Inner>,
    notify: Notify,
    retention: Duration,
}

impl MemoryJobStore {
    pub fn new(retention: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
            retention,
        }
    }

    async fn try_pop(&self) -> Option<JobRecord> {
        let mut inner = self.inner.lock().await;
        inner.evict_expired(Instant::now());

        while let Some(id) = inner.pending.pop_front() {
            if let Some(entry) = inner.records.get(&id) {
                debug!(job_id = %id, "Claimed job");
                return Some(entry.record.clone());
            }
        }
        None
    }
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(600))
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn enqueue(&self, record: &JobRecord) -> QueueResult<JobId> {
        {
            let mut inner = self.inner.lock().await;
            inner.records.insert(
                record.id.clone(),
                Entry {
                    record: record.clone(),
                    expires_at: None,
                },
            );
            inner.pending.push_back(record.id.clone());
        }
        self.notify.notify_waiters();
        Ok(record.id.clone())
    }

    async fn claim(&self, wait: Option<Duration>) -> QueueResult<Option<JobRecord>> {
        let Some(wait) = wait.filter(|w| !w.is_zero()) else {
            return Ok(self.try_pop().await);
        };

        let deadline = Instant::now() + wait;
        loop {
            // Register interest before checking so an enqueue between the
            // check and the wait is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(record) = self.try_pop().await {
                return Ok(Some(record));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn write_status(&self, id: &JobId, update: &StatusUpdate) -> QueueResult<()> {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        inner.evict_expired(now);

        let entry = inner
            .records
            .get_mut(id)
            .ok_or_else(|| QueueError::JobNotFound(id.clone()))?;

        let from = entry.record.status;
        if !entry.record.apply(update) {
            return Err(QueueError::InvalidTransition {
                id: id.clone(),
                from,
                to: update.status(),
            });
        }
        if entry.record.is_terminal() {
            entry.expires_at = Some(now + self.retention);
        }
        Ok(())
    }

    async fn read(&self, id: &JobId) -> QueueResult<Option<JobRecord>> {
        let mut inner = self.inner.lock().await;
        inner.evict_expired(Instant::now());
        Ok(inner.records.get(id).map(|entry| entry.record.clone()))
    }

    async fn list(&self, statuses: &[JobStatus]) -> QueueResult<Vec<JobRecord>> {
        let mut inner = self.inner.lock().await;
        inner.evict_expired(Instant::now());
        Ok(inner
            .records
            .values()
            .filter(|entry| matches_filter(&entry.record, statuses))
            .map(|entry| entry.record.clone())
            .collect())
    }

    async fn delete(&self, id: &JobId) -> QueueResult<bool> {
        let mut inner = self.inner.lock().await;
        inner.pending.retain(|pending| pending != id);
        Ok(inner.records.remove(id).is_some())
    }

    async fn clear(&self) -> QueueResult<u64> {
        let mut inner = self.inner.lock().await;
        inner.evict_expired(Instant::now());
        inner.pending.clear();
        let removed = inner.records.len() as u64;
        inner.records.clear();
        Ok(removed)
    }

    async fn pending_len(&self) -> QueueResult<u64> {
        let inner = self.inner.lock().await;
        Ok(inner.pending.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::{json, Map};

    use super::*;

    fn job(task: &str) -> JobRecord {
        JobRecord::new(task, vec![json!(1)], Map::new())
    }

    #[tokio::test]
    async fn claim_is_fifo_and_destructive() {
        let store = MemoryJobStore::default();
        let first = store.enqueue(&job("a")).await.unwrap();
        let second = store.enqueue(&job("b")).await.unwrap();
        assert_eq!(store.pending_len().await.unwrap(), 2);

        assert_eq!(store.claim(None).await.unwrap().unwrap().id, first);
        assert_eq!(store.claim(None).await.unwrap().unwrap().id, second);
        assert!(store.claim(None).await.unwrap().is_none());
        assert_eq!(store.pending_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn concurrent_claims_hand_out_a_single_job_once() {
        let store = Arc::new(MemoryJobStore::default());
        let id = store.enqueue(&job("only")).await.unwrap();

        let a = tokio::spawn({
            let store = Arc::clone(&store);
            async move { store.claim(None).await.unwrap() }
        });
        let b = tokio::spawn({
            let store = Arc::clone(&store);
            async move { store.claim(None).await.unwrap() }
        });
        let results = [a.await.unwrap(), b.await.unwrap()];

        let claimed: Vec<_> = results.iter().flatten().collect();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, id);
    }

    #[tokio::test(start_paused = true)]
    async fn blocking_claim_wakes_on_enqueue() {
        let store = Arc::new(MemoryJobStore::default());
        let waiter = tokio::spawn({
            let store = Arc::clone(&store);
            async move { store.claim(Some(Duration::from_secs(5))).await.unwrap() }
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        let id = store.enqueue(&job("late")).await.unwrap();

        assert_eq!(waiter.await.unwrap().unwrap().id, id);
    }

    #[tokio::test(start_paused = true)]
    async fn blocking_claim_times_out_empty() {
        let store = MemoryJobStore::default();
        let started = Instant::now();
        assert!(store.claim(Some(Duration::from_secs(2))).await.unwrap().is_none());
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn write_status_never_creates_records() {
        let store = MemoryJobStore::default();
        let missing = JobId::new();
        let err = store.write_status(&missing, &StatusUpdate::Running).await.unwrap_err();
        assert!(matches!(err, QueueError::JobNotFound(id) if id == missing));
        assert!(store.read(&missing).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn terminal_status_is_never_reverted() {
        let store = MemoryJobStore::default();
        let id = store.enqueue(&job("a")).await.unwrap();
        store.claim(None).await.unwrap();
        store.write_status(&id, &StatusUpdate::Running).await.unwrap();
        store.write_status(&id, &StatusUpdate::Done(json!(5))).await.unwrap();

        let err = store
            .write_status(&id, &StatusUpdate::failed("late"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            QueueError::InvalidTransition { from: JobStatus::Done, to: JobStatus::Failed, .. }
        ));

        let record = store.read(&id).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Done);
        assert_eq!(record.result, Some(json!(5)));
        assert!(record.error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn finished_jobs_expire_after_retention() {
        let store = MemoryJobStore::new(Duration::from_secs(60));
        let id = store.enqueue(&job("a")).await.unwrap();
        store.claim(None).await.unwrap();
        store.write_status(&id, &StatusUpdate::Running).await.unwrap();

        // running jobs are not subject to retention
        tokio::time::advance(Duration::from_secs(120)).await;
        assert!(store.read(&id).await.unwrap().is_some());

        store.write_status(&id, &StatusUpdate::failed("boom")).await.unwrap();
        let first = store.read(&id).await.unwrap().unwrap();

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(store.read(&id).await.unwrap().unwrap(), first);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(store.read(&id).await.unwrap().is_none());
        assert!(store.list(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_filters_by_status() {
        let store = MemoryJobStore::default();
        let a = store.enqueue(&job("a")).await.unwrap();
        store.enqueue(&job("b")).await.unwrap();
        store.claim(None).await.unwrap();
        store.write_status(&a, &StatusUpdate::Running).await.unwrap();

        assert_eq!(store.list(&[]).await.unwrap().len(), 2);
        let running = store.list(&[JobStatus::Running]).await.unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, a);
        assert!(store.list(&[JobStatus::Done]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn clear_drops_records_and_pending_ids() {
        let store = MemoryJobStore::default();
        let a = store.enqueue(&job("a")).await.unwrap();
        store.enqueue(&job("b")).await.unwrap();
        store.claim(None).await.unwrap();
        store.write_status(&a, &StatusUpdate::Running).await.unwrap();

        assert_eq!(store.clear().await.unwrap(), 2);
        assert_eq!(store.pending_len().await.unwrap(), 0);
        assert!(store.list(&[]).await.unwrap().is_empty());
        assert!(store.claim(None).await.unwrap().is_none());
        assert!(matches!(
            store.write_status(&a, &StatusUpdate::Done(json!(1))).await,
            Err(QueueError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_removes_record_and_pending_id() {
        let store = MemoryJobStore::default();
        let id = store.enqueue(&job("a")).await.unwrap();

        assert!(store.delete(&id).await.unwrap());
        assert!(!store.delete(&id).await.unwrap());
        assert_eq!(store.pending_len().await.unwrap(), 0);
        assert!(store.claim(None).await.unwrap().is_none());
    }
}
