//! Queue store abstraction shared by producers, workers and status readers.

use std::time::Duration;

use async_trait::async_trait;

use taskq_models::{JobId, JobRecord, JobStatus, StatusUpdate};

use crate::error::QueueResult;

/// Shared persistence and hand-off channel for jobs.
///
/// The store is the only state producers, workers and status readers share.
/// `claim` is the single synchronization point: two concurrent callers never
/// receive the same job ID.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist the record, then make its ID visible for claiming.
    async fn enqueue(&self, record: &JobRecord) -> QueueResult<JobId>;

    /// Remove one pending ID and return its record.
    ///
    /// `wait = None` (or zero) returns immediately when nothing is pending;
    /// otherwise the call blocks for at most `wait`.
    async fn claim(&self, wait: Option<Duration>) -> QueueResult<Option<JobRecord>>;

    /// Merge a status change into an existing record.
    ///
    /// Never creates a record. Terminal statuses start the retention timer.
    async fn write_status(&self, id: &JobId, update: &StatusUpdate) -> QueueResult<()>;

    /// Read a record by ID.
    async fn read(&self, id: &JobId) -> QueueResult<Option<JobRecord>>;

    /// List records, optionally restricted to the given statuses (empty = all).
    /// No ordering is guaranteed.
    async fn list(&self, statuses: &[JobStatus]) -> QueueResult<Vec<JobRecord>>;

    /// Delete a record and drop its ID from the hand-off channel.
    /// Returns whether a record existed.
    async fn delete(&self, id: &JobId) -> QueueResult<bool>;

    /// Delete every record and empty the hand-off channel.
    /// Returns how many records were removed.
    async fn clear(&self) -> QueueResult<u64>;

    /// Number of IDs waiting in the hand-off channel.
    async fn pending_len(&self) -> QueueResult<u64>;
}

/// Whether a record passes a status filter (empty filter matches everything).
pub(crate) fn matches_filter(record: &JobRecord, statuses: &[JobStatus]) -> bool {
    statuses.is_empty() || statuses.contains(&record.status)
}
