//! Job store on Redis: one hash per job plus a list of pending IDs.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use taskq_models::{JobId, JobRecord, JobStatus, StatusUpdate};

use crate::codec::{decode_claimed, decode_record, encode_record, encode_update};
use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};
use crate::store::{matches_filter, JobStore};

/// Merges a status change into an existing job hash.
///
/// KEYS[1] job hash
/// ARGV[1] next status, ARGV[2] required current status, ARGV[3] updated_at,
/// ARGV[4] payload field ('' for none), ARGV[5] payload value,
/// ARGV[6] '1' when terminal, ARGV[7] retention seconds
///
/// Returns {1, current} on success, {0, ''} when the hash is missing and
/// {-1, current} when the transition is not allowed.
const WRITE_STATUS_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return {0, ''}
end
local current = redis.call('HGET', KEYS[1], 'status') or ''
if current ~= ARGV[2] then
  return {-1, current}
end
redis.call('HSET', KEYS[1], 'status', ARGV[1], 'updated_at', ARGV[3])
if ARGV[4] ~= '' then
  redis.call('HSET', KEYS[1], ARGV[4], ARGV[5])
end
if ARGV[6] == '1' then
  redis.call('EXPIRE', KEYS[1], tonumber(ARGV[7]))
end
return {1, current}
"#;

/// Pops one pending ID and reads its hash in the same step, so a dropped
/// connection can never separate the two.
///
/// KEYS[1] pending list
/// ARGV[1] job key prefix (`<prefix>:job:`)
///
/// Returns false when nothing is pending, otherwise {id, flat hash fields}.
/// The job key is built from the popped ID, so this assumes a single node.
const CLAIM_SCRIPT: &str = r#"
local id = redis.call('RPOP', KEYS[1])
if not id then
  return false
end
return {id, redis.call('HGETALL', ARGV[1] .. id)}
"#;

const SCAN_BATCH: usize = 200;

/// Below this the remaining claim wait is treated as expired; BLMOVE reads a
/// zero timeout as "block forever".
const MIN_BLOCK: Duration = Duration::from_millis(1);

/// Redis-backed job store.
pub struct RedisJobStore {
    client: redis::Client,
    config: QueueConfig,
    claim_script: redis::Script,
    write_status_script: redis::Script,
}

impl RedisJobStore {
    /// Create a new store. Does not connect until the first operation.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self {
            client,
            config,
            claim_script: redis::Script::new(CLAIM_SCRIPT),
            write_status_script: redis::Script::new(WRITE_STATUS_SCRIPT),
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    async fn connection(&self) -> QueueResult<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }

    /// Round-trip a PING to check connectivity.
    pub async fn ping(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    /// Atomically pop one pending ID together with its stored fields.
    async fn pop_pending(
        &self,
        conn: &mut MultiplexedConnection,
    ) -> QueueResult<Option<(String, HashMap<String, String>)>> {
        let popped: Option<(String, Vec<String>)> = self
            .claim_script
            .key(&self.config.pending_list)
            .arg(self.config.job_key(""))
            .invoke_async(conn)
            .await
            .map_err(|e| QueueError::DequeueFailed(e.to_string()))?;

        Ok(popped.map(|(id, flat)| {
            let fields = flat
                .chunks_exact(2)
                .map(|pair| (pair[0].clone(), pair[1].clone()))
                .collect();
            (id, fields)
        }))
    }

    /// Block until an ID is pending (or `timeout` passes) without taking it.
    ///
    /// BLMOVE from the list onto itself is a rotation, so the list is left
    /// unchanged; the actual pop happens in [`pop_pending`](Self::pop_pending).
    async fn wait_pending(&self, conn: &mut MultiplexedConnection, timeout: Duration) -> QueueResult<bool> {
        let rotated: Option<String> = redis::cmd("BLMOVE")
            .arg(&self.config.pending_list)
            .arg(&self.config.pending_list)
            .arg("RIGHT")
            .arg("RIGHT")
            .arg(timeout.as_secs_f64())
            .query_async(conn)
            .await
            .map_err(|e| QueueError::DequeueFailed(e.to_string()))?;
        Ok(rotated.is_some())
    }

    async fn scan_job_keys(&self, conn: &mut MultiplexedConnection) -> QueueResult<BTreeSet<String>> {
        let pattern = self.config.job_pattern();
        let mut keys = BTreeSet::new();
        let mut cursor: u64 = 0;

        loop {
            // SCAN may return a key more than once; the set dedups.
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(keys)
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn enqueue(&self, record: &JobRecord) -> QueueResult<JobId> {
        let mut conn = self.connection().await?;
        let key = self.config.job_key(record.id.as_str());
        let fields = encode_record(record)?;

        // MULTI/EXEC keeps the hash write ahead of the list push, so a worker
        // can never pop an ID whose record is not there yet.
        redis::pipe()
            .atomic()
            .hset_multiple(&key, fields.as_slice())
            .ignore()
            .lpush(&self.config.pending_list, record.id.as_str())
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| QueueError::enqueue_failed(e.to_string()))?;

        info!(job_id = %record.id, task_name = %record.task_name, "Enqueued job");
        Ok(record.id.clone())
    }

    async fn claim(&self, wait: Option<Duration>) -> QueueResult<Option<JobRecord>> {
        let mut conn = self.connection().await?;
        let deadline = wait
            .filter(|w| !w.is_zero())
            .map(|w| tokio::time::Instant::now() + w);

        loop {
            if let Some((id, fields)) = self.pop_pending(&mut conn).await? {
                return match decode_claimed(&id, fields)? {
                    Some(record) => {
                        debug!(job_id = %id, "Claimed job");
                        Ok(Some(record))
                    }
                    None => {
                        warn!(job_id = %id, "Claimed job has no record, dropping");
                        Ok(None)
                    }
                };
            }

            let Some(deadline) = deadline else {
                return Ok(None);
            };
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            // Another worker may win the pop after the wait returns; retry until the deadline.
            if remaining < MIN_BLOCK || !self.wait_pending(&mut conn, remaining).await? {
                return Ok(None);
            }
        }
    }

    async fn write_status(&self, id: &JobId, update: &StatusUpdate) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        let key = self.config.job_key(id.as_str());
        let next = update.status();
        let required = next.predecessor().map(|s| s.as_str()).unwrap_or("");
        let (field, value) = encode_update(update)?.unwrap_or(("", String::new()));

        let (code, current): (i64, String) = self
            .write_status_script
            .key(&key)
            .arg(next.as_str())
            .arg(required)
            .arg(Utc::now().to_rfc3339())
            .arg(field)
            .arg(value)
            .arg(if next.is_terminal() { "1" } else { "0" })
            .arg(self.config.retention_secs())
            .invoke_async(&mut conn)
            .await?;

        match code {
            1 => {
                debug!(job_id = %id, status = %next, "Wrote job status");
                Ok(())
            }
            0 => Err(QueueError::JobNotFound(id.clone())),
            _ => Err(QueueError::InvalidTransition {
                id: id.clone(),
                from: current.parse().unwrap_or_default(),
                to: next,
            }),
        }
    }

    async fn read(&self, id: &JobId) -> QueueResult<Option<JobRecord>> {
        let mut conn = self.connection().await?;
        let fields: HashMap<String, String> = conn.hgetall(self.config.job_key(id.as_str())).await?;
        decode_record(fields)
    }

    async fn list(&self, statuses: &[JobStatus]) -> QueueResult<Vec<JobRecord>> {
        let mut conn = self.connection().await?;
        let keys = self.scan_job_keys(&mut conn).await?;

        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            let fields: HashMap<String, String> = conn.hgetall(&key).await?;
            match decode_record(fields) {
                Ok(Some(record)) if matches_filter(&record, statuses) => records.push(record),
                // expired between SCAN and HGETALL, or filtered out
                Ok(_) => {}
                Err(e) => warn!(key = %key, "Skipping unreadable job record: {}", e),
            }
        }

        Ok(records)
    }

    async fn delete(&self, id: &JobId) -> QueueResult<bool> {
        let mut conn = self.connection().await?;
        let key = self.config.job_key(id.as_str());

        let (removed, _dropped): (i64, i64) = redis::pipe()
            .atomic()
            .del(&key)
            .lrem(&self.config.pending_list, 0, id.as_str())
            .query_async(&mut conn)
            .await?;

        if removed > 0 {
            info!(job_id = %id, "Deleted job");
        }
        Ok(removed > 0)
    }

    async fn clear(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let _: i64 = conn.del(&self.config.pending_list).await?;

        let keys: Vec<String> = self.scan_job_keys(&mut conn).await?.into_iter().collect();
        let mut removed: u64 = 0;
        for batch in keys.chunks(SCAN_BATCH) {
            let deleted: u64 = conn.del(batch).await?;
            removed += deleted;
        }

        info!(removed, "Cleared all jobs");
        Ok(removed)
    }

    async fn pending_len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.llen(&self.config.pending_list).await?;
        Ok(len)
    }
}
