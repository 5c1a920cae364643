//! End-to-end job lifecycle tests against the in-memory store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use taskq_models::{JobId, JobRecord, JobStatus, StatusUpdate};
use taskq_queue::{
    JobService, JobStore, MemoryJobStore, QueueError, QueueResult, TaskArgs, TaskError,
    TaskRegistry, TaskResult, TaskSignature,
};
use taskq_worker::{JobExecutor, JobOutcome, WorkerConfig};

struct Harness {
    store: Arc<dyn JobStore>,
    service: JobService,
    executor: Arc<JobExecutor>,
    gate: Arc<Notify>,
    counted: Arc<AtomicUsize>,
}

async fn boom(_args: TaskArgs) -> TaskResult<Value> {
    panic!("boom")
}

fn test_config() -> WorkerConfig {
    WorkerConfig {
        name: "test-worker".to_string(),
        poll_interval: Duration::from_millis(10),
        claim_block: Duration::from_millis(20),
        backoff_base: Duration::from_millis(1),
        backoff_max: Duration::from_millis(5),
        status_write_retries: 1,
        ..Default::default()
    }
}

fn registry(gate: Arc<Notify>, counted: Arc<AtomicUsize>) -> TaskRegistry {
    taskq_tasks::register_builtin(TaskRegistry::builder())
        .unwrap()
        .register_fn("boom", TaskSignature::new(), boom)
        .unwrap()
        .register_fn("gate", TaskSignature::new(), move |_| {
            let gate = Arc::clone(&gate);
            async move {
                gate.notified().await;
                Ok::<Value, TaskError>(json!("released"))
            }
        })
        .unwrap()
        .register_fn("counted", TaskSignature::new().required("x"), move |args| {
            let counted = Arc::clone(&counted);
            async move {
                counted.fetch_add(1, Ordering::SeqCst);
                args.get::<Value>("x")
            }
        })
        .unwrap()
        .build()
}

fn harness_with_store(store: Arc<dyn JobStore>, config: WorkerConfig) -> Harness {
    let gate = Arc::new(Notify::new());
    let counted = Arc::new(AtomicUsize::new(0));
    let registry = Arc::new(registry(Arc::clone(&gate), Arc::clone(&counted)));

    Harness {
        // Deferred so the worker-side validation paths can be reached.
        service: JobService::deferred(Arc::clone(&store)),
        executor: Arc::new(JobExecutor::new(config, Arc::clone(&store), registry)),
        store,
        gate,
        counted,
    }
}

fn harness() -> Harness {
    harness_with_store(Arc::new(MemoryJobStore::default()), test_config())
}

impl Harness {
    fn start(&self) -> JoinHandle<()> {
        let executor = Arc::clone(&self.executor);
        tokio::spawn(async move {
            executor.run().await.unwrap();
        })
    }

    async fn submit(&self, task: &str, args: Vec<Value>, kwargs: Value) -> JobId {
        let kwargs = match kwargs {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        self.service.submit(task, args, kwargs).await.unwrap()
    }

    async fn wait_for(&self, id: &JobId, status: JobStatus) -> JobRecord {
        for _ in 0..400 {
            let record = self.service.get_status(id).await.unwrap();
            if record.status == status {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job {} never reached {}", id, status);
    }

    async fn stop(&self, handle: JoinHandle<()>) {
        self.executor.shutdown();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("executor did not stop")
            .unwrap();
    }
}

#[tokio::test]
async fn test_add_job_completes_with_result() {
    let h = harness();
    let worker = h.start();

    let id = h.submit("add", vec![json!(2), json!(3)], json!({})).await;
    let record = h.wait_for(&id, JobStatus::Done).await;

    assert_eq!(record.result, Some(json!(5)));
    assert_eq!(record.error, None);
    assert_eq!(h.store.pending_len().await.unwrap(), 0);

    h.stop(worker).await;
}

#[tokio::test]
async fn test_handler_error_is_recorded_as_failed() {
    let h = harness();
    let worker = h.start();

    let id = h.submit("fail", vec![], json!({"message": "disk full"})).await;
    let record = h.wait_for(&id, JobStatus::Failed).await;

    assert_eq!(record.error.as_deref(), Some("disk full"));
    assert_eq!(record.result, None);

    h.stop(worker).await;
}

#[tokio::test]
async fn test_unknown_task_fails_without_running() {
    let h = harness();
    let record = JobRecord::new("does_not_exist", vec![], Map::new());
    let id = h.store.enqueue(&record).await.unwrap();

    let claimed = h.store.claim(None).await.unwrap().unwrap();
    let outcome = h.executor.execute(claimed).await;

    assert_eq!(outcome, JobOutcome::Failed("unknown task: does_not_exist".to_string()));
    let record = h.service.get_status(&id).await.unwrap();
    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(record.error.as_deref(), Some("unknown task: does_not_exist"));
}

#[tokio::test]
async fn test_arity_mismatch_never_invokes_handler() {
    let h = harness();
    let worker = h.start();

    let too_many = h.submit("counted", vec![json!(1), json!(2)], json!({})).await;
    let missing = h.submit("counted", vec![], json!({})).await;
    let unexpected = h.submit("counted", vec![json!(1)], json!({"y": 2})).await;

    for id in [&too_many, &missing, &unexpected] {
        let record = h.wait_for(id, JobStatus::Failed).await;
        let error = record.error.unwrap();
        assert!(error.starts_with("invalid arguments: "), "{}", error);
    }
    assert_eq!(h.counted.load(Ordering::SeqCst), 0);

    let ok = h.submit("counted", vec![], json!({"x": "hi"})).await;
    assert_eq!(h.wait_for(&ok, JobStatus::Done).await.result, Some(json!("hi")));
    assert_eq!(h.counted.load(Ordering::SeqCst), 1);

    h.stop(worker).await;
}

#[tokio::test]
async fn test_panicking_handler_does_not_stop_the_loop() {
    let h = harness();
    let worker = h.start();

    let panicked = h.submit("boom", vec![], json!({})).await;
    let after = h.submit("echo", vec![json!("still alive")], json!({})).await;

    let record = h.wait_for(&panicked, JobStatus::Failed).await;
    assert_eq!(record.error.as_deref(), Some("task panicked: boom"));

    let record = h.wait_for(&after, JobStatus::Done).await;
    assert_eq!(record.result, Some(json!("still alive")));

    h.stop(worker).await;
}

#[tokio::test]
async fn test_concurrent_submissions_stay_independent() {
    let h = harness();
    let worker = h.start();

    let (a, b) = tokio::join!(
        h.submit("add", vec![json!(1), json!(1)], json!({})),
        h.submit("add", vec![json!(20), json!(22)], json!({})),
    );
    assert_ne!(a, b);

    assert_eq!(h.wait_for(&a, JobStatus::Done).await.result, Some(json!(2)));
    assert_eq!(h.wait_for(&b, JobStatus::Done).await.result, Some(json!(42)));

    h.stop(worker).await;
}

#[tokio::test]
async fn test_status_is_running_while_handler_executes() {
    let h = harness();
    let worker = h.start();

    let id = h.submit("gate", vec![], json!({})).await;
    assert!(matches!(
        h.service.get_status(&id).await.unwrap().status,
        JobStatus::Queued | JobStatus::Running
    ));

    let running = h.wait_for(&id, JobStatus::Running).await;
    assert_eq!(running.result, None);
    assert_eq!(running.error, None);

    h.gate.notify_one();
    let done = h.wait_for(&id, JobStatus::Done).await;
    assert_eq!(done.result, Some(json!("released")));
    assert!(done.updated_at >= running.updated_at);

    h.stop(worker).await;
}

#[tokio::test]
async fn test_shutdown_lets_in_flight_job_finish() {
    let h = harness();
    let worker = h.start();

    let id = h.submit("gate", vec![], json!({})).await;
    h.wait_for(&id, JobStatus::Running).await;

    h.executor.shutdown();
    assert!(h.executor.is_shutting_down());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!worker.is_finished());

    h.gate.notify_one();
    h.stop(worker).await;
    assert_eq!(h.service.get_status(&id).await.unwrap().status, JobStatus::Done);
}

#[tokio::test]
async fn test_deleted_job_is_abandoned() {
    let h = harness();
    let worker = h.start();

    let id = h.submit("gate", vec![], json!({})).await;
    h.wait_for(&id, JobStatus::Running).await;
    h.service.delete(&id).await.unwrap();

    h.gate.notify_one();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.store.read(&id).await.unwrap().is_none());

    h.stop(worker).await;
}

/// Store that fails on demand as if Redis were unreachable.
///
/// Each counter is the number of upcoming calls to fail that way.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryJobStore,
    claim_failures: AtomicUsize,
    corrupt_claims: AtomicUsize,
    write_failures: AtomicUsize,
    lost_acks: AtomicUsize,
    claims: AtomicUsize,
    writes: AtomicUsize,
}

/// Consume one pending failure from `counter`, if any.
fn take(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl JobStore for FlakyStore {
    async fn enqueue(&self, record: &JobRecord) -> QueueResult<JobId> {
        self.inner.enqueue(record).await
    }

    async fn claim(&self, wait: Option<Duration>) -> QueueResult<Option<JobRecord>> {
        self.claims.fetch_add(1, Ordering::SeqCst);
        if take(&self.claim_failures) {
            return Err(QueueError::connection_failed("connection refused"));
        }
        let claimed = self.inner.claim(wait).await?;
        match claimed {
            Some(record) if take(&self.corrupt_claims) => Err(QueueError::corrupt_record(
                record.id,
                "job record missing field 'task_name'",
            )),
            other => Ok(other),
        }
    }

    async fn write_status(&self, id: &JobId, update: &StatusUpdate) -> QueueResult<()> {
        if take(&self.write_failures) {
            return Err(QueueError::connection_failed("connection refused"));
        }
        self.inner.write_status(id, update).await?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        if take(&self.lost_acks) {
            return Err(QueueError::connection_failed("connection reset"));
        }
        Ok(())
    }

    async fn read(&self, id: &JobId) -> QueueResult<Option<JobRecord>> {
        self.inner.read(id).await
    }

    async fn list(&self, statuses: &[JobStatus]) -> QueueResult<Vec<JobRecord>> {
        self.inner.list(statuses).await
    }

    async fn delete(&self, id: &JobId) -> QueueResult<bool> {
        self.inner.delete(id).await
    }

    async fn clear(&self) -> QueueResult<u64> {
        self.inner.clear().await
    }

    async fn pending_len(&self) -> QueueResult<u64> {
        self.inner.pending_len().await
    }
}

#[tokio::test]
async fn test_claim_errors_are_retried() {
    let store = Arc::new(FlakyStore {
        claim_failures: AtomicUsize::new(3),
        ..Default::default()
    });
    let h = harness_with_store(store.clone(), test_config());

    let id = h.submit("add", vec![json!(2), json!(3)], json!({})).await;
    let worker = h.start();

    assert_eq!(h.wait_for(&id, JobStatus::Done).await.result, Some(json!(5)));
    assert!(store.claims.load(Ordering::SeqCst) >= 4);

    h.stop(worker).await;
}

#[tokio::test]
async fn test_polling_mode_picks_up_late_jobs() {
    let config = WorkerConfig {
        claim_block: Duration::ZERO,
        ..test_config()
    };
    let h = harness_with_store(Arc::new(MemoryJobStore::default()), config);
    let worker = h.start();

    tokio::time::sleep(Duration::from_millis(30)).await;
    let id = h.submit("echo", vec![], json!({"value": [1, 2]})).await;
    assert_eq!(h.wait_for(&id, JobStatus::Done).await.result, Some(json!([1, 2])));

    h.stop(worker).await;
}

#[tokio::test]
async fn test_transient_status_write_is_retried() {
    let store = Arc::new(FlakyStore {
        write_failures: AtomicUsize::new(1),
        ..Default::default()
    });
    let h = harness_with_store(store.clone(), test_config());

    let id = h.submit("add", vec![json!(2), json!(3)], json!({})).await;
    let claimed = h.store.claim(None).await.unwrap().unwrap();

    assert_eq!(h.executor.execute(claimed).await, JobOutcome::Done(json!(5)));
    assert_eq!(h.service.get_status(&id).await.unwrap().result, Some(json!(5)));
    assert_eq!(store.writes.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_write_that_landed_before_the_error_is_not_repeated() {
    // Both the running and the done write land, then report a dropped connection.
    let store = Arc::new(FlakyStore {
        lost_acks: AtomicUsize::new(2),
        ..Default::default()
    });
    let h = harness_with_store(store.clone(), test_config());

    let id = h.submit("counted", vec![json!("x")], json!({})).await;
    let claimed = h.store.claim(None).await.unwrap().unwrap();

    assert_eq!(h.executor.execute(claimed).await, JobOutcome::Done(json!("x")));
    assert_eq!(store.writes.load(Ordering::SeqCst), 2);
    assert_eq!(h.counted.load(Ordering::SeqCst), 1);

    let record = h.service.get_status(&id).await.unwrap();
    assert_eq!(record.status, JobStatus::Done);
    assert_eq!(record.result, Some(json!("x")));
}

#[tokio::test]
async fn test_unwritable_running_status_abandons_job() {
    let store = Arc::new(FlakyStore {
        write_failures: AtomicUsize::new(usize::MAX),
        ..Default::default()
    });
    let h = harness_with_store(store.clone(), test_config());

    let id = h.submit("counted", vec![json!("x")], json!({})).await;
    let claimed = h.store.claim(None).await.unwrap().unwrap();

    match h.executor.execute(claimed).await {
        JobOutcome::Abandoned(reason) => {
            assert!(reason.contains("connection refused"), "{}", reason)
        }
        other => panic!("expected abandoned, got {:?}", other),
    }
    assert_eq!(store.writes.load(Ordering::SeqCst), 0);
    assert_eq!(h.counted.load(Ordering::SeqCst), 0);
    assert_eq!(h.service.get_status(&id).await.unwrap().status, JobStatus::Queued);
}

#[tokio::test]
async fn test_unreadable_claimed_record_is_failed() {
    let store = Arc::new(FlakyStore {
        corrupt_claims: AtomicUsize::new(1),
        ..Default::default()
    });
    let h = harness_with_store(store.clone(), test_config());

    let broken = h.submit("counted", vec![json!("x")], json!({})).await;
    let fine = h.submit("counted", vec![json!("y")], json!({})).await;
    let worker = h.start();

    let record = h.wait_for(&broken, JobStatus::Failed).await;
    assert_eq!(
        record.error.as_deref(),
        Some("invalid job record: job record missing field 'task_name'")
    );
    assert_eq!(h.wait_for(&fine, JobStatus::Done).await.result, Some(json!("y")));
    assert_eq!(h.counted.load(Ordering::SeqCst), 1);

    h.stop(worker).await;
}
