//! Integration tests for the index queue.

use indexsync_core::{
    CoreError, EntityId, EntityType, IndexError, IndexManager, IndexManagerRegistry,
    IndexOperation, MemoryEntityStore, MemoryReporter, SiteId, TaskDispatcher,
};
use indexsync_queue::{DeadLetterLog, IndexQueue, QueueConfig, QueueError, RetryConfig};
use indexsync_testkit::{
    apply_mutation, mutations_strategy, page, page_type, FailingStore, FailurePlan, FlakyManager,
    HangingManager, IndexCall, PanickingManager, RecordingManager, SlowManager, TestPipeline,
};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig::new(max_attempts)
        .with_initial_delay(Duration::from_millis(1))
        .without_jitter()
}

fn config() -> QueueConfig {
    QueueConfig::new().with_workers(3).with_retry(fast_retry(3))
}

fn flaky(plan: FailurePlan) -> TestPipeline {
    TestPipeline::wrapped(|inner| Arc::new(FlakyManager::new(inner, plan)))
}

/// Starts a queue over the pipeline's dispatcher and wires it into the store.
fn start(pipeline: &TestPipeline, config: QueueConfig) -> IndexQueue {
    let queue = IndexQueue::start(
        config,
        Arc::clone(&pipeline.dispatcher),
        Arc::new(DeadLetterLog::new()),
    )
    .unwrap();
    pipeline.store.on_commit(queue.hook());
    queue
}

#[tokio::test]
async fn committed_mutations_reach_the_index() {
    let pipeline = TestPipeline::new();
    let queue = start(&pipeline, config());

    for id in 1..=10 {
        pipeline.store.create(page(id, &format!("Page {id}"))).unwrap();
    }
    pipeline.store.update(page(3, "Renamed")).unwrap();
    pipeline
        .store
        .delete(&page_type(), &EntityId::Int(7))
        .unwrap();
    queue.flush().await.unwrap();

    assert!(pipeline.index_matches_store());
    assert_eq!(pipeline.index.search("renamed"), vec![EntityId::Int(3)]);

    let stats = queue.stats();
    assert_eq!(stats.enqueued, 12);
    assert_eq!(stats.applied, 12);
    assert_eq!(stats.in_flight, 0);
    assert!(pipeline.reporter.is_empty());
}

#[tokio::test]
async fn page_lifecycle_end_to_end() {
    let pipeline = TestPipeline::new();
    let queue = start(&pipeline, config());

    pipeline.store.create(page(1, "Home")).unwrap();
    pipeline
        .store
        .create(page(2, "Spring Collection").with_parent(1u64))
        .unwrap();
    pipeline
        .store
        .create(page(3, "Spring Lookbook").with_parent(2u64))
        .unwrap();
    queue.flush().await.unwrap();
    assert_eq!(pipeline.index.search("spring"), vec![EntityId::Int(2), EntityId::Int(3)]);

    pipeline
        .store
        .update(page(2, "Summer Collection").with_parent(1u64))
        .unwrap();
    queue.flush().await.unwrap();
    assert_eq!(pipeline.index.search("spring"), vec![EntityId::Int(3)]);
    assert_eq!(pipeline.index.search("summer"), vec![EntityId::Int(2)]);

    // Cascades to both descendants.
    pipeline
        .store
        .delete(&page_type(), &EntityId::Int(1))
        .unwrap();
    queue.flush().await.unwrap();
    assert!(pipeline.index.is_empty());
    assert_eq!(pipeline.dispatcher.stats().deleted, 3);
}

#[tokio::test]
async fn delayed_update_then_delete_leaves_document_deleted() {
    let recording = Arc::new(RecordingManager::new(page_type()));
    let slow = Arc::new(
        SlowManager::new(recording.clone(), Duration::from_millis(150)).updates_only(),
    );
    let registry = IndexManagerRegistry::builder().register(slow).unwrap().build();
    let store = Arc::new(MemoryEntityStore::new());
    let dispatcher = Arc::new(TaskDispatcher::new(
        registry,
        store.clone(),
        Arc::new(MemoryReporter::new()),
    ));
    let queue = IndexQueue::start(config(), dispatcher, Arc::new(DeadLetterLog::new())).unwrap();
    store.on_commit(queue.hook());

    store.create(page(1, "Draft")).unwrap();
    queue.flush().await.unwrap();

    store.update(page(1, "Final")).unwrap();
    // Let the worker load the snapshot and stall inside the update.
    tokio::time::sleep(Duration::from_millis(30)).await;
    store.delete(&page_type(), &EntityId::Int(1)).unwrap();
    queue.flush().await.unwrap();

    assert!(!recording.contains(&EntityId::Int(1)));
    assert_eq!(
        recording.calls_for(&EntityId::Int(1)),
        vec![
            IndexCall::Insert(EntityId::Int(1), Some("Draft".into())),
            IndexCall::Update(EntityId::Int(1), Some("Final".into())),
            IndexCall::Delete(EntityId::Int(1)),
        ]
    );
}

#[tokio::test]
async fn retryable_failures_are_retried() {
    let pipeline = flaky(FailurePlan::FirstN(2));
    let queue = start(&pipeline, config());

    pipeline.store.create(page(1, "Eventually")).unwrap();
    queue.flush().await.unwrap();

    assert!(pipeline.index.contains(&EntityId::Int(1)));
    let stats = queue.stats();
    assert_eq!(stats.retried, 2);
    assert_eq!(stats.applied, 1);
    assert_eq!(stats.dead_lettered, 0);
    assert_eq!(pipeline.reporter.len(), 2);
    assert!(queue.dead_letters().is_empty());
}

#[tokio::test]
async fn store_outage_is_retried() {
    let pipeline = TestPipeline::build(
        |index| index,
        |store| Arc::new(FailingStore::new(store, 2)),
    );
    let queue = start(&pipeline, config());

    pipeline.store.create(page(1, "Patience")).unwrap();
    queue.flush().await.unwrap();

    assert!(pipeline.index.contains(&EntityId::Int(1)));
    assert!(matches!(
        pipeline.reporter.reports()[0].error,
        IndexError::Unavailable(_)
    ));
    assert_eq!(queue.stats().retried, 2);
}

#[tokio::test]
async fn exhausted_retries_are_dead_lettered() {
    let pipeline = flaky(FailurePlan::Always);
    let queue = start(&pipeline, QueueConfig::new().with_retry(fast_retry(2)));

    let op = pipeline.store.create(page(1, "Doomed")).unwrap();
    queue.flush().await.unwrap();

    // The mutation itself stands.
    assert_eq!(pipeline.store.len(), 1);
    assert!(pipeline.index.is_empty());

    let letters = queue.dead_letters().entries();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].operation, op);
    assert_eq!(letters[0].attempts, 2);
    assert!(letters[0].last_error.contains("injected failure"));

    let stats = queue.stats();
    assert_eq!(stats.retried, 1);
    assert_eq!(stats.dead_lettered, 1);
    assert_eq!(stats.in_flight, 0);
    assert_eq!(pipeline.reporter.len(), 2);
}

#[tokio::test]
async fn fatal_errors_are_not_retried() {
    let pipeline = flaky(FailurePlan::Fatal);
    let queue = start(&pipeline, QueueConfig::new().with_retry(fast_retry(5)));

    pipeline.store.create(page(1, "Rejected")).unwrap();
    queue.flush().await.unwrap();

    assert_eq!(queue.stats().retried, 0);
    assert_eq!(queue.dead_letters().entries()[0].attempts, 1);
}

#[tokio::test]
async fn panicking_manager_is_isolated() {
    let registry = IndexManagerRegistry::builder()
        .register(Arc::new(PanickingManager::new(page_type())))
        .unwrap()
        .build();
    let store = Arc::new(MemoryEntityStore::new());
    let reporter = Arc::new(MemoryReporter::new());
    let dispatcher = Arc::new(TaskDispatcher::new(registry, store.clone(), reporter.clone()));
    let queue = IndexQueue::start(config(), dispatcher, Arc::new(DeadLetterLog::new())).unwrap();
    store.on_commit(queue.hook());

    store.create(page(1, "Boom")).unwrap();
    store.create(page(2, "Boom again")).unwrap();
    queue.flush().await.unwrap();

    assert_eq!(store.len(), 2);
    assert_eq!(queue.stats().dead_lettered, 2);
    assert!(reporter
        .reports()
        .iter()
        .all(|r| matches!(r.error, IndexError::Panicked(_))));
}

#[tokio::test]
async fn timed_out_attempt_is_awaited_on_retry() {
    let pipeline = TestPipeline::wrapped(|inner| {
        Arc::new(SlowManager::new(inner, Duration::from_millis(150)).times(1))
    });
    let queue = start(&pipeline, config().with_apply_timeout(Duration::from_millis(120)));

    pipeline.store.create(page(1, "Sluggish")).unwrap();
    queue.flush().await.unwrap();

    assert!(pipeline.index.contains(&EntityId::Int(1)));
    let stats = queue.stats();
    assert_eq!(stats.timed_out, 1);
    assert_eq!(stats.retried, 1);
    assert_eq!(stats.applied, 1);
    assert_eq!(pipeline.reporter.reports()[0].error, IndexError::Timeout);

    // The retry adopted the late apply instead of writing again.
    let dispatched = pipeline.dispatcher.stats();
    assert_eq!(dispatched.inserted, 1);
    assert_eq!(dispatched.stale, 0);
}

/// Releases a hanging manager when the test ends, pass or fail.
struct Release(Arc<HangingManager>);

impl Drop for Release {
    fn drop(&mut self) {
        self.0.release();
    }
}

/// Builds a pipeline whose page index hangs on writes to `ids`.
fn hanging_pipeline(ids: &[u64]) -> (TestPipeline, Arc<HangingManager>) {
    let mut hanging = None;
    let pipeline = TestPipeline::wrapped(|inner| {
        let manager = Arc::new(HangingManager::new(
            inner,
            ids.iter().map(|id| EntityId::Int(*id)),
        ));
        hanging = Some(Arc::clone(&manager));
        manager
    });
    (pipeline, hanging.unwrap())
}

#[tokio::test]
async fn hung_apply_does_not_block_partition() {
    let (pipeline, hanging) = hanging_pipeline(&[1]);
    let _release = Release(Arc::clone(&hanging));
    let queue = start(
        &pipeline,
        QueueConfig::new()
            .with_workers(1)
            .with_apply_timeout(Duration::from_millis(50))
            .with_retry(RetryConfig::no_retry()),
    );

    pipeline.store.create(page(1, "Stuck")).unwrap();
    pipeline.store.create(page(2, "Behind it")).unwrap();

    tokio::time::timeout(Duration::from_millis(500), queue.flush())
        .await
        .expect("flush settles while the apply still hangs")
        .unwrap();

    assert!(pipeline.index.contains(&EntityId::Int(2)));
    assert!(!pipeline.index.contains(&EntityId::Int(1)));
    let letters = queue.dead_letters().entries();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].operation.entity_id, EntityId::Int(1));
    assert_eq!(letters[0].last_error, "index backend timed out");
    let stats = queue.stats();
    assert_eq!(stats.timed_out, 1);
    assert_eq!(stats.applied, 1);
    assert_eq!(stats.in_flight, 0);

    hanging.release();
    assert_eq!(queue.dead_letters().replay(&queue).await.unwrap(), 1);
    queue.flush().await.unwrap();
    assert!(pipeline.index_matches_store());
    assert_eq!(hanging.blocked(), 1);
}

#[tokio::test]
async fn repeated_timeouts_are_dead_lettered() {
    let (pipeline, hanging) = hanging_pipeline(&[1]);
    let _release = Release(Arc::clone(&hanging));
    let queue = start(&pipeline, config().with_apply_timeout(Duration::from_millis(30)));

    let op = pipeline.store.create(page(1, "Never answers")).unwrap();
    tokio::time::timeout(Duration::from_secs(2), queue.flush())
        .await
        .expect("flush settles once attempts run out")
        .unwrap();

    let letters = queue.dead_letters().entries();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].operation, op);
    assert_eq!(letters[0].attempts, 3);
    assert_eq!(letters[0].last_error, "index backend timed out");

    let stats = queue.stats();
    assert_eq!(stats.timed_out, 3);
    assert_eq!(stats.retried, 2);
    assert_eq!(stats.dead_lettered, 1);
    assert!(pipeline
        .reporter
        .reports()
        .iter()
        .all(|r| r.error == IndexError::Timeout));
    // Retries waited on the first apply rather than starting new ones.
    assert_eq!(hanging.blocked(), 1);
}

#[tokio::test]
async fn unregistered_types_settle_as_skipped() {
    let pipeline = TestPipeline::new();
    let queue = start(&pipeline, config());

    let tag = indexsync_core::Entity::new(EntityType::new("tag"), 1u64, SiteId::new(1));
    pipeline.store.create(tag).unwrap();
    queue.flush().await.unwrap();

    assert_eq!(queue.stats().applied, 1);
    assert_eq!(pipeline.dispatcher.stats().skipped, 1);
    assert!(pipeline.index.is_empty());
}

#[tokio::test]
async fn malformed_operation_is_rejected_at_enqueue() {
    let pipeline = TestPipeline::new();
    let queue = start(&pipeline, config());

    let err = queue
        .enqueue(IndexOperation::insert(EntityType::new(""), 1u64))
        .unwrap_err();
    assert!(matches!(
        err,
        QueueError::Core(CoreError::MalformedOperation { .. })
    ));

    let nil = IndexOperation::delete(page_type(), EntityId::Uuid(uuid::Uuid::nil()));
    assert!(queue.enqueue_wait(nil).await.is_err());
    assert_eq!(queue.stats().enqueued, 0);
}

#[tokio::test]
async fn full_partition_is_reported_and_hook_dead_letters() {
    let pipeline = TestPipeline::new();
    let queue = start(&pipeline, QueueConfig::new().with_workers(1).with_partition_capacity(1));

    // The current-thread runtime has not polled the worker yet.
    queue
        .enqueue(IndexOperation::insert(page_type(), 10u64))
        .unwrap();
    assert!(matches!(
        queue.enqueue(IndexOperation::insert(page_type(), 11u64)),
        Err(QueueError::Full { partition: 0 })
    ));

    pipeline.store.create(page(1, "Overflow")).unwrap();
    assert_eq!(queue.stats().rejected, 1);
    let letters = queue.dead_letters().entries();
    assert_eq!(letters[0].attempts, 0);
    assert_eq!(letters[0].operation.entity_id, EntityId::Int(1));

    queue.flush().await.unwrap();
    assert_eq!(queue.dead_letters().replay(&queue).await.unwrap(), 1);
    queue.flush().await.unwrap();
    assert!(pipeline.index.contains(&EntityId::Int(1)));
}

#[tokio::test]
async fn replay_reapplies_dead_letters() {
    let pipeline = flaky(FailurePlan::FirstN(1));
    let queue = start(&pipeline, QueueConfig::new().with_retry(RetryConfig::no_retry()));

    pipeline.store.create(page(1, "Second chance")).unwrap();
    queue.flush().await.unwrap();
    assert_eq!(queue.dead_letters().len(), 1);

    assert_eq!(queue.dead_letters().replay(&queue).await.unwrap(), 1);
    queue.flush().await.unwrap();

    assert!(pipeline.index.contains(&EntityId::Int(1)));
    assert!(queue.dead_letters().is_empty());
}

#[tokio::test]
async fn dead_letter_file_can_be_loaded() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("dead_letters.jsonl");
    let pipeline = flaky(FailurePlan::Always);
    let queue = IndexQueue::start(
        QueueConfig::new().with_retry(RetryConfig::no_retry()),
        Arc::clone(&pipeline.dispatcher),
        Arc::new(DeadLetterLog::with_file(&path)),
    )
    .unwrap();
    pipeline.store.on_commit(queue.hook());

    pipeline.store.create(page(1, "a")).unwrap();
    pipeline.store.create(page(2, "b")).unwrap();
    queue.flush().await.unwrap();

    let mut loaded = DeadLetterLog::load(&path).unwrap();
    loaded.sort_by_key(|l| l.operation.sequence);
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded[0].operation.entity_id, EntityId::Int(1));
    assert_eq!(loaded[1].attempts, 1);
}

#[tokio::test]
async fn replay_empties_dead_letter_file() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("dead_letters.jsonl");
    let pipeline = flaky(FailurePlan::FirstN(2));
    let queue = IndexQueue::start(
        QueueConfig::new().with_retry(RetryConfig::no_retry()),
        Arc::clone(&pipeline.dispatcher),
        Arc::new(DeadLetterLog::with_file(&path)),
    )
    .unwrap();
    pipeline.store.on_commit(queue.hook());

    pipeline.store.create(page(1, "a")).unwrap();
    pipeline.store.create(page(2, "b")).unwrap();
    queue.flush().await.unwrap();
    assert_eq!(DeadLetterLog::open(&path).unwrap().len(), 2);

    assert_eq!(queue.dead_letters().replay(&queue).await.unwrap(), 2);
    queue.flush().await.unwrap();

    assert!(pipeline.index_matches_store());
    assert!(queue.dead_letters().is_empty());
    assert!(DeadLetterLog::load(&path).unwrap().is_empty());
    assert!(DeadLetterLog::open(&path).unwrap().is_empty());
}

#[tokio::test]
async fn shutdown_drains_and_closes() {
    let pipeline = TestPipeline::new();
    let queue = start(&pipeline, config());

    for id in 1..=20 {
        pipeline.store.create(page(id, "queued")).unwrap();
    }
    queue.shutdown().await;

    assert!(queue.is_closed());
    assert_eq!(pipeline.index.len(), 20);
    assert_eq!(queue.stats().in_flight, 0);

    assert!(matches!(
        queue.enqueue(IndexOperation::insert(page_type(), 1u64)),
        Err(QueueError::Closed)
    ));
    assert!(matches!(queue.flush().await, Err(QueueError::Closed)));

    // Commits after shutdown are kept for replay.
    pipeline.store.create(page(21, "late")).unwrap();
    assert_eq!(queue.dead_letters().len(), 1);

    // Idempotent.
    queue.shutdown().await;
}

#[tokio::test]
async fn invalid_config_is_rejected() {
    let pipeline = TestPipeline::new();
    let result = IndexQueue::start(
        QueueConfig::new().with_workers(0),
        Arc::clone(&pipeline.dispatcher),
        Arc::new(DeadLetterLog::new()),
    );
    assert!(matches!(result, Err(QueueError::InvalidConfig(_))));
}

#[test]
fn start_outside_runtime_fails() {
    let pipeline = TestPipeline::new();
    let result = IndexQueue::start(
        QueueConfig::new(),
        Arc::clone(&pipeline.dispatcher),
        Arc::new(DeadLetterLog::new()),
    );
    assert!(matches!(result, Err(QueueError::InvalidConfig(_))));
}

#[tokio::test]
async fn flaky_manager_every_nth_converges() {
    let pipeline = flaky(FailurePlan::EveryNth(3));
    // One worker keeps the failing call numbers deterministic.
    let queue = start(&pipeline, config().with_workers(1));

    for id in 1..=30 {
        pipeline.store.save(page(id, "first")).unwrap();
        pipeline.store.save(page(id, "second")).unwrap();
    }
    queue.flush().await.unwrap();

    assert!(pipeline.index_matches_store());
    assert!(queue.dead_letters().is_empty());
    assert!(queue.stats().retried > 0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn index_converges_to_store(script in mutations_strategy(6, 40)) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let pipeline = TestPipeline::new();
            let queue = start(&pipeline, config());
            for mutation in &script {
                apply_mutation(&pipeline.store, mutation);
            }
            queue.flush().await.unwrap();
            assert!(pipeline.index_matches_store());
        });
    }
}

#[test]
fn manager_trait_objects_are_shareable() {
    fn assert_send_sync<T: Send + Sync + ?Sized>() {}
    assert_send_sync::<dyn IndexManager>();
    assert_send_sync::<IndexQueue>();
}
