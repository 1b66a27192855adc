//! The asynchronous index queue.

use crate::config::QueueConfig;
use crate::dead_letter::{DeadLetter, DeadLetterLog};
use crate::error::{QueueError, QueueResult};
use crate::partition::Partitions;
use crate::stats::{QueueCounters, QueueStats};
use crate::worker::Worker;
use indexsync_core::{CommitHook, IndexOperation, TaskDispatcher};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// State reachable from commit hooks.
struct Shared {
    partitions: Partitions,
    counters: Arc<QueueCounters>,
    dead_letters: Arc<DeadLetterLog>,
}

impl Shared {
    fn enqueue(&self, operation: IndexOperation) -> QueueResult<()> {
        operation.validate()?;
        self.counters.record_enqueued();
        match self.partitions.try_send(operation) {
            Ok(partition) => {
                tracing::trace!(partition, "enqueued index operation");
                Ok(())
            }
            Err(err) => {
                self.counters.record_refused();
                Err(err)
            }
        }
    }

    async fn enqueue_wait(&self, operation: IndexOperation) -> QueueResult<()> {
        operation.validate()?;
        self.counters.record_enqueued();
        match self.partitions.send(operation).await {
            Ok(partition) => {
                tracing::trace!(partition, "enqueued index operation");
                Ok(())
            }
            Err(err) => {
                self.counters.record_refused();
                Err(err)
            }
        }
    }
}

/// Applies committed operations off the committing thread.
///
/// Operations are routed to one of `workers` partitions by a hash of their
/// [`IndexKey`](indexsync_core::IndexKey). Each partition is drained by a
/// single worker, so operations for one key apply in enqueue order while
/// different keys proceed concurrently.
///
/// # Example
///
/// ```rust,ignore
/// let dead_letters = Arc::new(DeadLetterLog::new());
/// let queue = IndexQueue::start(QueueConfig::default(), dispatcher, dead_letters)?;
/// store.on_commit(queue.hook());
/// store.create(page)?;
/// queue.flush().await?;
/// ```
pub struct IndexQueue {
    shared: Arc<Shared>,
    dispatcher: Arc<TaskDispatcher>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl IndexQueue {
    /// Validates the configuration and spawns the workers.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        config: QueueConfig,
        dispatcher: Arc<TaskDispatcher>,
        dead_letters: Arc<DeadLetterLog>,
    ) -> QueueResult<Self> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            QueueError::InvalidConfig(
                "the index queue must be started inside a tokio runtime".into(),
            )
        })?;

        let (partitions, receivers) = Partitions::new(config.workers, config.partition_capacity);
        let counters = Arc::new(QueueCounters::default());

        let workers = receivers
            .into_iter()
            .enumerate()
            .map(|(id, receiver)| {
                let worker = Worker::new(
                    id,
                    receiver,
                    Arc::clone(&dispatcher),
                    Arc::clone(&dead_letters),
                    config.clone(),
                    Arc::clone(&counters),
                );
                runtime.spawn(worker.run())
            })
            .collect();

        tracing::info!(
            workers = config.workers,
            partition_capacity = config.partition_capacity,
            apply_timeout_ms = u64::try_from(config.apply_timeout.as_millis()).unwrap_or(u64::MAX),
            max_attempts = config.retry.max_attempts,
            "index queue started"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                partitions,
                counters,
                dead_letters,
            }),
            dispatcher,
            workers: Mutex::new(workers),
        })
    }

    /// Enqueues an operation without waiting.
    ///
    /// Malformed operations are rejected here. A full partition returns
    /// [`QueueError::Full`]; a shut down queue returns [`QueueError::Closed`].
    pub fn enqueue(&self, operation: IndexOperation) -> QueueResult<()> {
        self.shared.enqueue(operation)
    }

    /// Enqueues an operation, waiting for partition capacity.
    pub async fn enqueue_wait(&self, operation: IndexOperation) -> QueueResult<()> {
        self.shared.enqueue_wait(operation).await
    }

    /// Returns a commit hook that enqueues every committed operation.
    ///
    /// The hook never blocks the committing thread. Operations the queue
    /// cannot accept (full partition, closed queue) are dead-lettered so
    /// they can be replayed; malformed ones are logged and dropped.
    pub fn hook(&self) -> CommitHook {
        let shared = Arc::clone(&self.shared);
        Arc::new(move |operation: &IndexOperation| {
            let Err(err) = shared.enqueue(operation.clone()) else {
                return;
            };
            tracing::warn!(operation = %operation, error = %err, "index queue rejected operation");
            if matches!(err, QueueError::Full { .. } | QueueError::Closed) {
                shared.counters.record_rejected();
                let letter = DeadLetter::new(operation.clone(), 0, &err);
                if let Err(io) = shared.dead_letters.record(letter) {
                    tracing::error!(error = %io, "failed to persist dead letter");
                }
            }
        })
    }

    /// Waits until every operation enqueued before this call has settled.
    ///
    /// Settled means applied, skipped, found stale or dead-lettered.
    /// Returns [`QueueError::Closed`] after shutdown.
    pub async fn flush(&self) -> QueueResult<()> {
        self.shared.partitions.flush().await
    }

    /// Closes the partitions, lets workers drain them and waits for the workers.
    ///
    /// Calling it again is a no-op.
    pub async fn shutdown(&self) {
        if !self.shared.partitions.close() {
            return;
        }
        let workers = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "index worker failed");
            }
        }
        let stats = self.stats();
        tracing::info!(
            applied = stats.applied,
            dead_lettered = stats.dead_lettered,
            "index queue stopped"
        );
    }

    /// Returns true once shutdown has started.
    pub fn is_closed(&self) -> bool {
        self.shared.partitions.is_closed()
    }

    /// Returns the number of partitions.
    pub fn workers(&self) -> usize {
        self.shared.partitions.count()
    }

    /// Returns current counters.
    pub fn stats(&self) -> QueueStats {
        self.shared.counters.snapshot()
    }

    /// Returns the dispatcher the workers apply operations with.
    pub fn dispatcher(&self) -> &Arc<TaskDispatcher> {
        &self.dispatcher
    }

    /// Returns the dead-letter log.
    pub fn dead_letters(&self) -> &Arc<DeadLetterLog> {
        &self.shared.dead_letters
    }
}

impl Drop for IndexQueue {
    fn drop(&mut self) {
        // Workers finish what is queued, then exit on their own.
        self.shared.partitions.close();
    }
}

impl std::fmt::Debug for IndexQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexQueue")
            .field("workers", &self.workers())
            .field("closed", &self.is_closed())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
