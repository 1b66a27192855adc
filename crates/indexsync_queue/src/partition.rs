//! Key-hash partitioning.
//!
//! Every [`IndexKey`] maps to exactly one partition, and each partition is
//! a bounded FIFO channel drained by a single worker. Operations for one
//! key are therefore applied in the order they were enqueued.

use crate::error::{QueueError, QueueResult};
use indexsync_core::{IndexKey, IndexOperation};
use parking_lot::RwLock;
use std::hash::{DefaultHasher, Hash, Hasher};
use tokio::sync::{mpsc, oneshot};

/// Message delivered to a worker.
#[derive(Debug)]
pub(crate) enum Job {
    /// Apply an operation.
    Apply(IndexOperation),
    /// Acknowledge once everything queued before has settled.
    Flush(oneshot::Sender<()>),
}

/// Returns the partition a key is routed to.
pub(crate) fn partition_for(key: &IndexKey, partitions: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % partitions.max(1) as u64) as usize
}

/// Sending halves of all partitions.
///
/// Closing drops the senders; workers drain what is left and stop.
pub(crate) struct Partitions {
    count: usize,
    senders: RwLock<Option<Vec<mpsc::Sender<Job>>>>,
}

impl Partitions {
    /// Creates `count` partitions and returns the receivers, in partition order.
    pub(crate) fn new(count: usize, capacity: usize) -> (Self, Vec<mpsc::Receiver<Job>>) {
        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..count).map(|_| mpsc::channel(capacity)).unzip();
        (
            Self {
                count,
                senders: RwLock::new(Some(senders)),
            },
            receivers,
        )
    }

    pub(crate) fn count(&self) -> usize {
        self.count
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.senders.read().is_none()
    }

    fn sender(&self, partition: usize) -> QueueResult<mpsc::Sender<Job>> {
        self.senders
            .read()
            .as_ref()
            .and_then(|senders| senders.get(partition).cloned())
            .ok_or(QueueError::Closed)
    }

    /// Enqueues without waiting. Returns the partition used.
    pub(crate) fn try_send(&self, operation: IndexOperation) -> QueueResult<usize> {
        let partition = partition_for(&operation.key(), self.count);
        let guard = self.senders.read();
        let sender = guard
            .as_ref()
            .and_then(|senders| senders.get(partition))
            .ok_or(QueueError::Closed)?;
        sender.try_send(Job::Apply(operation)).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => QueueError::Full { partition },
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
        })?;
        Ok(partition)
    }

    /// Enqueues, waiting for capacity. Returns the partition used.
    pub(crate) async fn send(&self, operation: IndexOperation) -> QueueResult<usize> {
        let partition = partition_for(&operation.key(), self.count);
        let sender = self.sender(partition)?;
        sender
            .send(Job::Apply(operation))
            .await
            .map_err(|_| QueueError::Closed)?;
        Ok(partition)
    }

    /// Waits until every partition has settled the jobs queued before this call.
    pub(crate) async fn flush(&self) -> QueueResult<()> {
        let mut acks = Vec::with_capacity(self.count);
        for partition in 0..self.count {
            let (tx, rx) = oneshot::channel();
            self.sender(partition)?
                .send(Job::Flush(tx))
                .await
                .map_err(|_| QueueError::Closed)?;
            acks.push(rx);
        }
        for ack in acks {
            ack.await.map_err(|_| QueueError::Closed)?;
        }
        Ok(())
    }

    /// Drops the senders. Returns false if already closed.
    pub(crate) fn close(&self) -> bool {
        self.senders.write().take().is_some()
    }
}
