//! Partition worker: apply, retry, time out, dead-letter.

use crate::config::QueueConfig;
use crate::dead_letter::{DeadLetter, DeadLetterLog};
use crate::partition::Job;
use crate::stats::QueueCounters;
use indexsync_core::{
    IndexError, IndexKey, IndexOperation, IndexResult, TaskDispatcher, TaskOutcome,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// An attempt that outlived its timeout and still runs on the blocking pool.
struct Abandoned {
    operation: IndexOperation,
    handle: JoinHandle<IndexResult<TaskOutcome>>,
}

/// Drains one partition.
///
/// A worker processes one operation at a time. Attempts run on the blocking
/// pool because index managers are synchronous. An attempt that times out is
/// left running and parked per key; the next attempt for that key first
/// waits on it, within its own timeout, and never starts a second apply for
/// the key while the first is still running. Other keys keep flowing.
pub(crate) struct Worker {
    id: usize,
    receiver: mpsc::Receiver<Job>,
    dispatcher: Arc<TaskDispatcher>,
    dead_letters: Arc<DeadLetterLog>,
    config: QueueConfig,
    counters: Arc<QueueCounters>,
    abandoned: HashMap<IndexKey, Abandoned>,
}

impl Worker {
    pub(crate) fn new(
        id: usize,
        receiver: mpsc::Receiver<Job>,
        dispatcher: Arc<TaskDispatcher>,
        dead_letters: Arc<DeadLetterLog>,
        config: QueueConfig,
        counters: Arc<QueueCounters>,
    ) -> Self {
        Self {
            id,
            receiver,
            dispatcher,
            dead_letters,
            config,
            counters,
            abandoned: HashMap::new(),
        }
    }

    /// Runs until the partition is closed and drained.
    pub(crate) async fn run(mut self) {
        tracing::debug!(worker = self.id, "index worker started");
        while let Some(job) = self.receiver.recv().await {
            self.abandoned.retain(|_, pending| !pending.handle.is_finished());
            match job {
                Job::Apply(operation) => self.process(operation).await,
                Job::Flush(ack) => {
                    // The flusher may have given up waiting.
                    let _ = ack.send(());
                }
            }
        }
        if !self.abandoned.is_empty() {
            tracing::warn!(
                worker = self.id,
                pending = self.abandoned.len(),
                "index worker stopped with timed-out applies still running"
            );
        }
        tracing::debug!(worker = self.id, "index worker stopped");
    }

    async fn process(&mut self, operation: IndexOperation) {
        let max_attempts = self.config.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let error = match self.attempt(&operation).await {
                Ok(outcome) => {
                    self.counters.record_applied();
                    tracing::debug!(
                        worker = self.id,
                        operation = %operation,
                        outcome = ?outcome,
                        attempt,
                        "index operation settled"
                    );
                    return;
                }
                Err(error) => error,
            };

            self.dispatcher.reporter().report_failure(&operation, &error);

            if error.is_retryable() && attempt < max_attempts {
                let delay = self.config.retry.delay_for_attempt(attempt);
                self.counters.record_retry();
                tracing::debug!(
                    worker = self.id,
                    operation = %operation,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "retrying index operation"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            self.dead_letter(operation, attempt, &error);
            return;
        }
    }

    /// One attempt, bounded by the apply timeout.
    ///
    /// When an earlier attempt for the same key is still running, this
    /// attempt spends its timeout waiting on that one instead. If it was
    /// the same operation and it succeeded, its outcome is taken as this
    /// attempt's.
    async fn attempt(&mut self, operation: &IndexOperation) -> IndexResult<TaskOutcome> {
        let deadline = Instant::now() + self.config.apply_timeout;
        let key = operation.key();

        if let Some(mut pending) = self.abandoned.remove(&key) {
            match tokio::time::timeout_at(deadline, &mut pending.handle).await {
                Ok(Ok(Ok(outcome))) if pending.operation == *operation => {
                    tracing::debug!(
                        worker = self.id,
                        operation = %operation,
                        "timed-out apply finished late"
                    );
                    return Ok(outcome);
                }
                Ok(_) => {}
                Err(_) => {
                    self.abandoned.insert(key, pending);
                    return Err(self.timed_out(operation));
                }
            }
        }

        let dispatcher = Arc::clone(&self.dispatcher);
        let owned = operation.clone();
        let mut handle = tokio::task::spawn_blocking(move || dispatcher.try_dispatch(&owned));

        match tokio::time::timeout_at(deadline, &mut handle).await {
            Ok(joined) => joined.unwrap_or_else(|err| Err(IndexError::Panicked(err.to_string()))),
            Err(_) => {
                let pending = Abandoned {
                    operation: operation.clone(),
                    handle,
                };
                self.abandoned.insert(key, pending);
                Err(self.timed_out(operation))
            }
        }
    }

    fn timed_out(&self, operation: &IndexOperation) -> IndexError {
        self.counters.record_timeout();
        let timeout_ms = u64::try_from(self.config.apply_timeout.as_millis()).unwrap_or(u64::MAX);
        tracing::warn!(
            worker = self.id,
            operation = %operation,
            timeout_ms,
            "index operation timed out"
        );
        IndexError::Timeout
    }

    fn dead_letter(&self, operation: IndexOperation, attempts: u32, error: &IndexError) {
        tracing::error!(
            worker = self.id,
            operation = %operation,
            attempts,
            error = %error,
            "index operation dead-lettered"
        );
        self.counters.record_dead_letter();
        if let Err(err) = self.dead_letters.record(DeadLetter::new(operation, attempts, error)) {
            tracing::error!(error = %err, "failed to persist dead letter");
        }
    }
}
