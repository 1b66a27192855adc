//! Task dispatching and failure isolation.
//!
//! The dispatcher turns an [`IndexOperation`] into the matching
//! [`IndexTask`] and runs it. Two entry points exist:
//!
//! - [`TaskDispatcher::try_dispatch`] returns failures, for callers that
//!   retry (the asynchronous queue)
//! - [`TaskDispatcher::dispatch`] never fails; failures go to the
//!   [`FailureReporter`]
//!
//! Index failures must never reach the code that committed the mutation.
//! Panics raised by a manager are caught and converted into
//! [`IndexError::Panicked`].

use crate::error::{IndexError, IndexResult};
use crate::operation::IndexOperation;
use crate::registry::IndexManagerRegistry;
use crate::report::FailureReporter;
use crate::store::EntityStore;
use crate::task::{IndexTask, TaskContext, TaskKind, TaskOutcome};
use crate::types::{EntityType, IndexKey, SequenceNumber};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Point-in-time dispatcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    /// Insert tasks applied.
    pub inserted: u64,
    /// Update tasks applied.
    pub updated: u64,
    /// Delete tasks applied.
    pub deleted: u64,
    /// Operations for unregistered entity types.
    pub skipped: u64,
    /// Inserts and updates degraded to deletes.
    pub degraded: u64,
    /// Operations ignored because a newer one was already applied.
    pub stale: u64,
    /// Attempts that failed, panics included.
    pub failed: u64,
}

impl DispatcherStats {
    /// Returns the number of operations that reached a manager successfully.
    pub fn applied(&self) -> u64 {
        self.inserted + self.updated + self.deleted + self.degraded
    }
}

#[derive(Debug, Default)]
struct Counters {
    inserted: AtomicU64,
    updated: AtomicU64,
    deleted: AtomicU64,
    skipped: AtomicU64,
    degraded: AtomicU64,
    stale: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn record(&self, outcome: &TaskOutcome) {
        let counter = match outcome {
            TaskOutcome::Applied(TaskKind::Insert) => &self.inserted,
            TaskOutcome::Applied(TaskKind::Update) => &self.updated,
            TaskOutcome::Applied(TaskKind::Delete) => &self.deleted,
            TaskOutcome::Skipped => &self.skipped,
            TaskOutcome::Degraded => &self.degraded,
            TaskOutcome::Stale => &self.stale,
            TaskOutcome::Failed(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> DispatcherStats {
        DispatcherStats {
            inserted: self.inserted.load(Ordering::Relaxed),
            updated: self.updated.load(Ordering::Relaxed),
            deleted: self.deleted.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Runs index tasks for committed operations.
///
/// The dispatcher remembers the last applied [`SequenceNumber`] per
/// indexed [`IndexKey`]. A sequenced operation that is not newer than that
/// is reported as [`TaskOutcome::Stale`] and not applied. Unsequenced
/// operations are always applied.
///
/// A key is forgotten once its document is deleted, so the map only holds
/// keys with a live document. Any insert or update for a forgotten key
/// reloads the store's current snapshot, and degrades to a delete when the
/// entity is gone, so a late update cannot bring back a deleted entity.
pub struct TaskDispatcher {
    registry: IndexManagerRegistry,
    store: Arc<dyn EntityStore>,
    reporter: Arc<dyn FailureReporter>,
    applied: Mutex<HashMap<IndexKey, SequenceNumber>>,
    counters: Counters,
}

impl TaskDispatcher {
    /// Creates a dispatcher.
    pub fn new(
        registry: IndexManagerRegistry,
        store: Arc<dyn EntityStore>,
        reporter: Arc<dyn FailureReporter>,
    ) -> Self {
        Self {
            registry,
            store,
            reporter,
            applied: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    /// Returns the failure reporter.
    pub fn reporter(&self) -> &Arc<dyn FailureReporter> {
        &self.reporter
    }

    /// Returns current counters.
    pub fn stats(&self) -> DispatcherStats {
        self.counters.snapshot()
    }

    /// Returns the last applied sequence for a key, if any.
    pub fn last_applied(&self, key: &IndexKey) -> Option<SequenceNumber> {
        self.applied.lock().get(key).copied()
    }

    /// Returns the number of keys the stale guard currently tracks.
    pub fn tracked_keys(&self) -> usize {
        self.applied.lock().len()
    }

    /// Applies an operation once and returns the failure, if any.
    ///
    /// Panics raised while applying are converted into
    /// [`IndexError::Panicked`]. Nothing is reported; that is left to the
    /// caller, which decides whether to retry.
    pub fn try_dispatch(&self, operation: &IndexOperation) -> IndexResult<TaskOutcome> {
        let result = self.attempt(operation);
        match &result {
            Ok(outcome) => self.counters.record(outcome),
            Err(error) => self.counters.record(&TaskOutcome::Failed(error.clone())),
        }
        result
    }

    /// Applies an operation, isolating every failure.
    ///
    /// Failures are handed to the reporter and returned as
    /// [`TaskOutcome::Failed`] for observability only.
    pub fn dispatch(&self, operation: &IndexOperation) -> TaskOutcome {
        match self.try_dispatch(operation) {
            Ok(outcome) => outcome,
            Err(error) => {
                self.reporter.report_failure(operation, &error);
                TaskOutcome::Failed(error)
            }
        }
    }

    /// Rebuilds the index of one entity type from the store.
    ///
    /// Clears the manager's index, then inserts every entity the store
    /// lists for the type. Returns the number of entities indexed; an
    /// unregistered type indexes nothing.
    pub fn reindex(&self, entity_type: &EntityType) -> IndexResult<usize> {
        let Some(manager) = self.registry.resolve(entity_type) else {
            tracing::debug!(
                entity_type = %entity_type,
                "reindex skipped, no index manager registered"
            );
            return Ok(0);
        };

        let entities = self.store.list(entity_type)?;
        guard(|| {
            manager.clear()?;
            for entity in &entities {
                manager.insert(entity)?;
            }
            Ok(())
        })?;

        tracing::info!(entity_type = %entity_type, count = entities.len(), "reindexed");
        Ok(entities.len())
    }

    fn attempt(&self, operation: &IndexOperation) -> IndexResult<TaskOutcome> {
        operation.validate()?;

        if self.is_stale(operation) {
            tracing::debug!(operation = %operation, "ignoring stale index operation");
            return Ok(TaskOutcome::Stale);
        }

        let task = IndexTask::for_operation(operation.clone());
        let ctx = TaskContext {
            registry: &self.registry,
            store: self.store.as_ref(),
        };
        let outcome = guard(|| task.run(&ctx))?;

        match outcome {
            TaskOutcome::Applied(TaskKind::Delete) | TaskOutcome::Degraded => {
                self.applied.lock().remove(&operation.key());
            }
            TaskOutcome::Applied(_) => self.record_applied(operation),
            TaskOutcome::Skipped | TaskOutcome::Stale | TaskOutcome::Failed(_) => {}
        }
        Ok(outcome)
    }

    fn is_stale(&self, operation: &IndexOperation) -> bool {
        operation.sequence.is_sequenced()
            && self
                .applied
                .lock()
                .get(&operation.key())
                .is_some_and(|last| *last >= operation.sequence)
    }

    fn record_applied(&self, operation: &IndexOperation) {
        if !operation.sequence.is_sequenced() {
            return;
        }
        let mut applied = self.applied.lock();
        let last = applied.entry(operation.key()).or_default();
        if operation.sequence > *last {
            *last = operation.sequence;
        }
    }
}

impl std::fmt::Debug for TaskDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDispatcher")
            .field("registry", &self.registry)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

fn guard<T>(f: impl FnOnce() -> IndexResult<T>) -> IndexResult<T> {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        let message = panic_message(payload.as_ref());
        tracing::error!(panic = %message, "index manager panicked");
        Err(IndexError::Panicked(message))
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
