//! Index management tasks.
//!
//! Every task follows the same lifecycle:
//! 1. Resolve the manager for the entity type (absent: skip)
//! 2. Materialize the entity snapshot (insert and update only)
//! 3. Apply the matching manager call
//!
//! A snapshot that no longer exists means a delete raced the operation.
//! The store is the ground truth, so the task deletes the document instead.
//! Errors are returned to the caller; isolating them is the dispatcher's job.

use crate::entity::Entity;
use crate::error::IndexResult;
use crate::manager::IndexManager;
use crate::operation::{IndexOperation, OperationKind};
use crate::registry::IndexManagerRegistry;
use crate::store::EntityStore;
use std::fmt;

/// Variant of an index management task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// Index a new entity.
    Insert,
    /// Re-index a changed entity.
    Update,
    /// Remove an entity's document.
    Delete,
}

impl TaskKind {
    /// Returns true if the task loads the entity before applying.
    pub fn materializes(&self) -> bool {
        !matches!(self, TaskKind::Delete)
    }

    /// Returns the label used in logs and stats.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Insert => "insert",
            TaskKind::Update => "update",
            TaskKind::Delete => "delete",
        }
    }

    fn apply(&self, manager: &dyn IndexManager, entity: &Entity) -> IndexResult<()> {
        match self {
            TaskKind::Insert => manager.insert(entity),
            TaskKind::Update => manager.update(entity),
            TaskKind::Delete => manager.delete(&entity.id),
        }
    }
}

impl From<OperationKind> for TaskKind {
    fn from(kind: OperationKind) -> Self {
        match kind {
            OperationKind::Insert => TaskKind::Insert,
            OperationKind::Update => TaskKind::Update,
            OperationKind::Delete => TaskKind::Delete,
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// No manager is registered for the entity type.
    Skipped,
    /// The operation was applied as requested.
    Applied(TaskKind),
    /// The entity vanished before materialization; its document was deleted.
    Degraded,
    /// A newer operation for the same key was already applied.
    Stale,
    /// Applying failed. Only produced by isolating callers.
    Failed(crate::error::IndexError),
}

impl TaskOutcome {
    /// Returns true unless the outcome is a failure.
    pub fn is_success(&self) -> bool {
        !matches!(self, TaskOutcome::Failed(_))
    }
}

/// Collaborators a task runs against.
#[derive(Clone, Copy)]
pub struct TaskContext<'a> {
    /// Manager lookup.
    pub registry: &'a IndexManagerRegistry,
    /// Authoritative snapshots.
    pub store: &'a dyn EntityStore,
}

/// One index management task.
#[derive(Debug, Clone)]
pub struct IndexTask {
    kind: TaskKind,
    operation: IndexOperation,
}

impl IndexTask {
    /// Builds the task variant matching the operation kind.
    pub fn for_operation(operation: IndexOperation) -> Self {
        Self {
            kind: operation.kind.into(),
            operation,
        }
    }

    /// Returns the task variant.
    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    /// Returns the operation being applied.
    pub fn operation(&self) -> &IndexOperation {
        &self.operation
    }

    /// Runs the task lifecycle once.
    pub fn run(&self, ctx: &TaskContext<'_>) -> IndexResult<TaskOutcome> {
        let op = &self.operation;

        let Some(manager) = ctx.registry.resolve(&op.entity_type) else {
            tracing::trace!(entity_type = %op.entity_type, "no index manager registered, skipping");
            return Ok(TaskOutcome::Skipped);
        };

        if !self.kind.materializes() {
            manager.delete(&op.entity_id)?;
            tracing::debug!(task = %self.kind, key = %op.key(), "applied index task");
            return Ok(TaskOutcome::Applied(self.kind));
        }

        let Some(entity) = ctx.store.load(&op.entity_type, &op.entity_id)? else {
            tracing::debug!(
                task = %self.kind,
                key = %op.key(),
                "entity vanished before indexing, deleting document instead"
            );
            manager.delete(&op.entity_id)?;
            return Ok(TaskOutcome::Degraded);
        };

        self.kind.apply(manager.as_ref(), &entity)?;
        tracing::debug!(task = %self.kind, key = %op.key(), "applied index task");
        Ok(TaskOutcome::Applied(self.kind))
    }
}
