//! # IndexSync Core
//!
//! Keeps a secondary search index consistent with authoritative entity
//! mutations.
//!
//! This crate provides:
//! - Entity, identifier and [`IndexOperation`] types
//! - The [`EntityStore`] collaborator trait and an in-memory store with commit hooks
//! - The [`IndexManager`] capability trait and an in-memory token index
//! - The [`IndexManagerRegistry`] mapping entity types to managers
//! - Index management tasks (insert, update, delete) sharing one lifecycle
//! - The [`TaskDispatcher`], which isolates index failures from callers
//!
//! ## Key Invariants
//!
//! - At most one manager per entity type; unregistered types are skipped
//! - Index managers are idempotent (at-least-once delivery)
//! - A vanished entity degrades an insert or update into a delete
//! - Operations older than the last applied one for a key are ignored
//! - Index failures never reach the code that committed the mutation

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod dispatcher;
mod entity;
mod error;
mod manager;
mod memory_index;
mod operation;
mod registry;
mod report;
mod store;
mod task;
mod types;

pub use dispatcher::{DispatcherStats, TaskDispatcher};
pub use entity::Entity;
pub use error::{CoreError, CoreResult, IndexError, IndexResult};
pub use manager::{IndexDocument, IndexManager};
pub use memory_index::{MemoryIndexManager, TokenizerConfig};
pub use operation::{IndexOperation, OperationKind};
pub use registry::{IndexManagerRegistry, RegistryBuilder};
pub use report::{FailureReport, FailureReporter, MemoryReporter, NullReporter, TracingReporter};
pub use store::{CommitHook, EntityStore, MemoryEntityStore};
pub use task::{IndexTask, TaskContext, TaskKind, TaskOutcome};
pub use types::{EntityId, EntityType, IndexKey, SequenceNumber, SiteId};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
