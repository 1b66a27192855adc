//! Entity store collaborator and an in-memory implementation.
//!
//! The entity store is the authoritative persistence for domain entities.
//! The pipeline needs two things from it:
//! - Snapshots by key ([`EntityStore::load`]) to materialize inserts and updates
//! - Commit notifications ([`CommitHook`]) carrying the resulting [`IndexOperation`]
//!
//! [`MemoryEntityStore`] provides both and is what the tests and the CLI
//! simulation run against.
//!
//! # Usage
//!
//! ```rust,ignore
//! let store = MemoryEntityStore::new();
//! store.on_commit(queue.hook());
//! store.create(Entity::new("webpage".into(), 1u64, SiteId::new(1)))?;
//! ```

use crate::entity::Entity;
use crate::error::{CoreError, CoreResult};
use crate::operation::{IndexOperation, OperationKind};
use crate::types::{EntityId, EntityType, IndexKey, SequenceNumber};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Read access to authoritative entity snapshots.
pub trait EntityStore: Send + Sync {
    /// Loads the current snapshot of an entity, `None` if it does not exist.
    fn load(&self, entity_type: &EntityType, entity_id: &EntityId) -> CoreResult<Option<Entity>>;

    /// Lists every entity of a type. Used for full reindexing.
    fn list(&self, entity_type: &EntityType) -> CoreResult<Vec<Entity>>;
}

/// Callback invoked after a mutation commits.
///
/// Hooks run on the committing thread, after the store's data lock is
/// released and in commit order. They must not mutate the store.
pub type CommitHook = Arc<dyn Fn(&IndexOperation) + Send + Sync>;

/// In-memory entity store with commit notifications.
///
/// Every commit is assigned the next [`SequenceNumber`]. Commits are
/// serialized so hooks observe operations in sequence order; a hook must
/// not commit to the store it is registered on.
pub struct MemoryEntityStore {
    entities: RwLock<BTreeMap<IndexKey, Entity>>,
    hooks: RwLock<Vec<CommitHook>>,
    /// Serializes commit + notify. Held while hooks run.
    commit_lock: Mutex<()>,
    sequence: AtomicU64,
    attach_payloads: bool,
}

impl MemoryEntityStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            entities: RwLock::new(BTreeMap::new()),
            hooks: RwLock::new(Vec::new()),
            commit_lock: Mutex::new(()),
            sequence: AtomicU64::new(0),
            attach_payloads: false,
        }
    }

    /// Attaches the committed snapshot as payload to Insert and Update operations.
    #[must_use]
    pub fn with_payloads(mut self) -> Self {
        self.attach_payloads = true;
        self
    }

    /// Registers a commit hook.
    pub fn on_commit(&self, hook: CommitHook) {
        self.hooks.write().push(hook);
    }

    /// Returns the sequence number of the last commit.
    pub fn last_sequence(&self) -> SequenceNumber {
        SequenceNumber::new(self.sequence.load(Ordering::SeqCst))
    }

    fn advance(&self) -> SequenceNumber {
        SequenceNumber::new(self.sequence.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Returns the number of stored entities.
    pub fn len(&self) -> usize {
        self.entities.read().len()
    }

    /// Returns true if the store holds no entities.
    pub fn is_empty(&self) -> bool {
        self.entities.read().is_empty()
    }

    /// Creates a new entity. Fails if it already exists.
    pub fn create(&self, entity: Entity) -> CoreResult<IndexOperation> {
        let _commit = self.commit_lock.lock();
        let operation = {
            let mut entities = self.entities.write();
            let key = entity.key();
            if entities.contains_key(&key) {
                return Err(CoreError::EntityExists {
                    entity_type: key.entity_type,
                    entity_id: key.entity_id,
                });
            }
            let operation =
                self.operation_for(OperationKind::Insert, &entity, self.last_sequence().next())?;
            self.advance();
            entities.insert(key, entity);
            operation
        };
        self.notify(std::slice::from_ref(&operation));
        Ok(operation)
    }

    /// Replaces an existing entity. Fails if it does not exist.
    pub fn update(&self, entity: Entity) -> CoreResult<IndexOperation> {
        let _commit = self.commit_lock.lock();
        let operation = {
            let mut entities = self.entities.write();
            let key = entity.key();
            let Some(slot) = entities.get_mut(&key) else {
                return Err(CoreError::EntityNotFound {
                    entity_type: key.entity_type,
                    entity_id: key.entity_id,
                });
            };
            let operation =
                self.operation_for(OperationKind::Update, &entity, self.last_sequence().next())?;
            self.advance();
            *slot = entity;
            operation
        };
        self.notify(std::slice::from_ref(&operation));
        Ok(operation)
    }

    /// Creates or replaces an entity, emitting Insert or Update accordingly.
    pub fn save(&self, entity: Entity) -> CoreResult<IndexOperation> {
        let _commit = self.commit_lock.lock();
        let operation = {
            let mut entities = self.entities.write();
            let key = entity.key();
            let kind = if entities.contains_key(&key) {
                OperationKind::Update
            } else {
                OperationKind::Insert
            };
            let operation = self.operation_for(kind, &entity, self.last_sequence().next())?;
            self.advance();
            entities.insert(key, entity);
            operation
        };
        self.notify(std::slice::from_ref(&operation));
        Ok(operation)
    }

    /// Deletes an entity and, recursively, its children of the same type.
    ///
    /// Children are removed before their parents; each removal is its own
    /// Delete operation. Deleting an absent entity fails.
    pub fn delete(
        &self,
        entity_type: &EntityType,
        entity_id: &EntityId,
    ) -> CoreResult<Vec<IndexOperation>> {
        let _commit = self.commit_lock.lock();
        let operations = {
            let mut entities = self.entities.write();
            let root = IndexKey::new(entity_type.clone(), *entity_id);
            let Some(root_entity) = entities.get(&root) else {
                return Err(CoreError::EntityNotFound {
                    entity_type: entity_type.clone(),
                    entity_id: *entity_id,
                });
            };
            let site = root_entity.site;

            let mut order = Vec::new();
            collect_descendants(&entities, entity_type, *entity_id, &mut order);
            order.push(*entity_id);

            let mut operations = Vec::with_capacity(order.len());
            for id in order {
                if let Some(removed) = entities.remove(&IndexKey::new(entity_type.clone(), id)) {
                    operations.push(
                        IndexOperation::delete(entity_type.clone(), id)
                            .with_site(removed.site)
                            .with_sequence(self.advance()),
                    );
                }
            }
            tracing::debug!(
                entity_type = %entity_type,
                entity_id = %entity_id,
                site = %site,
                removed = operations.len(),
                "deleted entity"
            );
            operations
        };
        self.notify(&operations);
        Ok(operations)
    }

    /// Removes an entity without emitting a commit notification.
    ///
    /// Simulates a concurrent delete whose operation has not been delivered yet.
    pub fn remove_silently(
        &self,
        entity_type: &EntityType,
        entity_id: &EntityId,
    ) -> Option<Entity> {
        self.entities
            .write()
            .remove(&IndexKey::new(entity_type.clone(), *entity_id))
    }

    fn operation_for(
        &self,
        kind: OperationKind,
        entity: &Entity,
        sequence: SequenceNumber,
    ) -> CoreResult<IndexOperation> {
        let mut operation = IndexOperation::new(kind, entity.entity_type.clone(), entity.id)
            .with_site(entity.site)
            .with_sequence(sequence);
        if self.attach_payloads {
            operation = operation.with_payload(entity.to_payload()?);
        }
        Ok(operation)
    }

    fn notify(&self, operations: &[IndexOperation]) {
        let hooks = self.hooks.read().clone();
        for operation in operations {
            for hook in &hooks {
                if catch_unwind(AssertUnwindSafe(|| hook(operation))).is_err() {
                    tracing::error!(operation = %operation, "commit hook panicked");
                }
            }
        }
    }
}

fn collect_descendants(
    entities: &BTreeMap<IndexKey, Entity>,
    entity_type: &EntityType,
    parent: EntityId,
    out: &mut Vec<EntityId>,
) {
    let children: Vec<EntityId> = entities
        .values()
        .filter(|e| &e.entity_type == entity_type && e.parent == Some(parent))
        .map(|e| e.id)
        .collect();
    for child in children {
        collect_descendants(entities, entity_type, child, out);
        out.push(child);
    }
}

impl Default for MemoryEntityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityStore for MemoryEntityStore {
    fn load(&self, entity_type: &EntityType, entity_id: &EntityId) -> CoreResult<Option<Entity>> {
        Ok(self
            .entities
            .read()
            .get(&IndexKey::new(entity_type.clone(), *entity_id))
            .cloned())
    }

    fn list(&self, entity_type: &EntityType) -> CoreResult<Vec<Entity>> {
        Ok(self
            .entities
            .read()
            .values()
            .filter(|e| &e.entity_type == entity_type)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SiteId;

    fn page_type() -> EntityType {
        EntityType::new("webpage")
    }

    fn page(id: u64) -> Entity {
        Entity::new(page_type(), id, SiteId::new(1)).with_field("title", format!("Page {id}"))
    }

    fn recording(store: &MemoryEntityStore) -> Arc<Mutex<Vec<IndexOperation>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        store.on_commit(Arc::new(move |op: &IndexOperation| sink.lock().push(op.clone())));
        seen
    }

    #[test]
    fn create_emits_insert() {
        let store = MemoryEntityStore::new();
        let seen = recording(&store);

        store.create(page(1)).unwrap();

        let ops = seen.lock().clone();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].kind, OperationKind::Insert);
        assert_eq!(ops[0].sequence, SequenceNumber::new(1));
        assert_eq!(ops[0].site, Some(SiteId::new(1)));
        assert!(store.load(&page_type(), &EntityId::Int(1)).unwrap().is_some());
    }

    #[test]
    fn create_existing_fails_without_notification() {
        let store = MemoryEntityStore::new();
        store.create(page(1)).unwrap();
        let seen = recording(&store);

        let result = store.create(page(1));
        assert!(matches!(result, Err(CoreError::EntityExists { .. })));
        assert!(seen.lock().is_empty());
        assert_eq!(store.last_sequence(), SequenceNumber::new(1));
    }

    #[test]
    fn update_missing_fails() {
        let store = MemoryEntityStore::new();
        assert!(matches!(
            store.update(page(1)),
            Err(CoreError::EntityNotFound { .. })
        ));
    }

    #[test]
    fn save_picks_insert_or_update() {
        let store = MemoryEntityStore::new();
        assert_eq!(store.save(page(1)).unwrap().kind, OperationKind::Insert);
        assert_eq!(store.save(page(1)).unwrap().kind, OperationKind::Update);
    }

    #[test]
    fn sequences_follow_commit_order() {
        let store = MemoryEntityStore::new();
        let seen = recording(&store);

        store.create(page(1)).unwrap();
        store.create(page(2)).unwrap();
        store.update(page(1)).unwrap();

        let sequences: Vec<u64> = seen.lock().iter().map(|op| op.sequence.as_u64()).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
    }

    #[test]
    fn delete_cascades_children_first() {
        let store = MemoryEntityStore::new();
        store.create(page(1)).unwrap();
        store.create(page(2).with_parent(1u64)).unwrap();
        store.create(page(3).with_parent(2u64)).unwrap();
        store.create(page(4)).unwrap();
        let seen = recording(&store);

        let ops = store.delete(&page_type(), &EntityId::Int(1)).unwrap();

        let ids: Vec<EntityId> = ops.iter().map(|op| op.entity_id).collect();
        assert_eq!(ids, vec![EntityId::Int(3), EntityId::Int(2), EntityId::Int(1)]);
        assert!(ops.iter().all(|op| op.kind == OperationKind::Delete));
        assert_eq!(seen.lock().len(), 3);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn delete_missing_fails() {
        let store = MemoryEntityStore::new();
        let result = store.delete(&page_type(), &EntityId::Int(9));
        assert!(matches!(result, Err(CoreError::EntityNotFound { .. })));
    }

    #[test]
    fn payloads_attached_when_enabled() {
        let store = MemoryEntityStore::new().with_payloads();
        let op = store.create(page(1)).unwrap();
        let snapshot = Entity::from_payload(op.payload.as_deref().unwrap()).unwrap();
        assert_eq!(snapshot, page(1));

        let delete = store.delete(&page_type(), &EntityId::Int(1)).unwrap();
        assert!(delete[0].payload.is_none());
    }

    #[test]
    fn panicking_hook_is_isolated() {
        let store = MemoryEntityStore::new();
        store.on_commit(Arc::new(|_: &IndexOperation| panic!("hook failure")));
        let seen = recording(&store);

        assert!(store.create(page(1)).is_ok());
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn remove_silently_skips_hooks() {
        let store = MemoryEntityStore::new();
        store.create(page(1)).unwrap();
        let seen = recording(&store);

        assert!(store.remove_silently(&page_type(), &EntityId::Int(1)).is_some());
        assert!(seen.lock().is_empty());
        assert!(store.load(&page_type(), &EntityId::Int(1)).unwrap().is_none());
    }

    #[test]
    fn list_filters_by_type() {
        let store = MemoryEntityStore::new();
        store.create(page(1)).unwrap();
        store.create(page(2)).unwrap();
        store
            .create(Entity::new(EntityType::new("layout"), 1u64, SiteId::new(1)))
            .unwrap();

        assert_eq!(store.list(&page_type()).unwrap().len(), 2);
    }
}
