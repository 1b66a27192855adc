//! Test fixtures and fault-injecting collaborators.
//!
//! Managers here wrap another [`IndexManager`] and add failures, delays or
//! panics in front of it, so tests can observe both the injected fault and
//! the state the wrapped index ends up in.

use indexsync_core::{
    CoreError, CoreResult, Entity, EntityId, EntityStore, EntityType, IndexError, IndexManager,
    IndexManagerRegistry, IndexResult, MemoryEntityStore, MemoryIndexManager, MemoryReporter,
    SiteId, TaskDispatcher,
};
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Entity type used by most fixtures.
pub fn page_type() -> EntityType {
    EntityType::new("webpage")
}

/// A page on site 1 with a title field.
pub fn page(id: u64, title: &str) -> Entity {
    page_on(SiteId::new(1), id, title)
}

/// A page on a given site with a title field.
pub fn page_on(site: SiteId, id: u64, title: &str) -> Entity {
    Entity::new(page_type(), id, site).with_field("title", title)
}

/// Which calls a [`FlakyManager`] fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePlan {
    /// Never fail.
    Never,
    /// Fail the first `n` calls with a retryable error.
    FirstN(usize),
    /// Fail every `k`-th call (1-based) with a retryable error.
    EveryNth(usize),
    /// Fail every call with a retryable error.
    Always,
    /// Fail every call with a non-retryable error.
    Fatal,
}

impl FailurePlan {
    fn fails(&self, call: usize) -> Option<IndexError> {
        let retryable = match self {
            FailurePlan::Never => false,
            FailurePlan::FirstN(n) => call <= *n,
            FailurePlan::EveryNth(k) => *k > 0 && call % *k == 0,
            FailurePlan::Always => true,
            FailurePlan::Fatal => return Some(IndexError::backend_fatal("mapping rejected")),
        };
        retryable.then(|| IndexError::backend_retryable(format!("injected failure on call {call}")))
    }
}

/// Index manager that fails according to a [`FailurePlan`].
pub struct FlakyManager {
    inner: Arc<dyn IndexManager>,
    plan: FailurePlan,
    calls: AtomicUsize,
    failures: AtomicUsize,
}

impl FlakyManager {
    /// Wraps a manager.
    pub fn new(inner: Arc<dyn IndexManager>, plan: FailurePlan) -> Self {
        Self {
            inner,
            plan,
            calls: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
        }
    }

    /// Returns the number of calls received.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Returns the number of calls that failed.
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    fn gate(&self) -> IndexResult<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        match self.plan.fails(call) {
            Some(error) => {
                self.failures.fetch_add(1, Ordering::SeqCst);
                tracing::debug!(call, "injecting index failure");
                Err(error)
            }
            None => Ok(()),
        }
    }
}

impl IndexManager for FlakyManager {
    fn entity_type(&self) -> &EntityType {
        self.inner.entity_type()
    }

    fn insert(&self, entity: &Entity) -> IndexResult<()> {
        self.gate()?;
        self.inner.insert(entity)
    }

    fn update(&self, entity: &Entity) -> IndexResult<()> {
        self.gate()?;
        self.inner.update(entity)
    }

    fn delete(&self, entity_id: &EntityId) -> IndexResult<()> {
        self.gate()?;
        self.inner.delete(entity_id)
    }

    fn clear(&self) -> IndexResult<()> {
        self.gate()?;
        self.inner.clear()
    }
}

/// Index manager that sleeps before writing.
pub struct SlowManager {
    inner: Arc<dyn IndexManager>,
    delay: Duration,
    updates_only: bool,
    remaining: AtomicUsize,
}

impl SlowManager {
    /// Delays every write by `delay`.
    pub fn new(inner: Arc<dyn IndexManager>, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            updates_only: false,
            remaining: AtomicUsize::new(usize::MAX),
        }
    }

    /// Only delays updates.
    #[must_use]
    pub fn updates_only(mut self) -> Self {
        self.updates_only = true;
        self
    }

    /// Only delays the first `n` delayable writes.
    #[must_use]
    pub fn times(self, n: usize) -> Self {
        self.remaining.store(n, Ordering::SeqCst);
        self
    }

    fn pause(&self, is_update: bool) {
        if self.updates_only && !is_update {
            return;
        }
        let took = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if took {
            std::thread::sleep(self.delay);
        }
    }
}

impl IndexManager for SlowManager {
    fn entity_type(&self) -> &EntityType {
        self.inner.entity_type()
    }

    fn insert(&self, entity: &Entity) -> IndexResult<()> {
        self.pause(false);
        self.inner.insert(entity)
    }

    fn update(&self, entity: &Entity) -> IndexResult<()> {
        self.pause(true);
        self.inner.update(entity)
    }

    fn delete(&self, entity_id: &EntityId) -> IndexResult<()> {
        self.pause(false);
        self.inner.delete(entity_id)
    }

    fn clear(&self) -> IndexResult<()> {
        self.inner.clear()
    }
}

/// Index manager that blocks writes for chosen entities until released.
///
/// Writes to other entities pass straight through. Tests must call
/// [`HangingManager::release`] before their runtime shuts down, since the
/// runtime waits for blocked writers.
pub struct HangingManager {
    inner: Arc<dyn IndexManager>,
    hang: BTreeSet<EntityId>,
    released: Mutex<bool>,
    wake: Condvar,
    blocked: AtomicUsize,
}

impl HangingManager {
    /// Blocks every write that targets one of `ids`.
    pub fn new(inner: Arc<dyn IndexManager>, ids: impl IntoIterator<Item = EntityId>) -> Self {
        Self {
            inner,
            hang: ids.into_iter().collect(),
            released: Mutex::new(false),
            wake: Condvar::new(),
            blocked: AtomicUsize::new(0),
        }
    }

    /// Unblocks every waiting and future write.
    pub fn release(&self) {
        *self.released.lock() = true;
        self.wake.notify_all();
    }

    /// Returns how many writes have blocked so far.
    pub fn blocked(&self) -> usize {
        self.blocked.load(Ordering::SeqCst)
    }

    fn wait(&self, entity_id: &EntityId) {
        if !self.hang.contains(entity_id) {
            return;
        }
        let mut released = self.released.lock();
        if *released {
            return;
        }
        self.blocked.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(entity = %entity_id, "index write hanging");
        while !*released {
            self.wake.wait(&mut released);
        }
    }
}

impl IndexManager for HangingManager {
    fn entity_type(&self) -> &EntityType {
        self.inner.entity_type()
    }

    fn insert(&self, entity: &Entity) -> IndexResult<()> {
        self.wait(&entity.id);
        self.inner.insert(entity)
    }

    fn update(&self, entity: &Entity) -> IndexResult<()> {
        self.wait(&entity.id);
        self.inner.update(entity)
    }

    fn delete(&self, entity_id: &EntityId) -> IndexResult<()> {
        self.wait(entity_id);
        self.inner.delete(entity_id)
    }

    fn clear(&self) -> IndexResult<()> {
        self.inner.clear()
    }
}

/// Index manager that panics on every write.
pub struct PanickingManager {
    entity_type: EntityType,
}

impl PanickingManager {
    /// Creates a manager for an entity type.
    pub fn new(entity_type: EntityType) -> Self {
        Self { entity_type }
    }
}

impl IndexManager for PanickingManager {
    fn entity_type(&self) -> &EntityType {
        &self.entity_type
    }

    fn insert(&self, _entity: &Entity) -> IndexResult<()> {
        panic!("index manager exploded");
    }

    fn update(&self, _entity: &Entity) -> IndexResult<()> {
        panic!("index manager exploded");
    }

    fn delete(&self, _entity_id: &EntityId) -> IndexResult<()> {
        panic!("index manager exploded");
    }

    fn clear(&self) -> IndexResult<()> {
        panic!("index manager exploded");
    }
}

/// A call received by a [`RecordingManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexCall {
    /// `insert` with the entity's id and title.
    Insert(EntityId, Option<String>),
    /// `update` with the entity's id and title.
    Update(EntityId, Option<String>),
    /// `delete`.
    Delete(EntityId),
    /// `clear`.
    Clear,
}

impl IndexCall {
    /// Returns the entity the call targeted, if any.
    pub fn entity_id(&self) -> Option<EntityId> {
        match self {
            IndexCall::Insert(id, _) | IndexCall::Update(id, _) | IndexCall::Delete(id) => {
                Some(*id)
            }
            IndexCall::Clear => None,
        }
    }
}

/// Map-backed index manager that records every call in order.
pub struct RecordingManager {
    entity_type: EntityType,
    calls: Mutex<Vec<IndexCall>>,
    documents: Mutex<BTreeMap<EntityId, Entity>>,
}

impl RecordingManager {
    /// Creates an empty manager.
    pub fn new(entity_type: EntityType) -> Self {
        Self {
            entity_type,
            calls: Mutex::new(Vec::new()),
            documents: Mutex::new(BTreeMap::new()),
        }
    }

    /// Returns all calls in the order received.
    pub fn calls(&self) -> Vec<IndexCall> {
        self.calls.lock().clone()
    }

    /// Returns the calls that targeted one entity.
    pub fn calls_for(&self, entity_id: &EntityId) -> Vec<IndexCall> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.entity_id().as_ref() == Some(entity_id))
            .cloned()
            .collect()
    }

    /// Returns true if a document is stored for the entity.
    pub fn contains(&self, entity_id: &EntityId) -> bool {
        self.documents.lock().contains_key(entity_id)
    }

    fn store(&self, entity: &Entity) {
        self.documents.lock().insert(entity.id, entity.clone());
    }
}

impl IndexManager for RecordingManager {
    fn entity_type(&self) -> &EntityType {
        &self.entity_type
    }

    fn insert(&self, entity: &Entity) -> IndexResult<()> {
        self.calls
            .lock()
            .push(IndexCall::Insert(entity.id, entity.title().map(str::to_string)));
        self.store(entity);
        Ok(())
    }

    fn update(&self, entity: &Entity) -> IndexResult<()> {
        self.calls
            .lock()
            .push(IndexCall::Update(entity.id, entity.title().map(str::to_string)));
        self.store(entity);
        Ok(())
    }

    fn delete(&self, entity_id: &EntityId) -> IndexResult<()> {
        self.calls.lock().push(IndexCall::Delete(*entity_id));
        self.documents.lock().remove(entity_id);
        Ok(())
    }

    fn clear(&self) -> IndexResult<()> {
        self.calls.lock().push(IndexCall::Clear);
        self.documents.lock().clear();
        Ok(())
    }
}

/// Entity store wrapper whose first `n` loads fail.
pub struct FailingStore {
    inner: Arc<dyn EntityStore>,
    remaining: AtomicUsize,
    loads: AtomicUsize,
}

impl FailingStore {
    /// Wraps a store; the first `failures` loads return a store error.
    pub fn new(inner: Arc<dyn EntityStore>, failures: usize) -> Self {
        Self {
            inner,
            remaining: AtomicUsize::new(failures),
            loads: AtomicUsize::new(0),
        }
    }

    /// Returns the number of load calls received.
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl EntityStore for FailingStore {
    fn load(&self, entity_type: &EntityType, entity_id: &EntityId) -> CoreResult<Option<Entity>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let fail = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(CoreError::store("database connection lost"));
        }
        self.inner.load(entity_type, entity_id)
    }

    fn list(&self, entity_type: &EntityType) -> CoreResult<Vec<Entity>> {
        self.inner.list(entity_type)
    }
}

/// A store, an in-memory page index and a dispatcher wired together.
pub struct TestPipeline {
    /// Authoritative store.
    pub store: Arc<MemoryEntityStore>,
    /// The page index behind any wrapping manager.
    pub index: Arc<MemoryIndexManager>,
    /// Records isolated failures.
    pub reporter: Arc<MemoryReporter>,
    /// Dispatcher over the pipeline's registry.
    pub dispatcher: Arc<TaskDispatcher>,
}

impl TestPipeline {
    /// Pipeline with the page index registered directly.
    pub fn new() -> Self {
        Self::build(|index| index, |store| store)
    }

    /// Pipeline whose page index is wrapped before registration.
    pub fn wrapped(wrap: impl FnOnce(Arc<dyn IndexManager>) -> Arc<dyn IndexManager>) -> Self {
        Self::build(wrap, |store| store)
    }

    /// Pipeline with both the page index and the store wrapped.
    pub fn build(
        wrap_index: impl FnOnce(Arc<dyn IndexManager>) -> Arc<dyn IndexManager>,
        wrap_store: impl FnOnce(Arc<dyn EntityStore>) -> Arc<dyn EntityStore>,
    ) -> Self {
        let index = Arc::new(MemoryIndexManager::new(page_type()));
        let base: Arc<dyn IndexManager> = index.clone();
        let registry = IndexManagerRegistry::builder()
            .register(wrap_index(base))
            .expect("fresh registry accepts the page manager")
            .build();

        let store = Arc::new(MemoryEntityStore::new());
        let base_store: Arc<dyn EntityStore> = store.clone();
        let reporter = Arc::new(MemoryReporter::new());
        let dispatcher = Arc::new(TaskDispatcher::new(
            registry,
            wrap_store(base_store),
            reporter.clone(),
        ));

        Self {
            store,
            index,
            reporter,
            dispatcher,
        }
    }

    /// Returns true if the page index mirrors the pages in the store.
    pub fn index_matches_store(&self) -> bool {
        let pages = self.store.list(&page_type()).unwrap_or_default();
        let mut ids: Vec<EntityId> = pages.iter().map(|p| p.id).collect();
        ids.sort();
        ids == self.index.ids()
            && pages.iter().all(|p| {
                self.index.get(&p.id).map(|d| d.title) == Some(p.title().map(str::to_string))
            })
    }
}

impl Default for TestPipeline {
    fn default() -> Self {
        Self::new()
    }
}
