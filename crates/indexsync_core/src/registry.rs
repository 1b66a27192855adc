//! Index manager registry.

use crate::error::{CoreError, CoreResult};
use crate::manager::IndexManager;
use crate::types::EntityType;
use std::collections::HashMap;
use std::sync::Arc;

/// Read-only mapping from entity type to its index manager.
///
/// Built once at process start with a [`RegistryBuilder`] and passed
/// explicitly to the dispatcher. Cloning shares the same map.
#[derive(Clone, Default)]
pub struct IndexManagerRegistry {
    managers: Arc<HashMap<EntityType, Arc<dyn IndexManager>>>,
}

impl IndexManagerRegistry {
    /// Starts building a registry.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Returns an empty registry. Every operation dispatched against it is skipped.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Looks up the manager for an entity type.
    ///
    /// `None` means the type is intentionally unindexed.
    pub fn resolve(&self, entity_type: &EntityType) -> Option<Arc<dyn IndexManager>> {
        self.managers.get(entity_type).cloned()
    }

    /// Returns true if a manager is registered for the type.
    pub fn contains(&self, entity_type: &EntityType) -> bool {
        self.managers.contains_key(entity_type)
    }

    /// Returns the registered entity types, sorted.
    pub fn entity_types(&self) -> Vec<EntityType> {
        let mut types: Vec<EntityType> = self.managers.keys().cloned().collect();
        types.sort();
        types
    }

    /// Returns the number of registered managers.
    pub fn len(&self) -> usize {
        self.managers.len()
    }

    /// Returns true if no managers are registered.
    pub fn is_empty(&self) -> bool {
        self.managers.is_empty()
    }
}

impl std::fmt::Debug for IndexManagerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexManagerRegistry")
            .field("entity_types", &self.entity_types())
            .finish()
    }
}

/// Builder for [`IndexManagerRegistry`].
#[derive(Default)]
pub struct RegistryBuilder {
    managers: HashMap<EntityType, Arc<dyn IndexManager>>,
}

impl RegistryBuilder {
    /// Registers a manager under the entity type it reports.
    ///
    /// Fails if a manager is already registered for that type.
    pub fn register(mut self, manager: Arc<dyn IndexManager>) -> CoreResult<Self> {
        let entity_type = manager.entity_type().clone();
        if entity_type.is_blank() {
            return Err(CoreError::malformed("index manager reports an empty entity type"));
        }
        if self.managers.contains_key(&entity_type) {
            return Err(CoreError::DuplicateManager { entity_type });
        }
        tracing::debug!(entity_type = %entity_type, "registered index manager");
        self.managers.insert(entity_type, manager);
        Ok(self)
    }

    /// Freezes the registry.
    pub fn build(self) -> IndexManagerRegistry {
        IndexManagerRegistry {
            managers: Arc::new(self.managers),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_index::MemoryIndexManager;

    fn manager(name: &str) -> Arc<dyn IndexManager> {
        Arc::new(MemoryIndexManager::new(EntityType::new(name)))
    }

    #[test]
    fn resolve_registered_type() {
        let registry = IndexManagerRegistry::builder()
            .register(manager("webpage"))
            .unwrap()
            .register(manager("media_file"))
            .unwrap()
            .build();

        assert_eq!(registry.len(), 2);
        let resolved = registry.resolve(&EntityType::new("webpage")).unwrap();
        assert_eq!(resolved.entity_type().as_str(), "webpage");
        assert_eq!(
            registry.entity_types(),
            vec![EntityType::new("media_file"), EntityType::new("webpage")]
        );
    }

    #[test]
    fn resolve_unregistered_is_none() {
        let registry = IndexManagerRegistry::builder()
            .register(manager("webpage"))
            .unwrap()
            .build();

        assert!(registry.resolve(&EntityType::new("layout")).is_none());
        assert!(!registry.contains(&EntityType::new("layout")));
        assert!(IndexManagerRegistry::empty().is_empty());
    }

    #[test]
    fn duplicate_registration_fails() {
        let result = IndexManagerRegistry::builder()
            .register(manager("webpage"))
            .unwrap()
            .register(manager("webpage"));

        assert!(matches!(result, Err(CoreError::DuplicateManager { .. })));
    }

    #[test]
    fn blank_entity_type_rejected() {
        let result = IndexManagerRegistry::builder().register(manager(" "));
        assert!(matches!(result, Err(CoreError::MalformedOperation { .. })));
    }

    #[test]
    fn clones_share_managers() {
        let registry = IndexManagerRegistry::builder()
            .register(manager("webpage"))
            .unwrap()
            .build();
        let clone = registry.clone();

        let a = registry.resolve(&EntityType::new("webpage")).unwrap();
        let b = clone.resolve(&EntityType::new("webpage")).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
