//! Entity snapshots.

use crate::error::{CoreError, CoreResult};
use crate::types::{EntityId, EntityType, IndexKey, SiteId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A snapshot of a persisted domain object (webpage, document, media file...).
///
/// Entities are owned by the entity store. The pipeline only ever reads
/// snapshots and never mutates them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Entity identifier.
    pub id: EntityId,
    /// Entity type tag.
    pub entity_type: EntityType,
    /// Owning site.
    pub site: SiteId,
    /// Parent entity, for hierarchical documents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<EntityId>,
    /// Field values.
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
}

impl Entity {
    /// Creates an entity with no fields.
    pub fn new(entity_type: EntityType, id: impl Into<EntityId>, site: SiteId) -> Self {
        Self {
            id: id.into(),
            entity_type,
            site,
            parent: None,
            fields: BTreeMap::new(),
        }
    }

    /// Sets a field value.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Sets the parent entity.
    #[must_use]
    pub fn with_parent(mut self, parent: impl Into<EntityId>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Returns a field value.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Returns the `title` field as text, if present.
    pub fn title(&self) -> Option<&str> {
        self.field("title").and_then(Value::as_str)
    }

    /// Returns the key this entity is indexed under.
    pub fn key(&self) -> IndexKey {
        IndexKey::new(self.entity_type.clone(), self.id)
    }

    /// Serializes the snapshot for an operation payload.
    pub fn to_payload(&self) -> CoreResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| CoreError::codec(e.to_string()))
    }

    /// Deserializes a snapshot from an operation payload.
    pub fn from_payload(bytes: &[u8]) -> CoreResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| CoreError::codec(e.to_string()))
    }
}
