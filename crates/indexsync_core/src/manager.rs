//! Index manager capability trait.

use crate::entity::Entity;
use crate::error::IndexResult;
use crate::types::{EntityId, EntityType, SiteId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Per-entity-type adapter between domain entities and the physical index.
///
/// Every method must be idempotent: inserting an already indexed document
/// overwrites it, and deleting an absent document succeeds. The queue
/// delivers operations at least once, so managers see repeats.
///
/// Managers own their backend client and any backend-level locking.
pub trait IndexManager: Send + Sync {
    /// Returns the entity type this manager indexes.
    fn entity_type(&self) -> &EntityType;

    /// Indexes a newly created entity.
    fn insert(&self, entity: &Entity) -> IndexResult<()>;

    /// Re-indexes an updated entity.
    fn update(&self, entity: &Entity) -> IndexResult<()>;

    /// Removes an entity's document.
    fn delete(&self, entity_id: &EntityId) -> IndexResult<()>;

    /// Removes every document this manager owns.
    fn clear(&self) -> IndexResult<()>;
}

/// The indexable form of an entity.
///
/// `text` holds every textual field flattened in field-name order; it is
/// what token indexes split into terms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDocument {
    /// Entity identifier.
    pub id: EntityId,
    /// Entity type tag.
    pub entity_type: EntityType,
    /// Owning site.
    pub site: SiteId,
    /// Title, when the entity has one.
    pub title: Option<String>,
    /// Stored field values.
    pub fields: BTreeMap<String, Value>,
    /// Flattened searchable text.
    pub text: String,
}

impl IndexDocument {
    /// Translates an entity snapshot into a document.
    pub fn from_entity(entity: &Entity) -> Self {
        let mut parts = Vec::new();
        for value in entity.fields.values() {
            collect_text(value, &mut parts);
        }

        Self {
            id: entity.id,
            entity_type: entity.entity_type.clone(),
            site: entity.site,
            title: entity.title().map(str::to_owned),
            fields: entity.fields.clone(),
            text: parts.join(" "),
        }
    }
}

fn collect_text(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.push(s.clone()),
        Value::Array(items) => items.iter().for_each(|v| collect_text(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_text(v, out)),
        Value::Number(_) | Value::Bool(_) | Value::Null => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn document_from_entity() {
        let entity = Entity::new(EntityType::new("webpage"), 3u64, SiteId::new(1))
            .with_field("title", "About us")
            .with_field("body", "Who we are")
            .with_field("tags", json!(["team", "history"]))
            .with_field("order", 2);

        let doc = IndexDocument::from_entity(&entity);
        assert_eq!(doc.id, EntityId::Int(3));
        assert_eq!(doc.title.as_deref(), Some("About us"));
        // Fields are visited in name order: body, order, tags, title.
        assert_eq!(doc.text, "Who we are team history About us");
        assert_eq!(doc.fields.len(), 4);
    }

    #[test]
    fn document_without_text_fields() {
        let entity = Entity::new(EntityType::new("layout"), 8u64, SiteId::new(1))
            .with_field("columns", 3);
        let doc = IndexDocument::from_entity(&entity);
        assert!(doc.text.is_empty());
        assert!(doc.title.is_none());
    }
}
