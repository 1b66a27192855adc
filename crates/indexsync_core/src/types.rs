//! Core type definitions for IndexSync.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier for a tenant ("site").
///
/// Every CMS entity belongs to exactly one site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SiteId(pub u32);

impl SiteId {
    /// Creates a new site ID.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "site:{}", self.0)
    }
}

/// Type tag of an indexable entity (for example `webpage` or `media_file`).
///
/// The registry maps each tag to at most one index manager.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityType(String);

impl EntityType {
    /// Creates an entity type tag without validation.
    ///
    /// Empty tags are caught later by [`crate::IndexOperation::validate`].
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Creates an entity type tag, rejecting empty or blank names.
    pub fn try_new(name: impl Into<String>) -> CoreResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(CoreError::malformed("entity type must not be empty"));
        }
        Ok(Self(name))
    }

    /// Returns the tag as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the tag is blank.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityType {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Stable identifier of an entity.
///
/// CMS entities usually carry database integer keys; imported or
/// externally owned entities may use opaque UUIDs instead.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityId {
    /// Integer key.
    Int(u64),
    /// Opaque UUID key.
    Uuid(Uuid),
}

impl EntityId {
    /// Creates a new random opaque ID.
    #[must_use]
    pub fn new_opaque() -> Self {
        Self::Uuid(Uuid::new_v4())
    }

    /// Returns the integer key, if this is an integer ID.
    #[must_use]
    pub const fn as_int(&self) -> Option<u64> {
        match self {
            EntityId::Int(id) => Some(*id),
            EntityId::Uuid(_) => None,
        }
    }

    /// Returns false for the nil UUID, which never identifies a real entity.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        match self {
            EntityId::Int(_) => true,
            EntityId::Uuid(uuid) => !uuid.is_nil(),
        }
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Int(id) => write!(f, "EntityId({id})"),
            EntityId::Uuid(uuid) => write!(f, "EntityId({uuid})"),
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Int(id) => write!(f, "{id}"),
            EntityId::Uuid(uuid) => write!(f, "{uuid}"),
        }
    }
}

impl From<u64> for EntityId {
    fn from(id: u64) -> Self {
        Self::Int(id)
    }
}

impl From<Uuid> for EntityId {
    fn from(uuid: Uuid) -> Self {
        Self::Uuid(uuid)
    }
}

/// Sequence number for ordering commits.
///
/// Sequence numbers provide total ordering of commits issued by one store.
/// Zero means "unsequenced"; such operations bypass stale detection.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SequenceNumber(pub u64);

impl SequenceNumber {
    /// The unsequenced marker.
    pub const UNSEQUENCED: Self = Self(0);

    /// Creates a new sequence number.
    #[must_use]
    pub const fn new(seq: u64) -> Self {
        Self(seq)
    }

    /// Returns the raw sequence value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next sequence number.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns true unless this is the unsequenced marker.
    #[must_use]
    pub const fn is_sequenced(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq:{}", self.0)
    }
}

/// The (entity type, entity id) pair that ordering and idempotence apply to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IndexKey {
    /// Entity type tag.
    pub entity_type: EntityType,
    /// Entity identifier.
    pub entity_id: EntityId,
}

impl IndexKey {
    /// Creates a new key.
    pub fn new(entity_type: EntityType, entity_id: EntityId) -> Self {
        Self {
            entity_type,
            entity_id,
        }
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity_type, self.entity_id)
    }
}
