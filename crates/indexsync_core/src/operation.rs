//! Index operations.

use crate::error::{CoreError, CoreResult};
use crate::types::{EntityId, EntityType, IndexKey, SequenceNumber, SiteId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of index operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Entity was created.
    Insert,
    /// Entity was updated.
    Update,
    /// Entity was deleted.
    Delete,
}

impl OperationKind {
    /// Converts to a numeric code for CBOR encoding.
    pub fn to_code(&self) -> u8 {
        match self {
            OperationKind::Insert => 1,
            OperationKind::Update => 2,
            OperationKind::Delete => 3,
        }
    }

    /// Converts from a numeric code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(OperationKind::Insert),
            2 => Some(OperationKind::Update),
            3 => Some(OperationKind::Delete),
            _ => None,
        }
    }

    /// Returns the lowercase label used in logs and stats.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Insert => "insert",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One pending synchronization action against the search index.
///
/// An `IndexOperation` is created when a CRUD mutation commits and is
/// consumed once by the dispatcher (possibly retried by the queue).
///
/// # Fields
///
/// - `kind`: Insert, Update or Delete
/// - `entity_type` / `entity_id`: the key the operation applies to
/// - `site`: owning site, when known
/// - `sequence`: commit sequence number (zero when unsequenced)
/// - `payload`: optional serialized snapshot, informational only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexOperation {
    /// Operation kind.
    pub kind: OperationKind,
    /// Entity type tag.
    pub entity_type: EntityType,
    /// Entity identifier.
    pub entity_id: EntityId,
    /// Owning site.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site: Option<SiteId>,
    /// Commit sequence number.
    #[serde(default)]
    pub sequence: SequenceNumber,
    /// Serialized entity snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Vec<u8>>,
}

/// Wire form used by the CBOR codec. Every field is optional so that a
/// truncated envelope decodes into a precise error instead of a codec one.
#[derive(Serialize, Deserialize)]
struct Envelope {
    kind: Option<u8>,
    entity_type: Option<EntityType>,
    entity_id: Option<EntityId>,
    site: Option<SiteId>,
    sequence: Option<u64>,
    payload: Option<Vec<u8>>,
}

impl IndexOperation {
    /// Creates an operation of the given kind.
    pub fn new(
        kind: OperationKind,
        entity_type: EntityType,
        entity_id: impl Into<EntityId>,
    ) -> Self {
        Self {
            kind,
            entity_type,
            entity_id: entity_id.into(),
            site: None,
            sequence: SequenceNumber::UNSEQUENCED,
            payload: None,
        }
    }

    /// Creates an Insert operation.
    pub fn insert(entity_type: EntityType, entity_id: impl Into<EntityId>) -> Self {
        Self::new(OperationKind::Insert, entity_type, entity_id)
    }

    /// Creates an Update operation.
    pub fn update(entity_type: EntityType, entity_id: impl Into<EntityId>) -> Self {
        Self::new(OperationKind::Update, entity_type, entity_id)
    }

    /// Creates a Delete operation.
    pub fn delete(entity_type: EntityType, entity_id: impl Into<EntityId>) -> Self {
        Self::new(OperationKind::Delete, entity_type, entity_id)
    }

    /// Sets the owning site.
    #[must_use]
    pub fn with_site(mut self, site: SiteId) -> Self {
        self.site = Some(site);
        self
    }

    /// Sets the commit sequence number.
    #[must_use]
    pub fn with_sequence(mut self, sequence: SequenceNumber) -> Self {
        self.sequence = sequence;
        self
    }

    /// Attaches a serialized snapshot.
    #[must_use]
    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Returns the key this operation applies to.
    pub fn key(&self) -> IndexKey {
        IndexKey::new(self.entity_type.clone(), self.entity_id)
    }

    /// Checks that the operation names an entity type and a usable id.
    pub fn validate(&self) -> CoreResult<()> {
        if self.entity_type.is_blank() {
            return Err(CoreError::malformed("entity type is missing"));
        }
        if !self.entity_id.is_valid() {
            return Err(CoreError::malformed(format!(
                "entity id {} is not a valid identifier",
                self.entity_id
            )));
        }
        Ok(())
    }

    /// Returns the size of the payload in bytes.
    pub fn payload_size(&self) -> usize {
        self.payload.as_ref().map(|p| p.len()).unwrap_or(0)
    }

    /// Encodes to CBOR bytes.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let envelope = Envelope {
            kind: Some(self.kind.to_code()),
            entity_type: Some(self.entity_type.clone()),
            entity_id: Some(self.entity_id),
            site: self.site,
            sequence: Some(self.sequence.as_u64()),
            payload: self.payload.clone(),
        };

        let mut bytes = Vec::new();
        ciborium::into_writer(&envelope, &mut bytes)
            .map_err(|e| CoreError::codec(e.to_string()))?;
        Ok(bytes)
    }

    /// Decodes from CBOR bytes and validates the result.
    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        let envelope: Envelope =
            ciborium::from_reader(bytes).map_err(|e| CoreError::codec(e.to_string()))?;

        let code = envelope
            .kind
            .ok_or_else(|| CoreError::malformed("missing operation kind"))?;
        let kind = OperationKind::from_code(code)
            .ok_or_else(|| CoreError::malformed(format!("unknown operation kind {code}")))?;
        let entity_type = envelope
            .entity_type
            .ok_or_else(|| CoreError::malformed("entity type is missing"))?;
        let entity_id = envelope
            .entity_id
            .ok_or_else(|| CoreError::malformed("entity id is missing"))?;

        let operation = Self {
            kind,
            entity_type,
            entity_id,
            site: envelope.site,
            sequence: SequenceNumber::new(envelope.sequence.unwrap_or(0)),
            payload: envelope.payload,
        };
        operation.validate()?;
        Ok(operation)
    }
}

impl fmt::Display for IndexOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.entity_type, self.entity_id)?;
        if self.sequence.is_sequenced() {
            write!(f, " @{}", self.sequence)?;
        }
        Ok(())
    }
}
