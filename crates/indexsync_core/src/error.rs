//! Error types for IndexSync core.

use crate::types::{EntityId, EntityType};
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Result type for index manager operations.
pub type IndexResult<T> = Result<T, IndexError>;

/// Errors raised by the store, the registry and operation handling.
///
/// These are programming or data errors on the CRUD side. Index backend
/// failures use [`IndexError`] and never surface to the CRUD caller.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An index operation is missing its entity type or entity id.
    #[error("malformed index operation: {message}")]
    MalformedOperation {
        /// What is missing or invalid.
        message: String,
    },

    /// A second manager was registered for the same entity type.
    #[error("an index manager is already registered for entity type {entity_type}")]
    DuplicateManager {
        /// The entity type.
        entity_type: EntityType,
    },

    /// Entity already exists in the store.
    #[error("entity already exists: {entity_type}/{entity_id}")]
    EntityExists {
        /// The entity type.
        entity_type: EntityType,
        /// The entity id.
        entity_id: EntityId,
    },

    /// Entity not found in the store.
    #[error("entity not found: {entity_type}/{entity_id}")]
    EntityNotFound {
        /// The entity type.
        entity_type: EntityType,
        /// The entity id.
        entity_id: EntityId,
    },

    /// Operation encoding or decoding failed.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },

    /// The entity store could not serve a request.
    #[error("store error: {message}")]
    Store {
        /// Description of the failure.
        message: String,
    },
}

impl CoreError {
    /// Creates a malformed operation error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedOperation {
            message: message.into(),
        }
    }

    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates a store error.
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }
}

/// Errors raised while applying an operation to the physical index.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IndexError {
    /// The index backend rejected or failed the write.
    #[error("index backend error: {message}")]
    Backend {
        /// Error message.
        message: String,
        /// Whether the write can be retried.
        retryable: bool,
    },

    /// The backend did not answer within the configured timeout.
    #[error("index backend timed out")]
    Timeout,

    /// The index manager panicked while applying.
    #[error("index manager panicked: {0}")]
    Panicked(String),

    /// The entity snapshot could not be loaded.
    #[error("entity store unavailable: {0}")]
    Unavailable(String),

    /// The operation cannot be applied as given.
    #[error("operation rejected: {0}")]
    Rejected(String),
}

impl IndexError {
    /// Creates a retryable backend error.
    pub fn backend_retryable(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable backend error.
    pub fn backend_fatal(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            IndexError::Backend { retryable, .. } => *retryable,
            IndexError::Timeout => true,
            IndexError::Unavailable(_) => true,
            IndexError::Panicked(_) | IndexError::Rejected(_) => false,
        }
    }
}

impl From<CoreError> for IndexError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::MalformedOperation { .. } => IndexError::Rejected(err.to_string()),
            other => IndexError::Unavailable(other.to_string()),
        }
    }
}
