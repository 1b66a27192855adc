//! Error types for the index queue.

use thiserror::Error;

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors returned to code that enqueues operations or manages the queue.
///
/// Index failures are never surfaced here; they are retried, reported and
/// dead-lettered by the workers.
#[derive(Error, Debug)]
pub enum QueueError {
    /// The operation was rejected before enqueueing.
    #[error(transparent)]
    Core(#[from] indexsync_core::CoreError),

    /// The partition for the operation's key is at capacity.
    #[error("partition {partition} is full")]
    Full {
        /// Partition index.
        partition: usize,
    },

    /// The queue has been shut down.
    #[error("index queue is closed")]
    Closed,

    /// The configuration is not usable.
    #[error("invalid queue configuration: {0}")]
    InvalidConfig(String),

    /// Dead-letter file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A dead-letter record could not be (de)serialized.
    #[error("dead-letter encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueueError {
    /// Returns true if enqueueing the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, QueueError::Full { .. })
    }
}
