//! # IndexSync Queue
//!
//! Asynchronous delivery of index operations.
//!
//! This crate provides:
//! - A partitioned queue that keeps per-key order and runs keys concurrently
//! - Bounded apply attempts with a timeout
//! - Retry with exponential backoff for retryable failures
//! - A dead-letter log for operations that exhausted their retries
//!
//! ## Architecture
//!
//! ```text
//! commit hook ──▶ enqueue ──▶ partition[hash(key) % N] ──▶ worker ──▶ TaskDispatcher
//!                                                            │
//!                                                            └──▶ DeadLetterLog
//! ```
//!
//! ## Key Invariants
//!
//! - Operations for one key are applied in enqueue order
//! - A key never has two applies in flight, even after a timeout
//! - A hung apply costs its partition at most one timeout per attempt
//! - Enqueueing never waits on the index backend
//! - Every failure is reported; none propagates to the enqueuer

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod dead_letter;
mod error;
mod partition;
mod queue;
mod stats;
mod worker;

pub use config::{QueueConfig, RetryConfig};
pub use dead_letter::{DeadLetter, DeadLetterLog};
pub use error::{QueueError, QueueResult};
pub use queue::IndexQueue;
pub use stats::QueueStats;
