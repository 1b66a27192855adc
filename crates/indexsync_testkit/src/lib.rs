//! # IndexSync Testkit
//!
//! Test utilities for IndexSync.
//!
//! This crate provides:
//! - Entity and pipeline fixtures
//! - Fault-injecting index managers and entity stores
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use indexsync_testkit::prelude::*;
//!
//! #[test]
//! fn indexes_pages() {
//!     let pipeline = TestPipeline::new();
//!     let op = pipeline.store.create(page(1, "Home")).unwrap();
//!     pipeline.dispatcher.dispatch(&op);
//!     assert!(pipeline.index.contains(&EntityId::Int(1)));
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use indexsync_core::*;
}

pub use fixtures::*;
pub use generators::*;
