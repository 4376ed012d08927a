//! # snapsync testkit
//!
//! Test utilities for snapsync.
//!
//! This crate provides:
//! - A customs-entry ingestion profile and snapshot builders
//! - Property-based test generators using proptest
//! - Concurrency stress helpers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use snapsync_testkit::prelude::*;
//!
//! #[test]
//! fn entry_is_created() {
//!     let pipeline = memory_pipeline();
//!     let outcome = pipeline.ingest(&entry("E-1", 100)).unwrap();
//!     assert!(outcome.created());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use stress::*;
