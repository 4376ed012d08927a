//! # snapsync push
//!
//! Idempotent push of local records to partner systems.
//!
//! This crate provides:
//! - [`PushEngine`], which fingerprints each record, fetches and merges the
//!   remote counterpart, and pushes only when something changed
//! - The [`RemoteAdapter`] trait with an in-memory [`MockRemote`]
//! - Record sources: a pending-record pager and a row-buffered cursor source
//!
//! ## Key Invariants
//!
//! - A record whose fingerprint is already confirmed makes no remote call
//! - A merge that leaves the remote unchanged is never pushed
//! - The stored fingerprint only changes after a verified success
//! - A key that failed is not retried again within the same run
//! - A run fetches at most `max_passes` pages

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod engine;
mod error;
mod remote;
mod source;

pub use config::{FailureMode, PushConfig};
pub use engine::{PushEngine, PushRunReport, PushState, PushStats, RecordOutcome};
pub use error::{PushError, PushResult};
pub use remote::{MockRemote, RemoteAdapter, RemoteCall};
pub use source::{
    GroupingAssembler, LocalRecord, PendingRecordSource, RecordSource, RowAssembler,
    RowBufferedSource, RowCursor, VecRowCursor,
};
