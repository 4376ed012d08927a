//! # snapsync core
//!
//! Snapshot reconciliation for snapsync.
//!
//! This crate provides:
//! - Named, reentrant locks with bounded acquisition
//! - A declarative field directive engine (overwrite, keep earliest, keep
//!   latest, set if absent)
//! - Child reconciliation that preserves push tracking across full replaces
//! - Aggregates rolled up from child collections
//! - The ingestion pipeline state machine and a worker-pool batch runner
//! - Entity, purge marker and sync record stores
//! - A status-note parser and a read-through reference cache
//!
//! ## Key Invariants
//!
//! - Committed state never regresses to an older source version
//! - Every mutation happens under the lock of what it mutates
//! - Entity creation happens under a coarser creation lock
//! - Commits are all-or-nothing
//! - A confirmed sync record carries no failure message

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod aggregate;
mod cache;
mod config;
mod directive;
mod entity;
mod error;
mod field;
mod ingest;
mod lock;
mod profile;
mod reconcile;
mod snapshot;
mod status;
mod store;
mod sync_record;
mod types;

pub use aggregate::{field_extractor, project, Accumulator, AggregateSpec, Extractor};
pub use cache::{CacheStats, ReferenceCache, ReferenceLoader};
pub use config::{IngestConfig, LockConfig, RetryConfig};
pub use directive::{
    apply_directives, DirectiveOutcome, DirectiveTable, DirectiveTableBuilder, FieldCode,
    FieldDirective, MergePolicy,
};
pub use entity::{attributes_value, Attributes, CanonicalEntity, ChildEntity};
pub use error::{CoreError, CoreResult};
pub use field::{parse_date, parse_datetime, parse_field, FieldType, FieldValue, ParseError};
pub use ingest::{IngestOutcome, IngestPipeline, IngestReport, IngestState, IngestStats, SkipReason};
pub use lock::{LockGuard, LockScope, LockService};
pub use profile::IngestProfile;
pub use reconcile::{reconcile, ChildCollectionSpec, ChildKeyFn, ReconcileOutcome, RetainFn};
pub use snapshot::{ChildSnapshot, SnapshotMessage};
pub use status::{apply_status_events, parse_status_notes, StatusEvent, StatusKind, StatusMarkers};
pub use store::{EntityStore, MemoryEntityStore, MemoryPurgeMarkerStore, PurgeMarkerStore};
pub use sync_record::{MemorySyncRecordStore, SyncRecord, SyncRecordId, SyncRecordStore};
pub use types::{ChildId, EntityId, NaturalKey, PartnerId, SourceVersion};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
