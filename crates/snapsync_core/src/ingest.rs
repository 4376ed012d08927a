//! Ingestion pipeline.
//!
//! Per message the pipeline walks a small state machine:
//!
//! ```text
//! Unseen ──► Created ──► Processing ──► Committed
//!   │                        │
//!   └──────► Skipped ◄───────┘
//! ```
//!
//! An entity that already exists enters at `Committed`. Creation happens
//! under a creation lock keyed by natural key; processing happens under the
//! entity's own lock on freshly loaded state. A snapshot older than the one
//! already committed is skipped, so committed state never regresses no
//! matter in which order messages arrive.

use crate::aggregate::project;
use crate::config::IngestConfig;
use crate::directive::apply_directives;
use crate::entity::CanonicalEntity;
use crate::error::{CoreError, CoreResult};
use crate::lock::{LockScope, LockService};
use crate::profile::IngestProfile;
use crate::reconcile::reconcile;
use crate::snapshot::SnapshotMessage;
use crate::store::{EntityStore, PurgeMarkerStore};
use crate::types::{EntityId, NaturalKey, SourceVersion};
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, warn};

/// Where a message is in its processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestState {
    /// No entity exists for the key yet.
    Unseen,
    /// A bare entity was just inserted.
    Created,
    /// The entity lock is held and the snapshot is being merged.
    Processing,
    /// The snapshot's state is persisted.
    Committed,
    /// The snapshot was dropped as stale or purged.
    Skipped,
}

impl IngestState {
    /// Returns true for the per-message terminal states.
    pub fn is_terminal(&self) -> bool {
        matches!(self, IngestState::Committed | IngestState::Skipped)
    }
}

/// Why a message was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// A newer snapshot was already committed.
    Stale {
        /// Version currently committed.
        committed: SourceVersion,
    },
    /// The key was purged as of a version at or after this snapshot.
    Purged {
        /// Purge marker version.
        as_of: SourceVersion,
    },
}

/// Result of ingesting one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOutcome {
    /// Natural key of the message.
    pub natural_key: NaturalKey,
    /// Entity the message was applied to, if any.
    pub entity_id: Option<EntityId>,
    /// States visited, ending in a terminal one.
    pub path: Vec<IngestState>,
    /// Set when the message was skipped.
    pub skip_reason: Option<SkipReason>,
    /// Whether persisted state changed.
    pub changed: bool,
}

impl IngestOutcome {
    fn new(natural_key: NaturalKey, start: IngestState) -> Self {
        Self {
            natural_key,
            entity_id: None,
            path: vec![start],
            skip_reason: None,
            changed: false,
        }
    }

    fn skipped(mut self, reason: SkipReason) -> Self {
        self.path.push(IngestState::Skipped);
        self.skip_reason = Some(reason);
        self
    }

    /// Final state.
    pub fn state(&self) -> IngestState {
        self.path.last().copied().unwrap_or(IngestState::Unseen)
    }

    /// Returns true if the message ended committed.
    pub fn is_committed(&self) -> bool {
        self.state() == IngestState::Committed
    }

    /// Returns true if the message was skipped.
    pub fn is_skipped(&self) -> bool {
        self.state() == IngestState::Skipped
    }

    /// Returns true if this message created the entity.
    pub fn created(&self) -> bool {
        self.path.contains(&IngestState::Created)
    }
}

/// Per-message result of a batch.
#[derive(Debug)]
pub struct IngestReport {
    /// Position of the message in the batch.
    pub index: usize,
    /// Natural key of the message.
    pub natural_key: NaturalKey,
    /// Outcome or failure.
    pub result: CoreResult<IngestOutcome>,
}

/// Counters over the pipeline's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Messages received.
    pub received: u64,
    /// Entities created.
    pub created: u64,
    /// Messages that changed persisted state.
    pub committed: u64,
    /// Messages that re-derived identical state.
    pub unchanged: u64,
    /// Messages skipped as stale.
    pub skipped_stale: u64,
    /// Messages skipped because of a purge marker.
    pub skipped_purged: u64,
    /// Failures that may succeed on redelivery.
    pub failed_retryable: u64,
    /// Failures that need a human.
    pub failed_fatal: u64,
    /// Entities purged.
    pub purged: u64,
}

enum Resolution {
    Existing(EntityId),
    Created(EntityId),
    Purged(SourceVersion),
}

enum Processed {
    Stale(SourceVersion),
    Unchanged,
    Committed,
}

/// Applies snapshot messages to canonical entities.
pub struct IngestPipeline<P: IngestProfile, S: EntityStore, M: PurgeMarkerStore> {
    profile: Arc<P>,
    store: Arc<S>,
    purges: Arc<M>,
    locks: Arc<LockService>,
    config: IngestConfig,
    stats: RwLock<IngestStats>,
}

impl<P: IngestProfile, S: EntityStore, M: PurgeMarkerStore> IngestPipeline<P, S, M> {
    /// Creates a pipeline with default configuration and its own locks.
    pub fn new(profile: P, store: Arc<S>, purges: Arc<M>) -> Self {
        let config = IngestConfig::default();
        Self {
            profile: Arc::new(profile),
            store,
            purges,
            locks: Arc::new(LockService::new(config.lock.clone())),
            config,
            stats: RwLock::new(IngestStats::default()),
        }
    }

    /// Replaces the configuration. Also rebuilds the lock service unless
    /// one was shared with [`IngestPipeline::with_locks`] afterwards.
    pub fn with_config(mut self, config: IngestConfig) -> Self {
        self.locks = Arc::new(LockService::new(config.lock.clone()));
        self.config = config;
        self
    }

    /// Shares a lock service with other components.
    pub fn with_locks(mut self, locks: Arc<LockService>) -> Self {
        self.locks = locks;
        self
    }

    /// The entity store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The lock service.
    pub fn locks(&self) -> &Arc<LockService> {
        &self.locks
    }

    /// The domain profile.
    pub fn profile(&self) -> &P {
        &self.profile
    }

    /// Counters so far.
    pub fn stats(&self) -> IngestStats {
        self.stats.read().clone()
    }

    /// Ingests one message.
    ///
    /// # Errors
    ///
    /// Stale and purged messages are not errors. Lock timeouts, write
    /// conflicts and persistence failures are retryable; missing keys and
    /// mandatory field failures are not. Either way nothing is half applied.
    pub fn ingest(&self, message: &SnapshotMessage) -> CoreResult<IngestOutcome> {
        let result = self.process(message);
        self.record(message, &result);
        result
    }

    /// Ingests messages on a pool of `workers` threads.
    ///
    /// Reports come back in input order. A failing or panicking message
    /// never affects the others.
    pub fn ingest_batch(&self, messages: &[SnapshotMessage], workers: usize) -> Vec<IngestReport> {
        let workers = workers.clamp(1, messages.len().max(1));
        let next = AtomicUsize::new(0);
        let slots: Mutex<Vec<Option<IngestReport>>> =
            Mutex::new((0..messages.len()).map(|_| None).collect());

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let index = next.fetch_add(1, Ordering::SeqCst);
                    let Some(message) = messages.get(index) else {
                        break;
                    };
                    let result = panic::catch_unwind(AssertUnwindSafe(|| self.ingest(message)))
                        .unwrap_or_else(|payload| {
                            let failure = Err(CoreError::Panicked {
                                message: panic_message(payload.as_ref()),
                            });
                            self.record(message, &failure);
                            failure
                        });
                    slots.lock()[index] = Some(IngestReport {
                        index,
                        natural_key: message.natural_key.clone(),
                        result,
                    });
                });
            }
        });

        slots.into_inner().into_iter().flatten().collect()
    }

    /// Deletes the entity for `key` and blocks snapshots extracted at or
    /// before `as_of` from recreating it.
    ///
    /// Returns true if an entity was deleted.
    ///
    /// # Errors
    ///
    /// Returns lock or store errors.
    pub fn purge(&self, key: &NaturalKey, as_of: SourceVersion) -> CoreResult<bool> {
        let creation = self.creation_lock(key);
        let deleted = self.locks.with_lock::<_, CoreError>(&creation, || {
            self.purges.record_purge(key, as_of)?;
            let Some(entity) = self.store.find_by_key(key)? else {
                return Ok(false);
            };
            self.locks
                .with_lock::<_, CoreError>(&LockScope::Entity(entity.id).name(), || {
                    Ok(self.store.delete(entity.id)?.is_some())
                })
        })?;

        info!(key = %key, as_of = %as_of, deleted, "purged");
        if deleted {
            self.stats.write().purged += 1;
        }
        Ok(deleted)
    }

    fn process(&self, message: &SnapshotMessage) -> CoreResult<IngestOutcome> {
        let key = &message.natural_key;
        if key.is_blank() {
            return Err(CoreError::missing_natural_key("snapshot message"));
        }

        if let Some(as_of) = self.purge_marker(key, message.source_version)? {
            let start = if self.store.find_by_key(key)?.is_some() {
                IngestState::Committed
            } else {
                IngestState::Unseen
            };
            return Ok(
                IngestOutcome::new(key.clone(), start).skipped(SkipReason::Purged { as_of })
            );
        }

        let mut outcome;
        let id = match self.store.find_by_key(key)? {
            Some(existing) => {
                outcome = IngestOutcome::new(key.clone(), IngestState::Committed);
                existing.id
            }
            None => {
                outcome = IngestOutcome::new(key.clone(), IngestState::Unseen);
                match self.create(message)? {
                    Resolution::Existing(id) => id,
                    Resolution::Created(id) => {
                        outcome.path.push(IngestState::Created);
                        id
                    }
                    Resolution::Purged(as_of) => {
                        return Ok(outcome.skipped(SkipReason::Purged { as_of }));
                    }
                }
            }
        };
        outcome.entity_id = Some(id);
        outcome.path.push(IngestState::Processing);

        let processed = self.locks.with_retry_on_conflict(
            self.store.as_ref(),
            id,
            &self.config.conflict_retry,
            |current| {
                if current.last_source_version > message.source_version {
                    return Ok(Processed::Stale(current.last_source_version));
                }
                let mut next = current.clone();
                self.merge(&mut next, message)?;
                if next.same_content(&current) {
                    return Ok(Processed::Unchanged);
                }
                self.store.commit(next)?;
                Ok(Processed::Committed)
            },
        )?;

        Ok(match processed {
            Processed::Stale(committed) => outcome.skipped(SkipReason::Stale { committed }),
            Processed::Unchanged => {
                outcome.path.push(IngestState::Committed);
                outcome
            }
            Processed::Committed => {
                outcome.path.push(IngestState::Committed);
                outcome.changed = true;
                outcome
            }
        })
    }

    fn purge_marker(
        &self,
        key: &NaturalKey,
        version: SourceVersion,
    ) -> CoreResult<Option<SourceVersion>> {
        Ok(self
            .purges
            .purged_as_of(key)?
            .filter(|as_of| *as_of >= version))
    }

    fn creation_lock(&self, key: &NaturalKey) -> String {
        LockScope::Creation {
            entity_type: self.profile.entity_type(),
            key,
        }
        .name()
    }

    fn create(&self, message: &SnapshotMessage) -> CoreResult<Resolution> {
        let key = &message.natural_key;
        self.locks.with_lock(&self.creation_lock(key), || {
            if let Some(existing) = self.store.find_by_key(key)? {
                return Ok(Resolution::Existing(existing.id));
            }
            // A purge may have landed since the first check.
            if let Some(as_of) = self.purge_marker(key, message.source_version)? {
                return Ok(Resolution::Purged(as_of));
            }
            let entity = self
                .store
                .insert(CanonicalEntity::new(key.clone(), message.source_version))?;
            debug!(key = %key, id = %entity.id, "created bare entity");
            Ok(Resolution::Created(entity.id))
        })
    }

    fn merge(&self, entity: &mut CanonicalEntity, message: &SnapshotMessage) -> CoreResult<()> {
        let profile = self.profile.as_ref();
        let offset = self.config.source_offset;

        entity.expected_update_time = entity.expected_update_time.max(message.source_version);

        let directives = apply_directives(
            &mut entity.fields,
            &message.fields,
            profile.directives(),
            offset,
        )?;
        if !directives.rejected.is_empty() {
            warn!(
                key = %entity.natural_key,
                fields = ?directives.rejected,
                "unreadable fields dropped"
            );
        }

        profile.derive(entity, message)?;

        for spec in profile.child_collections() {
            let incoming = message
                .children
                .get(&spec.name)
                .map_or(&[][..], Vec::as_slice);
            let outcome = reconcile(entity, spec, incoming, offset)?;
            debug!(
                key = %entity.natural_key,
                collection = %spec.name,
                ?outcome,
                "children reconciled"
            );
        }
        for name in message.children.keys() {
            if !profile.child_collections().iter().any(|s| &s.name == name) {
                warn!(
                    key = %entity.natural_key,
                    collection = %name,
                    "ignoring undeclared child collection"
                );
            }
        }

        profile.finalize(entity)?;
        project(entity, profile.aggregates());

        entity.last_source_version = message.source_version;
        Ok(())
    }

    fn record(&self, message: &SnapshotMessage, result: &CoreResult<IngestOutcome>) {
        let key = &message.natural_key;
        let version = message.source_version;
        let mut stats = self.stats.write();
        stats.received += 1;

        match result {
            Ok(outcome) => {
                if outcome.created() {
                    stats.created += 1;
                }
                match outcome.skip_reason {
                    Some(SkipReason::Stale { committed }) => {
                        stats.skipped_stale += 1;
                        debug!(key = %key, version = %version, committed = %committed, "skipped stale snapshot");
                    }
                    Some(SkipReason::Purged { as_of }) => {
                        stats.skipped_purged += 1;
                        debug!(key = %key, version = %version, as_of = %as_of, "skipped purged snapshot");
                    }
                    None if outcome.changed => {
                        stats.committed += 1;
                        info!(key = %key, version = %version, created = outcome.created(), "committed snapshot");
                    }
                    None => {
                        stats.unchanged += 1;
                        debug!(key = %key, version = %version, "snapshot re-derived identical state");
                    }
                }
            }
            Err(e) if e.is_retryable() => {
                stats.failed_retryable += 1;
                warn!(key = %key, version = %version, error = %e, "ingestion failed, retryable");
            }
            Err(e) => {
                stats.failed_fatal += 1;
                error!(
                    key = %key,
                    version = %version,
                    error = %e,
                    raw = %message.to_json(),
                    "ingestion failed"
                );
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{field_extractor, AggregateSpec};
    use crate::directive::{DirectiveTable, FieldCode, FieldDirective, MergePolicy};
    use crate::field::{FieldType, FieldValue};
    use crate::reconcile::ChildCollectionSpec;
    use crate::snapshot::ChildSnapshot;
    use crate::store::{MemoryEntityStore, MemoryPurgeMarkerStore};
    use chrono::NaiveDate;
    use snapsync_codec::Value;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Code {
        F,
        D,
        LineNo,
        Value,
    }

    impl FieldCode for Code {
        fn code(&self) -> &'static str {
            match self {
                Code::F => "F",
                Code::D => "D",
                Code::LineNo => "LINE_NO",
                Code::Value => "VALUE",
            }
        }

        fn all() -> &'static [Self] {
            &[Code::F, Code::D, Code::LineNo, Code::Value]
        }
    }

    struct Profile {
        directives: DirectiveTable,
        children: Vec<ChildCollectionSpec>,
        aggregates: Vec<AggregateSpec>,
    }

    impl Profile {
        fn new() -> Self {
            let lines = DirectiveTable::builder::<Code>()
                .directive(Code::LineNo, FieldDirective::new("line_no"))
                .directive(Code::Value, FieldDirective::new("value"))
                .build();
            Self {
                directives: DirectiveTable::builder::<Code>()
                    .directive(Code::F, FieldDirective::new("f"))
                    .directive(
                        Code::D,
                        FieldDirective::new("d")
                            .with_type(FieldType::Date)
                            .with_policy(MergePolicy::KeepEarliest),
                    )
                    .build(),
                children: vec![ChildCollectionSpec::keyed_by("lines", lines, "line_no")],
                aggregates: vec![AggregateSpec::sum(
                    "total",
                    "lines",
                    field_extractor("value"),
                )],
            }
        }
    }

    impl IngestProfile for Profile {
        fn entity_type(&self) -> &str {
            "test"
        }

        fn directives(&self) -> &DirectiveTable {
            &self.directives
        }

        fn child_collections(&self) -> &[ChildCollectionSpec] {
            &self.children
        }

        fn aggregates(&self) -> &[AggregateSpec] {
            &self.aggregates
        }

        fn derive(
            &self,
            entity: &mut CanonicalEntity,
            _message: &SnapshotMessage,
        ) -> CoreResult<()> {
            if entity.field("f").and_then(FieldValue::as_integer) == Some(-1) {
                panic!("derive exploded");
            }
            Ok(())
        }
    }

    type Pipeline = IngestPipeline<Profile, MemoryEntityStore, MemoryPurgeMarkerStore>;

    fn pipeline() -> Pipeline {
        IngestPipeline::new(
            Profile::new(),
            Arc::new(MemoryEntityStore::new()),
            Arc::new(MemoryPurgeMarkerStore::new()),
        )
    }

    fn version(secs: i64) -> SourceVersion {
        SourceVersion::from_unix_seconds(secs).unwrap()
    }

    fn message(key: &str, secs: i64) -> SnapshotMessage {
        SnapshotMessage::new(NaturalKey::new(key), version(secs)).with_collection("lines")
    }

    fn stored(pipeline: &Pipeline, key: &str) -> CanonicalEntity {
        pipeline
            .store()
            .find_by_key(&NaturalKey::new(key))
            .unwrap()
            .unwrap()
    }

    #[test]
    fn first_message_walks_the_full_path() {
        let pipeline = pipeline();
        let outcome = pipeline
            .ingest(&message("E-1", 10).with_field("F", Value::Integer(10)))
            .unwrap();
        assert_eq!(
            outcome.path,
            vec![
                IngestState::Unseen,
                IngestState::Created,
                IngestState::Processing,
                IngestState::Committed
            ]
        );
        assert!(outcome.changed);
        assert_eq!(stored(&pipeline, "E-1").field("f"), Some(&FieldValue::Integer(10)));
    }

    #[test]
    fn overwrite_and_keep_earliest_scenario() {
        let pipeline = pipeline();
        pipeline
            .ingest(
                &message("E-1", 10)
                    .with_field("F", Value::Integer(10))
                    .with_field("D", "2024-01-05"),
            )
            .unwrap();
        pipeline
            .ingest(&message("E-1", 20).with_field("D", "2024-01-02"))
            .unwrap();

        let entity = stored(&pipeline, "E-1");
        assert_eq!(entity.field("f"), None);
        assert_eq!(
            entity.field("d"),
            Some(&FieldValue::Date(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()))
        );
        assert_eq!(entity.last_source_version, version(20));
    }

    #[test]
    fn older_snapshot_is_skipped() {
        let pipeline = pipeline();
        pipeline
            .ingest(&message("E-1", 20).with_field("F", Value::Integer(2)))
            .unwrap();
        let outcome = pipeline
            .ingest(&message("E-1", 10).with_field("F", Value::Integer(1)))
            .unwrap();

        assert!(outcome.is_skipped());
        assert_eq!(
            outcome.skip_reason,
            Some(SkipReason::Stale {
                committed: version(20)
            })
        );
        assert_eq!(stored(&pipeline, "E-1").field("f"), Some(&FieldValue::Integer(2)));
        assert_eq!(pipeline.stats().skipped_stale, 1);
    }

    #[test]
    fn redelivery_is_idempotent() {
        let pipeline = pipeline();
        let msg = message("E-1", 10)
            .with_field("F", Value::Integer(3))
            .with_child(
                "lines",
                ChildSnapshot::new()
                    .with_field("LINE_NO", 1i64)
                    .with_field("VALUE", 40i64),
            );
        pipeline.ingest(&msg).unwrap();
        let first = stored(&pipeline, "E-1");

        let again = pipeline.ingest(&msg).unwrap();
        assert!(again.is_committed());
        assert!(!again.changed);
        assert_eq!(stored(&pipeline, "E-1"), first);
        assert_eq!(first.derived("total"), Some(&FieldValue::Integer(40)));
    }

    #[test]
    fn missing_key_is_fatal() {
        let pipeline = pipeline();
        let err = pipeline.ingest(&message(" ", 10)).unwrap_err();
        assert!(matches!(err, CoreError::MissingNaturalKey { .. }));
        assert!(!err.is_retryable());
        assert_eq!(pipeline.stats().failed_fatal, 1);
        assert!(pipeline.store().is_empty());
    }

    #[test]
    fn failed_commit_is_retryable_and_leaves_state() {
        let pipeline = pipeline();
        pipeline
            .ingest(&message("E-1", 10).with_field("F", Value::Integer(1)))
            .unwrap();
        pipeline.store().fail_next_commits(1);

        let msg = message("E-1", 20).with_field("F", Value::Integer(2));
        let err = pipeline.ingest(&msg).unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(stored(&pipeline, "E-1").field("f"), Some(&FieldValue::Integer(1)));
        assert_eq!(pipeline.locks().held_count(), 0);

        pipeline.ingest(&msg).unwrap();
        assert_eq!(stored(&pipeline, "E-1").field("f"), Some(&FieldValue::Integer(2)));
    }

    #[test]
    fn purge_blocks_older_snapshots_only() {
        let pipeline = pipeline();
        pipeline.ingest(&message("E-1", 10)).unwrap();
        assert!(pipeline.purge(&NaturalKey::new("E-1"), version(15)).unwrap());
        assert!(pipeline.store().is_empty());

        let outcome = pipeline.ingest(&message("E-1", 12)).unwrap();
        assert_eq!(
            outcome.skip_reason,
            Some(SkipReason::Purged { as_of: version(15) })
        );
        assert_eq!(outcome.path, vec![IngestState::Unseen, IngestState::Skipped]);
        assert!(pipeline.store().is_empty());

        let outcome = pipeline.ingest(&message("E-1", 16)).unwrap();
        assert!(outcome.created());
        assert_eq!(pipeline.stats().purged, 1);
    }

    #[test]
    fn batch_reports_in_order_and_isolates_panics() {
        let pipeline = pipeline();
        let messages = vec![
            message("E-1", 10).with_field("F", Value::Integer(1)),
            message("E-2", 10).with_field("F", Value::Integer(-1)),
            message("", 10),
            message("E-3", 10).with_field("F", Value::Integer(3)),
        ];
        let reports = pipeline.ingest_batch(&messages, 3);

        assert_eq!(reports.len(), 4);
        for (i, report) in reports.iter().enumerate() {
            assert_eq!(report.index, i);
        }
        assert!(reports[0].result.is_ok());
        assert!(matches!(reports[1].result, Err(CoreError::Panicked { .. })));
        assert!(matches!(reports[2].result, Err(CoreError::MissingNaturalKey { .. })));
        assert!(reports[3].result.is_ok());
        assert_eq!(pipeline.locks().held_count(), 0);

        let stats = pipeline.stats();
        assert_eq!(stats.received, 4);
        assert_eq!(stats.failed_fatal, 2);
    }
}
