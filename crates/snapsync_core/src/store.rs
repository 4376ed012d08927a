//! Entity and purge marker persistence.
//!
//! The pipeline talks to storage through [`EntityStore`] and
//! [`PurgeMarkerStore`]. The in-memory implementations are complete enough
//! for tests and the CLI: commits are all-or-nothing and checked against the
//! revision the writer loaded.

use crate::entity::CanonicalEntity;
use crate::error::{CoreError, CoreResult};
use crate::types::{EntityId, NaturalKey, SourceVersion};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Persistence for canonical entities.
pub trait EntityStore: Send + Sync {
    /// Finds an entity by natural key.
    fn find_by_key(&self, key: &NaturalKey) -> CoreResult<Option<CanonicalEntity>>;

    /// Loads the persisted state of an entity.
    fn load(&self, id: EntityId) -> CoreResult<Option<CanonicalEntity>>;

    /// Inserts a new entity. Fails if the natural key is taken.
    fn insert(&self, entity: CanonicalEntity) -> CoreResult<CanonicalEntity>;

    /// Replaces an entity atomically.
    ///
    /// Fails with [`CoreError::WriteConflict`] if the persisted revision is
    /// not the one `entity` was loaded at. Returns the stored state with its
    /// new revision.
    fn commit(&self, entity: CanonicalEntity) -> CoreResult<CanonicalEntity>;

    /// Deletes an entity, returning what was removed.
    fn delete(&self, id: EntityId) -> CoreResult<Option<CanonicalEntity>>;

    /// Lists all entities ordered by natural key.
    fn list(&self) -> CoreResult<Vec<CanonicalEntity>>;
}

/// Out-of-band purge markers.
pub trait PurgeMarkerStore: Send + Sync {
    /// Version as of which the key was purged, if ever.
    fn purged_as_of(&self, key: &NaturalKey) -> CoreResult<Option<SourceVersion>>;

    /// Records a purge. A later marker never moves an existing one backwards.
    fn record_purge(&self, key: &NaturalKey, as_of: SourceVersion) -> CoreResult<()>;

    /// Returns true if snapshots at `version` must not recreate the key.
    fn is_purged(&self, key: &NaturalKey, version: SourceVersion) -> CoreResult<bool> {
        Ok(self.purged_as_of(key)?.is_some_and(|marker| marker >= version))
    }
}

#[derive(Debug, Default)]
struct Tables {
    entities: HashMap<EntityId, CanonicalEntity>,
    keys: HashMap<NaturalKey, EntityId>,
}

/// In-memory [`EntityStore`].
#[derive(Debug, Default)]
pub struct MemoryEntityStore {
    tables: RwLock<Tables>,
    failing_commits: AtomicUsize,
    commits: AtomicU64,
}

impl MemoryEntityStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` commits fail with a persistence error.
    pub fn fail_next_commits(&self, count: usize) {
        self.failing_commits.store(count, Ordering::SeqCst);
    }

    /// Number of successful commits.
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    /// Number of stored entities.
    pub fn len(&self) -> usize {
        self.tables.read().entities.len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.tables.read().entities.is_empty()
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl EntityStore for MemoryEntityStore {
    fn find_by_key(&self, key: &NaturalKey) -> CoreResult<Option<CanonicalEntity>> {
        let tables = self.tables.read();
        Ok(tables
            .keys
            .get(key)
            .and_then(|id| tables.entities.get(id))
            .cloned())
    }

    fn load(&self, id: EntityId) -> CoreResult<Option<CanonicalEntity>> {
        Ok(self.tables.read().entities.get(&id).cloned())
    }

    fn insert(&self, mut entity: CanonicalEntity) -> CoreResult<CanonicalEntity> {
        let mut tables = self.tables.write();
        if tables.keys.contains_key(&entity.natural_key) {
            return Err(CoreError::DuplicateKey {
                key: entity.natural_key.to_string(),
            });
        }
        entity.revision = 1;
        tables.keys.insert(entity.natural_key.clone(), entity.id);
        tables.entities.insert(entity.id, entity.clone());
        Ok(entity)
    }

    fn commit(&self, mut entity: CanonicalEntity) -> CoreResult<CanonicalEntity> {
        let mut tables = self.tables.write();
        let stored = tables
            .entities
            .get(&entity.id)
            .ok_or_else(|| CoreError::EntityVanished {
                key: entity.natural_key.to_string(),
            })?;

        if stored.natural_key != entity.natural_key {
            return Err(CoreError::invariant(format!(
                "natural key of {} cannot change from {} to {}",
                entity.id, stored.natural_key, entity.natural_key
            )));
        }
        if stored.revision != entity.revision {
            return Err(CoreError::WriteConflict {
                key: entity.natural_key.to_string(),
                expected: entity.revision,
                actual: stored.revision,
            });
        }
        for child in entity.children.values().flatten() {
            for record in &child.tracking {
                record.validate()?;
            }
        }
        if self.take_injected_failure() {
            return Err(CoreError::persistence(format!(
                "injected commit failure for {}",
                entity.natural_key
            )));
        }

        entity.revision += 1;
        tables.entities.insert(entity.id, entity.clone());
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(entity)
    }

    fn delete(&self, id: EntityId) -> CoreResult<Option<CanonicalEntity>> {
        let mut tables = self.tables.write();
        let removed = tables.entities.remove(&id);
        if let Some(entity) = &removed {
            tables.keys.remove(&entity.natural_key);
        }
        Ok(removed)
    }

    fn list(&self) -> CoreResult<Vec<CanonicalEntity>> {
        let mut all: Vec<_> = self.tables.read().entities.values().cloned().collect();
        all.sort_by(|a, b| a.natural_key.cmp(&b.natural_key));
        Ok(all)
    }
}

/// In-memory [`PurgeMarkerStore`].
#[derive(Debug, Default)]
pub struct MemoryPurgeMarkerStore {
    markers: RwLock<HashMap<NaturalKey, SourceVersion>>,
}

impl MemoryPurgeMarkerStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl PurgeMarkerStore for MemoryPurgeMarkerStore {
    fn purged_as_of(&self, key: &NaturalKey) -> CoreResult<Option<SourceVersion>> {
        Ok(self.markers.read().get(key).copied())
    }

    fn record_purge(&self, key: &NaturalKey, as_of: SourceVersion) -> CoreResult<()> {
        let mut markers = self.markers.write();
        let marker = markers.entry(key.clone()).or_insert(as_of);
        if as_of > *marker {
            *marker = as_of;
        }
        Ok(())
    }
}
