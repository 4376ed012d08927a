//! Canonical entities and their owned children.

use crate::field::FieldValue;
use crate::sync_record::SyncRecord;
use crate::types::{ChildId, EntityId, NaturalKey, PartnerId, SourceVersion};
use snapsync_codec::{Fingerprintable, Value};
use std::collections::BTreeMap;

/// Named attribute values.
pub type Attributes = BTreeMap<String, FieldValue>;

/// Renders attributes as a projection map.
pub fn attributes_value(attributes: &Attributes) -> Value {
    Value::object(attributes.iter().map(|(k, v)| (k.as_str(), v.to_value())))
}

/// A child owned by a canonical entity, such as an entry line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildEntity {
    /// Database identity; changes when the child is replaced.
    pub id: ChildId,
    /// Business key used to match incoming children.
    pub natural_key: String,
    /// Merged attribute values.
    pub fields: Attributes,
    /// Attributes stamped locally after the merge, such as status markers.
    /// Cleared on every reconcile and rebuilt by the profile.
    pub derived: Attributes,
    /// Push bookkeeping that must survive replacement.
    pub tracking: Vec<SyncRecord>,
}

impl ChildEntity {
    /// Creates a child with no tracking metadata.
    pub fn new(natural_key: impl Into<String>, fields: Attributes) -> Self {
        Self {
            id: ChildId::new(),
            natural_key: natural_key.into(),
            fields,
            derived: Attributes::new(),
            tracking: Vec::new(),
        }
    }

    /// Gets an attribute, merged first, then derived.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name).or_else(|| self.derived.get(name))
    }

    /// Gets the tracking record for a partner.
    pub fn tracking_for(&self, partner: &PartnerId) -> Option<&SyncRecord> {
        self.tracking.iter().find(|r| &r.partner == partner)
    }

    /// Inserts or replaces the tracking record for its partner.
    pub fn upsert_tracking(&mut self, record: SyncRecord) {
        match self.tracking.iter_mut().find(|r| r.partner == record.partner) {
            Some(slot) => *slot = record,
            None => self.tracking.push(record),
        }
    }
}

impl Fingerprintable for ChildEntity {
    fn projection(&self) -> Value {
        Value::object([
            ("key", Value::from(self.natural_key.as_str())),
            ("fields", attributes_value(&self.fields)),
            ("derived", attributes_value(&self.derived)),
        ])
    }
}

/// The locally owned representation of an external-world object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalEntity {
    /// Database identity.
    pub id: EntityId,
    /// Business key.
    pub natural_key: NaturalKey,
    /// Bumped by the store on every commit.
    pub revision: u64,
    /// Version of the last committed snapshot.
    pub last_source_version: SourceVersion,
    /// Newest snapshot version accepted for processing.
    ///
    /// Informational only: races between enqueue and processing are caught
    /// by the store's revision check, which makes the loser reload.
    pub expected_update_time: SourceVersion,
    /// Attributes merged from snapshots by field directives.
    pub fields: Attributes,
    /// Attributes computed locally (aggregates, domain calculations).
    pub derived: Attributes,
    /// Owned child collections by name.
    pub children: BTreeMap<String, Vec<ChildEntity>>,
}

impl CanonicalEntity {
    /// Creates a bare entity stamped with the first snapshot's version.
    pub fn new(natural_key: NaturalKey, version: SourceVersion) -> Self {
        Self {
            id: EntityId::new(),
            natural_key,
            revision: 0,
            last_source_version: version,
            expected_update_time: version,
            fields: Attributes::new(),
            derived: Attributes::new(),
            children: BTreeMap::new(),
        }
    }

    /// Gets a merged attribute.
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Gets a derived attribute.
    pub fn derived(&self, name: &str) -> Option<&FieldValue> {
        self.derived.get(name)
    }

    /// Children of a collection; empty if the collection is unknown.
    pub fn children(&self, collection: &str) -> &[ChildEntity] {
        self.children.get(collection).map_or(&[], Vec::as_slice)
    }

    /// Finds a child by natural key.
    pub fn child(&self, collection: &str, natural_key: &str) -> Option<&ChildEntity> {
        self.children(collection)
            .iter()
            .find(|c| c.natural_key == natural_key)
    }

    /// Mutable access to a child by natural key.
    pub fn child_mut(&mut self, collection: &str, natural_key: &str) -> Option<&mut ChildEntity> {
        self.children
            .get_mut(collection)?
            .iter_mut()
            .find(|c| c.natural_key == natural_key)
    }

    /// Returns true if both hold the same persisted content, ignoring the
    /// store revision.
    pub fn same_content(&self, other: &Self) -> bool {
        self.id == other.id
            && self.natural_key == other.natural_key
            && self.last_source_version == other.last_source_version
            && self.expected_update_time == other.expected_update_time
            && self.fields == other.fields
            && self.derived == other.derived
            && self.children == other.children
    }
}

impl Fingerprintable for CanonicalEntity {
    fn projection(&self) -> Value {
        let children = Value::object(self.children.iter().map(|(name, items)| {
            (
                name.as_str(),
                Value::Array(items.iter().map(Fingerprintable::projection).collect()),
            )
        }));
        Value::object([
            ("key", Value::from(self.natural_key.as_str())),
            ("version", Value::from(self.last_source_version.to_string())),
            ("fields", attributes_value(&self.fields)),
            ("derived", attributes_value(&self.derived)),
            ("children", children),
        ])
    }
}
