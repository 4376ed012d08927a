//! Outbound push bookkeeping.
//!
//! A [`SyncRecord`] tracks one local record against one remote partner. The
//! record is the only place a push outcome is remembered, so its fingerprint
//! only ever moves forward on a verified success.

use crate::error::{CoreError, CoreResult};
use crate::types::PartnerId;
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;
use snapsync_codec::Fingerprint;
use std::collections::HashMap;
use uuid::Uuid;

/// Identity of a sync record, stable across upserts and child replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SyncRecordId(Uuid);

impl SyncRecordId {
    /// Generates a fresh id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SyncRecordId {
    fn default() -> Self {
        Self::new()
    }
}

/// Push state of one (record, partner) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRecord {
    /// Identity.
    pub id: SyncRecordId,
    /// Key of the local record.
    pub record_key: String,
    /// Remote partner.
    pub partner: PartnerId,
    /// Fingerprint of the last successfully pushed projection.
    pub fingerprint: Option<Fingerprint>,
    /// When the last successful push happened.
    pub sent_at: Option<DateTime<Utc>>,
    /// When the partner is considered to have confirmed the push.
    pub confirmed_at: Option<DateTime<Utc>>,
    /// Error from the last failed attempt.
    pub failure_message: Option<String>,
}

impl SyncRecord {
    /// Creates an empty record for a pair.
    pub fn new(record_key: impl Into<String>, partner: PartnerId) -> Self {
        Self {
            id: SyncRecordId::new(),
            record_key: record_key.into(),
            partner,
            fingerprint: None,
            sent_at: None,
            confirmed_at: None,
            failure_message: None,
        }
    }

    /// Returns true if the last attempt failed.
    pub fn is_failed(&self) -> bool {
        self.failure_message.is_some()
    }

    /// Returns true if `fingerprint` was already pushed successfully.
    pub fn is_synced_with(&self, fingerprint: &Fingerprint) -> bool {
        self.sent_at.is_some() && !self.is_failed() && self.fingerprint.as_ref() == Some(fingerprint)
    }

    /// Records a verified push of `fingerprint`.
    pub fn record_success(&mut self, fingerprint: Fingerprint, now: DateTime<Utc>, grace: TimeDelta) {
        self.fingerprint = Some(fingerprint);
        self.sent_at = Some(now);
        self.confirmed_at = Some(now + grace);
        self.failure_message = None;
    }

    /// Records a failed push. The stored fingerprint is left untouched.
    pub fn record_failure(&mut self, message: impl Into<String>) {
        self.failure_message = Some(message.into());
        self.confirmed_at = None;
    }

    /// Checks that a confirmed record carries no failure.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvariantViolation`] otherwise.
    pub fn validate(&self) -> CoreResult<()> {
        if self.confirmed_at.is_some() && self.failure_message.is_some() {
            return Err(CoreError::invariant(format!(
                "sync record {}/{} is confirmed but carries a failure",
                self.record_key, self.partner
            )));
        }
        Ok(())
    }
}

/// Persistence for standalone sync records.
pub trait SyncRecordStore: Send + Sync {
    /// Finds the record for a pair.
    fn find(&self, record_key: &str, partner: &PartnerId) -> CoreResult<Option<SyncRecord>>;

    /// Inserts or replaces the record for its pair.
    fn upsert(&self, record: SyncRecord) -> CoreResult<SyncRecord>;

    /// Lists records whose last attempt failed.
    fn failed(&self, partner: &PartnerId) -> CoreResult<Vec<SyncRecord>>;
}

/// In-memory [`SyncRecordStore`].
#[derive(Debug, Default)]
pub struct MemorySyncRecordStore {
    records: RwLock<HashMap<(String, PartnerId), SyncRecord>>,
}

impl MemorySyncRecordStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl SyncRecordStore for MemorySyncRecordStore {
    fn find(&self, record_key: &str, partner: &PartnerId) -> CoreResult<Option<SyncRecord>> {
        Ok(self
            .records
            .read()
            .get(&(record_key.to_string(), partner.clone()))
            .cloned())
    }

    fn upsert(&self, mut record: SyncRecord) -> CoreResult<SyncRecord> {
        record.validate()?;
        let mut records = self.records.write();
        let pair = (record.record_key.clone(), record.partner.clone());
        if let Some(existing) = records.get(&pair) {
            record.id = existing.id;
        }
        records.insert(pair, record.clone());
        Ok(record)
    }

    fn failed(&self, partner: &PartnerId) -> CoreResult<Vec<SyncRecord>> {
        let mut failed: Vec<_> = self
            .records
            .read()
            .values()
            .filter(|r| &r.partner == partner && r.is_failed())
            .cloned()
            .collect();
        failed.sort_by(|a, b| a.record_key.cmp(&b.record_key));
        Ok(failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snapsync_codec::{fingerprint, Value};

    fn partner() -> PartnerId {
        PartnerId::new("broker-a")
    }

    #[test]
    fn success_then_failure_keeps_fingerprint() {
        let fp = fingerprint(&Value::from("v1"));
        let now = Utc::now();
        let mut record = SyncRecord::new("E-1", partner());

        record.record_success(fp, now, TimeDelta::minutes(5));
        assert!(record.is_synced_with(&fp));
        assert_eq!(record.confirmed_at, Some(now + TimeDelta::minutes(5)));

        record.record_failure("HTTP 502");
        assert!(!record.is_synced_with(&fp));
        assert_eq!(record.fingerprint, Some(fp));
        assert_eq!(record.confirmed_at, None);
        record.validate().unwrap();
    }

    #[test]
    fn confirmed_failure_is_rejected() {
        let mut record = SyncRecord::new("E-1", partner());
        record.confirmed_at = Some(Utc::now());
        record.failure_message = Some("boom".into());
        assert!(matches!(
            record.validate(),
            Err(CoreError::InvariantViolation { .. })
        ));

        let store = MemorySyncRecordStore::new();
        assert!(store.upsert(record).is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn one_record_per_pair() {
        let store = MemorySyncRecordStore::new();
        let first = store.upsert(SyncRecord::new("E-1", partner())).unwrap();

        let mut second = SyncRecord::new("E-1", partner());
        second.record_failure("timeout");
        let stored = store.upsert(second).unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(stored.id, first.id);
        assert_eq!(store.failed(&partner()).unwrap().len(), 1);
        assert!(store.failed(&PartnerId::new("other")).unwrap().is_empty());
    }
}
