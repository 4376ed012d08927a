//! Local record sources.
//!
//! Two shapes are supported:
//!
//! - [`PendingRecordSource`] pages over local records that still need a push,
//!   so a record that failed comes back on the next page until it succeeds.
//! - [`RowBufferedSource`] reads raw rows through a forward-only cursor and
//!   assembles them into records. One row may complete zero, one or several
//!   records.

use crate::error::{PushError, PushResult};
use snapsync_codec::{fingerprint, Fingerprintable, Value};
use snapsync_core::{PartnerId, SyncRecordStore};
use std::collections::HashSet;
use std::sync::Arc;

/// A local record ready to be pushed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalRecord {
    /// Natural key of the record.
    pub key: String,
    /// Projection sent to the remote.
    pub projection: Value,
}

impl LocalRecord {
    /// Creates a record.
    pub fn new(key: impl Into<String>, projection: Value) -> Self {
        Self {
            key: key.into(),
            projection,
        }
    }
}

impl Fingerprintable for LocalRecord {
    fn projection(&self) -> Value {
        self.projection.clone()
    }
}

/// Supplies pages of records to the push engine.
pub trait RecordSource {
    /// Returns up to `limit` records. An empty page ends the run.
    ///
    /// `failed` holds keys that already failed in this run. Sources that can
    /// seek should leave them out; forward-only sources may ignore it, and the
    /// engine skips the repeats.
    fn next_page(
        &mut self,
        limit: usize,
        failed: &HashSet<String>,
    ) -> PushResult<Vec<LocalRecord>>;
}

/// Pages over records whose latest content has not been synced with a
/// partner.
///
/// Synced state is read from the sync record store at every page, so records
/// leave the source as soon as they are pushed.
pub struct PendingRecordSource<T: SyncRecordStore> {
    records: Vec<LocalRecord>,
    store: Arc<T>,
    partner: PartnerId,
}

impl<T: SyncRecordStore> PendingRecordSource<T> {
    /// Creates a source over `records`.
    pub fn new(records: Vec<LocalRecord>, store: Arc<T>, partner: PartnerId) -> Self {
        Self {
            records,
            store,
            partner,
        }
    }

    fn needs_sync(&self, record: &LocalRecord) -> PushResult<bool> {
        let fp = fingerprint(&record.projection);
        Ok(match self.store.find(&record.key, &self.partner)? {
            Some(sync) => !sync.is_synced_with(&fp),
            None => true,
        })
    }
}

impl<T: SyncRecordStore> RecordSource for PendingRecordSource<T> {
    fn next_page(
        &mut self,
        limit: usize,
        failed: &HashSet<String>,
    ) -> PushResult<Vec<LocalRecord>> {
        let mut page = Vec::new();
        for record in &self.records {
            if page.len() >= limit {
                break;
            }
            if !failed.contains(&record.key) && self.needs_sync(record)? {
                page.push(record.clone());
            }
        }
        Ok(page)
    }
}

/// A forward-only cursor over raw rows.
pub trait RowCursor {
    /// Returns up to `limit` rows and advances past them.
    fn fetch(&mut self, limit: usize) -> PushResult<Vec<Value>>;
}

/// A cursor over rows held in memory.
#[derive(Debug, Clone, Default)]
pub struct VecRowCursor {
    rows: Vec<Value>,
    position: usize,
}

impl VecRowCursor {
    /// Creates a cursor positioned before the first row.
    pub fn new(rows: Vec<Value>) -> Self {
        Self { rows, position: 0 }
    }

    /// Rows not yet fetched.
    pub fn remaining(&self) -> usize {
        self.rows.len() - self.position
    }
}

impl RowCursor for VecRowCursor {
    fn fetch(&mut self, limit: usize) -> PushResult<Vec<Value>> {
        let end = (self.position + limit).min(self.rows.len());
        let rows = self.rows[self.position..end].to_vec();
        self.position = end;
        Ok(rows)
    }
}

/// Turns rows into records, possibly buffering across rows.
pub trait RowAssembler {
    /// Consumes one row and returns the records it completed.
    ///
    /// `last_row_in_batch` is set on the final row of each fetch; buffered
    /// state must be flushed then.
    fn accept(&mut self, row: Value, last_row_in_batch: bool) -> PushResult<Vec<LocalRecord>>;
}

/// Merges consecutive rows sharing a key into one record.
///
/// The emitted projection is a map of the key field and a `rows` array of the
/// merged rows, in arrival order.
#[derive(Debug, Clone)]
pub struct GroupingAssembler {
    key_field: String,
    current: Option<(String, Vec<Value>)>,
}

impl GroupingAssembler {
    /// Creates an assembler grouping on `key_field`.
    pub fn new(key_field: impl Into<String>) -> Self {
        Self {
            key_field: key_field.into(),
            current: None,
        }
    }

    fn flush(&mut self) -> Option<LocalRecord> {
        self.current.take().map(|(key, rows)| {
            let projection = Value::object([
                (self.key_field.as_str(), Value::from(key.as_str())),
                ("rows", Value::Array(rows)),
            ]);
            LocalRecord::new(key, projection)
        })
    }
}

impl RowAssembler for GroupingAssembler {
    fn accept(&mut self, row: Value, last_row_in_batch: bool) -> PushResult<Vec<LocalRecord>> {
        let key = row
            .get(&self.key_field)
            .map(|v| v.as_text().map_or_else(|| v.to_string(), str::to_string))
            .ok_or_else(|| {
                PushError::Source(format!("row has no {} field", self.key_field))
            })?;

        let mut out = Vec::new();
        match &mut self.current {
            Some((current, rows)) if *current == key => rows.push(row),
            _ => {
                out.extend(self.flush());
                self.current = Some((key, vec![row]));
            }
        }
        if last_row_in_batch {
            out.extend(self.flush());
        }
        Ok(out)
    }
}

/// A record source built from a row cursor and an assembler.
pub struct RowBufferedSource<C: RowCursor, A: RowAssembler> {
    cursor: C,
    assembler: A,
}

impl<C: RowCursor, A: RowAssembler> RowBufferedSource<C, A> {
    /// Creates a source.
    pub fn new(cursor: C, assembler: A) -> Self {
        Self { cursor, assembler }
    }

    /// Returns the underlying cursor.
    pub fn cursor(&self) -> &C {
        &self.cursor
    }
}

impl<C: RowCursor, A: RowAssembler> RecordSource for RowBufferedSource<C, A> {
    fn next_page(
        &mut self,
        limit: usize,
        _failed: &HashSet<String>,
    ) -> PushResult<Vec<LocalRecord>> {
        let rows = self.cursor.fetch(limit)?;
        let last = rows.len();
        let mut page = Vec::new();
        for (i, row) in rows.into_iter().enumerate() {
            page.extend(self.assembler.accept(row, i + 1 == last)?);
        }
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, Utc};
    use snapsync_core::{MemorySyncRecordStore, SyncRecord};

    fn none() -> HashSet<String> {
        HashSet::new()
    }

    fn row(key: &str, n: i64) -> Value {
        Value::object([("ref", Value::from(key)), ("n", Value::Integer(n))])
    }

    #[test]
    fn grouping_merges_consecutive_rows() {
        let cursor = VecRowCursor::new(vec![row("A", 1), row("A", 2), row("B", 3), row("C", 4)]);
        let mut source = RowBufferedSource::new(cursor, GroupingAssembler::new("ref"));

        let page = source.next_page(10, &none()).unwrap();
        let keys: Vec<_> = page.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["A", "B", "C"]);
        assert_eq!(
            page[0].projection.get("rows").unwrap().as_array().unwrap().len(),
            2
        );
        assert!(source.next_page(10, &none()).unwrap().is_empty());
    }

    #[test]
    fn last_row_flush_can_emit_two_records() {
        let mut assembler = GroupingAssembler::new("ref");
        assert!(assembler.accept(row("A", 1), false).unwrap().is_empty());

        let out = assembler.accept(row("B", 2), true).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].key, "A");
        assert_eq!(out[1].key, "B");
    }

    #[test]
    fn page_boundary_splits_a_group() {
        let cursor = VecRowCursor::new(vec![row("A", 1), row("A", 2), row("A", 3)]);
        let mut source = RowBufferedSource::new(cursor, GroupingAssembler::new("ref"));

        let first = source.next_page(2, &none()).unwrap();
        let second = source.next_page(2, &none()).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(source.cursor().remaining(), 0);
    }

    #[test]
    fn row_without_key_is_a_source_error() {
        let mut assembler = GroupingAssembler::new("ref");
        let err = assembler
            .accept(Value::object([("n", Value::Integer(1))]), true)
            .unwrap_err();
        assert!(matches!(err, PushError::Source(_)));
    }

    #[test]
    fn pending_source_skips_synced_records() {
        let store = Arc::new(MemorySyncRecordStore::new());
        let partner = PartnerId::new("broker");
        let a = LocalRecord::new("A", row("A", 1));
        let b = LocalRecord::new("B", row("B", 1));

        let mut synced = SyncRecord::new("A", partner.clone());
        synced.record_success(a.fingerprint(), Utc::now(), TimeDelta::zero());
        store.upsert(synced).unwrap();

        let mut source =
            PendingRecordSource::new(vec![a.clone(), b.clone()], store.clone(), partner.clone());
        assert_eq!(source.next_page(10, &none()).unwrap(), vec![b]);

        // New content for A makes it pending again.
        let changed = LocalRecord::new("A", row("A", 2));
        let mut source = PendingRecordSource::new(vec![changed.clone()], store, partner);
        assert_eq!(source.next_page(10, &none()).unwrap(), vec![changed]);
    }

    #[test]
    fn pending_source_respects_limit() {
        let store = Arc::new(MemorySyncRecordStore::new());
        let records = (0..5)
            .map(|i| LocalRecord::new(format!("K{i}"), row(&format!("K{i}"), i)))
            .collect();
        let mut source = PendingRecordSource::new(records, store, PartnerId::new("p"));
        assert_eq!(source.next_page(2, &none()).unwrap().len(), 2);
    }

    #[test]
    fn pending_source_leaves_out_failed_keys() {
        let store = Arc::new(MemorySyncRecordStore::new());
        let records = ["A", "B", "C"]
            .iter()
            .map(|k| LocalRecord::new(*k, row(k, 1)))
            .collect();
        let mut source = PendingRecordSource::new(records, store, PartnerId::new("p"));
        let failed: HashSet<String> = ["A".to_string(), "B".to_string()].into();

        let page = source.next_page(2, &failed).unwrap();
        let keys: Vec<_> = page.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["C"]);
    }
}
