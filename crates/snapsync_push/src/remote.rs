//! Remote system abstraction.

use crate::error::{PushError, PushResult};
use parking_lot::Mutex;
use snapsync_codec::{fingerprint, Fingerprint, Value};
use std::collections::{HashMap, HashSet};

/// A partner system records are pushed to.
///
/// The engine calls `fetch_remote`, then `merge_local_into_remote`, then
/// `push_remote` only if the merge changed the remote record.
pub trait RemoteAdapter: Send + Sync {
    /// Fetches the remote counterpart of a local projection, if any.
    fn fetch_remote(&self, local: &Value) -> PushResult<Option<Value>>;

    /// Produces the remote record that should exist after the push.
    fn merge_local_into_remote(&self, remote: Option<Value>, local: &Value) -> PushResult<Value>;

    /// Writes the merged record to the remote system.
    fn push_remote(&self, merged: &Value) -> PushResult<()>;

    /// Fingerprint used to detect a merge that changed nothing.
    ///
    /// Return `None` for remotes whose records cannot be compared; every merge
    /// is then pushed.
    fn remote_fingerprint(&self, remote: &Value) -> Option<Fingerprint> {
        Some(fingerprint(remote))
    }
}

/// A call observed by [`MockRemote`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    /// `fetch_remote` for a key.
    Fetch(String),
    /// `push_remote` for a key.
    Push(String),
}

/// In-memory remote for testing.
///
/// Records are stored by the text value of `key_field`. Merging overlays the
/// local map's entries onto the remote map.
pub struct MockRemote {
    key_field: String,
    records: Mutex<HashMap<String, Value>>,
    failing: Mutex<HashSet<String>>,
    calls: Mutex<Vec<RemoteCall>>,
}

impl MockRemote {
    /// Creates an empty remote keyed by `key_field`.
    pub fn new(key_field: impl Into<String>) -> Self {
        Self {
            key_field: key_field.into(),
            records: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Stores a record as if it already existed remotely.
    pub fn seed(&self, record: Value) {
        if let Some(key) = self.key_of(&record) {
            self.records.lock().insert(key, record);
        }
    }

    /// Makes every push for `key` fail.
    pub fn fail_pushes_for(&self, key: impl Into<String>) {
        self.failing.lock().insert(key.into());
    }

    /// Removes all injected failures.
    pub fn clear_failures(&self) {
        self.failing.lock().clear();
    }

    /// Returns the stored record for `key`.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.records.lock().get(key).cloned()
    }

    /// Returns every call made so far.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().clone()
    }

    /// Number of push calls made for `key`.
    pub fn push_count_for(&self, key: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, RemoteCall::Push(k) if k == key))
            .count()
    }

    /// Total number of push calls.
    pub fn push_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, RemoteCall::Push(_)))
            .count()
    }

    fn key_of(&self, record: &Value) -> Option<String> {
        record
            .get(&self.key_field)
            .and_then(Value::as_text)
            .map(str::to_string)
    }

    fn require_key(&self, record: &Value) -> PushResult<String> {
        self.key_of(record).ok_or_else(|| {
            PushError::remote(format!("record has no text field {}", self.key_field), false)
        })
    }
}

impl RemoteAdapter for MockRemote {
    fn fetch_remote(&self, local: &Value) -> PushResult<Option<Value>> {
        let key = self.require_key(local)?;
        self.calls.lock().push(RemoteCall::Fetch(key.clone()));
        Ok(self.records.lock().get(&key).cloned())
    }

    fn merge_local_into_remote(&self, remote: Option<Value>, local: &Value) -> PushResult<Value> {
        let local_pairs = local
            .as_map()
            .ok_or_else(|| PushError::remote("local projection is not a map", false))?;
        let mut pairs = match remote {
            Some(Value::Map(pairs)) => pairs,
            Some(_) => return Err(PushError::remote("remote record is not a map", false)),
            None => Vec::new(),
        };
        pairs.extend(local_pairs.iter().cloned());
        Ok(Value::map(pairs))
    }

    fn push_remote(&self, merged: &Value) -> PushResult<()> {
        let key = self.require_key(merged)?;
        self.calls.lock().push(RemoteCall::Push(key.clone()));
        if self.failing.lock().contains(&key) {
            return Err(PushError::remote(format!("remote rejected {key}"), false));
        }
        self.records.lock().insert(key, merged.clone());
        Ok(())
    }
}
