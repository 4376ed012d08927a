//! Push engine state machine.

use crate::config::{FailureMode, PushConfig};
use crate::error::{PushError, PushResult};
use crate::remote::RemoteAdapter;
use crate::source::{LocalRecord, RecordSource};
use chrono::Utc;
use parking_lot::RwLock;
use snapsync_codec::fingerprint;
use snapsync_core::{LockScope, LockService, SyncRecord, SyncRecordStore};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// The current state of the push engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushState {
    /// No run has started.
    Idle,
    /// Fetching the next page from the source.
    Paging,
    /// Pushing the records of a page.
    Pushing,
    /// The last run finished.
    Completed,
    /// The last run stopped on an error.
    Halted,
}

impl PushState {
    /// Returns true while a run is in progress.
    pub fn is_active(&self) -> bool {
        matches!(self, PushState::Paging | PushState::Pushing)
    }

    /// Returns true if a new run can start.
    pub fn can_start(&self) -> bool {
        !self.is_active()
    }
}

/// What happened to one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// The sync record already carries this fingerprint; nothing was called.
    AlreadySynced,
    /// The remote already reflected the local data; no push was made.
    RemoteUnchanged,
    /// The merged record was pushed.
    Pushed,
    /// The remote failed; the message is stored on the sync record.
    Failed(String),
}

/// Statistics across runs.
#[derive(Debug, Clone, Default)]
pub struct PushStats {
    /// Runs completed or halted.
    pub runs: u64,
    /// Records pushed.
    pub pushed: u64,
    /// Records found already in sync.
    pub unchanged: u64,
    /// Records that failed.
    pub failed: u64,
    /// Last run error, if any.
    pub last_error: Option<String>,
}

/// Result of one run.
#[derive(Debug, Clone, Default)]
pub struct PushRunReport {
    /// Records pushed.
    pub synced: usize,
    /// Records already in sync locally or remotely.
    pub unchanged: usize,
    /// Records that failed.
    pub failed: usize,
    /// Keys that failed, in failure order.
    pub failed_keys: Vec<String>,
    /// Records skipped because their key already failed in this run.
    pub skipped_repeats: usize,
    /// Pages fetched.
    pub passes: u32,
    /// True if the run stopped at the pass bound rather than on an empty
    /// or exhausted page.
    pub halted_by_pass_limit: bool,
    /// Wall time of the run.
    pub duration: Duration,
}

/// Pushes local records to one partner.
pub struct PushEngine<R: RemoteAdapter, T: SyncRecordStore> {
    config: PushConfig,
    remote: Arc<R>,
    records: Arc<T>,
    locks: Arc<LockService>,
    state: RwLock<PushState>,
    stats: RwLock<PushStats>,
}

impl<R: RemoteAdapter, T: SyncRecordStore> PushEngine<R, T> {
    /// Creates an engine with its own lock service.
    pub fn new(config: PushConfig, remote: Arc<R>, records: Arc<T>) -> Self {
        let locks = Arc::new(LockService::new(config.lock.clone()));
        Self {
            config,
            remote,
            records,
            locks,
            state: RwLock::new(PushState::Idle),
            stats: RwLock::new(PushStats::default()),
        }
    }

    /// Shares a lock service with other components.
    pub fn with_locks(mut self, locks: Arc<LockService>) -> Self {
        self.locks = locks;
        self
    }

    /// Gets the configuration.
    pub fn config(&self) -> &PushConfig {
        &self.config
    }

    /// Gets the current state.
    pub fn state(&self) -> PushState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> PushStats {
        self.stats.read().clone()
    }

    /// Syncs one record under its sync record lock.
    ///
    /// Remote failures are recorded on the sync record and returned as
    /// [`RecordOutcome::Failed`].
    ///
    /// # Errors
    ///
    /// Returns lock and store errors.
    pub fn sync_record(&self, record: &LocalRecord) -> PushResult<RecordOutcome> {
        let partner = &self.config.partner;
        let local_fp = fingerprint(&record.projection);
        let name = LockScope::SyncRecord {
            record_key: &record.key,
            partner,
        }
        .name();

        let outcome = self.locks.with_lock(&name, || -> PushResult<RecordOutcome> {
            let existing = self.records.find(&record.key, partner)?;
            if existing.as_ref().is_some_and(|s| s.is_synced_with(&local_fp)) {
                debug!(key = %record.key, partner = %partner, "already synced");
                return Ok(RecordOutcome::AlreadySynced);
            }

            let mut sync = existing.unwrap_or_else(|| SyncRecord::new(&record.key, partner.clone()));
            match self.exchange(record) {
                Ok(outcome) => {
                    sync.record_success(local_fp, Utc::now(), self.config.confirm_grace);
                    self.records.upsert(sync)?;
                    info!(key = %record.key, partner = %partner, ?outcome, "record synced");
                    Ok(outcome)
                }
                Err(PushError::Remote { message, .. }) => {
                    sync.record_failure(message.clone());
                    self.records.upsert(sync)?;
                    warn!(key = %record.key, partner = %partner, error = %message, "push failed");
                    Ok(RecordOutcome::Failed(message))
                }
                Err(e) => Err(e),
            }
        })?;

        let mut stats = self.stats.write();
        match &outcome {
            RecordOutcome::AlreadySynced | RecordOutcome::RemoteUnchanged => stats.unchanged += 1,
            RecordOutcome::Pushed => stats.pushed += 1,
            RecordOutcome::Failed(_) => stats.failed += 1,
        }
        Ok(outcome)
    }

    fn exchange(&self, record: &LocalRecord) -> PushResult<RecordOutcome> {
        let remote = self.remote.fetch_remote(&record.projection)?;
        let before = remote
            .as_ref()
            .and_then(|r| self.remote.remote_fingerprint(r));
        let merged = self
            .remote
            .merge_local_into_remote(remote, &record.projection)?;

        if let Some(before) = before {
            if self.remote.remote_fingerprint(&merged) == Some(before) {
                return Ok(RecordOutcome::RemoteUnchanged);
            }
        }
        self.remote.push_remote(&merged)?;
        Ok(RecordOutcome::Pushed)
    }

    /// Pushes every page `source` yields.
    ///
    /// Paging continues while the last page was non-empty and held at least
    /// one key that has not failed in this run, up to `max_passes` pages.
    ///
    /// # Errors
    ///
    /// Returns [`PushError::AlreadyRunning`] if a run is in progress,
    /// [`PushError::Halted`] on the first failure in
    /// [`FailureMode::Propagate`], and source, lock or store errors.
    pub fn run(&self, source: &mut dyn RecordSource) -> PushResult<PushRunReport> {
        {
            let mut state = self.state.write();
            if !state.can_start() {
                return Err(PushError::AlreadyRunning);
            }
            *state = PushState::Paging;
        }

        let started = Instant::now();
        let mut report = PushRunReport::default();
        let result = self.run_pages(source, &mut report);
        report.duration = started.elapsed();

        let mut stats = self.stats.write();
        stats.runs += 1;
        match result {
            Ok(()) => {
                *self.state.write() = PushState::Completed;
                stats.last_error = None;
                info!(
                    partner = %self.config.partner,
                    synced = report.synced,
                    unchanged = report.unchanged,
                    failed = report.failed,
                    passes = report.passes,
                    "push run completed"
                );
                Ok(report)
            }
            Err(e) => {
                *self.state.write() = PushState::Halted;
                stats.last_error = Some(e.to_string());
                warn!(partner = %self.config.partner, error = %e, "push run halted");
                Err(e)
            }
        }
    }

    fn run_pages(
        &self,
        source: &mut dyn RecordSource,
        report: &mut PushRunReport,
    ) -> PushResult<()> {
        let mut failed: HashSet<String> = HashSet::new();

        loop {
            if report.passes >= self.config.max_passes {
                report.halted_by_pass_limit = true;
                warn!(
                    partner = %self.config.partner,
                    passes = report.passes,
                    "push run stopped at pass limit"
                );
                return Ok(());
            }

            *self.state.write() = PushState::Paging;
            let page = source.next_page(self.config.page_size, &failed)?;
            report.passes += 1;

            if page.is_empty() || page.iter().all(|r| failed.contains(&r.key)) {
                debug!(passes = report.passes, "no pushable records left");
                return Ok(());
            }

            *self.state.write() = PushState::Pushing;
            for record in page {
                if failed.contains(&record.key) {
                    report.skipped_repeats += 1;
                    continue;
                }
                match self.sync_record(&record)? {
                    RecordOutcome::AlreadySynced | RecordOutcome::RemoteUnchanged => {
                        report.unchanged += 1;
                    }
                    RecordOutcome::Pushed => report.synced += 1,
                    RecordOutcome::Failed(message) => {
                        report.failed += 1;
                        report.failed_keys.push(record.key.clone());
                        failed.insert(record.key.clone());
                        if self.config.failure_mode == FailureMode::Propagate {
                            return Err(PushError::Halted {
                                record_key: record.key,
                                message,
                            });
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{MockRemote, RemoteCall};
    use crate::source::PendingRecordSource;
    use snapsync_codec::Value;
    use snapsync_core::{MemorySyncRecordStore, PartnerId};

    fn record(key: &str, qty: i64) -> LocalRecord {
        LocalRecord::new(
            key,
            Value::object([("ref", Value::from(key)), ("qty", Value::Integer(qty))]),
        )
    }

    fn engine(
        config: PushConfig,
    ) -> (
        PushEngine<MockRemote, MemorySyncRecordStore>,
        Arc<MockRemote>,
        Arc<MemorySyncRecordStore>,
    ) {
        let remote = Arc::new(MockRemote::new("ref"));
        let store = Arc::new(MemorySyncRecordStore::new());
        let engine = PushEngine::new(config, remote.clone(), store.clone());
        (engine, remote, store)
    }

    fn partner() -> PartnerId {
        PartnerId::new("broker")
    }

    #[test]
    fn state_helpers() {
        assert!(PushState::Idle.can_start());
        assert!(PushState::Halted.can_start());
        assert!(PushState::Pushing.is_active());
        assert!(!PushState::Paging.can_start());
    }

    #[test]
    fn first_push_then_already_synced() {
        let (engine, remote, store) = engine(PushConfig::new(partner()));
        let rec = record("E-1", 3);

        assert_eq!(engine.sync_record(&rec).unwrap(), RecordOutcome::Pushed);
        assert_eq!(engine.sync_record(&rec).unwrap(), RecordOutcome::AlreadySynced);
        assert_eq!(remote.push_count(), 1);
        assert_eq!(remote.calls().len(), 2);

        let sync = store.find("E-1", &partner()).unwrap().unwrap();
        assert_eq!(sync.fingerprint, Some(fingerprint(&rec.projection)));
        assert!(sync.failure_message.is_none());
        assert_eq!(
            sync.confirmed_at.unwrap() - sync.sent_at.unwrap(),
            engine.config().confirm_grace
        );
    }

    #[test]
    fn remote_already_matching_is_not_pushed() {
        let (engine, remote, store) = engine(PushConfig::new(partner()));
        let rec = record("E-1", 3);
        remote.seed(rec.projection.clone());

        assert_eq!(engine.sync_record(&rec).unwrap(), RecordOutcome::RemoteUnchanged);
        assert_eq!(remote.calls(), vec![RemoteCall::Fetch("E-1".into())]);
        assert!(store.find("E-1", &partner()).unwrap().unwrap().confirmed_at.is_some());
    }

    #[test]
    fn failure_keeps_previous_fingerprint() {
        let (engine, remote, store) = engine(PushConfig::new(partner()));
        let first = record("E-1", 1);
        engine.sync_record(&first).unwrap();

        remote.fail_pushes_for("E-1");
        let outcome = engine.sync_record(&record("E-1", 2)).unwrap();
        assert!(matches!(outcome, RecordOutcome::Failed(_)));

        let sync = store.find("E-1", &partner()).unwrap().unwrap();
        assert_eq!(sync.fingerprint, Some(fingerprint(&first.projection)));
        assert!(sync.confirmed_at.is_none());
        assert!(sync.is_failed());
        assert_eq!(engine.stats().failed, 1);
    }

    #[test]
    fn changed_content_is_pushed_again() {
        let (engine, remote, _) = engine(PushConfig::new(partner()));
        engine.sync_record(&record("E-1", 1)).unwrap();
        assert_eq!(
            engine.sync_record(&record("E-1", 2)).unwrap(),
            RecordOutcome::Pushed
        );
        assert_eq!(
            remote.get("E-1").unwrap().get("qty"),
            Some(&Value::Integer(2))
        );
    }

    #[test]
    fn run_pushes_all_pending_records() {
        let (engine, remote, store) = engine(PushConfig::new(partner()).with_page_size(2));
        let records = (0..5).map(|i| record(&format!("E-{i}"), i)).collect();
        let mut source = PendingRecordSource::new(records, store, partner());

        let report = engine.run(&mut source).unwrap();
        assert_eq!(report.synced, 5);
        assert_eq!(report.failed, 0);
        // Three pages of work and one empty page.
        assert_eq!(report.passes, 4);
        assert!(!report.halted_by_pass_limit);
        assert_eq!(remote.push_count(), 5);
        assert_eq!(engine.state(), PushState::Completed);
    }

    #[test]
    fn propagate_mode_halts() {
        let (engine, remote, store) =
            engine(PushConfig::new(partner()).with_failure_mode(FailureMode::Propagate));
        remote.fail_pushes_for("E-0");
        let records = vec![record("E-0", 0), record("E-1", 1)];
        let mut source = PendingRecordSource::new(records, store.clone(), partner());

        let err = engine.run(&mut source).unwrap_err();
        assert!(matches!(err, PushError::Halted { ref record_key, .. } if record_key == "E-0"));
        assert_eq!(engine.state(), PushState::Halted);
        assert!(store.find("E-1", &partner()).unwrap().is_none());
        assert!(engine.stats().last_error.is_some());
    }

    #[test]
    fn pass_limit_bounds_the_run() {
        let (engine, _, store) = engine(
            PushConfig::new(partner())
                .with_page_size(1)
                .with_max_passes(2),
        );
        let records = (0..5).map(|i| record(&format!("E-{i}"), i)).collect();
        let mut source = PendingRecordSource::new(records, store, partner());

        let report = engine.run(&mut source).unwrap();
        assert_eq!(report.passes, 2);
        assert_eq!(report.synced, 2);
        assert!(report.halted_by_pass_limit);
    }
}
