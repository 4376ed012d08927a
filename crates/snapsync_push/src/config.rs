//! Configuration for the push engine.

use chrono::TimeDelta;
use snapsync_core::{LockConfig, PartnerId};

/// What to do when a record fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailureMode {
    /// Record the failure and carry on with the batch.
    #[default]
    Continue,
    /// Record the failure and stop the run with an error.
    Propagate,
}

/// Configuration for one push target.
#[derive(Debug, Clone)]
pub struct PushConfig {
    /// Partner records are pushed to.
    pub partner: PartnerId,
    /// Records requested per page.
    pub page_size: usize,
    /// Added to the send time to get the confirmation time.
    pub confirm_grace: TimeDelta,
    /// Failure handling.
    pub failure_mode: FailureMode,
    /// Hard bound on pages fetched per run.
    pub max_passes: u32,
    /// Lock settings for sync record locks.
    pub lock: LockConfig,
}

impl PushConfig {
    /// Creates a configuration for `partner`.
    pub fn new(partner: PartnerId) -> Self {
        Self {
            partner,
            page_size: 100,
            confirm_grace: TimeDelta::minutes(5),
            failure_mode: FailureMode::Continue,
            max_passes: 50,
            lock: LockConfig::default(),
        }
    }

    /// Sets the page size.
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = size.max(1);
        self
    }

    /// Sets the confirmation grace.
    pub fn with_confirm_grace(mut self, grace: TimeDelta) -> Self {
        self.confirm_grace = grace;
        self
    }

    /// Sets the failure mode.
    pub fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = mode;
        self
    }

    /// Sets the pass bound.
    pub fn with_max_passes(mut self, passes: u32) -> Self {
        self.max_passes = passes.max(1);
        self
    }

    /// Sets the lock configuration.
    pub fn with_lock(mut self, lock: LockConfig) -> Self {
        self.lock = lock;
        self
    }
}
