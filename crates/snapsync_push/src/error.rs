//! Error types for the push engine.

use snapsync_core::CoreError;
use thiserror::Error;

/// Result type for push operations.
pub type PushResult<T> = Result<T, PushError>;

/// Errors that can occur while pushing records.
#[derive(Error, Debug)]
pub enum PushError {
    /// The remote system failed a fetch, merge or push.
    #[error("remote error: {message}")]
    Remote {
        /// Error message.
        message: String,
        /// Whether the call can be retried.
        retryable: bool,
    },

    /// Local bookkeeping failed (locks, sync record store).
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// The record source failed.
    #[error("record source error: {0}")]
    Source(String),

    /// A record failed and the engine is configured to stop on failure.
    #[error("push halted at {record_key}: {message}")]
    Halted {
        /// Key of the failing record.
        record_key: String,
        /// The record's failure message.
        message: String,
    },

    /// A run was started while another was in progress.
    #[error("push run already in progress")]
    AlreadyRunning,
}

impl PushError {
    /// Creates a remote error.
    pub fn remote(message: impl Into<String>, retryable: bool) -> Self {
        Self::Remote {
            message: message.into(),
            retryable,
        }
    }

    /// Returns true if the operation can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            PushError::Remote { retryable, .. } => *retryable,
            PushError::Core(e) => e.is_retryable(),
            PushError::AlreadyRunning => true,
            PushError::Source(_) | PushError::Halted { .. } => false,
        }
    }
}
