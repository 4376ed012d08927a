//! Error types for snapsync core.

use snapsync_codec::CodecError;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur while reconciling snapshots.
///
/// Stale snapshots are not errors; they resolve to a skipped outcome.
/// Everything here either asks the caller to redeliver the message
/// ([`CoreError::is_retryable`]) or marks it as needing a human.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Projection or JSON bridge error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// A named lock could not be acquired in time.
    #[error("timed out after {waited_ms}ms waiting for lock {name}")]
    LockTimeout {
        /// Lock name.
        name: String,
        /// How long the caller waited.
        waited_ms: u64,
    },

    /// Another writer committed between load and commit.
    #[error("write conflict on {key}: expected revision {expected}, found {actual}")]
    WriteConflict {
        /// Natural key of the entity.
        key: String,
        /// Revision the writer loaded.
        expected: u64,
        /// Revision currently persisted.
        actual: u64,
    },

    /// An entity with this natural key already exists.
    #[error("duplicate natural key: {key}")]
    DuplicateKey {
        /// The natural key.
        key: String,
    },

    /// The entity disappeared between resolution and processing.
    #[error("entity {key} vanished while processing")]
    EntityVanished {
        /// The natural key.
        key: String,
    },

    /// The backing store rejected a write.
    #[error("persistence failure: {message}")]
    Persistence {
        /// Description of the failure.
        message: String,
    },

    /// The message or one of its children has no natural key.
    #[error("missing natural key: {context}")]
    MissingNaturalKey {
        /// Where the key was expected.
        context: String,
    },

    /// The message is malformed.
    #[error("invalid snapshot: {message}")]
    InvalidSnapshot {
        /// Description of the problem.
        message: String,
    },

    /// A directive row names a field code the domain does not declare.
    #[error("unknown field code: {code}")]
    UnknownFieldCode {
        /// The rejected code.
        code: String,
    },

    /// A mandatory field was missing or could not be parsed.
    #[error("mandatory field {field} rejected: {reason}")]
    MandatoryField {
        /// Field code.
        field: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A persisted invariant would be broken.
    #[error("invariant violation: {message}")]
    InvariantViolation {
        /// Description of the violation.
        message: String,
    },

    /// A domain hook failed.
    #[error("domain error: {message}")]
    Domain {
        /// Description of the failure.
        message: String,
    },

    /// Processing panicked; the message was abandoned.
    #[error("processing panicked: {message}")]
    Panicked {
        /// Panic payload, when it was a string.
        message: String,
    },
}

impl CoreError {
    /// Creates a persistence error.
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }

    /// Creates a missing natural key error.
    pub fn missing_natural_key(context: impl Into<String>) -> Self {
        Self::MissingNaturalKey {
            context: context.into(),
        }
    }

    /// Creates an invalid snapshot error.
    pub fn invalid_snapshot(message: impl Into<String>) -> Self {
        Self::InvalidSnapshot {
            message: message.into(),
        }
    }

    /// Creates a mandatory field error.
    pub fn mandatory_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MandatoryField {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invariant violation error.
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation {
            message: message.into(),
        }
    }

    /// Creates a domain error.
    pub fn domain(message: impl Into<String>) -> Self {
        Self::Domain {
            message: message.into(),
        }
    }

    /// Returns true if redelivering the same message may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::LockTimeout { .. }
                | CoreError::WriteConflict { .. }
                | CoreError::DuplicateKey { .. }
                | CoreError::EntityVanished { .. }
                | CoreError::Persistence { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(CoreError::LockTimeout {
            name: "entity:x".into(),
            waited_ms: 10
        }
        .is_retryable());
        assert!(CoreError::persistence("disk full").is_retryable());
        assert!(CoreError::WriteConflict {
            key: "k".into(),
            expected: 1,
            actual: 2
        }
        .is_retryable());

        assert!(!CoreError::missing_natural_key("message").is_retryable());
        assert!(!CoreError::mandatory_field("ENTRY_DATE", "bad date").is_retryable());
        assert!(!CoreError::UnknownFieldCode { code: "ZZ".into() }.is_retryable());
    }

    #[test]
    fn error_display() {
        let err = CoreError::LockTimeout {
            name: "create:entry:E-1".into(),
            waited_ms: 250,
        };
        assert_eq!(
            err.to_string(),
            "timed out after 250ms waiting for lock create:entry:E-1"
        );
    }
}
