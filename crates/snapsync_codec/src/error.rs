//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors raised while bridging external documents into projection values.
///
/// Fingerprinting itself never fails; these errors only surface at the
/// boundary where loosely-typed input is converted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Float values have no canonical form and are rejected.
    #[error("float values are forbidden in canonical projections: {value}")]
    FloatForbidden {
        /// The offending number as it appeared in the input.
        value: String,
    },

    /// Integer does not fit in a signed 64-bit value.
    #[error("integer overflow: {value}")]
    IntegerOverflow {
        /// The offending number as it appeared in the input.
        value: String,
    },

    /// Input did not have the expected shape.
    #[error("invalid structure: {message}")]
    InvalidStructure {
        /// Description of the structural error.
        message: String,
    },

    /// A fingerprint string was not 64 lowercase hex characters.
    #[error("invalid fingerprint: {input}")]
    InvalidFingerprint {
        /// The rejected input.
        input: String,
    },
}

impl CodecError {
    /// Create an invalid structure error.
    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self::InvalidStructure {
            message: message.into(),
        }
    }

    /// Create an invalid fingerprint error.
    pub fn invalid_fingerprint(input: impl Into<String>) -> Self {
        Self::InvalidFingerprint {
            input: input.into(),
        }
    }
}
