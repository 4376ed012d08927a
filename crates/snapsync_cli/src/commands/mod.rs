//! CLI command implementations.

pub mod fingerprint;
pub mod ingest;
pub mod notes;

use thiserror::Error;

/// Problems with command input.
#[derive(Error, Debug)]
pub enum InputError {
    /// A line of an input file could not be used.
    #[error("line {line}: {message}")]
    Line {
        /// One-based line number.
        line: usize,
        /// What was wrong.
        message: String,
    },

    /// A UTC offset could not be parsed.
    #[error("invalid offset {0:?}, expected +HH:MM, -HH:MM or Z")]
    Offset(String),
}
