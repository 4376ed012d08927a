//! # snapsync codec
//!
//! Projection values and content fingerprints for snapsync.
//!
//! This crate provides:
//! - [`Value`], the shape every local or remote projection is reduced to
//! - A canonical encoding with deterministic map ordering
//! - [`fingerprint`], a SHA-256 digest of that encoding
//! - A JSON bridge for upstream documents
//!
//! ## Determinism
//!
//! - Map entries are ordered by their encoded key, never by insertion order
//! - Arrays keep their order; use [`Value::record`] for ordered pairs
//! - Integers use their shortest encoding
//! - Floats are not representable
//!
//! ## Usage
//!
//! ```
//! use snapsync_codec::{fingerprint, Value};
//!
//! let a = Value::object([("ref", Value::from("E-1")), ("qty", Value::Integer(3))]);
//! let b = Value::object([("qty", Value::Integer(3)), ("ref", Value::from("E-1"))]);
//! assert_eq!(fingerprint(&a), fingerprint(&b));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod encoder;
mod error;
mod fingerprint;
mod json;
mod value;

pub use encoder::{to_canonical_bytes, ByteSink, CanonicalEncoder};
pub use error::{CodecError, CodecResult};
pub use fingerprint::{fingerprint, Fingerprint, Fingerprintable};
pub use json::{from_json, to_json};
pub use value::Value;
