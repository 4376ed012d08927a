//! Content fingerprints.
//!
//! A fingerprint is the SHA-256 digest of a projection's canonical encoding.
//! Two projections that are equal as values always produce the same
//! fingerprint, regardless of map insertion order.

use crate::encoder::CanonicalEncoder;
use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// A 32-byte content digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Wraps raw digest bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw digest bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Returns the lowercase hex form.
    #[must_use]
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Parses the lowercase (or uppercase) hex form.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidFingerprint`] unless the input is exactly
    /// 64 hex digits.
    pub fn from_hex(input: &str) -> CodecResult<Self> {
        if input.len() != 64 || !input.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(CodecError::invalid_fingerprint(input));
        }
        let mut bytes = [0u8; 32];
        for (i, chunk) in input.as_bytes().chunks(2).enumerate() {
            let pair =
                std::str::from_utf8(chunk).map_err(|_| CodecError::invalid_fingerprint(input))?;
            bytes[i] =
                u8::from_str_radix(pair, 16).map_err(|_| CodecError::invalid_fingerprint(input))?;
        }
        Ok(Self(bytes))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form keeps log lines readable.
        write!(f, "Fingerprint({}…)", &self.to_hex()[..12])
    }
}

/// Compute the fingerprint of a projection.
pub fn fingerprint(value: &Value) -> Fingerprint {
    let mut hasher = Sha256::new();
    CanonicalEncoder::new(&mut hasher).encode(value);
    Fingerprint(hasher.finalize().into())
}

/// Types that can be projected for fingerprinting.
pub trait Fingerprintable {
    /// Builds the projection that identifies this value's content.
    fn projection(&self) -> Value;

    /// Fingerprint of [`Fingerprintable::projection`].
    fn fingerprint(&self) -> Fingerprint {
        fingerprint(&self.projection())
    }
}

impl Fingerprintable for Value {
    fn projection(&self) -> Value {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_insertion_order_does_not_matter() {
        let a = Value::Map(vec![
            (Value::from("x"), Value::Integer(1)),
            (Value::from("y"), Value::Integer(2)),
        ]);
        let b = Value::Map(vec![
            (Value::from("y"), Value::Integer(2)),
            (Value::from("x"), Value::Integer(1)),
        ]);
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn event_order_matters() {
        let a = Value::record([
            ("ARRIVED", Value::from("2024-01-01")),
            ("RELEASED", Value::from("2024-01-02")),
        ]);
        let b = Value::record([
            ("RELEASED", Value::from("2024-01-02")),
            ("ARRIVED", Value::from("2024-01-01")),
        ]);
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn hex_roundtrip() {
        let fp = fingerprint(&Value::from("hello"));
        let hex = fp.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(Fingerprint::from_hex(&hex).unwrap(), fp);
        assert!(Fingerprint::from_hex("abc").is_err());
        assert!(Fingerprint::from_hex(&"zz".repeat(32)).is_err());
    }

    #[test]
    fn digest_is_sha256_of_canonical_bytes() {
        let value = Value::object([("ref", Value::from("E-1")), ("n", Value::Integer(7))]);
        let expected: [u8; 32] =
            Sha256::digest(crate::encoder::to_canonical_bytes(&value)).into();
        assert_eq!(fingerprint(&value).as_bytes(), &expected);
        assert_eq!(value.fingerprint(), fingerprint(&value));
    }
}
