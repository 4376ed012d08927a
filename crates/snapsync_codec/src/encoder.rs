//! Canonical encoder.
//!
//! The encoding follows the deterministic CBOR rules of RFC 8949 §4.2.1 for
//! the subset of types a projection can hold: shortest-form integers,
//! definite lengths only, and map entries ordered by their encoded key
//! (length-first, then bytewise). The output is never decoded again; it only
//! exists so that equal projections hash to equal digests.

use crate::value::Value;
use sha2::{Digest, Sha256};

/// Destination for encoded bytes.
///
/// Implemented for `Vec<u8>` (materialised encoding) and for `Sha256`
/// (streaming straight into a digest without an intermediate buffer).
pub trait ByteSink {
    /// Appends bytes to the sink.
    fn put(&mut self, bytes: &[u8]);
}

impl ByteSink for Vec<u8> {
    fn put(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}

impl ByteSink for Sha256 {
    fn put(&mut self, bytes: &[u8]) {
        Digest::update(self, bytes);
    }
}

/// Encode a value to its canonical byte form.
pub fn to_canonical_bytes(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    CanonicalEncoder::new(&mut out).encode(value);
    out
}

/// A canonical encoder writing into any [`ByteSink`].
pub struct CanonicalEncoder<'a, S: ByteSink> {
    sink: &'a mut S,
}

impl<'a, S: ByteSink> CanonicalEncoder<'a, S> {
    /// Create an encoder over the given sink.
    pub fn new(sink: &'a mut S) -> Self {
        Self { sink }
    }

    /// Encode a value.
    pub fn encode(&mut self, value: &Value) {
        match value {
            Value::Null => self.sink.put(&[0xf6]),
            Value::Bool(b) => self.sink.put(&[if *b { 0xf5 } else { 0xf4 }]),
            Value::Integer(n) => self.encode_integer(*n),
            Value::Bytes(b) => {
                self.encode_head(2, b.len() as u64);
                self.sink.put(b);
            }
            Value::Text(s) => {
                self.encode_head(3, s.len() as u64);
                self.sink.put(s.as_bytes());
            }
            Value::Array(items) => {
                self.encode_head(4, items.len() as u64);
                for item in items {
                    self.encode(item);
                }
            }
            Value::Map(pairs) => self.encode_map(pairs),
        }
    }

    #[allow(clippy::cast_sign_loss)]
    fn encode_integer(&mut self, n: i64) {
        if n >= 0 {
            self.encode_head(0, n as u64);
        } else {
            // -1 encodes as argument 0, -2 as 1, and so on.
            self.encode_head(1, (-(n + 1)) as u64);
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn encode_head(&mut self, major_type: u8, arg: u64) {
        let mt = major_type << 5;
        if arg < 24 {
            self.sink.put(&[mt | arg as u8]);
        } else if arg <= u64::from(u8::MAX) {
            self.sink.put(&[mt | 24, arg as u8]);
        } else if arg <= u64::from(u16::MAX) {
            self.sink.put(&[mt | 25]);
            self.sink.put(&(arg as u16).to_be_bytes());
        } else if arg <= u64::from(u32::MAX) {
            self.sink.put(&[mt | 26]);
            self.sink.put(&(arg as u32).to_be_bytes());
        } else {
            self.sink.put(&[mt | 27]);
            self.sink.put(&arg.to_be_bytes());
        }
    }

    fn encode_map(&mut self, pairs: &[(Value, Value)]) {
        // Keys are ordered by their own encoding, so each one is materialised
        // before anything is written to the sink.
        let mut entries: Vec<(Vec<u8>, &Value)> = pairs
            .iter()
            .map(|(k, v)| (to_canonical_bytes(k), v))
            .collect();
        entries.sort_by(|a, b| cmp_encoded(&a.0, &b.0));

        self.encode_head(5, entries.len() as u64);
        for (key, value) in entries {
            self.sink.put(&key);
            self.encode(value);
        }
    }
}

/// Orders two encodings length-first, then bytewise.
pub(crate) fn cmp_encoded(a: &[u8], b: &[u8]) -> std::cmp::Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars() {
        assert_eq!(to_canonical_bytes(&Value::Null), vec![0xf6]);
        assert_eq!(to_canonical_bytes(&Value::Bool(false)), vec![0xf4]);
        assert_eq!(to_canonical_bytes(&Value::Bool(true)), vec![0xf5]);
        assert_eq!(to_canonical_bytes(&Value::Integer(23)), vec![0x17]);
        assert_eq!(to_canonical_bytes(&Value::Integer(24)), vec![0x18, 24]);
        assert_eq!(
            to_canonical_bytes(&Value::Integer(256)),
            vec![0x19, 0x01, 0x00]
        );
        assert_eq!(to_canonical_bytes(&Value::Integer(-1)), vec![0x20]);
        assert_eq!(to_canonical_bytes(&Value::Integer(-25)), vec![0x38, 24]);
    }

    #[test]
    fn text_and_bytes() {
        assert_eq!(
            to_canonical_bytes(&Value::Text("ab".into())),
            vec![0x62, b'a', b'b']
        );
        assert_eq!(
            to_canonical_bytes(&Value::Bytes(vec![9, 8])),
            vec![0x42, 9, 8]
        );
    }

    #[test]
    fn map_order_ignores_insertion_order() {
        // Built without Value::map so the encoder has to do the sorting.
        let a = Value::Map(vec![
            (Value::Text("bb".into()), Value::Integer(2)),
            (Value::Text("a".into()), Value::Integer(1)),
        ]);
        let b = Value::Map(vec![
            (Value::Text("a".into()), Value::Integer(1)),
            (Value::Text("bb".into()), Value::Integer(2)),
        ]);
        let bytes = to_canonical_bytes(&a);
        assert_eq!(bytes, to_canonical_bytes(&b));
        assert_eq!(bytes, vec![0xa2, 0x61, b'a', 0x01, 0x62, b'b', b'b', 0x02]);
    }

    #[test]
    fn array_order_is_preserved() {
        let a = Value::Array(vec![Value::Integer(1), Value::Integer(2)]);
        let b = Value::Array(vec![Value::Integer(2), Value::Integer(1)]);
        assert_ne!(to_canonical_bytes(&a), to_canonical_bytes(&b));
    }

    #[test]
    fn streaming_matches_buffered() {
        let value = Value::map(vec![
            (Value::from("lines"), Value::from(vec![1i64, 2, 3])),
            (Value::from("ref"), Value::from("E-100")),
        ]);
        let mut hasher = Sha256::new();
        CanonicalEncoder::new(&mut hasher).encode(&value);
        let streamed = hasher.finalize();
        let buffered = Sha256::digest(to_canonical_bytes(&value));
        assert_eq!(streamed, buffered);
    }
}
