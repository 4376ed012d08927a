//! Bridge between JSON documents and projection values.
//!
//! Upstream feeds frequently arrive as JSON; the caller converts them once at
//! the boundary and works with [`Value`] from then on.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use serde_json::{Map, Number};

/// Convert a JSON document into a projection value.
///
/// # Errors
///
/// Returns [`CodecError::FloatForbidden`] for non-integral numbers and
/// [`CodecError::IntegerOverflow`] for integers outside the `i64` range.
pub fn from_json(json: &serde_json::Value) -> CodecResult<Value> {
    Ok(match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => number_to_value(n)?,
        serde_json::Value::String(s) => Value::Text(s.clone()),
        serde_json::Value::Array(items) => Value::Array(
            items
                .iter()
                .map(from_json)
                .collect::<CodecResult<Vec<_>>>()?,
        ),
        serde_json::Value::Object(fields) => Value::map(
            fields
                .iter()
                .map(|(k, v)| Ok((Value::Text(k.clone()), from_json(v)?)))
                .collect::<CodecResult<Vec<_>>>()?,
        ),
    })
}

fn number_to_value(n: &Number) -> CodecResult<Value> {
    if let Some(i) = n.as_i64() {
        return Ok(Value::Integer(i));
    }
    if n.is_u64() {
        return Err(CodecError::IntegerOverflow {
            value: n.to_string(),
        });
    }
    Err(CodecError::FloatForbidden {
        value: n.to_string(),
    })
}

/// Render a projection value as JSON.
///
/// Byte strings become lowercase hex text and non-text map keys are rendered
/// through their display form, so the conversion is lossy in those two cases.
pub fn to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Integer(n) => serde_json::Value::Number((*n).into()),
        Value::Bytes(b) => {
            serde_json::Value::String(b.iter().map(|byte| format!("{byte:02x}")).collect())
        }
        Value::Text(s) => serde_json::Value::String(s.clone()),
        Value::Array(items) => serde_json::Value::Array(items.iter().map(to_json).collect()),
        Value::Map(pairs) => {
            let mut out = Map::new();
            for (k, v) in pairs {
                let key = k.as_text().map_or_else(|| k.to_string(), str::to_string);
                out.insert(key, to_json(v));
            }
            serde_json::Value::Object(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn converts_nested_document() {
        let doc = json!({
            "ref": "E-1",
            "lines": [{"no": 1}, {"no": 2}],
            "ok": true,
            "note": null
        });
        let value = from_json(&doc).unwrap();
        assert_eq!(value.get("ref"), Some(&Value::from("E-1")));
        assert_eq!(value.get("ok"), Some(&Value::Bool(true)));
        assert_eq!(value.get("note"), Some(&Value::Null));
        assert_eq!(value.get("lines").unwrap().as_array().unwrap().len(), 2);
    }

    #[test]
    fn rejects_floats() {
        let err = from_json(&json!({"amount": 1.5})).unwrap_err();
        assert!(matches!(err, CodecError::FloatForbidden { .. }));
    }

    #[test]
    fn rejects_u64_overflow() {
        let err = from_json(&json!(u64::MAX)).unwrap_err();
        assert!(matches!(err, CodecError::IntegerOverflow { .. }));
    }

    #[test]
    fn renders_back_to_json() {
        let doc = json!({"a": [1, "two"], "b": {"c": false}});
        let value = from_json(&doc).unwrap();
        assert_eq!(to_json(&value), doc);
    }
}
