//! Snapshot messages as consumed by the ingestion pipeline.
//!
//! The pipeline does not prescribe a wire format. Callers decode whatever the
//! upstream sends into this shape; a JSON form is provided for files and
//! tooling:
//!
//! ```json
//! {"key": "ACE:E-1", "version": "2024-01-05T10:00:00Z",
//!  "fields": {"PORT": "3001"},
//!  "children": {"lines": [{"LINE_NO": 1}]}}
//! ```

use crate::error::{CoreError, CoreResult};
use crate::field::parse_datetime;
use crate::types::{NaturalKey, SourceVersion};
use chrono::{FixedOffset, Offset, Utc};
use snapsync_codec::{from_json, to_json, Value};
use std::collections::BTreeMap;

/// One child in a snapshot's collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChildSnapshot {
    /// Raw field values by code.
    pub fields: BTreeMap<String, Value>,
}

impl ChildSnapshot {
    /// Creates an empty child.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field.
    pub fn with_field(mut self, code: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(code.into(), value.into());
        self
    }

    fn to_value(&self) -> Value {
        fields_value(&self.fields)
    }
}

/// A complete restatement of an entity as of `source_version`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotMessage {
    /// Business key of the entity. May be blank in malformed input.
    pub natural_key: NaturalKey,
    /// Extraction moment upstream.
    pub source_version: SourceVersion,
    /// Raw field values by code.
    pub fields: BTreeMap<String, Value>,
    /// Child collections by name.
    pub children: BTreeMap<String, Vec<ChildSnapshot>>,
}

impl SnapshotMessage {
    /// Creates a message with no fields.
    pub fn new(natural_key: NaturalKey, source_version: SourceVersion) -> Self {
        Self {
            natural_key,
            source_version,
            fields: BTreeMap::new(),
            children: BTreeMap::new(),
        }
    }

    /// Adds a field.
    pub fn with_field(mut self, code: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(code.into(), value.into());
        self
    }

    /// Appends a child to a collection.
    pub fn with_child(mut self, collection: impl Into<String>, child: ChildSnapshot) -> Self {
        self.children.entry(collection.into()).or_default().push(child);
        self
    }

    /// Declares a collection, possibly empty.
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.children.entry(collection.into()).or_default();
        self
    }

    /// Projection of the whole message, used when logging it for replay.
    pub fn to_value(&self) -> Value {
        let children = Value::object(self.children.iter().map(|(name, items)| {
            (
                name.as_str(),
                Value::Array(items.iter().map(ChildSnapshot::to_value).collect()),
            )
        }));
        Value::object([
            ("key", Value::from(self.natural_key.as_str())),
            ("version", Value::from(self.source_version.to_string())),
            ("fields", fields_value(&self.fields)),
            ("children", children),
        ])
    }

    /// JSON form of [`SnapshotMessage::to_value`].
    pub fn to_json(&self) -> serde_json::Value {
        to_json(&self.to_value())
    }

    /// Reads a message from its projection form.
    ///
    /// A missing key yields a blank natural key, which the pipeline rejects
    /// and logs with the raw message.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidSnapshot`] when the version is missing or
    /// unreadable, or a section has the wrong shape.
    pub fn from_value(value: &Value) -> CoreResult<Self> {
        if value.as_map().is_none() {
            return Err(CoreError::invalid_snapshot("message is not a map"));
        }

        let natural_key = NaturalKey::new(value.get("key").and_then(Value::as_text).unwrap_or(""));
        let raw_version = value
            .get("version")
            .ok_or_else(|| CoreError::invalid_snapshot("missing version"))?;
        let utc: FixedOffset = Utc.fix();
        let version = parse_datetime(raw_version, utc)
            .map_err(|e| CoreError::invalid_snapshot(format!("version: {e}")))?;

        let mut message = Self::new(natural_key, SourceVersion::new(version));
        if let Some(fields) = value.get("fields") {
            message.fields = read_fields(fields, "fields")?;
        }
        if let Some(children) = value.get("children") {
            let collections = children
                .as_map()
                .ok_or_else(|| CoreError::invalid_snapshot("children is not a map"))?;
            for (name, items) in collections {
                let name = name
                    .as_text()
                    .ok_or_else(|| CoreError::invalid_snapshot("collection name is not text"))?;
                let items = items.as_array().ok_or_else(|| {
                    CoreError::invalid_snapshot(format!("collection {name} is not an array"))
                })?;
                let mut parsed = Vec::with_capacity(items.len());
                for item in items {
                    parsed.push(ChildSnapshot {
                        fields: read_fields(item, name)?,
                    });
                }
                message.children.insert(name.to_string(), parsed);
            }
        }
        Ok(message)
    }

    /// Reads a message from JSON.
    ///
    /// # Errors
    ///
    /// Returns a codec error for floats, or see [`SnapshotMessage::from_value`].
    pub fn from_json(json: &serde_json::Value) -> CoreResult<Self> {
        Self::from_value(&from_json(json)?)
    }
}

fn fields_value(fields: &BTreeMap<String, Value>) -> Value {
    Value::object(fields.iter().map(|(k, v)| (k.as_str(), v.clone())))
}

fn read_fields(value: &Value, section: &str) -> CoreResult<BTreeMap<String, Value>> {
    let pairs = value
        .as_map()
        .ok_or_else(|| CoreError::invalid_snapshot(format!("{section} is not a map")))?;
    pairs
        .iter()
        .map(|(k, v)| {
            k.as_text()
                .map(|k| (k.to_string(), v.clone()))
                .ok_or_else(|| CoreError::invalid_snapshot(format!("{section} has a non-text key")))
        })
        .collect()
}
