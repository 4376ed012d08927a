//! Test fixtures: a customs-entry profile and snapshot builders.
//!
//! The profile exercises every hook the pipeline offers: typed field codes,
//! all four merge policies, a mandatory field, a keyed line collection,
//! aggregates, a reference lookup in `derive` and status notes in
//! `finalize`.

use chrono::{FixedOffset, Offset, Utc};
use snapsync_codec::{Fingerprintable, Value};
use snapsync_core::{
    apply_status_events, attributes_value, field_extractor, parse_status_notes, AggregateSpec,
    CanonicalEntity, ChildCollectionSpec, ChildSnapshot, CoreResult, DirectiveTable, FieldCode,
    FieldDirective, FieldType, FieldValue, IngestConfig, IngestPipeline, IngestProfile,
    MemoryEntityStore, MemoryPurgeMarkerStore, MergePolicy, NaturalKey, ReferenceCache,
    SnapshotMessage, SourceVersion, StatusMarkers,
};
use snapsync_push::LocalRecord;
use std::sync::Arc;

/// Name of the line collection.
pub const LINES: &str = "lines";

/// Top-level field codes of a customs entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryField {
    /// Importer of record. Mandatory.
    Importer,
    /// Date the entry was filed. Earliest report wins.
    EntryDate,
    /// Latest release time reported.
    ReleasedAt,
    /// Broker assigned on first report.
    Broker,
    /// Port of entry code.
    Port,
    /// Free-text status notes.
    Notes,
}

impl FieldCode for EntryField {
    fn code(&self) -> &'static str {
        match self {
            EntryField::Importer => "IMPORTER",
            EntryField::EntryDate => "ENTRY_DATE",
            EntryField::ReleasedAt => "RELEASED_AT",
            EntryField::Broker => "BROKER",
            EntryField::Port => "PORT",
            EntryField::Notes => "NOTES",
        }
    }

    fn all() -> &'static [Self] {
        &[
            EntryField::Importer,
            EntryField::EntryDate,
            EntryField::ReleasedAt,
            EntryField::Broker,
            EntryField::Port,
            EntryField::Notes,
        ]
    }
}

/// Field codes of an entry line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineField {
    /// Line number, the line's natural key.
    LineNo,
    /// Country of origin.
    Country,
    /// Entered value in cents.
    Value,
    /// Duty in cents.
    Duty,
}

impl FieldCode for LineField {
    fn code(&self) -> &'static str {
        match self {
            LineField::LineNo => "LINE_NO",
            LineField::Country => "COUNTRY",
            LineField::Value => "VALUE",
            LineField::Duty => "DUTY",
        }
    }

    fn all() -> &'static [Self] {
        &[
            LineField::LineNo,
            LineField::Country,
            LineField::Value,
            LineField::Duty,
        ]
    }
}

/// Port names by code, shared across pipelines.
pub type PortNames = ReferenceCache<String, String>;

/// A port name cache backed by a small fixed table.
pub fn port_names() -> PortNames {
    ReferenceCache::new(|code: &String| -> CoreResult<Option<String>> {
        Ok(match code.as_str() {
            "USLAX" => Some("Los Angeles".to_string()),
            "USNYC" => Some("New York".to_string()),
            "DEHAM" => Some("Hamburg".to_string()),
            _ => None,
        })
    })
}

/// Ingestion profile for customs entries.
pub struct CustomsEntryProfile {
    directives: DirectiveTable,
    collections: Vec<ChildCollectionSpec>,
    aggregates: Vec<AggregateSpec>,
    markers: StatusMarkers,
    ports: Arc<PortNames>,
    offset: FixedOffset,
}

impl CustomsEntryProfile {
    /// Creates the profile with its own port cache, reading notes in UTC.
    pub fn new() -> Self {
        let lines = DirectiveTable::builder::<LineField>()
            .directive(LineField::LineNo, FieldDirective::new("line_no"))
            .directive(LineField::Country, FieldDirective::new("country"))
            .directive(LineField::Value, FieldDirective::new("value"))
            .directive(LineField::Duty, FieldDirective::new("duty"))
            .build();

        Self {
            directives: DirectiveTable::builder::<EntryField>()
                .directive(EntryField::Importer, FieldDirective::new("importer").mandatory())
                .directive(
                    EntryField::EntryDate,
                    FieldDirective::new("entry_date")
                        .with_type(FieldType::Date)
                        .with_policy(MergePolicy::KeepEarliest),
                )
                .directive(
                    EntryField::ReleasedAt,
                    FieldDirective::new("released_at")
                        .with_type(FieldType::DateTime)
                        .with_policy(MergePolicy::KeepLatest),
                )
                .directive(
                    EntryField::Broker,
                    FieldDirective::new("broker").with_policy(MergePolicy::SetIfAbsent),
                )
                .directive(EntryField::Port, FieldDirective::new("port"))
                .directive(EntryField::Notes, FieldDirective::new("notes"))
                .build(),
            collections: vec![ChildCollectionSpec::keyed_by(LINES, lines, "line_no")],
            aggregates: vec![
                AggregateSpec::distinct("countries", LINES, ", ", field_extractor("country")),
                AggregateSpec::sum("total_value", LINES, field_extractor("value")),
                AggregateSpec::sum_if_nonzero("total_duty", LINES, field_extractor("duty")),
                AggregateSpec::pending_count("lines_on_hold", LINES, "hold_at", "released_at"),
            ],
            markers: StatusMarkers {
                collection: LINES.to_string(),
                line_number: "line_no".to_string(),
                started: "hold_at".to_string(),
                terminal: "released_at".to_string(),
            },
            ports: Arc::new(port_names()),
            offset: Utc.fix(),
        }
    }

    /// Shares a port cache.
    pub fn with_ports(mut self, ports: Arc<PortNames>) -> Self {
        self.ports = ports;
        self
    }

    /// Sets the offset zone-less note timestamps are read in.
    pub fn with_offset(mut self, offset: FixedOffset) -> Self {
        self.offset = offset;
        self
    }

    /// The port cache in use.
    pub fn ports(&self) -> &Arc<PortNames> {
        &self.ports
    }
}

impl Default for CustomsEntryProfile {
    fn default() -> Self {
        Self::new()
    }
}

impl IngestProfile for CustomsEntryProfile {
    fn entity_type(&self) -> &str {
        "entry"
    }

    fn directives(&self) -> &DirectiveTable {
        &self.directives
    }

    fn child_collections(&self) -> &[ChildCollectionSpec] {
        &self.collections
    }

    fn aggregates(&self) -> &[AggregateSpec] {
        &self.aggregates
    }

    fn derive(&self, entity: &mut CanonicalEntity, _message: &SnapshotMessage) -> CoreResult<()> {
        let port = entity
            .field("port")
            .and_then(FieldValue::as_text)
            .map(str::to_string);
        let name = match port {
            Some(code) => self.ports.get(&code)?,
            None => None,
        };
        match name {
            Some(name) => {
                entity
                    .derived
                    .insert("port_name".to_string(), FieldValue::Text(name));
            }
            None => {
                entity.derived.remove("port_name");
            }
        }
        Ok(())
    }

    fn finalize(&self, entity: &mut CanonicalEntity) -> CoreResult<()> {
        let Some(notes) = entity.field("notes").and_then(FieldValue::as_text) else {
            return Ok(());
        };
        let events = parse_status_notes(notes, self.offset);
        apply_status_events(entity, &self.markers, &events);
        Ok(())
    }
}

/// Pipeline over in-memory stores.
pub type MemoryPipeline =
    IngestPipeline<CustomsEntryProfile, MemoryEntityStore, MemoryPurgeMarkerStore>;

/// A fresh in-memory pipeline with the customs-entry profile.
pub fn memory_pipeline() -> MemoryPipeline {
    memory_pipeline_with(IngestConfig::default())
}

/// A fresh in-memory pipeline with a custom configuration.
pub fn memory_pipeline_with(config: IngestConfig) -> MemoryPipeline {
    IngestPipeline::new(
        CustomsEntryProfile::new(),
        Arc::new(MemoryEntityStore::new()),
        Arc::new(MemoryPurgeMarkerStore::new()),
    )
    .with_config(config)
}

/// Source version `secs` seconds after the Unix epoch.
///
/// # Panics
///
/// Panics if `secs` is outside the supported date range.
pub fn version(secs: i64) -> SourceVersion {
    SourceVersion::from_unix_seconds(secs).expect("version in range")
}

/// An entry snapshot with the mandatory importer set.
pub fn entry(key: &str, version_secs: i64) -> SnapshotMessage {
    SnapshotMessage::new(NaturalKey::new(key), version(version_secs))
        .with_field(EntryField::Importer.code(), "ACME")
        .with_collection(LINES)
}

/// An entry line.
pub fn line(number: i64, country: &str, value: i64) -> ChildSnapshot {
    ChildSnapshot::new()
        .with_field(LineField::LineNo.code(), number)
        .with_field(LineField::Country.code(), country)
        .with_field(LineField::Value.code(), value)
}

/// The projection pushed to partners for an entry.
///
/// The source version is left out so that a newer snapshot with the same
/// content does not cause a push.
pub fn entry_record(entity: &CanonicalEntity) -> LocalRecord {
    let lines = Value::Array(
        entity
            .children(LINES)
            .iter()
            .map(Fingerprintable::projection)
            .collect(),
    );
    LocalRecord::new(
        entity.natural_key.as_str(),
        Value::object([
            ("key", Value::from(entity.natural_key.as_str())),
            ("fields", attributes_value(&entity.fields)),
            ("derived", attributes_value(&entity.derived)),
            ("lines", lines),
        ]),
    )
}
