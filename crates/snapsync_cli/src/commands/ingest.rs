//! Ingest command implementation.

use super::InputError;
use serde::Serialize;
use snapsync_codec::{to_json, Fingerprintable};
use snapsync_core::{CanonicalEntity, EntityStore, SnapshotMessage};
use snapsync_testkit::{memory_pipeline, LINES};
use std::fs;
use std::path::Path;
use tracing::warn;

/// Ingestion result.
#[derive(Debug, Serialize)]
pub struct IngestSummary {
    /// Snapshots read.
    pub received: usize,
    /// Snapshots that changed an entity.
    pub committed: usize,
    /// Snapshots that re-derived identical state.
    pub unchanged: usize,
    /// Stale or purged snapshots.
    pub skipped: usize,
    /// Lines that failed to parse or ingest.
    pub failures: Vec<String>,
    /// Resulting entities.
    pub entities: Vec<EntitySummary>,
}

/// One resulting entity.
#[derive(Debug, Serialize)]
pub struct EntitySummary {
    /// Natural key.
    pub key: String,
    /// Committed source version.
    pub version: String,
    /// Store revision.
    pub revision: u64,
    /// Number of lines.
    pub lines: usize,
    /// Content fingerprint.
    pub fingerprint: String,
    /// Full projection.
    pub content: serde_json::Value,
}

impl EntitySummary {
    fn from_entity(entity: &CanonicalEntity) -> Self {
        let projection = entity.projection();
        Self {
            key: entity.natural_key.to_string(),
            version: entity.last_source_version.to_string(),
            revision: entity.revision,
            lines: entity.children(LINES).len(),
            fingerprint: entity.fingerprint().to_hex(),
            content: to_json(&projection),
        }
    }
}

/// Ingests every snapshot in `path` into a fresh in-memory store.
pub fn ingest_file(path: &Path, workers: usize) -> Result<IngestSummary, Box<dyn std::error::Error>> {
    let text = fs::read_to_string(path)?;
    let mut failures = Vec::new();
    let mut messages = Vec::new();
    let mut line_numbers = Vec::new();

    for (index, raw) in text.lines().enumerate() {
        if raw.trim().is_empty() {
            continue;
        }
        let parsed = serde_json::from_str::<serde_json::Value>(raw)
            .map_err(|e| e.to_string())
            .and_then(|json| SnapshotMessage::from_json(&json).map_err(|e| e.to_string()));
        match parsed {
            Ok(message) => {
                messages.push(message);
                line_numbers.push(index + 1);
            }
            Err(message) => {
                let err = InputError::Line {
                    line: index + 1,
                    message,
                };
                warn!(error = %err, "skipping unreadable snapshot");
                failures.push(err.to_string());
            }
        }
    }

    let pipeline = memory_pipeline();
    let reports = pipeline.ingest_batch(&messages, workers);

    let mut summary = IngestSummary {
        received: messages.len(),
        committed: 0,
        unchanged: 0,
        skipped: 0,
        failures,
        entities: Vec::new(),
    };
    for report in reports {
        match report.result {
            Ok(outcome) if outcome.is_skipped() => summary.skipped += 1,
            Ok(outcome) if outcome.changed => summary.committed += 1,
            Ok(_) => summary.unchanged += 1,
            Err(e) => summary.failures.push(
                InputError::Line {
                    line: line_numbers[report.index],
                    message: e.to_string(),
                }
                .to_string(),
            ),
        }
    }
    summary.entities = pipeline
        .store()
        .list()?
        .iter()
        .map(EntitySummary::from_entity)
        .collect();

    Ok(summary)
}

/// Runs the ingest command.
pub fn run(path: &Path, format: &str, workers: usize) -> Result<(), Box<dyn std::error::Error>> {
    let summary = ingest_file(path, workers)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        _ => {
            print_text_output(&summary);
        }
    }

    Ok(())
}

fn print_text_output(summary: &IngestSummary) {
    println!("Snapshots: {}", summary.received);
    println!("  committed: {}", summary.committed);
    println!("  unchanged: {}", summary.unchanged);
    println!("  skipped:   {}", summary.skipped);
    println!("  failed:    {}", summary.failures.len());
    for failure in &summary.failures {
        println!("    {failure}");
    }
    println!();
    println!("Entities: {}", summary.entities.len());
    for entity in &summary.entities {
        println!(
            "  {:<16} {}  rev {:<3} lines {:<3} {}",
            entity.key,
            entity.version,
            entity.revision,
            entity.lines,
            &entity.fingerprint[..16]
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write(lines: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        file
    }

    #[test]
    fn ingests_and_skips_stale() {
        let file = write(&[
            r#"{"key": "E-1", "version": "2024-01-02T00:00:00Z", "fields": {"IMPORTER": "ACME"}, "children": {"lines": [{"LINE_NO": 1, "COUNTRY": "CN", "VALUE": 10}]}}"#,
            "",
            r#"{"key": "E-1", "version": "2024-01-01T00:00:00Z", "fields": {"IMPORTER": "OLD"}}"#,
            r#"{"key": "E-2", "version": "20240101", "fields": {"IMPORTER": "ACME"}}"#,
        ]);

        let summary = ingest_file(file.path(), 1).unwrap();
        assert_eq!(summary.received, 3);
        assert_eq!(summary.committed, 2);
        assert_eq!(summary.skipped, 1);
        assert!(summary.failures.is_empty());
        assert_eq!(summary.entities.len(), 2);
        assert_eq!(summary.entities[0].key, "E-1");
        assert_eq!(summary.entities[0].lines, 1);
        assert_eq!(summary.entities[0].fingerprint.len(), 64);
    }

    #[test]
    fn reports_bad_lines_with_numbers() {
        let file = write(&[
            "not json",
            r#"{"key": "E-1", "version": "2024-01-01T00:00:00Z", "fields": {}}"#,
            r#"{"key": "E-2", "version": "2024-01-01T00:00:00Z", "fields": {"IMPORTER": "ACME"}}"#,
        ]);

        let summary = ingest_file(file.path(), 2).unwrap();
        assert_eq!(summary.received, 2);
        assert_eq!(summary.committed, 1);
        assert_eq!(summary.failures.len(), 2);
        assert!(summary.failures[0].starts_with("line 1:"));
        assert!(summary.failures[1].starts_with("line 2:"));
    }
}
