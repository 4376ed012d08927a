//! Status notes.
//!
//! Some upstream feeds only report line-level status changes inside free
//! text, e.g. `RELEASED lines 1-3 2024-01-05 10:30`. The parser turns such
//! text into typed [`StatusEvent`]s in note order; applying them in that
//! order makes the last note about a line win.

use crate::entity::CanonicalEntity;
use crate::field::{parse_datetime, FieldValue};
use chrono::{DateTime, FixedOffset, Utc};
use regex::Regex;
use snapsync_codec::Value;
use std::fmt;
use std::ops::RangeInclusive;
use std::sync::LazyLock;
use tracing::debug;

static NOTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(?P<kind>[a-z][a-z_ ]*?)\s+(?:lines?\s+(?P<from>\d+)(?:\s*-\s*(?P<to>\d+))?\s+)?(?P<ts>\d{4}-?\d{2}-?\d{2}(?:[ T]?\d{2}:?\d{2}(?::?\d{2})?)?)\s*$",
    )
    .expect("status note pattern")
});

/// Kind of status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusKind {
    /// Released by the authority.
    Released,
    /// Put on hold.
    Hold,
    /// Rejected, awaiting correction.
    Rejected,
    /// Cancelled.
    Cancelled,
    /// Anything else, upper-cased.
    Other(String),
}

impl StatusKind {
    fn parse(word: &str) -> Self {
        let word = word.trim().to_ascii_uppercase();
        match word.as_str() {
            "RELEASE" | "RELEASED" => StatusKind::Released,
            "HOLD" | "ON HOLD" | "HELD" => StatusKind::Hold,
            "REJECT" | "REJECTED" => StatusKind::Rejected,
            "CANCEL" | "CANCELED" | "CANCELLED" => StatusKind::Cancelled,
            _ => StatusKind::Other(word),
        }
    }
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusKind::Released => f.write_str("RELEASED"),
            StatusKind::Hold => f.write_str("HOLD"),
            StatusKind::Rejected => f.write_str("REJECTED"),
            StatusKind::Cancelled => f.write_str("CANCELLED"),
            StatusKind::Other(word) => f.write_str(word),
        }
    }
}

/// One status change recovered from a note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    /// Affected line numbers; `None` means every line.
    pub lines: Option<RangeInclusive<u32>>,
    /// What happened.
    pub kind: StatusKind,
    /// When it happened.
    pub timestamp: DateTime<Utc>,
}

impl StatusEvent {
    /// Returns true if the event addresses `line`.
    pub fn covers(&self, line: u32) -> bool {
        self.lines.as_ref().map_or(true, |range| range.contains(&line))
    }
}

/// Parses every recognisable note in `text`.
///
/// Notes are separated by newlines or `;`. Unrecognised notes are skipped.
/// Zone-less timestamps are read in `offset`.
pub fn parse_status_notes(text: &str, offset: FixedOffset) -> Vec<StatusEvent> {
    text.split(['\n', ';'])
        .filter(|note| !note.trim().is_empty())
        .filter_map(|note| {
            let event = parse_note(note, offset);
            if event.is_none() {
                debug!(note = note.trim(), "ignoring unrecognised status note");
            }
            event
        })
        .collect()
}

fn parse_note(note: &str, offset: FixedOffset) -> Option<StatusEvent> {
    let caps = NOTE.captures(note)?;
    let timestamp = parse_datetime(&Value::from(&caps["ts"]), offset).ok()?;
    let from = caps.name("from").and_then(|m| m.as_str().parse::<u32>().ok());
    let to = caps.name("to").and_then(|m| m.as_str().parse::<u32>().ok());
    let lines = match (from, to) {
        (Some(a), Some(b)) => Some(a.min(b)..=a.max(b)),
        (Some(a), None) => Some(a..=a),
        _ => None,
    };
    Some(StatusEvent {
        lines,
        kind: StatusKind::parse(&caps["kind"]),
        timestamp,
    })
}

/// Where status events land on an entity's children.
#[derive(Debug, Clone)]
pub struct StatusMarkers {
    /// Child collection holding the lines.
    pub collection: String,
    /// Child attribute with the line number.
    pub line_number: String,
    /// Start-of-process marker attribute.
    pub started: String,
    /// Terminal marker attribute.
    pub terminal: String,
}

/// Stamps events onto the addressed children's derived attributes, in
/// order.
///
/// Hold and rejection set the start marker and clear the terminal one;
/// release and cancellation set the terminal marker. Returns the number of
/// child updates.
pub fn apply_status_events(
    entity: &mut CanonicalEntity,
    markers: &StatusMarkers,
    events: &[StatusEvent],
) -> usize {
    let Some(children) = entity.children.get_mut(&markers.collection) else {
        return 0;
    };

    let mut updates = 0;
    for event in events {
        for child in children.iter_mut() {
            let Some(line) = child.get(&markers.line_number).and_then(line_number) else {
                continue;
            };
            if !event.covers(line) {
                continue;
            }
            let stamp = FieldValue::DateTime(event.timestamp);
            match event.kind {
                StatusKind::Hold | StatusKind::Rejected => {
                    child.derived.insert(markers.started.clone(), stamp);
                    child.derived.remove(&markers.terminal);
                }
                StatusKind::Released | StatusKind::Cancelled => {
                    child.derived.insert(markers.terminal.clone(), stamp);
                }
                StatusKind::Other(_) => continue,
            }
            updates += 1;
        }
    }
    updates
}

fn line_number(value: &FieldValue) -> Option<u32> {
    match value {
        FieldValue::Integer(n) => u32::try_from(*n).ok(),
        FieldValue::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}
