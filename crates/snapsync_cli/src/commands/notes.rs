//! Notes command implementation.

use super::InputError;
use chrono::{FixedOffset, SecondsFormat};
use serde::Serialize;
use snapsync_core::{parse_status_notes, StatusEvent};
use std::fs;
use std::path::Path;

/// A parsed note, ready for output.
#[derive(Debug, Serialize)]
pub struct NoteView {
    /// Status kind.
    pub kind: String,
    /// First addressed line, if the note is line specific.
    pub from_line: Option<u32>,
    /// Last addressed line, if the note is line specific.
    pub to_line: Option<u32>,
    /// Event time in UTC.
    pub timestamp: String,
}

impl From<&StatusEvent> for NoteView {
    fn from(event: &StatusEvent) -> Self {
        Self {
            kind: event.kind.to_string(),
            from_line: event.lines.as_ref().map(|r| *r.start()),
            to_line: event.lines.as_ref().map(|r| *r.end()),
            timestamp: event.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

/// Parses `+HH:MM`, `-HH:MM`, `+HHMM` or `Z`.
pub fn parse_offset(input: &str) -> Result<FixedOffset, InputError> {
    let err = || InputError::Offset(input.to_string());
    let trimmed = input.trim();
    if trimmed.eq_ignore_ascii_case("z") || trimmed.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0).ok_or_else(err);
    }

    let (sign, rest) = match trimmed.split_at_checked(1) {
        Some(("+", rest)) => (1, rest),
        Some(("-", rest)) => (-1, rest),
        _ => return Err(err()),
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(err());
    }
    let hours: i32 = digits[..2].parse().map_err(|_| err())?;
    let minutes: i32 = digits[2..].parse().map_err(|_| err())?;
    if minutes >= 60 {
        return Err(err());
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(err)
}

/// Parses the notes in `path`.
pub fn parse_file(path: &Path, offset: &str) -> Result<Vec<NoteView>, Box<dyn std::error::Error>> {
    let offset = parse_offset(offset)?;
    let text = fs::read_to_string(path)?;
    Ok(parse_status_notes(&text, offset)
        .iter()
        .map(NoteView::from)
        .collect())
}

/// Runs the notes command.
pub fn run(path: &Path, offset: &str, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let notes = parse_file(path, offset)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&notes)?);
        }
        _ => {
            for note in &notes {
                let lines = match (note.from_line, note.to_line) {
                    (Some(a), Some(b)) if a == b => format!("line {a}"),
                    (Some(a), Some(b)) => format!("lines {a}-{b}"),
                    _ => "all lines".to_string(),
                };
                println!("{:<10} {:<12} {}", note.kind, lines, note.timestamp);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn offsets() {
        assert_eq!(parse_offset("Z").unwrap().local_minus_utc(), 0);
        assert_eq!(parse_offset("+02:00").unwrap().local_minus_utc(), 7200);
        assert_eq!(parse_offset("-0530").unwrap().local_minus_utc(), -19800);
        assert!(parse_offset("02:00").is_err());
        assert!(parse_offset("+2").is_err());
        assert!(parse_offset("+01:75").is_err());
    }

    #[test]
    fn parses_file_in_offset() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "HOLD lines 1-3 2024-01-05 10:30").unwrap();
        writeln!(file, "no status here").unwrap();
        writeln!(file, "RELEASED 2024-01-06 08:00; CANCELLED line 2 20240107").unwrap();

        let notes = parse_file(file.path(), "+02:00").unwrap();
        assert_eq!(notes.len(), 3);
        assert_eq!(notes[0].kind, "HOLD");
        assert_eq!(notes[0].from_line, Some(1));
        assert_eq!(notes[0].to_line, Some(3));
        assert_eq!(notes[0].timestamp, "2024-01-05T08:30:00Z");
        assert_eq!(notes[1].from_line, None);
        assert_eq!(notes[2].kind, "CANCELLED");
        assert_eq!(notes[2].to_line, Some(2));
    }
}
