//! Benchmark utilities.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use snapsync_codec::Value;
use snapsync_core::SnapshotMessage;
use snapsync_testkit::{entry, line, LINES};

const COUNTRIES: [&str; 4] = ["CN", "DE", "US", "VN"];

/// An entry snapshot with `lines` lines.
pub fn entry_with_lines(key: &str, version_secs: i64, lines: usize) -> SnapshotMessage {
    let mut message = entry(key, version_secs)
        .with_field("ENTRY_DATE", "2024-01-05")
        .with_field("PORT", "USLAX");
    for n in 0..lines {
        let number = i64::try_from(n + 1).unwrap_or(i64::MAX);
        message = message.with_child(
            LINES,
            line(number, COUNTRIES[n % COUNTRIES.len()], number * 100).with_field("DUTY", number),
        );
    }
    message
}

/// A projection shaped like an entry record with `lines` line maps.
pub fn entry_projection(lines: usize) -> Value {
    let items = (0..lines)
        .map(|n| {
            let number = i64::try_from(n).unwrap_or(i64::MAX);
            Value::object([
                ("line_no", Value::Integer(number)),
                ("country", Value::from(COUNTRIES[n % COUNTRIES.len()])),
                ("value", Value::Integer(number * 100)),
            ])
        })
        .collect();
    Value::object([
        ("key", Value::from("E-1")),
        ("importer", Value::from("ACME")),
        ("lines", Value::Array(items)),
    ])
}
