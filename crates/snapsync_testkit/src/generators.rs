//! Property-based test generators using proptest.
//!
//! Snapshot histories carry strictly increasing, distinct source versions so
//! that "the newest snapshot" is always well defined.

use crate::fixtures::{entry, line, LINES};
use proptest::prelude::*;
use snapsync_core::{ChildSnapshot, SnapshotMessage};

/// Base of all generated source versions, in seconds since the epoch.
pub const VERSION_BASE: i64 = 1_700_000_000;

/// Strategy for a country of origin.
pub fn country_strategy() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec!["CN", "DE", "US", "VN"])
}

/// Strategy for one entry line. Line numbers may repeat across a list.
pub fn line_strategy() -> impl Strategy<Value = ChildSnapshot> {
    (
        1i64..12,
        country_strategy(),
        0i64..100_000,
        prop::option::of(0i64..5_000),
    )
        .prop_map(|(number, country, value, duty)| {
            let child = line(number, country, value);
            match duty {
                Some(duty) => child.with_field("DUTY", duty),
                None => child,
            }
        })
}

/// Strategy for a list of lines.
pub fn lines_strategy() -> impl Strategy<Value = Vec<ChildSnapshot>> {
    prop::collection::vec(line_strategy(), 0..6)
}

/// Strategy for an ISO calendar date.
pub fn date_strategy() -> impl Strategy<Value = String> {
    (2020i32..2026, 1u32..=12, 1u32..=28).prop_map(|(y, m, d)| format!("{y:04}-{m:02}-{d:02}"))
}

/// Strategy for free-text status notes addressing generated lines.
pub fn notes_strategy() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec![
        "HOLD lines 1-3 2024-01-05 10:30",
        "HOLD lines 1-6 2024-01-05 08:00\nRELEASED lines 2-4 2024-01-05 12:00",
        "REJECTED line 5 2024-01-06 07:00\nCANCELLED 2024-01-07",
        "RELEASED 2024-01-08 09:15",
    ])
}

/// Strategy for an entry snapshot of `key` at `VERSION_BASE + offset`.
pub fn snapshot_at(key: impl Into<String>, offset: i64) -> BoxedStrategy<SnapshotMessage> {
    let key = key.into();
    (
        lines_strategy(),
        prop::option::of(date_strategy()),
        prop::option::of(prop::sample::select(vec!["BRK-1", "BRK-2"])),
        prop::option::of(prop::sample::select(vec!["USLAX", "DEHAM", "XXXXX"])),
        prop::option::of(notes_strategy()),
    )
        .prop_map(move |(lines, entry_date, broker, port, notes)| {
            let mut message = entry(&key, VERSION_BASE + offset);
            if let Some(date) = entry_date {
                message = message.with_field("ENTRY_DATE", date);
            }
            if let Some(broker) = broker {
                message = message.with_field("BROKER", broker);
            }
            if let Some(port) = port {
                message = message.with_field("PORT", port);
            }
            if let Some(notes) = notes {
                message = message.with_field("NOTES", notes);
            }
            for child in lines {
                message = message.with_child(LINES, child);
            }
            message
        })
        .boxed()
}

/// Strategy for one entry snapshot of `key`.
pub fn snapshot_strategy(key: impl Into<String>) -> impl Strategy<Value = SnapshotMessage> {
    let key = key.into();
    (0i64..1_000_000).prop_flat_map(move |offset| snapshot_at(key.clone(), offset))
}

/// Strategy for up to `max_len` snapshots of `key`, in ascending version
/// order with no two sharing a version.
pub fn snapshot_history_strategy(
    key: impl Into<String>,
    max_len: usize,
) -> impl Strategy<Value = Vec<SnapshotMessage>> {
    let key = key.into();
    prop::collection::btree_set(0i64..1_000_000, 1..=max_len.max(1)).prop_flat_map(
        move |offsets| {
            offsets
                .into_iter()
                .map(|offset| snapshot_at(key.clone(), offset))
                .collect::<Vec<_>>()
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::strategy::ValueTree;
    use proptest::test_runner::TestRunner;

    #[test]
    fn histories_are_strictly_ascending() {
        let mut runner = TestRunner::default();
        let strategy = snapshot_history_strategy("E-1", 5);
        for _ in 0..20 {
            let history = strategy.new_tree(&mut runner).unwrap().current();
            assert!(!history.is_empty());
            assert!(history
                .windows(2)
                .all(|w| w[0].source_version < w[1].source_version));
            assert!(history.iter().all(|m| m.natural_key.as_str() == "E-1"));
        }
    }

    proptest! {
        #[test]
        fn generated_snapshots_carry_the_importer(message in snapshot_strategy("E-9")) {
            prop_assert!(message.fields.contains_key("IMPORTER"));
            prop_assert!(message.children.contains_key(LINES));
        }
    }
}
