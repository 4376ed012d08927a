//! Property tests for fingerprint determinism.

use proptest::prelude::*;
use snapsync_codec::{fingerprint, Value};

fn leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        "[a-z0-9 ]{0,12}".prop_map(Value::Text),
    ]
}

fn fields() -> impl Strategy<Value = Vec<(String, Value)>> {
    prop::collection::btree_map("[a-z]{1,6}", leaf(), 0..8)
        .prop_map(|m| m.into_iter().collect())
}

proptest! {
    #[test]
    fn field_order_never_changes_fingerprint(pairs in fields(), seed in any::<u64>()) {
        let forward = Value::Map(
            pairs.iter().map(|(k, v)| (Value::from(k.as_str()), v.clone())).collect(),
        );
        let mut shuffled = pairs.clone();
        // Deterministic rotation stands in for a shuffle.
        if !shuffled.is_empty() {
            let n = (seed as usize) % shuffled.len();
            shuffled.rotate_left(n);
        }
        let rotated = Value::Map(
            shuffled.into_iter().map(|(k, v)| (Value::Text(k), v)).collect(),
        );
        prop_assert_eq!(fingerprint(&forward), fingerprint(&rotated));
    }

    #[test]
    fn distinct_leaves_have_distinct_fingerprints(a in leaf(), b in leaf()) {
        prop_assume!(a != b);
        prop_assert_ne!(fingerprint(&a), fingerprint(&b));
    }
}
