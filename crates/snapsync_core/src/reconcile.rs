//! Sub-entity reconciler.
//!
//! Snapshots restate children in full, but children carry their own push
//! tracking that a delete-all/insert-all cycle would lose. Children are
//! matched on a natural key; a matched child is rebuilt with the old
//! child's tracking records copied across, and the whole collection is
//! swapped in one assignment. Children's derived attributes are cleared so
//! the profile can stamp them afresh. Callers hold the parent entity's lock.

use crate::directive::{apply_directives, DirectiveTable};
use crate::entity::{Attributes, CanonicalEntity, ChildEntity};
use crate::error::{CoreError, CoreResult};
use crate::snapshot::ChildSnapshot;
use chrono::FixedOffset;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Derives a child's natural key from its parsed attributes.
pub type ChildKeyFn = Arc<dyn Fn(&Attributes) -> Option<String> + Send + Sync>;

/// Decides whether an unmatched child must be kept.
pub type RetainFn = Arc<dyn Fn(&ChildEntity) -> bool + Send + Sync>;

/// Declaration of one owned child collection.
#[derive(Clone)]
pub struct ChildCollectionSpec {
    /// Collection name in snapshots and on the entity.
    pub name: String,
    /// Directives for child fields.
    pub directives: DirectiveTable,
    natural_key: ChildKeyFn,
    retain_unmatched: Option<RetainFn>,
}

impl ChildCollectionSpec {
    /// Declares a collection with a custom key function.
    pub fn new(
        name: impl Into<String>,
        directives: DirectiveTable,
        natural_key: ChildKeyFn,
    ) -> Self {
        Self {
            name: name.into(),
            directives,
            natural_key,
            retain_unmatched: None,
        }
    }

    /// Declares a collection keyed by one attribute's display form.
    pub fn keyed_by(
        name: impl Into<String>,
        directives: DirectiveTable,
        attribute: impl Into<String>,
    ) -> Self {
        let attribute = attribute.into();
        Self::new(
            name,
            directives,
            Arc::new(move |attrs: &Attributes| attrs.get(&attribute).map(ToString::to_string)),
        )
    }

    /// Exclusion list: unmatched children for which `predicate` holds are
    /// kept instead of deleted, e.g. lines referenced by an in-flight
    /// shipment.
    pub fn retain_unmatched_when(mut self, predicate: RetainFn) -> Self {
        self.retain_unmatched = Some(predicate);
        self
    }

    fn key_of(&self, attrs: &Attributes) -> Option<String> {
        (self.natural_key)(attrs).filter(|k| !k.trim().is_empty())
    }

    fn must_retain(&self, child: &ChildEntity) -> bool {
        self.retain_unmatched
            .as_ref()
            .is_some_and(|predicate| predicate(child))
    }
}

impl fmt::Debug for ChildCollectionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildCollectionSpec")
            .field("name", &self.name)
            .field("directives", &self.directives.len())
            .field("retains_unmatched", &self.retain_unmatched.is_some())
            .finish()
    }
}

/// What a reconcile pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// New children with nothing to carry over.
    pub inserted: usize,
    /// Children rebuilt with their predecessor's tracking.
    pub replaced: usize,
    /// Matched children whose data did not change.
    pub unchanged: usize,
    /// Unmatched children removed.
    pub deleted: usize,
    /// Unmatched children kept by the exclusion list.
    pub retained: usize,
    /// Incoming children that repeated an earlier key in the same snapshot.
    pub duplicates: usize,
}

/// Reconciles one collection of `entity` against `incoming`.
///
/// `entity` is only modified on success.
///
/// # Errors
///
/// Returns [`CoreError::MissingNaturalKey`] if an incoming child has no key,
/// or a mandatory child field error from the directive engine.
pub fn reconcile(
    entity: &mut CanonicalEntity,
    spec: &ChildCollectionSpec,
    incoming: &[ChildSnapshot],
    offset: FixedOffset,
) -> CoreResult<ReconcileOutcome> {
    let existing = entity.children(&spec.name);
    let by_key: HashMap<&str, &ChildEntity> = existing
        .iter()
        .rev()
        .map(|c| (c.natural_key.as_str(), c))
        .collect();

    let mut outcome = ReconcileOutcome::default();

    // Repeated keys collapse into their first position, applied in order.
    let mut staged: Vec<(String, Vec<&ChildSnapshot>)> = Vec::with_capacity(incoming.len());
    let mut positions: HashMap<String, usize> = HashMap::new();
    for (index, snapshot) in incoming.iter().enumerate() {
        let mut fresh = Attributes::new();
        apply_directives(&mut fresh, &snapshot.fields, &spec.directives, offset)?;
        let key = spec.key_of(&fresh).ok_or_else(|| {
            CoreError::missing_natural_key(format!(
                "{} child #{index} of {}",
                spec.name, entity.natural_key
            ))
        })?;

        match positions.get(&key) {
            Some(&pos) => {
                warn!(collection = %spec.name, key = %key, "child repeated in snapshot, last one wins");
                staged[pos].1.push(snapshot);
                outcome.duplicates += 1;
            }
            None => {
                positions.insert(key.clone(), staged.len());
                staged.push((key, vec![snapshot]));
            }
        }
    }

    let mut next: Vec<ChildEntity> = Vec::with_capacity(staged.len());
    for (key, snapshots) in staged {
        let base = by_key.get(key.as_str()).copied();
        let mut fields = base.map(|old| old.fields.clone()).unwrap_or_default();
        for snapshot in snapshots {
            apply_directives(&mut fields, &snapshot.fields, &spec.directives, offset)?;
        }

        let child = match base {
            Some(old) if fields == old.fields => {
                outcome.unchanged += 1;
                let mut kept = old.clone();
                kept.derived.clear();
                kept
            }
            Some(old) => {
                outcome.replaced += 1;
                let mut replacement = ChildEntity::new(key, fields);
                replacement.tracking = old.tracking.clone();
                replacement
            }
            None => {
                outcome.inserted += 1;
                ChildEntity::new(key, fields)
            }
        };
        next.push(child);
    }

    for old in existing {
        if positions.contains_key(&old.natural_key) {
            continue;
        }
        if spec.must_retain(old) {
            outcome.retained += 1;
            let mut kept = old.clone();
            kept.derived.clear();
            next.push(kept);
        } else {
            debug!(collection = %spec.name, key = %old.natural_key, "deleting unmatched child");
            outcome.deleted += 1;
        }
    }

    entity.children.insert(spec.name.clone(), next);
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directive::{FieldCode, FieldDirective};
    use crate::field::FieldValue;
    use crate::sync_record::SyncRecord;
    use crate::types::{NaturalKey, PartnerId, SourceVersion};
    use chrono::{TimeDelta, Utc};
    use snapsync_codec::{Fingerprintable, Value};

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum LineCode {
        Number,
        Value,
    }

    impl FieldCode for LineCode {
        fn code(&self) -> &'static str {
            match self {
                LineCode::Number => "LINE_NO",
                LineCode::Value => "VALUE",
            }
        }

        fn all() -> &'static [Self] {
            &[LineCode::Number, LineCode::Value]
        }
    }

    fn spec() -> ChildCollectionSpec {
        let directives = DirectiveTable::builder::<LineCode>()
            .directive(LineCode::Number, FieldDirective::new("line_no"))
            .directive(LineCode::Value, FieldDirective::new("value"))
            .build();
        ChildCollectionSpec::keyed_by("lines", directives, "line_no")
    }

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn line(no: i64, value: i64) -> ChildSnapshot {
        ChildSnapshot::new()
            .with_field("LINE_NO", Value::Integer(no))
            .with_field("VALUE", Value::Integer(value))
    }

    fn entity() -> CanonicalEntity {
        CanonicalEntity::new(
            NaturalKey::new("E-1"),
            SourceVersion::from_unix_seconds(1).unwrap(),
        )
    }

    #[test]
    fn replaced_child_keeps_tracking() {
        let mut entity = entity();
        reconcile(&mut entity, &spec(), &[line(1, 100)], utc()).unwrap();

        let old_id = entity.children("lines")[0].id;
        let mut record = SyncRecord::new("E-1/1", PartnerId::new("broker"));
        let fp = entity.children("lines")[0].fingerprint();
        record.record_success(fp, Utc::now(), TimeDelta::zero());
        let record_id = record.id;
        entity
            .child_mut("lines", "1")
            .unwrap()
            .upsert_tracking(record);

        let outcome = reconcile(&mut entity, &spec(), &[line(1, 175)], utc()).unwrap();
        assert_eq!(outcome.replaced, 1);

        let lines = entity.children("lines");
        assert_eq!(lines.len(), 1);
        assert_ne!(lines[0].id, old_id);
        assert_eq!(lines[0].get("value"), Some(&FieldValue::Integer(175)));
        assert_eq!(lines[0].tracking.len(), 1);
        assert_eq!(lines[0].tracking[0].id, record_id);
    }

    #[test]
    fn unchanged_child_is_kept_as_is() {
        let mut entity = entity();
        reconcile(&mut entity, &spec(), &[line(1, 100)], utc()).unwrap();
        let before = entity.children("lines")[0].clone();

        let outcome = reconcile(&mut entity, &spec(), &[line(1, 100)], utc()).unwrap();
        assert_eq!(outcome.unchanged, 1);
        assert_eq!(entity.children("lines")[0], before);
    }

    #[test]
    fn unmatched_children_are_deleted_unless_retained() {
        let mut entity = entity();
        reconcile(&mut entity, &spec(), &[line(1, 1), line(2, 2), line(3, 3)], utc()).unwrap();
        entity
            .child_mut("lines", "3")
            .unwrap()
            .fields
            .insert("shipment".into(), FieldValue::from("SH-9"));

        let guarded = spec().retain_unmatched_when(Arc::new(|c: &ChildEntity| {
            c.get("shipment").is_some()
        }));
        let outcome = reconcile(&mut entity, &guarded, &[line(1, 1), line(4, 4)], utc()).unwrap();

        assert_eq!(outcome.unchanged, 1);
        assert_eq!(outcome.inserted, 1);
        assert_eq!(outcome.deleted, 1);
        assert_eq!(outcome.retained, 1);
        let keys: Vec<_> = entity
            .children("lines")
            .iter()
            .map(|c| c.natural_key.as_str())
            .collect();
        assert_eq!(keys, vec!["1", "4", "3"]);
    }

    #[test]
    fn child_without_key_aborts_untouched() {
        let mut entity = entity();
        reconcile(&mut entity, &spec(), &[line(1, 1)], utc()).unwrap();
        let before = entity.clone();

        let keyless = ChildSnapshot::new().with_field("VALUE", Value::Integer(9));
        let err = reconcile(&mut entity, &spec(), &[line(1, 2), keyless], utc()).unwrap_err();
        assert!(matches!(err, CoreError::MissingNaturalKey { .. }));
        assert_eq!(entity, before);
    }

    #[test]
    fn repeated_key_collapses_to_one_child() {
        let mut entity = entity();
        let outcome = reconcile(&mut entity, &spec(), &[line(1, 1), line(1, 5)], utc()).unwrap();
        assert_eq!(outcome.duplicates, 1);
        let lines = entity.children("lines");
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].get("value"), Some(&FieldValue::Integer(5)));

        let id = lines[0].id;
        let again = reconcile(&mut entity, &spec(), &[line(1, 1), line(1, 5)], utc()).unwrap();
        assert_eq!(again.unchanged, 1);
        assert_eq!(entity.children("lines")[0].id, id);
    }

    #[test]
    fn unchanged_child_keeps_id_but_drops_derived() {
        let mut entity = entity();
        reconcile(&mut entity, &spec(), &[line(1, 100)], utc()).unwrap();
        let id = entity.children("lines")[0].id;
        entity
            .child_mut("lines", "1")
            .unwrap()
            .derived
            .insert("hold_at".into(), FieldValue::from("x"));

        let outcome = reconcile(&mut entity, &spec(), &[line(1, 100)], utc()).unwrap();
        assert_eq!(outcome.unchanged, 1);
        let line = &entity.children("lines")[0];
        assert_eq!(line.id, id);
        assert!(line.derived.is_empty());
    }

    #[test]
    fn empty_restatement_clears_the_collection() {
        let mut entity = entity();
        reconcile(&mut entity, &spec(), &[line(1, 1), line(2, 2)], utc()).unwrap();
        let outcome = reconcile(&mut entity, &spec(), &[], utc()).unwrap();
        assert_eq!(outcome.deleted, 2);
        assert!(entity.children("lines").is_empty());
    }
}
