//! Aggregate projector.
//!
//! Derived attributes rolled up from child collections after reconciliation.

use crate::entity::{CanonicalEntity, ChildEntity};
use crate::field::FieldValue;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Reads one value off a child.
pub type Extractor = Arc<dyn Fn(&ChildEntity) -> Option<FieldValue> + Send + Sync>;

/// Extractor returning a child attribute as is.
pub fn field_extractor(name: impl Into<String>) -> Extractor {
    let name = name.into();
    Arc::new(move |child: &ChildEntity| child.get(&name).cloned())
}

/// How extracted values are combined.
#[derive(Clone)]
pub enum Accumulator {
    /// Distinct display values joined by `separator`, in sorted order.
    Distinct {
        /// Join separator.
        separator: String,
        /// Value source.
        extract: Extractor,
    },
    /// Integer sum; absent and non-integer contributions are skipped.
    Sum {
        /// Leave the previous value alone when the total is zero.
        write_if_nonzero: bool,
        /// Value source.
        extract: Extractor,
    },
    /// Children with `started` set and `terminal` unset.
    PendingCount {
        /// Start-of-process marker attribute.
        started: String,
        /// Terminal marker attribute.
        terminal: String,
    },
}

/// One derived attribute and how to compute it.
#[derive(Clone)]
pub struct AggregateSpec {
    /// Derived attribute written on the entity.
    pub target: String,
    /// Child collection walked.
    pub collection: String,
    /// Combination rule.
    pub accumulator: Accumulator,
}

impl AggregateSpec {
    /// Distinct values of a child attribute, joined for display.
    pub fn distinct(
        target: impl Into<String>,
        collection: impl Into<String>,
        separator: impl Into<String>,
        extract: Extractor,
    ) -> Self {
        Self {
            target: target.into(),
            collection: collection.into(),
            accumulator: Accumulator::Distinct {
                separator: separator.into(),
                extract,
            },
        }
    }

    /// Sum of a child attribute, always written.
    pub fn sum(target: impl Into<String>, collection: impl Into<String>, extract: Extractor) -> Self {
        Self {
            target: target.into(),
            collection: collection.into(),
            accumulator: Accumulator::Sum {
                write_if_nonzero: false,
                extract,
            },
        }
    }

    /// Sum of a child attribute, written only when non-zero.
    pub fn sum_if_nonzero(
        target: impl Into<String>,
        collection: impl Into<String>,
        extract: Extractor,
    ) -> Self {
        Self {
            target: target.into(),
            collection: collection.into(),
            accumulator: Accumulator::Sum {
                write_if_nonzero: true,
                extract,
            },
        }
    }

    /// Count of children started but not finished.
    pub fn pending_count(
        target: impl Into<String>,
        collection: impl Into<String>,
        started: impl Into<String>,
        terminal: impl Into<String>,
    ) -> Self {
        Self {
            target: target.into(),
            collection: collection.into(),
            accumulator: Accumulator::PendingCount {
                started: started.into(),
                terminal: terminal.into(),
            },
        }
    }

    fn compute(&self, children: &[ChildEntity]) -> Option<FieldValue> {
        match &self.accumulator {
            Accumulator::Distinct { separator, extract } => {
                let values: BTreeSet<String> = children
                    .iter()
                    .filter_map(|c| extract(c))
                    .filter(|v| !v.is_blank())
                    .map(|v| v.to_string().trim().to_string())
                    .collect();
                if values.is_empty() {
                    None
                } else {
                    Some(FieldValue::Text(
                        values.into_iter().collect::<Vec<_>>().join(separator),
                    ))
                }
            }
            Accumulator::Sum { extract, .. } => Some(FieldValue::Integer(
                children
                    .iter()
                    .filter_map(|c| extract(c).and_then(|v| v.as_integer()))
                    .fold(0i64, i64::saturating_add),
            )),
            Accumulator::PendingCount { started, terminal } => {
                let pending = children
                    .iter()
                    .filter(|c| is_set(c.get(started)) && !is_set(c.get(terminal)))
                    .count();
                Some(FieldValue::Integer(i64::try_from(pending).unwrap_or(i64::MAX)))
            }
        }
    }
}

impl fmt::Debug for AggregateSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.accumulator {
            Accumulator::Distinct { .. } => "distinct",
            Accumulator::Sum {
                write_if_nonzero: true,
                ..
            } => "sum_if_nonzero",
            Accumulator::Sum { .. } => "sum",
            Accumulator::PendingCount { .. } => "pending_count",
        };
        f.debug_struct("AggregateSpec")
            .field("target", &self.target)
            .field("collection", &self.collection)
            .field("kind", &kind)
            .finish()
    }
}

fn is_set(value: Option<&FieldValue>) -> bool {
    value.is_some_and(|v| !v.is_blank())
}

/// Recomputes every aggregate on `entity`. Returns how many were written.
pub fn project(entity: &mut CanonicalEntity, specs: &[AggregateSpec]) -> usize {
    let mut written = 0;
    for spec in specs {
        let computed = spec.compute(entity.children(&spec.collection));
        match computed {
            Some(FieldValue::Integer(0))
                if matches!(
                    spec.accumulator,
                    Accumulator::Sum {
                        write_if_nonzero: true,
                        ..
                    }
                ) =>
            {
                debug!(attribute = %spec.target, "zero total, keeping previous value");
            }
            Some(value) => {
                entity.derived.insert(spec.target.clone(), value);
                written += 1;
            }
            None => {
                entity.derived.remove(&spec.target);
            }
        }
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Attributes;
    use crate::types::{NaturalKey, SourceVersion};

    fn line(key: &str, fields: &[(&str, FieldValue)]) -> ChildEntity {
        let attrs: Attributes = fields
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect();
        ChildEntity::new(key, attrs)
    }

    fn entity_with(lines: Vec<ChildEntity>) -> CanonicalEntity {
        let mut entity = CanonicalEntity::new(
            NaturalKey::new("E-1"),
            SourceVersion::from_unix_seconds(1).unwrap(),
        );
        entity.children.insert("lines".into(), lines);
        entity
    }

    #[test]
    fn distinct_values_ignore_order_and_duplicates() {
        let mut entity = entity_with(vec![
            line("1", &[("country", "CN".into())]),
            line("2", &[("country", "DE".into())]),
            line("3", &[("country", "CN".into())]),
            line("4", &[("country", " ".into())]),
            line("5", &[]),
        ]);
        let specs = [AggregateSpec::distinct(
            "countries",
            "lines",
            ", ",
            field_extractor("country"),
        )];
        assert_eq!(project(&mut entity, &specs), 1);
        assert_eq!(entity.derived("countries"), Some(&FieldValue::from("CN, DE")));

        entity.children.insert("lines".into(), Vec::new());
        project(&mut entity, &specs);
        assert_eq!(entity.derived("countries"), None);
    }

    #[test]
    fn sums_skip_missing_values() {
        let mut entity = entity_with(vec![
            line("1", &[("value", FieldValue::Integer(1000))]),
            line("2", &[]),
            line("3", &[("value", FieldValue::Integer(250))]),
            line("4", &[("value", FieldValue::from("n/a"))]),
        ]);
        project(
            &mut entity,
            &[AggregateSpec::sum("total", "lines", field_extractor("value"))],
        );
        assert_eq!(entity.derived("total"), Some(&FieldValue::Integer(1250)));
    }

    #[test]
    fn zero_totals_keep_prior_value_when_asked() {
        let mut entity = entity_with(vec![line("1", &[])]);
        entity.derived.insert("duty".into(), FieldValue::Integer(40));
        entity.derived.insert("fees".into(), FieldValue::Integer(7));
        project(
            &mut entity,
            &[
                AggregateSpec::sum_if_nonzero("duty", "lines", field_extractor("duty")),
                AggregateSpec::sum("fees", "lines", field_extractor("fees")),
            ],
        );
        assert_eq!(entity.derived("duty"), Some(&FieldValue::Integer(40)));
        assert_eq!(entity.derived("fees"), Some(&FieldValue::Integer(0)));
    }

    #[test]
    fn pending_count_needs_start_without_terminal() {
        let mut entity = entity_with(vec![
            line("1", &[("hold", "x".into())]),
            line("2", &[("hold", "x".into()), ("released", "y".into())]),
            line("3", &[("released", "y".into())]),
            line("4", &[("hold", "x".into())]),
        ]);
        project(
            &mut entity,
            &[AggregateSpec::pending_count("pending", "lines", "hold", "released")],
        );
        assert_eq!(entity.derived("pending"), Some(&FieldValue::Integer(2)));
    }

    #[test]
    fn custom_extractors() {
        let mut entity = entity_with(vec![
            line("1", &[("qty", FieldValue::Integer(2)), ("price", FieldValue::Integer(5))]),
            line("2", &[("qty", FieldValue::Integer(3)), ("price", FieldValue::Integer(10))]),
        ]);
        let line_total: Extractor = Arc::new(|c: &ChildEntity| {
            let qty = c.get("qty")?.as_integer()?;
            let price = c.get("price")?.as_integer()?;
            Some(FieldValue::Integer(qty * price))
        });
        project(&mut entity, &[AggregateSpec::sum("total", "lines", line_total)]);
        assert_eq!(entity.derived("total"), Some(&FieldValue::Integer(40)));
    }
}
