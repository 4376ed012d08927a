//! Field directive engine.
//!
//! A directive says how one snapshot field merges into an entity attribute.
//! Applying a snapshot is a three step affair:
//!
//! 1. every merged attribute is cleared, except targets whose policy needs
//!    the current value (`KeepEarliest`, `KeepLatest`, `SetIfAbsent`);
//! 2. each field present in the snapshot is parsed per its directive, with
//!    undeclared fields defaulting to a raw overwrite of the same name;
//! 3. the parsed value is merged per policy.
//!
//! Step 1 is what removes values left over from an older snapshot that the
//! newer one no longer mentions.

use crate::entity::Attributes;
use crate::error::{CoreError, CoreResult};
use crate::field::{parse_field, FieldType, FieldValue};
use chrono::FixedOffset;
use snapsync_codec::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::hash::Hash;
use tracing::debug;

/// How an incoming value merges with the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergePolicy {
    /// Assign unconditionally.
    #[default]
    Overwrite,
    /// Keep the smaller of incoming and current.
    KeepEarliest,
    /// Keep the larger of incoming and current.
    KeepLatest,
    /// Assign only if current is unset or blank.
    SetIfAbsent,
}

impl MergePolicy {
    /// Returns true if the current value survives the clearing step.
    pub fn retains_current(&self) -> bool {
        !matches!(self, MergePolicy::Overwrite)
    }

    /// Merges `incoming` into `current`, returning the value to store.
    ///
    /// Values of different kinds cannot be ordered; the incoming one wins.
    pub fn merge(&self, current: Option<&FieldValue>, incoming: FieldValue) -> FieldValue {
        let Some(current) = current.filter(|c| !c.is_blank()) else {
            return incoming;
        };
        let keep = match self {
            MergePolicy::Overwrite => false,
            MergePolicy::SetIfAbsent => true,
            MergePolicy::KeepEarliest => current.compare(&incoming) == Some(Ordering::Less),
            MergePolicy::KeepLatest => current.compare(&incoming) == Some(Ordering::Greater),
        };
        if keep {
            current.clone()
        } else {
            incoming
        }
    }
}

/// Rule for one snapshot field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDirective {
    /// Attribute written on the entity.
    pub target: String,
    /// Merge policy.
    pub policy: MergePolicy,
    /// Parse type.
    pub field_type: FieldType,
    /// Whether a missing or unreadable value aborts the message.
    pub mandatory: bool,
}

impl FieldDirective {
    /// Raw overwrite into `target`.
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            policy: MergePolicy::Overwrite,
            field_type: FieldType::Raw,
            mandatory: false,
        }
    }

    /// Sets the merge policy.
    pub fn with_policy(mut self, policy: MergePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the parse type.
    pub fn with_type(mut self, field_type: FieldType) -> Self {
        self.field_type = field_type;
        self
    }

    /// Marks the field mandatory.
    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }
}

/// Closed set of field codes a domain understands.
pub trait FieldCode: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static {
    /// Code as it appears in snapshots.
    fn code(&self) -> &'static str;

    /// Every declared code.
    fn all() -> &'static [Self];

    /// Looks a code up by its snapshot spelling.
    fn from_code(code: &str) -> Option<Self> {
        Self::all().iter().copied().find(|c| c.code() == code)
    }
}

/// Directives keyed by field code.
#[derive(Debug, Clone, Default)]
pub struct DirectiveTable {
    entries: HashMap<String, FieldDirective>,
}

/// Builds a [`DirectiveTable`] from typed field codes.
#[derive(Debug)]
pub struct DirectiveTableBuilder<C: FieldCode> {
    entries: Vec<(C, FieldDirective)>,
}

impl<C: FieldCode> DirectiveTableBuilder<C> {
    /// Declares the directive for `code`. A later declaration replaces an
    /// earlier one.
    pub fn directive(mut self, code: C, directive: FieldDirective) -> Self {
        self.entries.push((code, directive));
        self
    }

    /// Finishes the table.
    pub fn build(self) -> DirectiveTable {
        DirectiveTable {
            entries: self
                .entries
                .into_iter()
                .map(|(code, directive)| (code.code().to_string(), directive))
                .collect(),
        }
    }
}

impl DirectiveTable {
    /// Starts a table over the field codes `C`.
    pub fn builder<C: FieldCode>() -> DirectiveTableBuilder<C> {
        DirectiveTableBuilder {
            entries: Vec::new(),
        }
    }

    /// Loads a table from loosely typed rows, e.g. a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownFieldCode`] for the first row whose code
    /// is not declared by `C`.
    pub fn from_rows<C, R, S>(rows: R) -> CoreResult<Self>
    where
        C: FieldCode,
        R: IntoIterator<Item = (S, FieldDirective)>,
        S: AsRef<str>,
    {
        let mut builder = Self::builder::<C>();
        for (code, directive) in rows {
            let code = code.as_ref();
            let typed = C::from_code(code).ok_or_else(|| CoreError::UnknownFieldCode {
                code: code.to_string(),
            })?;
            builder = builder.directive(typed, directive);
        }
        Ok(builder.build())
    }

    /// Directive declared for a code.
    pub fn get(&self, code: &str) -> Option<&FieldDirective> {
        self.entries.get(code)
    }

    /// Directive for a snapshot field, defaulting to a raw overwrite.
    pub fn resolve(&self, code: &str) -> FieldDirective {
        self.get(code)
            .cloned()
            .unwrap_or_else(|| FieldDirective::new(code))
    }

    /// Number of declared directives.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is declared.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn retained_targets(&self) -> HashSet<&str> {
        self.entries
            .values()
            .filter(|d| d.policy.retains_current())
            .map(|d| d.target.as_str())
            .collect()
    }
}

/// Counters from one directive pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectiveOutcome {
    /// Attributes written.
    pub applied: usize,
    /// Attributes removed by the clearing step and not written again.
    pub cleared: Vec<String>,
    /// Optional fields dropped because they did not parse.
    pub rejected: Vec<String>,
}

/// Applies a snapshot's fields to `attributes`.
///
/// `attributes` is only modified on success.
///
/// # Errors
///
/// Returns [`CoreError::MandatoryField`] when a mandatory field is missing or
/// unreadable.
pub fn apply_directives(
    attributes: &mut Attributes,
    snapshot: &BTreeMap<String, Value>,
    table: &DirectiveTable,
    offset: FixedOffset,
) -> CoreResult<DirectiveOutcome> {
    let mut outcome = DirectiveOutcome::default();

    for (code, directive) in &table.entries {
        if directive.mandatory && snapshot.get(code).map_or(true, Value::is_null) {
            return Err(CoreError::mandatory_field(code.as_str(), "missing"));
        }
    }

    let retained = table.retained_targets();
    let mut merged: Attributes = attributes
        .iter()
        .filter(|(name, _)| retained.contains(name.as_str()))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();

    for (code, raw) in snapshot {
        let directive = table.resolve(code);
        let parsed = match parse_field(raw, directive.field_type, offset) {
            Ok(parsed) => parsed,
            Err(e) if directive.mandatory => {
                return Err(CoreError::mandatory_field(code.as_str(), e.to_string()));
            }
            Err(e) => {
                debug!(field = %code, error = %e, "dropping unreadable field");
                outcome.rejected.push(code.clone());
                None
            }
        };
        let Some(incoming) = parsed else {
            if directive.mandatory {
                return Err(CoreError::mandatory_field(code.as_str(), "blank"));
            }
            continue;
        };

        let value = directive.policy.merge(merged.get(&directive.target), incoming);
        merged.insert(directive.target, value);
        outcome.applied += 1;
    }

    outcome.cleared = attributes
        .keys()
        .filter(|name| !merged.contains_key(name.as_str()))
        .cloned()
        .collect();
    *attributes = merged;
    Ok(outcome)
}
