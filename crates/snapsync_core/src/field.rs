//! Typed attribute values and source date parsing.
//!
//! Upstream feeds carry dates in several textual and numeric shapes, and some
//! of them encode out-of-range clock components (minute `60`, hour `24`).
//! Those are normalised by rolling forward instead of rejecting the field.

use chrono::{DateTime, FixedOffset, NaiveDate, SecondsFormat, TimeDelta, TimeZone, Utc};
use regex::Regex;
use snapsync_codec::Value;
use std::cmp::Ordering;
use std::fmt;
use std::sync::LazyLock;
use thiserror::Error;

static NAIVE_DATE_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4})-?(\d{2})-?(\d{2})(?:[ T]?(\d{2}):?(\d{2})(?::?(\d{2}))?)?$")
        .expect("naive date-time pattern")
});

/// How a raw snapshot value is interpreted before merging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldType {
    /// Keep the value as delivered.
    #[default]
    Raw,
    /// Calendar date only.
    Date,
    /// Instant; zone-less inputs use the configured source offset.
    DateTime,
}

/// A typed attribute value stored on an entity or child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// Text.
    Text(String),
    /// Integer, including amounts in minor units.
    Integer(i64),
    /// Boolean flag.
    Bool(bool),
    /// Calendar date.
    Date(NaiveDate),
    /// Instant in UTC.
    DateTime(DateTime<Utc>),
    /// Nested data kept verbatim.
    Structured(Value),
}

impl FieldValue {
    /// Wraps a raw snapshot value without interpretation.
    ///
    /// Returns `None` for null, which is treated as absent.
    pub fn from_raw(raw: &Value) -> Option<Self> {
        match raw {
            Value::Null => None,
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Integer(n) => Some(Self::Integer(*n)),
            Value::Text(s) => Some(Self::Text(s.clone())),
            other => Some(Self::Structured(other.clone())),
        }
    }

    /// Returns true for whitespace-only text and structured null.
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Text(s) => s.trim().is_empty(),
            Self::Structured(v) => v.is_null(),
            _ => false,
        }
    }

    /// Returns the text, if this is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer, if this is one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the date, if this is one.
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Self::Date(d) => Some(*d),
            _ => None,
        }
    }

    /// Returns the instant, if this is one.
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }

    /// Orders two values of the same kind.
    ///
    /// Values of different kinds, and structured values, have no order.
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Text(a), Self::Text(b)) => Some(a.cmp(b)),
            (Self::Integer(a), Self::Integer(b)) => Some(a.cmp(b)),
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            (Self::Date(a), Self::Date(b)) => Some(a.cmp(b)),
            (Self::DateTime(a), Self::DateTime(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Projection form used for fingerprints and JSON output.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Text(s) => Value::Text(s.clone()),
            Self::Integer(n) => Value::Integer(*n),
            Self::Bool(b) => Value::Bool(*b),
            Self::Date(_) | Self::DateTime(_) => Value::Text(self.to_string()),
            Self::Structured(v) => v.clone(),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Integer(n) => write!(f, "{n}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Self::DateTime(dt) => f.write_str(&dt.to_rfc3339_opts(SecondsFormat::Secs, true)),
            Self::Structured(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

impl From<NaiveDate> for FieldValue {
    fn from(d: NaiveDate) -> Self {
        Self::Date(d)
    }
}

/// A raw value that could not be read as the requested type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot read {input} as {expected}")]
pub struct ParseError {
    /// The offending input, rendered.
    pub input: String,
    /// Name of the expected type.
    pub expected: &'static str,
}

impl ParseError {
    fn new(raw: &Value, expected: &'static str) -> Self {
        Self {
            input: raw.to_string(),
            expected,
        }
    }
}

/// Reads a raw snapshot value as the given type.
///
/// Null and blank text yield `Ok(None)`, meaning the field is absent.
///
/// # Errors
///
/// Returns a [`ParseError`] when a present value does not fit the type.
pub fn parse_field(
    raw: &Value,
    ty: FieldType,
    offset: FixedOffset,
) -> Result<Option<FieldValue>, ParseError> {
    if raw.is_null() || raw.as_text().is_some_and(|s| s.trim().is_empty()) {
        return Ok(None);
    }
    match ty {
        FieldType::Raw => Ok(FieldValue::from_raw(raw)),
        FieldType::Date => parse_date(raw).map(|d| Some(FieldValue::Date(d))),
        FieldType::DateTime => parse_datetime(raw, offset).map(|dt| Some(FieldValue::DateTime(dt))),
    }
}

/// Reads `YYYY-MM-DD` or `YYYYMMDD` (text or integer).
///
/// # Errors
///
/// Returns a [`ParseError`] for any other shape or an impossible date.
pub fn parse_date(raw: &Value) -> Result<NaiveDate, ParseError> {
    let err = || ParseError::new(raw, "date");
    let text = raw_text(raw).ok_or_else(err)?;
    let caps = NAIVE_DATE_TIME.captures(&text).ok_or_else(err)?;
    if caps.get(4).is_some() {
        return Err(err());
    }
    let (y, m, d) = (number(&caps, 1), number(&caps, 2), number(&caps, 3));
    i32::try_from(y)
        .ok()
        .and_then(|y| NaiveDate::from_ymd_opt(y, m, d))
        .ok_or_else(err)
}

/// Reads an instant.
///
/// Accepts RFC 3339, `YYYY-MM-DD[ T]HH:MM[:SS]`, numeric
/// `YYYYMMDDHHMM[SS]` (text or integer) and bare dates (midnight). Inputs
/// without a zone are interpreted in `offset`. Minute `60` and hour `24` roll
/// forward.
///
/// # Errors
///
/// Returns a [`ParseError`] for any other shape or impossible components.
pub fn parse_datetime(raw: &Value, offset: FixedOffset) -> Result<DateTime<Utc>, ParseError> {
    let err = || ParseError::new(raw, "date-time");
    let text = raw_text(raw).ok_or_else(err)?;

    if let Ok(dt) = DateTime::parse_from_rfc3339(&text) {
        return Ok(dt.with_timezone(&Utc));
    }

    let caps = NAIVE_DATE_TIME.captures(&text).ok_or_else(err)?;
    let y = i32::try_from(number(&caps, 1)).map_err(|_| err())?;
    assemble(
        y,
        [
            number(&caps, 2),
            number(&caps, 3),
            number(&caps, 4),
            number(&caps, 5),
            number(&caps, 6),
        ],
        offset,
    )
    .ok_or_else(err)
}

fn raw_text(raw: &Value) -> Option<String> {
    match raw {
        Value::Text(s) => Some(s.trim().to_string()),
        Value::Integer(n) => Some(n.to_string()),
        _ => None,
    }
}

// Missing optional groups read as zero.
fn number(caps: &regex::Captures<'_>, group: usize) -> u32 {
    caps.get(group)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

fn assemble(
    year: i32,
    [month, day, hour, minute, second]: [u32; 5],
    offset: FixedOffset,
) -> Option<DateTime<Utc>> {
    if hour > 24 || minute > 60 || second > 59 {
        return None;
    }
    if hour == 24 && (minute != 0 || second != 0) {
        return None;
    }

    let midnight = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(0, 0, 0)?;
    let local = midnight
        + TimeDelta::hours(i64::from(hour))
        + TimeDelta::minutes(i64::from(minute))
        + TimeDelta::seconds(i64::from(second));

    offset
        .from_local_datetime(&local)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}
