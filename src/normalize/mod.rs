//! Row normalizer: positional scalars in, named candidate record out.
//!
//! Each [`FieldSpec`] of a [`TableSchema`] picks its raw value (a tuple
//! position or a fixed literal) and runs its transform chain. `Cap` steps
//! always run first. Reference fields are left as [`FieldValue::PendingRef`]
//! for the resolver.

use crate::parser::ScalarValue;
use crate::schema::{Collection, FieldSpec, Literal, Source, TableSchema, Transform};
use crate::store::{Document, RecordId};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());

/// A typed document field value
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    /// Resolved reference to a parent record
    Ref(RecordId),
    /// 1-based parent index waiting for the resolver
    PendingRef {
        parent: Collection,
        index: Option<i64>,
    },
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(i) => Some(*i as f64),
            FieldValue::Float(f) => Some(*f),
            FieldValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            FieldValue::Text(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
            _ => None,
        }
    }

    /// Render a scalar value as text; nulls and references have no text form.
    fn to_text(&self) -> Option<String> {
        match self {
            FieldValue::Text(s) => Some(s.clone()),
            FieldValue::Int(i) => Some(i.to_string()),
            FieldValue::Float(f) => Some(f.to_string()),
            FieldValue::Bool(b) => Some(b.to_string()),
            FieldValue::Timestamp(ts) => Some(ts.to_rfc3339()),
            _ => None,
        }
    }

    /// JSON form stored in documents. Pending references store as null.
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Null | FieldValue::PendingRef { .. } => Value::Null,
            FieldValue::Bool(b) => Value::Bool(*b),
            FieldValue::Int(i) => Value::from(*i),
            FieldValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            FieldValue::Text(s) => Value::String(s.clone()),
            FieldValue::Timestamp(ts) => Value::String(ts.to_rfc3339()),
            FieldValue::Ref(id) => Value::String(id.to_string()),
        }
    }

    fn from_scalar(value: &ScalarValue) -> Self {
        match value {
            ScalarValue::Null => FieldValue::Null,
            ScalarValue::Timestamp(ts) => FieldValue::Timestamp(*ts),
            ScalarValue::Number(n) => number(*n),
            ScalarValue::Text(s) => FieldValue::Text(s.clone()),
        }
    }

    fn from_literal(literal: Literal, now: DateTime<Utc>) -> Self {
        match literal {
            Literal::Null => FieldValue::Null,
            Literal::Bool(b) => FieldValue::Bool(b),
            Literal::Int(i) => FieldValue::Int(i),
            Literal::Float(f) => FieldValue::Float(f),
            Literal::Text(s) => FieldValue::Text(s.to_string()),
            Literal::Now => FieldValue::Timestamp(now),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => write!(f, "null"),
            FieldValue::PendingRef { parent, index } => match index {
                Some(i) => write!(f, "{}[{}]", parent, i),
                None => write!(f, "{}[?]", parent),
            },
            other => match other.to_text() {
                Some(text) => f.write_str(&text),
                None => write!(f, "{}", other.to_json()),
            },
        }
    }
}

/// Whole numbers become integers, the rest stay floats.
fn number(n: f64) -> FieldValue {
    if n.fract() == 0.0 && n >= i64::MIN as f64 && n < i64::MAX as f64 {
        FieldValue::Int(n as i64)
    } else {
        FieldValue::Float(n)
    }
}

/// A named record built from one tuple, not yet stored
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateRecord {
    pub collection: Collection,
    pub natural_key: String,
    pub fields: Vec<(&'static str, FieldValue)>,
}

impl CandidateRecord {
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    pub fn fields_mut(&mut self) -> impl Iterator<Item = &mut FieldValue> {
        self.fields.iter_mut().map(|(_, v)| v)
    }

    /// Convert the fields into a JSON document, in schema order
    pub fn to_document(&self) -> Document {
        self.fields
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_json()))
            .collect()
    }
}

/// Why a row was skipped without touching the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Tuple never balanced its quotes or parentheses
    Unbalanced,
    MissingRequired { field: &'static str },
    MissingNaturalKey { field: &'static str },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Unbalanced => write!(f, "unbalanced tuple"),
            SkipReason::MissingRequired { field } => write!(f, "required field '{}' is null", field),
            SkipReason::MissingNaturalKey { field } => write!(f, "natural key '{}' is empty", field),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    Record(CandidateRecord),
    Skip(SkipReason),
}

/// Coercion failure. Counts the row as failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    #[error("field '{field}': cannot parse '{value}' as a date")]
    InvalidDate { field: &'static str, value: String },
}

/// Normalize one tuple's values against a schema.
pub fn normalize(schema: &TableSchema, values: &[ScalarValue]) -> Result<Normalized, NormalizeError> {
    normalize_at(schema, values, Utc::now())
}

/// Same as [`normalize`] with a fixed clock for `Literal::Now`.
pub fn normalize_at(
    schema: &TableSchema,
    values: &[ScalarValue],
    now: DateTime<Utc>,
) -> Result<Normalized, NormalizeError> {
    let mut fields = Vec::with_capacity(schema.fields.len());

    for spec in schema.fields {
        let raw = match spec.source {
            Source::Column(pos) => values
                .get(pos)
                .map(FieldValue::from_scalar)
                .unwrap_or(FieldValue::Null),
            Source::Fixed(literal) => FieldValue::from_literal(literal, now),
        };

        if spec.required && raw.is_null() && !spec.has_default() {
            return Ok(Normalized::Skip(SkipReason::MissingRequired { field: spec.name }));
        }

        let value = apply_chain(spec, raw, now)?;
        fields.push((spec.name, value));
    }

    let key = fields
        .iter()
        .find(|(name, _)| *name == schema.natural_key)
        .and_then(|(_, v)| v.to_text())
        .filter(|k| !k.trim().is_empty());

    match key {
        Some(natural_key) => Ok(Normalized::Record(CandidateRecord {
            collection: schema.collection,
            natural_key,
            fields,
        })),
        None => Ok(Normalized::Skip(SkipReason::MissingNaturalKey {
            field: schema.natural_key,
        })),
    }
}

fn apply_chain(
    spec: &FieldSpec,
    raw: FieldValue,
    now: DateTime<Utc>,
) -> Result<FieldValue, NormalizeError> {
    let caps = spec.transforms.iter().filter(|t| matches!(t, Transform::Cap(_)));
    let rest = spec.transforms.iter().filter(|t| !matches!(t, Transform::Cap(_)));

    let mut value = raw;
    for transform in caps.chain(rest) {
        value = apply(spec.name, transform, value, now)?;
    }
    Ok(value)
}

fn apply(
    field: &'static str,
    transform: &Transform,
    value: FieldValue,
    now: DateTime<Utc>,
) -> Result<FieldValue, NormalizeError> {
    let out = match transform {
        Transform::Cap(n) => map_text(value, |mut s| {
            if let Some((byte, _)) = s.char_indices().nth(*n) {
                s.truncate(byte);
            }
            s
        }),
        Transform::StripTags => map_text(value, |s| TAG_RE.replace_all(&s, "").into_owned()),
        Transform::Trim => map_text(value, |s| s.trim().to_string()),
        Transform::Lowercase => map_text(value, |s| s.to_lowercase()),
        Transform::BlankAsNull => match value {
            FieldValue::Text(s) if s.trim().is_empty() => FieldValue::Null,
            other => other,
        },
        Transform::ZeroAsNull => match value {
            FieldValue::Int(0) => FieldValue::Null,
            FieldValue::Float(f) if f == 0.0 => FieldValue::Null,
            other => other,
        },
        Transform::Default(literal) => {
            if value.is_null() {
                FieldValue::from_literal(*literal, now)
            } else {
                value
            }
        }
        Transform::IntFloor => int_floor(value),
        Transform::Float => match value.as_f64() {
            Some(f) => FieldValue::Float(f),
            None => FieldValue::Null,
        },
        Transform::Date => parse_date(field, value)?,
        Transform::Flag {
            equals,
            then,
            otherwise,
        } => {
            let hit = value.as_f64().is_some_and(|f| f == *equals);
            FieldValue::from_literal(if hit { *then } else { *otherwise }, now)
        }
        Transform::Reference(parent) => FieldValue::PendingRef {
            parent: *parent,
            index: match int_floor(value) {
                FieldValue::Int(i) => Some(i),
                _ => None,
            },
        },
    };
    Ok(out)
}

fn map_text(value: FieldValue, f: impl FnOnce(String) -> String) -> FieldValue {
    match value {
        FieldValue::Null | FieldValue::Ref(_) | FieldValue::PendingRef { .. } => value,
        other => match other.to_text() {
            Some(s) => FieldValue::Text(f(s)),
            None => other,
        },
    }
}

/// Integer part, reading text the way a lenient integer parser would:
/// leading whitespace, an optional sign, then digits up to the first non-digit.
fn int_floor(value: FieldValue) -> FieldValue {
    match value {
        FieldValue::Int(_) => value,
        FieldValue::Float(f) if f.is_finite() => FieldValue::Int(f.trunc() as i64),
        FieldValue::Bool(b) => FieldValue::Int(b as i64),
        FieldValue::Timestamp(ts) => FieldValue::Int(ts.timestamp_millis()),
        FieldValue::Text(s) => leading_int(&s).map_or(FieldValue::Null, FieldValue::Int),
        _ => FieldValue::Null,
    }
}

fn leading_int(s: &str) -> Option<i64> {
    let t = s.trim_start();
    let digits_from = usize::from(t.starts_with(['-', '+']));
    let end = t[digits_from..]
        .find(|c: char| !c.is_ascii_digit())
        .map_or(t.len(), |i| i + digits_from);
    if end == digits_from {
        return None;
    }
    t[..end].parse().ok()
}

const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

fn parse_date(field: &'static str, value: FieldValue) -> Result<FieldValue, NormalizeError> {
    let text = match value {
        FieldValue::Text(s) => s,
        FieldValue::Int(ms) => {
            return Ok(Utc
                .timestamp_millis_opt(ms)
                .single()
                .map_or(FieldValue::Null, FieldValue::Timestamp))
        }
        FieldValue::Float(ms) => {
            return Ok(Utc
                .timestamp_millis_opt(ms as i64)
                .single()
                .map_or(FieldValue::Null, FieldValue::Timestamp))
        }
        other => return Ok(other),
    };

    let t = text.trim();
    // MySQL zero dates carry no information
    if t.is_empty() || t.starts_with("0000-00-00") {
        return Ok(FieldValue::Null);
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(t) {
        return Ok(FieldValue::Timestamp(ts.with_timezone(&Utc)));
    }
    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(t, format) {
            return Ok(FieldValue::Timestamp(naive.and_utc()));
        }
    }
    if let Some(midnight) = NaiveDate::parse_from_str(t, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    {
        return Ok(FieldValue::Timestamp(midnight.and_utc()));
    }

    Err(NormalizeError::InvalidDate {
        field,
        value: text,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::schema_for;

    fn text(s: &str) -> ScalarValue {
        ScalarValue::Text(s.to_string())
    }

    fn record(n: Normalized) -> CandidateRecord {
        match n {
            Normalized::Record(r) => r,
            Normalized::Skip(reason) => panic!("unexpected skip: {}", reason),
        }
    }

    #[test]
    fn test_users_row() {
        let values = vec![
            ScalarValue::Number(7.0),
            text("Alice"),
            text("  Alice@Example.COM "),
            text("555"),
            ScalarValue::Null,
            ScalarValue::Number(1.0),
        ];
        let r = record(normalize(schema_for(Collection::Users), &values).unwrap());
        assert_eq!(r.natural_key, "alice@example.com");
        assert_eq!(r.get("password"), Some(&FieldValue::Text(String::new())));
        assert_eq!(r.get("role"), Some(&FieldValue::Text("student".into())));
        assert_eq!(r.get("isActive"), Some(&FieldValue::Bool(true)));
    }

    #[test]
    fn test_document_keys_follow_schema_order() {
        let schema = schema_for(Collection::Users);
        let values = vec![
            ScalarValue::Number(7.0),
            text("Alice"),
            text("alice@example.com"),
            text("555"),
            text("secret"),
            ScalarValue::Number(1.0),
        ];
        let doc = record(normalize(schema, &values).unwrap()).to_document();

        let keys: Vec<&str> = doc.keys().map(String::as_str).collect();
        let expected: Vec<&str> = schema
            .fields
            .iter()
            .map(|f| f.name)
            .filter(|name| doc.contains_key(*name))
            .collect();
        assert_eq!(keys, expected);
        assert_eq!(keys[..2], ["name", "email"]);
    }

    #[test]
    fn test_missing_required_skips() {
        let values = vec![ScalarValue::Number(1.0), text("Bob"), ScalarValue::Null];
        let n = normalize(schema_for(Collection::Users), &values).unwrap();
        assert_eq!(n, Normalized::Skip(SkipReason::MissingRequired { field: "email" }));
    }

    #[test]
    fn test_blank_natural_key_skips() {
        let values = vec![ScalarValue::Number(1.0), text("Bob"), text("   ")];
        let n = normalize(schema_for(Collection::Users), &values).unwrap();
        assert_eq!(n, Normalized::Skip(SkipReason::MissingNaturalKey { field: "email" }));
    }

    #[test]
    fn test_positions_past_end_are_null() {
        let values = vec![ScalarValue::Number(1.0), text("Rust 101")];
        let r = record(normalize(schema_for(Collection::Courses), &values).unwrap());
        assert_eq!(
            r.get("description"),
            Some(&FieldValue::Text("Course Description".into()))
        );
    }

    #[test]
    fn test_cap_counts_characters() {
        let long: String = "é".repeat(250);
        let values = vec![ScalarValue::Number(1.0), text(&long)];
        let r = record(normalize(schema_for(Collection::Courses), &values).unwrap());
        assert_eq!(r.natural_key.chars().count(), 200);
    }

    #[test]
    fn test_cap_runs_before_strip_tags() {
        let mut values = vec![ScalarValue::Null; 15];
        values[3] = text("Morning");
        values[12] = text(&format!("{}<b>bold</b>", "x".repeat(498)));
        let r = record(normalize(schema_for(Collection::Batches), &values).unwrap());
        // capped to 500 chars first ("xxx...<b"), then the unclosed tag survives
        assert_eq!(
            r.get("description"),
            Some(&FieldValue::Text(format!("{}<b", "x".repeat(498))))
        );
    }

    #[test]
    fn test_batch_dates_and_flags() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut values = vec![ScalarValue::Null; 15];
        values[3] = text("Evening");
        values[7] = text("30 seats");
        values[8] = text("2023-06-01");
        values[9] = text("0000-00-00 00:00:00");
        values[14] = ScalarValue::Number(1.0);
        let r = record(normalize_at(schema_for(Collection::Batches), &values, now).unwrap());
        assert_eq!(
            r.get("startDate"),
            Some(&FieldValue::Timestamp(Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap()))
        );
        assert_eq!(r.get("endDate"), Some(&FieldValue::Timestamp(now)));
        assert_eq!(r.get("maxStudents"), Some(&FieldValue::Int(30)));
        assert_eq!(r.get("status"), Some(&FieldValue::Text("active".into())));
        assert_eq!(r.get("description"), Some(&FieldValue::Text("Batch".into())));
    }

    #[test]
    fn test_unparseable_date_fails_row() {
        let mut values = vec![ScalarValue::Null; 10];
        values[3] = text("Evening");
        values[8] = text("next tuesday");
        let err = normalize(schema_for(Collection::Batches), &values).unwrap_err();
        assert_eq!(
            err,
            NormalizeError::InvalidDate {
                field: "startDate",
                value: "next tuesday".into()
            }
        );
    }

    #[test]
    fn test_reference_left_pending() {
        let mut values = vec![ScalarValue::Null; 9];
        values[1] = ScalarValue::Number(2.0);
        values[2] = text("3");
        values[7] = text("dQw4w9WgXcQ");
        let r = record(normalize(schema_for(Collection::Videos), &values).unwrap());
        assert_eq!(
            r.get("batch"),
            Some(&FieldValue::PendingRef {
                parent: Collection::Batches,
                index: Some(2)
            })
        );
        assert_eq!(
            r.get("course"),
            Some(&FieldValue::PendingRef {
                parent: Collection::Courses,
                index: Some(3)
            })
        );
        assert_eq!(
            r.get("subject"),
            Some(&FieldValue::PendingRef {
                parent: Collection::Subjects,
                index: None
            })
        );
        assert_eq!(r.get("status"), Some(&FieldValue::Int(1)));
    }

    #[test]
    fn test_transaction_amount_and_key() {
        let values = vec![
            ScalarValue::Number(1.0),
            ScalarValue::Number(4.0),
            ScalarValue::Number(9.0),
            text("1499.50"),
            text("UPI"),
            ScalarValue::Number(88123.0),
        ];
        let r = record(normalize(schema_for(Collection::Transactions), &values).unwrap());
        assert_eq!(r.natural_key, "88123");
        assert_eq!(r.get("amount"), Some(&FieldValue::Float(1499.5)));
        assert_eq!(r.get("paymentMethod"), Some(&FieldValue::Text("upi".into())));
        assert_eq!(r.get("legacyUserId"), Some(&FieldValue::Int(4)));
    }

    #[test]
    fn test_leading_int() {
        assert_eq!(leading_int("  42abc"), Some(42));
        assert_eq!(leading_int("-7.9"), Some(-7));
        assert_eq!(leading_int("abc"), None);
        assert_eq!(leading_int("-"), None);
    }

    #[test]
    fn test_empty_text_takes_default() {
        let video = vec![
            ScalarValue::Number(1.0),
            ScalarValue::Number(1.0),
            ScalarValue::Number(1.0),
            ScalarValue::Null,
            ScalarValue::Number(1.0),
            ScalarValue::Null,
            text(""),
            text("dQw4w9WgXcQ"),
            ScalarValue::Number(0.0),
        ];
        let r = record(normalize(schema_for(Collection::Videos), &video).unwrap());
        assert_eq!(r.get("title"), Some(&FieldValue::Text("Video".into())));
        assert_eq!(r.get("status"), Some(&FieldValue::Int(1)));

        let enquiry = vec![
            ScalarValue::Number(1.0),
            text(""),
            text("a@b.io"),
            text(""),
            text(""),
            text(""),
            text(""),
        ];
        let r = record(normalize(schema_for(Collection::Enquiries), &enquiry).unwrap());
        assert_eq!(r.get("name"), Some(&FieldValue::Text("Unknown".into())));
        assert_eq!(r.get("course"), Some(&FieldValue::Text("General".into())));
        assert_eq!(r.get("status"), Some(&FieldValue::Text("pending".into())));
        assert_eq!(r.get("mobile"), Some(&FieldValue::Text(String::new())));
    }

    #[test]
    fn test_zero_takes_default() {
        let now = Utc::now();
        let mut batch = vec![ScalarValue::Null; 15];
        batch[1] = ScalarValue::Number(1.0);
        batch[3] = text("Zero Batch");
        batch[7] = ScalarValue::Number(0.0);
        batch[8] = ScalarValue::Number(0.0);
        batch[12] = text("");
        let r = record(normalize_at(schema_for(Collection::Batches), &batch, now).unwrap());
        assert_eq!(r.get("maxStudents"), Some(&FieldValue::Int(50)));
        assert_eq!(r.get("startDate"), Some(&FieldValue::Timestamp(now)));
        assert_eq!(r.get("description"), Some(&FieldValue::Text("Batch".into())));

        batch[7] = text("0 seats");
        let r = record(normalize_at(schema_for(Collection::Batches), &batch, now).unwrap());
        assert_eq!(r.get("maxStudents"), Some(&FieldValue::Int(50)));
    }

    #[test]
    fn test_blank_as_null_then_default() {
        let spec = FieldSpec::column(
            "x",
            0,
            &[
                Transform::Trim,
                Transform::BlankAsNull,
                Transform::Default(Literal::Text("fallback")),
            ],
        );
        let v = apply_chain(&spec, FieldValue::Text("   ".into()), Utc::now()).unwrap();
        assert_eq!(v, FieldValue::Text("fallback".into()));
    }
}
