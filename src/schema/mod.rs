//! Positional schema maps.
//!
//! The dump carries no column names, so every source table is described by a
//! fixed list of [`FieldSpec`]s: which tuple position feeds which document
//! field, and the transforms applied on the way.

mod builtin;

pub use builtin::{schema_for, BUILTIN_SCHEMAS};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Target document collections, in topological import order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Users,
    Courses,
    Batches,
    Subjects,
    Videos,
    Enquiries,
    Transactions,
}

impl Collection {
    /// Parents before children. Enquiries and transactions depend on nothing.
    pub const IMPORT_ORDER: [Collection; 7] = [
        Collection::Users,
        Collection::Courses,
        Collection::Batches,
        Collection::Subjects,
        Collection::Videos,
        Collection::Enquiries,
        Collection::Transactions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Users => "users",
            Collection::Courses => "courses",
            Collection::Batches => "batches",
            Collection::Subjects => "subjects",
            Collection::Videos => "videos",
            Collection::Enquiries => "enquiries",
            Collection::Transactions => "transactions",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Collection::IMPORT_ORDER
            .iter()
            .copied()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                format!(
                    "Unknown collection: {}. Valid options: users, courses, batches, subjects, videos, enquiries, transactions",
                    s
                )
            })
    }
}

/// A constant value used for fixed fields and defaults
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(&'static str),
    /// Wall-clock time when the row is normalized
    Now,
}

/// Where a field's raw value comes from
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Source {
    /// 0-based position in the tuple; out of range reads as NULL
    Column(usize),
    Fixed(Literal),
}

/// One step of a field's transform chain
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transform {
    /// Truncate to at most n characters. Always runs before other transforms.
    Cap(usize),
    /// Remove `<...>` markup
    StripTags,
    Trim,
    Lowercase,
    /// Empty or whitespace-only text becomes NULL
    BlankAsNull,
    /// A numeric zero becomes NULL
    ZeroAsNull,
    /// Replace NULL with a literal
    Default(Literal),
    /// Integer part of a number, or the leading integer of a text value
    IntFloor,
    Float,
    /// Parse text as a date/time; unparseable text fails the row
    Date,
    /// Numeric equality test choosing between two literals
    Flag {
        equals: f64,
        then: Literal,
        otherwise: Literal,
    },
    /// 1-based index into the parent collection, resolved after normalization
    Reference(Collection),
}

/// Mapping of one tuple position (or constant) onto one document field
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub source: Source,
    /// A NULL here without a declared default skips the row
    pub required: bool,
    pub transforms: &'static [Transform],
}

impl FieldSpec {
    pub const fn column(name: &'static str, position: usize, transforms: &'static [Transform]) -> Self {
        Self {
            name,
            source: Source::Column(position),
            required: false,
            transforms,
        }
    }

    pub const fn required(name: &'static str, position: usize, transforms: &'static [Transform]) -> Self {
        Self {
            name,
            source: Source::Column(position),
            required: true,
            transforms,
        }
    }

    pub const fn fixed(name: &'static str, value: Literal) -> Self {
        Self {
            name,
            source: Source::Fixed(value),
            required: false,
            transforms: &[],
        }
    }

    pub const fn fixed_with(name: &'static str, value: Literal, transforms: &'static [Transform]) -> Self {
        Self {
            name,
            source: Source::Fixed(value),
            required: false,
            transforms,
        }
    }

    pub fn has_default(&self) -> bool {
        self.transforms
            .iter()
            .any(|t| matches!(t, Transform::Default(_)))
    }

    /// Parent collection referenced by this field, if any
    pub fn reference(&self) -> Option<Collection> {
        self.transforms.iter().find_map(|t| match t {
            Transform::Reference(parent) => Some(*parent),
            _ => None,
        })
    }
}

/// Static description of one source table
#[derive(Debug, Clone, Copy)]
pub struct TableSchema {
    pub collection: Collection,
    /// Table name in the legacy dump (overridable in config)
    pub source_table: &'static str,
    /// Field holding the natural key used for idempotent upserts
    pub natural_key: &'static str,
    pub fields: &'static [FieldSpec],
}

impl TableSchema {
    /// Parent collections this table references, without duplicates
    pub fn parents(&self) -> Vec<Collection> {
        let mut parents: Vec<Collection> = Vec::new();
        for parent in self.fields.iter().filter_map(FieldSpec::reference) {
            if !parents.contains(&parent) {
                parents.push(parent);
            }
        }
        parents
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }
}
