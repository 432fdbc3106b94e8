//! Field typing and value representation for TSDB points.
//!
//! Per Design Notes §9 ("dynamic field typing → tagged enum"), the
//! source TSDB's polymorphic field values are represented as a sum
//! type rather than dispatched dynamically at every use site.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A field's declared type as reported by the TSDB's field-keys listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeclaredType {
    /// IEEE-754 floating point.
    Float,
    /// Signed integer.
    Integer,
    /// UTF-8 string.
    Str,
    /// Boolean.
    Bool,
}

/// The normalized type bucket used for include/exclude type filtering.
///
/// `float` and `integer` both normalize to `Numeric`, matching spec.md
/// §3's `FieldDescriptor` invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizedType {
    /// `float` or `integer`.
    Numeric,
    /// `string`.
    Str,
    /// `boolean`.
    Bool,
}

impl DeclaredType {
    /// Parse a declared type as reported by `SHOW FIELD KEYS`.
    ///
    /// Returns `None` for unrecognized type strings; the caller drops
    /// fields whose declared type is not recognized, per spec.md §4.4.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "float" => Some(Self::Float),
            "integer" => Some(Self::Integer),
            "string" => Some(Self::Str),
            "boolean" => Some(Self::Bool),
            _ => None,
        }
    }

    /// Normalize into the bucket used for type filtering.
    #[must_use]
    pub fn normalize(self) -> NormalizedType {
        match self {
            Self::Float | Self::Integer => NormalizedType::Numeric,
            Self::Str => NormalizedType::Str,
            Self::Bool => NormalizedType::Bool,
        }
    }
}

impl fmt::Display for DeclaredType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Float => "float",
            Self::Integer => "integer",
            Self::Str => "string",
            Self::Bool => "boolean",
        })
    }
}

/// A field's runtime value, carried through transformation and write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Floating point value.
    Float(f64),
    /// Integer value.
    Integer(i64),
    /// String value.
    Str(String),
    /// Boolean value.
    Bool(bool),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Float(value) => write!(f, "{value}"),
            Self::Integer(value) => write!(f, "{value}i"),
            Self::Str(value) => write!(f, "{value:?}"),
            Self::Bool(value) => write!(f, "{value}"),
        }
    }
}
