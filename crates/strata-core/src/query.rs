//! Structured query filters.
//!
//! Queries against a partition carry a [`Filter`]: a small structured
//! predicate language that each backend translates to its native query
//! syntax. The language covers exactly what the layer needs:
//!
//! - field equality and inequality over dotted paths
//! - set membership (`In`)
//! - integer range bounds (`Gte`/`Lt`) for time-window matching
//! - array containment (`Contains`)
//! - existential sub-queries over embedded collections (`Exists`)
//! - conjunction and disjunction
//!
//! [`Filter::matches`] evaluates a filter directly against a JSON body; it is
//! the reference semantics that backend translations must agree with, and the
//! implementation used by the in-memory backend.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A dotted path into a JSON document (e.g. `"spec.enabled"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldPath(String);

impl FieldPath {
    /// Creates a field path from a dotted string.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// Returns the path as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Resolves the path against a JSON value, one object key per segment.
    ///
    /// Returns `None` if any segment is missing or traverses a non-object.
    #[must_use]
    pub fn resolve<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        let mut current = value;
        for segment in self.0.split('.') {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }
}

impl From<&str> for FieldPath {
    fn from(path: &str) -> Self {
        Self(path.to_string())
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A structured predicate over document bodies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Filter {
    /// Matches every document.
    True,
    /// Field equals the given value.
    Eq(FieldPath, Value),
    /// Field differs from the given value (missing fields match).
    Ne(FieldPath, Value),
    /// Field equals one of the given values.
    In(FieldPath, Vec<Value>),
    /// Integer field is greater than or equal to the bound.
    Gte(FieldPath, i64),
    /// Integer field is strictly less than the bound.
    Lt(FieldPath, i64),
    /// Array field contains the given element.
    Contains(FieldPath, Value),
    /// Some element of an embedded collection matches the sub-predicate.
    ///
    /// The path must resolve to an array or an object; for objects the
    /// predicate is evaluated against each value (map semantics).
    Exists {
        /// Path to the embedded collection.
        path: FieldPath,
        /// Predicate evaluated against each element.
        predicate: Box<Filter>,
    },
    /// All sub-filters match.
    And(Vec<Filter>),
    /// At least one sub-filter matches.
    Or(Vec<Filter>),
}

impl Filter {
    /// Equality shorthand.
    #[must_use]
    pub fn eq(path: impl Into<FieldPath>, value: impl Into<Value>) -> Self {
        Self::Eq(path.into(), value.into())
    }

    /// Array-containment shorthand.
    #[must_use]
    pub fn contains(path: impl Into<FieldPath>, value: impl Into<Value>) -> Self {
        Self::Contains(path.into(), value.into())
    }

    /// Conjunction shorthand.
    #[must_use]
    pub fn and(filters: impl IntoIterator<Item = Self>) -> Self {
        Self::And(filters.into_iter().collect())
    }

    /// Disjunction shorthand.
    #[must_use]
    pub fn or(filters: impl IntoIterator<Item = Self>) -> Self {
        Self::Or(filters.into_iter().collect())
    }

    /// Evaluates the filter against a JSON document body.
    ///
    /// These are the reference semantics for backend translations: a backend
    /// that compiles filters to a native query language must return exactly
    /// the documents this function accepts.
    #[must_use]
    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Self::True => true,
            Self::Eq(path, value) => path.resolve(doc) == Some(value),
            Self::Ne(path, value) => path.resolve(doc) != Some(value),
            Self::In(path, values) => path
                .resolve(doc)
                .is_some_and(|v| values.iter().any(|candidate| candidate == v)),
            Self::Gte(path, bound) => path
                .resolve(doc)
                .and_then(Value::as_i64)
                .is_some_and(|v| v >= *bound),
            Self::Lt(path, bound) => path
                .resolve(doc)
                .and_then(Value::as_i64)
                .is_some_and(|v| v < *bound),
            Self::Contains(path, element) => path
                .resolve(doc)
                .and_then(Value::as_array)
                .is_some_and(|items| items.contains(element)),
            Self::Exists { path, predicate } => {
                path.resolve(doc).is_some_and(|collection| match collection {
                    Value::Array(items) => items.iter().any(|item| predicate.matches(item)),
                    Value::Object(map) => map.values().any(|item| predicate.matches(item)),
                    _ => false,
                })
            }
            Self::And(filters) => filters.iter().all(|f| f.matches(doc)),
            Self::Or(filters) => filters.iter().any(|f| f.matches(doc)),
        }
    }
}
