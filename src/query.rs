//! Index query taxonomy.
//!
//! Every query targets one property key of the index schema. Backends may
//! answer with a superset of candidates; `IndexQuery::accepts` is the exact
//! value-level predicate that decides the final result.

use crate::error::{IndexError, Result};
use crate::types::{PropertyKeyId, SchemaDescriptor};
use crate::value::{Value, ValueClass};
use std::cmp::Ordering;
use std::ops::Bound;

#[derive(Debug, Clone, PartialEq)]
pub enum IndexQuery {
    /// Any entity with a value in the slot.
    Exists { key: PropertyKeyId },
    /// Equality on a fully-coerced value.
    Exact { key: PropertyKeyId, value: Value },
    /// Ordered comparison over numbers or strings.
    Range {
        key: PropertyKeyId,
        lower: Bound<Value>,
        upper: Bound<Value>,
    },
    /// Case-sensitive "starts with".
    StringPrefix { key: PropertyKeyId, prefix: String },
    /// Case-sensitive "ends with". An empty suffix matches every string.
    StringSuffix { key: PropertyKeyId, suffix: String },
    /// Literal substring; no wildcard characters.
    StringContains { key: PropertyKeyId, needle: String },
}

/// Discriminant of an `IndexQuery`, handy for logging and dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    Exists,
    Exact,
    Range,
    StringPrefix,
    StringSuffix,
    StringContains,
}

impl IndexQuery {
    pub fn exists(key: PropertyKeyId) -> Self {
        IndexQuery::Exists { key }
    }

    pub fn exact(key: PropertyKeyId, value: impl Into<Value>) -> Self {
        IndexQuery::Exact { key, value: value.into() }
    }

    /// Closed or half-open range with both ends bounded.
    pub fn range(
        key: PropertyKeyId,
        lower: impl Into<Value>,
        lower_inclusive: bool,
        upper: impl Into<Value>,
        upper_inclusive: bool,
    ) -> Self {
        let bound = |v: Value, inclusive: bool| {
            if inclusive {
                Bound::Included(v)
            } else {
                Bound::Excluded(v)
            }
        };
        IndexQuery::Range {
            key,
            lower: bound(lower.into(), lower_inclusive),
            upper: bound(upper.into(), upper_inclusive),
        }
    }

    /// Range with arbitrary (possibly open) bounds.
    pub fn range_bounds(key: PropertyKeyId, lower: Bound<Value>, upper: Bound<Value>) -> Self {
        IndexQuery::Range { key, lower, upper }
    }

    pub fn string_prefix(key: PropertyKeyId, prefix: impl Into<String>) -> Self {
        IndexQuery::StringPrefix { key, prefix: prefix.into() }
    }

    pub fn string_suffix(key: PropertyKeyId, suffix: impl Into<String>) -> Self {
        IndexQuery::StringSuffix { key, suffix: suffix.into() }
    }

    pub fn string_contains(key: PropertyKeyId, needle: impl Into<String>) -> Self {
        IndexQuery::StringContains { key, needle: needle.into() }
    }

    pub fn key(&self) -> PropertyKeyId {
        match self {
            IndexQuery::Exists { key }
            | IndexQuery::Exact { key, .. }
            | IndexQuery::Range { key, .. }
            | IndexQuery::StringPrefix { key, .. }
            | IndexQuery::StringSuffix { key, .. }
            | IndexQuery::StringContains { key, .. } => *key,
        }
    }

    pub fn kind(&self) -> QueryKind {
        match self {
            IndexQuery::Exists { .. } => QueryKind::Exists,
            IndexQuery::Exact { .. } => QueryKind::Exact,
            IndexQuery::Range { .. } => QueryKind::Range,
            IndexQuery::StringPrefix { .. } => QueryKind::StringPrefix,
            IndexQuery::StringSuffix { .. } => QueryKind::StringSuffix,
            IndexQuery::StringContains { .. } => QueryKind::StringContains,
        }
    }

    /// Resolve the targeted key to its slot in `schema`.
    pub fn slot_in(&self, schema: &SchemaDescriptor) -> Result<usize> {
        schema
            .slot_of(self.key())
            .ok_or(IndexError::UnknownPropertyKey(self.key()))
    }

    /// Class of values a range can match. `None` when the bounds disagree;
    /// both ends open matches every number and string.
    pub fn range_class(lower: &Bound<Value>, upper: &Bound<Value>) -> Option<Option<ValueClass>> {
        let class_of = |b: &Bound<Value>| match b {
            Bound::Included(v) | Bound::Excluded(v) => Some(v.class()),
            Bound::Unbounded => None,
        };
        match (class_of(lower), class_of(upper)) {
            (Some(a), Some(b)) if a != b => None,
            (Some(a), _) | (_, Some(a)) => Some(Some(a)),
            (None, None) => Some(None),
        }
    }

    /// Exact value-level predicate.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            IndexQuery::Exists { .. } => true,
            IndexQuery::Exact { value: wanted, .. } => value.same_value(wanted),
            IndexQuery::Range { lower, upper, .. } => {
                let class_ok = match Self::range_class(lower, upper) {
                    None => false,
                    Some(Some(class)) => value.class() == class,
                    Some(None) => matches!(value.class(), ValueClass::Number | ValueClass::String),
                };
                class_ok && above(value, lower) && below(value, upper)
            }
            IndexQuery::StringPrefix { prefix, .. } => {
                value.as_str().is_some_and(|s| s.starts_with(prefix.as_str()))
            }
            IndexQuery::StringSuffix { suffix, .. } => {
                value.as_str().is_some_and(|s| s.ends_with(suffix.as_str()))
            }
            IndexQuery::StringContains { needle, .. } => {
                value.as_str().is_some_and(|s| s.contains(needle.as_str()))
            }
        }
    }
}

fn above(value: &Value, lower: &Bound<Value>) -> bool {
    match lower {
        Bound::Unbounded => true,
        Bound::Included(lo) => matches!(value.compare(lo), Some(Ordering::Greater | Ordering::Equal)),
        Bound::Excluded(lo) => matches!(value.compare(lo), Some(Ordering::Greater)),
    }
}

fn below(value: &Value, upper: &Bound<Value>) -> bool {
    match upper {
        Bound::Unbounded => true,
        Bound::Included(hi) => matches!(value.compare(hi), Some(Ordering::Less | Ordering::Equal)),
        Bound::Excluded(hi) => matches!(value.compare(hi), Some(Ordering::Less)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_inclusivity() {
        let q = IndexQuery::range(1, "Anna", true, "William", false);
        assert!(q.accepts(&Value::from("Anna")));
        assert!(q.accepts(&Value::from("Bob")));
        assert!(!q.accepts(&Value::from("William")));

        let q = IndexQuery::range(1, -5, false, 5, true);
        assert!(!q.accepts(&Value::Int(-5)));
        assert!(q.accepts(&Value::Float(-4.5)));
        assert!(q.accepts(&Value::Int(5)));
    }

    #[test]
    fn test_empty_and_mixed_ranges_match_nothing() {
        let q = IndexQuery::range(1, 5, true, 1, true);
        assert!(!q.accepts(&Value::Int(3)));

        let q = IndexQuery::range(1, 0, true, "z", true);
        assert!(!q.accepts(&Value::Int(3)));
        assert!(!q.accepts(&Value::from("a")));
    }

    #[test]
    fn test_range_matches_only_its_class() {
        let q = IndexQuery::range_bounds(1, Bound::Included(Value::Int(0)), Bound::Unbounded);
        assert!(q.accepts(&Value::Int(10)));
        assert!(!q.accepts(&Value::from("10")));

        let open = IndexQuery::range_bounds(1, Bound::Unbounded, Bound::Unbounded);
        assert!(open.accepts(&Value::Int(1)));
        assert!(open.accepts(&Value::from("x")));
        assert!(!open.accepts(&Value::Bool(true)));
    }

    #[test]
    fn test_contains_is_literal() {
        let q = IndexQuery::string_contains(1, "apa*");
        assert!(!q.accepts(&Value::from("apa")));
        assert!(!q.accepts(&Value::from("apalong")));
        assert!(q.accepts(&Value::from("xapa*y")));
    }

    #[test]
    fn test_string_predicates_are_case_sensitive() {
        let q = IndexQuery::string_prefix(1, "a");
        assert!(q.accepts(&Value::from("apa")));
        assert!(!q.accepts(&Value::from("A")));
        assert!(!q.accepts(&Value::Int(1)));

        let q = IndexQuery::string_suffix(1, "");
        assert!(q.accepts(&Value::from("")));
        assert!(q.accepts(&Value::from("anything")));
        assert!(!q.accepts(&Value::Int(1)));
    }

    #[test]
    fn test_slot_resolution() {
        let schema = SchemaDescriptor::for_label(1, &[7, 8]);
        assert_eq!(IndexQuery::exists(8).slot_in(&schema).unwrap(), 1);
        assert!(matches!(
            IndexQuery::exists(9).slot_in(&schema),
            Err(IndexError::UnknownPropertyKey(9))
        ));
    }
}
