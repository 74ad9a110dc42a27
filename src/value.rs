//! Property values as seen by the index.
//!
//! Numbers form a single comparable class: an `Int` and a `Float` compare by
//! their mathematical value, never through a lossy `i64 -> f64` cast. The
//! coarse key (`coarse_cmp`, `coarse_hash`) *does* go through `f64`, which is
//! what backends use to bucket values. Two distinct integers above 2^53 can
//! therefore share a bucket, and readers re-validate candidates with the
//! exact comparison before returning them.

use crate::error::{IndexError, Result};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::fmt;

/// Ordered values of one index entry, one per property slot.
pub type ValueTuple = SmallVec<[Value; 2]>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

/// Comparison class. Values of different classes never compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ValueClass {
    Bool,
    Number,
    String,
}

impl Value {
    pub fn class(&self) -> ValueClass {
        match self {
            Value::Bool(_) => ValueClass::Bool,
            Value::Int(_) | Value::Float(_) => ValueClass::Number,
            Value::String(_) => ValueClass::String,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric value coerced to `f64`. Lossy for large integers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Exact comparison within a class. `None` across classes and for NaN.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Float(b)) => cmp_int_float(*a, *b),
            (Value::Float(a), Value::Int(b)) => cmp_int_float(*b, *a).map(Ordering::reverse),
            (Value::String(a), Value::String(b)) => Some(a.as_bytes().cmp(b.as_bytes())),
            _ => None,
        }
    }

    /// Exact equality: `Int(5)` equals `Float(5.0)`, but `Int(2^53 + 1)`
    /// does not equal `Float(2^53)`.
    pub fn same_value(&self, other: &Value) -> bool {
        self.compare(other) == Some(Ordering::Equal)
    }

    /// Total order over the coarse key: class first, then `f64` for numbers,
    /// bytes for strings.
    pub fn coarse_cmp(&self, other: &Value) -> Ordering {
        self.class().cmp(&other.class()).then_with(|| match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.as_bytes().cmp(b.as_bytes()),
            _ => coarse_number(self).total_cmp(&coarse_number(other)),
        })
    }

    /// Total order used to keep postings sorted: the coarse key, then the
    /// representation (`Int` before `Float`), then the exact value.
    pub fn index_cmp(&self, other: &Value) -> Ordering {
        self.coarse_cmp(other).then_with(|| match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Int(_), Value::Float(_)) => Ordering::Less,
            (Value::Float(_), Value::Int(_)) => Ordering::Greater,
            _ => Ordering::Equal,
        })
    }

    /// Hash of the coarse key. Equal values always share a hash.
    pub fn coarse_hash(&self) -> u64 {
        let mut buf = Vec::with_capacity(16);
        self.write_coarse(&mut buf);
        seahash::hash(&buf)
    }

    fn write_coarse(&self, buf: &mut Vec<u8>) {
        match self {
            Value::Bool(b) => {
                buf.push(0);
                buf.push(*b as u8);
            }
            Value::Int(_) | Value::Float(_) => {
                buf.push(1);
                buf.extend_from_slice(&coarse_number(self).to_bits().to_le_bytes());
            }
            Value::String(s) => {
                buf.push(2);
                buf.extend_from_slice(s.as_bytes());
            }
        }
    }

    /// Convert a JSON property value. Null, arrays and objects are not
    /// indexable.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(Value::Float(f))
                } else {
                    Err(IndexError::UnsupportedValue(n.to_string()))
                }
            }
            serde_json::Value::String(s) => Ok(Value::String(s.clone())),
            other => Err(IndexError::UnsupportedValue(other.to_string())),
        }
    }
}

/// `-0.0` and `0.0` share a coarse key; so do `Int(0)` and `Float(-0.0)`.
fn coarse_number(value: &Value) -> f64 {
    match value.as_f64() {
        Some(f) if f == 0.0 => 0.0,
        Some(f) => f,
        None => f64::NAN,
    }
}

fn cmp_int_float(i: i64, f: f64) -> Option<Ordering> {
    if f.is_nan() {
        return None;
    }
    // i64 spans [-2^63, 2^63); anything outside is decided by sign alone.
    if f >= 9_223_372_036_854_775_808.0 {
        return Some(Ordering::Less);
    }
    if f < -9_223_372_036_854_775_808.0 {
        return Some(Ordering::Greater);
    }
    let whole = f.trunc();
    match (i as i128).cmp(&(whole as i128)) {
        Ordering::Equal => {
            let frac = f - whole;
            Some(if frac > 0.0 {
                Ordering::Less
            } else if frac < 0.0 {
                Ordering::Greater
            } else {
                Ordering::Equal
            })
        }
        ord => Some(ord),
    }
}

/// Exact equality of two tuples, slot by slot.
pub fn same_tuple(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_value(y))
}

/// Coarse hash of a whole tuple, used by samplers.
pub fn tuple_hash(values: &[Value]) -> u64 {
    let mut buf = Vec::with_capacity(16 * values.len());
    for value in values {
        value.write_coarse(&mut buf);
        buf.push(0xff);
    }
    seahash::hash(&buf)
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.same_value(other)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::String(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v as f64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}
