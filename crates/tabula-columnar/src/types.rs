#![forbid(unsafe_code)]

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Logical type of a column.
///
/// `Date` and `DateTime` are both stored as epoch milliseconds; `Date` values are always
/// aligned to UTC midnight.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Float,
    #[default]
    String,
    Boolean,
    Date,
    DateTime,
}

impl ColumnType {
    pub fn as_str(self) -> &'static str {
        match self {
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::String => "string",
            ColumnType::Boolean => "boolean",
            ColumnType::Date => "date",
            ColumnType::DateTime => "datetime",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "integer" | "int" => Some(ColumnType::Integer),
            "float" | "number" => Some(ColumnType::Float),
            "string" | "str" => Some(ColumnType::String),
            "boolean" | "bool" => Some(ColumnType::Boolean),
            "date" => Some(ColumnType::Date),
            "datetime" => Some(ColumnType::DateTime),
            _ => None,
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, ColumnType::Integer | ColumnType::Float)
    }

    pub fn is_temporal(self) -> bool {
        matches!(self, ColumnType::Date | ColumnType::DateTime)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub column_type: ColumnType,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// A single scalar cell value.
///
/// `Value` has a total order (used for sorting, min/max and pivot keys):
/// `Null < Boolean < Integer/Float < Date < DateTime < String`. Integers and floats compare
/// numerically; when numerically equal the integer sorts first so `Ord` stays consistent with
/// `Eq` (an `Integer(1)` is not equal to a `Float(1.0)`).
#[derive(Clone, Debug, Default)]
pub enum Value {
    #[default]
    Null,
    Integer(i64),
    Float(f64),
    String(Arc<str>),
    Boolean(bool),
    /// Epoch milliseconds at UTC midnight.
    Date(i64),
    /// Epoch milliseconds.
    DateTime(i64),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The natural column type of this value, `None` for null.
    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            Value::Null => None,
            Value::Integer(_) => Some(ColumnType::Integer),
            Value::Float(_) => Some(ColumnType::Float),
            Value::String(_) => Some(ColumnType::String),
            Value::Boolean(_) => Some(ColumnType::Boolean),
            Value::Date(_) => Some(ColumnType::Date),
            Value::DateTime(_) => Some(ColumnType::DateTime),
        }
    }

    /// Numeric view of the value. Booleans and temporal values count as numbers so they can
    /// participate in sums and comparisons.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(v) | Value::Date(v) | Value::DateTime(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Null | Value::String(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Boolean(_) => 1,
            Value::Integer(_) | Value::Float(_) => 2,
            Value::Date(_) => 3,
            Value::DateTime(_) => 4,
            Value::String(_) => 5,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => OrderedFloat(*a) == OrderedFloat(*b),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Integer(v) | Value::Date(v) | Value::DateTime(v) => v.hash(state),
            Value::Float(v) => OrderedFloat(*v).hash(state),
            Value::String(s) => s.hash(state),
            Value::Boolean(b) => b.hash(state),
        }
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => OrderedFloat(*a).cmp(&OrderedFloat(*b)),
            (Value::Integer(a), Value::Float(b)) => OrderedFloat(*a as f64)
                .cmp(&OrderedFloat(*b))
                .then(Ordering::Less),
            (Value::Float(a), Value::Integer(b)) => OrderedFloat(*a)
                .cmp(&OrderedFloat(*b as f64))
                .then(Ordering::Greater),
            (Value::String(a), Value::String(b)) => a.as_ref().cmp(b.as_ref()),
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Date(a), Value::Date(b)) | (Value::DateTime(a), Value::DateTime(b)) => {
                a.cmp(b)
            }
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Integer(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::String(s) => f.write_str(s),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Date(ms) => f.write_str(&crate::coerce::format_date(*ms)),
            Value::DateTime(ms) => f.write_str(&crate::coerce::format_datetime(*ms)),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(Arc::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(Arc::from(v))
    }
}

impl From<Arc<str>> for Value {
    fn from(v: Arc<str>) -> Self {
        Value::String(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// One cell of an update.
///
/// `Undefined` leaves an existing cell untouched (or null for a freshly appended row) while
/// `Null` clears it. The distinction drives computed-column recomputation downstream.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Field {
    #[default]
    Undefined,
    Null,
    Value(Value),
}

impl Field {
    pub fn is_undefined(&self) -> bool {
        matches!(self, Field::Undefined)
    }

    /// The value this field writes, `None` when it writes nothing.
    pub fn as_write(&self) -> Option<Value> {
        match self {
            Field::Undefined => None,
            Field::Null => Some(Value::Null),
            Field::Value(v) => Some(v.clone()),
        }
    }
}

impl<T: Into<Value>> From<T> for Field {
    fn from(v: T) -> Self {
        match v.into() {
            Value::Null => Field::Null,
            other => Field::Value(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn ordering_is_total_across_variants() {
        let mut values = vec![
            Value::from("b"),
            Value::Float(2.5),
            Value::Null,
            Value::Integer(2),
            Value::Boolean(true),
            Value::Float(2.0),
            Value::Date(0),
        ];
        values.sort();
        assert_eq!(
            values,
            vec![
                Value::Null,
                Value::Boolean(true),
                Value::Integer(2),
                Value::Float(2.0),
                Value::Float(2.5),
                Value::Date(0),
                Value::from("b"),
            ]
        );
    }

    #[test]
    fn integer_and_float_are_distinct_keys() {
        let set: BTreeSet<Value> = [Value::Integer(1), Value::Float(1.0)].into_iter().collect();
        assert_eq!(set.len(), 2);
        assert_ne!(Value::Integer(1), Value::Float(1.0));
    }

    #[test]
    fn field_from_null_option_is_explicit_null() {
        assert_eq!(Field::from(None::<i64>), Field::Null);
        assert_eq!(Field::from(3), Field::Value(Value::Integer(3)));
        assert!(Field::default().is_undefined());
    }
}
