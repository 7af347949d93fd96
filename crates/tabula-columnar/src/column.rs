#![forbid(unsafe_code)]

use crate::bitmap::BitVec;
use crate::types::{ColumnSchema, ColumnType, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Grow-only string dictionary. Codes are dense and never reused, so a code obtained once stays
/// valid for the lifetime of the column.
#[derive(Clone, Debug, Default)]
pub struct Dictionary {
    values: Vec<Arc<str>>,
    lookup: HashMap<Arc<str>, u32>,
}

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn intern(&mut self, s: &Arc<str>) -> u32 {
        if let Some(code) = self.lookup.get(s.as_ref()) {
            return *code;
        }
        let code = self.values.len() as u32;
        self.values.push(s.clone());
        self.lookup.insert(s.clone(), code);
        code
    }

    pub fn get(&self, code: u32) -> Option<&Arc<str>> {
        self.values.get(code as usize)
    }

    pub fn values(&self) -> &[Arc<str>] {
        &self.values
    }
}

#[derive(Clone, Debug)]
enum ColumnData {
    /// Integers, dates and datetimes.
    Int(Vec<i64>),
    Float(Vec<f64>),
    Bool(BitVec),
    Dict { codes: Vec<u32>, dictionary: Dictionary },
}

/// A single typed column with a parallel validity mask.
///
/// Values written here must already be coerced to the column type (see
/// [`crate::coerce::coerce_value`]); a mismatched variant is stored as null.
#[derive(Clone, Debug)]
pub struct Column {
    schema: ColumnSchema,
    data: ColumnData,
    validity: BitVec,
}

impl Column {
    pub fn new(schema: ColumnSchema) -> Self {
        let data = match schema.column_type {
            ColumnType::Integer | ColumnType::Date | ColumnType::DateTime => {
                ColumnData::Int(Vec::new())
            }
            ColumnType::Float => ColumnData::Float(Vec::new()),
            ColumnType::Boolean => ColumnData::Bool(BitVec::new()),
            ColumnType::String => ColumnData::Dict {
                codes: Vec::new(),
                dictionary: Dictionary::new(),
            },
        };
        Self {
            schema,
            data,
            validity: BitVec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.schema.name
    }

    pub fn column_type(&self) -> ColumnType {
        self.schema.column_type
    }

    pub fn schema(&self) -> &ColumnSchema {
        &self.schema
    }

    pub fn len(&self) -> usize {
        self.validity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validity.is_empty()
    }

    pub fn null_count(&self) -> usize {
        self.validity.count_zeros()
    }

    /// The dictionary backing a string column.
    pub fn dictionary(&self) -> Option<&Dictionary> {
        match &self.data {
            ColumnData::Dict { dictionary, .. } => Some(dictionary),
            _ => None,
        }
    }

    /// Dictionary code at `row` for a string column; `None` for nulls and other types.
    pub fn code(&self, row: usize) -> Option<u32> {
        if !self.validity.get(row) {
            return None;
        }
        match &self.data {
            ColumnData::Dict { codes, .. } => codes.get(row).copied(),
            _ => None,
        }
    }

    pub fn is_valid(&self, row: usize) -> bool {
        self.validity.get(row)
    }

    pub fn get(&self, row: usize) -> Value {
        if !self.validity.get(row) {
            return Value::Null;
        }
        match &self.data {
            ColumnData::Int(values) => {
                let v = values[row];
                match self.schema.column_type {
                    ColumnType::Date => Value::Date(v),
                    ColumnType::DateTime => Value::DateTime(v),
                    _ => Value::Integer(v),
                }
            }
            ColumnData::Float(values) => Value::Float(values[row]),
            ColumnData::Bool(bits) => Value::Boolean(bits.get(row)),
            ColumnData::Dict { codes, dictionary } => dictionary
                .get(codes[row])
                .cloned()
                .map(Value::String)
                .unwrap_or(Value::Null),
        }
    }

    pub fn push(&mut self, value: &Value) {
        match &mut self.data {
            ColumnData::Int(values) => values.push(0),
            ColumnData::Float(values) => values.push(0.0),
            ColumnData::Bool(bits) => bits.push(false),
            ColumnData::Dict { codes, .. } => codes.push(0),
        }
        self.validity.push(false);
        let row = self.len() - 1;
        self.set(row, value);
    }

    /// Append `count` nulls.
    pub fn push_nulls(&mut self, count: usize) {
        match &mut self.data {
            ColumnData::Int(values) => values.resize(values.len() + count, 0),
            ColumnData::Float(values) => values.resize(values.len() + count, 0.0),
            ColumnData::Bool(bits) => bits.extend_constant(count, false),
            ColumnData::Dict { codes, .. } => codes.resize(codes.len() + count, 0),
        }
        self.validity.extend_constant(count, false);
    }

    /// Overwrite `row` in place.
    pub fn set(&mut self, row: usize, value: &Value) {
        let valid = match (&mut self.data, value) {
            (_, Value::Null) => false,
            (ColumnData::Int(values), Value::Integer(v) | Value::Date(v) | Value::DateTime(v)) => {
                values[row] = *v;
                true
            }
            (ColumnData::Float(values), Value::Float(v)) => {
                values[row] = *v;
                true
            }
            (ColumnData::Bool(bits), Value::Boolean(b)) => {
                bits.set(row, *b);
                true
            }
            (ColumnData::Dict { codes, dictionary }, Value::String(s)) => {
                codes[row] = dictionary.intern(s);
                true
            }
            _ => {
                debug_assert!(false, "uncoerced value {value:?} written to {}", self.schema.name);
                false
            }
        };
        self.validity.set(row, valid);
    }

    /// Build a new column containing only the rows set in `keep`.
    pub(crate) fn compacted(&self, keep: &BitVec) -> Column {
        let data = match &self.data {
            ColumnData::Int(values) => {
                ColumnData::Int(keep.iter_ones().map(|i| values[i]).collect())
            }
            ColumnData::Float(values) => {
                ColumnData::Float(keep.iter_ones().map(|i| values[i]).collect())
            }
            ColumnData::Bool(bits) => ColumnData::Bool(bits.retain_by(keep)),
            ColumnData::Dict { codes, dictionary } => ColumnData::Dict {
                codes: keep.iter_ones().map(|i| codes[i]).collect(),
                // The dictionary only grows; compaction never drops entries.
                dictionary: dictionary.clone(),
            },
        };
        Column {
            schema: self.schema.clone(),
            data,
            validity: self.validity.retain_by(keep),
        }
    }
}
