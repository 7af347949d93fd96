#![forbid(unsafe_code)]

//! Conversions at the write boundary of a column.
//!
//! Every value entering a column goes through [`coerce_value`]. Unparsable strings become null
//! instead of failing; only a value whose *kind* cannot live in the column (a boolean in a numeric
//! column, say) is rejected.

use crate::error::{ColumnarError, ColumnarResult};
use crate::types::{ColumnType, Value};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::sync::Arc;

pub const MS_PER_DAY: i64 = 86_400_000;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S%.f",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];

/// Floor an epoch-millisecond timestamp to UTC midnight.
pub fn floor_to_day(ms: i64) -> i64 {
    ms.div_euclid(MS_PER_DAY) * MS_PER_DAY
}

/// Parse a date-only string into epoch milliseconds at UTC midnight.
pub fn parse_date(s: &str) -> Option<i64> {
    let s = s.trim();
    DATE_FORMATS.iter().find_map(|fmt| {
        NaiveDate::parse_from_str(s, fmt)
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc().timestamp_millis())
    })
}

/// Parse a timestamp string (RFC 3339 or a handful of ISO-like layouts) into epoch milliseconds.
pub fn parse_datetime(s: &str) -> Option<i64> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    DATETIME_FORMATS.iter().find_map(|fmt| {
        NaiveDateTime::parse_from_str(s, fmt)
            .ok()
            .map(|dt| dt.and_utc().timestamp_millis())
    })
}

pub fn format_date(ms: i64) -> String {
    match DateTime::from_timestamp_millis(ms) {
        Some(dt) => dt.format("%Y-%m-%d").to_string(),
        None => ms.to_string(),
    }
}

pub fn format_datetime(ms: i64) -> String {
    match DateTime::from_timestamp_millis(ms) {
        Some(dt) => dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
        None => ms.to_string(),
    }
}

fn parse_number(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn parse_integer(s: &str) -> Option<i64> {
    let trimmed = s.trim();
    trimmed
        .parse::<i64>()
        .ok()
        .or_else(|| parse_number(trimmed).map(|v| v.trunc() as i64))
}

fn mismatch(column: &str, value: &Value, column_type: ColumnType) -> ColumnarError {
    ColumnarError::TypeMismatch {
        column: column.to_string(),
        value: value.to_string(),
        column_type,
    }
}

/// Convert `value` so it can be stored in a column of `column_type`.
pub fn coerce_value(column: &str, value: &Value, column_type: ColumnType) -> ColumnarResult<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }

    let out = match column_type {
        ColumnType::Integer => match value {
            Value::Integer(v) => Value::Integer(*v),
            Value::Float(v) if v.is_finite() => Value::Integer(v.trunc() as i64),
            Value::Float(_) => Value::Null,
            Value::String(s) => parse_integer(s).map(Value::Integer).unwrap_or(Value::Null),
            _ => return Err(mismatch(column, value, column_type)),
        },
        ColumnType::Float => match value {
            Value::Integer(v) => Value::Float(*v as f64),
            Value::Float(v) => Value::Float(*v),
            Value::String(s) => parse_number(s).map(Value::Float).unwrap_or(Value::Null),
            _ => return Err(mismatch(column, value, column_type)),
        },
        ColumnType::String => match value {
            Value::String(s) => Value::String(s.clone()),
            other => Value::String(Arc::from(other.to_string())),
        },
        ColumnType::Boolean => match value {
            Value::Boolean(b) => Value::Boolean(*b),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Value::Boolean(true),
                "false" => Value::Boolean(false),
                _ => Value::Null,
            },
            _ => return Err(mismatch(column, value, column_type)),
        },
        ColumnType::Date => match value {
            Value::Date(ms) | Value::DateTime(ms) | Value::Integer(ms) => {
                Value::Date(floor_to_day(*ms))
            }
            Value::Float(v) if v.is_finite() => Value::Date(floor_to_day(*v as i64)),
            Value::Float(_) => Value::Null,
            Value::String(s) => parse_date(s)
                .or_else(|| parse_datetime(s))
                .map(|ms| Value::Date(floor_to_day(ms)))
                .unwrap_or(Value::Null),
            Value::Boolean(_) | Value::Null => return Err(mismatch(column, value, column_type)),
        },
        ColumnType::DateTime => match value {
            Value::Date(ms) | Value::DateTime(ms) | Value::Integer(ms) => Value::DateTime(*ms),
            Value::Float(v) if v.is_finite() => Value::DateTime(*v as i64),
            Value::Float(_) => Value::Null,
            Value::String(s) => parse_datetime(s)
                .or_else(|| parse_date(s))
                .map(Value::DateTime)
                .unwrap_or(Value::Null),
            Value::Boolean(_) | Value::Null => return Err(mismatch(column, value, column_type)),
        },
    };
    Ok(out)
}

/// Incrementally infers a column type from sample values.
#[derive(Clone, Debug, Default)]
pub struct TypeInference {
    saw_integer: bool,
    saw_float: bool,
    saw_boolean: bool,
    saw_string: bool,
    saw_date: bool,
    saw_datetime: bool,
    strings_all_dates: bool,
    strings_all_datetimes: bool,
    strings_seen: usize,
}

impl TypeInference {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, value: &Value) {
        match value {
            Value::Null => {}
            Value::Integer(_) => self.saw_integer = true,
            Value::Float(_) => self.saw_float = true,
            Value::Boolean(_) => self.saw_boolean = true,
            Value::Date(_) => self.saw_date = true,
            Value::DateTime(_) => self.saw_datetime = true,
            Value::String(s) => {
                if self.strings_seen == 0 {
                    self.strings_all_dates = true;
                    self.strings_all_datetimes = true;
                }
                self.strings_seen += 1;
                self.saw_string = true;
                if self.strings_all_dates && parse_date(s).is_none() {
                    self.strings_all_dates = false;
                }
                if self.strings_all_datetimes && parse_datetime(s).is_none() {
                    self.strings_all_datetimes = false;
                }
            }
        }
    }

    pub fn finish(&self) -> ColumnType {
        let kinds = [
            self.saw_integer || self.saw_float,
            self.saw_boolean,
            self.saw_string,
            self.saw_date || self.saw_datetime,
        ]
        .iter()
        .filter(|k| **k)
        .count();

        if kinds > 1 {
            return ColumnType::String;
        }
        if self.saw_float {
            ColumnType::Float
        } else if self.saw_integer {
            ColumnType::Integer
        } else if self.saw_boolean {
            ColumnType::Boolean
        } else if self.saw_datetime {
            ColumnType::DateTime
        } else if self.saw_date {
            ColumnType::Date
        } else if self.saw_string && self.strings_all_dates {
            ColumnType::Date
        } else if self.saw_string && self.strings_all_datetimes {
            ColumnType::DateTime
        } else {
            ColumnType::String
        }
    }
}
