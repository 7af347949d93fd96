#![forbid(unsafe_code)]

use crate::types::{ColumnType, Value};
use std::collections::HashSet;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ColumnStats {
    pub column_type: ColumnType,
    pub row_count: u64,
    pub null_count: u64,
    pub distinct_count: u64,
    pub min: Option<Value>,
    pub max: Option<Value>,
}

impl ColumnStats {
    /// Exact statistics over an iterator of cell values. Nulls are counted but excluded from
    /// `distinct_count`, `min` and `max`.
    pub fn collect(column_type: ColumnType, values: impl Iterator<Item = Value>) -> Self {
        let mut stats = ColumnStats {
            column_type,
            ..ColumnStats::default()
        };
        let mut distinct: HashSet<Value> = HashSet::new();
        for value in values {
            stats.row_count += 1;
            if value.is_null() {
                stats.null_count += 1;
                continue;
            }
            if stats.min.as_ref().map_or(true, |m| value < *m) {
                stats.min = Some(value.clone());
            }
            if stats.max.as_ref().map_or(true, |m| value > *m) {
                stats.max = Some(value.clone());
            }
            distinct.insert(value);
        }
        stats.distinct_count = distinct.len() as u64;
        stats
    }
}
