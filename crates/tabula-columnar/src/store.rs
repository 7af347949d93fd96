#![forbid(unsafe_code)]

use crate::bitmap::BitVec;
use crate::coerce::coerce_value;
use crate::column::Column;
use crate::error::{ColumnarError, ColumnarResult};
use crate::stats::ColumnStats;
use crate::types::{ColumnSchema, Field, Value};
use std::collections::HashMap;
use std::ops::Range;

/// Typed, growable columnar storage.
///
/// Every column always has the same physical length. Removal is logical: removed rows are
/// tombstoned and keep their physical index until [`ColumnStore::compact`] runs, which returns
/// the old-to-new index remap so dependents can re-resolve cached row indices.
#[derive(Clone, Debug, Default)]
pub struct ColumnStore {
    schema: Vec<ColumnSchema>,
    columns: Vec<Column>,
    column_index: HashMap<String, usize>,
    live: BitVec,
}

impl ColumnStore {
    pub fn new(schema: Vec<ColumnSchema>) -> ColumnarResult<Self> {
        let mut column_index = HashMap::with_capacity(schema.len());
        for (idx, col) in schema.iter().enumerate() {
            if column_index.insert(col.name.clone(), idx).is_some() {
                return Err(ColumnarError::DuplicateColumn(col.name.clone()));
            }
        }
        let columns = schema.iter().cloned().map(Column::new).collect();
        Ok(Self {
            schema,
            columns,
            column_index,
            live: BitVec::new(),
        })
    }

    pub fn schema(&self) -> &[ColumnSchema] {
        &self.schema
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.column_index.get(name).copied()
    }

    pub fn column(&self, idx: usize) -> Option<&Column> {
        self.columns.get(idx)
    }

    /// Physical row count, tombstoned rows included.
    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Number of rows that have not been removed.
    pub fn live_rows(&self) -> usize {
        self.live.count_ones()
    }

    pub fn dead_rows(&self) -> usize {
        self.live.count_zeros()
    }

    pub fn is_live(&self, row: usize) -> bool {
        self.live.get(row)
    }

    pub fn iter_live(&self) -> impl Iterator<Item = usize> + '_ {
        self.live.iter_ones()
    }

    pub fn get(&self, row: usize, col: usize) -> Value {
        match self.columns.get(col) {
            Some(column) if row < column.len() => column.get(row),
            _ => Value::Null,
        }
    }

    /// Append rows given in schema order. `Undefined` and missing trailing fields become null.
    ///
    /// The whole batch is coerced before anything is written, so a type mismatch leaves the
    /// store untouched.
    pub fn append(&mut self, rows: &[Vec<Field>]) -> ColumnarResult<Range<usize>> {
        let mut coerced: Vec<Vec<Value>> = Vec::with_capacity(rows.len());
        for row in rows {
            if row.len() > self.columns.len() {
                return Err(ColumnarError::RowLength {
                    expected: self.columns.len(),
                    actual: row.len(),
                });
            }
            let mut out = Vec::with_capacity(self.columns.len());
            for (idx, schema) in self.schema.iter().enumerate() {
                let value = match row.get(idx).and_then(Field::as_write) {
                    Some(v) => coerce_value(&schema.name, &v, schema.column_type)?,
                    None => Value::Null,
                };
                out.push(value);
            }
            coerced.push(out);
        }

        let start = self.len();
        for row in &coerced {
            for (column, value) in self.columns.iter_mut().zip(row) {
                column.push(value);
            }
            self.live.push(true);
        }
        Ok(start..self.len())
    }

    /// Append `count` rows of nulls.
    pub fn append_nulls(&mut self, count: usize) -> Range<usize> {
        let start = self.len();
        for column in &mut self.columns {
            column.push_nulls(count);
        }
        self.live.extend_constant(count, true);
        start..self.len()
    }

    /// A store with the same schema and no rows.
    pub fn cleared(&self) -> ColumnStore {
        ColumnStore {
            schema: self.schema.clone(),
            columns: self.schema.iter().cloned().map(Column::new).collect(),
            column_index: self.column_index.clone(),
            live: BitVec::new(),
        }
    }

    /// Add a column after construction; existing rows read as null.
    pub fn add_column(&mut self, schema: ColumnSchema) -> ColumnarResult<usize> {
        if self.column_index.contains_key(&schema.name) {
            return Err(ColumnarError::DuplicateColumn(schema.name));
        }
        let idx = self.columns.len();
        let mut column = Column::new(schema.clone());
        column.push_nulls(self.len());
        self.column_index.insert(schema.name.clone(), idx);
        self.schema.push(schema);
        self.columns.push(column);
        Ok(idx)
    }

    /// Coerce a value for column `col` without writing it.
    pub fn coerce(&self, col: usize, value: &Value) -> ColumnarResult<Value> {
        let schema = self
            .schema
            .get(col)
            .ok_or_else(|| ColumnarError::UnknownColumn(col.to_string()))?;
        coerce_value(&schema.name, value, schema.column_type)
    }

    /// Overwrite one cell. `Field::Undefined` is a no-op.
    ///
    /// Returns the previous value when the stored value actually changed.
    pub fn update_at(
        &mut self,
        row: usize,
        col: usize,
        field: &Field,
    ) -> ColumnarResult<Option<Value>> {
        let Some(value) = field.as_write() else {
            return Ok(None);
        };
        if row >= self.len() {
            return Err(ColumnarError::RowOutOfBounds {
                row,
                len: self.len(),
            });
        }
        let coerced = self.coerce(col, &value)?;
        Ok(self.write_coerced(row, col, coerced))
    }

    /// Overwrite one cell with a value already coerced to the column type.
    pub fn write_coerced(&mut self, row: usize, col: usize, value: Value) -> Option<Value> {
        let column = &mut self.columns[col];
        let previous = column.get(row);
        if previous == value {
            return None;
        }
        column.set(row, &value);
        Some(previous)
    }

    /// Tombstone rows. Already-removed or out-of-range rows are skipped.
    ///
    /// Returns the rows that were live before the call.
    pub fn remove(&mut self, rows: &[usize]) -> Vec<usize> {
        let mut removed = Vec::with_capacity(rows.len());
        for &row in rows {
            if self.live.get(row) {
                self.live.set(row, false);
                removed.push(row);
            }
        }
        removed
    }

    /// Physically drop tombstoned rows. `remap[old] = Some(new)` for surviving rows.
    pub fn compact(&mut self) -> Vec<Option<usize>> {
        let mut remap = Vec::with_capacity(self.len());
        let mut next = 0usize;
        for row in 0..self.len() {
            if self.live.get(row) {
                remap.push(Some(next));
                next += 1;
            } else {
                remap.push(None);
            }
        }
        self.columns = self.columns.iter().map(|c| c.compacted(&self.live)).collect();
        self.live = BitVec::filled(next, true);
        remap
    }

    /// Statistics over the live rows of column `col`.
    pub fn stats(&self, col: usize) -> Option<ColumnStats> {
        let column = self.columns.get(col)?;
        Some(ColumnStats::collect(
            column.column_type(),
            self.iter_live().map(|row| column.get(row)),
        ))
    }
}
