//! What one committed mutation changed.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;
use std::sync::Arc;
use tabula_columnar::Value;

/// Opaque tag identifying the writer of an update. Port 0 is the default port.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortId(pub u32);

/// Which store a column lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Level {
    /// A base column of the table.
    Base,
    /// A computed column owned by the table.
    Table,
    /// A computed column owned by one view.
    View,
}

/// A resolved column: the store it lives in and its position there.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColumnRef {
    pub level: Level,
    pub index: usize,
}

impl ColumnRef {
    pub const fn new(level: Level, index: usize) -> Self {
        Self { level, index }
    }
}

/// Previous values of cells that changed in one cycle, keyed by column then row.
///
/// Only the first previous value recorded for a cell is kept, so a cell written several times
/// in one batch still reports its last committed value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CellChanges {
    columns: BTreeMap<ColumnRef, BTreeMap<usize, Value>>,
}

impl CellChanges {
    pub fn record(&mut self, column: ColumnRef, row: usize, previous: Value) {
        self.columns
            .entry(column)
            .or_default()
            .entry(row)
            .or_insert(previous);
    }

    pub fn previous(&self, column: ColumnRef, row: usize) -> Option<&Value> {
        self.columns.get(&column)?.get(&row)
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> impl Iterator<Item = ColumnRef> + '_ {
        self.columns.keys().copied()
    }

    /// Rows changed in `column`.
    pub fn rows_of(&self, column: ColumnRef) -> impl Iterator<Item = usize> + '_ {
        self.columns
            .get(&column)
            .into_iter()
            .flat_map(|rows| rows.keys().copied())
    }

    /// Every row with at least one changed cell.
    pub fn rows(&self) -> BTreeSet<usize> {
        self.columns
            .values()
            .flat_map(|rows| rows.keys().copied())
            .collect()
    }

    /// Whether any of `columns` changed at `row`.
    pub fn touches(&self, row: usize, columns: &BTreeSet<ColumnRef>) -> bool {
        columns.iter().any(|c| self.previous(*c, row).is_some())
    }

    /// Drop entries whose current value equals the recorded previous value.
    pub fn retain_changed(&mut self, mut current: impl FnMut(ColumnRef, usize) -> Value) {
        for (column, rows) in self.columns.iter_mut() {
            rows.retain(|row, previous| current(*column, *row) != *previous);
        }
        self.columns.retain(|_, rows| !rows.is_empty());
    }

    pub fn extend(&mut self, other: CellChanges) {
        for (column, rows) in other.columns {
            for (row, previous) in rows {
                self.record(column, row, previous);
            }
        }
    }

    pub(crate) fn remove_rows(&mut self, rows: Range<usize>) {
        for changes in self.columns.values_mut() {
            changes.retain(|row, _| !rows.contains(row));
        }
        self.columns.retain(|_, rows| !rows.is_empty());
    }
}

/// Description of one committed table mutation.
///
/// Row indices are physical: they stay valid until a compaction, in which case `compaction`
/// holds the old-to-new remap and all other row sets refer to pre-compaction rows.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TableDelta {
    pub op_id: u64,
    pub port_id: PortId,
    pub appended: Range<usize>,
    pub updated_rows: BTreeSet<usize>,
    pub removed_rows: BTreeSet<usize>,
    pub updated_columns: BTreeSet<String>,
    pub changes: CellChanges,
    pub compaction: Option<Arc<Vec<Option<usize>>>>,
}

impl TableDelta {
    pub fn is_empty(&self) -> bool {
        self.appended.is_empty()
            && self.updated_rows.is_empty()
            && self.removed_rows.is_empty()
            && self.compaction.is_none()
    }

    /// Previous value of a cell changed by this mutation.
    pub fn previous_value(&self, column: ColumnRef, row: usize) -> Option<&Value> {
        self.changes.previous(column, row)
    }
}
