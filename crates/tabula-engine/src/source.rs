//! Read access to the columns a view or expression can see.

use crate::delta::{CellChanges, ColumnRef, Level};
use crate::expression::ExpressionEngine;
use tabula_columnar::{ColumnStore, ColumnType, Value};

/// Reads one cell of a resolved column.
pub(crate) trait CellReader {
    fn cell(&self, row: usize, column: ColumnRef) -> Value;
}

/// The base store plus the computed layers stacked on it.
#[derive(Clone, Copy)]
pub(crate) struct Catalog<'a> {
    base: &'a ColumnStore,
    table: Option<&'a ExpressionEngine>,
    view: Option<&'a ExpressionEngine>,
}

impl<'a> Catalog<'a> {
    pub fn new(base: &'a ColumnStore) -> Self {
        Self {
            base,
            table: None,
            view: None,
        }
    }

    pub fn with_table(mut self, table: &'a ExpressionEngine) -> Self {
        self.table = Some(table);
        self
    }

    pub fn with_view(mut self, view: &'a ExpressionEngine) -> Self {
        self.view = Some(view);
        self
    }

    /// Physical row count of the base store.
    pub fn rows(&self) -> usize {
        self.base.len()
    }

    pub fn is_live(&self, row: usize) -> bool {
        self.base.is_live(row)
    }

    pub fn live_rows(&self) -> impl Iterator<Item = usize> + 'a {
        self.base.iter_live()
    }

    pub fn resolve(&self, name: &str) -> Option<(ColumnRef, ColumnType)> {
        if let Some(idx) = self.base.column_index(name) {
            let ty = self.base.schema()[idx].column_type;
            return Some((ColumnRef::new(Level::Base, idx), ty));
        }
        self.table
            .and_then(|e| e.resolve(name))
            .or_else(|| self.view.and_then(|e| e.resolve(name)))
    }

    pub fn get(&self, row: usize, column: ColumnRef) -> Value {
        match column.level {
            Level::Base => self.base.get(row, column.index),
            Level::Table => self.table.map_or(Value::Null, |e| e.get(row, column.index)),
            Level::View => self.view.map_or(Value::Null, |e| e.get(row, column.index)),
        }
    }

    pub fn column_type(&self, column: ColumnRef) -> ColumnType {
        match column.level {
            Level::Base => self
                .base
                .schema()
                .get(column.index)
                .map(|c| c.column_type)
                .unwrap_or_default(),
            Level::Table => self
                .table
                .and_then(|e| e.column_type(column.index))
                .unwrap_or_default(),
            Level::View => self
                .view
                .and_then(|e| e.column_type(column.index))
                .unwrap_or_default(),
        }
    }

    /// Every visible column in order: base columns, table computed columns, view expressions.
    pub fn columns(&self) -> Vec<(String, ColumnRef, ColumnType)> {
        let mut out: Vec<_> = self
            .base
            .schema()
            .iter()
            .enumerate()
            .map(|(idx, c)| (c.name.clone(), ColumnRef::new(Level::Base, idx), c.column_type))
            .collect();
        for engine in [self.table, self.view].into_iter().flatten() {
            out.extend(engine.columns());
        }
        out
    }
}

impl CellReader for Catalog<'_> {
    fn cell(&self, row: usize, column: ColumnRef) -> Value {
        self.get(row, column)
    }
}

/// Cell values as they were before the changes in `changes` were applied.
pub(crate) struct Previous<'a> {
    pub catalog: Catalog<'a>,
    pub changes: &'a CellChanges,
}

impl CellReader for Previous<'_> {
    fn cell(&self, row: usize, column: ColumnRef) -> Value {
        match self.changes.previous(column, row) {
            Some(previous) => previous.clone(),
            None => self.catalog.get(row, column),
        }
    }
}
