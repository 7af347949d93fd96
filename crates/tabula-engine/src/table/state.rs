//! Commit logic: turns one mutation into writes on the store plus a [`TableDelta`].

use crate::delta::{CellChanges, ColumnRef, Level, PortId, TableDelta};
use crate::engine::EngineOptions;
use crate::error::{EngineError, EngineResult};
use crate::expression::ExpressionEngine;
use crate::schema::Schema;
use crate::source::Catalog;
use crate::update::{Row, UpdateData, INDEX_FIELD};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tabula_columnar::{ColumnSchema, ColumnStore, Field, Value};

/// Primary-key column and the live row holding each key.
#[derive(Clone, Debug)]
pub(crate) struct KeyIndex {
    pub column: usize,
    rows: HashMap<Value, usize>,
}

impl KeyIndex {
    fn new(column: usize) -> Self {
        Self {
            column,
            rows: HashMap::new(),
        }
    }

    pub fn get(&self, key: &Value) -> Option<usize> {
        self.rows.get(key).copied()
    }

    fn insert(&mut self, key: Value, row: usize) {
        self.rows.insert(key, row);
    }

    /// Forget `key` if it still points at `row`.
    fn remove(&mut self, key: &Value, row: usize) {
        if self.rows.get(key) == Some(&row) {
            self.rows.remove(key);
        }
    }

    fn remap(&mut self, remap: &[Option<usize>]) {
        self.rows = self
            .rows
            .drain()
            .filter_map(|(key, row)| remap.get(row).copied().flatten().map(|new| (key, new)))
            .collect();
    }

    fn clear(&mut self) {
        self.rows.clear();
    }
}

/// Coerced writes of one update, resolved to their target rows.
#[derive(Debug, Default)]
struct Plan {
    writes: Vec<(usize, Vec<Field>)>,
    appends: Vec<Vec<Field>>,
}

/// Everything a table owns. Guarded by the table's lock.
#[derive(Debug)]
pub(crate) struct TableState {
    pub store: ColumnStore,
    pub computed: ExpressionEngine,
    pub key_index: Option<KeyIndex>,
    pub limit: Option<usize>,
    pub op_id: u64,
    pub deleted: bool,
    /// Rows ever appended since the last clear; drives the rolling window.
    inserted: usize,
    next_port: u32,
    options: EngineOptions,
}

impl TableState {
    pub fn new(
        schema: &Schema,
        index: Option<&str>,
        limit: Option<usize>,
        options: EngineOptions,
    ) -> EngineResult<Self> {
        let store = ColumnStore::new(schema.columns().to_vec())?;
        let key_index = match index {
            Some(name) => {
                let column = store
                    .column_index(name)
                    .ok_or_else(|| EngineError::UnknownIndex(name.to_string()))?;
                Some(KeyIndex::new(column))
            }
            None => None,
        };
        Ok(Self {
            computed: ExpressionEngine::new(Level::Table, 0),
            store,
            key_index,
            limit,
            op_id: 0,
            deleted: false,
            inserted: 0,
            next_port: 0,
            options,
        })
    }

    /// Base columns plus the table's computed columns.
    pub fn catalog(&self) -> Catalog<'_> {
        Catalog::new(&self.store).with_table(&self.computed)
    }

    pub fn schema(&self) -> Schema {
        let mut schema: Schema = self.store.schema().to_vec().into();
        for column in self.computed.schema().columns() {
            schema.push(column.name.clone(), column.column_type);
        }
        schema
    }

    pub fn index_name(&self) -> Option<&str> {
        self.key_index
            .as_ref()
            .map(|index| self.store.schema()[index.column].name.as_str())
    }

    pub fn make_port(&mut self) -> PortId {
        self.next_port += 1;
        PortId(self.next_port)
    }

    fn column_name(&self, column: ColumnRef) -> Option<String> {
        match column.level {
            Level::Base => self
                .store
                .schema()
                .get(column.index)
                .map(|c: &ColumnSchema| c.name.clone()),
            Level::Table => self.computed.names().nth(column.index).map(str::to_string),
            Level::View => None,
        }
    }

    pub fn update(
        &mut self,
        data: UpdateData,
        port_id: PortId,
    ) -> EngineResult<Option<TableDelta>> {
        for name in data.column_names() {
            if name != INDEX_FIELD && self.store.column_index(&name).is_none() {
                log::warn!("ignoring unknown column {name} in update");
            }
        }
        let rows = data.into_rows();
        let plan = self.plan(&rows, false)?;
        let mut delta = TableDelta {
            port_id,
            ..TableDelta::default()
        };
        self.write(plan, &mut delta)?;
        Ok(self.finish(delta))
    }

    pub fn remove(&mut self, keys: &[Value], port_id: PortId) -> EngineResult<Option<TableDelta>> {
        let Some(index) = &self.key_index else {
            return Err(EngineError::NoPrimaryKey);
        };
        let column = index.column;
        let mut rows = Vec::with_capacity(keys.len());
        for key in keys {
            let key = self.store.coerce(column, key)?;
            if let Some(row) = index.get(&key) {
                rows.push(row);
            }
        }

        let removed = self.store.remove(&rows);
        if let Some(index) = self.key_index.as_mut() {
            for &row in &removed {
                index.remove(&self.store.get(row, column), row);
            }
        }
        let mut delta = TableDelta {
            port_id,
            removed_rows: removed.into_iter().collect(),
            ..TableDelta::default()
        };
        if self.should_compact() {
            self.compact(&mut delta);
        }
        Ok(self.finish(delta))
    }

    /// Remove every row.
    pub fn clear(&mut self, port_id: PortId) -> Option<TableDelta> {
        let mut delta = TableDelta {
            port_id,
            ..TableDelta::default()
        };
        self.clear_rows(&mut delta);
        self.finish(delta)
    }

    /// Remove every row and load `data`, as one commit.
    ///
    /// The delta's `removed_rows` refer to the old rows; `appended` to the new ones.
    pub fn replace(
        &mut self,
        data: UpdateData,
        port_id: PortId,
    ) -> EngineResult<Option<TableDelta>> {
        let rows = data.into_rows();
        let plan = self.plan(&rows, true)?;
        let mut delta = TableDelta {
            port_id,
            ..TableDelta::default()
        };
        self.clear_rows(&mut delta);
        self.write(plan, &mut delta)?;
        Ok(self.finish(delta))
    }

    fn clear_rows(&mut self, delta: &mut TableDelta) {
        let live: Vec<usize> = self.store.iter_live().collect();
        delta.removed_rows.extend(self.store.remove(&live));
        if let Some(index) = self.key_index.as_mut() {
            index.clear();
        }
        self.inserted = 0;
        self.compact(delta);
    }

    /// Coerce every field and resolve each row to an existing row or a new one.
    ///
    /// With `fresh`, existing rows are ignored, as if the table were empty.
    fn plan(&self, rows: &[Row], fresh: bool) -> EngineResult<Plan> {
        let mut plan = Plan::default();
        let mut pending: HashMap<Value, usize> = HashMap::new();
        // Keys moved by `__INDEX__` writes earlier in this batch, and the rows they left.
        let mut moved: HashMap<Value, usize> = HashMap::new();
        let mut vacated: HashSet<usize> = HashSet::new();
        for row in rows {
            let fields = self.coerce_row(row)?;
            if let Some(target) = row.index().filter(|r| !fresh && self.store.is_live(*r)) {
                if let Some(index) = &self.key_index {
                    if let Some(key) = fields[index.column].as_write() {
                        if key != self.store.get(target, index.column) {
                            let holder = moved.get(&key).copied().or_else(|| {
                                index.get(&key).filter(|r| !vacated.contains(r))
                            });
                            if holder.is_some_and(|r| r != target) || pending.contains_key(&key)
                            {
                                return Err(EngineError::DuplicateKey(key.to_string()));
                            }
                            moved.retain(|_, r| *r != target);
                            moved.insert(key, target);
                            vacated.insert(target);
                        }
                    }
                }
                plan.writes.push((target, fields));
                continue;
            }
            let Some(index) = &self.key_index else {
                plan.appends.push(fields);
                continue;
            };
            let key = fields[index.column].as_write().unwrap_or_default();
            let existing = if fresh {
                None
            } else {
                moved
                    .get(&key)
                    .copied()
                    .or_else(|| index.get(&key).filter(|r| !vacated.contains(r)))
            };
            match (existing, pending.get(&key).copied()) {
                (Some(existing), _) => plan.writes.push((existing, fields)),
                (None, Some(slot)) => merge_fields(&mut plan.appends[slot], fields),
                (None, None) => {
                    pending.insert(key, plan.appends.len());
                    plan.appends.push(fields);
                }
            }
        }
        Ok(plan)
    }

    fn coerce_row(&self, row: &Row) -> EngineResult<Vec<Field>> {
        self.store
            .schema()
            .iter()
            .enumerate()
            .map(|(col, schema)| match row.get(&schema.name) {
                Field::Undefined => Ok(Field::Undefined),
                Field::Null => Ok(Field::Null),
                Field::Value(value) => Ok(Field::from(self.store.coerce(col, value)?)),
            })
            .collect()
    }

    fn write(&mut self, plan: Plan, delta: &mut TableDelta) -> EngineResult<()> {
        for (row, fields) in &plan.writes {
            self.write_row(*row, fields, &mut delta.changes);
        }

        let start = self.store.len();
        match self.limit {
            None => {
                let appended = self.store.append(&plan.appends)?;
                if let Some(index) = self.key_index.as_mut() {
                    for row in appended.clone() {
                        index.insert(self.store.get(row, index.column), row);
                    }
                }
                self.inserted += appended.len();
            }
            Some(limit) => {
                for fields in plan.appends {
                    let slot = self.inserted % limit;
                    self.inserted += 1;
                    if slot >= self.store.len() {
                        self.store.append(std::slice::from_ref(&fields))?;
                    } else {
                        // A recycled slot starts out blank.
                        let fields: Vec<Field> = fields
                            .into_iter()
                            .map(|f| if f.is_undefined() { Field::Null } else { f })
                            .collect();
                        self.write_row(slot, &fields, &mut delta.changes);
                    }
                }
            }
        }
        delta.appended = start..self.store.len();
        Ok(())
    }

    fn write_row(&mut self, row: usize, fields: &[Field], changes: &mut CellChanges) {
        for (col, field) in fields.iter().enumerate() {
            let Some(value) = field.as_write() else {
                continue;
            };
            let Some(previous) = self.store.write_coerced(row, col, value) else {
                continue;
            };
            if let Some(index) = self.key_index.as_mut().filter(|i| i.column == col) {
                index.remove(&previous, row);
                index.insert(self.store.get(row, col), row);
            }
            changes.record(ColumnRef::new(Level::Base, col), row, previous);
        }
    }

    fn should_compact(&self) -> bool {
        let physical = self.store.len();
        let dead = self.store.dead_rows();
        dead > 0
            && physical >= self.options.compaction_min_rows
            && dead as f64 > self.options.compaction_ratio * physical as f64
    }

    fn compact(&mut self, delta: &mut TableDelta) {
        let remap = self.store.compact();
        if let Some(index) = self.key_index.as_mut() {
            index.remap(&remap);
        }
        log::debug!(
            "compacted table from {} to {} rows",
            remap.len(),
            self.store.len()
        );
        delta.compaction = Some(Arc::new(remap));
    }

    /// Settle the delta: drop no-op writes, recompute table-level computed columns and stamp
    /// the op id. Returns `None` when nothing changed.
    fn finish(&mut self, mut delta: TableDelta) -> Option<TableDelta> {
        delta.changes.remove_rows(delta.appended.clone());
        let store = &self.store;
        delta
            .changes
            .retain_changed(|column, row| store.get(row, column.index));

        let computed = self
            .computed
            .apply_delta(&delta, &Catalog::new(&self.store));
        delta.changes.extend(computed);
        delta.updated_rows = delta.changes.rows();
        delta.updated_columns = delta
            .changes
            .columns()
            .filter_map(|column| self.column_name(column))
            .collect();

        if delta.is_empty() {
            return None;
        }
        self.op_id += 1;
        delta.op_id = self.op_id;
        log::debug!(
            "committed op {} from port {}: {} appended, {} updated, {} removed",
            delta.op_id,
            delta.port_id.0,
            delta.appended.len(),
            delta.updated_rows.len(),
            delta.removed_rows.len()
        );
        Some(delta)
    }
}

/// Fold a later record for the same key into an earlier pending one.
fn merge_fields(into: &mut [Field], from: Vec<Field>) {
    for (slot, field) in into.iter_mut().zip(from) {
        if !field.is_undefined() {
            *slot = field;
        }
    }
}
