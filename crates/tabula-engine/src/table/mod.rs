//! Tables: the single source of truth views observe.

mod state;

pub(crate) use state::TableState;

use crate::delta::{PortId, TableDelta};
use crate::engine::EngineOptions;
use crate::error::{EngineError, EngineResult};
use crate::expression::{self, ExpressionDef, ExpressionValidation};
use crate::scheduler;
use crate::schema::Schema;
use crate::source::Catalog;
use crate::update::UpdateData;
use crate::view::{View, ViewConfig, ViewShared};
use serde_json::Value as Json;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use tabula_columnar::{ColumnStats, Value};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TableOptions {
    /// Primary-key column. Updates upsert by key and `remove` becomes available.
    pub index: Option<String>,
    /// Rolling window size. Mutually exclusive with `index`.
    pub limit: Option<usize>,
}

impl TableOptions {
    pub fn indexed(column: impl Into<String>) -> Self {
        Self {
            index: Some(column.into()),
            limit: None,
        }
    }

    pub fn limited(limit: usize) -> Self {
        Self {
            index: None,
            limit: Some(limit),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    pub port_id: PortId,
}

pub(crate) struct TableShared {
    state: RwLock<TableState>,
    views: Mutex<Vec<Weak<ViewShared>>>,
}

impl TableShared {
    pub(crate) fn read(&self) -> RwLockReadGuard<'_, TableState> {
        self.state.read().expect("table lock poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, TableState> {
        self.state.write().expect("table lock poisoned")
    }

    /// Registered views that are still alive, in registration order.
    pub(crate) fn live_views(&self) -> Vec<Arc<ViewShared>> {
        let mut views = self.views.lock().expect("view registry poisoned");
        views.retain(|view| view.strong_count() > 0);
        views.iter().filter_map(Weak::upgrade).collect()
    }

    fn register(&self, view: &Arc<ViewShared>) {
        self.views
            .lock()
            .expect("view registry poisoned")
            .push(Arc::downgrade(view));
    }

    pub(crate) fn unregister(&self, view: &Arc<ViewShared>) {
        let target = Arc::downgrade(view);
        self.views
            .lock()
            .expect("view registry poisoned")
            .retain(|registered| !registered.ptr_eq(&target));
    }
}

/// Handle to a table. Clones share the same table.
#[derive(Clone)]
pub struct Table {
    shared: Arc<TableShared>,
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.read();
        f.debug_struct("Table")
            .field("rows", &state.store.live_rows())
            .field("columns", &state.store.column_count())
            .field("op_id", &state.op_id)
            .finish()
    }
}

impl Table {
    pub(crate) fn create(
        schema: Schema,
        options: TableOptions,
        engine: EngineOptions,
    ) -> EngineResult<Self> {
        if options.index.is_some() && options.limit.is_some() {
            return Err(EngineError::InvalidOption(
                "`index` and `limit` cannot be combined".into(),
            ));
        }
        if options.limit == Some(0) {
            return Err(EngineError::InvalidOption("`limit` must be positive".into()));
        }
        let state = TableState::new(&schema, options.index.as_deref(), options.limit, engine)?;
        log::debug!("created table with {} columns", schema.len());
        Ok(Self {
            shared: Arc::new(TableShared {
                state: RwLock::new(state),
                views: Mutex::new(Vec::new()),
            }),
        })
    }

    fn read(&self) -> EngineResult<RwLockReadGuard<'_, TableState>> {
        let state = self.shared.read();
        if state.deleted {
            return Err(EngineError::TableDeleted);
        }
        Ok(state)
    }

    /// Run one mutation and propagate its delta. Callbacks run after every lock is released.
    fn commit(
        &self,
        mutate: impl FnOnce(&mut TableState) -> EngineResult<Option<TableDelta>>,
    ) -> EngineResult<()> {
        let notifications = {
            let mut state = self.shared.write();
            if state.deleted {
                return Err(EngineError::TableDeleted);
            }
            let Some(delta) = mutate(&mut state)? else {
                return Ok(());
            };
            scheduler::propagate(&self.shared, &state, &delta)
        };
        scheduler::dispatch(notifications);
        Ok(())
    }

    pub fn update(&self, data: impl Into<UpdateData>) -> EngineResult<()> {
        self.update_with(data, UpdateOptions::default())
    }

    pub fn update_with(
        &self,
        data: impl Into<UpdateData>,
        options: UpdateOptions,
    ) -> EngineResult<()> {
        let data = data.into();
        self.commit(|state| state.update(data, options.port_id))
    }

    /// Update from JSON rows (`[{..}, ..]`) or columns (`{"x": [..], ..}`).
    pub fn update_json(&self, json: &Json) -> EngineResult<()> {
        self.update(UpdateData::from_json(json)?)
    }

    /// Remove the rows with the given primary keys. Unknown keys are skipped.
    pub fn remove<K: Into<Value>>(&self, keys: impl IntoIterator<Item = K>) -> EngineResult<()> {
        self.remove_with(keys, UpdateOptions::default())
    }

    pub fn remove_with<K: Into<Value>>(
        &self,
        keys: impl IntoIterator<Item = K>,
        options: UpdateOptions,
    ) -> EngineResult<()> {
        let keys: Vec<Value> = keys.into_iter().map(Into::into).collect();
        self.commit(|state| state.remove(&keys, options.port_id))
    }

    /// Remove every row. The schema, computed columns and views stay.
    pub fn clear(&self) -> EngineResult<()> {
        self.commit(|state| Ok(state.clear(PortId::default())))
    }

    /// Swap the table's contents for `data` in a single commit.
    pub fn replace(&self, data: impl Into<UpdateData>) -> EngineResult<()> {
        let data = data.into();
        self.commit(|state| state.replace(data, PortId::default()))
    }

    /// Base columns followed by table-level computed columns.
    pub fn schema(&self) -> EngineResult<Schema> {
        Ok(self.read()?.schema())
    }

    /// Number of live rows.
    pub fn size(&self) -> EngineResult<usize> {
        Ok(self.read()?.store.live_rows())
    }

    pub fn num_columns(&self) -> EngineResult<usize> {
        Ok(self.read()?.schema().len())
    }

    pub fn get_index(&self) -> EngineResult<Option<String>> {
        Ok(self.read()?.index_name().map(str::to_string))
    }

    pub fn get_limit(&self) -> EngineResult<Option<usize>> {
        Ok(self.read()?.limit)
    }

    /// Op id of the last committed mutation; 0 before the first one.
    pub fn op_id(&self) -> EngineResult<u64> {
        Ok(self.read()?.op_id)
    }

    /// Allocate a new port to tag updates with.
    pub fn make_port(&self) -> EngineResult<PortId> {
        let mut state = self.shared.write();
        if state.deleted {
            return Err(EngineError::TableDeleted);
        }
        Ok(state.make_port())
    }

    /// Define a computed column owned by the table and visible to every view created after.
    ///
    /// Fails with [`EngineError::ShadowedColumn`] while a live view has an expression of the
    /// same name.
    pub fn add_computed_column(&self, name: &str, def: ExpressionDef) -> EngineResult<()> {
        let mut state = self.shared.write();
        if state.deleted {
            return Err(EngineError::TableDeleted);
        }
        if self.shared.live_views().iter().any(|view| view.defines(name)) {
            return Err(EngineError::ShadowedColumn(name.to_string()));
        }
        let state = &mut *state;
        state
            .computed
            .define(name, &def, &Catalog::new(&state.store))?;
        Ok(())
    }

    /// Statistics over the live rows of a base or table-level computed column.
    pub fn column_stats(&self, name: &str) -> EngineResult<ColumnStats> {
        let state = self.read()?;
        let catalog = state.catalog();
        let (column, column_type) = catalog
            .resolve(name)
            .ok_or_else(|| EngineError::UnknownColumn(name.to_string()))?;
        Ok(ColumnStats::collect(
            column_type,
            catalog.live_rows().map(|row| catalog.get(row, column)),
        ))
    }

    /// Check view expressions against this table without creating a view.
    pub fn validate_expressions(
        &self,
        defs: &[(String, ExpressionDef)],
    ) -> EngineResult<ExpressionValidation> {
        let state = self.read()?;
        Ok(expression::validate(defs, &state.catalog()))
    }

    pub fn view(&self, config: ViewConfig) -> EngineResult<View> {
        // Holding the read lock across registration keeps commits from slipping in between.
        let state = self.read()?;
        let view = View::create(Arc::clone(&self.shared), config, &state)?;
        self.shared.register(view.shared());
        Ok(view)
    }

    /// Number of live views.
    pub fn num_views(&self) -> usize {
        self.shared.live_views().len()
    }

    /// Delete the table. Fails while views are still attached.
    pub fn delete(&self) -> EngineResult<()> {
        let mut state = self.shared.write();
        if state.deleted {
            return Err(EngineError::TableDeleted);
        }
        let views = self.shared.live_views().len();
        if views > 0 {
            return Err(EngineError::ViewsAttached(views));
        }
        state.deleted = true;
        state.store = state.store.cleared();
        log::debug!("deleted table");
        Ok(())
    }

    pub fn is_deleted(&self) -> bool {
        self.shared.read().deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use crate::error::ErrorKind;
    use crate::update::Row;
    use tabula_columnar::ColumnType;

    fn table(options: TableOptions) -> Table {
        Engine::default()
            .table_from_schema(
                Schema::new()
                    .with("k", ColumnType::Integer)
                    .with("v", ColumnType::Float),
                options,
            )
            .unwrap()
    }

    #[test]
    fn index_and_limit_are_exclusive() {
        let err = Engine::default()
            .table_from_schema(
                Schema::new().with("k", ColumnType::Integer),
                TableOptions {
                    index: Some("k".into()),
                    limit: Some(3),
                },
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn deleted_tables_reject_everything() {
        let table = table(TableOptions::default());
        let view = table.view(ViewConfig::default()).unwrap();
        assert_eq!(table.delete().unwrap_err(), EngineError::ViewsAttached(1));

        view.delete().unwrap();
        table.delete().unwrap();
        assert!(table.is_deleted());
        assert_eq!(table.size().unwrap_err(), EngineError::TableDeleted);
        assert_eq!(
            table.update(vec![Row::new().with("k", 1)]).unwrap_err().kind(),
            ErrorKind::State
        );
        assert!(table.view(ViewConfig::default()).is_err());
    }

    #[test]
    fn ports_are_unique_per_table() {
        let table = table(TableOptions::default());
        let a = table.make_port().unwrap();
        let b = table.make_port().unwrap();
        assert_ne!(a, b);
        assert_ne!(a, PortId::default());
    }

    #[test]
    fn computed_columns_show_up_in_schema_and_stats() {
        let table = table(TableOptions::indexed("k"));
        table
            .update(UpdateData::columns([
                ("k", vec![Value::from(1), Value::from(2)]),
                ("v", vec![Value::from(1.5), Value::Null]),
            ]))
            .unwrap();
        table
            .add_computed_column("neg", ExpressionDef::new("negate", ["v"]))
            .unwrap();
        assert_eq!(table.schema().unwrap().get("neg"), Some(ColumnType::Float));

        let stats = table.column_stats("neg").unwrap();
        assert_eq!(stats.null_count, 1);
        assert_eq!(stats.min, Some(Value::Float(-1.5)));

        table.update(vec![Row::new().with("k", 2).with("v", 4.0)]).unwrap();
        assert_eq!(table.column_stats("neg").unwrap().min, Some(Value::Float(-4.0)));
        assert_eq!(table.size().unwrap(), 2);
    }
}
