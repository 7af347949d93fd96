//! Views: live projections of a table.
//!
//! A view owns its configuration (immutable once created), its own expression columns and a
//! pivot tree. Tables push every committed delta into their views while still holding the
//! table's write lock (see [`crate::scheduler`]); subscribers hear about it afterwards.

mod config;
mod filter;
mod plan;
mod serialize;
mod state;

pub use config::{Filter, Sort, SortDir, ViewConfig};
pub use serialize::{ColumnData, ColumnarOutput, SerializeOptions, ROW_PATH_FIELD};

use crate::delta::{PortId, TableDelta};
use crate::error::{EngineError, EngineResult};
use crate::pivot::PivotNode;
use crate::schema::Schema;
use crate::table::{TableShared, TableState};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use state::ViewState;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tabula_columnar::Value;

/// How much an `on_update` callback is told.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateMode {
    /// Only that an update happened.
    #[default]
    None,
    /// Which view rows were added, changed or removed.
    Row,
}

/// Row-level change of one view caused by one table commit.
///
/// `added` and `changed` are positions after the update; `removed` are positions before it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewDelta {
    pub added: Vec<usize>,
    pub changed: Vec<usize>,
    pub removed: Vec<usize>,
    pub num_rows: usize,
}

impl ViewDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpdateEvent {
    pub port_id: PortId,
    pub op_id: u64,
    /// Present for [`UpdateMode::Row`] subscriptions.
    pub delta: Option<ViewDelta>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&UpdateEvent) + Send + Sync>;

#[derive(Clone)]
struct Subscription {
    id: SubscriptionId,
    mode: UpdateMode,
    callback: Callback,
}

pub(crate) struct ViewShared {
    table: Arc<TableShared>,
    state: RwLock<ViewState>,
    subscriptions: Mutex<Vec<Subscription>>,
    next_subscription: AtomicU64,
}

impl ViewShared {
    fn read(&self) -> RwLockReadGuard<'_, ViewState> {
        self.state.read().expect("view lock poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, ViewState> {
        self.state.write().expect("view lock poisoned")
    }

    fn subscriptions(&self) -> std::sync::MutexGuard<'_, Vec<Subscription>> {
        self.subscriptions.lock().expect("subscription list poisoned")
    }

    /// Patch the view with a committed delta. `None` once the view is deleted.
    pub(crate) fn apply(&self, delta: &TableDelta, table: &TableState) -> Option<ViewDelta> {
        let mut state = self.write();
        if state.deleted {
            return None;
        }
        Some(state.apply(delta, table))
    }

    /// Whether the view has an expression called `name`.
    pub(crate) fn defines(&self, name: &str) -> bool {
        let state = self.read();
        !state.deleted && state.expressions.definition(name).is_some()
    }

    /// Run subscribers in subscription order. Called with no locks held.
    pub(crate) fn notify(&self, event: &UpdateEvent) {
        let subscriptions = self.subscriptions().clone();
        if subscriptions.is_empty() {
            return;
        }
        let bare = UpdateEvent {
            delta: None,
            ..event.clone()
        };
        for subscription in subscriptions {
            match subscription.mode {
                UpdateMode::Row => (subscription.callback)(event),
                UpdateMode::None => (subscription.callback)(&bare),
            }
        }
    }
}

/// Handle to a view. Clones share the same view; dropping every handle without calling
/// [`View::delete`] detaches the view from its table.
#[derive(Clone)]
pub struct View {
    shared: Arc<ViewShared>,
}

impl std::fmt::Debug for View {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.read();
        f.debug_struct("View")
            .field("config", &state.config)
            .field("rows", &state.visible().len())
            .field("deleted", &state.deleted)
            .finish()
    }
}

impl View {
    pub(crate) fn create(
        table: Arc<TableShared>,
        config: ViewConfig,
        state: &TableState,
    ) -> EngineResult<Self> {
        let view = ViewState::build(config, state)?;
        log::debug!(
            "created view: {} rows, group_by {:?}, split_by {:?}",
            view.visible().len(),
            view.config.group_by,
            view.config.split_by
        );
        Ok(Self {
            shared: Arc::new(ViewShared {
                table,
                state: RwLock::new(view),
                subscriptions: Mutex::new(Vec::new()),
                next_subscription: AtomicU64::new(0),
            }),
        })
    }

    pub(crate) fn shared(&self) -> &Arc<ViewShared> {
        &self.shared
    }

    /// Table lock first, then the view lock.
    fn with_state<T>(&self, read: impl FnOnce(&ViewState, &TableState) -> T) -> EngineResult<T> {
        let table = self.shared.table.read();
        let state = self.shared.read();
        if state.deleted {
            return Err(EngineError::ViewDeleted);
        }
        Ok(read(&state, &table))
    }

    fn with_state_mut<T>(
        &self,
        write: impl FnOnce(&mut ViewState, &TableState) -> T,
    ) -> EngineResult<T> {
        let table = self.shared.table.read();
        let mut state = self.shared.write();
        if state.deleted {
            return Err(EngineError::ViewDeleted);
        }
        Ok(write(&mut state, &table))
    }

    pub fn config(&self) -> EngineResult<ViewConfig> {
        self.with_state(|state, _| state.config.clone())
    }

    /// Output type of every visible column, by column name.
    pub fn schema(&self) -> EngineResult<Schema> {
        self.with_state(|state, _| state.plan.schema())
    }

    /// Types of the view's expression columns, as they appear in the output.
    pub fn expression_schema(&self) -> EngineResult<Schema> {
        self.with_state(|state, _| {
            state
                .expressions
                .schema()
                .iter()
                .map(|(name, column_type)| {
                    let output = state
                        .plan
                        .columns
                        .iter()
                        .find(|c| c.name == name)
                        .map_or(column_type, |c| state.plan.output_type(c));
                    (name.to_string(), output)
                })
                .collect()
        })
    }

    /// Keys of [`View::to_columns`] in order, including `__ROW_PATH__` for grouped views.
    pub fn column_paths(&self) -> EngineResult<Vec<String>> {
        self.with_state(|state, _| serialize::column_paths(state))
    }

    pub fn num_rows(&self) -> EngineResult<usize> {
        self.with_state(|state, _| state.visible().len())
    }

    /// Output columns, counting every split_by combination separately.
    pub fn num_columns(&self) -> EngineResult<usize> {
        self.with_state(|state, _| serialize::num_output_columns(state))
    }

    /// Smallest and largest non-null value of a visible column; `(Null, Null)` when there is none.
    pub fn get_min_max(&self, column: &str) -> EngineResult<(Value, Value)> {
        self.with_state(|state, table| {
            let slot = state
                .plan
                .columns
                .iter()
                .position(|c| c.name == column)
                .ok_or_else(|| EngineError::UnknownColumn(column.to_string()))?;
            Ok(state.min_max(slot, table))
        })?
    }

    /// Open the group at view row `idx`. Returns `idx`; rows that cannot open are left alone.
    pub fn expand(&self, idx: usize) -> EngineResult<usize> {
        self.with_state_mut(|state, table| {
            state.expand(idx, table);
            idx
        })
    }

    pub fn collapse(&self, idx: usize) -> EngineResult<usize> {
        self.with_state_mut(|state, table| {
            state.collapse(idx, table);
            idx
        })
    }

    /// Open every group above `depth` and close the rest.
    pub fn set_depth(&self, depth: usize) -> EngineResult<()> {
        self.with_state_mut(|state, table| state.set_depth(depth, table))
    }

    /// The whole row tree, including collapsed groups.
    pub fn row_tree(&self) -> EngineResult<PivotNode> {
        self.with_state(|state, _| state.row_tree())
    }

    pub fn to_columns(&self) -> EngineResult<ColumnarOutput> {
        self.to_columns_with(&SerializeOptions::default())
    }

    pub fn to_columns_with(&self, options: &SerializeOptions) -> EngineResult<ColumnarOutput> {
        self.with_state(|state, table| serialize::materialize(state, table, options))
    }

    /// One JSON object per view row.
    pub fn to_json(&self) -> EngineResult<Json> {
        self.to_json_with(&SerializeOptions::default())
    }

    pub fn to_json_with(&self, options: &SerializeOptions) -> EngineResult<Json> {
        Ok(self.to_columns_with(options)?.to_json_rows())
    }

    pub fn to_csv(&self) -> EngineResult<String> {
        self.to_csv_with(&SerializeOptions::default())
    }

    pub fn to_csv_with(&self, options: &SerializeOptions) -> EngineResult<String> {
        self.to_columns_with(options)?.to_csv()
    }

    #[cfg(feature = "arrow")]
    pub fn to_arrow(&self) -> EngineResult<Vec<u8>> {
        self.to_arrow_with(&SerializeOptions::default())
    }

    #[cfg(feature = "arrow")]
    pub fn to_arrow_with(&self, options: &SerializeOptions) -> EngineResult<Vec<u8>> {
        self.to_columns_with(options)?.to_arrow()
    }

    /// Call `callback` after every table commit that reaches this view.
    pub fn on_update(
        &self,
        callback: impl Fn(&UpdateEvent) + Send + Sync + 'static,
        mode: UpdateMode,
    ) -> EngineResult<SubscriptionId> {
        self.with_state(|_, _| ())?;
        let id = SubscriptionId(self.shared.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.shared.subscriptions().push(Subscription {
            id,
            mode,
            callback: Arc::new(callback),
        });
        Ok(id)
    }

    /// Returns whether the subscription existed.
    pub fn remove_update(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.shared.subscriptions();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        subscriptions.len() != before
    }

    /// Detach from the table and free derived state. Every later call fails with
    /// [`EngineError::ViewDeleted`].
    pub fn delete(&self) -> EngineResult<()> {
        let _table = self.shared.table.read();
        {
            let mut state = self.shared.write();
            if state.deleted {
                return Err(EngineError::ViewDeleted);
            }
            state.release();
        }
        self.shared.subscriptions().clear();
        self.shared.table.unregister(&self.shared);
        log::debug!("deleted view");
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
    use crate::table::{Table, TableOptions};
    use crate::update::UpdateData;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;

    fn table() -> Table {
        Engine::default()
            .table(
                UpdateData::columns([
                    ("k", vec![Value::from("a"), Value::from("b"), Value::from("a")]),
                    ("v", vec![Value::from(1), Value::from(2), Value::from(3)]),
                ]),
                TableOptions::default(),
            )
            .unwrap()
    }

    #[test]
    fn grouped_views_expose_row_paths() {
        let table = table();
        let view = table.view(ViewConfig::new().with_group_by(["k"])).unwrap();
        assert_eq!(view.column_paths().unwrap(), vec!["__ROW_PATH__", "k", "v"]);
        assert_eq!(view.num_rows().unwrap(), 3);

        let out = view.to_columns().unwrap();
        assert_eq!(
            out.row_path,
            Some(vec![vec![], vec![Value::from("a")], vec![Value::from("b")]])
        );
        assert_eq!(
            out.column("v").unwrap(),
            &[Value::Integer(6), Value::Integer(4), Value::Integer(2)]
        );
        assert_eq!(out.column("k").unwrap()[0], Value::Integer(3));
    }

    #[test]
    fn subscriptions_follow_their_mode() {
        let table = table();
        let view = table.view(ViewConfig::default()).unwrap();
        let bare = Arc::new(AtomicUsize::new(0));
        let rows = Arc::new(Mutex::new(Vec::new()));

        let seen = Arc::clone(&bare);
        let id = view
            .on_update(
                move |event| {
                    assert!(event.delta.is_none());
                    seen.fetch_add(1, Ordering::SeqCst);
                },
                UpdateMode::None,
            )
            .unwrap();
        let sink = Arc::clone(&rows);
        view.on_update(
            move |event| sink.lock().unwrap().push(event.delta.clone().unwrap()),
            UpdateMode::Row,
        )
        .unwrap();

        table
            .update(UpdateData::columns([("k", vec![Value::from("c")])]))
            .unwrap();
        assert_eq!(bare.load(Ordering::SeqCst), 1);
        assert_eq!(
            rows.lock().unwrap().as_slice(),
            &[ViewDelta {
                added: vec![3],
                changed: vec![],
                removed: vec![],
                num_rows: 4,
            }]
        );

        assert!(view.remove_update(id));
        assert!(!view.remove_update(id));
        table
            .update(UpdateData::columns([("k", vec![Value::from("d")])]))
            .unwrap();
        assert_eq!(bare.load(Ordering::SeqCst), 1);
        assert_eq!(rows.lock().unwrap().len(), 2);
    }

    #[test]
    fn deleted_views_fail_and_stop_listening() {
        let table = table();
        let view = table.view(ViewConfig::default()).unwrap();
        assert_eq!(table.num_views(), 1);
        view.delete().unwrap();
        assert_eq!(table.num_views(), 0);
        assert_eq!(view.num_rows().unwrap_err(), EngineError::ViewDeleted);
        assert_eq!(view.delete().unwrap_err(), EngineError::ViewDeleted);
        table
            .update(UpdateData::columns([("k", vec![Value::from("c")])]))
            .unwrap();
    }

    #[test]
    fn dropped_views_detach() {
        let table = table();
        let view = table.view(ViewConfig::default()).unwrap();
        let clone = view.clone();
        drop(view);
        assert_eq!(table.num_views(), 1);
        drop(clone);
        assert_eq!(table.num_views(), 0);
        table.delete().unwrap();
    }
}
