//! Update propagation.
//!
//! One cycle runs entirely under the table's write lock: the commit (including table-level
//! computed columns) has already happened when [`propagate`] is called, which then patches
//! every registered view in registration order. Readers take the table lock before any view
//! lock, so none of them can observe a view that has not caught up with the table. Callbacks
//! are collected here and invoked by [`dispatch`] once all locks are released. Views the delta
//! left unchanged are not notified.

use crate::delta::TableDelta;
use crate::table::{TableShared, TableState};
use crate::view::{UpdateEvent, ViewShared};
use std::sync::Arc;

pub(crate) struct Notification {
    view: Arc<ViewShared>,
    event: UpdateEvent,
}

pub(crate) fn propagate(
    table: &TableShared,
    state: &TableState,
    delta: &TableDelta,
) -> Vec<Notification> {
    let views = table.live_views();
    let mut notifications = Vec::with_capacity(views.len());
    for view in views {
        let Some(view_delta) = view.apply(delta, state) else {
            continue;
        };
        if view_delta.is_empty() {
            continue;
        }
        log::trace!(
            "op {}: view delta +{} ~{} -{}",
            delta.op_id,
            view_delta.added.len(),
            view_delta.changed.len(),
            view_delta.removed.len()
        );
        notifications.push(Notification {
            view,
            event: UpdateEvent {
                port_id: delta.port_id,
                op_id: delta.op_id,
                delta: Some(view_delta),
            },
        });
    }
    notifications
}

pub(crate) fn dispatch(notifications: Vec<Notification>) {
    for Notification { view, event } in notifications {
        view.notify(&event);
    }
}
