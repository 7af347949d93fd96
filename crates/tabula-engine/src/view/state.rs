use crate::delta::{ColumnRef, Level, TableDelta};
use crate::error::EngineResult;
use crate::expression::ExpressionEngine;
use crate::pivot::tree::PivotTree;
use crate::pivot::PivotNode;
use crate::source::{Catalog, Previous};
use crate::table::TableState;
use crate::view::config::ViewConfig;
use crate::view::plan::ViewPlan;
use crate::view::ViewDelta;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use tabula_columnar::Value;

/// Stable identity of a visible row, used to diff two materializations.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum RowId {
    Row(usize),
    Path(Vec<Value>),
}

/// What one patch touched: pivot nodes for grouped views, physical rows for flat ones.
#[derive(Debug, Default)]
struct Touched {
    nodes: BTreeSet<usize>,
    rows: BTreeSet<usize>,
}

impl Touched {
    fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.rows.is_empty()
    }
}

/// Everything a view derives from its table.
#[derive(Debug)]
pub(crate) struct ViewState {
    pub config: ViewConfig,
    pub plan: ViewPlan,
    pub expressions: ExpressionEngine,
    pub deleted: bool,
    /// Physical rows currently contributing to the tree.
    included: Vec<bool>,
    tree: PivotTree,
    /// Pivot node ids (grouped) or physical rows (flat), in display order.
    visible: Vec<usize>,
    /// Column-tree leaves in display order.
    leaves: Vec<usize>,
}

impl ViewState {
    pub fn build(config: ViewConfig, table: &TableState) -> EngineResult<Self> {
        let lower = table.catalog();
        let mut expressions = ExpressionEngine::new(Level::View, table.store.len());
        expressions.define_all(&config.expressions, &lower)?;
        let plan = ViewPlan::resolve(&config, &lower.with_view(&expressions), &expressions)?;
        let mut state = Self {
            tree: plan.new_tree(),
            config,
            plan,
            expressions,
            deleted: false,
            included: Vec::new(),
            visible: Vec::new(),
            leaves: Vec::new(),
        };
        state.populate(table);
        state.refresh(table);
        Ok(state)
    }

    pub fn is_grouped(&self) -> bool {
        self.plan.is_grouped()
    }

    pub fn catalog<'a>(&'a self, table: &'a TableState) -> Catalog<'a> {
        table.catalog().with_view(&self.expressions)
    }

    pub fn tree(&self) -> &PivotTree {
        &self.tree
    }

    pub fn visible(&self) -> &[usize] {
        &self.visible
    }

    pub fn leaves(&self) -> &[usize] {
        &self.leaves
    }

    fn populate(&mut self, table: &TableState) {
        let catalog = table.catalog().with_view(&self.expressions);
        self.included = vec![false; catalog.rows()];
        let mut touched = BTreeSet::new();
        for row in catalog.live_rows() {
            if self.plan.accepts(row, &catalog) {
                let key = self.plan.key(row, &catalog);
                self.tree.add_row(row, &key, &mut touched);
                self.included[row] = true;
            }
        }
    }

    /// Recompute display order after the tree or the open state changed.
    pub fn refresh(&mut self, table: &TableState) {
        if self.is_grouped() {
            self.visible = self.tree.visible(&self.plan.node_sorts);
        } else {
            let catalog = table.catalog().with_view(&self.expressions);
            let rows = self
                .included
                .iter()
                .enumerate()
                .filter(|(_, included)| **included)
                .map(|(row, _)| row);
            self.visible = if self.plan.row_sorts.is_empty() {
                rows.collect()
            } else {
                let sorts = &self.plan.row_sorts;
                let mut keyed: Vec<(Vec<Value>, usize)> =
                    rows.map(|row| (sort_key(sorts, row, &catalog), row)).collect();
                keyed.sort_by(|(a, _), (b, _)| compare_keys(sorts, a, b));
                keyed.into_iter().map(|(_, row)| row).collect()
            };
        }
        self.leaves = self.tree.column_leaves(&self.plan.column_sorts);
    }

    /// Move the touched rows of a flat view to their sorted positions. Untouched rows keep
    /// their relative order, so the result matches a full stable sort.
    fn reorder(&mut self, rows: &BTreeSet<usize>, table: &TableState) {
        let catalog = table.catalog().with_view(&self.expressions);
        let sorts = &self.plan.row_sorts;
        self.visible.retain(|row| !rows.contains(row));
        for &row in rows {
            if !self.included.get(row).copied().unwrap_or(false) {
                continue;
            }
            let key = sort_key(sorts, row, &catalog);
            let at = self.visible.partition_point(|&other| {
                compare_keys(sorts, &sort_key(sorts, other, &catalog), &key)
                    .then(other.cmp(&row))
                    .is_lt()
            });
            self.visible.insert(at, row);
        }
        self.leaves = self.tree.column_leaves(&self.plan.column_sorts);
    }

    fn identities(&self) -> Vec<RowId> {
        if self.is_grouped() {
            self.visible
                .iter()
                .map(|id| RowId::Path(self.tree.node(*id).path.clone()))
                .collect()
        } else {
            self.visible.iter().map(|row| RowId::Row(*row)).collect()
        }
    }

    /// Bring the view up to date with one committed table delta.
    ///
    /// A delta that touches no included row and no relevant column costs only the expression
    /// recompute and yields an empty [`ViewDelta`].
    pub fn apply(&mut self, delta: &TableDelta, table: &TableState) -> ViewDelta {
        if let Some(remap) = &delta.compaction {
            let before: Vec<Option<RowId>> = self
                .identities()
                .into_iter()
                .map(|id| match id {
                    RowId::Row(row) => remap.get(row).copied().flatten().map(RowId::Row),
                    path => Some(path),
                })
                .collect();
            self.rebuild(table);
            self.refresh(table);
            let after = self.identities();
            let after_touched = vec![true; after.len()];
            return diff(&before, &after, &after_touched);
        }

        let mut touched = Touched::default();
        self.patch(delta, table, &mut touched);
        if touched.is_empty() {
            return ViewDelta {
                num_rows: self.visible.len(),
                ..ViewDelta::default()
            };
        }

        // Node paths are stable and `visible` still holds the previous order.
        let before: Vec<Option<RowId>> = self.identities().into_iter().map(Some).collect();
        let leaves_before = std::mem::take(&mut self.leaves);
        if self.is_grouped() {
            self.refresh(table);
        } else {
            self.reorder(&touched.rows, table);
        }

        let everything = self.leaves != leaves_before;
        let grouped = self.is_grouped();
        let after = self.identities();
        let after_touched: Vec<bool> = self
            .visible
            .iter()
            .map(|id| {
                everything
                    || if grouped {
                        touched.nodes.contains(id)
                    } else {
                        touched.rows.contains(id)
                    }
            })
            .collect();
        diff(&before, &after, &after_touched)
    }

    /// Subtract the old contribution of changed rows, recompute view expressions, then add
    /// the new contribution of changed and appended rows that pass the filters.
    fn patch(&mut self, delta: &TableDelta, table: &TableState, touched: &mut Touched) {
        let lower = table.catalog();
        let relevant = &self.plan.relevant;
        let changed: Vec<usize> = delta
            .updated_rows
            .iter()
            .copied()
            .filter(|row| delta.changes.touches(*row, relevant))
            .collect();

        let retract: Vec<usize> = delta
            .removed_rows
            .iter()
            .chain(&changed)
            .copied()
            .filter(|row| self.included.get(*row).copied().unwrap_or(false))
            .collect();
        if !retract.is_empty() {
            let previous = Previous {
                catalog: lower.with_view(&self.expressions),
                changes: &delta.changes,
            };
            for &row in &retract {
                let key = self.plan.key(row, &previous);
                self.tree.remove_row(row, &key, &mut touched.nodes);
                self.included[row] = false;
                touched.rows.insert(row);
            }
        }

        self.expressions.apply_delta(delta, &lower);
        self.included.resize(lower.rows(), false);

        let current = lower.with_view(&self.expressions);
        for row in delta.appended.clone().chain(changed) {
            if self.included[row] || !current.is_live(row) || !self.plan.accepts(row, &current) {
                continue;
            }
            let key = self.plan.key(row, &current);
            self.tree.add_row(row, &key, &mut touched.nodes);
            self.included[row] = true;
            touched.rows.insert(row);
        }
    }

    /// Recompute everything from the table, keeping nodes the user opened or closed.
    fn rebuild(&mut self, table: &TableState) {
        let open = self.tree.open_state();
        self.expressions.rebuild(&table.catalog());
        self.tree = self.plan.new_tree();
        self.populate(table);
        self.tree.restore_open_state(&open);
    }

    /// Open the node at display row `idx`. Anything else is left alone.
    pub fn expand(&mut self, idx: usize, table: &TableState) {
        if let Some(node) = self.node_at(idx) {
            if self.tree.expand(node) {
                self.refresh(table);
            }
        }
    }

    pub fn collapse(&mut self, idx: usize, table: &TableState) {
        if let Some(node) = self.node_at(idx) {
            if self.tree.collapse(node) {
                self.refresh(table);
            }
        }
    }

    fn node_at(&self, idx: usize) -> Option<usize> {
        if self.is_grouped() {
            self.visible.get(idx).copied()
        } else {
            None
        }
    }

    pub fn set_depth(&mut self, depth: usize, table: &TableState) {
        self.tree.set_open_depth(depth);
        self.refresh(table);
    }

    pub fn row_tree(&self) -> PivotNode {
        let names: Vec<String> = self.plan.columns.iter().map(|c| c.name.clone()).collect();
        self.tree.snapshot(0, &self.plan.node_sorts, &names)
    }

    /// Smallest and largest non-null value of an output column. Grouped views look at the
    /// aggregates of every visible non-root row.
    pub fn min_max(&self, slot: usize, table: &TableState) -> (Value, Value) {
        let values: Vec<Value> = if self.is_grouped() {
            self.visible
                .iter()
                .filter(|id| **id != 0)
                .map(|id| self.tree.total(*id, slot))
                .collect()
        } else {
            let catalog = self.catalog(table);
            let column = self.plan.columns[slot].column;
            self.visible
                .iter()
                .map(|row| catalog.get(*row, column))
                .collect()
        };
        let mut non_null = values.into_iter().filter(|v| !v.is_null());
        let Some(first) = non_null.next() else {
            return (Value::Null, Value::Null);
        };
        non_null.fold((first.clone(), first), |(lo, hi), v| {
            if v < lo {
                (v, hi)
            } else if v > hi {
                (lo, v)
            } else {
                (lo, hi)
            }
        })
    }

    /// Drop derived state once the view is deleted.
    pub fn release(&mut self) {
        self.deleted = true;
        self.included = Vec::new();
        self.visible = Vec::new();
        self.leaves = Vec::new();
        self.tree = self.plan.new_tree();
        self.expressions = ExpressionEngine::new(Level::View, 0);
    }
}

fn sort_key(sorts: &[(ColumnRef, bool)], row: usize, catalog: &Catalog<'_>) -> Vec<Value> {
    sorts.iter().map(|(column, _)| catalog.get(row, *column)).collect()
}

fn compare_keys(sorts: &[(ColumnRef, bool)], a: &[Value], b: &[Value]) -> Ordering {
    for ((left, right), (_, descending)) in a.iter().zip(b).zip(sorts) {
        let ord = left.cmp(right);
        let ord = if *descending { ord.reverse() } else { ord };
        if ord.is_ne() {
            return ord;
        }
    }
    Ordering::Equal
}

/// Rows are matched by identity; `after_touched[i]` marks surviving rows whose content changed.
fn diff(before: &[Option<RowId>], after: &[RowId], after_touched: &[bool]) -> ViewDelta {
    let old_position: HashMap<&RowId, usize> = before
        .iter()
        .enumerate()
        .filter_map(|(pos, id)| id.as_ref().map(|id| (id, pos)))
        .collect();
    let mut delta = ViewDelta {
        num_rows: after.len(),
        ..ViewDelta::default()
    };
    let mut kept = vec![false; before.len()];
    for (pos, id) in after.iter().enumerate() {
        match old_position.get(id) {
            Some(&old) => {
                kept[old] = true;
                if old != pos || after_touched[pos] {
                    delta.changed.push(pos);
                }
            }
            None => delta.added.push(pos),
        }
    }
    delta.removed = kept
        .iter()
        .enumerate()
        .filter(|(_, kept)| !**kept)
        .map(|(pos, _)| pos)
        .collect();
    delta
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn diff_matches_rows_by_identity() {
        let before = vec![
            Some(RowId::Row(0)),
            Some(RowId::Row(1)),
            None,
            Some(RowId::Row(3)),
        ];
        let after = vec![RowId::Row(0), RowId::Row(3), RowId::Row(7)];
        let delta = diff(&before, &after, &[true, false, false]);
        assert_eq!(delta.added, vec![2]);
        assert_eq!(delta.changed, vec![0, 1]);
        assert_eq!(delta.removed, vec![1, 2]);
        assert_eq!(delta.num_rows, 3);
    }
}
