//! Row and column pivot trees with incrementally maintained aggregates.

mod aggregate;
pub(crate) mod tree;

pub use aggregate::Aggregate;

use crate::json::value_to_json;
use serde_json::Value as Json;
use tabula_columnar::Value;

/// Where one table row lands in a pivot: its group_by path, its split_by path and the values
/// it contributes to each aggregate slot.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct RowKey {
    pub row_path: Vec<Value>,
    pub col_path: Vec<Value>,
    pub values: Vec<Value>,
}

/// Snapshot of one row-tree node and its descendants, as returned by
/// [`View::row_tree`](crate::View::row_tree).
///
/// `values` holds the total (all split_by columns combined) for each output column. Children are
/// listed in display order, including the children of collapsed nodes.
#[derive(Clone, Debug, PartialEq)]
pub struct PivotNode {
    pub path: Vec<Value>,
    pub depth: usize,
    pub rows: usize,
    pub values: Vec<(String, Value)>,
    pub children: Vec<PivotNode>,
}

impl PivotNode {
    pub fn value(&self, column: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// Depth-first search for the node at `path`.
    pub fn find(&self, path: &[Value]) -> Option<&PivotNode> {
        if self.path == path {
            return Some(self);
        }
        self.children
            .iter()
            .filter(|child| path.starts_with(&child.path))
            .find_map(|child| child.find(path))
    }

    pub fn to_json(&self) -> Json {
        let values = self
            .values
            .iter()
            .map(|(name, value)| (name.clone(), value_to_json(value)))
            .collect::<serde_json::Map<_, _>>();
        serde_json::json!({
            "path": self.path.iter().map(value_to_json).collect::<Vec<_>>(),
            "depth": self.depth,
            "rows": self.rows,
            "values": values,
            "children": self.children.iter().map(PivotNode::to_json).collect::<Vec<_>>(),
        })
    }
}
