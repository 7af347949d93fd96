use crate::pivot::aggregate::{Accumulator, Aggregate};
use crate::pivot::{PivotNode, RowKey};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use tabula_columnar::{ColumnType, Value};

/// Orders siblings by the aggregate at index `aggregate`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct NodeSort {
    pub aggregate: usize,
    pub descending: bool,
}

fn sort_nodes(ids: &mut [usize], sorts: &[NodeSort], key: impl Fn(usize, usize) -> Value) {
    if sorts.is_empty() {
        return;
    }
    // `sort_by` is stable, so ties keep first-seen order.
    ids.sort_by(|a, b| {
        for sort in sorts {
            let ord = key(*a, sort.aggregate).cmp(&key(*b, sort.aggregate));
            let ord = if sort.descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

#[derive(Clone, Debug)]
pub(crate) struct ColumnNode {
    pub path: Vec<Value>,
    pub depth: usize,
    pub rows: usize,
    children: Vec<usize>,
    child_index: HashMap<Value, usize>,
}

impl ColumnNode {
    fn new(path: Vec<Value>) -> Self {
        Self {
            depth: path.len(),
            path,
            rows: 0,
            children: Vec::new(),
            child_index: HashMap::new(),
        }
    }
}

/// The split_by tree. Node 0 is the root and stands for "all columns".
#[derive(Clone, Debug)]
pub(crate) struct ColumnTree {
    depth: usize,
    nodes: Vec<ColumnNode>,
}

impl ColumnTree {
    pub fn new(depth: usize) -> Self {
        Self {
            depth,
            nodes: vec![ColumnNode::new(Vec::new())],
        }
    }

    pub fn node(&self, id: usize) -> &ColumnNode {
        &self.nodes[id]
    }

    /// Root-to-leaf node ids for `path`, creating missing nodes.
    fn chain(&mut self, path: &[Value]) -> Vec<usize> {
        let mut chain = Vec::with_capacity(path.len() + 1);
        let mut current = 0;
        chain.push(current);
        for (depth, value) in path.iter().enumerate() {
            current = match self.nodes[current].child_index.get(value) {
                Some(child) => *child,
                None => {
                    let id = self.nodes.len();
                    self.nodes.push(ColumnNode::new(path[..=depth].to_vec()));
                    let parent = &mut self.nodes[current];
                    parent.children.push(id);
                    parent.child_index.insert(value.clone(), id);
                    id
                }
            };
            chain.push(current);
        }
        chain
    }

    pub fn add(&mut self, path: &[Value]) -> Vec<usize> {
        let chain = self.chain(path);
        for id in &chain {
            self.nodes[*id].rows += 1;
        }
        chain
    }

    pub fn remove(&mut self, path: &[Value]) -> Vec<usize> {
        let chain = self.chain(path);
        for id in &chain {
            let node = &mut self.nodes[*id];
            node.rows = node.rows.saturating_sub(1);
        }
        chain
    }

    /// Leaf ids with at least one row, in display order.
    pub fn leaves(&self, sorts: &[NodeSort], key: impl Fn(usize, usize) -> Value) -> Vec<usize> {
        let mut out = Vec::new();
        let mut stack = vec![0usize];
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id];
            if node.depth == self.depth {
                out.push(id);
                continue;
            }
            let mut children: Vec<usize> = node
                .children
                .iter()
                .copied()
                .filter(|c| self.nodes[*c].rows > 0)
                .collect();
            sort_nodes(&mut children, sorts, &key);
            stack.extend(children.into_iter().rev());
        }
        out
    }
}

/// Expand/collapse choices that survive a rebuild.
#[derive(Clone, Debug, Default)]
pub(crate) struct OpenState {
    open_depth: usize,
    overrides: Vec<(Vec<Value>, bool)>,
}

#[derive(Clone, Debug)]
struct Cell {
    rows: usize,
    accumulators: Vec<Accumulator>,
}

#[derive(Clone, Debug)]
pub(crate) struct RowNode {
    pub path: Vec<Value>,
    pub depth: usize,
    pub rows: usize,
    pub expanded: bool,
    children: Vec<usize>,
    child_index: HashMap<Value, usize>,
    /// Aggregates per column-tree node; key 0 holds the row totals.
    cells: HashMap<usize, Cell>,
}

/// Row tree (group_by) crossed with a [`ColumnTree`] (split_by).
///
/// Every row contributes to each node on its row path, and within each of those to every node
/// on its column path. Nodes whose row count drops to zero stay allocated but are hidden.
#[derive(Clone, Debug)]
pub(crate) struct PivotTree {
    depth: usize,
    open_depth: usize,
    aggregates: Vec<(Aggregate, ColumnType)>,
    nodes: Vec<RowNode>,
    columns: ColumnTree,
}

impl PivotTree {
    pub fn new(
        depth: usize,
        split_depth: usize,
        aggregates: Vec<(Aggregate, ColumnType)>,
        open_depth: usize,
    ) -> Self {
        let mut tree = Self {
            depth,
            open_depth,
            aggregates,
            nodes: Vec::new(),
            columns: ColumnTree::new(split_depth),
        };
        tree.nodes.push(tree.new_node(Vec::new()));
        tree
    }

    fn new_node(&self, path: Vec<Value>) -> RowNode {
        RowNode {
            depth: path.len(),
            expanded: path.len() < self.open_depth,
            path,
            rows: 0,
            children: Vec::new(),
            child_index: HashMap::new(),
            cells: HashMap::new(),
        }
    }

    pub fn node(&self, id: usize) -> &RowNode {
        &self.nodes[id]
    }

    pub fn columns(&self) -> &ColumnTree {
        &self.columns
    }

    fn chain(&mut self, path: &[Value]) -> Vec<usize> {
        let mut chain = Vec::with_capacity(path.len() + 1);
        let mut current = 0;
        chain.push(current);
        for (depth, value) in path.iter().enumerate() {
            current = match self.nodes[current].child_index.get(value) {
                Some(child) => *child,
                None => {
                    let id = self.nodes.len();
                    let node = self.new_node(path[..=depth].to_vec());
                    self.nodes.push(node);
                    let parent = &mut self.nodes[current];
                    parent.children.push(id);
                    parent.child_index.insert(value.clone(), id);
                    id
                }
            };
            chain.push(current);
        }
        chain
    }

    pub fn add_row(&mut self, row: usize, key: &RowKey, touched: &mut BTreeSet<usize>) {
        let row_chain = self.chain(&key.row_path);
        let col_chain = self.columns.add(&key.col_path);
        for id in row_chain {
            touched.insert(id);
            let aggregates = &self.aggregates;
            let node = &mut self.nodes[id];
            node.rows += 1;
            for col in &col_chain {
                let cell = node.cells.entry(*col).or_insert_with(|| Cell {
                    rows: 0,
                    accumulators: aggregates
                        .iter()
                        .map(|(agg, ty)| Accumulator::new(*agg, *ty))
                        .collect(),
                });
                cell.rows += 1;
                for (acc, value) in cell.accumulators.iter_mut().zip(&key.values) {
                    acc.add(row, value);
                }
            }
        }
    }

    pub fn remove_row(&mut self, row: usize, key: &RowKey, touched: &mut BTreeSet<usize>) {
        let row_chain = self.chain(&key.row_path);
        let col_chain = self.columns.remove(&key.col_path);
        for id in row_chain {
            touched.insert(id);
            let node = &mut self.nodes[id];
            node.rows = node.rows.saturating_sub(1);
            for col in &col_chain {
                if let Some(cell) = node.cells.get_mut(col) {
                    cell.rows = cell.rows.saturating_sub(1);
                    for (acc, value) in cell.accumulators.iter_mut().zip(&key.values) {
                        acc.remove(row, value);
                    }
                }
            }
        }
    }

    /// Aggregate `aggregate` at row node `node` restricted to column node `column`.
    pub fn value(&self, node: usize, column: usize, aggregate: usize) -> Value {
        match self.nodes[node].cells.get(&column) {
            Some(cell) if cell.rows > 0 => cell
                .accumulators
                .get(aggregate)
                .map(Accumulator::value)
                .unwrap_or_default(),
            _ => Value::Null,
        }
    }

    pub fn total(&self, node: usize, aggregate: usize) -> Value {
        self.value(node, 0, aggregate)
    }

    fn sorted_children(&self, id: usize, sorts: &[NodeSort]) -> Vec<usize> {
        let mut children: Vec<usize> = self.nodes[id]
            .children
            .iter()
            .copied()
            .filter(|c| self.nodes[*c].rows > 0)
            .collect();
        sort_nodes(&mut children, sorts, |node, agg| self.total(node, agg));
        children
    }

    /// Node ids in display order: depth-first, descending only into expanded nodes.
    pub fn visible(&self, sorts: &[NodeSort]) -> Vec<usize> {
        let mut out = Vec::new();
        let mut stack = vec![0usize];
        while let Some(id) = stack.pop() {
            out.push(id);
            let node = &self.nodes[id];
            if node.expanded && node.depth < self.depth {
                stack.extend(self.sorted_children(id, sorts).into_iter().rev());
            }
        }
        out
    }

    /// Column-tree leaves in display order, sorted by the grand total of each column node.
    pub fn column_leaves(&self, sorts: &[NodeSort]) -> Vec<usize> {
        self.columns
            .leaves(sorts, |column, agg| self.value(0, column, agg))
    }

    /// Open a node. Nodes at the deepest level have nothing to open.
    pub fn expand(&mut self, id: usize) -> bool {
        match self.nodes.get_mut(id) {
            Some(node) if node.depth < self.depth && !node.expanded => {
                node.expanded = true;
                true
            }
            _ => false,
        }
    }

    pub fn collapse(&mut self, id: usize) -> bool {
        match self.nodes.get_mut(id) {
            Some(node) if node.depth < self.depth && node.expanded => {
                node.expanded = false;
                true
            }
            _ => false,
        }
    }

    /// Open every node above `depth` and close the rest; new nodes follow the same rule.
    pub fn set_open_depth(&mut self, depth: usize) {
        self.open_depth = depth;
        for node in &mut self.nodes {
            node.expanded = node.depth < depth;
        }
    }

    /// Open depth plus every node whose open state differs from it.
    pub fn open_state(&self) -> OpenState {
        OpenState {
            open_depth: self.open_depth,
            overrides: self
                .nodes
                .iter()
                .filter(|node| node.expanded != (node.depth < self.open_depth))
                .map(|node| (node.path.clone(), node.expanded))
                .collect(),
        }
    }

    /// Reapply an [`OpenState`] to a freshly built tree. Paths that no longer exist are skipped.
    pub fn restore_open_state(&mut self, state: &OpenState) {
        self.set_open_depth(state.open_depth);
        for (path, expanded) in &state.overrides {
            if let Some(id) = self.find(path) {
                self.nodes[id].expanded = *expanded;
            }
        }
    }

    fn find(&self, path: &[Value]) -> Option<usize> {
        path.iter()
            .try_fold(0, |id, value| self.nodes[id].child_index.get(value).copied())
    }

    pub fn snapshot(&self, id: usize, sorts: &[NodeSort], names: &[String]) -> PivotNode {
        let node = &self.nodes[id];
        PivotNode {
            path: node.path.clone(),
            depth: node.depth,
            rows: node.rows,
            values: names
                .iter()
                .enumerate()
                .map(|(agg, name)| (name.clone(), self.total(id, agg)))
                .collect(),
            children: self
                .sorted_children(id, sorts)
                .into_iter()
                .map(|child| self.snapshot(child, sorts, names))
                .collect(),
        }
    }
}
