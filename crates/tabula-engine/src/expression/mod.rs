//! Computed columns.
//!
//! An [`ExpressionEngine`] owns one layer of computed columns (the table's, or one view's) and
//! stores their values in a [`ColumnStore`] aligned row-for-row with the table's base store.
//! Inputs must exist when a column is defined, so definition order is always a valid
//! topological order of the dependency DAG; batches submitted together are ordered first and
//! rejected as a whole when they contain a cycle.

mod def;
mod functions;

pub use def::{ExpressionDef, FunctionSpec, Operand};
pub use functions::{CustomFn, NullPolicy, ScalarFn};

use crate::delta::{CellChanges, ColumnRef, Level, TableDelta};
use crate::error::{EngineError, EngineResult};
use crate::schema::Schema;
use crate::source::Catalog;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use tabula_columnar::{coerce_value, ColumnSchema, ColumnStore, ColumnType, Value};

#[derive(Clone, Debug)]
enum Input {
    Column(ColumnRef),
    Literal(Value),
}

#[derive(Clone, Debug)]
struct Compiled {
    name: String,
    def: ExpressionDef,
    function: ScalarFn,
    inputs: Vec<Input>,
    output_type: ColumnType,
}

#[derive(Clone, Debug)]
pub struct ExpressionEngine {
    level: Level,
    expressions: Vec<Compiled>,
    by_name: HashMap<String, usize>,
    store: ColumnStore,
}

impl ExpressionEngine {
    pub(crate) fn new(level: Level, rows: usize) -> Self {
        let mut store = ColumnStore::default();
        store.append_nulls(rows);
        Self {
            level,
            expressions: Vec::new(),
            by_name: HashMap::new(),
            store,
        }
    }

    pub fn len(&self) -> usize {
        self.expressions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expressions.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.expressions.iter().map(|e| e.name.as_str())
    }

    pub fn definition(&self, name: &str) -> Option<&ExpressionDef> {
        self.by_name.get(name).map(|idx| &self.expressions[*idx].def)
    }

    /// Definitions in definition order.
    pub fn definitions(&self) -> Vec<(String, ExpressionDef)> {
        self.expressions
            .iter()
            .map(|e| (e.name.clone(), e.def.clone()))
            .collect()
    }

    pub fn schema(&self) -> Schema {
        self.expressions
            .iter()
            .map(|e| (e.name.clone(), e.output_type))
            .collect()
    }

    pub(crate) fn resolve(&self, name: &str) -> Option<(ColumnRef, ColumnType)> {
        self.by_name
            .get(name)
            .map(|idx| (ColumnRef::new(self.level, *idx), self.expressions[*idx].output_type))
    }

    pub(crate) fn get(&self, row: usize, idx: usize) -> Value {
        self.store.get(row, idx)
    }

    pub(crate) fn column_type(&self, idx: usize) -> Option<ColumnType> {
        self.expressions.get(idx).map(|e| e.output_type)
    }

    pub(crate) fn columns(&self) -> Vec<(String, ColumnRef, ColumnType)> {
        self.expressions
            .iter()
            .enumerate()
            .map(|(idx, e)| (e.name.clone(), ColumnRef::new(self.level, idx), e.output_type))
            .collect()
    }

    /// Define one computed column and evaluate it for every live row.
    ///
    /// Returns `false` when an identical definition already exists.
    pub(crate) fn define(
        &mut self,
        name: &str,
        def: &ExpressionDef,
        lower: &Catalog<'_>,
    ) -> EngineResult<bool> {
        self.define_with(name, def, lower, true)
    }

    fn define_with(
        &mut self,
        name: &str,
        def: &ExpressionDef,
        lower: &Catalog<'_>,
        evaluate: bool,
    ) -> EngineResult<bool> {
        if lower.resolve(name).is_some() {
            return Err(EngineError::DuplicateColumn(name.to_string()));
        }
        if let Some(idx) = self.by_name.get(name) {
            return if self.expressions[*idx].def == *def {
                Ok(false)
            } else {
                Err(EngineError::ExpressionConflict {
                    column: name.to_string(),
                })
            };
        }

        let function = ScalarFn::resolve(&def.function)?;
        if def.inputs.len() != function.arity() {
            return Err(EngineError::Arity {
                column: name.to_string(),
                function: function.name().to_string(),
                expected: function.arity(),
                actual: def.inputs.len(),
            });
        }

        let mut inputs = Vec::with_capacity(def.inputs.len());
        let mut types = Vec::with_capacity(def.inputs.len());
        for operand in &def.inputs {
            match operand {
                Operand::Column(column) if column == name => {
                    return Err(EngineError::DependencyCycle {
                        path: vec![name.to_string(), name.to_string()],
                    });
                }
                Operand::Column(column) => {
                    let (column_ref, ty) = self
                        .resolve(column)
                        .or_else(|| lower.resolve(column))
                        .ok_or_else(|| EngineError::UnknownColumn(column.clone()))?;
                    inputs.push(Input::Column(column_ref));
                    types.push(ty);
                }
                Operand::Literal(value) => {
                    // A null literal can stand in for any numeric input.
                    types.push(value.column_type().unwrap_or(ColumnType::Float));
                    inputs.push(Input::Literal(value.clone()));
                }
            }
        }

        let output_type =
            function
                .output_type(&types)
                .map_err(|input_type| EngineError::UnsupportedInput {
                    column: name.to_string(),
                    function: function.name().to_string(),
                    input_type,
                })?;
        match def.output_type {
            Some(declared) if declared != output_type => {
                return Err(EngineError::ExpressionType {
                    column: name.to_string(),
                    declared,
                    inferred: output_type,
                });
            }
            _ => {}
        }

        let idx = self
            .store
            .add_column(ColumnSchema::new(name, output_type))?;
        self.expressions.push(Compiled {
            name: name.to_string(),
            def: def.clone(),
            function,
            inputs,
            output_type,
        });
        self.by_name.insert(name.to_string(), idx);

        if evaluate {
            self.sync_len(lower);
            let rows: Vec<usize> = lower.live_rows().collect();
            for row in rows {
                let value = self.eval(idx, row, lower);
                self.store.write_coerced(row, idx, value);
            }
        }
        log::debug!("defined computed column {name}: {output_type}");
        Ok(true)
    }

    /// Define a batch, ordering it so that every column follows its inputs.
    pub(crate) fn define_all(
        &mut self,
        defs: &[(String, ExpressionDef)],
        lower: &Catalog<'_>,
    ) -> EngineResult<()> {
        let (order, cyclic) = batch_order(defs);
        if let Some(first) = cyclic.first() {
            return Err(EngineError::DependencyCycle {
                path: cycle_path(defs, *first, &cyclic),
            });
        }
        for idx in order {
            let (name, def) = &defs[idx];
            self.define(name, def, lower)?;
        }
        Ok(())
    }

    /// Recompute the computed cells affected by `delta`.
    ///
    /// Appended rows are evaluated in full; updated rows only for computed columns whose
    /// (transitive) inputs changed at that row. Returns the computed cells that changed, with
    /// their previous values.
    pub(crate) fn apply_delta(&mut self, delta: &TableDelta, lower: &Catalog<'_>) -> CellChanges {
        let mut changes = CellChanges::default();
        if delta.compaction.is_some() {
            self.rebuild(lower);
            return changes;
        }
        self.sync_len(lower);
        if self.expressions.is_empty() {
            return changes;
        }

        let mut dirty: HashMap<ColumnRef, BTreeSet<usize>> = HashMap::new();
        for column in delta.changes.columns() {
            dirty
                .entry(column)
                .or_default()
                .extend(delta.changes.rows_of(column));
        }

        for idx in 0..self.expressions.len() {
            let own = ColumnRef::new(self.level, idx);
            let mut rows: BTreeSet<usize> = delta.appended.clone().collect();
            for input in &self.expressions[idx].inputs {
                if let Input::Column(column) = input {
                    if let Some(changed) = dirty.get(column) {
                        rows.extend(changed.iter().copied());
                    }
                }
            }

            let mut touched = BTreeSet::new();
            for row in rows {
                if !lower.is_live(row) {
                    continue;
                }
                let value = self.eval(idx, row, lower);
                if let Some(previous) = self.store.write_coerced(row, idx, value) {
                    if !delta.appended.contains(&row) {
                        changes.record(own, row, previous);
                        touched.insert(row);
                    }
                }
            }
            if !touched.is_empty() {
                dirty.insert(own, touched);
            }
        }
        changes
    }

    /// Re-evaluate everything, e.g. after the base store was compacted.
    pub(crate) fn rebuild(&mut self, lower: &Catalog<'_>) {
        self.store = self.store.cleared();
        self.store.append_nulls(lower.rows());
        let rows: Vec<usize> = lower.live_rows().collect();
        for idx in 0..self.expressions.len() {
            for &row in &rows {
                let value = self.eval(idx, row, lower);
                self.store.write_coerced(row, idx, value);
            }
        }
    }

    /// Lower-level columns `idx` reads, following chains through this layer.
    pub(crate) fn lower_dependencies(&self, idx: usize) -> BTreeSet<ColumnRef> {
        let mut out = BTreeSet::new();
        let mut stack = vec![idx];
        let mut seen = BTreeSet::new();
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            for input in &self.expressions[current].inputs {
                match input {
                    Input::Column(column) if column.level == self.level => stack.push(column.index),
                    Input::Column(column) => {
                        out.insert(*column);
                    }
                    Input::Literal(_) => {}
                }
            }
        }
        out
    }

    fn sync_len(&mut self, lower: &Catalog<'_>) {
        let target = lower.rows();
        if self.store.len() < target {
            self.store.append_nulls(target - self.store.len());
        }
    }

    fn eval(&self, idx: usize, row: usize, lower: &Catalog<'_>) -> Value {
        let expr = &self.expressions[idx];
        let args: Vec<Value> = expr
            .inputs
            .iter()
            .map(|input| match input {
                Input::Column(column) if column.level == self.level => {
                    self.store.get(row, column.index)
                }
                Input::Column(column) => lower.get(row, *column),
                Input::Literal(value) => value.clone(),
            })
            .collect();
        let out = expr.function.eval(&args);
        coerce_value(&expr.name, &out, expr.output_type).unwrap_or(Value::Null)
    }
}

/// Order a batch so each definition follows the batch members it reads.
///
/// Returns the acyclic order and, separately, the members that sit on or behind a cycle.
fn batch_order(defs: &[(String, ExpressionDef)]) -> (Vec<usize>, Vec<usize>) {
    let mut position: HashMap<&str, usize> = HashMap::new();
    for (idx, (name, _)) in defs.iter().enumerate() {
        position.entry(name.as_str()).or_insert(idx);
    }
    let mut indegree = vec![0usize; defs.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); defs.len()];
    for (idx, (_, def)) in defs.iter().enumerate() {
        for input in def.column_inputs() {
            if let Some(&dep) = position.get(input) {
                if dep != idx {
                    indegree[idx] += 1;
                    dependents[dep].push(idx);
                }
            }
        }
    }

    let mut ready: BTreeSet<usize> = (0..defs.len()).filter(|i| indegree[*i] == 0).collect();
    let mut order = Vec::with_capacity(defs.len());
    while let Some(idx) = ready.pop_first() {
        order.push(idx);
        for &next in &dependents[idx] {
            indegree[next] -= 1;
            if indegree[next] == 0 {
                ready.insert(next);
            }
        }
    }
    let cyclic = (0..defs.len()).filter(|i| indegree[*i] > 0).collect();
    (order, cyclic)
}

/// Follow unresolved inputs from `start` until a name repeats.
fn cycle_path(defs: &[(String, ExpressionDef)], start: usize, cyclic: &[usize]) -> Vec<String> {
    let mut path: Vec<usize> = vec![start];
    let mut current = start;
    loop {
        let next = defs[current].1.column_inputs().find_map(|input| {
            cyclic
                .iter()
                .copied()
                .find(|idx| defs[*idx].0 == input && *idx != current)
        });
        let Some(next) = next else { break };
        if let Some(pos) = path.iter().position(|p| *p == next) {
            let mut names: Vec<String> = path[pos..].iter().map(|i| defs[*i].0.clone()).collect();
            names.push(defs[next].0.clone());
            return names;
        }
        path.push(next);
        current = next;
    }
    path.iter().map(|i| defs[*i].0.clone()).collect()
}

/// One invalid definition reported by [`validate_expressions`](crate::validate_expressions).
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ExpressionValidationError {
    pub column: String,
    /// Zero-based position of the definition in the submitted list.
    pub line: usize,
    pub error_message: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExpressionValidation {
    /// Output types of the definitions that are valid.
    pub expression_schema: Schema,
    pub errors: Vec<ExpressionValidationError>,
}

impl ExpressionValidation {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

pub(crate) fn validate(
    defs: &[(String, ExpressionDef)],
    lower: &Catalog<'_>,
) -> ExpressionValidation {
    let (order, cyclic) = batch_order(defs);
    let mut scratch = ExpressionEngine::new(Level::View, 0);
    let mut errors: Vec<ExpressionValidationError> = Vec::new();

    for &idx in &cyclic {
        let err = EngineError::DependencyCycle {
            path: cycle_path(defs, idx, &cyclic),
        };
        errors.push(ExpressionValidationError {
            column: defs[idx].0.clone(),
            line: idx,
            error_message: err.to_string(),
        });
    }
    for idx in order {
        let (name, def) = &defs[idx];
        if let Err(err) = scratch.define_with(name, def, lower, false) {
            errors.push(ExpressionValidationError {
                column: name.clone(),
                line: idx,
                error_message: err.to_string(),
            });
        }
    }
    errors.sort_by_key(|e| e.line);

    let expression_schema = defs
        .iter()
        .enumerate()
        .filter(|(idx, _)| !errors.iter().any(|e| e.line == *idx))
        .filter_map(|(_, (name, _))| scratch.resolve(name).map(|(_, ty)| (name.clone(), ty)))
        .collect();
    ExpressionValidation {
        expression_schema,
        errors,
    }
}
