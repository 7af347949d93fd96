//! A [`ViewConfig`] resolved against the columns it can see.

use crate::delta::{ColumnRef, Level};
use crate::error::{EngineError, EngineResult};
use crate::expression::ExpressionEngine;
use crate::pivot::tree::{NodeSort, PivotTree};
use crate::pivot::{Aggregate, RowKey};
use crate::schema::Schema;
use crate::source::{Catalog, CellReader};
use crate::view::config::ViewConfig;
use crate::view::filter::CompiledFilter;
use std::collections::BTreeSet;
use tabula_columnar::{ColumnType, Value};

#[derive(Clone, Debug)]
pub(crate) struct OutputColumn {
    pub name: String,
    pub column: ColumnRef,
    pub column_type: ColumnType,
    pub aggregate: Aggregate,
}

#[derive(Clone, Debug)]
pub(crate) struct ViewPlan {
    /// Visible columns, in output order.
    pub columns: Vec<OutputColumn>,
    /// Aggregated only so rows can be sorted by them.
    pub hidden: Vec<OutputColumn>,
    pub group_by: Vec<ColumnRef>,
    pub split_by: Vec<ColumnRef>,
    /// Sibling order in grouped views, by aggregate slot.
    pub node_sorts: Vec<NodeSort>,
    /// Row order in flat views, by raw value.
    pub row_sorts: Vec<(ColumnRef, bool)>,
    pub column_sorts: Vec<NodeSort>,
    pub filters: Vec<CompiledFilter>,
    /// Base and table columns whose changes can affect this view.
    pub relevant: BTreeSet<ColumnRef>,
    pub open_depth: usize,
}

impl ViewPlan {
    pub fn resolve(
        config: &ViewConfig,
        catalog: &Catalog<'_>,
        expressions: &ExpressionEngine,
    ) -> EngineResult<Self> {
        let lookup = |name: &str| {
            catalog
                .resolve(name)
                .ok_or_else(|| EngineError::UnknownColumn(name.to_string()))
        };

        let mut aggregates = Vec::with_capacity(config.aggregates.len());
        for (name, aggregate) in &config.aggregates {
            lookup(name.as_str())?;
            let parsed = Aggregate::parse(aggregate).ok_or_else(|| EngineError::UnknownAggregate {
                column: name.clone(),
                aggregate: aggregate.clone(),
            })?;
            aggregates.push((name.as_str(), parsed));
        }
        let output = |name: &str| -> EngineResult<OutputColumn> {
            let (column, column_type) = lookup(name)?;
            let aggregate = aggregates
                .iter()
                .find(|(n, _)| *n == name)
                .map(|(_, agg)| *agg)
                .unwrap_or_else(|| Aggregate::default_for(column_type));
            Ok(OutputColumn {
                name: name.to_string(),
                column,
                column_type,
                aggregate,
            })
        };

        let names: Vec<String> = match &config.columns {
            Some(columns) => columns.clone(),
            None => catalog.columns().into_iter().map(|(name, _, _)| name).collect(),
        };
        let columns = names
            .iter()
            .map(|name| output(name.as_str()))
            .collect::<EngineResult<Vec<_>>>()?;
        let group_by = config
            .group_by
            .iter()
            .map(|name| lookup(name.as_str()).map(|(column, _)| column))
            .collect::<EngineResult<Vec<_>>>()?;
        let split_by = config
            .split_by
            .iter()
            .map(|name| lookup(name.as_str()).map(|(column, _)| column))
            .collect::<EngineResult<Vec<_>>>()?;

        let mut hidden = Vec::new();
        let mut node_sorts = Vec::new();
        let mut row_sorts = Vec::new();
        let mut column_sorts = Vec::new();
        for sort in &config.sort {
            let (column, _) = lookup(sort.column.as_str())?;
            let slot = match columns.iter().position(|c| c.name == sort.column) {
                Some(slot) => slot,
                None if config.aggregates.contains_key(&sort.column) => {
                    match hidden.iter().position(|c: &OutputColumn| c.name == sort.column) {
                        Some(pos) => columns.len() + pos,
                        None => {
                            hidden.push(output(sort.column.as_str())?);
                            columns.len() + hidden.len() - 1
                        }
                    }
                }
                None => return Err(EngineError::SortColumnNotVisible(sort.column.clone())),
            };
            let node_sort = NodeSort {
                aggregate: slot,
                descending: sort.dir.is_descending(),
            };
            if sort.dir.sorts_columns() {
                column_sorts.push(node_sort);
            } else {
                node_sorts.push(node_sort);
                row_sorts.push((column, sort.dir.is_descending()));
            }
        }

        let mut filters = Vec::with_capacity(config.filter.len());
        for filter in &config.filter {
            let (column, column_type) = lookup(filter.column.as_str())?;
            filters.push(CompiledFilter::compile(filter, column, column_type)?);
        }

        let mut touched: BTreeSet<ColumnRef> = columns
            .iter()
            .chain(&hidden)
            .map(|c| c.column)
            .chain(group_by.iter().copied())
            .chain(split_by.iter().copied())
            .chain(row_sorts.iter().map(|(column, _)| *column))
            .chain(filters.iter().map(|f| f.column))
            .collect();
        let view_level: Vec<ColumnRef> = touched
            .iter()
            .copied()
            .filter(|c| c.level == Level::View)
            .collect();
        for column in view_level {
            touched.remove(&column);
            touched.extend(expressions.lower_dependencies(column.index));
        }

        Ok(Self {
            open_depth: config.group_by_depth.unwrap_or(group_by.len()),
            columns,
            hidden,
            group_by,
            split_by,
            node_sorts,
            row_sorts,
            column_sorts,
            filters,
            relevant: touched,
        })
    }

    pub fn is_grouped(&self) -> bool {
        !self.group_by.is_empty()
    }

    /// Aggregate slots: visible columns then hidden sort columns.
    pub fn slots(&self) -> impl Iterator<Item = &OutputColumn> + '_ {
        self.columns.iter().chain(&self.hidden)
    }

    pub fn new_tree(&self) -> PivotTree {
        let aggregates = if self.is_grouped() {
            self.slots().map(|c| (c.aggregate, c.column_type)).collect()
        } else {
            Vec::new()
        };
        PivotTree::new(
            self.group_by.len(),
            self.split_by.len(),
            aggregates,
            self.open_depth,
        )
    }

    pub fn accepts(&self, row: usize, reader: &impl CellReader) -> bool {
        self.filters
            .iter()
            .all(|filter| filter.matches(&reader.cell(row, filter.column)))
    }

    pub fn key(&self, row: usize, reader: &impl CellReader) -> RowKey {
        let cells = |columns: &[ColumnRef]| -> Vec<Value> {
            columns.iter().map(|c| reader.cell(row, *c)).collect()
        };
        RowKey {
            row_path: cells(self.group_by.as_slice()),
            col_path: cells(self.split_by.as_slice()),
            values: if self.is_grouped() {
                self.slots().map(|c| reader.cell(row, c.column)).collect()
            } else {
                Vec::new()
            },
        }
    }

    /// Output type of a column: the aggregate's type in grouped views, the column's own type
    /// otherwise.
    pub fn output_type(&self, column: &OutputColumn) -> ColumnType {
        if self.is_grouped() {
            column.aggregate.output_type(column.column_type)
        } else {
            column.column_type
        }
    }

    pub fn schema(&self) -> Schema {
        self.columns
            .iter()
            .map(|c| (c.name.clone(), self.output_type(c)))
            .collect()
    }
}
