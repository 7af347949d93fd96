//! Materializing a view into owned, tabular output.

use crate::delta::{ColumnRef, Level};
use crate::error::{EngineError, EngineResult};
use crate::json::value_to_json;
use crate::schema::Schema;
use crate::table::TableState;
use crate::update::{UpdateData, INDEX_FIELD};
use crate::view::state::ViewState;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use tabula_columnar::{ColumnType, Value};

/// Name of the row-path pseudo-column in grouped output.
pub const ROW_PATH_FIELD: &str = "__ROW_PATH__";

/// Separates split_by values from the column name in output column paths.
const PATH_SEPARATOR: &str = "|";

/// Row and column window of a serialization. Ends are exclusive and clamped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerializeOptions {
    pub start_row: Option<usize>,
    pub end_row: Option<usize>,
    pub start_col: Option<usize>,
    pub end_col: Option<usize>,
    /// Add an `__INDEX__` column to flat views: the primary key, or the physical row.
    pub index: bool,
}

impl SerializeOptions {
    pub fn rows(start: usize, end: usize) -> Self {
        Self {
            start_row: Some(start),
            end_row: Some(end),
            ..Self::default()
        }
    }

    pub fn with_index(mut self) -> Self {
        self.index = true;
        self
    }
}

fn window(len: usize, start: Option<usize>, end: Option<usize>) -> std::ops::Range<usize> {
    let end = end.unwrap_or(len).min(len);
    let start = start.unwrap_or(0).min(end);
    start..end
}

#[derive(Clone, Debug, PartialEq)]
pub struct ColumnData {
    pub name: String,
    pub column_type: ColumnType,
    pub values: Vec<Value>,
}

/// A view's materialization, column by column.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ColumnarOutput {
    /// Group path of each row; present for grouped views only.
    pub row_path: Option<Vec<Vec<Value>>>,
    pub index: Option<ColumnData>,
    pub columns: Vec<ColumnData>,
}

impl ColumnarOutput {
    pub fn column(&self, name: &str) -> Option<&[Value]> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.values.as_slice())
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn num_rows(&self) -> usize {
        match (&self.row_path, self.columns.first()) {
            (Some(paths), _) => paths.len(),
            (None, Some(column)) => column.values.len(),
            (None, None) => self.index.as_ref().map_or(0, |i| i.values.len()),
        }
    }

    /// Output columns and their types, without the pseudo-columns.
    pub fn schema(&self) -> Schema {
        self.columns
            .iter()
            .map(|c| (c.name.clone(), c.column_type))
            .collect()
    }

    /// `{"__ROW_PATH__": [..], "x": [..], ..}`
    pub fn to_json_columns(&self) -> Json {
        let mut out = Map::new();
        if let Some(paths) = &self.row_path {
            out.insert(
                ROW_PATH_FIELD.to_string(),
                Json::Array(paths.iter().map(|p| path_json(p)).collect()),
            );
        }
        for column in self.index.iter().chain(&self.columns) {
            out.insert(
                column.name.clone(),
                Json::Array(column.values.iter().map(value_to_json).collect()),
            );
        }
        Json::Object(out)
    }

    /// `[{"__ROW_PATH__": [..], "x": .., ..}, ..]`
    pub fn to_json_rows(&self) -> Json {
        let rows = (0..self.num_rows())
            .map(|row| {
                let mut out = Map::new();
                if let Some(paths) = &self.row_path {
                    out.insert(ROW_PATH_FIELD.to_string(), path_json(&paths[row]));
                }
                for column in self.index.iter().chain(&self.columns) {
                    out.insert(column.name.clone(), value_to_json(&column.values[row]));
                }
                Json::Object(out)
            })
            .collect();
        Json::Array(rows)
    }

    /// CSV with a header line. Nulls are empty fields; row paths are joined with `|`.
    pub fn to_csv(&self) -> EngineResult<String> {
        let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());
        let mut header: Vec<&str> = Vec::with_capacity(self.columns.len() + 2);
        if self.row_path.is_some() {
            header.push(ROW_PATH_FIELD);
        }
        header.extend(self.index.iter().chain(&self.columns).map(|c| c.name.as_str()));
        writer.write_record(&header)?;

        for row in 0..self.num_rows() {
            let mut record: Vec<String> = Vec::with_capacity(header.len());
            if let Some(paths) = &self.row_path {
                record.push(
                    paths[row]
                        .iter()
                        .map(Value::to_string)
                        .collect::<Vec<_>>()
                        .join(PATH_SEPARATOR),
                );
            }
            for column in self.index.iter().chain(&self.columns) {
                record.push(match &column.values[row] {
                    Value::Null => String::new(),
                    value => value.to_string(),
                });
            }
            writer.write_record(&record)?;
        }

        let bytes = writer
            .into_inner()
            .map_err(|err| EngineError::Export(err.to_string()))?;
        String::from_utf8(bytes).map_err(|err| EngineError::Export(err.to_string()))
    }

    /// Arrow IPC stream bytes; row paths become a list column.
    #[cfg(feature = "arrow")]
    pub fn to_arrow(&self) -> EngineResult<Vec<u8>> {
        use tabula_columnar::arrow::{columns_to_record_batch, record_batch_to_ipc};
        use tabula_columnar::ColumnSchema;

        let columns: Vec<(ColumnSchema, Vec<Value>)> = self
            .index
            .iter()
            .chain(&self.columns)
            .map(|c| (ColumnSchema::new(c.name.clone(), c.column_type), c.values.clone()))
            .collect();
        let batch = columns_to_record_batch(self.row_path.as_deref(), &columns)?;
        Ok(record_batch_to_ipc(&batch)?)
    }

    /// The output columns as update data, e.g. to append to a table with a matching schema.
    ///
    /// Update data carries no types; use [`crate::Engine::table_from_output`] to create a table
    /// with the output's schema.
    pub fn into_update_data(self) -> UpdateData {
        UpdateData::from_columns(
            self.columns
                .into_iter()
                .map(|c| (c.name, c.values))
                .collect(),
        )
    }
}

fn path_json(path: &[Value]) -> Json {
    Json::Array(path.iter().map(value_to_json).collect())
}

/// One output column: a column-tree leaf crossed with a visible column slot.
struct OutputSpec {
    name: String,
    leaf: usize,
    slot: usize,
    column_type: ColumnType,
}

fn output_specs(state: &ViewState) -> Vec<OutputSpec> {
    let split = !state.plan.split_by.is_empty();
    let columns = state.tree().columns();
    let mut specs = Vec::with_capacity(state.leaves().len() * state.plan.columns.len());
    for &leaf in state.leaves() {
        let path = &columns.node(leaf).path;
        for (slot, column) in state.plan.columns.iter().enumerate() {
            let name = if split {
                let mut parts: Vec<String> = path.iter().map(Value::to_string).collect();
                parts.push(column.name.clone());
                parts.join(PATH_SEPARATOR)
            } else {
                column.name.clone()
            };
            specs.push(OutputSpec {
                name,
                leaf,
                slot,
                column_type: state.plan.output_type(column),
            });
        }
    }
    specs
}

/// Output column identifiers in serialization order.
pub(crate) fn column_paths(state: &ViewState) -> Vec<String> {
    let row_path = state
        .is_grouped()
        .then(|| ROW_PATH_FIELD.to_string());
    row_path
        .into_iter()
        .chain(output_specs(state).into_iter().map(|spec| spec.name))
        .collect()
}

pub(crate) fn num_output_columns(state: &ViewState) -> usize {
    state.leaves().len() * state.plan.columns.len()
}

pub(crate) fn materialize(
    state: &ViewState,
    table: &TableState,
    options: &SerializeOptions,
) -> ColumnarOutput {
    let specs = output_specs(state);
    let col_window = window(specs.len(), options.start_col, options.end_col);
    let specs = &specs[col_window];
    let visible = state.visible();
    let rows = &visible[window(visible.len(), options.start_row, options.end_row)];
    let tree = state.tree();

    if state.is_grouped() {
        let columns = specs
            .iter()
            .map(|spec| ColumnData {
                name: spec.name.clone(),
                column_type: spec.column_type,
                values: rows
                    .iter()
                    .map(|node| tree.value(*node, spec.leaf, spec.slot))
                    .collect(),
            })
            .collect();
        return ColumnarOutput {
            row_path: Some(rows.iter().map(|node| tree.node(*node).path.clone()).collect()),
            index: None,
            columns,
        };
    }

    let catalog = state.catalog(table);
    let split_paths: Option<Vec<Vec<Value>>> = (!state.plan.split_by.is_empty()).then(|| {
        rows.iter()
            .map(|row| {
                state
                    .plan
                    .split_by
                    .iter()
                    .map(|column| catalog.get(*row, *column))
                    .collect()
            })
            .collect()
    });
    let columns = specs
        .iter()
        .map(|spec| {
            let column = state.plan.columns[spec.slot].column;
            let leaf_path = &tree.columns().node(spec.leaf).path;
            let values = rows
                .iter()
                .enumerate()
                .map(|(pos, row)| match &split_paths {
                    Some(paths) if &paths[pos] != leaf_path => Value::Null,
                    _ => catalog.get(*row, column),
                })
                .collect();
            ColumnData {
                name: spec.name.clone(),
                column_type: spec.column_type,
                values,
            }
        })
        .collect();

    let index = options.index.then(|| match &table.key_index {
        Some(key) => {
            let column = ColumnRef::new(Level::Base, key.column);
            ColumnData {
                name: INDEX_FIELD.to_string(),
                column_type: catalog.column_type(column),
                values: rows.iter().map(|row| catalog.get(*row, column)).collect(),
            }
        }
        None => ColumnData {
            name: INDEX_FIELD.to_string(),
            column_type: ColumnType::Integer,
            values: rows
                .iter()
                .map(|row| Value::Integer(*row as i64))
                .collect(),
        },
    });

    ColumnarOutput {
        row_path: None,
        index,
        columns,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn output() -> ColumnarOutput {
        ColumnarOutput {
            row_path: Some(vec![vec![], vec![Value::from("a")], vec![Value::Null]]),
            index: None,
            columns: vec![ColumnData {
                name: "v".into(),
                column_type: ColumnType::Integer,
                values: vec![Value::Integer(3), Value::Integer(1), Value::Null],
            }],
        }
    }

    #[test]
    fn windows_are_clamped() {
        assert_eq!(window(5, None, None), 0..5);
        assert_eq!(window(5, Some(2), Some(10)), 2..5);
        assert_eq!(window(5, Some(7), Some(3)), 3..3);
    }

    #[test]
    fn json_shapes() {
        let out = output();
        assert_eq!(
            out.to_json_columns(),
            json!({"__ROW_PATH__": [[], ["a"], [null]], "v": [3, 1, null]})
        );
        assert_eq!(
            out.to_json_rows()[1],
            json!({"__ROW_PATH__": ["a"], "v": 1})
        );
    }

    #[test]
    fn csv_leaves_nulls_empty() {
        let csv = output().to_csv().unwrap();
        assert_eq!(csv, "__ROW_PATH__,v\n,3\na,1\nnull,\n");
    }
}
