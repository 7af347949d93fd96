#![allow(dead_code)]

use tabula_engine::{
    Engine, EngineOptions, Table, TableOptions, UpdateData, Value, View, ViewConfig,
};

pub fn engine() -> Engine {
    Engine::default()
}

/// An engine that compacts as soon as half the rows are dead, whatever the table size.
pub fn eager_engine() -> Engine {
    Engine::new(EngineOptions {
        compaction_ratio: 0.5,
        compaction_min_rows: 0,
    })
}

pub fn ints(values: &[i64]) -> Vec<Value> {
    values.iter().map(|v| Value::Integer(*v)).collect()
}

pub fn floats(values: &[f64]) -> Vec<Value> {
    values.iter().map(|v| Value::Float(*v)).collect()
}

pub fn strs(values: &[&str]) -> Vec<Value> {
    values.iter().map(|v| Value::from(*v)).collect()
}

pub fn bools(values: &[bool]) -> Vec<Value> {
    values.iter().map(|v| Value::Boolean(*v)).collect()
}

/// `{w: float, x: integer, y: string, z: boolean}` with four rows and unique `y` values.
pub fn data_7() -> UpdateData {
    UpdateData::columns([
        ("w", floats(&[1.5, 2.5, 3.5, 4.5])),
        ("x", ints(&[1, 2, 3, 4])),
        ("y", strs(&["a", "b", "c", "d"])),
        ("z", bools(&[true, false, true, false])),
    ])
}

pub fn table(data: UpdateData, options: TableOptions) -> Table {
    engine().table(data, options).unwrap()
}

/// Values of one output column.
pub fn column(view: &View, name: &str) -> Vec<Value> {
    let output = view.to_columns().unwrap();
    output
        .column(name)
        .unwrap_or_else(|| panic!("no column {name} in {:?}", output.column_names()))
        .to_vec()
}

/// Row paths of a grouped view.
pub fn row_paths(view: &View) -> Vec<Vec<Value>> {
    view.to_columns().unwrap().row_path.expect("grouped view")
}

/// A freshly built view with the same config, for comparing against a live one.
pub fn rebuilt(table: &Table, view: &View) -> View {
    table.view(view.config().unwrap()).unwrap()
}

pub fn config_json(json: serde_json::Value) -> ViewConfig {
    serde_json::from_value(json).unwrap()
}
