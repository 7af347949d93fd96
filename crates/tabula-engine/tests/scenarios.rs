mod common;

use common::*;
use pretty_assertions::assert_eq;
use serde_json::json;
use tabula_engine::{
    ColumnType, ExpressionDef, Row, Schema, SortDir, TableOptions, UpdateData, Value, ViewConfig,
    INDEX_FIELD,
};

#[test]
fn distinct_counts_per_group() {
    let table = table(
        UpdateData::columns([
            ("x", ints(&[1, 2, 3, 4])),
            ("y", strs(&["a", "b", "c", "d"])),
            ("z", bools(&[true, false, true, false])),
        ]),
        TableOptions::default(),
    );
    let view = table
        .view(
            ViewConfig::new()
                .with_group_by(["x"])
                .with_aggregate("y", "distinct count")
                .with_aggregate("z", "distinct count"),
        )
        .unwrap();

    let rows = view.to_json().unwrap();
    assert_eq!(
        rows,
        json!([
            {"__ROW_PATH__": [], "x": 10, "y": 4, "z": 2},
            {"__ROW_PATH__": [1], "x": 1, "y": 1, "z": 1},
            {"__ROW_PATH__": [2], "x": 2, "y": 1, "z": 1},
            {"__ROW_PATH__": [3], "x": 3, "y": 1, "z": 1},
            {"__ROW_PATH__": [4], "x": 4, "y": 1, "z": 1},
        ])
    );
    assert_eq!(view.schema().unwrap().get("y"), Some(ColumnType::Integer));
}

#[test]
fn partial_update_by_row_index_recomputes_one_row() {
    let table = table(
        UpdateData::columns([("x", ints(&[1, 2, 3, 4])), ("y", ints(&[2, 4, 6, 8]))]),
        TableOptions::default(),
    );
    table
        .add_computed_column("multiply", ExpressionDef::new("*", ["x", "y"]))
        .unwrap();
    let view = table.view(ViewConfig::default()).unwrap();
    assert_eq!(
        view.to_json().unwrap(),
        json!([
            {"x": 1, "y": 2, "multiply": 2.0},
            {"x": 2, "y": 4, "multiply": 8.0},
            {"x": 3, "y": 6, "multiply": 18.0},
            {"x": 4, "y": 8, "multiply": 32.0},
        ])
    );

    table
        .update(vec![Row::new().with(INDEX_FIELD, 0).with("x", 10)])
        .unwrap();
    assert_eq!(
        view.to_json().unwrap(),
        json!([
            {"x": 10, "y": 2, "multiply": 20.0},
            {"x": 2, "y": 4, "multiply": 8.0},
            {"x": 3, "y": 6, "multiply": 18.0},
            {"x": 4, "y": 8, "multiply": 32.0},
        ])
    );
    assert_eq!(table.size().unwrap(), 4);
}

#[test]
fn explicit_null_clears_computed_value() {
    let schema = Schema::new()
        .with("w", ColumnType::Float)
        .with("x", ColumnType::Integer)
        .with("y", ColumnType::String)
        .with("z", ColumnType::Boolean);
    let table = engine()
        .table_from_schema(schema, TableOptions::indexed("x"))
        .unwrap();
    table.update(data_7()).unwrap();
    let view = table
        .view(ViewConfig::new().with_expression("int+float", ExpressionDef::new("+", ["w", "x"])))
        .unwrap();
    assert_eq!(column(&view, "int+float"), floats(&[2.5, 4.5, 6.5, 8.5]));

    table
        .update(UpdateData::columns([
            ("x", ints(&[2, 4])),
            ("w", vec![Value::Null, Value::Float(12.5)]),
        ]))
        .unwrap();
    assert_eq!(
        column(&view, "int+float"),
        vec![
            Value::Float(2.5),
            Value::Null,
            Value::Float(6.5),
            Value::Float(16.5),
        ]
    );
    assert_eq!(column(&view, "y"), strs(&["a", "b", "c", "d"]));
}

#[test]
fn split_by_produces_one_column_per_value_and_column() {
    let table = table(data_7(), TableOptions::default());
    let view = table.view(ViewConfig::new().with_split_by(["y"])).unwrap();

    let paths = view.column_paths().unwrap();
    assert_eq!(paths.len(), 16);
    assert_eq!(&paths[..5], &["a|w", "a|x", "a|y", "a|z", "b|w"]);

    let output = view.to_columns().unwrap();
    assert_eq!(output.column_names(), paths.iter().map(String::as_str).collect::<Vec<_>>());
    for (leaf, y) in ["a", "b", "c", "d"].into_iter().enumerate() {
        for name in ["w", "x", "y", "z"] {
            let values = output.column(&format!("{y}|{name}")).unwrap();
            assert_eq!(values.len(), 4);
            let present: Vec<usize> = values
                .iter()
                .enumerate()
                .filter(|(_, v)| !v.is_null())
                .map(|(row, _)| row)
                .collect();
            assert_eq!(present, vec![leaf], "{y}|{name}");
        }
    }
    assert_eq!(output.column("c|y").unwrap()[2], Value::from("c"));
}

#[test]
fn dropping_expressions_keeps_plain_columns() {
    let table = table(data_7(), TableOptions::default());
    let config = config_json(json!({
        "columns": ["x", "y", "double", "label"],
        "group_by": ["double"],
        "sort": [["double", "desc"]],
        "filter": [["double", ">", 2]],
        "expressions": {
            "double": {"function": "*", "inputs": ["x", 2]},
            "label": {"function": "uppercase", "inputs": ["y"]},
        },
    }));
    let view = table.view(config.clone()).unwrap();
    assert_eq!(view.num_rows().unwrap(), 4);

    let restored = config.drop_expressions(&["double"]);
    assert_eq!(
        restored.columns,
        Some(vec!["x".to_string(), "y".to_string(), "label".to_string()])
    );
    assert!(restored.group_by.is_empty());
    assert!(restored.sort.is_empty());
    assert!(restored.filter.is_empty());

    let view = table.view(restored).unwrap();
    assert_eq!(column(&view, "x"), ints(&[1, 2, 3, 4]));
    assert_eq!(column(&view, "label"), strs(&["A", "B", "C", "D"]));
    assert_eq!(table.schema().unwrap().len(), 4);
}

#[test]
fn expanding_past_the_deepest_level_is_a_no_op() {
    let table = table(data_7(), TableOptions::default());
    let view = table.view(ViewConfig::new().with_group_by(["y"])).unwrap();
    assert_eq!(view.num_rows().unwrap(), 5);
    let before = view.to_columns().unwrap();

    assert_eq!(view.expand(1).unwrap(), 1);
    assert_eq!(view.expand(42).unwrap(), 42);
    assert_eq!(view.collapse(3).unwrap(), 3);
    assert_eq!(view.to_columns().unwrap(), before);

    assert_eq!(view.collapse(0).unwrap(), 0);
    assert_eq!(view.num_rows().unwrap(), 1);
    assert_eq!(view.expand(0).unwrap(), 0);
    assert_eq!(view.num_rows().unwrap(), 5);
}

#[test]
fn nested_groups_open_to_the_configured_depth() {
    let table = table(
        UpdateData::columns([
            ("a", strs(&["x", "x", "y"])),
            ("b", strs(&["p", "q", "p"])),
            ("v", ints(&[1, 2, 3])),
        ]),
        TableOptions::default(),
    );
    let view = table
        .view(
            ViewConfig::new()
                .with_group_by(["a", "b"])
                .with_group_by_depth(1)
                .with_sort("v", SortDir::Desc),
        )
        .unwrap();
    assert_eq!(
        row_paths(&view),
        vec![vec![], vec![Value::from("x")], vec![Value::from("y")]]
    );

    view.expand(2).unwrap();
    assert_eq!(
        row_paths(&view),
        vec![
            vec![],
            vec![Value::from("x")],
            vec![Value::from("y")],
            vec![Value::from("y"), Value::from("p")],
        ]
    );

    view.set_depth(2).unwrap();
    assert_eq!(view.num_rows().unwrap(), 6);
    assert_eq!(column(&view, "v"), ints(&[6, 3, 2, 1, 3, 3]));

    let tree = view.row_tree().unwrap();
    assert_eq!(tree.value("v"), Some(&Value::Integer(6)));
    let leaf = tree.find(&[Value::from("x"), Value::from("q")]).unwrap();
    assert_eq!(leaf.rows, 1);
}
