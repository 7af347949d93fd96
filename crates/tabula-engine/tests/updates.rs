mod common;

use common::*;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::{Arc, Mutex};
use tabula_engine::{
    validate_expressions, ColumnType, CustomFn, EngineError, ErrorKind, ExpressionDef, Operand, Row,
    Schema, SerializeOptions, SortDir, TableOptions, UpdateData, UpdateMode, UpdateOptions, Value,
    ViewConfig, ViewDelta, INDEX_FIELD,
};

fn sales() -> UpdateData {
    UpdateData::columns([
        ("id", ints(&[1, 2, 3, 4, 5])),
        ("region", strs(&["east", "west", "east", "north", "west"])),
        ("units", ints(&[10, 20, 30, 40, 50])),
    ])
}

#[test]
fn grouped_views_follow_upserts_and_removes() {
    let table = table(sales(), TableOptions::indexed("id"));
    let view = table
        .view(
            ViewConfig::new()
                .with_columns(["units"])
                .with_group_by(["region"])
                .with_filter("units", "<", 45),
        )
        .unwrap();
    assert_eq!(column(&view, "units"), ints(&[100, 40, 20, 40]));

    table
        .update(vec![
            Row::new().with("id", 2).with("region", "east"),
            Row::new().with("id", 6).with("region", "south").with("units", 5),
        ])
        .unwrap();
    table.remove([4]).unwrap();

    let live = view.to_columns().unwrap();
    let fresh = rebuilt(&table, &view).to_columns().unwrap();
    assert_eq!(live.column("units"), fresh.column("units"));
    assert_eq!(
        row_paths(&view),
        vec![vec![], vec![Value::from("east")], vec![Value::from("south")]]
    );
    assert_eq!(column(&view, "units"), ints(&[65, 60, 5]));
}

#[test]
fn row_deltas_are_in_view_coordinates() {
    let table = table(sales(), TableOptions::indexed("id"));
    let view = table
        .view(ViewConfig::new().with_sort("units", SortDir::Desc))
        .unwrap();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    view.on_update(
        move |event| sink.lock().unwrap().push(event.clone()),
        UpdateMode::Row,
    )
    .unwrap();

    let port = table.make_port().unwrap();
    table
        .update_with(
            vec![Row::new().with("id", 6).with("region", "east").with("units", 35)],
            UpdateOptions { port_id: port },
        )
        .unwrap();
    table.remove([5]).unwrap();

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].port_id, port);
    assert_eq!(events[0].op_id, 2);
    // units 50 40 [35] 30 20 10
    assert_eq!(
        events[0].delta,
        Some(ViewDelta {
            added: vec![2],
            changed: vec![3, 4, 5],
            removed: vec![],
            num_rows: 6,
        })
    );
    // 50 is removed; everything after it moves up one.
    assert_eq!(
        events[1].delta,
        Some(ViewDelta {
            added: vec![],
            changed: vec![0, 1, 2, 3, 4],
            removed: vec![0],
            num_rows: 5,
        })
    );
}

#[test]
fn no_op_updates_do_not_notify() {
    let table = table(sales(), TableOptions::indexed("id"));
    let view = table.view(ViewConfig::default()).unwrap();
    let calls = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&calls);
    view.on_update(move |_| *counter.lock().unwrap() += 1, UpdateMode::None)
        .unwrap();

    let op = table.op_id().unwrap();
    table
        .update(vec![Row::new().with("id", 1).with("units", 10)])
        .unwrap();
    table.update(vec![Row::new().with("id", 2)]).unwrap();
    assert_eq!(table.op_id().unwrap(), op);
    assert_eq!(*calls.lock().unwrap(), 0);

    table
        .update(vec![Row::new().with("id", 1).with("units", 11)])
        .unwrap();
    assert_eq!(table.op_id().unwrap(), op + 1);
    assert_eq!(*calls.lock().unwrap(), 1);
}

#[test]
fn callbacks_may_read_the_view() {
    let table = table(sales(), TableOptions::indexed("id"));
    let view = table.view(ViewConfig::new().with_group_by(["region"])).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let reader = view.clone();
    view.on_update(
        move |_| sink.lock().unwrap().push(reader.num_rows().unwrap()),
        UpdateMode::None,
    )
    .unwrap();

    table
        .update(vec![Row::new().with("id", 9).with("region", "south").with("units", 1)])
        .unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![5]);
}

#[test]
fn views_are_independent() {
    let table = table(sales(), TableOptions::indexed("id"));
    let doubled = table
        .view(ViewConfig::new().with_expression("e", ExpressionDef::new("*", ["units", "units"])))
        .unwrap();
    let negated = table
        .view(ViewConfig::new().with_expression("e", ExpressionDef::new("negate", ["units"])))
        .unwrap();
    let grouped = table
        .view(ViewConfig::new().with_group_by(["region"]).with_columns(["units"]))
        .unwrap();

    table
        .update(vec![Row::new().with("id", 1).with("units", 3)])
        .unwrap();
    assert_eq!(column(&doubled, "e")[0], Value::Float(9.0));
    assert_eq!(column(&negated, "e")[0], Value::Float(-3.0));
    assert_eq!(column(&grouped, "units"), ints(&[143, 33, 70, 40]));
    assert_eq!(table.schema().unwrap().len(), 3);

    negated.delete().unwrap();
    table
        .update(vec![Row::new().with("id", 1).with("units", 4)])
        .unwrap();
    assert_eq!(column(&doubled, "e")[0], Value::Float(16.0));
    assert_eq!(table.num_views(), 2);
}

#[test]
fn rolling_window_recycles_the_oldest_rows() {
    let table = engine()
        .table(
            UpdateData::columns([("v", ints(&[1, 2, 3]))]),
            TableOptions::limited(3),
        )
        .unwrap();
    let view = table.view(ViewConfig::default()).unwrap();
    let total = table.view(ViewConfig::new().with_group_by(["v"]).with_group_by_depth(0)).unwrap();

    table
        .update(UpdateData::columns([("v", ints(&[4, 5]))]))
        .unwrap();
    assert_eq!(table.size().unwrap(), 3);
    assert_eq!(column(&view, "v"), ints(&[4, 5, 3]));
    assert_eq!(column(&total, "v"), ints(&[12]));
    assert_eq!(table.get_limit().unwrap(), Some(3));
}

#[test]
fn compaction_rebuilds_views_and_keeps_keys() {
    let table = eager_engine().table(sales(), TableOptions::indexed("id")).unwrap();
    let flat = table.view(ViewConfig::default()).unwrap();
    let grouped = table
        .view(ViewConfig::new().with_group_by(["region"]).with_columns(["units"]))
        .unwrap();
    let deltas = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&deltas);
    flat.on_update(
        move |event| sink.lock().unwrap().push(event.delta.clone().unwrap()),
        UpdateMode::Row,
    )
    .unwrap();

    table.remove([1, 2, 3]).unwrap();
    assert_eq!(column(&flat, "id"), ints(&[4, 5]));
    assert_eq!(column(&grouped, "units"), ints(&[90, 40, 50]));
    assert_eq!(
        deltas.lock().unwrap()[0],
        ViewDelta {
            added: vec![],
            changed: vec![0, 1],
            removed: vec![0, 1, 2],
            num_rows: 2,
        }
    );

    table
        .update(vec![Row::new().with("id", 5).with("units", 7)])
        .unwrap();
    assert_eq!(column(&flat, "units"), ints(&[40, 7]));
    assert_eq!(table.size().unwrap(), 2);
}

#[test]
fn clear_and_replace_commit_once() {
    let table = table(sales(), TableOptions::indexed("id"));
    let view = table.view(ViewConfig::new().with_group_by(["region"])).unwrap();

    table.clear().unwrap();
    assert_eq!(table.size().unwrap(), 0);
    assert_eq!(view.num_rows().unwrap(), 1);
    assert_eq!(column(&view, "units"), vec![Value::Null]);

    table
        .replace(UpdateData::columns([
            ("id", ints(&[7, 7])),
            ("region", strs(&["east", "west"])),
            ("units", ints(&[1, 2])),
        ]))
        .unwrap();
    assert_eq!(table.size().unwrap(), 1);
    assert_eq!(row_paths(&view), vec![vec![], vec![Value::from("west")]]);
}

#[test]
fn configuration_errors_are_classified() {
    let table = table(sales(), TableOptions::default());
    let kind = |config: ViewConfig| table.view(config).unwrap_err().kind();

    assert_eq!(kind(ViewConfig::new().with_group_by(["nope"])), ErrorKind::Schema);
    assert_eq!(
        kind(ViewConfig::new().with_aggregate("units", "geomean")),
        ErrorKind::Config
    );
    assert_eq!(
        kind(ViewConfig::new().with_columns(["id"]).with_sort("units", SortDir::Asc)),
        ErrorKind::Config
    );
    assert_eq!(
        kind(ViewConfig::new().with_filter("units", ">", "many")),
        ErrorKind::Config
    );
    assert_eq!(
        kind(ViewConfig::new().with_expression("e", ExpressionDef::new("frobnicate", ["units"]))),
        ErrorKind::Config
    );
    assert_eq!(
        kind(
            ViewConfig::new()
                .with_expression("a", ExpressionDef::new("abs", ["b"]))
                .with_expression("b", ExpressionDef::new("abs", ["a"]))
        ),
        ErrorKind::Schema
    );

    // A sort column that is aggregated but not shown is fine.
    let view = table
        .view(
            ViewConfig::new()
                .with_columns(["region"])
                .with_group_by(["region"])
                .with_aggregate("units", "sum")
                .with_sort("units", SortDir::Desc),
        )
        .unwrap();
    // Ties keep first-seen order.
    assert_eq!(
        &row_paths(&view)[1..],
        &[
            vec![Value::from("west")],
            vec![Value::from("east")],
            vec![Value::from("north")],
        ]
    );

    assert_eq!(table.remove([1]).unwrap_err(), EngineError::NoPrimaryKey);
    let err = table
        .update(vec![Row::new().with("units", "lots")])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Type);
    assert_eq!(table.size().unwrap(), 5);
}

#[test]
fn expression_validation_reports_every_problem() {
    let table = table(sales(), TableOptions::default());
    let defs = vec![
        ("ok".to_string(), ExpressionDef::new("abs", ["units"])),
        ("bad".to_string(), ExpressionDef::new("abs", ["missing"])),
        ("upper".to_string(), ExpressionDef::new("uppercase", ["units"])),
    ];
    let report = validate_expressions(&table, &defs).unwrap();
    assert!(!report.is_valid());
    assert_eq!(
        report.errors.iter().map(|e| e.line).collect::<Vec<_>>(),
        vec![1, 2]
    );
    assert!(report.expression_schema.contains("ok"));
    assert!(!report.expression_schema.contains("bad"));
}

#[test]
fn serialization_windows_and_formats() {
    let table = table(sales(), TableOptions::indexed("id"));
    let view = table
        .view(ViewConfig::new().with_columns(["region", "units"]))
        .unwrap();

    let options = SerializeOptions::rows(1, 3).with_index();
    assert_eq!(
        view.to_json_with(&options).unwrap(),
        json!([
            {"__INDEX__": 2, "region": "west", "units": 20},
            {"__INDEX__": 3, "region": "east", "units": 30},
        ])
    );
    let options = SerializeOptions {
        start_col: Some(1),
        end_row: Some(2),
        ..SerializeOptions::default()
    };
    assert_eq!(view.to_csv_with(&options).unwrap(), "units\n10\n20\n");

    assert_eq!(
        view.get_min_max("units").unwrap(),
        (Value::Integer(10), Value::Integer(50))
    );
    assert_eq!(view.num_columns().unwrap(), 2);

    let grouped = table.view(ViewConfig::new().with_group_by(["region"])).unwrap();
    assert_eq!(
        grouped.get_min_max("units").unwrap(),
        (Value::Integer(40), Value::Integer(70))
    );
}

#[test]
fn output_tables_keep_view_types() {
    let schema = Schema::new()
        .with("k", ColumnType::Integer)
        .with("y", ColumnType::String)
        .with("w", ColumnType::Float);
    let table = engine()
        .table_from_schema(schema.clone(), TableOptions::indexed("k"))
        .unwrap();
    table
        .update(UpdateData::columns([
            ("k", ints(&[1, 2])),
            ("y", strs(&["2020-01-01", "2020-01-02"])),
            ("w", vec![Value::Null, Value::Null]),
        ]))
        .unwrap();
    let view = table.view(ViewConfig::default()).unwrap();

    let copy = engine()
        .table_from_output(view.to_columns().unwrap(), TableOptions::default())
        .unwrap();
    assert_eq!(copy.schema().unwrap(), schema);
    let again = copy.view(ViewConfig::default()).unwrap();
    assert_eq!(again.to_columns().unwrap(), view.to_columns().unwrap());
}

#[test]
fn index_writes_cannot_duplicate_keys() {
    let table = table(
        UpdateData::columns([("x", ints(&[1, 2])), ("v", strs(&["a", "b"]))]),
        TableOptions::indexed("x"),
    );
    let view = table.view(ViewConfig::default()).unwrap();
    let op = table.op_id().unwrap();

    let err = table
        .update(vec![Row::new().with(INDEX_FIELD, 0).with("x", 2)])
        .unwrap_err();
    assert!(matches!(err, EngineError::DuplicateKey(_)));
    assert_eq!(err.kind(), ErrorKind::Config);

    let err = table
        .update(vec![
            Row::new().with(INDEX_FIELD, 0).with("x", 7),
            Row::new().with(INDEX_FIELD, 1).with("x", 7),
        ])
        .unwrap_err();
    assert!(matches!(err, EngineError::DuplicateKey(_)));
    assert_eq!(table.op_id().unwrap(), op);
    assert_eq!(column(&view, "x"), ints(&[1, 2]));

    // A key moved to a free value releases the old one.
    table
        .update(vec![Row::new().with(INDEX_FIELD, 0).with("x", 3)])
        .unwrap();
    table
        .update(vec![Row::new().with("x", 1).with("v", "c")])
        .unwrap();
    table.remove([2]).unwrap();
    table
        .update(vec![Row::new().with("x", 3).with("v", "z")])
        .unwrap();
    assert_eq!(column(&view, "x"), ints(&[3, 1]));
    assert_eq!(column(&view, "v"), strs(&["z", "c"]));
    assert_eq!(table.size().unwrap(), 2);
}

#[test]
fn irrelevant_updates_do_not_notify() {
    let table = table(sales(), TableOptions::indexed("id"));
    let view = table
        .view(
            ViewConfig::new()
                .with_columns(["units"])
                .with_filter("units", ">", 25),
        )
        .unwrap();
    let deltas = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&deltas);
    view.on_update(
        move |event| sink.lock().unwrap().push(event.delta.clone()),
        UpdateMode::Row,
    )
    .unwrap();

    let op = table.op_id().unwrap();
    // A column the view does not show, then a row its filter rejects.
    table
        .update(vec![Row::new().with("id", 4).with("region", "south")])
        .unwrap();
    table
        .update(vec![Row::new().with("id", 1).with("units", 11)])
        .unwrap();
    assert_eq!(table.op_id().unwrap(), op + 2);
    assert!(deltas.lock().unwrap().is_empty());

    table
        .update(vec![Row::new().with("id", 2).with("units", 26)])
        .unwrap();
    assert_eq!(column(&view, "units"), ints(&[26, 30, 40, 50]));
    assert_eq!(
        *deltas.lock().unwrap(),
        vec![Some(ViewDelta {
            added: vec![0],
            changed: vec![1, 2, 3],
            removed: vec![],
            num_rows: 4,
        })]
    );
}

#[test]
fn panicking_custom_columns_leave_the_table_usable() {
    let table = table(sales(), TableOptions::indexed("id"));
    let checked = CustomFn::new("checked", 1, ColumnType::Integer, |args| match &args[0] {
        Value::Integer(v) if *v < 0 => panic!("negative units"),
        other => other.clone(),
    });
    table
        .add_computed_column("checked", ExpressionDef::custom(checked, ["units"]))
        .unwrap();
    let view = table
        .view(ViewConfig::new().with_columns(["checked"]))
        .unwrap();

    table
        .update(vec![Row::new().with("id", 1).with("units", -1)])
        .unwrap();
    assert_eq!(
        column(&view, "checked"),
        vec![
            Value::Null,
            Value::Integer(20),
            Value::Integer(30),
            Value::Integer(40),
            Value::Integer(50),
        ]
    );

    table
        .update(vec![Row::new().with("id", 1).with("units", 7)])
        .unwrap();
    assert_eq!(column(&view, "checked"), ints(&[7, 20, 30, 40, 50]));
    assert_eq!(table.size().unwrap(), 5);
}

#[test]
fn reads_see_whole_commits() {
    let table = table(sales(), TableOptions::indexed("id"));
    let view = table
        .view(
            ViewConfig::new()
                .with_group_by(["region"])
                .with_columns(["units", "id"])
                .with_aggregate("id", "count"),
        )
        .unwrap();
    let regions = ["east", "west", "north", "south"];

    std::thread::scope(|scope| {
        scope.spawn(|| {
            for round in 0..200i64 {
                table
                    .update(vec![Row::new()
                        .with("id", 100 + round)
                        .with("region", regions[round as usize % regions.len()])
                        .with("units", 1)])
                    .unwrap();
            }
        });
        scope.spawn(|| {
            for _ in 0..200 {
                let output = view.to_columns().unwrap();
                let units = output.column("units").unwrap();
                let count = output.column("id").unwrap();
                let (Value::Integer(total), Value::Integer(rows)) = (&units[0], &count[0]) else {
                    panic!("root totals {:?} {:?}", units[0], count[0]);
                };
                let groups: i64 = units[1..]
                    .iter()
                    .map(|v| match v {
                        Value::Integer(v) => *v,
                        other => panic!("group total {other:?}"),
                    })
                    .sum();
                assert_eq!(groups, *total);
                // Every appended row carries one unit.
                assert_eq!(*rows - 5, *total - 150);
            }
        });
    });

    assert_eq!(table.size().unwrap(), 205);
    assert_eq!(column(&view, "units")[0], Value::Integer(350));
}

#[test]
fn computed_columns_cannot_shadow_view_expressions() {
    let table = table(sales(), TableOptions::indexed("id"));
    let double = || ExpressionDef::new("*", [Operand::from("units"), Operand::literal(2)]);
    let view = table
        .view(ViewConfig::new().with_expression("double", double()))
        .unwrap();

    let err = table.add_computed_column("double", double()).unwrap_err();
    assert!(matches!(err, EngineError::ShadowedColumn(_)));
    assert_eq!(err.kind(), ErrorKind::Schema);

    view.delete().unwrap();
    table.add_computed_column("double", double()).unwrap();
    let view = table
        .view(ViewConfig::new().with_columns(["double"]))
        .unwrap();
    assert_eq!(column(&view, "double"), floats(&[20.0, 40.0, 60.0, 80.0, 100.0]));
}
