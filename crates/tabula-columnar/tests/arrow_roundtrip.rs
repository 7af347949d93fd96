#![cfg(feature = "arrow")]

use pretty_assertions::assert_eq;
use tabula_columnar::arrow::{
    columns_to_record_batch, ipc_to_columns, record_batch_to_ipc, store_to_record_batch,
};
use tabula_columnar::{ColumnSchema, ColumnStore, ColumnType, Field, Value};

#[test]
fn store_export_skips_tombstoned_rows() {
    let mut store = ColumnStore::new(vec![
        ColumnSchema::new("x", ColumnType::Integer),
        ColumnSchema::new("y", ColumnType::String),
    ])
    .unwrap();
    store
        .append(&[
            vec![Field::from(1), Field::from("a")],
            vec![Field::from(2), Field::Null],
            vec![Field::from(3), Field::from("a")],
        ])
        .unwrap();
    store.remove(&[0]);

    let batch = store_to_record_batch(&store).unwrap();
    assert_eq!(batch.num_rows(), 2);
    assert_eq!(batch.num_columns(), 2);
}

#[test]
fn ipc_roundtrip_preserves_types_and_nulls() {
    let columns = vec![
        (
            ColumnSchema::new("i", ColumnType::Integer),
            vec![Value::Integer(1), Value::Null],
        ),
        (
            ColumnSchema::new("f", ColumnType::Float),
            vec![Value::Float(0.5), Value::Float(-1.0)],
        ),
        (
            ColumnSchema::new("s", ColumnType::String),
            vec![Value::from("a"), Value::Null],
        ),
        (
            ColumnSchema::new("b", ColumnType::Boolean),
            vec![Value::Null, Value::Boolean(false)],
        ),
        (
            ColumnSchema::new("d", ColumnType::Date),
            vec![Value::Date(86_400_000), Value::Null],
        ),
        (
            ColumnSchema::new("t", ColumnType::DateTime),
            vec![Value::DateTime(1_234), Value::DateTime(5_678)],
        ),
    ];
    let paths = vec![vec![], vec![Value::from("a")]];

    let batch = columns_to_record_batch(Some(&paths), &columns).unwrap();
    assert_eq!(batch.num_columns(), 7);

    let bytes = record_batch_to_ipc(&batch).unwrap();
    let decoded = ipc_to_columns(&bytes).unwrap();
    assert_eq!(decoded, columns);
}
