#![forbid(unsafe_code)]

//! Arrow interop: export named columns as a `RecordBatch` / IPC stream and read them back.
//!
//! Strings are exported dictionary-encoded (`Dictionary(Int32, Utf8)`), dates as `Date64` and
//! datetimes as millisecond timestamps, matching the in-memory representation.

use crate::error::{ColumnarError, ColumnarResult};
use crate::store::ColumnStore;
use crate::types::{ColumnSchema, ColumnType, Value};
use arrow_array::builder::{ListBuilder, StringBuilder, StringDictionaryBuilder};
use arrow_array::types::Int32Type;
use arrow_array::{
    Array, ArrayRef, BooleanArray, Date64Array, DictionaryArray, Float64Array, Int64Array,
    RecordBatch, StringArray, TimestampMillisecondArray,
};
use arrow_ipc::reader::StreamReader;
use arrow_ipc::writer::StreamWriter;
use arrow_schema::{DataType, Field, Schema, TimeUnit};
use std::sync::Arc;

/// Name of the optional list column carrying pivot row paths.
pub const ROW_PATH_COLUMN: &str = "__ROW_PATH__";

fn arrow_err(err: impl std::fmt::Display) -> ColumnarError {
    ColumnarError::Arrow(err.to_string())
}

fn data_type(column_type: ColumnType) -> DataType {
    match column_type {
        ColumnType::Integer => DataType::Int64,
        ColumnType::Float => DataType::Float64,
        ColumnType::Boolean => DataType::Boolean,
        ColumnType::String => {
            DataType::Dictionary(Box::new(DataType::Int32), Box::new(DataType::Utf8))
        }
        ColumnType::Date => DataType::Date64,
        ColumnType::DateTime => DataType::Timestamp(TimeUnit::Millisecond, None),
    }
}

fn build_array(column_type: ColumnType, values: &[Value]) -> ColumnarResult<ArrayRef> {
    let array: ArrayRef = match column_type {
        ColumnType::Integer => Arc::new(Int64Array::from(
            values
                .iter()
                .map(|v| match v {
                    Value::Integer(i) => Some(*i),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
        ColumnType::Float => Arc::new(Float64Array::from(
            values.iter().map(Value::as_f64).collect::<Vec<_>>(),
        )),
        ColumnType::Boolean => Arc::new(BooleanArray::from(
            values
                .iter()
                .map(|v| match v {
                    Value::Boolean(b) => Some(*b),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
        ColumnType::String => {
            let mut builder = StringDictionaryBuilder::<Int32Type>::new();
            for value in values {
                match value {
                    Value::Null => builder.append_null(),
                    Value::String(s) => {
                        builder.append(s.as_ref()).map_err(arrow_err)?;
                    }
                    other => {
                        builder.append(other.to_string()).map_err(arrow_err)?;
                    }
                }
            }
            Arc::new(builder.finish())
        }
        ColumnType::Date => Arc::new(Date64Array::from(
            values
                .iter()
                .map(|v| match v {
                    Value::Date(ms) | Value::DateTime(ms) => Some(*ms),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
        ColumnType::DateTime => Arc::new(TimestampMillisecondArray::from(
            values
                .iter()
                .map(|v| match v {
                    Value::Date(ms) | Value::DateTime(ms) => Some(*ms),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
    };
    Ok(array)
}

fn build_row_paths(paths: &[Vec<Value>]) -> ArrayRef {
    let mut builder = ListBuilder::new(StringBuilder::new());
    for path in paths {
        for value in path {
            match value {
                Value::Null => builder.values().append_null(),
                other => builder.values().append_value(other.to_string()),
            }
        }
        builder.append(true);
    }
    Arc::new(builder.finish())
}

/// Build a record batch from typed columns, optionally prefixed by a row-path list column.
pub fn columns_to_record_batch(
    row_paths: Option<&[Vec<Value>]>,
    columns: &[(ColumnSchema, Vec<Value>)],
) -> ColumnarResult<RecordBatch> {
    let mut fields = Vec::with_capacity(columns.len() + 1);
    let mut arrays = Vec::with_capacity(columns.len() + 1);

    if let Some(paths) = row_paths {
        fields.push(Field::new(
            ROW_PATH_COLUMN,
            DataType::List(Arc::new(Field::new("item", DataType::Utf8, true))),
            true,
        ));
        arrays.push(build_row_paths(paths));
    }

    for (schema, values) in columns {
        fields.push(Field::new(&schema.name, data_type(schema.column_type), true));
        arrays.push(build_array(schema.column_type, values)?);
    }

    RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays).map_err(arrow_err)
}

/// Export the live rows of a store.
pub fn store_to_record_batch(store: &ColumnStore) -> ColumnarResult<RecordBatch> {
    let columns: Vec<(ColumnSchema, Vec<Value>)> = store
        .schema()
        .iter()
        .enumerate()
        .map(|(idx, schema)| {
            let values = store.iter_live().map(|row| store.get(row, idx)).collect();
            (schema.clone(), values)
        })
        .collect();
    columns_to_record_batch(None, &columns)
}

/// Serialize a record batch as an Arrow IPC stream.
pub fn record_batch_to_ipc(batch: &RecordBatch) -> ColumnarResult<Vec<u8>> {
    let mut buf = Vec::new();
    {
        let mut writer =
            StreamWriter::try_new(&mut buf, batch.schema().as_ref()).map_err(arrow_err)?;
        writer.write(batch).map_err(arrow_err)?;
        writer.finish().map_err(arrow_err)?;
    }
    Ok(buf)
}

/// Decode an Arrow IPC stream produced by [`record_batch_to_ipc`] back into typed columns.
///
/// The row-path list column, when present, is skipped.
pub fn ipc_to_columns(bytes: &[u8]) -> ColumnarResult<Vec<(ColumnSchema, Vec<Value>)>> {
    let reader = StreamReader::try_new(std::io::Cursor::new(bytes), None).map_err(arrow_err)?;
    let mut out: Vec<(ColumnSchema, Vec<Value>)> = Vec::new();
    for batch in reader {
        let batch = batch.map_err(arrow_err)?;
        let columns = record_batch_to_columns(&batch)?;
        if out.is_empty() {
            out = columns;
        } else {
            for ((_, acc), (_, values)) in out.iter_mut().zip(columns) {
                acc.extend(values);
            }
        }
    }
    Ok(out)
}

/// Convert a record batch into typed columns.
pub fn record_batch_to_columns(
    batch: &RecordBatch,
) -> ColumnarResult<Vec<(ColumnSchema, Vec<Value>)>> {
    let schema = batch.schema();
    let mut out = Vec::with_capacity(batch.num_columns());
    for (field, array) in schema.fields().iter().zip(batch.columns()) {
        if field.name() == ROW_PATH_COLUMN {
            continue;
        }
        let (column_type, values) = array_to_values(field.name(), array.as_ref())?;
        out.push((ColumnSchema::new(field.name().clone(), column_type), values));
    }
    Ok(out)
}

fn array_to_values(name: &str, array: &dyn Array) -> ColumnarResult<(ColumnType, Vec<Value>)> {
    let len = array.len();
    let unsupported = || ColumnarError::Arrow(format!("unsupported arrow type for column {name}"));

    let out = match array.data_type() {
        DataType::Int64 => {
            let arr = array.as_any().downcast_ref::<Int64Array>().ok_or_else(unsupported)?;
            let values = (0..len)
                .map(|i| if arr.is_null(i) { Value::Null } else { Value::Integer(arr.value(i)) })
                .collect();
            (ColumnType::Integer, values)
        }
        DataType::Float64 => {
            let arr = array.as_any().downcast_ref::<Float64Array>().ok_or_else(unsupported)?;
            let values = (0..len)
                .map(|i| if arr.is_null(i) { Value::Null } else { Value::Float(arr.value(i)) })
                .collect();
            (ColumnType::Float, values)
        }
        DataType::Boolean => {
            let arr = array.as_any().downcast_ref::<BooleanArray>().ok_or_else(unsupported)?;
            let values = (0..len)
                .map(|i| if arr.is_null(i) { Value::Null } else { Value::Boolean(arr.value(i)) })
                .collect();
            (ColumnType::Boolean, values)
        }
        DataType::Utf8 => {
            let arr = array.as_any().downcast_ref::<StringArray>().ok_or_else(unsupported)?;
            let values = (0..len)
                .map(|i| if arr.is_null(i) { Value::Null } else { Value::from(arr.value(i)) })
                .collect();
            (ColumnType::String, values)
        }
        DataType::Dictionary(_, _) => {
            let dict = array
                .as_any()
                .downcast_ref::<DictionaryArray<Int32Type>>()
                .ok_or_else(unsupported)?;
            let dict_values = dict
                .values()
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(unsupported)?;
            let keys = dict.keys();
            let values = (0..len)
                .map(|i| {
                    if dict.is_null(i) {
                        Value::Null
                    } else {
                        Value::from(dict_values.value(keys.value(i) as usize))
                    }
                })
                .collect();
            (ColumnType::String, values)
        }
        DataType::Date64 => {
            let arr = array.as_any().downcast_ref::<Date64Array>().ok_or_else(unsupported)?;
            let values = (0..len)
                .map(|i| if arr.is_null(i) { Value::Null } else { Value::Date(arr.value(i)) })
                .collect();
            (ColumnType::Date, values)
        }
        DataType::Timestamp(TimeUnit::Millisecond, _) => {
            let arr = array
                .as_any()
                .downcast_ref::<TimestampMillisecondArray>()
                .ok_or_else(unsupported)?;
            let values = (0..len)
                .map(|i| if arr.is_null(i) { Value::Null } else { Value::DateTime(arr.value(i)) })
                .collect();
            (ColumnType::DateTime, values)
        }
        _ => return Err(unsupported()),
    };
    Ok(out)
}
