#![forbid(unsafe_code)]

use crate::types::ColumnType;

pub type ColumnarResult<T> = Result<T, ColumnarError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ColumnarError {
    #[error("cannot store {value} in {column_type} column {column}")]
    TypeMismatch {
        column: String,
        value: String,
        column_type: ColumnType,
    },

    #[error("unknown column: {0}")]
    UnknownColumn(String),

    #[error("duplicate column: {0}")]
    DuplicateColumn(String),

    #[error("row {row} out of bounds for store of {len} rows")]
    RowOutOfBounds { row: usize, len: usize },

    #[error("row length mismatch: expected {expected} values, got {actual}")]
    RowLength { expected: usize, actual: usize },

    #[cfg(feature = "arrow")]
    #[error("arrow error: {0}")]
    Arrow(String),
}
