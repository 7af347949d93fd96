use tabula_columnar::{ColumnType, ColumnarError};

pub type EngineResult<T> = Result<T, EngineError>;

/// Coarse classification of [`EngineError`] variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Column collisions, unknown columns, bad expression definitions.
    Schema,
    /// A value that cannot be stored in its column.
    Type,
    /// Invalid view or table options.
    Config,
    /// Operation on a deleted table/view, or not allowed in the current state.
    State,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("unknown column: {0}")]
    UnknownColumn(String),

    #[error("duplicate column: {0}")]
    DuplicateColumn(String),

    #[error("expression {column} is already defined differently")]
    ExpressionConflict { column: String },

    #[error("dependency cycle: {}", path.join(" -> "))]
    DependencyCycle { path: Vec<String> },

    #[error("expression {column}: {function} takes {expected} inputs, got {actual}")]
    Arity {
        column: String,
        function: String,
        expected: usize,
        actual: usize,
    },

    #[error("expression {column}: {function} does not accept {input_type} input")]
    UnsupportedInput {
        column: String,
        function: String,
        input_type: ColumnType,
    },

    #[error("expression {column} is declared {declared} but evaluates to {inferred}")]
    ExpressionType {
        column: String,
        declared: ColumnType,
        inferred: ColumnType,
    },

    #[error("index column {0} is not in the schema")]
    UnknownIndex(String),

    #[error("table schema has no columns")]
    EmptySchema,

    #[error("{0}")]
    Coercion(ColumnarError),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("unknown function: {0}")]
    UnknownFunction(String),

    #[error("unknown aggregate {aggregate} for column {column}")]
    UnknownAggregate { column: String, aggregate: String },

    #[error("unknown filter operator: {0}")]
    UnknownFilterOperator(String),

    #[error("invalid filter on {column}: {message}")]
    InvalidFilter { column: String, message: String },

    #[error("sort column {0} is neither in columns nor in aggregates")]
    SortColumnNotVisible(String),

    #[error("invalid option: {0}")]
    InvalidOption(String),

    #[error("key {0} already belongs to another row")]
    DuplicateKey(String),

    #[error("{0} is already an expression of a live view")]
    ShadowedColumn(String),

    #[error("table has been deleted")]
    TableDeleted,

    #[error("view has been deleted")]
    ViewDeleted,

    #[error("table has no primary key")]
    NoPrimaryKey,

    #[error("table still has {0} live view(s)")]
    ViewsAttached(usize),

    #[error("storage error: {0}")]
    Storage(ColumnarError),

    #[error("export failed: {0}")]
    Export(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::UnknownColumn(_)
            | EngineError::DuplicateColumn(_)
            | EngineError::ExpressionConflict { .. }
            | EngineError::DependencyCycle { .. }
            | EngineError::Arity { .. }
            | EngineError::UnsupportedInput { .. }
            | EngineError::ExpressionType { .. }
            | EngineError::ShadowedColumn(_)
            | EngineError::UnknownIndex(_)
            | EngineError::EmptySchema => ErrorKind::Schema,
            EngineError::Coercion(_) | EngineError::InvalidData(_) => ErrorKind::Type,
            EngineError::UnknownFunction(_)
            | EngineError::UnknownAggregate { .. }
            | EngineError::UnknownFilterOperator(_)
            | EngineError::InvalidFilter { .. }
            | EngineError::SortColumnNotVisible(_)
            | EngineError::InvalidOption(_)
            | EngineError::DuplicateKey(_) => ErrorKind::Config,
            EngineError::TableDeleted
            | EngineError::ViewDeleted
            | EngineError::NoPrimaryKey
            | EngineError::ViewsAttached(_)
            | EngineError::Storage(_)
            | EngineError::Export(_) => ErrorKind::State,
        }
    }
}

impl From<ColumnarError> for EngineError {
    fn from(err: ColumnarError) -> Self {
        match err {
            ColumnarError::TypeMismatch { .. } => EngineError::Coercion(err),
            ColumnarError::UnknownColumn(name) => EngineError::UnknownColumn(name),
            ColumnarError::DuplicateColumn(name) => EngineError::DuplicateColumn(name),
            other => EngineError::Storage(other),
        }
    }
}

impl From<csv::Error> for EngineError {
    fn from(err: csv::Error) -> Self {
        EngineError::Export(err.to_string())
    }
}
