//! Incremental table/view engine for Tabula.
//!
//! This crate focuses on:
//! - Tables over [`tabula_columnar::ColumnStore`] with append, upsert-by-key, partial updates by
//!   row index, removal and rolling windows.
//! - Computed columns organized as a dependency DAG and recomputed only where inputs changed.
//! - Views with filters, sorts, `group_by`/`split_by` pivots and aggregates, patched from each
//!   committed delta rather than rebuilt.
//! - Synchronous change notification with row-level deltas in view coordinates.
//!
//! ```
//! use tabula_engine::{Engine, Row, TableOptions, Value, ViewConfig};
//!
//! let engine = Engine::default();
//! let table = engine
//!     .table(
//!         vec![
//!             Row::new().with("region", "east").with("sales", 10),
//!             Row::new().with("region", "west").with("sales", 5),
//!             Row::new().with("region", "east").with("sales", 1),
//!         ],
//!         TableOptions::default(),
//!     )
//!     .unwrap();
//! let view = table.view(ViewConfig::new().with_group_by(["region"])).unwrap();
//! let totals = view.to_columns().unwrap();
//! assert_eq!(
//!     totals.column("sales").unwrap(),
//!     &[Value::Integer(16), Value::Integer(11), Value::Integer(5)]
//! );
//! ```

#![forbid(unsafe_code)]

mod delta;
mod engine;
mod error;
mod expression;
mod json;
mod pivot;
mod scheduler;
mod schema;
mod source;
mod table;
mod update;
mod view;

pub use crate::delta::{CellChanges, ColumnRef, Level, PortId, TableDelta};
pub use crate::engine::{Engine, EngineOptions};
pub use crate::error::{EngineError, EngineResult, ErrorKind};
pub use crate::expression::{
    CustomFn, ExpressionDef, ExpressionValidation, ExpressionValidationError, FunctionSpec,
    NullPolicy, Operand, ScalarFn,
};
pub use crate::json::{json_to_field, json_to_value, value_to_json};
pub use crate::pivot::{Aggregate, PivotNode};
pub use crate::schema::Schema;
pub use crate::table::{Table, TableOptions, UpdateOptions};
pub use crate::update::{Row, UpdateData, INDEX_FIELD};
pub use crate::view::{
    ColumnData, ColumnarOutput, Filter, SerializeOptions, Sort, SortDir, SubscriptionId,
    UpdateEvent, UpdateMode, View, ViewConfig, ViewDelta, ROW_PATH_FIELD,
};
pub use tabula_columnar::{ColumnStats, ColumnType, Field, Value};

/// Check view expressions against `table` without creating a view.
///
/// Every definition is checked; errors are reported per expression rather than failing on the
/// first one.
pub fn validate_expressions(
    table: &Table,
    defs: &[(String, ExpressionDef)],
) -> EngineResult<ExpressionValidation> {
    table.validate_expressions(defs)
}
