//! In-memory columnar storage for Tabula.
//!
//! This crate focuses on:
//! - Typed columns with validity masks and dictionary-encoded strings.
//! - Append, in-place overwrite and tombstone-based removal with explicit compaction.
//! - Value coercion at the write boundary (including date/datetime parsing).
//! - Exact column statistics and optional Arrow export.

#![forbid(unsafe_code)]

#[cfg(feature = "arrow")]
pub mod arrow;
mod bitmap;
pub mod coerce;
mod column;
mod error;
mod stats;
mod store;
mod types;

pub use crate::bitmap::BitVec;
pub use crate::coerce::{coerce_value, TypeInference};
pub use crate::column::{Column, Dictionary};
pub use crate::error::{ColumnarError, ColumnarResult};
pub use crate::stats::ColumnStats;
pub use crate::store::ColumnStore;
pub use crate::types::{ColumnSchema, ColumnType, Field, Value};
