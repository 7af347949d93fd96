use crate::error::{EngineError, EngineResult};
use crate::schema::Schema;
use crate::table::{Table, TableOptions};
use crate::update::UpdateData;
use crate::view::ColumnarOutput;
use serde_json::Value as Json;

/// Engine-wide tuning knobs.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EngineOptions {
    /// Compact a table once this fraction of its physical rows are tombstones.
    pub compaction_ratio: f64,
    /// Tables with fewer physical rows than this are never compacted automatically.
    pub compaction_min_rows: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            compaction_ratio: 0.5,
            compaction_min_rows: 1024,
        }
    }
}

/// Explicit context every table is created through. Engines share nothing, so several can
/// coexist in one process.
#[derive(Clone, Debug, Default)]
pub struct Engine {
    options: EngineOptions,
}

impl Engine {
    pub fn new(options: EngineOptions) -> Self {
        if !(0.0..=1.0).contains(&options.compaction_ratio) {
            log::warn!(
                "compaction ratio {} outside [0, 1]; automatic compaction is effectively {}",
                options.compaction_ratio,
                if options.compaction_ratio < 0.0 { "eager" } else { "off" }
            );
        }
        Self { options }
    }

    pub fn options(&self) -> EngineOptions {
        self.options
    }

    /// Create a table from sample data, inferring its schema, and load the data.
    pub fn table(&self, data: impl Into<UpdateData>, options: TableOptions) -> EngineResult<Table> {
        let data = data.into();
        let schema = data.infer_schema();
        let table = self.table_from_schema(schema, options)?;
        if !data.is_empty() {
            table.update(data)?;
        }
        Ok(table)
    }

    /// Create an empty table.
    pub fn table_from_schema(&self, schema: Schema, options: TableOptions) -> EngineResult<Table> {
        if schema.is_empty() {
            return Err(EngineError::EmptySchema);
        }
        Table::create(schema, options, self.options)
    }

    /// Create a table from a view's output, keeping the output's column types.
    ///
    /// Types come from the view rather than from the values, so date-like strings stay strings
    /// and all-null columns keep their type.
    pub fn table_from_output(
        &self,
        output: ColumnarOutput,
        options: TableOptions,
    ) -> EngineResult<Table> {
        let table = self.table_from_schema(output.schema(), options)?;
        if output.num_rows() > 0 {
            table.update(output.into_update_data())?;
        }
        Ok(table)
    }

    /// Create a table from JSON: either a schema (`{"x": "integer"}`) or data (an array of
    /// row objects, or an object of column arrays).
    pub fn table_from_json(&self, json: &Json, options: TableOptions) -> EngineResult<Table> {
        if Schema::is_schema_json(json) {
            self.table_from_schema(Schema::from_json(json)?, options)
        } else {
            self.table(UpdateData::from_json(json)?, options)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;
    use tabula_columnar::ColumnType;

    #[test]
    fn json_input_is_either_a_schema_or_data() {
        let engine = Engine::default();
        let table = engine
            .table_from_json(&json!({"x": "integer", "y": "string"}), TableOptions::default())
            .unwrap();
        assert_eq!(table.size().unwrap(), 0);
        assert_eq!(table.schema().unwrap().get("x"), Some(ColumnType::Integer));

        let table = engine
            .table_from_json(&json!({"x": [1, 2], "y": ["a", "b"]}), TableOptions::default())
            .unwrap();
        assert_eq!(table.size().unwrap(), 2);
    }

    #[test]
    fn empty_schemas_are_rejected() {
        let err = Engine::default()
            .table_from_schema(Schema::new(), TableOptions::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Schema);
    }
}
