use crate::error::{EngineError, EngineResult};
use serde_json::Value as Json;
use tabula_columnar::{ColumnSchema, ColumnType};

/// Ordered column name → type mapping.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Schema {
    columns: Vec<ColumnSchema>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, column_type: ColumnType) {
        self.columns.push(ColumnSchema::new(name, column_type));
    }

    pub fn with(mut self, name: impl Into<String>, column_type: ColumnType) -> Self {
        self.push(name, column_type);
        self
    }

    pub fn get(&self, name: &str) -> Option<ColumnType> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.column_type)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> &[ColumnSchema] {
        &self.columns
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, ColumnType)> + '_ {
        self.columns.iter().map(|c| (c.name.as_str(), c.column_type))
    }

    /// `{"name": "type", ...}` in column order.
    pub fn to_json(&self) -> Json {
        let map = self
            .columns
            .iter()
            .map(|c| (c.name.clone(), Json::String(c.column_type.as_str().to_string())))
            .collect::<serde_json::Map<_, _>>();
        Json::Object(map)
    }

    /// Parse `{"name": "type", ...}`.
    pub fn from_json(json: &Json) -> EngineResult<Self> {
        let Json::Object(map) = json else {
            return Err(EngineError::InvalidData(
                "schema must be an object of column types".into(),
            ));
        };
        let mut schema = Schema::new();
        for (name, ty) in map {
            let parsed = ty.as_str().and_then(ColumnType::parse).ok_or_else(|| {
                EngineError::InvalidData(format!("invalid type for column {name}: {ty}"))
            })?;
            schema.push(name.clone(), parsed);
        }
        Ok(schema)
    }

    /// True when `json` looks like a schema (a non-empty object whose values are all type names).
    pub(crate) fn is_schema_json(json: &Json) -> bool {
        match json {
            Json::Object(map) => {
                !map.is_empty()
                    && map
                        .values()
                        .all(|v| v.as_str().and_then(ColumnType::parse).is_some())
            }
            _ => false,
        }
    }
}

impl<S: Into<String>> FromIterator<(S, ColumnType)> for Schema {
    fn from_iter<I: IntoIterator<Item = (S, ColumnType)>>(iter: I) -> Self {
        Schema {
            columns: iter
                .into_iter()
                .map(|(name, ty)| ColumnSchema::new(name, ty))
                .collect(),
        }
    }
}

impl From<Vec<ColumnSchema>> for Schema {
    fn from(columns: Vec<ColumnSchema>) -> Self {
        Schema { columns }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_round_trip_keeps_column_order() {
        let schema: Schema = [
            ("z", ColumnType::Boolean),
            ("a", ColumnType::Integer),
            ("m", ColumnType::Date),
        ]
        .into_iter()
        .collect();
        let json = schema.to_json();
        assert_eq!(json, json!({"z": "boolean", "a": "integer", "m": "date"}));
        assert_eq!(Schema::from_json(&json).unwrap(), schema);
    }

    #[test]
    fn data_objects_are_not_schemas() {
        assert!(Schema::is_schema_json(&json!({"x": "integer"})));
        assert!(!Schema::is_schema_json(&json!({"x": [1, 2]})));
        assert!(!Schema::is_schema_json(&json!({"x": "hello"})));
        assert!(!Schema::is_schema_json(&json!([{"x": 1}])));
    }
}
