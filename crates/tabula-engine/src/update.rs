//! Update payloads accepted by [`crate::Table::update`].

use crate::error::{EngineError, EngineResult};
use crate::json::json_to_field;
use crate::schema::Schema;
use serde_json::Value as Json;
use std::collections::HashSet;
use tabula_columnar::{Field, TypeInference, Value};

/// Pseudo-column addressing an existing physical row directly.
pub const INDEX_FIELD: &str = "__INDEX__";

/// One record of a row-oriented update. Columns that are absent read as [`Field::Undefined`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Row {
    fields: Vec<(String, Field)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set (or overwrite) one field.
    pub fn with(mut self, name: impl Into<String>, field: impl Into<Field>) -> Self {
        self.set(name, field);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, field: impl Into<Field>) {
        let name = name.into();
        let field = field.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = field,
            None => self.fields.push((name, field)),
        }
    }

    /// Mark `name` explicitly null.
    pub fn with_null(self, name: impl Into<String>) -> Self {
        self.with(name, Field::Null)
    }

    pub fn get(&self, name: &str) -> &Field {
        static UNDEFINED: Field = Field::Undefined;
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, f)| f)
            .unwrap_or(&UNDEFINED)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Field)> + '_ {
        self.fields.iter().map(|(n, f)| (n.as_str(), f))
    }

    /// Physical row addressed by `__INDEX__`, if any.
    pub fn index(&self) -> Option<usize> {
        match self.get(INDEX_FIELD) {
            Field::Value(Value::Integer(i)) if *i >= 0 => Some(*i as usize),
            Field::Value(Value::Float(f)) if *f >= 0.0 && f.fract() == 0.0 => Some(*f as usize),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<S: Into<String>, F: Into<Field>> FromIterator<(S, F)> for Row {
    fn from_iter<I: IntoIterator<Item = (S, F)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (name, field) in iter {
            row.set(name, field);
        }
        row
    }
}

/// Data for one `update` call, row- or column-oriented.
#[derive(Clone, Debug, PartialEq)]
pub enum UpdateData {
    Rows(Vec<Row>),
    /// Columns may have different lengths; short columns read as `Undefined` past their end.
    Columns(Vec<(String, Vec<Field>)>),
}

impl UpdateData {
    pub fn rows(rows: impl IntoIterator<Item = Row>) -> Self {
        UpdateData::Rows(rows.into_iter().collect())
    }

    pub fn columns<S, V, F>(columns: impl IntoIterator<Item = (S, V)>) -> Self
    where
        S: Into<String>,
        V: IntoIterator<Item = F>,
        F: Into<Field>,
    {
        UpdateData::Columns(
            columns
                .into_iter()
                .map(|(name, values)| (name.into(), values.into_iter().map(Into::into).collect()))
                .collect(),
        )
    }

    /// Typed columns, e.g. the output of [`crate::View::to_columns`].
    pub fn from_columns(columns: Vec<(String, Vec<Value>)>) -> Self {
        UpdateData::Columns(
            columns
                .into_iter()
                .map(|(name, values)| (name, values.into_iter().map(Field::from).collect()))
                .collect(),
        )
    }

    /// Accepts an array of objects (rows) or an object of arrays (columns).
    ///
    /// A key absent from a row object is `Undefined`; a JSON `null` is an explicit null.
    pub fn from_json(json: &Json) -> EngineResult<Self> {
        match json {
            Json::Array(items) => {
                let mut rows = Vec::with_capacity(items.len());
                for item in items {
                    let Json::Object(map) = item else {
                        return Err(EngineError::InvalidData(format!(
                            "row must be an object, got {item}"
                        )));
                    };
                    rows.push(
                        map.iter()
                            .map(|(name, value)| (name.clone(), json_to_field(value)))
                            .collect::<Row>(),
                    );
                }
                Ok(UpdateData::Rows(rows))
            }
            Json::Object(map) => {
                let mut columns = Vec::with_capacity(map.len());
                for (name, values) in map {
                    let Json::Array(values) = values else {
                        return Err(EngineError::InvalidData(format!(
                            "column {name} must be an array"
                        )));
                    };
                    columns.push((name.clone(), values.iter().map(json_to_field).collect()));
                }
                Ok(UpdateData::Columns(columns))
            }
            other => Err(EngineError::InvalidData(format!(
                "expected an array of rows or an object of columns, got {other}"
            ))),
        }
    }

    pub fn from_json_str(text: &str) -> EngineResult<Self> {
        let json: Json =
            serde_json::from_str(text).map_err(|err| EngineError::InvalidData(err.to_string()))?;
        Self::from_json(&json)
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        match self {
            UpdateData::Rows(rows) => rows.len(),
            UpdateData::Columns(columns) => {
                columns.iter().map(|(_, v)| v.len()).max().unwrap_or(0)
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Column names in first-seen order, `__INDEX__` excluded.
    pub fn column_names(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut visit = |name: &str| {
            if name != INDEX_FIELD && seen.insert(name.to_string()) {
                out.push(name.to_string());
            }
        };
        match self {
            UpdateData::Rows(rows) => rows.iter().flat_map(Row::iter).for_each(|(n, _)| visit(n)),
            UpdateData::Columns(columns) => columns.iter().for_each(|(n, _)| visit(n)),
        }
        out
    }

    pub fn into_rows(self) -> Vec<Row> {
        match self {
            UpdateData::Rows(rows) => rows,
            UpdateData::Columns(columns) => {
                let len = columns.iter().map(|(_, v)| v.len()).max().unwrap_or(0);
                let mut rows = vec![Row::new(); len];
                for (name, values) in columns {
                    for (row, field) in rows.iter_mut().zip(values) {
                        if !field.is_undefined() {
                            row.set(name.clone(), field);
                        }
                    }
                }
                rows
            }
        }
    }

    /// Infer a schema from the values present. See [`TypeInference`] for the rules.
    pub fn infer_schema(&self) -> Schema {
        let names = self.column_names();
        let mut inference = vec![TypeInference::new(); names.len()];
        let position = |name: &str| names.iter().position(|n| n == name);
        let mut observe = |name: &str, field: &Field| {
            if let (Some(idx), Field::Value(value)) = (position(name), field) {
                inference[idx].observe(value);
            }
        };
        match self {
            UpdateData::Rows(rows) => {
                for (name, field) in rows.iter().flat_map(Row::iter) {
                    observe(name, field);
                }
            }
            UpdateData::Columns(columns) => {
                for (name, values) in columns {
                    for field in values {
                        observe(name, field);
                    }
                }
            }
        }
        names
            .iter()
            .zip(&inference)
            .map(|(name, inf)| (name.clone(), inf.finish()))
            .collect()
    }
}

impl From<Vec<Row>> for UpdateData {
    fn from(rows: Vec<Row>) -> Self {
        UpdateData::Rows(rows)
    }
}
