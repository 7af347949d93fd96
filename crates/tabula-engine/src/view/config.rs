use crate::expression::ExpressionDef;
use crate::schema::Schema;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as Json;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Sort direction. The `col` variants sort the split_by column tree instead of the rows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortDir {
    #[serde(rename = "asc")]
    Asc,
    #[serde(rename = "desc")]
    Desc,
    #[serde(rename = "col asc")]
    ColAsc,
    #[serde(rename = "col desc")]
    ColDesc,
}

impl SortDir {
    pub fn is_descending(self) -> bool {
        matches!(self, SortDir::Desc | SortDir::ColDesc)
    }

    pub fn sorts_columns(self) -> bool {
        matches!(self, SortDir::ColAsc | SortDir::ColDesc)
    }
}

/// `["column", "desc"]` in JSON.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(String, SortDir)", into = "(String, SortDir)")]
pub struct Sort {
    pub column: String,
    pub dir: SortDir,
}

impl From<(String, SortDir)> for Sort {
    fn from((column, dir): (String, SortDir)) -> Self {
        Self { column, dir }
    }
}

impl From<Sort> for (String, SortDir) {
    fn from(sort: Sort) -> Self {
        (sort.column, sort.dir)
    }
}

/// `["column", "operator", value]` in JSON; the value is omitted for `is null`/`is not null`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Json>", into = "Vec<Json>")]
pub struct Filter {
    pub column: String,
    pub operator: String,
    pub value: Json,
}

impl TryFrom<Vec<Json>> for Filter {
    type Error = String;

    fn try_from(parts: Vec<Json>) -> Result<Self, Self::Error> {
        let mut parts = parts.into_iter();
        let (Some(Json::String(column)), Some(Json::String(operator))) =
            (parts.next(), parts.next())
        else {
            return Err("filter must start with a column name and an operator".into());
        };
        let value = parts.next().unwrap_or(Json::Null);
        if parts.next().is_some() {
            return Err(format!("filter on {column} has too many parts"));
        }
        Ok(Self {
            column,
            operator,
            value,
        })
    }
}

impl From<Filter> for Vec<Json> {
    fn from(filter: Filter) -> Self {
        let mut parts = vec![Json::String(filter.column), Json::String(filter.operator)];
        if !filter.value.is_null() {
            parts.push(filter.value);
        }
        parts
    }
}

/// Immutable configuration of a view.
///
/// Deserializes from the usual JSON shape:
///
/// ```
/// use tabula_engine::ViewConfig;
///
/// let config: ViewConfig = serde_json::from_value(serde_json::json!({
///     "group_by": ["region"],
///     "aggregates": {"sales": "avg"},
///     "sort": [["sales", "desc"]],
///     "filter": [["sales", ">", 10]],
///     "expressions": {"double": {"function": "*", "inputs": ["sales", 2]}},
/// }))
/// .unwrap();
/// assert_eq!(config.group_by, vec!["region".to_string()]);
/// assert_eq!(config.expressions[0].0, "double");
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewConfig {
    /// Output columns in order; all table columns and expressions when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
    pub group_by: Vec<String>,
    pub split_by: Vec<String>,
    /// How many group_by levels start expanded; all of them when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_by_depth: Option<usize>,
    pub aggregates: BTreeMap<String, String>,
    pub sort: Vec<Sort>,
    pub filter: Vec<Filter>,
    #[serde(with = "expression_map")]
    pub expressions: Vec<(String, ExpressionDef)>,
}

impl ViewConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_columns<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_group_by<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.group_by = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_split_by<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.split_by = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_group_by_depth(mut self, depth: usize) -> Self {
        self.group_by_depth = Some(depth);
        self
    }

    pub fn with_aggregate(
        mut self,
        column: impl Into<String>,
        aggregate: impl Into<String>,
    ) -> Self {
        self.aggregates.insert(column.into(), aggregate.into());
        self
    }

    pub fn with_sort(mut self, column: impl Into<String>, dir: SortDir) -> Self {
        self.sort.push(Sort {
            column: column.into(),
            dir,
        });
        self
    }

    pub fn with_filter(
        mut self,
        column: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<Json>,
    ) -> Self {
        self.filter.push(Filter {
            column: column.into(),
            operator: operator.into(),
            value: value.into(),
        });
        self
    }

    pub fn with_expression(mut self, name: impl Into<String>, def: ExpressionDef) -> Self {
        self.expressions.push((name.into(), def));
        self
    }

    /// Remove the named expressions, every expression that reads them, and every reference to
    /// any of them elsewhere in the config.
    pub fn drop_expressions<S: AsRef<str>>(mut self, names: &[S]) -> Self {
        let mut dropped: BTreeSet<String> = names.iter().map(|n| n.as_ref().to_string()).collect();
        loop {
            let before = dropped.len();
            for (name, def) in &self.expressions {
                if def.column_inputs().any(|input| dropped.contains(input)) {
                    dropped.insert(name.clone());
                }
            }
            if dropped.len() == before {
                break;
            }
        }
        self.expressions.retain(|(name, _)| !dropped.contains(name));
        self.retain_references(|column| !dropped.contains(column));
        self
    }

    /// Drop references to columns that are neither in `schema` nor defined by a surviving
    /// expression. Expressions whose inputs disappear are dropped too.
    pub fn sanitize(mut self, schema: &Schema) -> Self {
        loop {
            let known: BTreeSet<&str> = schema
                .names()
                .chain(self.expressions.iter().map(|(name, _)| name.as_str()))
                .collect();
            let broken: Vec<String> = self
                .expressions
                .iter()
                .filter(|(_, def)| def.column_inputs().any(|input| !known.contains(input)))
                .map(|(name, _)| name.clone())
                .collect();
            if broken.is_empty() {
                break;
            }
            self.expressions.retain(|(name, _)| !broken.contains(name));
        }
        let known: BTreeSet<String> = schema
            .names()
            .map(str::to_string)
            .chain(self.expressions.iter().map(|(name, _)| name.clone()))
            .collect();
        self.retain_references(|column| known.contains(column));
        self
    }

    fn retain_references(&mut self, keep: impl Fn(&str) -> bool) {
        if let Some(columns) = self.columns.as_mut() {
            columns.retain(|c| keep(c));
        }
        self.group_by.retain(|c| keep(c));
        self.split_by.retain(|c| keep(c));
        self.aggregates.retain(|c, _| keep(c));
        self.sort.retain(|s| keep(&s.column));
        self.filter.retain(|f| keep(&f.column));
        if let Some(depth) = self.group_by_depth {
            self.group_by_depth = Some(depth.min(self.group_by.len()));
        }
    }
}

/// Serializes expressions as a JSON object while keeping definition order.
mod expression_map {
    use super::*;

    pub fn serialize<S: Serializer>(
        expressions: &[(String, ExpressionDef)],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(expressions.len()))?;
        for (name, def) in expressions {
            map.serialize_entry(name, def)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<(String, ExpressionDef)>, D::Error> {
        struct Entries;

        impl<'de> Visitor<'de> for Entries {
            type Value = Vec<(String, ExpressionDef)>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of expression names to definitions")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut out = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((name, def)) = map.next_entry::<String, ExpressionDef>()? {
                    out.push((name, def));
                }
                Ok(out)
            }
        }

        deserializer.deserialize_map(Entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tabula_columnar::ColumnType;

    #[test]
    fn config_round_trips_through_json() {
        let json = json!({
            "columns": ["x", "b", "a"],
            "group_by": ["x"],
            "split_by": [],
            "aggregates": {"x": "sum"},
            "sort": [["x", "desc"], ["a", "col asc"]],
            "filter": [["x", ">", 2], ["a", "is not null"]],
            "expressions": {
                "b": {"function": "+", "inputs": ["x", "x"]},
                "a": {"function": "abs", "inputs": ["x"]},
            },
        });
        let config: ViewConfig = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(config.sort[1].dir, SortDir::ColAsc);
        assert_eq!(config.filter[1].value, Json::Null);
        assert_eq!(
            config.expressions.iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>(),
            vec!["b", "a"]
        );
        assert_eq!(serde_json::to_value(&config).unwrap(), json);
    }

    #[test]
    fn dropping_an_expression_drops_its_dependents_and_references() {
        let config = ViewConfig::new()
            .with_columns(["x", "double", "quad"])
            .with_group_by(["double"])
            .with_sort("quad", SortDir::Desc)
            .with_filter("double", ">", 1)
            .with_aggregate("quad", "avg")
            .with_expression("double", ExpressionDef::new("+", ["x", "x"]))
            .with_expression("quad", ExpressionDef::new("+", ["double", "double"]))
            .with_expression("other", ExpressionDef::new("abs", ["x"]))
            .drop_expressions(&["double"]);

        assert_eq!(config.columns, Some(vec!["x".to_string()]));
        assert!(config.group_by.is_empty());
        assert!(config.sort.is_empty());
        assert!(config.filter.is_empty());
        assert!(config.aggregates.is_empty());
        assert_eq!(config.expressions.len(), 1);
        assert_eq!(config.expressions[0].0, "other");
    }

    #[test]
    fn sanitize_drops_unknown_columns() {
        let schema = Schema::new().with("x", ColumnType::Integer);
        let config = ViewConfig::new()
            .with_columns(["x", "gone", "e"])
            .with_split_by(["gone"])
            .with_expression("e", ExpressionDef::new("abs", ["gone"]))
            .sanitize(&schema);
        assert_eq!(config.columns, Some(vec!["x".to_string()]));
        assert!(config.split_by.is_empty());
        assert!(config.expressions.is_empty());
    }
}
