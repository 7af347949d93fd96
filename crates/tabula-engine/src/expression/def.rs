use crate::expression::functions::CustomFn;
use crate::json::{json_to_value, value_to_json};
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tabula_columnar::{ColumnType, Value};

/// Function of a computed column: a builtin looked up by name, or a Rust closure.
#[derive(Clone, Debug, PartialEq)]
pub enum FunctionSpec {
    Named(String),
    Custom(CustomFn),
}

impl Serialize for FunctionSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FunctionSpec::Named(name) => serializer.serialize_str(name),
            FunctionSpec::Custom(custom) => serializer.serialize_str(custom.name()),
        }
    }
}

impl<'de> Deserialize<'de> for FunctionSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(FunctionSpec::Named)
    }
}

/// Input of a computed column.
///
/// In JSON a string names a column, a number or boolean is a literal, and `{"literal": v}`
/// is a literal of any kind (needed for string literals).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Json", into = "Json")]
pub enum Operand {
    Column(String),
    Literal(Value),
}

impl Operand {
    pub fn literal(value: impl Into<Value>) -> Self {
        Operand::Literal(value.into())
    }

    pub fn column_name(&self) -> Option<&str> {
        match self {
            Operand::Column(name) => Some(name),
            Operand::Literal(_) => None,
        }
    }
}

impl From<&str> for Operand {
    fn from(name: &str) -> Self {
        Operand::Column(name.to_string())
    }
}

impl From<String> for Operand {
    fn from(name: String) -> Self {
        Operand::Column(name)
    }
}

impl TryFrom<Json> for Operand {
    type Error = String;

    fn try_from(json: Json) -> Result<Self, Self::Error> {
        match json {
            Json::String(name) => Ok(Operand::Column(name)),
            Json::Number(_) | Json::Bool(_) => Ok(Operand::Literal(json_to_value(&json))),
            Json::Object(map) => match map.get("literal") {
                Some(value) if map.len() == 1 => Ok(Operand::Literal(json_to_value(value))),
                _ => Err(format!("invalid expression input: {}", Json::Object(map))),
            },
            other => Err(format!("invalid expression input: {other}")),
        }
    }
}

impl From<Operand> for Json {
    fn from(operand: Operand) -> Self {
        match operand {
            Operand::Column(name) => Json::String(name),
            Operand::Literal(value @ Value::String(_)) => {
                serde_json::json!({ "literal": value_to_json(&value) })
            }
            Operand::Literal(value) => value_to_json(&value),
        }
    }
}

/// Structural definition of a computed column.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExpressionDef {
    pub function: FunctionSpec,
    pub inputs: Vec<Operand>,
    /// Declared output type; checked against the inferred type when present.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub output_type: Option<ColumnType>,
}

impl ExpressionDef {
    pub fn new<O: Into<Operand>>(
        function: impl Into<String>,
        inputs: impl IntoIterator<Item = O>,
    ) -> Self {
        Self {
            function: FunctionSpec::Named(function.into()),
            inputs: inputs.into_iter().map(Into::into).collect(),
            output_type: None,
        }
    }

    pub fn custom<O: Into<Operand>>(
        function: CustomFn,
        inputs: impl IntoIterator<Item = O>,
    ) -> Self {
        Self {
            function: FunctionSpec::Custom(function),
            inputs: inputs.into_iter().map(Into::into).collect(),
            output_type: None,
        }
    }

    pub fn with_type(mut self, output_type: ColumnType) -> Self {
        self.output_type = Some(output_type);
        self
    }

    /// Names of the columns this definition reads.
    pub fn column_inputs(&self) -> impl Iterator<Item = &str> + '_ {
        self.inputs.iter().filter_map(Operand::column_name)
    }
}
