//! Conversions between cell values and `serde_json` values.

use serde_json::Value as Json;
use tabula_columnar::{Field, Value};

/// JSON form of a cell. Dates and datetimes are emitted as epoch milliseconds.
pub fn value_to_json(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Integer(v) | Value::Date(v) | Value::DateTime(v) => Json::from(*v),
        Value::Float(v) => serde_json::Number::from_f64(*v)
            .map(Json::Number)
            .unwrap_or(Json::Null),
        Value::Boolean(b) => Json::Bool(*b),
        Value::String(s) => Json::String(s.to_string()),
    }
}

/// Cell value for a JSON scalar. Arrays and objects are kept as their JSON text.
pub fn json_to_value(json: &Json) -> Value {
    match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Boolean(*b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
        },
        Json::String(s) => Value::from(s.as_str()),
        other => Value::from(other.to_string()),
    }
}

/// Update field for a JSON value that is present. A missing key is `Field::Undefined`, which
/// callers handle before reaching here.
pub fn json_to_field(json: &Json) -> Field {
    Field::from(json_to_value(json))
}
