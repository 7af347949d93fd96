use crate::delta::ColumnRef;
use crate::error::{EngineError, EngineResult};
use crate::json::json_to_value;
use crate::view::config::Filter;
use serde_json::Value as Json;
use std::collections::HashSet;
use tabula_columnar::{coerce_value, ColumnType, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FilterOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    In,
    NotIn,
    Contains,
    BeginsWith,
    EndsWith,
    IsNull,
    IsNotNull,
}

impl FilterOp {
    pub fn parse(op: &str) -> Option<Self> {
        let op = match op.trim().to_ascii_lowercase().as_str() {
            "==" => FilterOp::Eq,
            "!=" => FilterOp::Ne,
            "<" => FilterOp::Lt,
            ">" => FilterOp::Gt,
            "<=" => FilterOp::Le,
            ">=" => FilterOp::Ge,
            "in" => FilterOp::In,
            "not in" => FilterOp::NotIn,
            "contains" => FilterOp::Contains,
            "begins with" => FilterOp::BeginsWith,
            "ends with" => FilterOp::EndsWith,
            "is null" => FilterOp::IsNull,
            "is not null" => FilterOp::IsNotNull,
            _ => return None,
        };
        Some(op)
    }

    fn is_textual(self) -> bool {
        matches!(
            self,
            FilterOp::Contains | FilterOp::BeginsWith | FilterOp::EndsWith
        )
    }
}

#[derive(Clone, Debug)]
enum Operand {
    None,
    One(Value),
    Many(HashSet<Value>),
}

/// A filter with its column resolved and its operand coerced to the column type.
#[derive(Clone, Debug)]
pub(crate) struct CompiledFilter {
    pub column: ColumnRef,
    op: FilterOp,
    operand: Operand,
}

impl CompiledFilter {
    pub fn compile(
        filter: &Filter,
        column: ColumnRef,
        column_type: ColumnType,
    ) -> EngineResult<Self> {
        let op = FilterOp::parse(&filter.operator)
            .ok_or_else(|| EngineError::UnknownFilterOperator(filter.operator.clone()))?;
        let invalid = |message: String| EngineError::InvalidFilter {
            column: filter.column.clone(),
            message,
        };

        let operand = match op {
            FilterOp::IsNull | FilterOp::IsNotNull => Operand::None,
            FilterOp::In | FilterOp::NotIn => {
                let Json::Array(items) = &filter.value else {
                    return Err(invalid(format!("`{}` expects a list", filter.operator)));
                };
                let mut values = HashSet::with_capacity(items.len());
                for item in items {
                    values.insert(coerce_operand(item, column_type).map_err(&invalid)?);
                }
                Operand::Many(values)
            }
            _ if op.is_textual() => {
                if column_type != ColumnType::String {
                    return Err(invalid(format!(
                        "`{}` only applies to string columns",
                        filter.operator
                    )));
                }
                Operand::One(coerce_operand(&filter.value, column_type).map_err(&invalid)?)
            }
            _ => Operand::One(coerce_operand(&filter.value, column_type).map_err(&invalid)?),
        };
        Ok(Self {
            column,
            op,
            operand,
        })
    }

    /// Null cells only pass `is null`.
    pub fn matches(&self, value: &Value) -> bool {
        match (self.op, &self.operand) {
            (FilterOp::IsNull, _) => value.is_null(),
            (FilterOp::IsNotNull, _) => !value.is_null(),
            _ if value.is_null() => false,
            (FilterOp::In, Operand::Many(set)) => set.contains(value),
            (FilterOp::NotIn, Operand::Many(set)) => !set.contains(value),
            (op, Operand::One(operand)) => match op {
                FilterOp::Eq => value == operand,
                FilterOp::Ne => value != operand,
                FilterOp::Lt => value < operand,
                FilterOp::Gt => value > operand,
                FilterOp::Le => value <= operand,
                FilterOp::Ge => value >= operand,
                FilterOp::Contains | FilterOp::BeginsWith | FilterOp::EndsWith => {
                    match (value.as_str(), operand.as_str()) {
                        (Some(text), Some(needle)) => match op {
                            FilterOp::Contains => text.contains(needle),
                            FilterOp::BeginsWith => text.starts_with(needle),
                            _ => text.ends_with(needle),
                        },
                        _ => false,
                    }
                }
                _ => false,
            },
            _ => false,
        }
    }
}

fn coerce_operand(json: &Json, column_type: ColumnType) -> Result<Value, String> {
    if json.is_null() {
        return Err("missing filter value".into());
    }
    let value = json_to_value(json);
    match coerce_value("filter", &value, column_type) {
        Ok(coerced) if !coerced.is_null() => Ok(coerced),
        Ok(_) => Err(format!("{json} is not a valid {column_type}")),
        Err(err) => Err(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::Level;
    use crate::error::ErrorKind;
    use serde_json::json;

    const COLUMN: ColumnRef = ColumnRef::new(Level::Base, 0);

    fn compile(op: &str, value: Json, column_type: ColumnType) -> EngineResult<CompiledFilter> {
        let filter = Filter {
            column: "c".into(),
            operator: op.into(),
            value,
        };
        CompiledFilter::compile(&filter, COLUMN, column_type)
    }

    #[test]
    fn comparisons_use_the_column_type() {
        let gt = compile(">", json!("2"), ColumnType::Integer).unwrap();
        assert!(gt.matches(&Value::Integer(3)));
        assert!(!gt.matches(&Value::Integer(2)));
        assert!(!gt.matches(&Value::Null));

        let on = compile("==", json!("2020-01-02"), ColumnType::Date).unwrap();
        assert!(on.matches(&Value::Date(1_577_923_200_000)));
    }

    #[test]
    fn set_and_text_operators() {
        let within = compile("in", json!(["a", "b"]), ColumnType::String).unwrap();
        assert!(within.matches(&Value::from("b")));
        assert!(!within.matches(&Value::from("c")));

        let prefix = compile("begins with", json!("ab"), ColumnType::String).unwrap();
        assert!(prefix.matches(&Value::from("abc")));
        assert!(!prefix.matches(&Value::from("cab")));

        let null = compile("is null", Json::Null, ColumnType::Float).unwrap();
        assert!(null.matches(&Value::Null));
        assert!(!null.matches(&Value::Float(0.0)));
    }

    #[test]
    fn bad_filters_are_config_errors() {
        let err = compile("~=", json!(1), ColumnType::Integer).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        let err = compile(">", json!("abc"), ColumnType::Integer).unwrap_err();
        assert!(matches!(err, EngineError::InvalidFilter { .. }));
        let err = compile("contains", json!("a"), ColumnType::Integer).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        let err = compile("in", json!(1), ColumnType::Integer).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }
}
