//! Scalar functions available to computed columns.

use crate::error::{EngineError, EngineResult};
use crate::expression::def::FunctionSpec;
use chrono::{DateTime, Datelike, NaiveDate, Timelike};
use ordered_float::OrderedFloat;
use std::cmp::Ordering;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tabula_columnar::coerce::floor_to_day;
use tabula_columnar::{ColumnType, Value};

/// How a function treats null inputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NullPolicy {
    /// Any null input yields null without calling the function.
    Propagate,
    /// The function sees nulls and decides.
    Tolerant,
}

type CustomImpl = dyn Fn(&[Value]) -> Value + Send + Sync;

/// A user-supplied scalar function.
#[derive(Clone)]
pub struct CustomFn {
    name: Arc<str>,
    arity: usize,
    output_type: ColumnType,
    null_policy: NullPolicy,
    func: Arc<CustomImpl>,
}

impl CustomFn {
    pub fn new(
        name: impl Into<Arc<str>>,
        arity: usize,
        output_type: ColumnType,
        func: impl Fn(&[Value]) -> Value + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            arity,
            output_type,
            null_policy: NullPolicy::Propagate,
            func: Arc::new(func),
        }
    }

    pub fn with_null_policy(mut self, null_policy: NullPolicy) -> Self {
        self.null_policy = null_policy;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the closure. A panic yields null for this row and leaves the table usable.
    fn call(&self, args: &[Value]) -> Value {
        match panic::catch_unwind(AssertUnwindSafe(|| (self.func)(args))) {
            Ok(value) => value,
            Err(_) => {
                log::warn!("custom function {} panicked; evaluating to null", self.name);
                Value::Null
            }
        }
    }
}

impl fmt::Debug for CustomFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomFn")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("output_type", &self.output_type)
            .field("null_policy", &self.null_policy)
            .finish_non_exhaustive()
    }
}

impl PartialEq for CustomFn {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.arity == other.arity
            && self.output_type == other.output_type
            && Arc::ptr_eq(&self.func, &other.func)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ScalarFn {
    Add,
    Subtract,
    Multiply,
    Divide,
    /// `a / b * 100`.
    PercentOf,
    Pow,
    Min,
    Max,
    Equal,
    NotEqual,
    Greater,
    Less,
    GreaterEq,
    LessEq,
    ConcatSpace,
    ConcatComma,
    Abs,
    Sqrt,
    Pow2,
    Invert,
    Negate,
    Uppercase,
    Lowercase,
    Length,
    IsNull,
    DayOfWeek,
    MonthOfYear,
    HourOfDay,
    DayBucket,
    MonthBucket,
    YearBucket,
    Bin10,
    Bin100,
    Bin1000,
    Custom(CustomFn),
}

const WEEKDAYS: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

const MONTHS: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

static NULL: Value = Value::Null;

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Integer(v) => Some(*v as f64),
        Value::Float(v) => Some(*v),
        _ => None,
    }
}

fn finite(v: f64) -> Value {
    if v.is_finite() {
        Value::Float(v)
    } else {
        Value::Null
    }
}

fn timestamp(value: &Value) -> Option<DateTime<chrono::Utc>> {
    match value {
        Value::Date(ms) | Value::DateTime(ms) => DateTime::from_timestamp_millis(*ms),
        _ => None,
    }
}

fn date_value(date: Option<NaiveDate>) -> Value {
    date.and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| Value::Date(dt.and_utc().timestamp_millis()))
        .unwrap_or(Value::Null)
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (number(a), number(b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y),
        _ => Some(a.cmp(b)),
    }
}

fn comparable(a: ColumnType, b: ColumnType) -> bool {
    a == b || (a.is_numeric() && b.is_numeric())
}

impl ScalarFn {
    /// Resolve a builtin by name.
    pub fn from_name(name: &str) -> Option<Self> {
        let f = match name.trim() {
            "+" | "add" => ScalarFn::Add,
            "-" | "subtract" => ScalarFn::Subtract,
            "*" | "multiply" => ScalarFn::Multiply,
            "/" | "divide" => ScalarFn::Divide,
            "%" | "percent_of" => ScalarFn::PercentOf,
            "pow" | "^" => ScalarFn::Pow,
            "min" => ScalarFn::Min,
            "max" => ScalarFn::Max,
            "==" => ScalarFn::Equal,
            "!=" => ScalarFn::NotEqual,
            ">" => ScalarFn::Greater,
            "<" => ScalarFn::Less,
            ">=" => ScalarFn::GreaterEq,
            "<=" => ScalarFn::LessEq,
            "concat_space" => ScalarFn::ConcatSpace,
            "concat_comma" => ScalarFn::ConcatComma,
            "abs" => ScalarFn::Abs,
            "sqrt" => ScalarFn::Sqrt,
            "pow2" | "x^2" => ScalarFn::Pow2,
            "invert" | "1/x" => ScalarFn::Invert,
            "negate" => ScalarFn::Negate,
            "uppercase" => ScalarFn::Uppercase,
            "lowercase" => ScalarFn::Lowercase,
            "length" => ScalarFn::Length,
            "is_null" => ScalarFn::IsNull,
            "day_of_week" => ScalarFn::DayOfWeek,
            "month_of_year" => ScalarFn::MonthOfYear,
            "hour_of_day" => ScalarFn::HourOfDay,
            "day_bucket" => ScalarFn::DayBucket,
            "month_bucket" => ScalarFn::MonthBucket,
            "year_bucket" => ScalarFn::YearBucket,
            "bin10" => ScalarFn::Bin10,
            "bin100" => ScalarFn::Bin100,
            "bin1000" => ScalarFn::Bin1000,
            _ => return None,
        };
        Some(f)
    }

    pub fn resolve(spec: &FunctionSpec) -> EngineResult<Self> {
        match spec {
            FunctionSpec::Named(name) => {
                Self::from_name(name).ok_or_else(|| EngineError::UnknownFunction(name.clone()))
            }
            FunctionSpec::Custom(custom) => Ok(ScalarFn::Custom(custom.clone())),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ScalarFn::Add => "+",
            ScalarFn::Subtract => "-",
            ScalarFn::Multiply => "*",
            ScalarFn::Divide => "/",
            ScalarFn::PercentOf => "%",
            ScalarFn::Pow => "pow",
            ScalarFn::Min => "min",
            ScalarFn::Max => "max",
            ScalarFn::Equal => "==",
            ScalarFn::NotEqual => "!=",
            ScalarFn::Greater => ">",
            ScalarFn::Less => "<",
            ScalarFn::GreaterEq => ">=",
            ScalarFn::LessEq => "<=",
            ScalarFn::ConcatSpace => "concat_space",
            ScalarFn::ConcatComma => "concat_comma",
            ScalarFn::Abs => "abs",
            ScalarFn::Sqrt => "sqrt",
            ScalarFn::Pow2 => "pow2",
            ScalarFn::Invert => "invert",
            ScalarFn::Negate => "negate",
            ScalarFn::Uppercase => "uppercase",
            ScalarFn::Lowercase => "lowercase",
            ScalarFn::Length => "length",
            ScalarFn::IsNull => "is_null",
            ScalarFn::DayOfWeek => "day_of_week",
            ScalarFn::MonthOfYear => "month_of_year",
            ScalarFn::HourOfDay => "hour_of_day",
            ScalarFn::DayBucket => "day_bucket",
            ScalarFn::MonthBucket => "month_bucket",
            ScalarFn::YearBucket => "year_bucket",
            ScalarFn::Bin10 => "bin10",
            ScalarFn::Bin100 => "bin100",
            ScalarFn::Bin1000 => "bin1000",
            ScalarFn::Custom(custom) => custom.name(),
        }
    }

    pub fn arity(&self) -> usize {
        match self {
            ScalarFn::Add
            | ScalarFn::Subtract
            | ScalarFn::Multiply
            | ScalarFn::Divide
            | ScalarFn::PercentOf
            | ScalarFn::Pow
            | ScalarFn::Min
            | ScalarFn::Max
            | ScalarFn::Equal
            | ScalarFn::NotEqual
            | ScalarFn::Greater
            | ScalarFn::Less
            | ScalarFn::GreaterEq
            | ScalarFn::LessEq
            | ScalarFn::ConcatSpace
            | ScalarFn::ConcatComma => 2,
            ScalarFn::Custom(custom) => custom.arity,
            _ => 1,
        }
    }

    pub fn null_policy(&self) -> NullPolicy {
        match self {
            ScalarFn::ConcatSpace | ScalarFn::ConcatComma | ScalarFn::IsNull => {
                NullPolicy::Tolerant
            }
            ScalarFn::Custom(custom) => custom.null_policy,
            _ => NullPolicy::Propagate,
        }
    }

    /// Output type for the given input types, or the first input type the function rejects.
    pub fn output_type(&self, inputs: &[ColumnType]) -> Result<ColumnType, ColumnType> {
        let all = |pred: fn(ColumnType) -> bool| match inputs.iter().find(|t| !pred(**t)) {
            Some(bad) => Err(*bad),
            None => Ok(()),
        };
        match self {
            ScalarFn::Add
            | ScalarFn::Subtract
            | ScalarFn::Multiply
            | ScalarFn::Divide
            | ScalarFn::PercentOf
            | ScalarFn::Pow
            | ScalarFn::Min
            | ScalarFn::Max
            | ScalarFn::Abs
            | ScalarFn::Sqrt
            | ScalarFn::Pow2
            | ScalarFn::Invert
            | ScalarFn::Negate
            | ScalarFn::Bin10
            | ScalarFn::Bin100
            | ScalarFn::Bin1000 => all(ColumnType::is_numeric).map(|_| ColumnType::Float),
            ScalarFn::Equal
            | ScalarFn::NotEqual
            | ScalarFn::Greater
            | ScalarFn::Less
            | ScalarFn::GreaterEq
            | ScalarFn::LessEq => match inputs {
                [a, b] if !comparable(*a, *b) => Err(*b),
                _ => Ok(ColumnType::Boolean),
            },
            ScalarFn::ConcatSpace | ScalarFn::ConcatComma => Ok(ColumnType::String),
            ScalarFn::Uppercase | ScalarFn::Lowercase => {
                all(|t| t == ColumnType::String).map(|_| ColumnType::String)
            }
            ScalarFn::Length => all(|t| t == ColumnType::String).map(|_| ColumnType::Integer),
            ScalarFn::IsNull => Ok(ColumnType::Boolean),
            ScalarFn::DayOfWeek | ScalarFn::MonthOfYear => {
                all(ColumnType::is_temporal).map(|_| ColumnType::String)
            }
            ScalarFn::HourOfDay => all(ColumnType::is_temporal).map(|_| ColumnType::Integer),
            ScalarFn::DayBucket | ScalarFn::MonthBucket | ScalarFn::YearBucket => {
                all(ColumnType::is_temporal).map(|_| ColumnType::Date)
            }
            ScalarFn::Custom(custom) => Ok(custom.output_type),
        }
    }

    /// Evaluate on one row's inputs. Invalid inputs yield null rather than an error.
    pub fn eval(&self, args: &[Value]) -> Value {
        if self.null_policy() == NullPolicy::Propagate && args.iter().any(Value::is_null) {
            return Value::Null;
        }
        let arg = |i: usize| args.get(i).unwrap_or(&NULL);
        let binary = |op: fn(f64, f64) -> Option<f64>| match (number(arg(0)), number(arg(1))) {
            (Some(a), Some(b)) => op(a, b).map(finite).unwrap_or(Value::Null),
            _ => Value::Null,
        };
        let unary = |op: fn(f64) -> Option<f64>| match number(arg(0)) {
            Some(a) => op(a).map(finite).unwrap_or(Value::Null),
            None => Value::Null,
        };
        let ordering = |accept: fn(Ordering) -> bool| match compare(arg(0), arg(1)) {
            Some(ord) => Value::Boolean(accept(ord)),
            None => Value::Null,
        };
        let concat = |sep: &str| {
            let parts: Vec<String> = args
                .iter()
                .map(|v| if v.is_null() { String::new() } else { v.to_string() })
                .collect();
            Value::from(parts.join(sep))
        };

        match self {
            ScalarFn::Add => binary(|a, b| Some(a + b)),
            ScalarFn::Subtract => binary(|a, b| Some(a - b)),
            ScalarFn::Multiply => binary(|a, b| Some(a * b)),
            ScalarFn::Divide => binary(|a, b| (b != 0.0).then(|| a / b)),
            ScalarFn::PercentOf => binary(|a, b| (b != 0.0).then(|| a / b * 100.0)),
            ScalarFn::Pow => binary(|a, b| Some(a.powf(b))),
            ScalarFn::Min => binary(|a, b| Some(OrderedFloat(a).min(OrderedFloat(b)).0)),
            ScalarFn::Max => binary(|a, b| Some(OrderedFloat(a).max(OrderedFloat(b)).0)),
            ScalarFn::Equal => ordering(|o| o == Ordering::Equal),
            ScalarFn::NotEqual => ordering(|o| o != Ordering::Equal),
            ScalarFn::Greater => ordering(|o| o == Ordering::Greater),
            ScalarFn::Less => ordering(|o| o == Ordering::Less),
            ScalarFn::GreaterEq => ordering(|o| o != Ordering::Less),
            ScalarFn::LessEq => ordering(|o| o != Ordering::Greater),
            ScalarFn::ConcatSpace => concat(" "),
            ScalarFn::ConcatComma => concat(", "),
            ScalarFn::Abs => unary(|a| Some(a.abs())),
            ScalarFn::Sqrt => unary(|a| (a >= 0.0).then(|| a.sqrt())),
            ScalarFn::Pow2 => unary(|a| Some(a * a)),
            ScalarFn::Invert => unary(|a| (a != 0.0).then(|| 1.0 / a)),
            ScalarFn::Negate => unary(|a| Some(-a)),
            ScalarFn::Bin10 => unary(|a| Some((a / 10.0).floor() * 10.0)),
            ScalarFn::Bin100 => unary(|a| Some((a / 100.0).floor() * 100.0)),
            ScalarFn::Bin1000 => unary(|a| Some((a / 1000.0).floor() * 1000.0)),
            ScalarFn::Uppercase => match arg(0) {
                Value::String(s) => Value::from(s.to_uppercase()),
                _ => Value::Null,
            },
            ScalarFn::Lowercase => match arg(0) {
                Value::String(s) => Value::from(s.to_lowercase()),
                _ => Value::Null,
            },
            ScalarFn::Length => match arg(0) {
                Value::String(s) => Value::Integer(s.chars().count() as i64),
                _ => Value::Null,
            },
            ScalarFn::IsNull => Value::Boolean(arg(0).is_null()),
            ScalarFn::DayOfWeek => match timestamp(arg(0)) {
                Some(dt) => {
                    let day = dt.weekday().num_days_from_sunday() as usize;
                    Value::from(format!("{} {}", day + 1, WEEKDAYS[day]))
                }
                None => Value::Null,
            },
            ScalarFn::MonthOfYear => match timestamp(arg(0)) {
                Some(dt) => {
                    let month = dt.month0() as usize;
                    Value::from(format!("{:02} {}", month + 1, MONTHS[month]))
                }
                None => Value::Null,
            },
            ScalarFn::HourOfDay => match timestamp(arg(0)) {
                Some(dt) => Value::Integer(dt.hour().into()),
                None => Value::Null,
            },
            ScalarFn::DayBucket => match arg(0) {
                Value::Date(ms) | Value::DateTime(ms) => Value::Date(floor_to_day(*ms)),
                _ => Value::Null,
            },
            ScalarFn::MonthBucket => match timestamp(arg(0)) {
                Some(dt) => date_value(NaiveDate::from_ymd_opt(dt.year(), dt.month(), 1)),
                None => Value::Null,
            },
            ScalarFn::YearBucket => match timestamp(arg(0)) {
                Some(dt) => date_value(NaiveDate::from_ymd_opt(dt.year(), 1, 1)),
                None => Value::Null,
            },
            ScalarFn::Custom(custom) => custom.call(args),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn arithmetic_is_float_and_null_on_zero_division() {
        let div = ScalarFn::from_name("/").unwrap();
        assert_eq!(div.eval(&[Value::Integer(3), Value::Integer(2)]), Value::Float(1.5));
        assert_eq!(div.eval(&[Value::Integer(3), Value::Integer(0)]), Value::Null);
        assert_eq!(
            div.output_type(&[ColumnType::Integer, ColumnType::Integer]),
            Ok(ColumnType::Float)
        );
        assert_eq!(
            div.output_type(&[ColumnType::Integer, ColumnType::String]),
            Err(ColumnType::String)
        );
    }

    #[test]
    fn null_policy_is_per_function() {
        let add = ScalarFn::Add;
        assert_eq!(add.eval(&[Value::Null, Value::Integer(1)]), Value::Null);

        let concat = ScalarFn::ConcatComma;
        assert_eq!(
            concat.eval(&[Value::Null, Value::from("b")]),
            Value::from(", b")
        );
        assert_eq!(ScalarFn::IsNull.eval(&[Value::Null]), Value::Boolean(true));
    }

    #[test]
    fn temporal_functions() {
        // 2024-03-15T13:45:00Z, a Friday.
        let ts = Value::DateTime(1_710_510_300_000);
        assert_eq!(ScalarFn::DayOfWeek.eval(&[ts.clone()]), Value::from("6 Friday"));
        assert_eq!(ScalarFn::MonthOfYear.eval(&[ts.clone()]), Value::from("03 March"));
        assert_eq!(ScalarFn::HourOfDay.eval(&[ts.clone()]), Value::Integer(13));
        assert_eq!(
            ScalarFn::MonthBucket.eval(&[ts.clone()]),
            Value::Date(1_709_251_200_000)
        );
        assert_eq!(ScalarFn::DayBucket.eval(&[ts]), Value::Date(1_710_460_800_000));
    }

    #[test]
    fn comparisons_mix_integer_and_float() {
        assert_eq!(
            ScalarFn::Equal.eval(&[Value::Integer(2), Value::Float(2.0)]),
            Value::Boolean(true)
        );
        assert_eq!(
            ScalarFn::Less.output_type(&[ColumnType::String, ColumnType::Integer]),
            Err(ColumnType::Integer)
        );
    }

    #[test]
    fn custom_functions_carry_their_policy() {
        let f = CustomFn::new("first_char", 1, ColumnType::String, |args| match &args[0] {
            Value::String(s) => Value::from(s.chars().take(1).collect::<String>()),
            _ => Value::from("?"),
        })
        .with_null_policy(NullPolicy::Tolerant);
        let scalar = ScalarFn::Custom(f);
        assert_eq!(scalar.eval(&[Value::from("hello")]), Value::from("h"));
        assert_eq!(scalar.eval(&[Value::Null]), Value::from("?"));
        assert_eq!(scalar.output_type(&[ColumnType::Integer]), Ok(ColumnType::String));
    }

    #[test]
    fn panicking_custom_functions_yield_null() {
        let f = CustomFn::new("checked", 1, ColumnType::Integer, |args| match &args[0] {
            Value::Integer(v) if *v < 0 => panic!("negative input"),
            other => other.clone(),
        });
        let scalar = ScalarFn::Custom(f);
        assert_eq!(scalar.eval(&[Value::Integer(2)]), Value::Integer(2));
        assert_eq!(scalar.eval(&[Value::Integer(-1)]), Value::Null);
        assert_eq!(scalar.eval(&[Value::Integer(3)]), Value::Integer(3));
    }
}
