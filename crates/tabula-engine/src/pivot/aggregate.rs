use ordered_float::OrderedFloat;
use std::collections::BTreeMap;
use std::fmt;
use tabula_columnar::{ColumnType, Value};

/// Aggregate function applied to a column of a grouped view.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Aggregate {
    Sum,
    SumAbs,
    Mean,
    Count,
    DistinctCount,
    Any,
    First,
    Last,
    High,
    Low,
    Dominant,
    Unique,
    Median,
}

impl Aggregate {
    pub fn parse(name: &str) -> Option<Self> {
        let agg = match name.trim().to_ascii_lowercase().as_str() {
            "sum" => Aggregate::Sum,
            "sum abs" => Aggregate::SumAbs,
            "avg" | "mean" => Aggregate::Mean,
            "count" => Aggregate::Count,
            "distinct count" => Aggregate::DistinctCount,
            "any" => Aggregate::Any,
            "first" | "first by index" => Aggregate::First,
            "last" | "last by index" => Aggregate::Last,
            "high" => Aggregate::High,
            "low" => Aggregate::Low,
            "dominant" => Aggregate::Dominant,
            "unique" => Aggregate::Unique,
            "median" => Aggregate::Median,
            _ => return None,
        };
        Some(agg)
    }

    pub fn name(self) -> &'static str {
        match self {
            Aggregate::Sum => "sum",
            Aggregate::SumAbs => "sum abs",
            Aggregate::Mean => "avg",
            Aggregate::Count => "count",
            Aggregate::DistinctCount => "distinct count",
            Aggregate::Any => "any",
            Aggregate::First => "first",
            Aggregate::Last => "last",
            Aggregate::High => "high",
            Aggregate::Low => "low",
            Aggregate::Dominant => "dominant",
            Aggregate::Unique => "unique",
            Aggregate::Median => "median",
        }
    }

    pub fn default_for(column_type: ColumnType) -> Self {
        if column_type.is_numeric() {
            Aggregate::Sum
        } else {
            Aggregate::Count
        }
    }

    /// The aggregate actually applied to a column of `column_type`: numeric-only aggregates fall
    /// back to `count` on other columns.
    pub fn resolve_for(self, column_type: ColumnType) -> Self {
        match self {
            Aggregate::Sum | Aggregate::SumAbs | Aggregate::Mean | Aggregate::Median
                if !column_type.is_numeric() =>
            {
                Aggregate::Count
            }
            other => other,
        }
    }

    /// Type of the aggregated value for a column of `column_type`.
    pub fn output_type(self, column_type: ColumnType) -> ColumnType {
        match self.resolve_for(column_type) {
            Aggregate::Count | Aggregate::DistinctCount => ColumnType::Integer,
            Aggregate::Mean | Aggregate::Median => ColumnType::Float,
            Aggregate::Sum | Aggregate::SumAbs => {
                if column_type == ColumnType::Integer {
                    ColumnType::Integer
                } else {
                    ColumnType::Float
                }
            }
            Aggregate::Any
            | Aggregate::First
            | Aggregate::Last
            | Aggregate::High
            | Aggregate::Low
            | Aggregate::Dominant
            | Aggregate::Unique => column_type,
        }
    }
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Running state of one aggregate over a bag of rows. Every variant supports removal, so a
/// node never needs rescanning.
#[derive(Clone, Debug)]
pub(crate) enum Accumulator {
    Count {
        rows: usize,
    },
    Sum {
        abs: bool,
        integer: bool,
        non_null: usize,
        int_sum: i128,
        floats: FloatBag,
    },
    Mean {
        non_null: usize,
        int_sum: i128,
        floats: FloatBag,
    },
    /// Value → multiplicity, for aggregates that depend on the distribution of values.
    Counts {
        kind: Aggregate,
        non_null: usize,
        counts: BTreeMap<Value, usize>,
    },
    /// Row → value, for aggregates that depend on row order.
    Ordered {
        kind: Aggregate,
        values: BTreeMap<usize, Value>,
    },
}

impl Accumulator {
    pub fn new(aggregate: Aggregate, column_type: ColumnType) -> Self {
        match aggregate.resolve_for(column_type) {
            Aggregate::Count => Accumulator::Count { rows: 0 },
            kind @ (Aggregate::Sum | Aggregate::SumAbs) => Accumulator::Sum {
                abs: kind == Aggregate::SumAbs,
                integer: column_type == ColumnType::Integer,
                non_null: 0,
                int_sum: 0,
                floats: FloatBag::default(),
            },
            Aggregate::Mean => Accumulator::Mean {
                non_null: 0,
                int_sum: 0,
                floats: FloatBag::default(),
            },
            kind @ (Aggregate::DistinctCount
            | Aggregate::Dominant
            | Aggregate::Unique
            | Aggregate::High
            | Aggregate::Low
            | Aggregate::Median) => Accumulator::Counts {
                kind,
                non_null: 0,
                counts: BTreeMap::new(),
            },
            kind @ (Aggregate::Any | Aggregate::First | Aggregate::Last) => Accumulator::Ordered {
                kind,
                values: BTreeMap::new(),
            },
        }
    }

    pub fn add(&mut self, row: usize, value: &Value) {
        match self {
            Accumulator::Count { rows } => *rows += 1,
            _ if value.is_null() => {}
            Accumulator::Sum {
                abs,
                non_null,
                int_sum,
                floats,
                ..
            } => {
                *non_null += 1;
                match term(value, *abs) {
                    Term::Integer(v) => *int_sum += v,
                    Term::Float(v) => floats.insert(v),
                }
            }
            Accumulator::Mean {
                non_null,
                int_sum,
                floats,
            } => {
                *non_null += 1;
                match term(value, false) {
                    Term::Integer(v) => *int_sum += v,
                    Term::Float(v) => floats.insert(v),
                }
            }
            Accumulator::Counts {
                non_null, counts, ..
            } => {
                *non_null += 1;
                *counts.entry(value.clone()).or_insert(0) += 1;
            }
            Accumulator::Ordered { values, .. } => {
                values.insert(row, value.clone());
            }
        }
    }

    pub fn remove(&mut self, row: usize, value: &Value) {
        match self {
            Accumulator::Count { rows } => *rows = rows.saturating_sub(1),
            _ if value.is_null() => {}
            Accumulator::Sum {
                abs,
                non_null,
                int_sum,
                floats,
                ..
            } => {
                *non_null = non_null.saturating_sub(1);
                match term(value, *abs) {
                    Term::Integer(v) => *int_sum -= v,
                    Term::Float(v) => floats.remove(v),
                }
            }
            Accumulator::Mean {
                non_null,
                int_sum,
                floats,
            } => {
                *non_null = non_null.saturating_sub(1);
                match term(value, false) {
                    Term::Integer(v) => *int_sum -= v,
                    Term::Float(v) => floats.remove(v),
                }
            }
            Accumulator::Counts {
                non_null, counts, ..
            } => {
                if let Some(count) = counts.get_mut(value) {
                    *count -= 1;
                    *non_null = non_null.saturating_sub(1);
                    if *count == 0 {
                        counts.remove(value);
                    }
                }
            }
            Accumulator::Ordered { values, .. } => {
                values.remove(&row);
            }
        }
    }

    pub fn value(&self) -> Value {
        match self {
            Accumulator::Count { rows } => Value::Integer(*rows as i64),
            Accumulator::Sum { non_null: 0, .. } | Accumulator::Mean { non_null: 0, .. } => {
                Value::Null
            }
            Accumulator::Sum {
                integer: true,
                int_sum,
                ..
            } => Value::Integer((*int_sum).clamp(i64::MIN.into(), i64::MAX.into()) as i64),
            Accumulator::Sum {
                int_sum, floats, ..
            } => Value::Float(floats.sum(*int_sum as f64)),
            Accumulator::Mean {
                non_null,
                int_sum,
                floats,
            } => Value::Float(floats.sum(*int_sum as f64) / *non_null as f64),
            Accumulator::Counts {
                kind,
                non_null,
                counts,
            } => match kind {
                Aggregate::DistinctCount => Value::Integer(counts.len() as i64),
                Aggregate::High => counts.keys().next_back().cloned().unwrap_or_default(),
                Aggregate::Low => counts.keys().next().cloned().unwrap_or_default(),
                Aggregate::Unique if counts.len() == 1 => {
                    counts.keys().next().cloned().unwrap_or_default()
                }
                Aggregate::Dominant => {
                    // Ties go to the smallest value.
                    let mut best: Option<(&Value, usize)> = None;
                    for (value, count) in counts {
                        if best.map_or(true, |(_, c)| *count > c) {
                            best = Some((value, *count));
                        }
                    }
                    best.map(|(v, _)| v.clone()).unwrap_or_default()
                }
                Aggregate::Median => median(counts, *non_null),
                _ => Value::Null,
            },
            Accumulator::Ordered { kind, values } => match kind {
                Aggregate::Last => values.values().next_back().cloned().unwrap_or_default(),
                _ => values.values().next().cloned().unwrap_or_default(),
            },
        }
    }
}

enum Term {
    Integer(i128),
    Float(f64),
}

fn term(value: &Value, abs: bool) -> Term {
    match value {
        Value::Integer(v) => {
            let v = i128::from(*v);
            Term::Integer(if abs { v.abs() } else { v })
        }
        other => {
            let v = other.as_f64().unwrap_or(0.0);
            Term::Float(if abs { v.abs() } else { v })
        }
    }
}

/// Multiset of float inputs. The total is folded in value order, so it depends only on which
/// values are present and not on the order they were added or removed in.
#[derive(Clone, Debug, Default)]
pub(crate) struct FloatBag {
    counts: BTreeMap<OrderedFloat<f64>, usize>,
}

impl FloatBag {
    fn insert(&mut self, value: f64) {
        *self.counts.entry(OrderedFloat(value)).or_insert(0) += 1;
    }

    fn remove(&mut self, value: f64) {
        let key = OrderedFloat(value);
        if let Some(count) = self.counts.get_mut(&key) {
            *count -= 1;
            if *count == 0 {
                self.counts.remove(&key);
            }
        }
    }

    /// Neumaier-compensated sum of `start` and every value.
    fn sum(&self, start: f64) -> f64 {
        let mut sum = start;
        let mut compensation = 0.0;
        for (value, count) in &self.counts {
            let term = value.0 * *count as f64;
            let next = sum + term;
            compensation += if sum.abs() >= term.abs() {
                (sum - next) + term
            } else {
                (term - next) + sum
            };
            sum = next;
        }
        sum + compensation
    }
}

fn nth(counts: &BTreeMap<Value, usize>, n: usize) -> Option<f64> {
    let mut seen = 0usize;
    for (value, count) in counts {
        seen += count;
        if n < seen {
            return value.as_f64();
        }
    }
    None
}

fn median(counts: &BTreeMap<Value, usize>, total: usize) -> Value {
    if total == 0 {
        return Value::Null;
    }
    let mid = total / 2;
    let value = if total % 2 == 1 {
        nth(counts, mid)
    } else {
        nth(counts, mid - 1).zip(nth(counts, mid)).map(|(a, b)| (a + b) / 2.0)
    };
    value.map(Value::Float).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn run(aggregate: Aggregate, column_type: ColumnType, values: &[Value]) -> Accumulator {
        let mut acc = Accumulator::new(aggregate, column_type);
        for (row, value) in values.iter().enumerate() {
            acc.add(row, value);
        }
        acc
    }

    #[test]
    fn output_types_follow_base_type_and_aggregate() {
        use ColumnType::*;
        let cases = [
            (Aggregate::Sum, Integer, Integer),
            (Aggregate::Sum, Float, Float),
            (Aggregate::Sum, String, Integer),
            (Aggregate::SumAbs, Integer, Integer),
            (Aggregate::Mean, Integer, Float),
            (Aggregate::Median, Integer, Float),
            (Aggregate::Count, Boolean, Integer),
            (Aggregate::DistinctCount, String, Integer),
            (Aggregate::DistinctCount, Float, Integer),
            (Aggregate::Dominant, Boolean, Boolean),
            (Aggregate::Last, Date, Date),
            (Aggregate::High, DateTime, DateTime),
            (Aggregate::Unique, String, String),
        ];
        for (aggregate, base, expected) in cases {
            assert_eq!(aggregate.output_type(base), expected, "{aggregate} over {base}");
        }
    }

    #[test]
    fn sums_and_means_ignore_nulls_but_count_does_not() {
        let values = [Value::Integer(3), Value::Null, Value::Integer(-5)];
        assert_eq!(run(Aggregate::Sum, ColumnType::Integer, &values).value(), Value::Integer(-2));
        assert_eq!(run(Aggregate::SumAbs, ColumnType::Integer, &values).value(), Value::Integer(8));
        assert_eq!(run(Aggregate::Mean, ColumnType::Integer, &values).value(), Value::Float(-1.0));
        assert_eq!(run(Aggregate::Count, ColumnType::Integer, &values).value(), Value::Integer(3));
        assert_eq!(
            run(Aggregate::Sum, ColumnType::Integer, &[Value::Null]).value(),
            Value::Null
        );
    }

    #[test]
    fn removal_matches_a_fresh_fold() {
        let values = [
            Value::from("b"),
            Value::from("a"),
            Value::from("b"),
            Value::from("c"),
        ];
        for aggregate in [
            Aggregate::DistinctCount,
            Aggregate::Dominant,
            Aggregate::High,
            Aggregate::Low,
            Aggregate::First,
            Aggregate::Last,
            Aggregate::Unique,
        ] {
            let mut acc = run(aggregate, ColumnType::String, &values);
            acc.remove(0, &values[0]);
            acc.remove(3, &values[3]);
            let mut fresh = Accumulator::new(aggregate, ColumnType::String);
            fresh.add(1, &values[1]);
            fresh.add(2, &values[2]);
            assert_eq!(acc.value(), fresh.value(), "{aggregate}");
        }
    }

    #[test]
    fn float_sums_do_not_depend_on_history() {
        let values = [Value::Float(0.1), Value::Float(0.2), Value::Float(0.3)];
        for aggregate in [Aggregate::Sum, Aggregate::SumAbs, Aggregate::Mean] {
            let mut acc = run(aggregate, ColumnType::Float, &values);
            acc.remove(1, &values[1]);
            let mut fresh = Accumulator::new(aggregate, ColumnType::Float);
            fresh.add(2, &values[2]);
            fresh.add(0, &values[0]);
            assert_eq!(acc.value(), fresh.value(), "{aggregate}");
        }

        let mut acc = run(Aggregate::Sum, ColumnType::Float, &values);
        for (row, value) in values.iter().enumerate() {
            acc.remove(row, value);
        }
        assert_eq!(acc.value(), Value::Null);
        acc.add(0, &Value::Float(0.5));
        assert_eq!(acc.value(), Value::Float(0.5));
    }

    #[test]
    fn distribution_aggregates() {
        let values = [
            Value::Integer(4),
            Value::Integer(1),
            Value::Integer(4),
            Value::Integer(2),
        ];
        assert_eq!(
            run(Aggregate::Dominant, ColumnType::Integer, &values).value(),
            Value::Integer(4)
        );
        assert_eq!(run(Aggregate::Median, ColumnType::Integer, &values).value(), Value::Float(3.0));
        assert_eq!(run(Aggregate::Unique, ColumnType::Integer, &values).value(), Value::Null);
        assert_eq!(run(Aggregate::Low, ColumnType::Integer, &values).value(), Value::Integer(1));
        assert_eq!(run(Aggregate::Last, ColumnType::Integer, &values).value(), Value::Integer(2));
    }

    #[test]
    fn unknown_names_do_not_parse() {
        assert_eq!(Aggregate::parse("distinct count"), Some(Aggregate::DistinctCount));
        assert_eq!(Aggregate::parse("mean"), Some(Aggregate::Mean));
        assert_eq!(Aggregate::parse("geometric mean"), None);
    }
}
