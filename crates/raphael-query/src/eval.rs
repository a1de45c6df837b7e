//! In-process evaluation of a [`QueryState`] over rows.
//!
//! Semantics follow the SQL renderer. NULL never satisfies a comparison, so
//! excluded groups keep rows whose column is NULL. `exact` with a NULL
//! operand means `IS NULL`, NULLs sort first, and text lookups on non-text
//! columns compare against the value's display form.

use std::cmp::Ordering;
use std::collections::hash_map::RandomState;
use std::hash::BuildHasher;

use raphael_core::{Row, Value};

use crate::lookup::{Lookup, Predicate};
use crate::state::{Aggregate, Condition, OrderKey, QueryState};

/// Whether `row` satisfies every condition.
pub fn matches(row: &Row, conditions: &[Condition]) -> bool {
    conditions.iter().all(|condition| match condition {
        Condition::Match(p) => predicate_matches(row, p),
        Condition::Not(group) => !group.iter().all(|p| predicate_matches(row, p)),
    })
}

/// Whether `row` satisfies one predicate. Missing columns read as NULL.
pub fn predicate_matches(row: &Row, predicate: &Predicate) -> bool {
    let value = row.get_named(&predicate.field).unwrap_or(&Value::Null);
    match &predicate.lookup {
        Lookup::Exact(Value::Null) => value.is_null(),
        Lookup::Exact(operand) => value.loosely_equals(operand),
        Lookup::IsNull(expected) => value.is_null() == *expected,
        Lookup::IExact(s) => text_of(value).is_some_and(|t| t.to_lowercase() == s.to_lowercase()),
        Lookup::Contains(s) => text_of(value).is_some_and(|t| t.contains(s.as_str())),
        Lookup::IContains(s) => {
            text_of(value).is_some_and(|t| t.to_lowercase().contains(&s.to_lowercase()))
        }
        Lookup::StartsWith(s) => text_of(value).is_some_and(|t| t.starts_with(s.as_str())),
        Lookup::IStartsWith(s) => {
            text_of(value).is_some_and(|t| t.to_lowercase().starts_with(&s.to_lowercase()))
        }
        Lookup::EndsWith(s) => text_of(value).is_some_and(|t| t.ends_with(s.as_str())),
        Lookup::IEndsWith(s) => {
            text_of(value).is_some_and(|t| t.to_lowercase().ends_with(&s.to_lowercase()))
        }
        Lookup::Gt(operand) => compare_non_null(value, operand) == Some(Ordering::Greater),
        Lookup::Gte(operand) => matches!(
            compare_non_null(value, operand),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        Lookup::Lt(operand) => compare_non_null(value, operand) == Some(Ordering::Less),
        Lookup::Lte(operand) => matches!(
            compare_non_null(value, operand),
            Some(Ordering::Less | Ordering::Equal)
        ),
        Lookup::In(values) => values.iter().any(|v| value.loosely_equals(v)),
        Lookup::Range(low, high) => {
            matches!(
                compare_non_null(value, low),
                Some(Ordering::Greater | Ordering::Equal)
            ) && matches!(
                compare_non_null(value, high),
                Some(Ordering::Less | Ordering::Equal)
            )
        }
    }
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Text(s) | Value::Decimal(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn compare_non_null(value: &Value, operand: &Value) -> Option<Ordering> {
    if value.is_null() || operand.is_null() {
        return None;
    }
    value.compare(operand)
}

/// Stable sort by `keys`. Incomparable values keep their relative order.
pub fn sort(rows: &mut Vec<Row>, keys: &[OrderKey]) {
    if keys.is_empty() {
        return;
    }
    let random = keys.contains(&OrderKey::Random);
    let state = RandomState::new();
    let mut keyed: Vec<(u64, Row)> = rows
        .drain(..)
        .enumerate()
        .map(|(idx, row)| (if random { state.hash_one(idx) } else { 0 }, row))
        .collect();

    keyed.sort_by(|(ra, a), (rb, b)| {
        for key in keys {
            let ord = match key {
                OrderKey::Asc(f) => compare_column(a, b, f),
                OrderKey::Desc(f) => compare_column(b, a, f),
                OrderKey::Random => ra.cmp(rb),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });

    rows.extend(keyed.into_iter().map(|(_, row)| row));
}

fn compare_column(a: &Row, b: &Row, field: &str) -> Ordering {
    let left = a.get_named(field).unwrap_or(&Value::Null);
    let right = b.get_named(field).unwrap_or(&Value::Null);
    left.compare(right).unwrap_or(Ordering::Equal)
}

/// Apply `offset` then `limit`.
pub fn window<T>(items: Vec<T>, limit: Option<usize>, offset: Option<usize>) -> Vec<T> {
    let skip = offset.unwrap_or(0);
    let take = limit.unwrap_or(usize::MAX);
    items.into_iter().skip(skip).take(take).collect()
}

/// Filter, order and window `rows` according to `state`.
pub fn apply(rows: impl IntoIterator<Item = Row>, state: &QueryState) -> Vec<Row> {
    let mut selected: Vec<Row> = rows
        .into_iter()
        .filter(|row| matches(row, &state.conditions))
        .collect();
    sort(&mut selected, &state.order_by);
    window(selected, state.limit, state.offset)
}

/// Compute every aggregate over `rows`, keyed by [`Aggregate::alias`].
pub fn aggregate(rows: &[Row], aggregates: &[Aggregate]) -> Row {
    let pairs = aggregates
        .iter()
        .map(|agg| {
            let values: Vec<&Value> = rows
                .iter()
                .filter_map(|row| row.get_named(agg.field()))
                .filter(|v| !v.is_null())
                .collect();
            (agg.alias(), aggregate_values(agg, &values))
        })
        .collect();
    Row::from_pairs(pairs)
}

fn aggregate_values(agg: &Aggregate, values: &[&Value]) -> Value {
    match agg {
        Aggregate::Count(_) => Value::BigInt(i64::try_from(values.len()).unwrap_or(i64::MAX)),
        Aggregate::Sum(_) if values.is_empty() => Value::Null,
        Aggregate::Sum(_) => {
            let integral = values
                .iter()
                .all(|v| v.as_i64().is_some() && !matches!(v, Value::Double(_) | Value::Decimal(_)));
            if integral {
                Value::BigInt(values.iter().filter_map(|v| v.as_i64()).sum())
            } else {
                Value::Double(values.iter().filter_map(|v| v.as_f64()).sum())
            }
        }
        Aggregate::Avg(_) => {
            let numbers: Vec<f64> = values.iter().filter_map(|v| v.as_f64()).collect();
            if numbers.is_empty() {
                Value::Null
            } else {
                Value::Double(numbers.iter().sum::<f64>() / numbers.len() as f64)
            }
        }
        Aggregate::Min(_) => extreme(values, Ordering::Less),
        Aggregate::Max(_) => extreme(values, Ordering::Greater),
    }
}

fn extreme(values: &[&Value], wanted: Ordering) -> Value {
    let mut best: Option<&Value> = None;
    for &value in values {
        best = match best {
            Some(current) if value.compare(current) != Some(wanted) => Some(current),
            _ => Some(value),
        };
    }
    best.cloned().unwrap_or(Value::Null)
}
