//! Field lookups and predicates.
//!
//! A [`Predicate`] pairs a field name with a [`Lookup`]. Predicates are built
//! either with the typed constructors (`Predicate::eq`, `Predicate::gt`, ...)
//! or parsed from a double-underscore key such as `"title__icontains"`.

use raphael_core::{Error, Result, Value};

/// Separator between a field name and its lookup suffix.
pub const LOOKUP_SEPARATOR: &str = "__";

/// A comparison applied to one field.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// Equality; a NULL operand matches NULL fields.
    Exact(Value),
    IExact(String),
    Contains(String),
    IContains(String),
    StartsWith(String),
    IStartsWith(String),
    EndsWith(String),
    IEndsWith(String),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    /// Membership; an empty list matches nothing.
    In(Vec<Value>),
    IsNull(bool),
    /// Inclusive range.
    Range(Value, Value),
}

impl Lookup {
    /// The suffix naming this lookup in a `field__suffix` key.
    pub const fn suffix(&self) -> &'static str {
        match self {
            Lookup::Exact(_) => "exact",
            Lookup::IExact(_) => "iexact",
            Lookup::Contains(_) => "contains",
            Lookup::IContains(_) => "icontains",
            Lookup::StartsWith(_) => "startswith",
            Lookup::IStartsWith(_) => "istartswith",
            Lookup::EndsWith(_) => "endswith",
            Lookup::IEndsWith(_) => "iendswith",
            Lookup::Gt(_) => "gt",
            Lookup::Gte(_) => "gte",
            Lookup::Lt(_) => "lt",
            Lookup::Lte(_) => "lte",
            Lookup::In(_) => "in",
            Lookup::IsNull(_) => "isnull",
            Lookup::Range(_, _) => "range",
        }
    }
}

/// A single field condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub field: String,
    pub lookup: Lookup,
}

impl Predicate {
    pub fn new(field: impl Into<String>, lookup: Lookup) -> Self {
        Self {
            field: field.into(),
            lookup,
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, Lookup::Exact(value.into()))
    }

    pub fn iexact(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(field, Lookup::IExact(value.into()))
    }

    pub fn contains(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(field, Lookup::Contains(value.into()))
    }

    pub fn icontains(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(field, Lookup::IContains(value.into()))
    }

    pub fn startswith(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(field, Lookup::StartsWith(value.into()))
    }

    pub fn istartswith(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(field, Lookup::IStartsWith(value.into()))
    }

    pub fn endswith(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(field, Lookup::EndsWith(value.into()))
    }

    pub fn iendswith(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(field, Lookup::IEndsWith(value.into()))
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, Lookup::Gt(value.into()))
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, Lookup::Gte(value.into()))
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, Lookup::Lt(value.into()))
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, Lookup::Lte(value.into()))
    }

    pub fn is_in<V: Into<Value>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Self::new(field, Lookup::In(values.into_iter().map(Into::into).collect()))
    }

    pub fn is_null(field: impl Into<String>, value: bool) -> Self {
        Self::new(field, Lookup::IsNull(value))
    }

    pub fn range(field: impl Into<String>, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        Self::new(field, Lookup::Range(low.into(), high.into()))
    }

    /// Parse a `field` or `field__lookup` key with its operand.
    ///
    /// List-valued lookups (`in`, `range`) take a JSON array operand.
    pub fn parse(key: &str, value: Value) -> Result<Self> {
        let (field, suffix) = match key.rsplit_once(LOOKUP_SEPARATOR) {
            Some((field, suffix)) if is_lookup_suffix(suffix) => (field, suffix),
            _ => (key, "exact"),
        };
        if field.is_empty() {
            return Err(Error::Query(format!("missing field name in lookup {key:?}")));
        }

        let lookup = match suffix {
            "iexact" => Lookup::IExact(text_operand(key, value)?),
            "contains" => Lookup::Contains(text_operand(key, value)?),
            "icontains" => Lookup::IContains(text_operand(key, value)?),
            "startswith" => Lookup::StartsWith(text_operand(key, value)?),
            "istartswith" => Lookup::IStartsWith(text_operand(key, value)?),
            "endswith" => Lookup::EndsWith(text_operand(key, value)?),
            "iendswith" => Lookup::IEndsWith(text_operand(key, value)?),
            "gt" => Lookup::Gt(value),
            "gte" => Lookup::Gte(value),
            "lt" => Lookup::Lt(value),
            "lte" => Lookup::Lte(value),
            "in" => Lookup::In(list_operand(key, value)?),
            "isnull" => match value {
                Value::Bool(b) => Lookup::IsNull(b),
                other => {
                    return Err(Error::Query(format!(
                        "{key} expects a boolean, got {}",
                        other.type_name()
                    )));
                }
            },
            "range" => {
                let mut bounds = list_operand(key, value)?;
                if bounds.len() != 2 {
                    return Err(Error::Query(format!(
                        "{key} expects exactly two bounds, got {}",
                        bounds.len()
                    )));
                }
                let high = bounds.pop().unwrap_or(Value::Null);
                let low = bounds.pop().unwrap_or(Value::Null);
                Lookup::Range(low, high)
            }
            _ => Lookup::Exact(value),
        };

        Ok(Self::new(field, lookup))
    }
}

fn is_lookup_suffix(suffix: &str) -> bool {
    matches!(
        suffix,
        "exact"
            | "iexact"
            | "contains"
            | "icontains"
            | "startswith"
            | "istartswith"
            | "endswith"
            | "iendswith"
            | "gt"
            | "gte"
            | "lt"
            | "lte"
            | "in"
            | "isnull"
            | "range"
    )
}

fn text_operand(key: &str, value: Value) -> Result<String> {
    match value {
        Value::Text(s) | Value::Decimal(s) => Ok(s),
        Value::Null => Err(Error::Query(format!("{key} does not accept NULL"))),
        other => Ok(other.to_string()),
    }
}

fn list_operand(key: &str, value: Value) -> Result<Vec<Value>> {
    match value {
        Value::Json(serde_json::Value::Array(items)) => Ok(items.into_iter().map(json_scalar).collect()),
        other => Err(Error::Query(format!(
            "{key} expects an array, got {}",
            other.type_name()
        ))),
    }
}

fn json_scalar(value: serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::BigInt(i),
            None => n.as_f64().map_or(Value::Null, Value::Double),
        },
        serde_json::Value::String(s) => Value::Text(s),
        other => Value::Json(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_plain_field_is_exact() {
        let p = Predicate::parse("title", Value::from("Dune")).unwrap();
        assert_eq!(p, Predicate::eq("title", "Dune"));
    }

    #[test]
    fn test_parse_suffixes() {
        let p = Predicate::parse("title__icontains", Value::from("dune")).unwrap();
        assert_eq!(p.field, "title");
        assert_eq!(p.lookup, Lookup::IContains("dune".to_string()));

        let p = Predicate::parse("pages__gte", Value::from(100_i64)).unwrap();
        assert_eq!(p.lookup, Lookup::Gte(Value::BigInt(100)));

        let p = Predicate::parse("published__isnull", Value::Bool(true)).unwrap();
        assert_eq!(p.lookup, Lookup::IsNull(true));
    }

    #[test]
    fn test_parse_double_underscore_field_name() {
        // Only a known suffix splits the key.
        let p = Predicate::parse("first__name", Value::from("Ann")).unwrap();
        assert_eq!(p.field, "first__name");
        assert!(matches!(p.lookup, Lookup::Exact(_)));
    }

    #[test]
    fn test_parse_list_operands() {
        let p = Predicate::parse("id__in", Value::Json(json!([1, 2, 3]))).unwrap();
        assert_eq!(
            p.lookup,
            Lookup::In(vec![Value::BigInt(1), Value::BigInt(2), Value::BigInt(3)])
        );

        let p = Predicate::parse("price__range", Value::Json(json!([1.5, 9]))).unwrap();
        assert_eq!(p.lookup, Lookup::Range(Value::Double(1.5), Value::BigInt(9)));
    }

    #[test]
    fn test_parse_errors() {
        assert!(Predicate::parse("id__in", Value::BigInt(1)).is_err());
        assert!(Predicate::parse("price__range", Value::Json(json!([1]))).is_err());
        assert!(Predicate::parse("flag__isnull", Value::from("yes")).is_err());
        assert!(Predicate::parse("__gt", Value::BigInt(1)).is_err());
        assert!(Predicate::parse("title__contains", Value::Null).is_err());
    }

    #[test]
    fn test_suffix_names() {
        assert_eq!(Predicate::is_in("id", [1_i64, 2]).lookup.suffix(), "in");
        assert_eq!(Predicate::range("n", 1_i64, 2_i64).lookup.suffix(), "range");
    }
}
