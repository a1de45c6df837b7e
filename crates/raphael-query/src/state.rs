//! Accumulated query state.
//!
//! [`QueryState`] is the backend-neutral description of a query: conditions,
//! ordering and a window. Query sets clone and extend it; backends either
//! render it to SQL ([`crate::sql`]) or evaluate it in process
//! ([`crate::eval`]).

use std::fmt;

use crate::lookup::Predicate;

/// A filter term. All conditions in a state are ANDed together.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// The predicate must hold.
    Match(Predicate),
    /// The conjunction of the predicates must not hold.
    Not(Vec<Predicate>),
}

impl Condition {
    /// Field names the condition refers to.
    pub fn fields(&self) -> Vec<&str> {
        match self {
            Condition::Match(p) => vec![p.field.as_str()],
            Condition::Not(group) => group.iter().map(|p| p.field.as_str()).collect(),
        }
    }
}

/// One ordering term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderKey {
    Asc(String),
    Desc(String),
    Random,
}

impl OrderKey {
    /// Parse `"field"`, `"-field"` or `"?"`.
    pub fn parse(spec: &str) -> Self {
        if spec == "?" {
            OrderKey::Random
        } else if let Some(field) = spec.strip_prefix('-') {
            OrderKey::Desc(field.to_string())
        } else {
            OrderKey::Asc(spec.strip_prefix('+').unwrap_or(spec).to_string())
        }
    }

    pub fn field(&self) -> Option<&str> {
        match self {
            OrderKey::Asc(f) | OrderKey::Desc(f) => Some(f),
            OrderKey::Random => None,
        }
    }

    /// The same key in the opposite direction.
    pub fn reversed(&self) -> Self {
        match self {
            OrderKey::Asc(f) => OrderKey::Desc(f.clone()),
            OrderKey::Desc(f) => OrderKey::Asc(f.clone()),
            OrderKey::Random => OrderKey::Random,
        }
    }
}

impl fmt::Display for OrderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderKey::Asc(field) => write!(f, "{field}"),
            OrderKey::Desc(field) => write!(f, "-{field}"),
            OrderKey::Random => write!(f, "?"),
        }
    }
}

/// An aggregate function applied to one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Aggregate {
    /// Number of non-NULL values.
    Count(String),
    Sum(String),
    Avg(String),
    Min(String),
    Max(String),
}

impl Aggregate {
    pub fn field(&self) -> &str {
        match self {
            Aggregate::Count(f)
            | Aggregate::Sum(f)
            | Aggregate::Avg(f)
            | Aggregate::Min(f)
            | Aggregate::Max(f) => f,
        }
    }

    pub const fn function(&self) -> &'static str {
        match self {
            Aggregate::Count(_) => "COUNT",
            Aggregate::Sum(_) => "SUM",
            Aggregate::Avg(_) => "AVG",
            Aggregate::Min(_) => "MIN",
            Aggregate::Max(_) => "MAX",
        }
    }

    /// Result key, `{field}__{function}` in lowercase (e.g. `price__avg`).
    pub fn alias(&self) -> String {
        format!("{}__{}", self.field(), self.function().to_lowercase())
    }
}

/// Conditions, ordering and window of a query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryState {
    pub conditions: Vec<Condition>,
    pub order_by: Vec<OrderKey>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl QueryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// AND every predicate into the state.
    pub fn filter(mut self, predicates: impl IntoIterator<Item = Predicate>) -> Self {
        self.conditions
            .extend(predicates.into_iter().map(Condition::Match));
        self
    }

    /// Exclude rows matching all of `predicates`. An empty group is a no-op.
    pub fn exclude(mut self, predicates: impl IntoIterator<Item = Predicate>) -> Self {
        let group: Vec<Predicate> = predicates.into_iter().collect();
        if !group.is_empty() {
            self.conditions.push(Condition::Not(group));
        }
        self
    }

    /// Replace the ordering.
    pub fn order_by(mut self, keys: impl IntoIterator<Item = OrderKey>) -> Self {
        self.order_by = keys.into_iter().collect();
        self
    }

    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub const fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// The state with its window removed.
    pub fn unbounded(&self) -> Self {
        Self {
            conditions: self.conditions.clone(),
            order_by: self.order_by.clone(),
            limit: None,
            offset: None,
        }
    }

    pub const fn is_windowed(&self) -> bool {
        self.limit.is_some() || self.offset.is_some()
    }

    /// Every field name referenced by conditions and ordering.
    pub fn referenced_fields(&self) -> Vec<&str> {
        let mut fields: Vec<&str> = self.conditions.iter().flat_map(Condition::fields).collect();
        fields.extend(self.order_by.iter().filter_map(OrderKey::field));
        fields
    }

    /// Rewrite field references through `resolve` (e.g. the `pk` alias).
    pub fn map_fields(&mut self, mut resolve: impl FnMut(&str) -> String) {
        for condition in &mut self.conditions {
            match condition {
                Condition::Match(p) => p.field = resolve(&p.field),
                Condition::Not(group) => {
                    for p in group {
                        p.field = resolve(&p.field);
                    }
                }
            }
        }
        for key in &mut self.order_by {
            match key {
                OrderKey::Asc(f) | OrderKey::Desc(f) => *f = resolve(f),
                OrderKey::Random => {}
            }
        }
    }
}
