//! Chainable query sets.
//!
//! Builders accumulate a [`QueryState`] and run nothing until a terminal
//! method is awaited. Terminals go through the owning [`Manager`], so they
//! ready the backend and convert rows the same way manager calls do.

use std::fmt;

use raphael_core::{Cx, Error, Model, Outcome, Row, Value};
use raphael_query::{Aggregate, OrderKey, Predicate, QueryState};

use crate::backend::Backend;
use crate::manager::Manager;

/// A lazily evaluated query over one model.
pub struct QuerySet<M, B> {
    manager: Manager<M, B>,
    state: QueryState,
}

impl<M, B> Clone for QuerySet<M, B> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            state: self.state.clone(),
        }
    }
}

impl<M, B> fmt::Debug for QuerySet<M, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuerySet")
            .field("manager", &self.manager)
            .field("state", &self.state)
            .finish()
    }
}

impl<M: Model, B: Backend> QuerySet<M, B> {
    pub(crate) fn new(manager: Manager<M, B>) -> Self {
        Self {
            manager,
            state: QueryState::new(),
        }
    }

    /// The accumulated state.
    pub fn state(&self) -> &QueryState {
        &self.state
    }

    pub fn filter(mut self, predicates: impl IntoIterator<Item = Predicate>) -> Self {
        self.state = self.state.filter(predicates);
        self
    }

    pub fn exclude(mut self, predicates: impl IntoIterator<Item = Predicate>) -> Self {
        self.state = self.state.exclude(predicates);
        self
    }

    /// Replace the ordering. `-field` sorts descending, `?` randomly.
    pub fn order_by<S: AsRef<str>>(mut self, keys: impl IntoIterator<Item = S>) -> Self {
        self.state = self
            .state
            .order_by(keys.into_iter().map(|key| OrderKey::parse(key.as_ref())));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.state = self.state.limit(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.state = self.state.offset(offset);
        self
    }

    /// Project onto `fields`, yielding named rows.
    pub fn values<S: AsRef<str>>(self, fields: &[S]) -> ValuesQuerySet<M, B> {
        ValuesQuerySet {
            fields: fields.iter().map(|f| f.as_ref().to_string()).collect(),
            inner: self,
        }
    }

    /// Project onto `fields`, yielding tuples.
    pub fn values_list<S: AsRef<str>>(self, fields: &[S]) -> ValuesListQuerySet<M, B> {
        ValuesListQuerySet {
            fields: fields.iter().map(|f| f.as_ref().to_string()).collect(),
            inner: self,
        }
    }

    #[tracing::instrument(level = "debug", skip(self, cx), fields(state = ?self.state))]
    pub async fn all(&self, cx: &Cx) -> Outcome<Vec<M>, Error> {
        self.manager.fetch(cx, &self.state).await
    }

    /// The first instance, ordering by key when no ordering is set.
    pub async fn first(&self, cx: &Cx) -> Outcome<Option<M>, Error> {
        let mut state = self.state.clone();
        if state.order_by.is_empty() {
            state.order_by.push(OrderKey::Asc("pk".to_string()));
        }
        state.limit = Some(state.limit.map_or(1, |limit| limit.min(1)));
        match self.manager.fetch(cx, &state).await {
            Outcome::Ok(found) => Outcome::Ok(found.into_iter().next()),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// The final instance of the full result.
    pub async fn last(&self, cx: &Cx) -> Outcome<Option<M>, Error> {
        match self.manager.fetch(cx, &self.state).await {
            Outcome::Ok(found) => Outcome::Ok(found.into_iter().last()),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    pub async fn count(&self, cx: &Cx) -> Outcome<u64, Error> {
        self.manager.count_state(cx, &self.state).await
    }

    pub async fn exists(&self, cx: &Cx) -> Outcome<bool, Error> {
        self.manager.exists_state(cx, &self.state).await
    }

    pub async fn aggregate(&self, cx: &Cx, aggregates: &[Aggregate]) -> Outcome<Row, Error> {
        self.manager.aggregate_state(cx, aggregates, &self.state).await
    }

    /// Delete every matching row. Fails on a windowed query.
    #[tracing::instrument(level = "debug", skip(self, cx), fields(state = ?self.state))]
    pub async fn delete(&self, cx: &Cx) -> Outcome<u64, Error> {
        self.manager.delete_state(cx, &self.state).await
    }

    /// Apply `assignments` to every matching row. Fails on a windowed query.
    #[tracing::instrument(level = "debug", skip(self, cx), fields(state = ?self.state))]
    pub async fn update(&self, cx: &Cx, assignments: &[(&str, Value)]) -> Outcome<u64, Error> {
        self.manager.update_state(cx, assignments, &self.state).await
    }
}

/// A query set projected onto named rows.
pub struct ValuesQuerySet<M, B> {
    inner: QuerySet<M, B>,
    fields: Vec<String>,
}

impl<M, B> fmt::Debug for ValuesQuerySet<M, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValuesQuerySet")
            .field("inner", &self.inner)
            .field("fields", &self.fields)
            .finish()
    }
}

impl<M: Model, B: Backend> ValuesQuerySet<M, B> {
    pub fn filter(mut self, predicates: impl IntoIterator<Item = Predicate>) -> Self {
        self.inner = self.inner.filter(predicates);
        self
    }

    pub fn exclude(mut self, predicates: impl IntoIterator<Item = Predicate>) -> Self {
        self.inner = self.inner.exclude(predicates);
        self
    }

    pub fn order_by<S: AsRef<str>>(mut self, keys: impl IntoIterator<Item = S>) -> Self {
        self.inner = self.inner.order_by(keys);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.inner = self.inner.limit(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.inner = self.inner.offset(offset);
        self
    }

    /// One row per match holding the projected fields (every field when
    /// none were named).
    pub async fn all(&self, cx: &Cx) -> Outcome<Vec<Row>, Error> {
        self.inner
            .manager
            .fetch_rows(cx, &self.fields, &self.inner.state)
            .await
    }

    pub async fn count(&self, cx: &Cx) -> Outcome<u64, Error> {
        self.inner.count(cx).await
    }
}

/// A query set projected onto tuples.
pub struct ValuesListQuerySet<M, B> {
    inner: QuerySet<M, B>,
    fields: Vec<String>,
}

impl<M, B> fmt::Debug for ValuesListQuerySet<M, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValuesListQuerySet")
            .field("inner", &self.inner)
            .field("fields", &self.fields)
            .finish()
    }
}

impl<M: Model, B: Backend> ValuesListQuerySet<M, B> {
    pub fn filter(mut self, predicates: impl IntoIterator<Item = Predicate>) -> Self {
        self.inner = self.inner.filter(predicates);
        self
    }

    pub fn exclude(mut self, predicates: impl IntoIterator<Item = Predicate>) -> Self {
        self.inner = self.inner.exclude(predicates);
        self
    }

    pub fn order_by<S: AsRef<str>>(mut self, keys: impl IntoIterator<Item = S>) -> Self {
        self.inner = self.inner.order_by(keys);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.inner = self.inner.limit(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.inner = self.inner.offset(offset);
        self
    }

    /// One tuple per match, in the order the fields were named.
    pub async fn all(&self, cx: &Cx) -> Outcome<Vec<Vec<Value>>, Error> {
        match self
            .inner
            .manager
            .fetch_rows(cx, &self.fields, &self.inner.state)
            .await
        {
            Outcome::Ok(rows) => {
                Outcome::Ok(rows.into_iter().map(|row| row.values().to_vec()).collect())
            }
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// The single projected field of every match.
    ///
    /// Requires exactly one field.
    pub async fn flat(&self, cx: &Cx) -> Outcome<Vec<Value>, Error> {
        if self.fields.len() != 1 {
            return Outcome::Err(Error::Query(
                "'flat' is only valid with a single field".to_string(),
            ));
        }
        match self.all(cx).await {
            Outcome::Ok(tuples) => Outcome::Ok(
                tuples
                    .into_iter()
                    .filter_map(|tuple| tuple.into_iter().next())
                    .collect(),
            ),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    pub async fn count(&self, cx: &Cx) -> Outcome<u64, Error> {
        self.inner.count(cx).await
    }
}
