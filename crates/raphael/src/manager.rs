//! Async managers.
//!
//! A [`Manager`] is the per-model facade: every operation first makes sure the
//! backend is ready, runs against the model's shadow, and converts stored rows
//! back into source-model instances.
//!
//! Conversion rules:
//!
//! - **Row to instance**: every column that names a source field is copied;
//!   columns the source model lacks, and values its field type rejects, are
//!   skipped.
//! - **Instance to row**: every non-key field with a non-null value is copied.
//!   A key is copied only when the backend does not generate it, when it is
//!   a UUID the caller already chose, or when the caller forces an insert.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use raphael_core::{Cx, Error, Model, Outcome, Result, Row, Value};
use raphael_query::{Aggregate, Lookup, Predicate, QueryState};
use raphael_schema::{ShadowModel, TargetType};

use crate::backend::{Backend, InsertRow};
use crate::instance::SaveOptions;
use crate::queryset::{QuerySet, ValuesListQuerySet, ValuesQuerySet};
use crate::runtime::Shared;

/// Rows fetched by `get()` before giving up on counting duplicates.
const MAX_GET_RESULTS: usize = 21;

/// Current time in the storage representation of `ty`.
fn now_value(ty: TargetType) -> Option<Value> {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    match ty {
        TargetType::Datetime => Some(Value::Timestamp(
            i64::try_from(elapsed.as_micros()).unwrap_or(i64::MAX),
        )),
        TargetType::Date => Some(Value::Date(
            i32::try_from(elapsed.as_secs() / 86_400).unwrap_or(i32::MAX),
        )),
        _ => None,
    }
}

/// The async facade for one source model.
pub struct Manager<M, B> {
    shared: Arc<Shared<B>>,
    shadow: Arc<ShadowModel>,
    _model: PhantomData<fn() -> M>,
}

impl<M, B> Clone for Manager<M, B> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            shadow: Arc::clone(&self.shadow),
            _model: PhantomData,
        }
    }
}

impl<M, B> fmt::Debug for Manager<M, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manager")
            .field("model", &self.shadow.qualified_name())
            .field("shadow", &self.shadow.name())
            .finish()
    }
}

impl<M: Model, B: Backend> Manager<M, B> {
    pub(crate) fn new(shared: Arc<Shared<B>>, shadow: Arc<ShadowModel>) -> Self {
        Self {
            shared,
            shadow,
            _model: PhantomData,
        }
    }

    /// The shadow model this manager runs against.
    pub fn shadow(&self) -> &Arc<ShadowModel> {
        &self.shadow
    }

    /// A query set over every row.
    pub fn query(&self) -> QuerySet<M, B> {
        QuerySet::new(self.clone())
    }

    // ------------------------------------------------------------------
    // Plumbing shared with query sets
    // ------------------------------------------------------------------

    pub(crate) async fn ready(&self, cx: &Cx) -> Outcome<(), Error> {
        let shared = &self.shared;
        shared
            .initializer
            .ensure_ready(
                cx,
                &shared.backend,
                &shared.config,
                &shared.options,
                Some(&self.shadow),
            )
            .await
    }

    /// Storage column for a field reference (`pk` resolves to the key).
    pub(crate) fn column(&self, name: &str) -> Result<String> {
        self.shadow
            .resolve(name)
            .map(str::to_string)
            .ok_or_else(|| self.unknown_field(name))
    }

    fn unknown_field(&self, name: &str) -> Error {
        Error::Query(format!(
            "Cannot resolve keyword '{name}' into field of {}. Choices are: {}",
            self.shadow.qualified_name(),
            self.shadow.column_names().join(", ")
        ))
    }

    pub(crate) fn columns<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<String>> {
        names.iter().map(|name| self.column(name.as_ref())).collect()
    }

    /// Validate and resolve every field reference in `state`.
    pub(crate) fn prepare(&self, state: &QueryState) -> Result<QueryState> {
        for name in state.referenced_fields() {
            self.column(name)?;
        }
        let mut state = state.clone();
        state.map_fields(|name| self.shadow.resolve(name).unwrap_or(name).to_string());
        Ok(state)
    }

    /// Ready the backend, then resolve `state`.
    async fn begin(&self, cx: &Cx, state: &QueryState) -> Outcome<QueryState, Error> {
        match self.ready(cx).await {
            Outcome::Ok(()) => {}
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
        match self.prepare(state) {
            Ok(state) => Outcome::Ok(state),
            Err(e) => Outcome::Err(e),
        }
    }

    pub(crate) async fn fetch_rows(
        &self,
        cx: &Cx,
        columns: &[String],
        state: &QueryState,
    ) -> Outcome<Vec<Row>, Error> {
        let state = match self.begin(cx, state).await {
            Outcome::Ok(state) => state,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        let columns = match self.columns(columns) {
            Ok(columns) => columns,
            Err(e) => return Outcome::Err(e),
        };
        self.shared
            .backend
            .fetch(cx, &self.shadow, &columns, &state)
            .await
    }

    pub(crate) async fn fetch(&self, cx: &Cx, state: &QueryState) -> Outcome<Vec<M>, Error> {
        match self.fetch_rows(cx, &[], state).await {
            Outcome::Ok(rows) => Outcome::Ok(rows.iter().map(|row| self.to_model(row)).collect()),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    pub(crate) async fn count_state(&self, cx: &Cx, state: &QueryState) -> Outcome<u64, Error> {
        let state = match self.begin(cx, state).await {
            Outcome::Ok(state) => state,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        self.shared.backend.count(cx, &self.shadow, &state).await
    }

    pub(crate) async fn exists_state(&self, cx: &Cx, state: &QueryState) -> Outcome<bool, Error> {
        let state = match self.begin(cx, state).await {
            Outcome::Ok(state) => state,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        self.shared.backend.exists(cx, &self.shadow, &state).await
    }

    pub(crate) async fn delete_state(&self, cx: &Cx, state: &QueryState) -> Outcome<u64, Error> {
        if state.is_windowed() {
            return Outcome::Err(Error::Query(
                "Cannot use 'limit' or 'offset' with delete()".to_string(),
            ));
        }
        let state = match self.begin(cx, state).await {
            Outcome::Ok(state) => state,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        let deleted = match self.shared.backend.delete(cx, &self.shadow, &state).await {
            Outcome::Ok(n) => n,
            other => return other,
        };
        tracing::debug!(model = self.shadow.qualified_name(), deleted, "Deleted rows");
        Outcome::Ok(deleted)
    }

    pub(crate) async fn update_state(
        &self,
        cx: &Cx,
        assignments: &[(&str, Value)],
        state: &QueryState,
    ) -> Outcome<u64, Error> {
        if state.is_windowed() {
            return Outcome::Err(Error::Query(
                "Cannot use 'limit' or 'offset' with update()".to_string(),
            ));
        }
        let state = match self.begin(cx, state).await {
            Outcome::Ok(state) => state,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        let mut resolved = Vec::with_capacity(assignments.len());
        for (name, value) in assignments {
            match self.column(name) {
                Ok(column) => {
                    let value = self.coerce(&column, value.clone());
                    resolved.push((column, value));
                }
                Err(e) => return Outcome::Err(e),
            }
        }
        self.shared
            .backend
            .update(cx, &self.shadow, &resolved, &state)
            .await
    }

    pub(crate) async fn aggregate_state(
        &self,
        cx: &Cx,
        aggregates: &[Aggregate],
        state: &QueryState,
    ) -> Outcome<Row, Error> {
        let state = match self.begin(cx, state).await {
            Outcome::Ok(state) => state,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        let mut resolved = Vec::with_capacity(aggregates.len());
        for aggregate in aggregates {
            let column = match self.column(aggregate.field()) {
                Ok(column) => column,
                Err(e) => return Outcome::Err(e),
            };
            resolved.push(match aggregate {
                Aggregate::Count(_) => Aggregate::Count(column),
                Aggregate::Sum(_) => Aggregate::Sum(column),
                Aggregate::Avg(_) => Aggregate::Avg(column),
                Aggregate::Min(_) => Aggregate::Min(column),
                Aggregate::Max(_) => Aggregate::Max(column),
            });
        }
        self.shared
            .backend
            .aggregate(cx, &self.shadow, &resolved, &state)
            .await
    }

    // ------------------------------------------------------------------
    // Conversion
    // ------------------------------------------------------------------

    pub(crate) fn to_model(&self, row: &Row) -> M {
        let mut instance = M::default();
        self.hydrate(&mut instance, row);
        instance
    }

    /// Copy every column of `row` that names a source field into `instance`.
    fn hydrate(&self, instance: &mut M, row: &Row) {
        for (name, value) in row.iter() {
            if M::field(name).is_none() {
                continue;
            }
            if let Err(e) = instance.set_field_value(name, value.clone()) {
                tracing::trace!(
                    model = self.shadow.qualified_name(),
                    field = name,
                    error = %e,
                    "Skipping field during conversion"
                );
            }
        }
    }

    fn coerce(&self, column: &str, value: Value) -> Value {
        match M::field(column) {
            Some(descriptor) => descriptor.coerce(value),
            None => value,
        }
    }

    /// The instance's key, if set. A generated key of zero (or the nil UUID)
    /// counts as unset.
    fn key_of(&self, instance: &M) -> Option<Value> {
        let pk = self.shadow.primary_key();
        let value = instance.field_value(&pk.name)?;
        let zero = value.as_i64() == Some(0) || value == Value::Uuid([0; 16]);
        if value.is_null() || (pk.spec.generated && zero) {
            return None;
        }
        Some(value)
    }

    fn key_filter(&self, key: Value) -> QueryState {
        QueryState::new().filter([Predicate::eq(self.shadow.primary_key().name.clone(), key)])
    }

    /// Stamp auto timestamps; `auto_now_add` only when inserting. Inserts
    /// without a UUID key get a fresh random one.
    fn stamp(&self, row: &mut InsertRow, inserting: bool) {
        let pk = self.shadow.primary_key();
        if inserting && pk.spec.generated && pk.spec.ty == TargetType::Uuid {
            let key = Value::Uuid(*uuid::Uuid::new_v4().as_bytes());
            match row.iter_mut().find(|(name, _)| *name == pk.name) {
                Some(slot) if slot.1.is_null() => slot.1 = key,
                Some(_) => {}
                None => row.push((pk.name.clone(), key)),
            }
        }
        for field in self.shadow.fields() {
            if !(field.spec.auto_now || (inserting && field.spec.auto_now_add)) {
                continue;
            }
            let Some(now) = now_value(field.spec.ty) else {
                continue;
            };
            match row.iter_mut().find(|(name, _)| *name == field.name) {
                Some(slot) => slot.1 = now,
                None => row.push((field.name.clone(), now)),
            }
        }
    }

    fn insert_row(&self, instance: &M, with_key: bool) -> InsertRow {
        let mut row = InsertRow::new();
        for field in self.shadow.fields() {
            if field.spec.primary_key {
                if with_key || !field.spec.generated || field.spec.ty == TargetType::Uuid {
                    if let Some(key) = self.key_of(instance) {
                        row.push((field.name.clone(), key));
                    }
                }
                continue;
            }
            if let Some(value) = instance.field_value(&field.name).filter(|v| !v.is_null()) {
                row.push((field.name.clone(), self.coerce(&field.name, value)));
            }
        }
        self.stamp(&mut row, true);
        row
    }

    // ------------------------------------------------------------------
    // Retrieval
    // ------------------------------------------------------------------

    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn all(&self, cx: &Cx) -> Outcome<Vec<M>, Error> {
        self.fetch(cx, &QueryState::new()).await
    }

    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn filter(&self, cx: &Cx, predicates: &[Predicate]) -> Outcome<Vec<M>, Error> {
        self.fetch(cx, &QueryState::new().filter(predicates.iter().cloned()))
            .await
    }

    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn exclude(&self, cx: &Cx, predicates: &[Predicate]) -> Outcome<Vec<M>, Error> {
        self.fetch(cx, &QueryState::new().exclude(predicates.iter().cloned()))
            .await
    }

    /// The single instance matching `predicates`.
    ///
    /// Fails with [`Error::NotFound`] on zero matches and
    /// [`Error::MultipleResults`] on more than one.
    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn get(&self, cx: &Cx, predicates: &[Predicate]) -> Outcome<M, Error> {
        let state = QueryState::new()
            .filter(predicates.iter().cloned())
            .limit(MAX_GET_RESULTS);
        let rows = match self.fetch_rows(cx, &[], &state).await {
            Outcome::Ok(rows) => rows,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        match rows.as_slice() {
            [] => Outcome::Err(Error::NotFound {
                model: self.shadow.qualified_name().to_string(),
            }),
            [row] => Outcome::Ok(self.to_model(row)),
            _ => Outcome::Err(Error::MultipleResults {
                model: self.shadow.qualified_name().to_string(),
                count: rows.len(),
            }),
        }
    }

    /// Like [`get`](Self::get), but zero matches yield `None`.
    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn get_or_none(&self, cx: &Cx, predicates: &[Predicate]) -> Outcome<Option<M>, Error> {
        match self.get(cx, predicates).await {
            Outcome::Ok(found) => Outcome::Ok(Some(found)),
            Outcome::Err(e) if e.is_not_found() => Outcome::Ok(None),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// First instance by key order.
    pub async fn first(&self, cx: &Cx) -> Outcome<Option<M>, Error> {
        self.query().order_by(["pk"]).first(cx).await
    }

    /// Last instance by key order.
    pub async fn last(&self, cx: &Cx) -> Outcome<Option<M>, Error> {
        self.query().order_by(["-pk"]).first(cx).await
    }

    /// Instance with the smallest `field`.
    pub async fn earliest(&self, cx: &Cx, field: &str) -> Outcome<Option<M>, Error> {
        self.query().order_by([field]).first(cx).await
    }

    /// Instance with the largest `field`.
    pub async fn latest(&self, cx: &Cx, field: &str) -> Outcome<Option<M>, Error> {
        self.query().order_by([format!("-{field}")]).first(cx).await
    }

    /// Instances keyed by `key_field`, restricted to `ids` when given.
    ///
    /// Map keys are [`Value::normalized`]: integer keys are always
    /// `Value::BigInt`, whatever width the backend stored.
    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn in_bulk(
        &self,
        cx: &Cx,
        ids: Option<&[Value]>,
        key_field: &str,
    ) -> Outcome<HashMap<Value, M>, Error> {
        let column = match self.column(key_field) {
            Ok(column) => column,
            Err(e) => return Outcome::Err(e),
        };
        if ids.is_some_and(<[Value]>::is_empty) {
            return Outcome::Ok(HashMap::new());
        }
        let mut state = QueryState::new();
        if let Some(ids) = ids {
            state = state.filter([Predicate::is_in(column.clone(), ids.iter().cloned())]);
        }
        let rows = match self.fetch_rows(cx, &[], &state).await {
            Outcome::Ok(rows) => rows,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        let mut found = HashMap::with_capacity(rows.len());
        for row in &rows {
            if let Some(key) = row.get_named(&column) {
                found.insert(key.clone().normalized(), self.to_model(row));
            }
        }
        Outcome::Ok(found)
    }

    // ------------------------------------------------------------------
    // Scalars
    // ------------------------------------------------------------------

    pub async fn count(&self, cx: &Cx) -> Outcome<u64, Error> {
        self.count_state(cx, &QueryState::new()).await
    }

    /// Whether any row matches `predicates` (any row at all when empty).
    pub async fn exists(&self, cx: &Cx, predicates: &[Predicate]) -> Outcome<bool, Error> {
        self.exists_state(cx, &QueryState::new().filter(predicates.iter().cloned()))
            .await
    }

    /// One row holding each aggregate under its alias (`price__avg`, ...).
    pub async fn aggregate(&self, cx: &Cx, aggregates: &[Aggregate]) -> Outcome<Row, Error> {
        self.aggregate_state(cx, aggregates, &QueryState::new()).await
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Insert one row built from `fields` and return the stored instance.
    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn create(&self, cx: &Cx, fields: &[(&str, Value)]) -> Outcome<M, Error> {
        match self.ready(cx).await {
            Outcome::Ok(()) => {}
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }

        let mut row = InsertRow::with_capacity(fields.len());
        for (name, value) in fields {
            match self.shadow.resolve(name) {
                Some(column) => {
                    let value = self.coerce(column, value.clone());
                    match row.iter_mut().find(|(existing, _)| existing.as_str() == column) {
                        Some(slot) => slot.1 = value,
                        None => row.push((column.to_string(), value)),
                    }
                }
                // Source-only fields have nowhere to go.
                None if M::field(name).is_some() => {
                    tracing::trace!(field = name, "Field has no shadow column; ignored");
                }
                None => return Outcome::Err(self.unknown_field(name)),
            }
        }
        self.stamp(&mut row, true);

        match self.shared.backend.insert(cx, &self.shadow, row).await {
            Outcome::Ok(stored) => Outcome::Ok(self.to_model(&stored)),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Look up by `predicates`, creating from their exact values plus
    /// `defaults` when nothing matches. The flag is `true` when created.
    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn get_or_create(
        &self,
        cx: &Cx,
        defaults: &[(&str, Value)],
        predicates: &[Predicate],
    ) -> Outcome<(M, bool), Error> {
        match self.get_or_none(cx, predicates).await {
            Outcome::Ok(Some(found)) => return Outcome::Ok((found, false)),
            Outcome::Ok(None) => {}
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }

        let mut fields: Vec<(&str, Value)> = predicates
            .iter()
            .filter_map(|p| match &p.lookup {
                Lookup::Exact(value) => Some((p.field.as_str(), value.clone())),
                _ => None,
            })
            .collect();
        for (name, value) in defaults {
            match fields.iter_mut().find(|(existing, _)| existing == name) {
                Some(slot) => slot.1 = value.clone(),
                None => fields.push((*name, value.clone())),
            }
        }

        match self.create(cx, &fields).await {
            Outcome::Ok(created) => Outcome::Ok((created, true)),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Look up by `predicates` and apply `defaults`, creating when nothing
    /// matches. The flag is `true` when created.
    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn update_or_create(
        &self,
        cx: &Cx,
        defaults: &[(&str, Value)],
        predicates: &[Predicate],
    ) -> Outcome<(M, bool), Error> {
        let mut found = match self.get_or_none(cx, predicates).await {
            Outcome::Ok(Some(found)) => found,
            Outcome::Ok(None) => return self.get_or_create(cx, defaults, predicates).await,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        let mut names = Vec::with_capacity(defaults.len());
        for (name, value) in defaults {
            let column = match self.column(name) {
                Ok(column) => column,
                Err(e) => return Outcome::Err(e),
            };
            if let Err(e) = found.set_field_value(&column, value.clone()) {
                return Outcome::Err(e);
            }
            names.push(column);
        }
        if names.is_empty() {
            return Outcome::Ok((found, false));
        }

        let options = SaveOptions::new().update_fields(names);
        match self.save(cx, &mut found, &options).await {
            Outcome::Ok(()) => Outcome::Ok((found, false)),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Insert `instances` in chunks of `batch_size` (one chunk when `None`
    /// or zero), preserving order. Returns the stored instances.
    #[tracing::instrument(level = "debug", skip(self, cx, instances), fields(count = instances.len()))]
    pub async fn bulk_create(
        &self,
        cx: &Cx,
        instances: &[M],
        batch_size: Option<usize>,
    ) -> Outcome<Vec<M>, Error> {
        match self.ready(cx).await {
            Outcome::Ok(()) => {}
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
        if instances.is_empty() {
            return Outcome::Ok(Vec::new());
        }

        let rows: Vec<InsertRow> = instances
            .iter()
            .map(|instance| self.insert_row(instance, false))
            .collect();
        let chunk = batch_size.filter(|&size| size > 0).unwrap_or(rows.len());

        let mut created = Vec::with_capacity(rows.len());
        for batch in rows.chunks(chunk) {
            let stored = match self
                .shared
                .backend
                .insert_many(cx, &self.shadow, batch.to_vec())
                .await
            {
                Outcome::Ok(stored) => stored,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };
            if stored.len() == batch.len() {
                created.extend(stored.iter().map(|row| self.to_model(row)));
            } else {
                // Backend could not report stored rows; keys stay unset.
                created.extend(
                    batch
                        .iter()
                        .map(|row| self.to_model(&Row::from_pairs(row.clone()))),
                );
            }
        }

        tracing::debug!(
            model = self.shadow.qualified_name(),
            created = created.len(),
            batches = rows.len().div_ceil(chunk),
            "Bulk insert complete"
        );
        Outcome::Ok(created)
    }

    /// Write `fields` of every keyed instance. Instances without a key are
    /// skipped but still counted: the result is the number of instances
    /// passed in.
    #[tracing::instrument(level = "debug", skip(self, cx, instances), fields(count = instances.len()))]
    pub async fn bulk_update(&self, cx: &Cx, instances: &[M], fields: &[&str]) -> Outcome<u64, Error> {
        if fields.is_empty() {
            return Outcome::Err(Error::Query(
                "bulk_update() requires a non-empty list of fields".to_string(),
            ));
        }
        let columns = match self.columns(fields) {
            Ok(columns) => columns,
            Err(e) => return Outcome::Err(e),
        };
        if columns.contains(&self.shadow.primary_key().name) {
            return Outcome::Err(Error::Query(
                "bulk_update() cannot be used with primary key fields".to_string(),
            ));
        }
        match self.ready(cx).await {
            Outcome::Ok(()) => {}
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }

        let mut skipped = 0_usize;
        for instance in instances {
            let Some(key) = self.key_of(instance) else {
                skipped += 1;
                continue;
            };
            let assignments: Vec<(String, Value)> = columns
                .iter()
                .map(|column| {
                    let value = instance.field_value(column).unwrap_or(Value::Null);
                    (column.clone(), value)
                })
                .collect();
            match self
                .shared
                .backend
                .update(cx, &self.shadow, &assignments, &self.key_filter(key))
                .await
            {
                Outcome::Ok(_) => {}
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }
        if skipped > 0 {
            tracing::debug!(
                model = self.shadow.qualified_name(),
                skipped,
                "bulk_update skipped instances without a key"
            );
        }
        Outcome::Ok(instances.len() as u64)
    }

    /// Delete every row.
    pub async fn delete(&self, cx: &Cx) -> Outcome<u64, Error> {
        self.delete_state(cx, &QueryState::new()).await
    }

    /// Apply `assignments` to every row.
    pub async fn update(&self, cx: &Cx, assignments: &[(&str, Value)]) -> Outcome<u64, Error> {
        self.update_state(cx, assignments, &QueryState::new()).await
    }

    // ------------------------------------------------------------------
    // Query sets
    // ------------------------------------------------------------------

    pub fn order_by<S: AsRef<str>>(&self, keys: impl IntoIterator<Item = S>) -> QuerySet<M, B> {
        self.query().order_by(keys)
    }

    pub fn values<S: AsRef<str>>(&self, fields: &[S]) -> ValuesQuerySet<M, B> {
        self.query().values(fields)
    }

    pub fn values_list<S: AsRef<str>>(&self, fields: &[S]) -> ValuesListQuerySet<M, B> {
        self.query().values_list(fields)
    }

    // ------------------------------------------------------------------
    // Instance operations
    // ------------------------------------------------------------------

    /// Persist `instance`.
    ///
    /// A keyed instance is updated in place (only `update_fields` when given);
    /// if no row was affected it is inserted instead. An unkeyed instance, or
    /// any instance with `force_insert`, is inserted and receives the stored
    /// key and defaults. NULL values and the key are never part of an update.
    #[tracing::instrument(level = "debug", skip(self, cx, instance))]
    pub async fn save(&self, cx: &Cx, instance: &mut M, options: &SaveOptions) -> Outcome<(), Error> {
        match self.ready(cx).await {
            Outcome::Ok(()) => {}
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }

        let key = self.key_of(instance);
        if let (Some(key), false) = (key, options.force_insert) {
            let wanted = match &options.update_fields {
                Some(names) => match self.columns(names.as_slice()) {
                    Ok(columns) => Some(columns),
                    Err(e) => return Outcome::Err(e),
                },
                None => None,
            };

            let mut assignments = Vec::new();
            for field in self.shadow.fields() {
                if field.spec.primary_key
                    || wanted.as_ref().is_some_and(|w| !w.contains(&field.name))
                {
                    continue;
                }
                if field.spec.auto_now {
                    if let Some(now) = now_value(field.spec.ty) {
                        if M::field(&field.name).is_some() {
                            if let Err(e) = instance.set_field_value(&field.name, now.clone()) {
                                tracing::trace!(
                                    model = self.shadow.qualified_name(),
                                    field = field.name.as_str(),
                                    error = %e,
                                    "Skipping field during conversion"
                                );
                            }
                        }
                        assignments.push((field.name.clone(), now));
                        continue;
                    }
                }
                if let Some(value) = instance.field_value(&field.name).filter(|v| !v.is_null()) {
                    assignments.push((field.name.clone(), self.coerce(&field.name, value)));
                }
            }
            if assignments.is_empty() {
                return Outcome::Ok(());
            }

            let affected = match self
                .shared
                .backend
                .update(cx, &self.shadow, &assignments, &self.key_filter(key))
                .await
            {
                Outcome::Ok(n) => n,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };
            if affected > 0 {
                return Outcome::Ok(());
            }
            if options.update_fields.is_some() {
                return Outcome::Err(Error::Query(
                    "Save with update_fields did not affect any rows".to_string(),
                ));
            }
        }

        let row = self.insert_row(instance, true);
        match self.shared.backend.insert(cx, &self.shadow, row).await {
            Outcome::Ok(stored) => {
                self.hydrate(instance, &stored);
                Outcome::Ok(())
            }
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Delete `instance`'s row and clear its key. No-op without a key.
    #[tracing::instrument(level = "debug", skip(self, cx, instance))]
    pub async fn delete_instance(&self, cx: &Cx, instance: &mut M) -> Outcome<u64, Error> {
        let Some(key) = self.key_of(instance) else {
            return Outcome::Ok(0);
        };
        match self.ready(cx).await {
            Outcome::Ok(()) => {}
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
        let deleted = match self
            .shared
            .backend
            .delete(cx, &self.shadow, &self.key_filter(key))
            .await
        {
            Outcome::Ok(n) => n,
            other => return other,
        };
        let pk = &self.shadow.primary_key().name;
        if M::field(pk).is_some() {
            // Non-optional keys cannot hold NULL and keep their value.
            if let Err(e) = instance.set_field_value(pk, Value::Null) {
                tracing::trace!(
                    model = self.shadow.qualified_name(),
                    field = pk.as_str(),
                    error = %e,
                    "Key kept after delete"
                );
            }
        }
        Outcome::Ok(deleted)
    }

    /// Reload `fields` (all when `None`) from the stored row. No-op without
    /// a key; [`Error::NotFound`] when the row is gone.
    #[tracing::instrument(level = "debug", skip(self, cx, instance))]
    pub async fn refresh(
        &self,
        cx: &Cx,
        instance: &mut M,
        fields: Option<&[&str]>,
    ) -> Outcome<(), Error> {
        let Some(key) = self.key_of(instance) else {
            return Outcome::Ok(());
        };
        let columns: Vec<String> = match fields {
            Some(names) => names.iter().map(|name| (*name).to_string()).collect(),
            None => Vec::new(),
        };
        let rows = match self.fetch_rows(cx, &columns, &self.key_filter(key)).await {
            Outcome::Ok(rows) => rows,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        let Some(row) = rows.first() else {
            return Outcome::Err(Error::NotFound {
                model: self.shadow.qualified_name().to_string(),
            });
        };
        self.hydrate(instance, row);
        Outcome::Ok(())
    }
}
