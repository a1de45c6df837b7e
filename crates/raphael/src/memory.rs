//! In-process backend.
//!
//! [`MemoryBackend`] keeps one table per shadow model and evaluates query
//! state directly with `raphael_query::eval`. It assigns auto-increment and
//! random UUID keys,
//! applies declared defaults, enforces NOT NULL and primary key uniqueness,
//! and returns rows in insertion order unless asked to sort.
//!
//! Every method completes without suspending, so no lock is ever held across
//! an await point.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use raphael_core::{ConnectionTarget, Cx, Error, Outcome, Result, Row, Value};
use raphael_query::{Aggregate, QueryState, eval};
use raphael_schema::{ShadowModel, TargetType};

use crate::backend::{Backend, BackendOptions, InsertRow};
use crate::lift;

#[derive(Debug)]
struct Table {
    model: Arc<ShadowModel>,
    columns: Arc<[String]>,
    rows: Vec<Row>,
    next_id: i64,
}

impl Table {
    fn new(model: Arc<ShadowModel>) -> Self {
        let columns: Arc<[String]> = model.column_names().into();
        Self {
            model,
            columns,
            rows: Vec::new(),
            next_id: 1,
        }
    }

    fn qualified(&self, column: &str) -> String {
        format!("{}.{}", self.model.table(), column)
    }

    fn insert(&mut self, supplied: InsertRow) -> Result<Row> {
        for (name, _) in &supplied {
            if !self.model.has_field(name) {
                return Err(Error::Query(format!(
                    "table {} has no column named {name}",
                    self.model.table()
                )));
            }
        }

        let mut values = Vec::with_capacity(self.columns.len());
        let mut generated = false;
        for field in self.model.fields() {
            let given = supplied
                .iter()
                .find(|(name, _)| *name == field.name)
                .map(|(_, value)| value.clone())
                .filter(|value| !value.is_null());

            let value = match given {
                Some(value) => value,
                None if field.spec.generated => {
                    generated = true;
                    generated_key(field.spec.ty, self.next_id)
                }
                None => match field.spec.default {
                    Some(default) => default.to_value(),
                    None if field.spec.nullable => Value::Null,
                    None => {
                        return Err(Error::Query(format!(
                            "NOT NULL constraint failed: {}",
                            self.qualified(&field.name)
                        )));
                    }
                },
            };
            values.push(value);
        }

        let pk_index = self
            .model
            .fields()
            .iter()
            .position(|f| f.spec.primary_key)
            .unwrap_or(0);
        let pk = &values[pk_index];
        let pk_name = &self.columns[pk_index];
        // Generated keys are always past every stored key.
        if !generated
            && self
                .rows
                .iter()
                .any(|row| row.get(pk_index).is_some_and(|existing| existing.loosely_equals(pk)))
        {
            return Err(Error::Query(format!(
                "UNIQUE constraint failed: {}",
                self.qualified(pk_name)
            )));
        }

        if let Some(id) = pk.as_i64() {
            if generated || id >= self.next_id {
                self.next_id = id + 1;
            }
        }

        let row = Row::new(Arc::clone(&self.columns), values);
        self.rows.push(row.clone());
        Ok(row)
    }

    fn update(&mut self, assignments: &[(String, Value)], state: &QueryState) -> Result<u64> {
        let mut targets = Vec::with_capacity(assignments.len());
        for (name, value) in assignments {
            let Some(idx) = self.columns.iter().position(|c| c == name) else {
                return Err(Error::Query(format!(
                    "table {} has no column named {name}",
                    self.model.table()
                )));
            };
            if value.is_null() && !self.model.fields()[idx].spec.nullable {
                return Err(Error::Query(format!(
                    "NOT NULL constraint failed: {}",
                    self.qualified(name)
                )));
            }
            targets.push((idx, value));
        }

        let mut affected = 0;
        for row in &mut self.rows {
            if !eval::matches(row, &state.conditions) {
                continue;
            }
            let mut values = row.values().to_vec();
            for (idx, value) in &targets {
                values[*idx] = (*value).clone();
            }
            *row = Row::new(Arc::clone(&self.columns), values);
            affected += 1;
        }
        Ok(affected)
    }

    fn delete(&mut self, state: &QueryState) -> u64 {
        let before = self.rows.len();
        self.rows
            .retain(|row| !eval::matches(row, &state.conditions));
        (before - self.rows.len()) as u64
    }

    fn select(&self, state: &QueryState) -> Vec<Row> {
        eval::apply(self.rows.iter().cloned(), state)
    }
}

fn generated_key(ty: TargetType, next: i64) -> Value {
    match ty {
        TargetType::Uuid => Value::Uuid(*uuid::Uuid::new_v4().as_bytes()),
        TargetType::SmallInt => i16::try_from(next).map_or(Value::BigInt(next), Value::SmallInt),
        TargetType::Int => i32::try_from(next).map_or(Value::BigInt(next), Value::Int),
        _ => Value::BigInt(next),
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    open: bool,
    tables: HashMap<String, Table>,
}

/// A backend that keeps every table in process memory.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the backend is currently open.
    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    /// Names of the tables created so far.
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().tables.keys().cloned().collect();
        names.sort();
        names
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_table<T>(&self, model: &ShadowModel, f: impl FnOnce(&mut Table) -> Result<T>) -> Result<T> {
        let mut state = self.lock();
        if !state.open {
            return Err(Error::Connection("backend is not open".to_string()));
        }
        let table = state
            .tables
            .get_mut(model.table())
            .ok_or_else(|| Error::Query(format!("no such table: {}", model.table())))?;
        f(table)
    }
}

impl Backend for MemoryBackend {
    fn open(
        &self,
        _cx: &Cx,
        target: &ConnectionTarget,
        options: &BackendOptions,
    ) -> impl Future<Output = Outcome<(), Error>> + Send {
        let mut state = self.lock();
        if !state.open {
            state.open = true;
            tracing::info!(
                url = %target,
                timezone = %options.timezone,
                use_tz = options.use_tz,
                "Memory backend opened"
            );
        }
        drop(state);
        async { Outcome::Ok(()) }
    }

    fn materialize(
        &self,
        _cx: &Cx,
        models: &[Arc<ShadowModel>],
    ) -> impl Future<Output = Outcome<(), Error>> + Send {
        let result = (|| {
            let mut state = self.lock();
            if !state.open {
                return Err(Error::Connection("backend is not open".to_string()));
            }
            for model in models {
                if !state.tables.contains_key(model.table()) {
                    tracing::debug!(table = model.table(), "Creating table");
                    state
                        .tables
                        .insert(model.table().to_string(), Table::new(Arc::clone(model)));
                }
            }
            Ok(())
        })();
        async move { lift(result) }
    }

    fn fetch(
        &self,
        _cx: &Cx,
        model: &ShadowModel,
        columns: &[String],
        state: &QueryState,
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        let result = self.with_table(model, |table| {
            let rows = table.select(state);
            if columns.is_empty() {
                Ok(rows)
            } else {
                Ok(rows.iter().map(|row| row.project(columns)).collect())
            }
        });
        async move { lift(result) }
    }

    fn count(
        &self,
        _cx: &Cx,
        model: &ShadowModel,
        state: &QueryState,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let result = self.with_table(model, |table| Ok(table.select(state).len() as u64));
        async move { lift(result) }
    }

    fn exists(
        &self,
        _cx: &Cx,
        model: &ShadowModel,
        state: &QueryState,
    ) -> impl Future<Output = Outcome<bool, Error>> + Send {
        let result = self.with_table(model, |table| Ok(!table.select(state).is_empty()));
        async move { lift(result) }
    }

    fn insert(
        &self,
        _cx: &Cx,
        model: &ShadowModel,
        row: InsertRow,
    ) -> impl Future<Output = Outcome<Row, Error>> + Send {
        let result = self.with_table(model, |table| table.insert(row));
        async move { lift(result) }
    }

    fn insert_many(
        &self,
        _cx: &Cx,
        model: &ShadowModel,
        rows: Vec<InsertRow>,
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        let result = self.with_table(model, |table| {
            let (len, next_id) = (table.rows.len(), table.next_id);
            let mut stored = Vec::with_capacity(rows.len());
            for row in rows {
                match table.insert(row) {
                    Ok(row) => stored.push(row),
                    Err(e) => {
                        // All or nothing.
                        table.rows.truncate(len);
                        table.next_id = next_id;
                        return Err(e);
                    }
                }
            }
            Ok(stored)
        });
        async move { lift(result) }
    }

    fn update(
        &self,
        _cx: &Cx,
        model: &ShadowModel,
        assignments: &[(String, Value)],
        state: &QueryState,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let result = self.with_table(model, |table| table.update(assignments, state));
        async move { lift(result) }
    }

    fn delete(
        &self,
        _cx: &Cx,
        model: &ShadowModel,
        state: &QueryState,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let result = self.with_table(model, |table| Ok(table.delete(state)));
        async move { lift(result) }
    }

    fn aggregate(
        &self,
        _cx: &Cx,
        model: &ShadowModel,
        aggregates: &[Aggregate],
        state: &QueryState,
    ) -> impl Future<Output = Outcome<Row, Error>> + Send {
        let result = self.with_table(model, |table| {
            Ok(eval::aggregate(&table.select(state), aggregates))
        });
        async move { lift(result) }
    }

    fn close(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        let mut state = self.lock();
        if state.open {
            state.open = false;
            tracing::info!(tables = state.tables.len(), "Memory backend closed");
        }
        drop(state);
        async { Outcome::Ok(()) }
    }
}
