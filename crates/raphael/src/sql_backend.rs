//! SQL-speaking backend over any [`Connection`] driver.
//!
//! [`SqlBackend`] renders every operation with `raphael_query::sql` and runs
//! it on a small round-robin pool of driver connections opened through a
//! [`Connector`].

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use raphael_core::{
    Connection, ConnectionTarget, Cx, Dialect, Error, Outcome, Row, Value, validate_identifier,
};
use raphael_query::{Aggregate, Predicate, QueryState, sql};
use raphael_schema::{DdlOptions, ShadowModel, create_tables};

use crate::backend::{Backend, BackendOptions, InsertRow};

/// Opens driver connections for a [`ConnectionTarget`].
pub trait Connector: Send + Sync + 'static {
    type Conn: Connection + 'static;

    fn connect(
        &self,
        cx: &Cx,
        target: &ConnectionTarget,
        options: &BackendOptions,
    ) -> impl Future<Output = Outcome<Self::Conn, Error>> + Send;
}

/// Fixed set of connections handed out round-robin.
#[derive(Debug)]
pub struct ConnectionPool<C> {
    connections: Vec<C>,
    next: AtomicUsize,
    dialect: Dialect,
    use_tz: bool,
}

impl<C: Connection> ConnectionPool<C> {
    fn new(connections: Vec<C>, dialect: Dialect, use_tz: bool) -> Self {
        Self {
            connections,
            next: AtomicUsize::new(0),
            dialect,
            use_tz,
        }
    }

    /// The next connection in rotation.
    pub fn get(&self) -> &C {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.connections.len();
        &self.connections[idx]
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }
}

/// A [`Backend`] that executes parameterized SQL.
#[derive(Debug)]
pub struct SqlBackend<K: Connector> {
    connector: K,
    pool: RwLock<Option<Arc<ConnectionPool<K::Conn>>>>,
}

impl<K: Connector> SqlBackend<K> {
    pub fn new(connector: K) -> Self {
        Self {
            connector,
            pool: RwLock::new(None),
        }
    }

    pub fn connector(&self) -> &K {
        &self.connector
    }

    pub fn is_open(&self) -> bool {
        self.current().is_some()
    }

    /// Number of pooled connections (zero when closed).
    pub fn pool_size(&self) -> usize {
        self.current().map_or(0, |pool| pool.len())
    }

    fn current(&self) -> Option<Arc<ConnectionPool<K::Conn>>> {
        self.pool
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn pool(&self) -> Result<Arc<ConnectionPool<K::Conn>>, Error> {
        self.current()
            .ok_or_else(|| Error::Connection("backend is not open".to_string()))
    }
}

fn count_from(row: Option<Row>) -> Result<u64, Error> {
    let row = row.ok_or_else(|| Error::Query("COUNT returned no row".to_string()))?;
    let count: i64 = row.get_as(0)?;
    Ok(u64::try_from(count).unwrap_or(0))
}

/// Split rows into runs of consecutive rows sharing one column list, each
/// small enough to bind in one statement of `dialect`.
///
/// A run with no columns inserts defaults only, one row per statement.
fn group_by_columns(
    rows: Vec<InsertRow>,
    dialect: Dialect,
) -> Vec<(Vec<String>, Vec<Vec<Value>>)> {
    let mut groups: Vec<(Vec<String>, Vec<Vec<Value>>)> = Vec::new();
    for row in rows {
        let (columns, values): (Vec<String>, Vec<Value>) = row.into_iter().unzip();
        let per_statement = if columns.is_empty() {
            1
        } else {
            (dialect.max_params() / columns.len()).max(1)
        };
        match groups.last_mut() {
            Some((current, batch)) if *current == columns && batch.len() < per_statement => {
                batch.push(values);
            }
            _ => groups.push((columns, vec![values])),
        }
    }
    groups
}

impl<K: Connector> Backend for SqlBackend<K> {
    fn open(
        &self,
        cx: &Cx,
        target: &ConnectionTarget,
        options: &BackendOptions,
    ) -> impl Future<Output = Outcome<(), Error>> + Send {
        let target = target.clone();
        let options = options.clone();
        async move {
            if self.is_open() {
                return Outcome::Ok(());
            }

            let size = options.pool_size.max(1);
            let mut connections = Vec::with_capacity(size);
            for _ in 0..size {
                match self.connector.connect(cx, &target, &options).await {
                    Outcome::Ok(conn) => connections.push(conn),
                    Outcome::Err(e) => {
                        let opened = connections.len();
                        for conn in connections {
                            if let Err(close_err) = conn.close(cx).await {
                                tracing::warn!(error = %close_err, "Error closing connection");
                            }
                        }
                        tracing::warn!(url = %target, opened, error = %e, "SQL backend open failed");
                        return Outcome::Err(e);
                    }
                    Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                    Outcome::Panicked(p) => return Outcome::Panicked(p),
                }
            }

            let pool = Arc::new(ConnectionPool::new(
                connections,
                target.dialect(),
                options.use_tz,
            ));
            {
                let mut slot = self.pool.write().unwrap_or_else(PoisonError::into_inner);
                if slot.is_none() {
                    *slot = Some(pool);
                }
            }
            tracing::info!(url = %target, pool_size = size, "SQL backend opened");
            Outcome::Ok(())
        }
    }

    fn materialize(
        &self,
        cx: &Cx,
        models: &[Arc<ShadowModel>],
    ) -> impl Future<Output = Outcome<(), Error>> + Send {
        let pool = self.pool();
        let models = models.to_vec();
        async move {
            let pool = match pool {
                Ok(pool) => pool,
                Err(e) => return Outcome::Err(e),
            };
            for model in &models {
                let names = std::iter::once(model.table())
                    .chain(model.fields().iter().map(|f| f.name.as_str()));
                for name in names {
                    if let Err(e) = validate_identifier(name) {
                        return Outcome::Err(e);
                    }
                }
            }
            let options = DdlOptions::new(pool.dialect()).use_tz(pool.use_tz);
            let conn = pool.get();
            for ddl in create_tables(models.iter().map(|m| &**m), options) {
                match conn.execute(cx, &ddl, &[]).await {
                    Outcome::Ok(_) => {}
                    Outcome::Err(e) => return Outcome::Err(e),
                    Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                    Outcome::Panicked(p) => return Outcome::Panicked(p),
                }
            }
            Outcome::Ok(())
        }
    }

    fn fetch(
        &self,
        cx: &Cx,
        model: &ShadowModel,
        columns: &[String],
        state: &QueryState,
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        let pool = self.pool();
        let table = model.table().to_string();
        let columns = columns.to_vec();
        let state = state.clone();
        async move {
            let pool = match pool {
                Ok(pool) => pool,
                Err(e) => return Outcome::Err(e),
            };
            let (sql, params) = sql::select(&table, &columns, &state, pool.dialect());
            tracing::trace!(sql = %sql, "fetch");
            pool.get().query(cx, &sql, &params).await
        }
    }

    fn count(
        &self,
        cx: &Cx,
        model: &ShadowModel,
        state: &QueryState,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let pool = self.pool();
        let table = model.table().to_string();
        let state = state.clone();
        async move {
            let pool = match pool {
                Ok(pool) => pool,
                Err(e) => return Outcome::Err(e),
            };
            let (sql, params) = sql::count(&table, &state, pool.dialect());
            match pool.get().query_one(cx, &sql, &params).await {
                Outcome::Ok(row) => match count_from(row) {
                    Ok(count) => Outcome::Ok(count),
                    Err(e) => Outcome::Err(e),
                },
                Outcome::Err(e) => Outcome::Err(e),
                Outcome::Cancelled(r) => Outcome::Cancelled(r),
                Outcome::Panicked(p) => Outcome::Panicked(p),
            }
        }
    }

    fn exists(
        &self,
        cx: &Cx,
        model: &ShadowModel,
        state: &QueryState,
    ) -> impl Future<Output = Outcome<bool, Error>> + Send {
        let pool = self.pool();
        let table = model.table().to_string();
        let state = state.clone();
        async move {
            let pool = match pool {
                Ok(pool) => pool,
                Err(e) => return Outcome::Err(e),
            };
            let (sql, params) = sql::exists(&table, &state, pool.dialect());
            match pool.get().query_one(cx, &sql, &params).await {
                Outcome::Ok(row) => Outcome::Ok(row.is_some()),
                Outcome::Err(e) => Outcome::Err(e),
                Outcome::Cancelled(r) => Outcome::Cancelled(r),
                Outcome::Panicked(p) => Outcome::Panicked(p),
            }
        }
    }

    fn insert(
        &self,
        cx: &Cx,
        model: &ShadowModel,
        row: InsertRow,
    ) -> impl Future<Output = Outcome<Row, Error>> + Send {
        let pool = self.pool();
        let table = model.table().to_string();
        let pk = model.primary_key().clone();
        async move {
            let pool = match pool {
                Ok(pool) => pool,
                Err(e) => return Outcome::Err(e),
            };
            let dialect = pool.dialect();
            let conn = pool.get();
            let supplied_pk = row
                .iter()
                .find(|(name, _)| *name == pk.name)
                .map(|(_, value)| value.clone());
            let (columns, values): (Vec<String>, Vec<Value>) = row.into_iter().unzip();
            let (sql, params) = sql::insert(&table, &columns, &[values], true, dialect);

            if dialect.supports_returning() {
                return match conn.query_one(cx, &sql, &params).await {
                    Outcome::Ok(Some(row)) => Outcome::Ok(row),
                    Outcome::Ok(None) => {
                        Outcome::Err(Error::Query(format!("INSERT into {table} returned no row")))
                    }
                    Outcome::Err(e) => Outcome::Err(e),
                    Outcome::Cancelled(r) => Outcome::Cancelled(r),
                    Outcome::Panicked(p) => Outcome::Panicked(p),
                };
            }

            // No RETURNING: read the row back by key.
            let id = match conn.insert(cx, &sql, &params).await {
                Outcome::Ok(id) => id,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };
            let key = match supplied_pk {
                Some(value) if !value.is_null() => value,
                _ => Value::BigInt(id),
            };
            let state = QueryState::new().filter([Predicate::eq(pk.name.clone(), key)]);
            let (sql, params) = sql::select(&table, &[], &state, dialect);
            match conn.query_one(cx, &sql, &params).await {
                Outcome::Ok(Some(row)) => Outcome::Ok(row),
                Outcome::Ok(None) => Outcome::Err(Error::Query(format!(
                    "inserted row not found in {table}"
                ))),
                Outcome::Err(e) => Outcome::Err(e),
                Outcome::Cancelled(r) => Outcome::Cancelled(r),
                Outcome::Panicked(p) => Outcome::Panicked(p),
            }
        }
    }

    fn insert_many(
        &self,
        cx: &Cx,
        model: &ShadowModel,
        rows: Vec<InsertRow>,
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        let pool = self.pool();
        let table = model.table().to_string();
        async move {
            let pool = match pool {
                Ok(pool) => pool,
                Err(e) => return Outcome::Err(e),
            };
            let dialect = pool.dialect();
            let conn = pool.get();
            let mut stored = Vec::with_capacity(rows.len());
            for (columns, batch) in group_by_columns(rows, dialect) {
                let (sql, params) = sql::insert(&table, &columns, &batch, true, dialect);
                if dialect.supports_returning() {
                    match conn.query(cx, &sql, &params).await {
                        Outcome::Ok(rows) => stored.extend(rows),
                        Outcome::Err(e) => return Outcome::Err(e),
                        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                        Outcome::Panicked(p) => return Outcome::Panicked(p),
                    }
                } else {
                    match conn.execute(cx, &sql, &params).await {
                        Outcome::Ok(_) => {}
                        Outcome::Err(e) => return Outcome::Err(e),
                        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                        Outcome::Panicked(p) => return Outcome::Panicked(p),
                    }
                }
            }
            if !dialect.supports_returning() {
                stored.clear();
            }
            Outcome::Ok(stored)
        }
    }

    fn update(
        &self,
        cx: &Cx,
        model: &ShadowModel,
        assignments: &[(String, Value)],
        state: &QueryState,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let pool = self.pool();
        let table = model.table().to_string();
        let assignments = assignments.to_vec();
        let state = state.clone();
        async move {
            let pool = match pool {
                Ok(pool) => pool,
                Err(e) => return Outcome::Err(e),
            };
            if assignments.is_empty() {
                return Outcome::Ok(0);
            }
            let (sql, params) = sql::update(&table, &assignments, &state, pool.dialect());
            pool.get().execute(cx, &sql, &params).await
        }
    }

    fn delete(
        &self,
        cx: &Cx,
        model: &ShadowModel,
        state: &QueryState,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let pool = self.pool();
        let table = model.table().to_string();
        let state = state.clone();
        async move {
            let pool = match pool {
                Ok(pool) => pool,
                Err(e) => return Outcome::Err(e),
            };
            let (sql, params) = sql::delete(&table, &state, pool.dialect());
            pool.get().execute(cx, &sql, &params).await
        }
    }

    fn aggregate(
        &self,
        cx: &Cx,
        model: &ShadowModel,
        aggregates: &[Aggregate],
        state: &QueryState,
    ) -> impl Future<Output = Outcome<Row, Error>> + Send {
        let pool = self.pool();
        let table = model.table().to_string();
        let aggregates = aggregates.to_vec();
        let state = state.clone();
        async move {
            let pool = match pool {
                Ok(pool) => pool,
                Err(e) => return Outcome::Err(e),
            };
            let (sql, params) = sql::aggregate(&table, &aggregates, &state, pool.dialect());
            match pool.get().query_one(cx, &sql, &params).await {
                Outcome::Ok(Some(row)) => Outcome::Ok(row),
                Outcome::Ok(None) => Outcome::Ok(Row::from_pairs(
                    aggregates.iter().map(|agg| (agg.alias(), Value::Null)).collect(),
                )),
                Outcome::Err(e) => Outcome::Err(e),
                Outcome::Cancelled(r) => Outcome::Cancelled(r),
                Outcome::Panicked(p) => Outcome::Panicked(p),
            }
        }
    }

    fn close(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        let pool = self
            .pool
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        async move {
            let Some(pool) = pool else {
                return Outcome::Ok(());
            };
            let Ok(pool) = Arc::try_unwrap(pool) else {
                // Still borrowed by an in-flight query; its connections drop with it.
                tracing::warn!("SQL backend closed while queries were in flight");
                return Outcome::Ok(());
            };
            let total = pool.connections.len();
            for conn in pool.connections {
                if let Err(e) = conn.close(cx).await {
                    tracing::warn!(error = %e, "Error closing connection");
                }
            }
            tracing::info!(connections = total, "SQL backend closed");
            Outcome::Ok(())
        }
    }
}
