//! Driver connection contract.
//!
//! Drivers implement [`Connection`]; the SQL backend in the `raphael` crate
//! renders queries and runs them through it. All operations take a [`Cx`]
//! and return an [`Outcome`] so cancellation and panics propagate without
//! being flattened into errors.

use std::future::Future;

use asupersync::{Cx, Outcome};

use crate::error::Error;
use crate::row::Row;
use crate::value::Value;

/// SQL dialect spoken by a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    /// PostgreSQL: `$1` placeholders, `RETURNING`
    #[default]
    Postgres,
    /// SQLite: `?1` placeholders, `RETURNING` (3.35+)
    Sqlite,
    /// MySQL: `?` placeholders, no `RETURNING`
    Mysql,
}

impl Dialect {
    /// Placeholder for the 1-based parameter `index`.
    pub fn placeholder(self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${index}"),
            Dialect::Sqlite => format!("?{index}"),
            Dialect::Mysql => "?".to_string(),
        }
    }

    /// Whether `INSERT ... RETURNING *` is available.
    pub const fn supports_returning(self) -> bool {
        !matches!(self, Dialect::Mysql)
    }

    /// Most bound parameters one statement may carry.
    pub const fn max_params(self) -> usize {
        match self {
            Dialect::Postgres | Dialect::Mysql => 65_535,
            // SQLITE_MAX_VARIABLE_NUMBER since 3.32.
            Dialect::Sqlite => 32_766,
        }
    }

    /// Expression producing a random ordering key.
    pub const fn random_function(self) -> &'static str {
        match self {
            Dialect::Mysql => "RAND()",
            Dialect::Postgres | Dialect::Sqlite => "RANDOM()",
        }
    }
}

/// A database connection capable of executing queries.
pub trait Connection: Send + Sync {
    /// The dialect this connection speaks.
    fn dialect(&self) -> Dialect;

    /// Execute a query and return all rows.
    fn query(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send;

    /// Execute a query and return the first row, if any.
    fn query_one(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Option<Row>, Error>> + Send;

    /// Execute a statement and return the number of affected rows.
    fn execute(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send;

    /// Execute an INSERT and return the last inserted id.
    fn insert(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<i64, Error>> + Send;

    /// Check the connection is alive.
    fn ping(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send;

    /// Close the connection.
    fn close(self, cx: &Cx) -> impl Future<Output = crate::error::Result<()>> + Send;
}
