//! The backend seam.
//!
//! A [`Backend`] is the async runtime the bridge delegates execution to: it
//! owns connections and schema state and executes [`QueryState`]s against
//! shadow models. The facade never talks to a driver directly.

use std::future::Future;
use std::sync::Arc;

use raphael_core::{ConnectionTarget, Cx, Error, Outcome, RaphaelConfig, Row, Value};
use raphael_query::{Aggregate, QueryState};
use raphael_schema::ShadowModel;

/// Settings passed through unmodified from [`RaphaelConfig`] to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendOptions {
    pub use_tz: bool,
    pub timezone: String,
    pub pool_size: usize,
}

impl BackendOptions {
    pub fn from_config(config: &RaphaelConfig) -> Self {
        Self {
            use_tz: config.use_tz,
            timezone: config.timezone.clone(),
            pool_size: config.pool_size,
        }
    }
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            use_tz: true,
            timezone: "UTC".to_string(),
            pool_size: 1,
        }
    }
}

/// One row to insert: the columns the caller supplies, in field order.
///
/// Omitted columns take the backend's default (generated key, declared
/// default, or NULL).
pub type InsertRow = Vec<(String, Value)>;

/// An async ORM runtime capable of storing shadow models.
pub trait Backend: Send + Sync + 'static {
    /// Open the connection pool for `target`. Opening an open backend is a no-op.
    fn open(
        &self,
        cx: &Cx,
        target: &ConnectionTarget,
        options: &BackendOptions,
    ) -> impl Future<Output = Outcome<(), Error>> + Send;

    /// Create missing tables for `models`. Never drops or alters.
    fn materialize(
        &self,
        cx: &Cx,
        models: &[Arc<ShadowModel>],
    ) -> impl Future<Output = Outcome<(), Error>> + Send;

    /// Rows matching `state`, restricted to `columns` (all when empty).
    fn fetch(
        &self,
        cx: &Cx,
        model: &ShadowModel,
        columns: &[String],
        state: &QueryState,
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send;

    fn count(
        &self,
        cx: &Cx,
        model: &ShadowModel,
        state: &QueryState,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send;

    fn exists(
        &self,
        cx: &Cx,
        model: &ShadowModel,
        state: &QueryState,
    ) -> impl Future<Output = Outcome<bool, Error>> + Send;

    /// Insert one row and return it as stored (with generated key and defaults).
    fn insert(
        &self,
        cx: &Cx,
        model: &ShadowModel,
        row: InsertRow,
    ) -> impl Future<Output = Outcome<Row, Error>> + Send;

    /// Insert several rows in one round trip where possible.
    ///
    /// Returns the stored rows in input order, or an empty vector when the
    /// backend cannot report them.
    fn insert_many(
        &self,
        cx: &Cx,
        model: &ShadowModel,
        rows: Vec<InsertRow>,
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send;

    /// Apply `assignments` to every row matching `state`; returns the count.
    fn update(
        &self,
        cx: &Cx,
        model: &ShadowModel,
        assignments: &[(String, Value)],
        state: &QueryState,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send;

    fn delete(
        &self,
        cx: &Cx,
        model: &ShadowModel,
        state: &QueryState,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send;

    /// One row holding each aggregate under its alias.
    fn aggregate(
        &self,
        cx: &Cx,
        model: &ShadowModel,
        aggregates: &[Aggregate],
        state: &QueryState,
    ) -> impl Future<Output = Outcome<Row, Error>> + Send;

    /// Release every connection. Closing a closed backend is a no-op.
    fn close(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_from_config() {
        let config = RaphaelConfig::new(raphael_core::DatabaseConfig::new("sqlite3"))
            .use_tz(false)
            .timezone("Europe/Paris")
            .pool_size(4);
        let options = BackendOptions::from_config(&config);
        assert!(!options.use_tz);
        assert_eq!(options.timezone, "Europe/Paris");
        assert_eq!(options.pool_size, 4);
    }

    #[test]
    fn test_default_options() {
        let options = BackendOptions::default();
        assert!(options.use_tz);
        assert_eq!(options.timezone, "UTC");
        assert_eq!(options.pool_size, 1);
    }
}
