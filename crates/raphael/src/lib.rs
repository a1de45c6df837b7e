//! Raphael: definition-first models behind an async ORM facade.
//!
//! `raphael` is the facade crate. It ties the workspace together:
//!
//! - **Runtime**: [`Raphael`] owns configuration, the backend, the shadow
//!   registry and the one-time [`BackendInitializer`].
//! - **Managers**: [`Manager`] exposes CRUD, bulk and aggregate operations for
//!   one source model; [`QuerySet`] chains filters lazily.
//! - **Instances**: [`AsyncModel`] adds `async_save`, `async_delete` and
//!   `async_refresh` to every model.
//! - **Backends**: [`Backend`] is the seam to the target runtime, with
//!   [`SqlBackend`] over any driver [`Connector`] and the in-process
//!   [`MemoryBackend`].
//!
//! # Example
//!
//! ```ignore
//! use raphael::prelude::*;
//!
//! #[derive(Model, Debug, Default)]
//! #[raphael(app_label = "library")]
//! struct Book {
//!     #[raphael(primary_key)]
//!     id: Option<i64>,
//!     #[raphael(max_length = 200)]
//!     title: String,
//!     pages: Option<i32>,
//! }
//!
//! let rt = Raphael::memory(RaphaelConfig::new(
//!     DatabaseConfig::new("django.db.backends.sqlite3").name(":memory:"),
//! ));
//! let books = rt.manager::<Book>();
//! let dune = books.create(&cx, &[("title", "Dune".into())]).await;
//! let long = books.query().filter([Predicate::gt("pages", 300)]).all(&cx).await;
//! ```

pub mod backend;
pub mod initializer;
pub mod instance;
pub mod manager;
pub mod memory;
pub mod queryset;
pub mod registry;
pub mod runtime;
pub mod sql_backend;

pub use backend::{Backend, BackendOptions, InsertRow};
pub use initializer::BackendInitializer;
pub use instance::{AsyncModel, SaveOptions};
pub use manager::Manager;
pub use memory::MemoryBackend;
pub use queryset::{QuerySet, ValuesListQuerySet, ValuesQuerySet};
pub use registry::ManagerRegistry;
pub use runtime::Raphael;
pub use sql_backend::{ConnectionPool, Connector, SqlBackend};

pub use raphael_core::{
    Connection, ConnectionTarget, Cx, DatabaseConfig, Dialect, Error, FieldDefault,
    FieldDescriptor, FieldKind, FromValue, InitStage, Model, Outcome, RaphaelConfig, Result, Row,
    Value,
};
pub use raphael_macros::Model;
pub use raphael_query::{Aggregate, Lookup, OrderKey, Predicate, QueryState};
pub use raphael_schema::{ShadowModel, ShadowRegistry, TargetField, TargetType};

/// Lift a plain result into an [`Outcome`].
pub(crate) fn lift<T>(result: Result<T>) -> Outcome<T, Error> {
    match result {
        Ok(value) => Outcome::Ok(value),
        Err(e) => Outcome::Err(e),
    }
}

/// Everything needed to declare models and query them.
pub mod prelude {
    pub use crate::{
        Aggregate, AsyncModel, Backend, Cx, DatabaseConfig, Error, FieldDefault, FieldKind,
        Manager, MemoryBackend, Model, Outcome, Predicate, QuerySet, Raphael, RaphaelConfig,
        SaveOptions, SqlBackend, Value,
    };
}
