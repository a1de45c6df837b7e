//! Query construction for Raphael.
//!
//! `raphael-query` holds the backend-neutral half of the query layer:
//!
//! - [`lookup`]: field lookups (`exact`, `icontains`, `in`, `range`, ...)
//! - [`state`]: accumulated conditions, ordering, window and aggregates
//! - [`sql`]: parameterized SQL rendering per dialect
//! - [`eval`]: the same semantics evaluated over in-memory rows
//!
//! Query sets in the `raphael` crate build a [`QueryState`] and hand it to a
//! backend, which picks [`sql`] or [`eval`] to execute it.

pub mod eval;
pub mod lookup;
pub mod sql;
pub mod state;

pub use lookup::{Lookup, Predicate};
pub use state::{Aggregate, Condition, OrderKey, QueryState};
