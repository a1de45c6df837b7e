//! Core types and traits for Raphael.
//!
//! `raphael-core` is the **foundation layer** of the workspace. It defines the
//! contracts every other crate builds on.
//!
//! # Role In The Architecture
//!
//! - **Source-model contract**: [`Model`] and [`FieldDescriptor`] describe the
//!   definition-first models the bridge adapts.
//! - **Driver contract**: [`Connection`] is implemented by database drivers
//!   used by the SQL backend.
//! - **Data model**: [`Row`] and [`Value`] carry query inputs and outputs.
//! - **Configuration**: [`DatabaseConfig`] and [`translate`] turn settings into
//!   a [`ConnectionTarget`].
//! - **Structured concurrency**: re-exports `Cx` and `Outcome` from asupersync
//!   so every async operation is cancel-correct.
//!
//! Most applications should use the `raphael` facade.

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Cx, Outcome};

pub mod config;
pub mod connection;
pub mod error;
pub mod field;
pub mod identifiers;
pub mod model;
pub mod row;
pub mod value;

pub use config::{ConnectionTarget, DatabaseConfig, RaphaelConfig, Scheme, translate};
pub use connection::{Connection, Dialect};
pub use error::{Error, InitStage, Result};
pub use field::{FieldDefault, FieldDescriptor, FieldKind};
pub use identifiers::{quote_ident, validate_identifier};
pub use model::Model;
pub use row::Row;
pub use value::{FromValue, Value};
