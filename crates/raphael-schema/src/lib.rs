//! Shadow-model synthesis and schema materialization for Raphael.
//!
//! `raphael-schema` turns source-model metadata into shadow models:
//!
//! - [`catalog`] maps each source field kind to a target field specification.
//! - [`shadow`] assembles shadow models and caches them per qualified name.
//! - [`ddl`] renders additive `CREATE TABLE IF NOT EXISTS` statements.
//!
//! Nothing here touches a database; backends in the `raphael` crate consume
//! these definitions during initialization.

pub mod catalog;
pub mod ddl;
pub mod shadow;

pub use catalog::{TargetField, TargetType, map_field};
pub use ddl::{DdlOptions, create_table, create_tables};
pub use shadow::{IMPLICIT_PK, ShadowField, ShadowModel, ShadowRegistry};
