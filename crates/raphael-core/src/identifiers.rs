//! Identifier validation and quoting.

use std::sync::OnceLock;

use regex::Regex;

use crate::connection::Dialect;
use crate::error::{Error, Result};

fn identifier_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").ok())
        .as_ref()
}

/// Check that `name` is a plain SQL identifier (letters, digits, underscore).
pub fn validate_identifier(name: &str) -> Result<()> {
    if identifier_pattern().is_some_and(|pattern| pattern.is_match(name)) {
        Ok(())
    } else {
        Err(Error::Query(format!("invalid identifier: {name:?}")))
    }
}

/// Quote an identifier for the given dialect, doubling embedded quote characters.
pub fn quote_ident(name: &str, dialect: Dialect) -> String {
    match dialect {
        Dialect::Mysql => format!("`{}`", name.replace('`', "``")),
        Dialect::Postgres | Dialect::Sqlite => format!("\"{}\"", name.replace('"', "\"\"")),
    }
}
