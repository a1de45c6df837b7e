//! Error types for Raphael.

use std::fmt;

/// Convenience alias used across the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// Which step of backend initialization failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStage {
    /// Opening the connection pool.
    Connect,
    /// Materializing the schema of registered shadow models.
    Schema,
}

impl InitStage {
    pub const fn as_str(self) -> &'static str {
        match self {
            InitStage::Connect => "connect",
            InitStage::Schema => "schema",
        }
    }
}

/// The primary error type.
#[derive(Debug)]
pub enum Error {
    /// The configured database engine has no known target scheme.
    UnsupportedEngine {
        /// The raw engine string from the configuration.
        engine: String,
    },
    /// A single-object lookup matched zero rows.
    NotFound {
        /// Qualified name of the model that was queried.
        model: String,
    },
    /// A single-object lookup matched more than one row.
    MultipleResults {
        /// Qualified name of the model that was queried.
        model: String,
        /// Number of rows observed (a lower bound, lookups stop early).
        count: usize,
    },
    /// Backend initialization failed; the next call retries the whole sequence.
    Initialization {
        stage: InitStage,
        source: Box<Error>,
    },
    /// The backend rejected a statement or a predicate.
    Query(String),
    /// Driver or pool failure outside initialization.
    Connection(String),
    /// A value could not be converted to the requested Rust type.
    Conversion(String),
    /// Malformed configuration.
    Config(String),
}

impl Error {
    /// Wrap a backend failure that happened while initializing.
    pub fn initialization(stage: InitStage, source: Error) -> Self {
        Error::Initialization {
            stage,
            source: Box::new(source),
        }
    }

    /// Whether this is a zero-match lookup failure.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnsupportedEngine { engine } => {
                write!(f, "Unsupported database engine: {engine}")
            }
            Error::NotFound { model } => write!(f, "{model} matching query does not exist"),
            Error::MultipleResults { model, count } => write!(
                f,
                "get() returned more than one {model} (found at least {count})"
            ),
            Error::Initialization { stage, source } => write!(
                f,
                "backend initialization failed during {} step: {source}",
                stage.as_str()
            ),
            Error::Query(msg) => write!(f, "Query error: {msg}"),
            Error::Connection(msg) => write!(f, "Connection error: {msg}"),
            Error::Conversion(msg) => write!(f, "Conversion error: {msg}"),
            Error::Config(msg) => write!(f, "Configuration error: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Initialization { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_unsupported_engine_message_carries_raw_engine() {
        let err = Error::UnsupportedEngine {
            engine: "django.db.backends.oracle".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Unsupported database engine: django.db.backends.oracle"
        );
    }

    #[test]
    fn test_initialization_exposes_source() {
        let err = Error::initialization(InitStage::Schema, Error::Query("boom".to_string()));
        assert!(err.to_string().contains("schema step"));
        assert!(err.source().is_some());
    }
}
