//! Database configuration and connection-string translation.
//!
//! [`DatabaseConfig`] mirrors the generic settings mapping
//! (`ENGINE, NAME, USER, PASSWORD, HOST, PORT`). [`translate`] turns it into
//! the [`ConnectionTarget`] the async backend connects to.

use serde::{Deserialize, Deserializer};

use crate::connection::Dialect;
use crate::error::{Error, Result};

/// Name used for in-memory SQLite databases.
pub const SQLITE_MEMORY: &str = ":memory:";

/// Default SQLite database file when `NAME` is unset.
pub const SQLITE_DEFAULT_NAME: &str = "db.sqlite3";

/// Default host for network engines when `HOST` is unset.
pub const DEFAULT_HOST: &str = "localhost";

/// Generic database configuration, as found in application settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DatabaseConfig {
    /// Engine identifier, matched by substring (`"sqlite"`, `"postgresql"`, `"mysql"`, ...)
    #[serde(rename = "ENGINE", default)]
    pub engine: String,
    /// Database name, or file path for SQLite
    #[serde(rename = "NAME", default, deserialize_with = "non_empty")]
    pub name: Option<String>,
    /// Username
    #[serde(rename = "USER", default, deserialize_with = "non_empty")]
    pub user: Option<String>,
    /// Password (ignored without a user)
    #[serde(rename = "PASSWORD", default, deserialize_with = "non_empty")]
    pub password: Option<String>,
    /// Hostname
    #[serde(rename = "HOST", default, deserialize_with = "non_empty")]
    pub host: Option<String>,
    /// Port, given either as a number or a numeric string
    #[serde(rename = "PORT", default, deserialize_with = "port")]
    pub port: Option<u16>,
}

impl DatabaseConfig {
    /// Create a configuration for the given engine.
    pub fn new(engine: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
            ..Self::default()
        }
    }

    /// Set the database name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the username.
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Set the password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the hostname.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Set the port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }
}

fn non_empty<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<String>, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.filter(|s| !s.is_empty()))
}

fn port<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<u16>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u16),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Number(n)) => Ok(Some(n)),
        Some(Raw::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(Raw::Text(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid PORT: {s}"))),
    }
}

/// Runtime configuration for the async bridge.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RaphaelConfig {
    /// Active database settings
    pub database: DatabaseConfig,
    /// Whether the backend stores timezone-aware timestamps
    #[serde(default = "default_use_tz")]
    pub use_tz: bool,
    /// Default timezone, passed through to the backend
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Number of connections the backend opens
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

fn default_use_tz() -> bool {
    true
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_pool_size() -> usize {
    1
}

impl RaphaelConfig {
    /// Create a configuration with default timezone handling.
    pub fn new(database: DatabaseConfig) -> Self {
        Self {
            database,
            use_tz: default_use_tz(),
            timezone: default_timezone(),
            pool_size: default_pool_size(),
        }
    }

    /// Parse a JSON settings document.
    ///
    /// ```
    /// use raphael_core::config::RaphaelConfig;
    ///
    /// let cfg = RaphaelConfig::from_json(
    ///     r#"{"database": {"ENGINE": "django.db.backends.sqlite3", "NAME": ":memory:"}}"#,
    /// ).unwrap();
    /// assert!(cfg.use_tz);
    /// assert_eq!(cfg.timezone, "UTC");
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(json)?;
        if cfg.pool_size == 0 {
            return Err(Error::Config("pool_size must be at least 1".to_string()));
        }
        Ok(cfg)
    }

    /// Set timezone-awareness.
    pub fn use_tz(mut self, use_tz: bool) -> Self {
        self.use_tz = use_tz;
        self
    }

    /// Set the default timezone.
    pub fn timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = timezone.into();
        self
    }

    /// Set the pool size (clamped to at least 1).
    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = size.max(1);
        self
    }
}

/// URL scheme for network engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Postgres,
    Mysql,
}

impl Scheme {
    pub const fn as_str(self) -> &'static str {
        match self {
            Scheme::Postgres => "postgres",
            Scheme::Mysql => "mysql",
        }
    }
}

/// Where the async backend connects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionTarget {
    /// Private in-memory SQLite database.
    SqliteMemory,
    /// SQLite database file.
    Sqlite {
        path: String,
    },
    /// Network database server.
    Network {
        scheme: Scheme,
        host: String,
        port: Option<u16>,
        user: Option<String>,
        password: Option<String>,
        database: String,
    },
}

impl ConnectionTarget {
    /// Connection string in the form the async runtime expects.
    pub fn url(&self) -> String {
        match self {
            ConnectionTarget::SqliteMemory => format!("sqlite://{SQLITE_MEMORY}"),
            ConnectionTarget::Sqlite { path } => format!("sqlite://{path}"),
            ConnectionTarget::Network {
                scheme,
                host,
                port,
                user,
                password,
                database,
            } => {
                let mut url = format!("{}://", scheme.as_str());
                if let Some(user) = user {
                    url.push_str(user);
                    if let Some(password) = password {
                        url.push(':');
                        url.push_str(password);
                    }
                    url.push('@');
                }
                url.push_str(host);
                if let Some(port) = port {
                    url.push_str(&format!(":{port}"));
                }
                url.push('/');
                url.push_str(database);
                url
            }
        }
    }

    /// SQL dialect spoken at this target.
    pub const fn dialect(&self) -> Dialect {
        match self {
            ConnectionTarget::SqliteMemory | ConnectionTarget::Sqlite { .. } => Dialect::Sqlite,
            ConnectionTarget::Network {
                scheme: Scheme::Postgres,
                ..
            } => Dialect::Postgres,
            ConnectionTarget::Network {
                scheme: Scheme::Mysql,
                ..
            } => Dialect::Mysql,
        }
    }
}

impl std::fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print credentials.
        match self {
            ConnectionTarget::Network {
                scheme,
                host,
                port,
                database,
                ..
            } => {
                write!(f, "{}://{host}", scheme.as_str())?;
                if let Some(port) = port {
                    write!(f, ":{port}")?;
                }
                write!(f, "/{database}")
            }
            other => f.write_str(&other.url()),
        }
    }
}

/// Translate a generic database configuration into a connection target.
///
/// The engine is matched by substring: `sqlite`, then `postgresql`/`psycopg`,
/// then `mysql`. Anything else fails with [`Error::UnsupportedEngine`].
pub fn translate(config: &DatabaseConfig) -> Result<ConnectionTarget> {
    let engine = config.engine.as_str();

    if engine.contains("sqlite") {
        let name = config.name.as_deref().unwrap_or(SQLITE_DEFAULT_NAME);
        if name == SQLITE_MEMORY {
            return Ok(ConnectionTarget::SqliteMemory);
        }
        return Ok(ConnectionTarget::Sqlite {
            path: name.to_string(),
        });
    }

    let scheme = if engine.contains("postgresql") || engine.contains("psycopg") {
        Scheme::Postgres
    } else if engine.contains("mysql") {
        Scheme::Mysql
    } else {
        tracing::warn!(engine, "No connection scheme for database engine");
        return Err(Error::UnsupportedEngine {
            engine: config.engine.clone(),
        });
    };

    let user = config.user.clone().filter(|u| !u.is_empty());
    let password = user
        .as_ref()
        .and(config.password.clone())
        .filter(|p| !p.is_empty());

    Ok(ConnectionTarget::Network {
        scheme,
        host: config
            .host
            .clone()
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| DEFAULT_HOST.to_string()),
        port: config.port,
        user,
        password,
        database: config.name.clone().unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_memory() {
        let target = translate(&DatabaseConfig::new("sqlite3").name(":memory:")).unwrap();
        assert_eq!(target, ConnectionTarget::SqliteMemory);
        assert_eq!(target.url(), "sqlite://:memory:");
    }

    #[test]
    fn test_sqlite_default_name() {
        let target = translate(&DatabaseConfig::new("django.db.backends.sqlite3")).unwrap();
        assert_eq!(target.url(), "sqlite://db.sqlite3");
        assert_eq!(target.dialect(), Dialect::Sqlite);
    }

    #[test]
    fn test_postgres_full() {
        let cfg = DatabaseConfig::new("postgresql")
            .user("u")
            .password("p")
            .host("h")
            .port(5432)
            .name("d");
        let target = translate(&cfg).unwrap();
        assert_eq!(target.url(), "postgres://u:p@h:5432/d");
        assert_eq!(target.dialect(), Dialect::Postgres);
    }

    #[test]
    fn test_psycopg_marker() {
        let target = translate(&DatabaseConfig::new("psycopg").name("d")).unwrap();
        assert_eq!(target.url(), "postgres://localhost/d");
    }

    #[test]
    fn test_mysql_without_user() {
        let cfg = DatabaseConfig::new("mysql").host("localhost").name("d");
        assert_eq!(translate(&cfg).unwrap().url(), "mysql://localhost/d");
    }

    #[test]
    fn test_password_dropped_without_user() {
        let cfg = DatabaseConfig::new("mysql").password("secret").name("d");
        assert_eq!(translate(&cfg).unwrap().url(), "mysql://localhost/d");
    }

    #[test]
    fn test_user_without_password() {
        let cfg = DatabaseConfig::new("postgresql").user("u").name("d");
        assert_eq!(translate(&cfg).unwrap().url(), "postgres://u@localhost/d");
    }

    #[test]
    fn test_unsupported_engine() {
        let err = translate(&DatabaseConfig::new("oracle")).unwrap_err();
        match err {
            Error::UnsupportedEngine { engine } => assert_eq!(engine, "oracle"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_display_hides_credentials() {
        let cfg = DatabaseConfig::new("postgresql")
            .user("u")
            .password("p")
            .name("d");
        let shown = translate(&cfg).unwrap().to_string();
        assert_eq!(shown, "postgres://localhost/d");
    }

    #[test]
    fn test_deserialize_settings_mapping() {
        let cfg: DatabaseConfig = serde_json::from_str(
            r#"{"ENGINE": "django.db.backends.postgresql", "NAME": "books",
                "USER": "", "PASSWORD": "", "HOST": "", "PORT": "5433"}"#,
        )
        .unwrap();
        assert_eq!(cfg.port, Some(5433));
        assert_eq!(cfg.user, None);
        assert_eq!(translate(&cfg).unwrap().url(), "postgres://localhost:5433/books");
    }

    #[test]
    fn test_raphael_config_rejects_zero_pool() {
        let err = RaphaelConfig::from_json(
            r#"{"database": {"ENGINE": "sqlite3"}, "pool_size": 0}"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
