//! Connection, pool and configuration seams
//!
//! Backends implement [`Connection`], [`ConnectionPool`] and [`PoolFactory`];
//! the transaction layer only ever talks to these traits.

use super::error::{DatabaseError, Result};
use super::value::{DatabaseResult, DatabaseValue};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Default timeout for database operations (30 seconds)
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for acquiring a pooled connection
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default maximum pool size
pub const DEFAULT_MAX_SIZE: usize = 16;

/// A single connection checked out of a pool
///
/// Dropping the box returns the connection to its pool. Statements use
/// `$n` positional placeholders.
#[async_trait]
pub trait Connection: Send {
    /// Execute a statement and return the number of affected rows
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> Result<u64>;

    /// Execute a query and return all rows
    async fn query(&mut self, sql: &str, params: &[DatabaseValue]) -> Result<DatabaseResult>;

    /// Run parameterless control statements (BEGIN, SAVEPOINT, COMMIT, ...)
    async fn batch_execute(&mut self, sql: &str) -> Result<()>;

    /// Close the connection instead of returning it to the pool
    ///
    /// Called when the transaction state of the connection is unknown.
    fn detach(self: Box<Self>) {}
}

/// Pool occupancy snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStatus {
    /// Connections currently open
    pub size: usize,
    /// Idle connections ready to hand out
    pub available: usize,
    /// Tasks waiting for a connection
    pub waiting: usize,
    pub max_size: usize,
}

/// Trait for database connection pooling
///
/// # Example
/// ```ignore
/// let mut conn = pool.acquire().await?;
/// conn.batch_execute("SELECT 1").await?;
/// drop(conn); // back to the pool
/// ```
#[async_trait]
pub trait ConnectionPool: Send + Sync {
    /// Get a connection from the pool
    ///
    /// Waits until a connection is available or the acquire timeout elapses.
    async fn acquire(&self) -> Result<Box<dyn Connection>>;

    fn status(&self) -> PoolStatus;

    /// Stop handing out connections and close idle ones
    fn close(&self);
}

/// Creates pools for named databases on first use
pub trait PoolFactory: Send + Sync {
    fn create_pool(&self, name: &str, config: &ConnectionConfig) -> Result<Arc<dyn ConnectionPool>>;
}

/// Connection descriptor for one named database
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    url: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    database: Option<String>,
    username: Option<String>,
    password: Option<String>,
    options: BTreeMap<String, String>,
    /// Maximum number of connections in the pool
    pub max_size: usize,
    /// Timeout for acquiring a connection from the pool
    pub acquire_timeout: Duration,
    /// Timeout for each statement sent over an acquired connection
    pub operation_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: None,
            port: None,
            database: None,
            username: None,
            password: None,
            options: BTreeMap::new(),
            max_size: DEFAULT_MAX_SIZE,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("url", &self.url.as_ref().map(|_| "<redacted>"))
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("options", &self.options)
            .field("max_size", &self.max_size)
            .field("acquire_timeout", &self.acquire_timeout)
            .field("operation_timeout", &self.operation_timeout)
            .finish()
    }
}

impl ConnectionConfig {
    /// Create an empty configuration with default pool settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a configuration from a `postgres://` URL
    pub fn from_url(url: impl Into<String>) -> Self {
        Self::new().url(url)
    }

    /// Read the URL from an environment variable
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the variable is unset or empty
    pub fn from_env(var: &str) -> Result<Self> {
        match std::env::var(var) {
            Ok(url) if !url.trim().is_empty() => Ok(Self::from_url(url.trim())),
            _ => Err(DatabaseError::configuration(format!(
                "Environment variable '{var}' is not set"
            ))),
        }
    }

    /// Set the connection URL (takes precedence over discrete fields)
    #[must_use]
    pub fn url<S: Into<String>>(mut self, url: S) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set the database host
    #[must_use]
    pub fn host<S: Into<String>>(mut self, host: S) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Set the database port
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the database name
    #[must_use]
    pub fn database<S: Into<String>>(mut self, database: S) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the username
    #[must_use]
    pub fn username<S: Into<String>>(mut self, username: S) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Set the password
    #[must_use]
    pub fn password<S: Into<String>>(mut self, password: S) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Add a custom option
    #[must_use]
    pub fn option<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Set maximum pool size
    #[must_use]
    pub fn with_max_size(mut self, size: usize) -> Self {
        self.max_size = size;
        self
    }

    /// Set connection acquisition timeout
    #[must_use]
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set database operation timeout
    #[must_use]
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn get_url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn get_host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn get_port(&self) -> Option<u16> {
        self.port
    }

    pub fn get_database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    pub fn get_username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn get_password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn options(&self) -> &BTreeMap<String, String> {
        &self.options
    }

    /// Render the connection string
    ///
    /// Returns the URL verbatim when one was given, otherwise libpq
    /// `key=value` pairs.
    pub fn build_connection_string(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }

        let mut parts = Vec::new();
        if let Some(host) = &self.host {
            parts.push(format!("host={}", host));
        }
        if let Some(port) = self.port {
            parts.push(format!("port={}", port));
        }
        if let Some(database) = &self.database {
            parts.push(format!("dbname={}", database));
        }
        if let Some(username) = &self.username {
            parts.push(format!("user={}", username));
        }
        if let Some(password) = &self.password {
            parts.push(format!("password={}", password));
        }
        for (key, value) in &self.options {
            parts.push(format!("{}={}", key, value));
        }
        parts.join(" ")
    }

    /// Reject descriptors that cannot identify a server
    pub fn validate(&self) -> Result<()> {
        if self.url.is_none() && self.host.is_none() && self.database.is_none() {
            return Err(DatabaseError::configuration(
                "connection config needs a url, host or database",
            ));
        }
        if self.max_size == 0 {
            return Err(DatabaseError::configuration("max_size must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_string_from_parts() {
        let config = ConnectionConfig::new()
            .host("localhost")
            .port(5432)
            .database("mydb")
            .username("user")
            .password("pass")
            .option("sslmode", "disable")
            .option("application_name", "api");

        assert_eq!(
            config.build_connection_string(),
            "host=localhost port=5432 dbname=mydb user=user password=pass application_name=api sslmode=disable"
        );
    }

    #[test]
    fn test_url_takes_precedence() {
        let config = ConnectionConfig::from_url("postgres://u:p@db/app").host("ignored");
        assert_eq!(config.build_connection_string(), "postgres://u:p@db/app");
    }

    #[test]
    fn test_pool_settings() {
        let config = ConnectionConfig::new()
            .database("app")
            .with_max_size(4)
            .with_acquire_timeout(Duration::from_millis(250))
            .with_operation_timeout(Duration::from_secs(2));

        assert_eq!(config.max_size, 4);
        assert_eq!(config.acquire_timeout, Duration::from_millis(250));
        assert_eq!(config.operation_timeout, Duration::from_secs(2));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate() {
        assert!(ConnectionConfig::new().validate().unwrap_err().is_configuration());
        assert!(ConnectionConfig::new()
            .host("db")
            .with_max_size(0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_from_env_missing() {
        let err = ConnectionConfig::from_env("RUST_QUERY_CONTEXT_SURELY_UNSET_VAR").unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = ConnectionConfig::new().host("db").password("hunter2");
        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }
}
