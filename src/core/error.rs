//! Error types for the query and transaction layer
//!
//! This module defines all error types that can occur while building queries,
//! acquiring pooled connections and driving transactions.

/// Result type alias for database operations
pub type Result<T> = std::result::Result<T, DatabaseError>;

/// Error types for database operations
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    /// Invalid builder input (operator, limit/offset, pagination, HAVING misuse)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The builder state cannot be rendered into valid SQL
    #[error("Build error: {0}")]
    Build(String),

    /// No pool is registered under the requested name and none could be created
    #[error("Database pool '{0}' not found")]
    PoolNotFound(String),

    /// Timed out waiting for a pooled connection
    #[error("Connection pool '{pool}' exhausted: no connection available after {timeout_ms}ms")]
    PoolExhausted { pool: String, timeout_ms: u64 },

    /// Pool creation or acquisition failure not covered above
    #[error("Pool error: {0}")]
    Pool(String),

    /// BEGIN/COMMIT/ROLLBACK or savepoint management failed
    #[error("Transaction error: {0}")]
    TransactionError(String),

    /// A statement was issued outside any transaction for the database
    #[error("No active transaction for database '{0}'")]
    NoActiveTransaction(String),

    /// Connection error (generic)
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Query timeout
    #[error("Query timeout after {timeout_ms}ms")]
    QueryTimeout { timeout_ms: u64 },

    /// Query execution error
    #[error("Query execution error: {0}")]
    QueryError(String),

    /// PostgreSQL error
    #[cfg(feature = "postgres")]
    #[error("PostgreSQL error: {0}")]
    PostgresError(#[from] tokio_postgres::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl DatabaseError {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        DatabaseError::Configuration(msg.into())
    }

    /// Create a build error
    pub fn build<S: Into<String>>(msg: S) -> Self {
        DatabaseError::Build(msg.into())
    }

    /// Create a pool-not-found error
    pub fn pool_not_found<S: Into<String>>(name: S) -> Self {
        DatabaseError::PoolNotFound(name.into())
    }

    /// Create a pool exhausted error
    pub fn pool_exhausted(pool: impl Into<String>, timeout_ms: u64) -> Self {
        DatabaseError::PoolExhausted {
            pool: pool.into(),
            timeout_ms,
        }
    }

    /// Create a generic pool error
    pub fn pool<S: Into<String>>(msg: S) -> Self {
        DatabaseError::Pool(msg.into())
    }

    /// Create a new transaction error
    pub fn transaction<S: Into<String>>(msg: S) -> Self {
        DatabaseError::TransactionError(msg.into())
    }

    /// Create a no-active-transaction error for the given database
    pub fn no_active_transaction<S: Into<String>>(db_name: S) -> Self {
        DatabaseError::NoActiveTransaction(db_name.into())
    }

    /// Create a new connection error (generic)
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        DatabaseError::ConnectionError(msg.into())
    }

    /// Create a query timeout error
    pub fn query_timeout(timeout_ms: u64) -> Self {
        DatabaseError::QueryTimeout { timeout_ms }
    }

    /// Create a new query error
    pub fn query<S: Into<String>>(msg: S) -> Self {
        DatabaseError::QueryError(msg.into())
    }

    /// Create a generic error
    pub fn other<S: Into<String>>(msg: S) -> Self {
        DatabaseError::Other(msg.into())
    }

    /// True for invalid builder input
    pub fn is_configuration(&self) -> bool {
        matches!(self, DatabaseError::Configuration(_))
    }

    /// True when the builder state could not be rendered
    pub fn is_build(&self) -> bool {
        matches!(self, DatabaseError::Build(_))
    }

    /// True for pool lookup, creation and acquisition failures
    pub fn is_pool(&self) -> bool {
        matches!(
            self,
            DatabaseError::PoolNotFound(_)
                | DatabaseError::PoolExhausted { .. }
                | DatabaseError::Pool(_)
        )
    }

    /// True for transaction-control failures
    pub fn is_transaction(&self) -> bool {
        matches!(
            self,
            DatabaseError::TransactionError(_) | DatabaseError::NoActiveTransaction(_)
        )
    }
}
