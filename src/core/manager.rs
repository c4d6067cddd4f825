//! Entry point for pools, transactions and query tracking
//!
//! # Example
//!
//! ```ignore
//! let registry = Arc::new(PoolRegistry::with_factory(Arc::new(PostgresPoolFactory)));
//! let manager = DatabaseManager::new(registry);
//! manager.configure("main", ConnectionConfig::from_env("POSTGRES_URL")?);
//!
//! manager
//!     .transaction("main", false, |tx| async move {
//!         tx.execute("INSERT INTO users (name) VALUES ($1)", &["alice".into()]).await?;
//!         Ok::<_, DatabaseError>(())
//!     })
//!     .await?;
//! ```

use super::database::{ConnectionConfig, ConnectionPool};
use super::error::{DatabaseError, Result};
use super::registry::PoolRegistry;
use super::tracker::QueryTracker;
use super::transaction::{current_query_tracker, run_scope, run_tracked, TransactionContext};
use super::value::{DatabaseResult, DatabaseRow, DatabaseValue};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Transaction and pool front door for one application
pub struct DatabaseManager {
    registry: Arc<PoolRegistry>,
    /// Descriptors used to create pools lazily on first transaction
    configs: RwLock<HashMap<String, ConnectionConfig>>,
}

impl std::fmt::Debug for DatabaseManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseManager")
            .field("registry", &self.registry)
            .field("configured", &self.configs.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl DatabaseManager {
    pub fn new(registry: Arc<PoolRegistry>) -> Self {
        Self {
            registry,
            configs: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<PoolRegistry> {
        &self.registry
    }

    /// Remember how to reach `name`; the pool is created on first use
    pub fn configure(&self, name: impl Into<String>, config: ConnectionConfig) {
        self.configs.write().insert(name.into(), config);
    }

    /// Register an already-built pool
    pub fn add_pool(&self, name: impl Into<String>, pool: Arc<dyn ConnectionPool>) {
        self.registry.register_pool(name, pool);
    }

    pub fn get_pool(&self, name: &str) -> Result<Arc<dyn ConnectionPool>> {
        self.registry.get_pool(name)
    }

    /// Existing pool for `name`, or one created from `config`
    ///
    /// Falls back to the descriptor given to [`configure`](Self::configure)
    /// when `config` is `None`.
    pub fn get_or_create_pool(
        &self,
        name: &str,
        config: Option<&ConnectionConfig>,
    ) -> Result<Arc<dyn ConnectionPool>> {
        match config {
            Some(config) => self.registry.get_or_create_pool(name, Some(config)),
            None => {
                let configured = self.configs.read().get(name).cloned();
                self.registry.get_or_create_pool(name, configured.as_ref())
            }
        }
    }

    /// Run `f` inside a transaction on `db_name`
    ///
    /// The first scope for a database in the current task acquires a
    /// connection and issues BEGIN; scopes entered while it is active nest
    /// behind `SAVEPOINT savepoint_<depth>`. `Ok` commits (or releases the
    /// savepoint), `Err` rolls back (or rolls back to the savepoint) and is
    /// returned unchanged.
    ///
    /// `track_queries` opens a tracker when none is attached yet; it never
    /// replaces or disables an outer one.
    ///
    /// # Errors
    ///
    /// Pool lookup/acquisition and transaction-control failures are converted
    /// into `E`; errors produced by `f` propagate as they are.
    pub async fn transaction<F, Fut, T, E>(
        &self,
        db_name: &str,
        track_queries: bool,
        f: F,
    ) -> std::result::Result<T, E>
    where
        F: FnOnce(Arc<TransactionContext>) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<DatabaseError>,
    {
        let config = self.configs.read().get(db_name).cloned();
        run_scope(&self.registry, config.as_ref(), db_name, track_queries, f).await
    }

    /// Run `f` with the task's query tracker, creating one if none is active
    ///
    /// Nested calls observe the same tracker. A tracker created here is
    /// detached when `f` completes; the handle keeps its history.
    pub async fn track_queries<F, Fut, T>(f: F) -> T
    where
        F: FnOnce(QueryTracker) -> Fut,
        Fut: Future<Output = T>,
    {
        run_tracked(f).await
    }

    /// Tracker observing the calling task, if any
    pub fn get_query_tracker() -> Option<QueryTracker> {
        current_query_tracker()
    }

    /// Execute on the calling task's active transaction for `db_name`
    ///
    /// # Errors
    ///
    /// `NoActiveTransaction` outside a transaction scope for `db_name`.
    pub async fn execute(db_name: &str, sql: &str, params: &[DatabaseValue]) -> Result<u64> {
        Self::active(db_name)?.execute(sql, params).await
    }

    /// Query on the calling task's active transaction for `db_name`
    pub async fn query(
        db_name: &str,
        sql: &str,
        params: &[DatabaseValue],
    ) -> Result<DatabaseResult> {
        Self::active(db_name)?.query(sql, params).await
    }

    /// First row on the calling task's active transaction for `db_name`
    pub async fn query_one(
        db_name: &str,
        sql: &str,
        params: &[DatabaseValue],
    ) -> Result<Option<DatabaseRow>> {
        Self::active(db_name)?.query_one(sql, params).await
    }

    fn active(db_name: &str) -> Result<Arc<TransactionContext>> {
        TransactionContext::current(db_name)
            .ok_or_else(|| DatabaseError::no_active_transaction(db_name))
    }

    /// Close every registered pool
    pub fn close(&self) {
        self.registry.close_all();
    }
}

/// Boxed future returned by [`transactional`] wrappers
pub type TransactionalFuture<T, E> = Pin<Box<dyn Future<Output = std::result::Result<T, E>> + Send>>;

/// Wrap `op` so every call runs inside `transaction(db_name, query_logs)`
///
/// Calls made while a transaction on `db_name` is already active in the task
/// nest into it. Inside `op`, statements go through
/// [`DatabaseManager::execute`] or [`TransactionContext::current`].
pub fn transactional<A, F, Fut, T, E>(
    manager: Arc<DatabaseManager>,
    db_name: impl Into<String>,
    query_logs: bool,
    op: F,
) -> impl Fn(A) -> TransactionalFuture<T, E>
where
    A: Send + 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: From<DatabaseError> + Send + 'static,
{
    let db_name: Arc<str> = Arc::from(db_name.into());
    let op = Arc::new(op);

    move |args: A| -> TransactionalFuture<T, E> {
        let manager = Arc::clone(&manager);
        let db_name = Arc::clone(&db_name);
        let op = Arc::clone(&op);
        Box::pin(async move {
            manager
                .transaction(&db_name, query_logs, move |_ctx| op(args))
                .await
        })
    }
}
