//! Task-local transaction contexts with savepoint nesting
//!
//! Each logical task carries a [`TaskState`] in a tokio task-local. It holds
//! at most one [`TransactionContext`] per database name plus an ambient query
//! tracker. Spawned tasks start without state, so two tasks never share a
//! context unless one is handed an `Arc<TransactionContext>` explicitly.
//! Every outermost scope runs on its own copy of the state, so futures joined
//! within one task open separate transactions.
//!
//! Scope exits are guarded: if a scope's future is dropped before it finishes
//! (cancellation or panic), the guard rolls back. An outermost scope rolls
//! back on a spawned task before the connection returns to the pool; a nested
//! scope queues `ROLLBACK TO SAVEPOINT` ahead of the context's next statement.

use super::database::{Connection, ConnectionConfig};
use super::error::{DatabaseError, Result};
use super::query_builder::QueryBuilder;
use super::registry::PoolRegistry;
use super::tracker::QueryTracker;
use super::value::{DatabaseResult, DatabaseRow, DatabaseValue};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

tokio::task_local! {
    static TASK_STATE: Arc<TaskState>;
}

/// Per-task transaction bookkeeping
#[derive(Debug, Default)]
pub(crate) struct TaskState {
    /// Active contexts in entry order; at most one per database
    contexts: Mutex<Vec<Arc<TransactionContext>>>,
    /// Tracker opened while no transaction was active
    ambient_tracker: Mutex<Option<QueryTracker>>,
}

impl TaskState {
    fn find(&self, db_name: &str) -> Option<Arc<TransactionContext>> {
        self.contexts
            .lock()
            .iter()
            .find(|ctx| ctx.db_name == db_name)
            .cloned()
    }

    fn innermost(&self) -> Option<Arc<TransactionContext>> {
        self.contexts.lock().last().cloned()
    }

    fn push(&self, ctx: Arc<TransactionContext>) {
        self.contexts.lock().push(ctx);
    }

    fn remove(&self, ctx: &Arc<TransactionContext>) {
        self.contexts.lock().retain(|c| !Arc::ptr_eq(c, ctx));
    }

    /// Copy taken on entry to an outermost scope
    fn fork(&self) -> TaskState {
        TaskState {
            contexts: Mutex::new(self.contexts.lock().clone()),
            ambient_tracker: Mutex::new(self.ambient_tracker.lock().clone()),
        }
    }

    /// Tracker of the innermost context that has one, else the ambient one
    fn current_tracker(&self) -> Option<QueryTracker> {
        let attached = self
            .contexts
            .lock()
            .iter()
            .rev()
            .find_map(|ctx| ctx.query_tracker());
        attached.or_else(|| self.ambient_tracker.lock().clone())
    }
}

/// Run `fut` with this task's state, installing a fresh one if needed
pub(crate) async fn with_task_state<F, Fut, T>(f: F) -> T
where
    F: FnOnce(Arc<TaskState>) -> Fut,
    Fut: Future<Output = T>,
{
    match TASK_STATE.try_with(Arc::clone) {
        Ok(state) => f(state).await,
        Err(_) => {
            let state = Arc::new(TaskState::default());
            TASK_STATE.scope(Arc::clone(&state), f(state)).await
        }
    }
}

/// Tracker attached to the calling task's innermost active context, if any
pub(crate) fn current_query_tracker() -> Option<QueryTracker> {
    TASK_STATE
        .try_with(|state| state.current_tracker())
        .ok()
        .flatten()
}

/// Active transaction on one database for one logical task
///
/// Holds the checked-out connection, the nesting depth and the attached
/// query tracker. Statements issued through a context run in call order on
/// its single connection.
pub struct TransactionContext {
    db_name: String,
    connection: tokio::sync::Mutex<Option<Box<dyn Connection>>>,
    depth: AtomicUsize,
    tracker: Mutex<Option<QueryTracker>>,
    /// Statements left behind by cancelled nested scopes
    pending: Mutex<Vec<String>>,
}

impl std::fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionContext")
            .field("db_name", &self.db_name)
            .field("depth", &self.depth())
            .field("tracking", &self.tracker.lock().is_some())
            .finish()
    }
}

impl TransactionContext {
    fn new(db_name: &str, connection: Box<dyn Connection>, tracker: Option<QueryTracker>) -> Self {
        Self {
            db_name: db_name.to_string(),
            connection: tokio::sync::Mutex::new(Some(connection)),
            depth: AtomicUsize::new(1),
            tracker: Mutex::new(tracker),
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Active context for `db_name` in the calling task
    pub fn current(db_name: &str) -> Option<Arc<TransactionContext>> {
        TASK_STATE
            .try_with(|state| state.find(db_name))
            .ok()
            .flatten()
    }

    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    /// 1 for the outermost scope, +1 per nested savepoint, 0 once finished
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn query_tracker(&self) -> Option<QueryTracker> {
        self.tracker.lock().clone()
    }

    /// Execute a statement, returning the affected row count
    ///
    /// # Errors
    ///
    /// Driver errors pass through unchanged.
    pub async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> Result<u64> {
        self.record(sql, params);
        let mut slot = self.connection.lock().await;
        let conn = self.ready(&mut slot).await?;
        conn.execute(sql, params).await
    }

    /// Run a query and return every row
    pub async fn query(&self, sql: &str, params: &[DatabaseValue]) -> Result<DatabaseResult> {
        self.record(sql, params);
        let mut slot = self.connection.lock().await;
        let conn = self.ready(&mut slot).await?;
        conn.query(sql, params).await
    }

    /// Run a query and return the first row, if any
    pub async fn query_one(
        &self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> Result<Option<DatabaseRow>> {
        Ok(self.query(sql, params).await?.into_iter().next())
    }

    /// Build and run a SELECT
    pub async fn fetch(&self, builder: &QueryBuilder) -> Result<DatabaseResult> {
        let (sql, params) = builder.build()?;
        self.query(&sql, &params).await
    }

    fn record(&self, sql: &str, params: &[DatabaseValue]) {
        let tracker = self.tracker.lock().clone();
        if let Some(tracker) = tracker {
            tracker.record(sql, params);
        }
    }

    fn attach_tracker(&self, tracker: QueryTracker) {
        *self.tracker.lock() = Some(tracker);
    }

    fn detach_tracker(&self, tracker: &QueryTracker) {
        let mut slot = self.tracker.lock();
        if slot.as_ref().is_some_and(|t| t.same_as(tracker)) {
            *slot = None;
        }
    }

    /// Connection with every queued statement applied
    async fn ready<'a>(
        &self,
        slot: &'a mut Option<Box<dyn Connection>>,
    ) -> Result<&'a mut Box<dyn Connection>> {
        let conn = slot.as_mut().ok_or_else(|| {
            DatabaseError::transaction(format!(
                "transaction on '{}' is already finished",
                self.db_name
            ))
        })?;

        let pending = std::mem::take(&mut *self.pending.lock());
        for statement in pending {
            tracing::debug!(db = %self.db_name, "{statement}");
            conn.batch_execute(&statement).await.map_err(|e| {
                DatabaseError::transaction(format!("{statement} failed: {e}"))
            })?;
        }
        Ok(conn)
    }

    /// Run a transaction-control statement
    async fn control(&self, statement: &str) -> Result<()> {
        tracing::debug!(db = %self.db_name, depth = self.depth(), "{statement}");
        let mut slot = self.connection.lock().await;
        let conn = self.ready(&mut slot).await?;
        conn.batch_execute(statement)
            .await
            .map_err(|e| DatabaseError::transaction(format!("{statement} failed: {e}")))
    }

    /// COMMIT or ROLLBACK the outermost transaction and release the connection
    async fn finish(&self, statement: &str) -> Result<()> {
        let mut slot = self.connection.lock().await;
        let outcome = match self.ready(&mut slot).await {
            Ok(conn) => {
                tracing::debug!(db = %self.db_name, "{statement}");
                conn.batch_execute(statement).await.map_err(|e| {
                    DatabaseError::transaction(format!("{statement} failed: {e}"))
                })
            }
            Err(e) => Err(e),
        };

        self.depth.store(0, Ordering::SeqCst);
        let Some(mut conn) = slot.take() else {
            return outcome;
        };
        if outcome.is_err() {
            // nothing may stay open on a connection headed back to the pool
            if let Err(e) = conn.batch_execute("ROLLBACK").await {
                tracing::error!(db = %self.db_name, error = %e, "rollback failed, discarding connection");
                conn.detach();
                return outcome;
            }
        }
        drop(conn);
        outcome
    }

    /// Roll back after the owning scope was dropped mid-flight
    async fn abort(&self) {
        let mut slot = self.connection.lock().await;
        self.pending.lock().clear();
        self.depth.store(0, Ordering::SeqCst);

        let Some(mut conn) = slot.take() else {
            return;
        };
        match conn.batch_execute("ROLLBACK").await {
            Ok(()) => {
                tracing::debug!(db = %self.db_name, "ROLLBACK after cancelled scope");
                drop(conn);
            }
            Err(e) => {
                tracing::error!(db = %self.db_name, error = %e, "rollback of cancelled transaction failed, discarding connection");
                conn.detach();
            }
        }
    }

    /// Close the connection without returning it to the pool
    fn discard(&self) {
        if let Ok(mut slot) = self.connection.try_lock() {
            self.depth.store(0, Ordering::SeqCst);
            if let Some(conn) = slot.take() {
                conn.detach();
            }
        }
    }
}

enum ScopeKind {
    Outermost,
    Nested { savepoint: String },
}

/// Rolls back a scope whose future is dropped before it completes
struct ScopeGuard {
    state: Arc<TaskState>,
    ctx: Arc<TransactionContext>,
    kind: ScopeKind,
    /// Tracker this scope attached and must detach on exit
    created_tracker: Option<QueryTracker>,
    armed: bool,
}

impl ScopeGuard {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        if let Some(tracker) = &self.created_tracker {
            self.ctx.detach_tracker(tracker);
        }
        if !self.armed {
            return;
        }

        match &self.kind {
            ScopeKind::Nested { savepoint } => {
                tracing::warn!(db = %self.ctx.db_name, %savepoint, "nested transaction scope cancelled, rollback queued");
                self.ctx
                    .pending
                    .lock()
                    .push(format!("ROLLBACK TO SAVEPOINT {savepoint}"));
                self.ctx.depth.fetch_sub(1, Ordering::SeqCst);
            }
            ScopeKind::Outermost => {
                self.state.remove(&self.ctx);
                match tokio::runtime::Handle::try_current() {
                    Ok(handle) => {
                        tracing::warn!(db = %self.ctx.db_name, "transaction scope cancelled, rollback queued");
                        let ctx = Arc::clone(&self.ctx);
                        handle.spawn(async move { ctx.abort().await });
                    }
                    Err(_) => {
                        tracing::warn!(db = %self.ctx.db_name, "transaction scope dropped outside a runtime, discarding connection");
                        self.ctx.discard();
                    }
                }
            }
        }
    }
}

/// Enter a transaction scope on `db_name` for the calling task
///
/// Opens a new transaction (BEGIN) when the task has none for `db_name`,
/// otherwise nests one level deeper behind a savepoint.
pub(crate) async fn run_scope<F, Fut, T, E>(
    registry: &PoolRegistry,
    config: Option<&ConnectionConfig>,
    db_name: &str,
    track_queries: bool,
    f: F,
) -> std::result::Result<T, E>
where
    F: FnOnce(Arc<TransactionContext>) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: From<DatabaseError>,
{
    with_task_state(|state| async move {
        match state.find(db_name) {
            Some(ctx) => nested_scope(state, ctx, track_queries, f).await,
            None => outermost_scope(registry, config, state, db_name, track_queries, f).await,
        }
    })
    .await
}

async fn outermost_scope<F, Fut, T, E>(
    registry: &PoolRegistry,
    config: Option<&ConnectionConfig>,
    state: Arc<TaskState>,
    db_name: &str,
    track_queries: bool,
    f: F,
) -> std::result::Result<T, E>
where
    F: FnOnce(Arc<TransactionContext>) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: From<DatabaseError>,
{
    let pool = registry.get_or_create_pool(db_name, config)?;
    let conn = pool.acquire().await?;

    // an already-open tracker keeps observing; otherwise open one on request
    let tracker = state
        .current_tracker()
        .or_else(|| track_queries.then(QueryTracker::new));

    // sibling scopes joined in this task must not see this context
    let scoped = Arc::new(state.fork());
    let ctx = Arc::new(TransactionContext::new(db_name, conn, tracker));
    let mut guard = ScopeGuard {
        state: Arc::clone(&scoped),
        ctx: Arc::clone(&ctx),
        kind: ScopeKind::Outermost,
        created_tracker: None,
        armed: true,
    };

    if let Err(e) = ctx.control("BEGIN").await {
        guard.armed = false;
        ctx.discard();
        return Err(e.into());
    }
    scoped.push(Arc::clone(&ctx));

    let result = TASK_STATE
        .scope(Arc::clone(&scoped), async { f(Arc::clone(&ctx)).await })
        .await;

    let result = match result {
        Ok(value) => match ctx.finish("COMMIT").await {
            Ok(()) => Ok(value),
            Err(e) => Err(e.into()),
        },
        Err(err) => {
            if let Err(e) = ctx.finish("ROLLBACK").await {
                tracing::error!(db = %db_name, error = %e, "rollback failed");
            }
            Err(err)
        }
    };

    scoped.remove(&ctx);
    guard.disarm();
    result
}

async fn nested_scope<F, Fut, T, E>(
    state: Arc<TaskState>,
    ctx: Arc<TransactionContext>,
    track_queries: bool,
    f: F,
) -> std::result::Result<T, E>
where
    F: FnOnce(Arc<TransactionContext>) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: From<DatabaseError>,
{
    let depth = ctx.depth.fetch_add(1, Ordering::SeqCst) + 1;
    let savepoint = format!("savepoint_{depth}");

    // first acquisition wins; an inner scope only fills a missing tracker
    let created_tracker = if track_queries && ctx.query_tracker().is_none() {
        let tracker = QueryTracker::new();
        ctx.attach_tracker(tracker.clone());
        Some(tracker)
    } else {
        None
    };

    let mut guard = ScopeGuard {
        state,
        ctx: Arc::clone(&ctx),
        kind: ScopeKind::Nested {
            savepoint: savepoint.clone(),
        },
        created_tracker,
        armed: true,
    };

    if let Err(e) = ctx.control(&format!("SAVEPOINT {savepoint}")).await {
        guard.armed = false;
        ctx.depth.fetch_sub(1, Ordering::SeqCst);
        return Err(e.into());
    }

    let result = f(Arc::clone(&ctx)).await;

    let result = match result {
        Ok(value) => match ctx.control(&format!("RELEASE SAVEPOINT {savepoint}")).await {
            Ok(()) => Ok(value),
            Err(e) => Err(e.into()),
        },
        Err(err) => {
            if let Err(e) = ctx.control(&format!("ROLLBACK TO SAVEPOINT {savepoint}")).await {
                tracing::error!(db = %ctx.db_name, %savepoint, error = %e, "rollback to savepoint failed");
            }
            Err(err)
        }
    };

    ctx.depth.fetch_sub(1, Ordering::SeqCst);
    guard.disarm();
    result
}

/// Attach a tracker for the duration of `f`
///
/// Reuses the tracker already observing this task; otherwise creates one on
/// the innermost active context (or as the ambient tracker) and detaches it
/// when `f` completes.
pub(crate) async fn run_tracked<F, Fut, T>(f: F) -> T
where
    F: FnOnce(QueryTracker) -> Fut,
    Fut: Future<Output = T>,
{
    with_task_state(|state| async move {
        if let Some(tracker) = state.current_tracker() {
            return f(tracker).await;
        }

        let tracker = QueryTracker::new();
        let target = state.innermost();
        match &target {
            Some(ctx) => ctx.attach_tracker(tracker.clone()),
            None => *state.ambient_tracker.lock() = Some(tracker.clone()),
        }
        let _guard = TrackerGuard {
            state: Arc::clone(&state),
            target,
            tracker: tracker.clone(),
        };

        f(tracker).await
    })
    .await
}

struct TrackerGuard {
    state: Arc<TaskState>,
    target: Option<Arc<TransactionContext>>,
    tracker: QueryTracker,
}

impl Drop for TrackerGuard {
    fn drop(&mut self) {
        match &self.target {
            Some(ctx) => ctx.detach_tracker(&self.tracker),
            None => {
                let mut ambient = self.state.ambient_tracker.lock();
                if ambient.as_ref().is_some_and(|t| t.same_as(&self.tracker)) {
                    *ambient = None;
                }
            }
        }
    }
}
