//! In-memory recording pool shared by the integration tests
//!
//! Simulates transaction semantics closely enough to check what the
//! transaction layer sends: BEGIN / SAVEPOINT / RELEASE / ROLLBACK TO /
//! COMMIT / ROLLBACK are applied to a per-connection write log, and committed
//! writes become visible in [`MockDatabase::committed`]. Any statement whose
//! text contains `FAIL` errors. [`MockDatabase::stall_after`] makes one
//! control statement hang after the server has applied it.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_query_context::core::{
    Connection, ConnectionConfig, ConnectionPool, DatabaseError, DatabaseResult, DatabaseRow,
    DatabaseValue, PoolFactory, PoolStatus, Result,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Shared {
    journal: Vec<(usize, String)>,
    committed: Vec<String>,
    open: usize,
    released: usize,
    released_in_transaction: usize,
    detached: usize,
    stall_after: Option<String>,
}

/// Handle to one simulated database
#[derive(Clone, Default)]
pub struct MockDatabase {
    shared: Arc<Mutex<Shared>>,
    next_id: Arc<AtomicUsize>,
}

impl MockDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pool(&self) -> Arc<dyn ConnectionPool> {
        Arc::new(MockPool { db: self.clone() })
    }

    /// Every statement in execution order
    pub fn statements(&self) -> Vec<String> {
        self.shared.lock().journal.iter().map(|(_, s)| s.clone()).collect()
    }

    /// Statements sent over one connection
    pub fn statements_on(&self, conn_id: usize) -> Vec<String> {
        self.shared
            .lock()
            .journal
            .iter()
            .filter(|(id, _)| *id == conn_id)
            .map(|(_, s)| s.clone())
            .collect()
    }

    /// Connection ids in first-use order
    pub fn connection_ids(&self) -> Vec<usize> {
        let mut ids = Vec::new();
        for (id, _) in &self.shared.lock().journal {
            if !ids.contains(id) {
                ids.push(*id);
            }
        }
        ids
    }

    /// Values written by committed transactions
    pub fn committed(&self) -> Vec<String> {
        self.shared.lock().committed.clone()
    }

    pub fn open_connections(&self) -> usize {
        self.shared.lock().open
    }

    pub fn released(&self) -> usize {
        self.shared.lock().released
    }

    /// Connections returned to the pool with a transaction still open
    pub fn released_in_transaction(&self) -> usize {
        self.shared.lock().released_in_transaction
    }

    pub fn detached(&self) -> usize {
        self.shared.lock().detached
    }

    /// Never complete `statement` once it has been applied
    pub fn stall_after(&self, statement: &str) {
        self.shared.lock().stall_after = Some(statement.to_string());
    }
}

struct MockPool {
    db: MockDatabase,
}

#[async_trait]
impl ConnectionPool for MockPool {
    async fn acquire(&self) -> Result<Box<dyn Connection>> {
        tokio::task::yield_now().await;
        let id = self.db.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.db.shared.lock().open += 1;
        Ok(Box::new(MockConnection {
            id,
            db: self.db.clone(),
            tx: None,
            detached: false,
        }))
    }

    fn status(&self) -> PoolStatus {
        let open = self.db.open_connections();
        PoolStatus {
            size: open,
            available: 0,
            waiting: 0,
            max_size: usize::MAX,
        }
    }

    fn close(&self) {}
}

/// Creates [`MockDatabase`] pools and remembers them by name
#[derive(Default)]
pub struct MockFactory {
    pub databases: Mutex<Vec<(String, MockDatabase)>>,
}

impl PoolFactory for MockFactory {
    fn create_pool(&self, name: &str, _config: &ConnectionConfig) -> Result<Arc<dyn ConnectionPool>> {
        let db = MockDatabase::new();
        self.databases.lock().push((name.to_string(), db.clone()));
        Ok(db.pool())
    }
}

#[derive(Debug, Default)]
struct Tx {
    writes: Vec<String>,
    savepoints: Vec<(String, usize)>,
}

struct MockConnection {
    id: usize,
    db: MockDatabase,
    tx: Option<Tx>,
    detached: bool,
}

impl MockConnection {
    fn log(&self, sql: &str) {
        self.db.shared.lock().journal.push((self.id, sql.to_string()));
    }

    fn tx_mut(&mut self, sql: &str) -> Result<&mut Tx> {
        self.tx
            .as_mut()
            .ok_or_else(|| DatabaseError::query(format!("{sql}: no transaction in progress")))
    }

    fn savepoint_index(tx: &Tx, name: &str) -> Result<usize> {
        tx.savepoints
            .iter()
            .rposition(|(n, _)| n == name)
            .ok_or_else(|| DatabaseError::query(format!("savepoint \"{name}\" does not exist")))
    }

    fn apply_control(&mut self, sql: &str) -> Result<()> {
        let words: Vec<&str> = sql.split_whitespace().collect();
        match words.as_slice() {
            ["BEGIN"] => {
                if self.tx.is_some() {
                    return Err(DatabaseError::query("transaction already in progress"));
                }
                self.tx = Some(Tx::default());
            }
            ["SAVEPOINT", name] => {
                let tx = self.tx_mut(sql)?;
                let mark = tx.writes.len();
                tx.savepoints.push((name.to_string(), mark));
            }
            ["RELEASE", "SAVEPOINT", name] => {
                let tx = self.tx_mut(sql)?;
                let idx = Self::savepoint_index(tx, name)?;
                tx.savepoints.truncate(idx);
            }
            ["ROLLBACK", "TO", "SAVEPOINT", name] => {
                let tx = self.tx_mut(sql)?;
                let idx = Self::savepoint_index(tx, name)?;
                let mark = tx.savepoints[idx].1;
                tx.writes.truncate(mark);
                tx.savepoints.truncate(idx + 1);
            }
            ["COMMIT"] => {
                if let Some(tx) = self.tx.take() {
                    self.db.shared.lock().committed.extend(tx.writes);
                }
            }
            ["ROLLBACK"] => {
                self.tx = None;
            }
            _ => {
                return Err(DatabaseError::query(format!("unsupported statement: {sql}")));
            }
        }
        Ok(())
    }

    fn visible_rows(&self) -> DatabaseResult {
        let committed = self.db.committed();
        let own = self.tx.iter().flat_map(|tx| tx.writes.iter().cloned());
        committed
            .into_iter()
            .chain(own)
            .map(|value| {
                let mut row = DatabaseRow::new();
                row.insert("value".to_string(), DatabaseValue::String(value));
                row
            })
            .collect()
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> Result<u64> {
        tokio::task::yield_now().await;
        self.log(sql);
        if sql.contains("FAIL") {
            return Err(DatabaseError::query(format!("simulated failure: {sql}")));
        }
        if sql.trim_start().to_ascii_uppercase().starts_with("INSERT") {
            let value = params
                .first()
                .map(DatabaseValue::as_string)
                .unwrap_or_else(|| sql.to_string());
            match self.tx.as_mut() {
                Some(tx) => tx.writes.push(value),
                // autocommit
                None => self.db.shared.lock().committed.push(value),
            }
            return Ok(1);
        }
        Ok(0)
    }

    async fn query(&mut self, sql: &str, _params: &[DatabaseValue]) -> Result<DatabaseResult> {
        tokio::task::yield_now().await;
        self.log(sql);
        if sql.contains("FAIL") {
            return Err(DatabaseError::query(format!("simulated failure: {sql}")));
        }
        Ok(self.visible_rows())
    }

    async fn batch_execute(&mut self, sql: &str) -> Result<()> {
        tokio::task::yield_now().await;
        self.log(sql);
        self.apply_control(sql)?;
        let stall = self.db.shared.lock().stall_after.as_deref() == Some(sql);
        if stall {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    fn detach(mut self: Box<Self>) {
        self.detached = true;
        self.db.shared.lock().detached += 1;
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        let mut shared = self.db.shared.lock();
        shared.open -= 1;
        if !self.detached {
            shared.released += 1;
            if self.tx.is_some() {
                shared.released_in_transaction += 1;
            }
        }
    }
}
