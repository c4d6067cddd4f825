//! PostgreSQL database backend implementation
//!
//! Pools come from deadpool-postgres; each checked-out connection is a
//! `deadpool_postgres::Object` wrapped in [`PostgresConnection`]. Every
//! statement runs under the configured operation timeout.

use crate::core::{
    database::{Connection, ConnectionConfig, ConnectionPool, PoolFactory, PoolStatus},
    error::{DatabaseError, Result},
    value::{DatabaseResult, DatabaseRow, DatabaseValue},
};
use async_trait::async_trait;
use bytes::BytesMut;
use chrono::{DateTime, NaiveDateTime, Utc};
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, PoolError, RecyclingMethod, Runtime};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_postgres::types::{IsNull, ToSql, Type};
use tokio_postgres::{NoTls, Row};

/// Builds deadpool-postgres pools from [`ConnectionConfig`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresPoolFactory;

impl PoolFactory for PostgresPoolFactory {
    fn create_pool(&self, name: &str, config: &ConnectionConfig) -> Result<Arc<dyn ConnectionPool>> {
        Ok(Arc::new(PostgresPool::new(name, config)?))
    }
}

/// Connection pool for one named PostgreSQL database
pub struct PostgresPool {
    name: String,
    pool: Pool,
    acquire_timeout: Duration,
    operation_timeout: Duration,
}

impl std::fmt::Debug for PostgresPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresPool")
            .field("name", &self.name)
            .field("status", &self.status())
            .finish()
    }
}

impl PostgresPool {
    /// Create a pool; connections are opened lazily on first acquire
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the connection string cannot be parsed
    pub fn new(name: &str, config: &ConnectionConfig) -> Result<Self> {
        let pg_config: tokio_postgres::Config = config
            .build_connection_string()
            .parse()
            .map_err(|e: tokio_postgres::Error| {
                DatabaseError::configuration(format!("invalid connection string for '{name}': {e}"))
            })?;

        let manager = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );

        let pool = Pool::builder(manager)
            .max_size(config.max_size)
            .wait_timeout(Some(config.acquire_timeout))
            .create_timeout(Some(config.acquire_timeout))
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| DatabaseError::pool(format!("failed to build pool '{name}': {e}")))?;

        Ok(Self {
            name: name.to_string(),
            pool,
            acquire_timeout: config.acquire_timeout,
            operation_timeout: config.operation_timeout,
        })
    }

    fn map_pool_error(&self, err: PoolError) -> DatabaseError {
        match err {
            PoolError::Timeout(_) => {
                DatabaseError::pool_exhausted(&self.name, self.acquire_timeout.as_millis() as u64)
            }
            PoolError::Backend(e) => DatabaseError::PostgresError(e),
            PoolError::Closed => DatabaseError::pool(format!("pool '{}' is closed", self.name)),
            other => DatabaseError::pool(other.to_string()),
        }
    }
}

#[async_trait]
impl ConnectionPool for PostgresPool {
    async fn acquire(&self) -> Result<Box<dyn Connection>> {
        let client = self.pool.get().await.map_err(|e| self.map_pool_error(e))?;
        Ok(Box::new(PostgresConnection {
            client,
            operation_timeout: self.operation_timeout,
        }))
    }

    fn status(&self) -> PoolStatus {
        let status = self.pool.status();
        PoolStatus {
            size: status.size,
            available: status.available,
            waiting: status.waiting,
            max_size: status.max_size,
        }
    }

    fn close(&self) {
        self.pool.close();
    }
}

/// One pooled PostgreSQL connection
pub struct PostgresConnection {
    client: Object,
    operation_timeout: Duration,
}

impl PostgresConnection {
    async fn with_timeout<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, tokio_postgres::Error>>,
    {
        tokio::time::timeout(self.operation_timeout, fut)
            .await
            .map_err(|_| DatabaseError::query_timeout(self.operation_timeout.as_millis() as u64))?
            .map_err(DatabaseError::from)
    }
}

#[async_trait]
impl Connection for PostgresConnection {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> Result<u64> {
        let owned: Vec<Box<dyn ToSql + Sync + Send>> = params.iter().map(value_to_param).collect();
        let refs: Vec<&(dyn ToSql + Sync)> = owned
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();

        self.with_timeout(self.client.execute(sql, &refs)).await
    }

    async fn query(&mut self, sql: &str, params: &[DatabaseValue]) -> Result<DatabaseResult> {
        let owned: Vec<Box<dyn ToSql + Sync + Send>> = params.iter().map(value_to_param).collect();
        let refs: Vec<&(dyn ToSql + Sync)> = owned
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();

        let rows = self.with_timeout(self.client.query(sql, &refs)).await?;
        Ok(rows.iter().map(row_to_database_row).collect())
    }

    async fn batch_execute(&mut self, sql: &str) -> Result<()> {
        self.with_timeout(self.client.batch_execute(sql)).await
    }

    fn detach(self: Box<Self>) {
        let this = *self;
        // closes the socket instead of recycling it
        drop(Object::take(this.client));
    }
}

/// NULL that binds to a parameter of any type
#[derive(Debug)]
struct SqlNull;

impl ToSql for SqlNull {
    fn to_sql(
        &self,
        _ty: &Type,
        _out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        Ok(IsNull::Yes)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    tokio_postgres::types::to_sql_checked!();
}

fn value_to_param(value: &DatabaseValue) -> Box<dyn ToSql + Sync + Send> {
    match value {
        DatabaseValue::Null => Box::new(SqlNull),
        DatabaseValue::Bool(v) => Box::new(*v),
        DatabaseValue::Int(v) => Box::new(*v),
        DatabaseValue::Long(v) => Box::new(*v),
        DatabaseValue::Float(v) => Box::new(*v),
        DatabaseValue::Double(v) => Box::new(*v),
        DatabaseValue::String(v) => Box::new(v.clone()),
        DatabaseValue::Bytes(v) => Box::new(v.clone()),
        DatabaseValue::Timestamp(v) => match value.as_datetime() {
            Some(dt) => Box::new(dt),
            None => Box::new(*v),
        },
    }
}

fn row_to_database_row(row: &Row) -> DatabaseRow {
    let mut db_row = DatabaseRow::new();

    for (idx, column) in row.columns().iter().enumerate() {
        let value = match *column.type_() {
            Type::BOOL => get_value(row, idx, DatabaseValue::Bool),
            Type::INT2 => get_value(row, idx, |v: i16| DatabaseValue::Int(i32::from(v))),
            Type::INT4 => get_value(row, idx, DatabaseValue::Int),
            Type::INT8 => get_value(row, idx, DatabaseValue::Long),
            Type::FLOAT4 => get_value(row, idx, DatabaseValue::Float),
            Type::FLOAT8 => get_value(row, idx, DatabaseValue::Double),
            Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => {
                get_value(row, idx, DatabaseValue::String)
            }
            Type::BYTEA => get_value(row, idx, DatabaseValue::Bytes),
            Type::TIMESTAMP => get_value(row, idx, |v: NaiveDateTime| {
                DatabaseValue::Timestamp(v.and_utc().timestamp_micros())
            }),
            Type::TIMESTAMPTZ => get_value(row, idx, |v: DateTime<Utc>| {
                DatabaseValue::Timestamp(v.timestamp_micros())
            }),
            // unknown types come back as text when the driver allows it
            _ => get_value(row, idx, DatabaseValue::String),
        };
        db_row.insert(column.name().to_string(), value);
    }

    db_row
}

fn get_value<'a, T, F>(row: &'a Row, idx: usize, f: F) -> DatabaseValue
where
    T: tokio_postgres::types::FromSql<'a>,
    F: FnOnce(T) -> DatabaseValue,
{
    match row.try_get::<_, Option<T>>(idx) {
        Ok(Some(v)) => f(v),
        Ok(None) | Err(_) => DatabaseValue::Null,
    }
}
