//! Core query building and transaction types
//!
//! This module provides the building blocks of the crate: the condition tree
//! and SELECT builder, the connection/pool seams, the pool registry, and the
//! task-local transaction contexts with their query trackers.

pub mod condition;
pub mod database;
pub mod error;
pub mod manager;
pub mod query_builder;
pub mod registry;
pub mod tracker;
pub mod transaction;
pub mod value;

// Re-export commonly used types
pub use condition::{Condition, ConditionBuilder, ConditionNode, Connector, Operator, WhereClause};
pub use database::{Connection, ConnectionConfig, ConnectionPool, PoolFactory, PoolStatus};
pub use error::{DatabaseError, Result};
pub use manager::{transactional, DatabaseManager, TransactionalFuture};
pub use query_builder::{OrderDirection, QueryBuilder, SelectField};
pub use registry::PoolRegistry;
pub use tracker::{QueryLog, QueryTracker};
pub use transaction::TransactionContext;
pub use value::{DatabaseResult, DatabaseRow, DatabaseValue};
