//! # Rust Query Context
//!
//! A fluent, immutable SQL SELECT builder paired with task-local, savepoint-nested
//! transaction contexts for PostgreSQL.
//!
//! ## Features
//!
//! - **Parameterized Queries**: values are bound to `$n` placeholders, never interpolated
//! - **Immutable Builders**: every call returns a new builder, so queries branch safely
//! - **Grouped Conditions**: `where_group` / `or_where_group` nest to any depth
//! - **Nested Transactions**: inner scopes run behind savepoints
//! - **Task Isolation**: transaction state lives in a tokio task-local
//! - **Query Tracking**: opt-in audit log of every statement a transaction executes
//! - **Connection Pooling**: named deadpool-postgres pools created on first use
//!
//! ## Quick Start
//!
//! Add this to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! rust_query_context = "0.1"
//! tokio = { version = "1", features = ["full"] }
//! ```
//!
//! ### Building Queries
//!
//! ```rust
//! use rust_query_context::prelude::*;
//!
//! let (sql, params) = QueryBuilder::new("posts")
//!     .select(["category", "COUNT(*) AS total"])
//!     .where_eq("user_id", 1)
//!     .where_group(|g| g.where_eq("status", "published").or_where_eq("status", "draft"))
//!     .group_by(["category"])
//!     .having("total", ">", 5)
//!     .order_by_desc("total")
//!     .paginate(1, 20)
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(
//!     sql,
//!     "SELECT category, COUNT(*) AS total FROM posts \
//!      WHERE user_id = $1 AND (status = $2 OR status = $3) \
//!      GROUP BY category HAVING total > $4 ORDER BY total DESC LIMIT 20 OFFSET 0"
//! );
//! assert_eq!(params.len(), 4);
//! ```
//!
//! ### Working with Transactions
//!
//! ```rust,no_run
//! use rust_query_context::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let registry = Arc::new(PoolRegistry::with_factory(Arc::new(PostgresPoolFactory)));
//!     let manager = DatabaseManager::new(registry);
//!     manager.configure("main", ConnectionConfig::from_env("POSTGRES_URL")?);
//!
//!     manager
//!         .transaction("main", true, |tx| async move {
//!             tx.execute("UPDATE accounts SET balance = balance - $1 WHERE id = $2",
//!                        &[100.into(), 1.into()]).await?;
//!             tx.execute("UPDATE accounts SET balance = balance + $1 WHERE id = $2",
//!                        &[100.into(), 2.into()]).await?;
//!
//!             if let Some(tracker) = tx.query_tracker() {
//!                 println!("{}", tracker.to_dict());
//!             }
//!             Ok::<_, DatabaseError>(())
//!         })
//!         .await
//! }
//! ```
//!
//! ## Project Structure
//!
//! ```text
//! rust_query_context/
//! ├── src/
//! │   ├── core/                # Core types and traits
//! │   │   ├── condition.rs     # Condition tree and shared where-methods
//! │   │   ├── query_builder.rs # SELECT builder
//! │   │   ├── database.rs      # Connection / pool traits, ConnectionConfig
//! │   │   ├── registry.rs      # Named pool registry
//! │   │   ├── transaction.rs   # Task-local transaction contexts
//! │   │   ├── manager.rs       # DatabaseManager, transactional()
//! │   │   ├── tracker.rs       # Query tracking
//! │   │   ├── error.rs         # Error types
//! │   │   ├── value.rs         # Value types
//! │   │   └── mod.rs
//! │   ├── backends/            # Database backend implementations
//! │   │   ├── postgres.rs      # deadpool-postgres backend
//! │   │   └── mod.rs
//! │   └── lib.rs
//! ├── demos/                   # Example programs
//! ├── tests/                   # Integration and property tests
//! ├── benches/                 # Criterion benchmarks
//! └── Cargo.toml
//! ```

/// Core query building and transaction types
pub mod core;

/// Database backend implementations
pub mod backends;

/// Prelude for convenient imports
///
/// ```rust
/// use rust_query_context::prelude::*;
///
/// let sql = QueryBuilder::new("users").where_null("deleted_at").to_sql().unwrap();
/// assert_eq!(sql, "SELECT * FROM users WHERE deleted_at IS NULL");
/// ```
pub mod prelude {
    pub use crate::core::{
        transactional, ConditionBuilder, ConnectionConfig, ConnectionPool, DatabaseError,
        DatabaseManager, DatabaseResult, DatabaseRow, DatabaseValue, OrderDirection, PoolRegistry,
        QueryBuilder, QueryTracker, Result, TransactionContext, WhereClause,
    };

    #[cfg(feature = "postgres")]
    pub use crate::backends::PostgresPoolFactory;
}

// Re-export at root level for convenience
pub use core::{
    transactional, ConditionBuilder, ConnectionConfig, DatabaseError, DatabaseManager,
    DatabaseResult, DatabaseRow, DatabaseValue, PoolRegistry, QueryBuilder, QueryTracker, Result,
    TransactionContext, WhereClause,
};

#[cfg(feature = "postgres")]
pub use backends::PostgresPoolFactory;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prelude_imports() {
        use prelude::*;

        let builder = QueryBuilder::new("users").where_eq("id", 1);
        assert!(builder.has_conditions());
        assert_eq!(builder.table(), "users");
    }

    #[test]
    fn test_value_conversions() {
        use prelude::*;

        let val: DatabaseValue = 42.into();
        assert_eq!(val.as_long(), Some(42));

        let val: DatabaseValue = "test".into();
        assert_eq!(val.as_string(), "test");

        let val: DatabaseValue = true.into();
        assert_eq!(val.as_bool(), Some(true));
    }
}
