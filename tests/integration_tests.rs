//! Integration tests for the public builder and pool APIs
//!
//! These tests verify complete queries as a caller composes them:
//! - Reporting queries with aliases, grouping and HAVING
//! - Grouped and nested conditions
//! - Error reporting for invalid builder input
//! - Connection descriptors and the pool registry

use rust_query_context::core::{
    Connection, ConnectionPool, Operator, PoolFactory, PoolStatus, SelectField,
};
use rust_query_context::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};

// ============================================================================
// Query Composition
// ============================================================================

#[test]
fn test_reporting_query() {
    let (sql, params) = QueryBuilder::new("orders")
        .schema("sales")
        .select([
            SelectField::new("customer_id"),
            SelectField::aliased("SUM(amount)", "revenue"),
            SelectField::parse("COUNT(*) AS orders"),
        ])
        .where_ge("created_at", "2024-01-01")
        .where_in("status", ["paid", "shipped"])
        .group_by(["customer_id"])
        .having("revenue", ">=", 1000)
        .or_having("orders", ">", 10)
        .order_by_desc("revenue")
        .order_by("customer_id")
        .limit(50)
        .build()
        .unwrap();

    assert_eq!(
        sql,
        "SELECT customer_id, SUM(amount) AS revenue, COUNT(*) AS orders FROM sales.orders \
         WHERE created_at >= $1 AND status IN ($2, $3) \
         GROUP BY customer_id HAVING revenue >= $4 OR orders > $5 \
         ORDER BY revenue DESC, customer_id ASC LIMIT 50"
    );
    assert_eq!(
        params,
        vec![
            DatabaseValue::from("2024-01-01"),
            DatabaseValue::from("paid"),
            DatabaseValue::from("shipped"),
            DatabaseValue::from(1000),
            DatabaseValue::from(10),
        ]
    );
}

#[test]
fn test_alias_resolution_in_having() {
    let (sql, params) = QueryBuilder::new("posts")
        .select([("COUNT(*)", "total")])
        .group_by(["category"])
        .having("total", ">", 5)
        .build()
        .unwrap();

    assert!(sql.ends_with("GROUP BY category HAVING total > $1"));
    assert!(!sql.contains("HAVING COUNT(*)"));
    assert_eq!(params, vec![DatabaseValue::from(5)]);
}

#[test]
fn test_nested_groups() {
    let (sql, params) = QueryBuilder::new("users")
        .where_eq("active", true)
        .where_group(|g| {
            g.where_eq("role", "admin").or_where_group(|inner| {
                inner
                    .where_eq("role", "editor")
                    .where_cmp("karma", Operator::Gt, 100)
            })
        })
        .build()
        .unwrap();

    assert_eq!(
        sql,
        "SELECT * FROM users WHERE active = $1 AND (role = $2 OR (role = $3 AND karma > $4))"
    );
    assert_eq!(params.len(), 4);
    assert_eq!(params[3], DatabaseValue::from(100));
}

#[test]
fn test_empty_group_elision() {
    let with_group = QueryBuilder::new("users")
        .where_eq("a", 1)
        .where_group(|g| g)
        .or_where_group(|g| g)
        .where_eq("b", 2)
        .to_sql()
        .unwrap();
    let without = QueryBuilder::new("users")
        .where_eq("a", 1)
        .where_eq("b", 2)
        .to_sql()
        .unwrap();

    assert_eq!(with_group, without);
    assert!(!with_group.contains("()"));
}

#[test]
fn test_where_all_appends_in_order() {
    let (sql, params) = QueryBuilder::new("products")
        .where_all(&[("price", ">=", 10), ("price", "<", 100)])
        .or_where_all(&[("stock", "=", 0)])
        .build()
        .unwrap();

    assert_eq!(
        sql,
        "SELECT * FROM products WHERE price >= $1 AND price < $2 OR stock = $3"
    );
    assert_eq!(
        params,
        vec![DatabaseValue::from(10), DatabaseValue::from(100), DatabaseValue::from(0)]
    );
}

#[test]
fn test_only_empty_group_has_no_where_clause() {
    let sql = QueryBuilder::new("users").where_group(|g| g).to_sql().unwrap();
    assert_eq!(sql, "SELECT * FROM users");
}

#[test]
fn test_empty_in_lists() {
    let (sql, params) = QueryBuilder::new("users")
        .where_in("id", Vec::<i64>::new())
        .or_where_not_in("id", Vec::<i64>::new())
        .build()
        .unwrap();

    assert_eq!(sql, "SELECT * FROM users WHERE 1 = 0 OR 1 = 1");
    assert!(params.is_empty());
}

#[test]
fn test_null_comparisons() {
    let sql = QueryBuilder::new("users")
        .where_eq("deleted_at", DatabaseValue::Null)
        .where_ne("banned_at", DatabaseValue::Null)
        .to_sql()
        .unwrap();

    assert_eq!(
        sql,
        "SELECT * FROM users WHERE deleted_at IS NULL AND banned_at IS NOT NULL"
    );
}

#[test]
fn test_to_sql_never_inlines_values() {
    let builder = QueryBuilder::new("users").where_eq("name", "Robert'); DROP TABLE users;--");
    let sql = builder.to_sql().unwrap();

    assert_eq!(sql, "SELECT * FROM users WHERE name = $1");
    assert!(builder.to_string().contains("Params: ["));
}

#[test]
fn test_condition_builder_standalone() {
    let (sql, params) = ConditionBuilder::new()
        .where_eq("a", 1)
        .or_where_op("b", "ilike", "x%")
        .build()
        .unwrap();

    assert_eq!(sql, "a = $1 OR b ILIKE $2");
    assert_eq!(params.len(), 2);
}

// ============================================================================
// Builder Errors
// ============================================================================

#[test]
fn test_pagination_errors() {
    let page = QueryBuilder::new("t").paginate(2, 10);
    assert_eq!(page.offset_value(), Some(10));
    assert_eq!(page.limit_value(), Some(10));

    let err = assert_err!(QueryBuilder::new("t").paginate(0, 10).build());
    assert!(err.is_configuration());
    let err = assert_err!(QueryBuilder::new("t").paginate(1, 0).build());
    assert!(err.is_configuration());
}

#[test]
fn test_unsupported_operator() {
    let err = QueryBuilder::new("t")
        .where_op("a", "<=>", 1)
        .build()
        .unwrap_err();

    assert!(err.is_configuration());
    assert!(err.to_string().contains("<=>"));
}

#[test]
fn test_first_error_wins() {
    let err = QueryBuilder::new("t")
        .limit(-1)
        .where_op("a", "===", 1)
        .build()
        .unwrap_err();

    assert!(err.is_configuration());
    assert!(!err.to_string().contains("==="));
}

#[test]
fn test_having_without_group_by() {
    let builder = QueryBuilder::new("t")
        .select([("COUNT(*)", "total")])
        .having("total", ">", 1);

    assert!(builder.build().unwrap_err().is_configuration());

    let (sql, _) = assert_ok!(builder.allow_having_without_group_by().build());
    assert_eq!(sql, "SELECT COUNT(*) AS total FROM t HAVING total > $1");
}

#[test]
fn test_having_unresolvable_reference() {
    let err = QueryBuilder::new("t")
        .group_by(["category"])
        .having("total; DROP", ">", 1)
        .build()
        .unwrap_err();

    assert!(err.is_build());
}

// ============================================================================
// Connection Descriptors and Registry
// ============================================================================

#[test]
fn test_connection_config_from_parts() {
    let config = ConnectionConfig::new()
        .host("db.internal")
        .port(5432)
        .database("app")
        .username("svc")
        .password("secret")
        .option("sslmode", "require");

    assert!(config.validate().is_ok());
    assert_eq!(
        config.build_connection_string(),
        "host=db.internal port=5432 dbname=app user=svc password=secret sslmode=require"
    );
    assert!(!format!("{config:?}").contains("secret"));
}

#[test]
fn test_connection_config_requires_target() {
    let err = ConnectionConfig::new().validate().unwrap_err();
    assert!(err.is_configuration());
}

struct IdlePool;

#[async_trait::async_trait]
impl ConnectionPool for IdlePool {
    async fn acquire(&self) -> Result<Box<dyn Connection>> {
        Err(DatabaseError::pool("idle pool has no connections"))
    }

    fn status(&self) -> PoolStatus {
        PoolStatus {
            size: 0,
            available: 0,
            waiting: 0,
            max_size: 1,
        }
    }

    fn close(&self) {}
}

#[derive(Default)]
struct CountingFactory {
    created: AtomicUsize,
}

impl PoolFactory for CountingFactory {
    fn create_pool(&self, _name: &str, _config: &ConnectionConfig) -> Result<Arc<dyn ConnectionPool>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(IdlePool))
    }
}

#[tokio::test]
async fn test_registry_creates_one_pool_under_concurrent_first_use() {
    let factory = Arc::new(CountingFactory::default());
    let registry = Arc::new(PoolRegistry::with_factory(factory.clone()));
    let config = ConnectionConfig::from_url("postgres://localhost/app");

    let mut handles = Vec::new();
    for _ in 0..16 {
        let registry = Arc::clone(&registry);
        let config = config.clone();
        handles.push(tokio::spawn(async move {
            registry.get_or_create_pool("app", Some(&config)).map(|_| ())
        }));
    }
    for handle in handles {
        assert_ok!(handle.await.unwrap());
    }

    assert_eq!(factory.created.load(Ordering::SeqCst), 1);
    assert_eq!(registry.names(), vec!["app".to_string()]);
}

#[tokio::test]
async fn test_acquisition_failure_surfaces_from_transaction() {
    let registry = Arc::new(PoolRegistry::new());
    registry.register_pool("idle", Arc::new(IdlePool));
    let manager = DatabaseManager::new(registry);

    let result: Result<()> = manager
        .transaction("idle", false, |_tx| async { Ok(()) })
        .await;

    assert!(result.unwrap_err().is_pool());
}
