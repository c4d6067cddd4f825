//! Named connection pool registry
//!
//! The registry is an explicit object owned by the application's composition
//! root and handed to [`DatabaseManager`](super::manager::DatabaseManager).
//! Lookups take a shared read lock; creation takes the write lock and
//! re-checks, so concurrent first access creates at most one pool per name.

use super::database::{ConnectionConfig, ConnectionPool, PoolFactory};
use super::error::{DatabaseError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Process-wide map from database name to pool
pub struct PoolRegistry {
    pools: RwLock<HashMap<String, Arc<dyn ConnectionPool>>>,
    factory: Option<Arc<dyn PoolFactory>>,
}

impl std::fmt::Debug for PoolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolRegistry")
            .field("pools", &self.names())
            .field("has_factory", &self.factory.is_some())
            .finish()
    }
}

impl Default for PoolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolRegistry {
    /// Registry that only serves explicitly registered pools
    pub fn new() -> Self {
        Self {
            pools: RwLock::new(HashMap::new()),
            factory: None,
        }
    }

    /// Registry that can create pools on demand
    pub fn with_factory(factory: Arc<dyn PoolFactory>) -> Self {
        Self {
            pools: RwLock::new(HashMap::new()),
            factory: Some(factory),
        }
    }

    /// Register a pool under `name`, replacing any previous one
    pub fn register_pool(&self, name: impl Into<String>, pool: Arc<dyn ConnectionPool>) {
        let name = name.into();
        tracing::info!(db = %name, "registered connection pool");
        if let Some(previous) = self.pools.write().insert(name, pool) {
            previous.close();
        }
    }

    /// Look up a registered pool
    pub fn get_pool(&self, name: &str) -> Result<Arc<dyn ConnectionPool>> {
        self.pools
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| DatabaseError::pool_not_found(name))
    }

    /// Return the pool for `name`, creating it from `config` if needed
    ///
    /// # Errors
    ///
    /// `PoolNotFound` when the pool is missing and no config was supplied;
    /// a configuration error when there is no factory to build it with.
    pub fn get_or_create_pool(
        &self,
        name: &str,
        config: Option<&ConnectionConfig>,
    ) -> Result<Arc<dyn ConnectionPool>> {
        if let Some(pool) = self.pools.read().get(name) {
            return Ok(Arc::clone(pool));
        }

        let Some(config) = config else {
            return Err(DatabaseError::pool_not_found(name));
        };
        let Some(factory) = &self.factory else {
            return Err(DatabaseError::configuration(format!(
                "no pool factory configured to create pool '{name}'"
            )));
        };

        let mut pools = self.pools.write();
        if let Some(pool) = pools.get(name) {
            return Ok(Arc::clone(pool));
        }

        config.validate()?;
        let pool = factory.create_pool(name, config)?;
        tracing::info!(db = %name, max_size = config.max_size, "created connection pool");
        pools.insert(name.to_string(), Arc::clone(&pool));
        Ok(pool)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.pools.read().contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pools.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Unregister and close a pool
    pub fn remove(&self, name: &str) -> Option<Arc<dyn ConnectionPool>> {
        let pool = self.pools.write().remove(name)?;
        pool.close();
        Some(pool)
    }

    /// Close and drop every pool
    pub fn close_all(&self) {
        let pools: Vec<(String, Arc<dyn ConnectionPool>)> = self.pools.write().drain().collect();
        for (name, pool) in pools {
            tracing::info!(db = %name, "closing connection pool");
            pool.close();
        }
    }
}
