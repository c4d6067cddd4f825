//! Database backend implementations
//!
//! This module contains concrete implementations of the connection and pool
//! traits for supported database systems.

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "postgres")]
pub use postgres::{PostgresConnection, PostgresPool, PostgresPoolFactory};
