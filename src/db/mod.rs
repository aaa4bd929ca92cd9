//! Database access layer.
//!
//! This module provides:
//! - A driver boundary with sqlx-backed MySQL, PostgreSQL and SQLite connectors
//! - A bounded connection pool with keepalive
//! - Transient-failure classification and capped backoff
//! - A retrying statement executor and transaction coordinator

#[macro_use]
pub mod macros;

pub mod backends;
pub mod backoff;
pub mod classify;
pub mod driver;
pub mod executor;
pub mod params;
pub mod pool;
pub mod transaction;

pub use backends::{MySqlConnector, PgConnector, SqliteConnector};
pub use backoff::Backoff;
pub use classify::{FailureKind, Scope};
pub use driver::{Connector, DriverConnection, PlaceholderStyle, RowOf};
pub use executor::Executor;
pub use pool::{Pool, PoolStats, PooledConnection};
pub use transaction::{TransactionContext, TransactionOptions};
