//! Resilient database access library.
//!
//! A pool-backed executor for MySQL, PostgreSQL and SQLite that retries
//! transient infrastructure failures with bounded backoff and always returns
//! leased connections to the pool.

pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use config::{Config, PoolOptions, RetryOptions};
pub use db::{Executor, Pool};
pub use error::{DbError, DbResult};
