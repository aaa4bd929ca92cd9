//! Data models shared by the pool, executor and binary.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod query;

// Re-export commonly used types
pub use connection::{DatabaseType, mask_connection_string};
pub use query::{QueryParam, WriteResult};
