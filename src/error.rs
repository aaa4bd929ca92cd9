//! Error types for the database access layer.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Every variant maps onto a [`FailureKind`] so the retry machinery can decide
//! eligibility without inspecting messages.

use crate::db::classify::{FailureKind, Scope};
use thiserror::Error;

/// Which public entry point produced an [`DbError::Operation`] error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Query,
    Execute,
    Transaction,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Query => write!(f, "query"),
            Self::Execute => write!(f, "execute"),
            Self::Transaction => write!(f, "transaction"),
        }
    }
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Pool exhausted: {waiting} callers already queued (limit {limit})")]
    PoolExhausted { waiting: usize, limit: usize },

    #[error("Timeout: no connection available within {elapsed_ms}ms")]
    ConnectTimeout { elapsed_ms: u64 },

    #[error("Connection pool is closed")]
    PoolClosed,

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Database error: {message}")]
    Database {
        kind: FailureKind,
        message: String,
        /// Server error number or SQLSTATE, e.g. "1213" or "40P01"
        code: Option<String>,
    },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Transaction work failed: {source}")]
    Work {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("{operation} failed after {attempts} attempt(s): {source}")]
    Operation {
        operation: Operation,
        /// None for transactions, which run caller-supplied work.
        statement: Option<String>,
        attempts: u32,
        #[source]
        source: Box<DbError>,
    },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error of a known kind.
    pub fn database(kind: FailureKind, message: impl Into<String>, code: Option<String>) -> Self {
        Self::Database {
            kind,
            message: message.into(),
            code,
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Wrap an application error raised inside transaction work.
    ///
    /// Work errors are never retried.
    pub fn work(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Work {
            source: source.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub(crate) fn with_context(
        self,
        operation: Operation,
        statement: Option<&str>,
        attempts: u32,
    ) -> Self {
        Self::Operation {
            operation,
            statement: statement.map(String::from),
            attempts,
            source: Box::new(self),
        }
    }

    /// The failure kind, looking through [`DbError::Operation`] wrappers.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::PoolExhausted { .. } => FailureKind::PoolExhausted,
            Self::ConnectTimeout { .. } => FailureKind::PoolTimeout,
            Self::PoolClosed => FailureKind::PoolClosed,
            Self::Connection { .. } => FailureKind::Unknown,
            Self::Database { kind, .. } => *kind,
            Self::InvalidInput { .. } => FailureKind::InvalidInput,
            Self::Work { .. } => FailureKind::Work,
            Self::Operation { source, .. } => source.kind(),
            Self::Internal { .. } => FailureKind::Unknown,
        }
    }

    /// Number of attempts spent before this error surfaced, if known.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::Operation { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::PoolExhausted { .. } | Self::ConnectTimeout { .. } => {
                Some("Raise max_connections or retry at a higher level")
            }
            Self::Operation { source, .. } => source.suggestion(),
            _ => None,
        }
    }

    /// Check if this error is retryable within the given scope.
    pub fn is_retryable(&self, scope: Scope) -> bool {
        self.kind().is_transient(scope)
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        let kind = FailureKind::from_sqlx(&err);
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = crate::db::classify::server_code(db_err.as_ref());
                DbError::database(kind, db_err.message(), code)
            }
            sqlx::Error::PoolTimedOut => DbError::ConnectTimeout { elapsed_ms: 0 },
            sqlx::Error::PoolClosed => DbError::PoolClosed,
            sqlx::Error::Io(io_err) => DbError::database(kind, format!("I/O error: {io_err}"), None),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {tls_err}"),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => {
                DbError::database(kind, format!("Protocol error: {msg}"), None)
            }
            other => DbError::database(kind, other.to_string(), None),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
