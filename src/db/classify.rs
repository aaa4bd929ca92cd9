//! Transient-failure classification.
//!
//! Driver errors are reduced to a closed [`FailureKind`] at the adaptation
//! boundary. Retry eligibility is then a pure function of the kind and the
//! [`Scope`] of the work being retried.

use sqlx::error::{DatabaseError, ErrorKind as SqlxErrorKind};
use sqlx::mysql::MySqlDatabaseError;
use sqlx::postgres::PgDatabaseError;
use std::io::ErrorKind as IoErrorKind;

/// What went wrong, as far as retry decisions are concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    ConnectionReset,
    /// Server went away or the stream ended mid-protocol
    ConnectionLost,
    Timeout,
    BrokenPipe,
    ProtocolDesync,
    /// Server refused the session, e.g. MySQL 1040 "Too many connections"
    ServerConnectionLimit,
    Deadlock,
    LockWaitTimeout,
    Syntax,
    ConstraintViolation,
    Permission,
    TypeMismatch,
    PoolExhausted,
    PoolTimeout,
    PoolClosed,
    InvalidInput,
    /// Error raised by caller-supplied transaction work
    Work,
    Unknown,
}

/// Granularity of the unit being retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// A single autocommit statement.
    Statement,
    /// A whole transaction, re-run from `BEGIN`.
    Transaction,
}

impl FailureKind {
    /// Whether a failure of this kind is worth retrying in `scope`.
    ///
    /// Lock conflicts only clear when the whole transaction is replayed, so
    /// they are transient for [`Scope::Transaction`] alone. Unknown kinds
    /// are never retried.
    pub fn is_transient(self, scope: Scope) -> bool {
        match self {
            Self::ConnectionReset
            | Self::ConnectionLost
            | Self::Timeout
            | Self::BrokenPipe
            | Self::ProtocolDesync
            | Self::ServerConnectionLimit => true,
            Self::Deadlock | Self::LockWaitTimeout => scope == Scope::Transaction,
            Self::Syntax
            | Self::ConstraintViolation
            | Self::Permission
            | Self::TypeMismatch
            | Self::PoolExhausted
            | Self::PoolTimeout
            | Self::PoolClosed
            | Self::InvalidInput
            | Self::Work
            | Self::Unknown => false,
        }
    }

    /// Whether the physical session is unusable after this failure.
    pub fn breaks_connection(self) -> bool {
        matches!(
            self,
            Self::ConnectionReset
                | Self::ConnectionLost
                | Self::Timeout
                | Self::BrokenPipe
                | Self::ProtocolDesync
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionReset => "connection_reset",
            Self::ConnectionLost => "connection_lost",
            Self::Timeout => "timeout",
            Self::BrokenPipe => "broken_pipe",
            Self::ProtocolDesync => "protocol_desync",
            Self::ServerConnectionLimit => "server_connection_limit",
            Self::Deadlock => "deadlock",
            Self::LockWaitTimeout => "lock_wait_timeout",
            Self::Syntax => "syntax",
            Self::ConstraintViolation => "constraint_violation",
            Self::Permission => "permission",
            Self::TypeMismatch => "type_mismatch",
            Self::PoolExhausted => "pool_exhausted",
            Self::PoolTimeout => "pool_timeout",
            Self::PoolClosed => "pool_closed",
            Self::InvalidInput => "invalid_input",
            Self::Work => "work",
            Self::Unknown => "unknown",
        }
    }

    /// Classify an error returned by sqlx.
    pub fn from_sqlx(err: &sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(io_err) => Self::from_io(io_err.kind()),
            sqlx::Error::Protocol(_) => Self::ProtocolDesync,
            sqlx::Error::Database(db_err) => Self::from_database(db_err.as_ref()),
            sqlx::Error::PoolTimedOut => Self::PoolTimeout,
            sqlx::Error::PoolClosed => Self::PoolClosed,
            sqlx::Error::TypeNotFound { .. }
            | sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::Decode(_) => Self::TypeMismatch,
            _ => Self::Unknown,
        }
    }

    pub fn from_io(kind: IoErrorKind) -> Self {
        match kind {
            IoErrorKind::ConnectionReset | IoErrorKind::ConnectionAborted => Self::ConnectionReset,
            IoErrorKind::UnexpectedEof | IoErrorKind::NotConnected => Self::ConnectionLost,
            IoErrorKind::BrokenPipe => Self::BrokenPipe,
            IoErrorKind::TimedOut => Self::Timeout,
            _ => Self::Unknown,
        }
    }

    fn from_database(db_err: &dyn DatabaseError) -> Self {
        let kind = if let Some(mysql) = db_err.try_downcast_ref::<MySqlDatabaseError>() {
            Self::from_mysql_number(mysql.number())
        } else if let Some(pg) = db_err.try_downcast_ref::<PgDatabaseError>() {
            Self::from_sqlstate(pg.code())
        } else if let Some(code) = db_err.code() {
            code.parse::<i32>()
                .map(Self::from_sqlite_code)
                .unwrap_or_else(|_| Self::from_sqlstate(&code))
        } else {
            Self::Unknown
        };

        if kind != Self::Unknown {
            return kind;
        }
        match db_err.kind() {
            SqlxErrorKind::UniqueViolation
            | SqlxErrorKind::ForeignKeyViolation
            | SqlxErrorKind::NotNullViolation
            | SqlxErrorKind::CheckViolation => Self::ConstraintViolation,
            _ => Self::Unknown,
        }
    }

    /// MySQL / MariaDB server and client error numbers.
    pub fn from_mysql_number(number: u16) -> Self {
        match number {
            1213 => Self::Deadlock,
            1205 => Self::LockWaitTimeout,
            1040 | 1203 => Self::ServerConnectionLimit,
            // server gone away, lost connection during query, shutdown in progress
            2006 | 2013 | 1053 => Self::ConnectionLost,
            1159 | 1161 | 3024 => Self::Timeout,
            1064 | 1149 => Self::Syntax,
            1048 | 1062 | 1216 | 1217 | 1364 | 1451 | 1452 | 3819 => Self::ConstraintViolation,
            1044 | 1045 | 1142 | 1143 | 1227 => Self::Permission,
            1264 | 1292 | 1366 => Self::TypeMismatch,
            _ => Self::Unknown,
        }
    }

    /// PostgreSQL (and generic) SQLSTATE codes.
    pub fn from_sqlstate(code: &str) -> Self {
        match code {
            "40P01" => Self::Deadlock,
            // serialization_failure aborts the transaction like a deadlock
            "40001" => Self::Deadlock,
            "55P03" => Self::LockWaitTimeout,
            "53300" => Self::ServerConnectionLimit,
            "57P01" | "57P02" | "57P03" => Self::ConnectionLost,
            "57014" => Self::Timeout,
            "42501" | "28000" | "28P01" => Self::Permission,
            "42804" => Self::TypeMismatch,
            _ if code.starts_with("08") => Self::ConnectionLost,
            _ if code.starts_with("23") => Self::ConstraintViolation,
            _ if code.starts_with("22") => Self::TypeMismatch,
            _ if code.starts_with("42") => Self::Syntax,
            _ => Self::Unknown,
        }
    }

    /// SQLite result codes; extended codes are reduced to their primary code.
    pub fn from_sqlite_code(code: i32) -> Self {
        match code & 0xff {
            // SQLITE_BUSY
            5 => Self::LockWaitTimeout,
            // SQLITE_LOCKED
            6 => Self::Deadlock,
            19 => Self::ConstraintViolation,
            3 | 23 => Self::Permission,
            20 => Self::TypeMismatch,
            1 => Self::Syntax,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server error code to carry on [`crate::DbError::Database`].
pub(crate) fn server_code(db_err: &dyn DatabaseError) -> Option<String> {
    if let Some(mysql) = db_err.try_downcast_ref::<MySqlDatabaseError>() {
        return Some(mysql.number().to_string());
    }
    db_err.code().map(|c| c.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [FailureKind; 18] = [
        FailureKind::ConnectionReset,
        FailureKind::ConnectionLost,
        FailureKind::Timeout,
        FailureKind::BrokenPipe,
        FailureKind::ProtocolDesync,
        FailureKind::ServerConnectionLimit,
        FailureKind::Deadlock,
        FailureKind::LockWaitTimeout,
        FailureKind::Syntax,
        FailureKind::ConstraintViolation,
        FailureKind::Permission,
        FailureKind::TypeMismatch,
        FailureKind::PoolExhausted,
        FailureKind::PoolTimeout,
        FailureKind::PoolClosed,
        FailureKind::InvalidInput,
        FailureKind::Work,
        FailureKind::Unknown,
    ];

    #[test]
    fn test_infrastructure_failures_are_transient_everywhere() {
        for kind in [
            FailureKind::ConnectionReset,
            FailureKind::ConnectionLost,
            FailureKind::Timeout,
            FailureKind::BrokenPipe,
            FailureKind::ProtocolDesync,
            FailureKind::ServerConnectionLimit,
        ] {
            assert!(kind.is_transient(Scope::Statement), "{kind}");
            assert!(kind.is_transient(Scope::Transaction), "{kind}");
        }
    }

    #[test]
    fn test_lock_conflicts_only_transient_for_transactions() {
        for kind in [FailureKind::Deadlock, FailureKind::LockWaitTimeout] {
            assert!(!kind.is_transient(Scope::Statement));
            assert!(kind.is_transient(Scope::Transaction));
        }
    }

    #[test]
    fn test_statement_and_unknown_failures_fail_closed() {
        for kind in [
            FailureKind::Syntax,
            FailureKind::ConstraintViolation,
            FailureKind::Permission,
            FailureKind::TypeMismatch,
            FailureKind::PoolExhausted,
            FailureKind::PoolTimeout,
            FailureKind::InvalidInput,
            FailureKind::Work,
            FailureKind::Unknown,
        ] {
            assert!(!kind.is_transient(Scope::Statement), "{kind}");
            assert!(!kind.is_transient(Scope::Transaction), "{kind}");
        }
    }

    #[test]
    fn test_broken_connections_are_transient() {
        for kind in ALL {
            if kind.breaks_connection() {
                assert!(kind.is_transient(Scope::Statement), "{kind}");
            }
        }
        assert!(!FailureKind::Deadlock.breaks_connection());
        assert!(!FailureKind::ServerConnectionLimit.breaks_connection());
    }

    #[test]
    fn test_io_kinds() {
        assert_eq!(
            FailureKind::from_io(IoErrorKind::ConnectionReset),
            FailureKind::ConnectionReset
        );
        assert_eq!(
            FailureKind::from_io(IoErrorKind::UnexpectedEof),
            FailureKind::ConnectionLost
        );
        assert_eq!(
            FailureKind::from_io(IoErrorKind::BrokenPipe),
            FailureKind::BrokenPipe
        );
        assert_eq!(FailureKind::from_io(IoErrorKind::TimedOut), FailureKind::Timeout);
        assert_eq!(
            FailureKind::from_io(IoErrorKind::ConnectionRefused),
            FailureKind::Unknown
        );
    }

    #[test]
    fn test_mysql_numbers() {
        assert_eq!(FailureKind::from_mysql_number(1213), FailureKind::Deadlock);
        assert_eq!(FailureKind::from_mysql_number(1205), FailureKind::LockWaitTimeout);
        assert_eq!(
            FailureKind::from_mysql_number(1040),
            FailureKind::ServerConnectionLimit
        );
        assert_eq!(FailureKind::from_mysql_number(2013), FailureKind::ConnectionLost);
        assert_eq!(FailureKind::from_mysql_number(1064), FailureKind::Syntax);
        assert_eq!(
            FailureKind::from_mysql_number(1062),
            FailureKind::ConstraintViolation
        );
        assert_eq!(FailureKind::from_mysql_number(1142), FailureKind::Permission);
        assert_eq!(FailureKind::from_mysql_number(9999), FailureKind::Unknown);
    }

    #[test]
    fn test_sqlstates() {
        assert_eq!(FailureKind::from_sqlstate("40P01"), FailureKind::Deadlock);
        assert_eq!(FailureKind::from_sqlstate("55P03"), FailureKind::LockWaitTimeout);
        assert_eq!(
            FailureKind::from_sqlstate("53300"),
            FailureKind::ServerConnectionLimit
        );
        assert_eq!(FailureKind::from_sqlstate("08006"), FailureKind::ConnectionLost);
        assert_eq!(FailureKind::from_sqlstate("42601"), FailureKind::Syntax);
        assert_eq!(FailureKind::from_sqlstate("42501"), FailureKind::Permission);
        assert_eq!(
            FailureKind::from_sqlstate("23505"),
            FailureKind::ConstraintViolation
        );
        assert_eq!(FailureKind::from_sqlstate("22P02"), FailureKind::TypeMismatch);
        assert_eq!(FailureKind::from_sqlstate("XX000"), FailureKind::Unknown);
    }

    #[test]
    fn test_sqlite_codes() {
        assert_eq!(FailureKind::from_sqlite_code(5), FailureKind::LockWaitTimeout);
        // SQLITE_CONSTRAINT_UNIQUE
        assert_eq!(
            FailureKind::from_sqlite_code(2067),
            FailureKind::ConstraintViolation
        );
        assert_eq!(FailureKind::from_sqlite_code(1), FailureKind::Syntax);
        assert_eq!(FailureKind::from_sqlite_code(14), FailureKind::Unknown);
    }
}
