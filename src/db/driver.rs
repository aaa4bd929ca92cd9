//! Driver adaptation boundary.
//!
//! The pool and executor only talk to connections through these traits.
//! sqlx-backed implementations live in [`crate::db::backends`]; tests plug in
//! scripted connections.

use crate::error::DbResult;
use crate::models::{QueryParam, WriteResult};
use async_trait::async_trait;

/// How a backend spells bind placeholders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `?` and `?NNN` (MySQL, SQLite)
    Question,
    /// `$1`, `$2`, ... (PostgreSQL)
    Dollar,
}

/// A physical database session.
///
/// Failures must be reported as [`crate::DbError`] values carrying the right
/// [`crate::db::FailureKind`]; the retry logic never looks at messages.
#[async_trait]
pub trait DriverConnection: Send + 'static {
    /// Row type exactly as the driver produces it.
    type Row: Send + 'static;

    /// Run a statement and return its rows.
    async fn query(&mut self, statement: &str, params: &[QueryParam]) -> DbResult<Vec<Self::Row>>;

    /// Run a statement and return write metadata.
    async fn execute(&mut self, statement: &str, params: &[QueryParam]) -> DbResult<WriteResult>;

    /// Cheap round trip proving the session is still usable.
    async fn ping(&mut self) -> DbResult<()>;

    async fn begin(&mut self) -> DbResult<()>;

    async fn commit(&mut self) -> DbResult<()>;

    async fn rollback(&mut self) -> DbResult<()>;

    /// Hard-close the session.
    async fn close(self) -> DbResult<()>;
}

/// Row type produced by a connector's connections.
pub type RowOf<C> = <<C as Connector>::Connection as DriverConnection>::Row;

/// Opens physical connections for a [`crate::db::Pool`].
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Connection: DriverConnection;

    async fn connect(&self) -> DbResult<Self::Connection>;

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::Question
    }
}
