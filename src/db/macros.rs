//! Backend generation macros.
//!
//! The three sqlx connections share one implementation of
//! [`DriverConnection`](crate::db::driver::DriverConnection); only the row
//! type, the bind function and the insert-id accessor differ. The macro keeps
//! the parallel code in one place.

/// Implement `DriverConnection` for a sqlx connection type.
///
/// # Example
///
/// ```ignore
/// impl_sqlx_connection!(
///     MySqlConnection,
///     row = MySqlRow,
///     bind = bind_mysql_param,
///     last_insert_id = |r: &MySqlQueryResult| i64::try_from(r.last_insert_id()).ok(),
/// );
/// ```
#[macro_export]
macro_rules! impl_sqlx_connection {
    (
        $conn:ty,
        row = $row:ty,
        bind = $bind:path,
        last_insert_id = $last_insert_id:expr $(,)?
    ) => {
        #[async_trait::async_trait]
        impl $crate::db::driver::DriverConnection for $conn {
            type Row = $row;

            async fn query(
                &mut self,
                statement: &str,
                params: &[$crate::models::QueryParam],
            ) -> $crate::error::DbResult<Vec<$row>> {
                // When params is empty, use raw SQL to avoid prepared statement issues
                let rows = if params.is_empty() {
                    sqlx::Executor::fetch_all(&mut *self, statement).await?
                } else {
                    let mut query = sqlx::query(statement);
                    for param in params {
                        query = $bind(query, param);
                    }
                    query.fetch_all(&mut *self).await?
                };
                Ok(rows)
            }

            async fn execute(
                &mut self,
                statement: &str,
                params: &[$crate::models::QueryParam],
            ) -> $crate::error::DbResult<$crate::models::WriteResult> {
                let result = if params.is_empty() {
                    sqlx::Executor::execute(&mut *self, statement).await?
                } else {
                    let mut query = sqlx::query(statement);
                    for param in params {
                        query = $bind(query, param);
                    }
                    query.execute(&mut *self).await?
                };
                Ok($crate::models::WriteResult::new(
                    result.rows_affected(),
                    ($last_insert_id)(&result),
                ))
            }

            async fn ping(&mut self) -> $crate::error::DbResult<()> {
                sqlx::Connection::ping(self).await?;
                Ok(())
            }

            async fn begin(&mut self) -> $crate::error::DbResult<()> {
                sqlx::Executor::execute(&mut *self, "BEGIN").await?;
                Ok(())
            }

            async fn commit(&mut self) -> $crate::error::DbResult<()> {
                sqlx::Executor::execute(&mut *self, "COMMIT").await?;
                Ok(())
            }

            async fn rollback(&mut self) -> $crate::error::DbResult<()> {
                sqlx::Executor::execute(&mut *self, "ROLLBACK").await?;
                Ok(())
            }

            async fn close(self) -> $crate::error::DbResult<()> {
                sqlx::Connection::close(self).await?;
                Ok(())
            }
        }
    };
}

pub use impl_sqlx_connection;
