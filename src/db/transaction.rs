//! Retrying multi-statement transactions.
//!
//! Caller-supplied work runs between `BEGIN` and `COMMIT` on one leased
//! connection. On a transient failure the whole unit is rolled back and
//! replayed on a fresh lease, so `work` must not have side effects outside
//! the connection it is given.

use crate::config::DEFAULT_TRANSACTION_RETRIES;
use crate::db::classify::Scope;
use crate::db::driver::{Connector, DriverConnection, PlaceholderStyle, RowOf};
use crate::db::executor::Executor;
use crate::db::params::check_param_count;
use crate::error::{DbResult, Operation};
use crate::models::{QueryParam, WriteResult};
use futures_util::future::BoxFuture;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Per-call transaction settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionOptions {
    /// Replays of the whole transaction after the first attempt
    pub retries: u32,
}

impl TransactionOptions {
    pub fn new(retries: u32) -> Self {
        Self { retries }
    }
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self::new(DEFAULT_TRANSACTION_RETRIES)
    }
}

/// Connection handed to transaction work.
///
/// Statements run here are not retried individually; failures propagate to
/// the coordinator, which decides whether to replay the whole transaction.
pub struct TransactionContext<'c, C: Connector> {
    conn: &'c mut C::Connection,
    style: PlaceholderStyle,
    id: &'c str,
}

impl<C: Connector> TransactionContext<'_, C> {
    /// Correlation id shared by every attempt of this transaction.
    pub fn id(&self) -> &str {
        self.id
    }

    pub async fn query(&mut self, statement: &str, params: &[QueryParam]) -> DbResult<Vec<RowOf<C>>> {
        check_param_count(statement, params, self.style)?;
        debug!(tx_id = %self.id, sql = %statement, params = params.len(), "Transaction query");
        self.conn.query(statement, params).await
    }

    pub async fn execute(&mut self, statement: &str, params: &[QueryParam]) -> DbResult<WriteResult> {
        check_param_count(statement, params, self.style)?;
        debug!(tx_id = %self.id, sql = %statement, params = params.len(), "Transaction execute");
        self.conn.execute(statement, params).await
    }
}

impl<C: Connector> Executor<C> {
    /// Run `work` atomically with the executor's default transaction retries.
    ///
    /// ```ignore
    /// let id = executor
    ///     .transaction(|tx| {
    ///         Box::pin(async move {
    ///             let user = tx.execute("INSERT INTO users (name) VALUES (?)", &["ann".into()]).await?;
    ///             tx.execute("INSERT INTO audit (event) VALUES ('signup')", &[]).await?;
    ///             Ok(user.last_insert_id)
    ///         })
    ///     })
    ///     .await?;
    /// ```
    pub async fn transaction<T, F>(&self, work: F) -> DbResult<T>
    where
        T: Send,
        F: for<'c> FnMut(&'c mut TransactionContext<'_, C>) -> BoxFuture<'c, DbResult<T>> + Send,
    {
        let options = TransactionOptions::new(self.retry_options().transaction_retries);
        self.transaction_with(options, work).await
    }

    /// Run `work` atomically, replaying it up to `options.retries` times on
    /// transient failures.
    ///
    /// Errors raised by the work itself should be wrapped with
    /// [`crate::DbError::work`]; they are never retried.
    pub async fn transaction_with<T, F>(&self, options: TransactionOptions, mut work: F) -> DbResult<T>
    where
        T: Send,
        F: for<'c> FnMut(&'c mut TransactionContext<'_, C>) -> BoxFuture<'c, DbResult<T>> + Send,
    {
        let tx_id = Uuid::new_v4().to_string();
        let max_attempts = options.retries.saturating_add(1);
        let mut attempt = 1;

        loop {
            debug!(tx_id = %tx_id, attempt, max_attempts, "Starting transaction");
            match self.transaction_attempt(&tx_id, &mut work, attempt > 1).await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(tx_id = %tx_id, attempt, "Transaction committed after retry");
                    } else {
                        debug!(tx_id = %tx_id, "Transaction committed");
                    }
                    return Ok(value);
                }
                Err(err) => match self.retry_delay(&err, Scope::Transaction, attempt, max_attempts) {
                    Some(delay) => {
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => return Err(err.with_context(Operation::Transaction, None, attempt)),
                },
            }
        }
    }

    async fn transaction_attempt<T, F>(&self, tx_id: &str, work: &mut F, verify: bool) -> DbResult<T>
    where
        T: Send,
        F: for<'c> FnMut(&'c mut TransactionContext<'_, C>) -> BoxFuture<'c, DbResult<T>> + Send,
    {
        let mut lease = self.lease(verify).await?;
        let style = self.pool().connector().placeholder_style();
        let conn = lease.conn()?;

        let outcome = run_in_transaction::<C, T, F>(conn, style, tx_id, work).await;
        match outcome {
            Ok(value) => {
                lease.release();
                Ok(value)
            }
            Err(err) if err.kind().breaks_connection() => {
                // The server aborts the transaction with the session.
                warn!(
                    tx_id = %tx_id,
                    kind = %err.kind(),
                    "Connection broken mid-transaction, discarding without rollback"
                );
                lease.discard();
                Err(err)
            }
            Err(err) => {
                // Never hand a connection back with a transaction still open.
                if self.rollback(lease.conn()?, tx_id).await {
                    lease.release();
                } else {
                    lease.discard();
                }
                Err(err)
            }
        }
    }

    /// Best-effort rollback bounded by `connect_timeout`; failures are logged.
    async fn rollback(&self, conn: &mut C::Connection, tx_id: &str) -> bool {
        let limit = self.pool().options().connect_timeout;
        match timeout(limit, conn.rollback()).await {
            Ok(Ok(())) => {
                debug!(tx_id = %tx_id, "Transaction rolled back");
                true
            }
            Ok(Err(e)) => {
                warn!(tx_id = %tx_id, error = %e, "Rollback failed");
                false
            }
            Err(_) => {
                warn!(
                    tx_id = %tx_id,
                    timeout_ms = limit.as_millis() as u64,
                    "Rollback timed out"
                );
                false
            }
        }
    }
}

async fn run_in_transaction<C, T, F>(
    conn: &mut C::Connection,
    style: PlaceholderStyle,
    tx_id: &str,
    work: &mut F,
) -> DbResult<T>
where
    C: Connector,
    T: Send,
    F: for<'c> FnMut(&'c mut TransactionContext<'_, C>) -> BoxFuture<'c, DbResult<T>> + Send,
{
    conn.begin().await?;
    let mut ctx = TransactionContext::<C> {
        conn,
        style,
        id: tx_id,
    };
    let value = work(&mut ctx).await?;
    ctx.conn.commit().await?;
    Ok(value)
}
