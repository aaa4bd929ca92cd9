//! Query execution with transient-failure retry.
//!
//! Each call leases a connection, runs one statement and returns the lease
//! before returning. Transient failures are retried with capped exponential
//! backoff; retry attempts verify the leased connection with a ping first.

use crate::config::RetryOptions;
use crate::db::classify::Scope;
use crate::db::driver::{Connector, DriverConnection, RowOf};
use crate::db::params::check_param_count;
use crate::db::pool::{Pool, PooledConnection};
use crate::error::{DbError, DbResult, Operation};
use crate::models::{QueryParam, WriteResult};
use futures_util::future::BoxFuture;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One statement run against a leased connection.
type StatementFn<D, T> =
    for<'c> fn(&'c mut D, &'c str, &'c [QueryParam]) -> BoxFuture<'c, DbResult<T>>;

/// Runs statements and transactions against a [`Pool`].
///
/// Cheap to clone; clones share the pool.
pub struct Executor<C: Connector> {
    pool: Pool<C>,
    retry: RetryOptions,
}

impl<C: Connector> Clone for Executor<C> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            retry: self.retry,
        }
    }
}

impl<C: Connector> std::fmt::Debug for Executor<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("pool", &self.pool)
            .field("retry", &self.retry)
            .finish()
    }
}

impl<C: Connector> Executor<C> {
    pub fn new(pool: Pool<C>, retry: RetryOptions) -> Self {
        Self { pool, retry }
    }

    pub fn pool(&self) -> &Pool<C> {
        &self.pool
    }

    pub fn retry_options(&self) -> &RetryOptions {
        &self.retry
    }

    /// Run a statement and return its rows exactly as the driver produced them.
    pub async fn query(&self, statement: &str, params: &[QueryParam]) -> DbResult<Vec<RowOf<C>>> {
        self.run(Operation::Query, statement, params, |conn, statement, params| {
            conn.query(statement, params)
        })
        .await
    }

    /// Run a write statement and return the affected row count and insert id.
    pub async fn execute(&self, statement: &str, params: &[QueryParam]) -> DbResult<WriteResult> {
        self.run(Operation::Execute, statement, params, |conn, statement, params| {
            conn.execute(statement, params)
        })
        .await
    }

    async fn run<T>(
        &self,
        operation: Operation,
        statement: &str,
        params: &[QueryParam],
        step: StatementFn<C::Connection, T>,
    ) -> DbResult<T> {
        check_param_count(statement, params, self.pool.connector().placeholder_style())?;

        let max_attempts = self.retry.query_attempts();
        let mut attempt = 1;
        debug!(%operation, sql = %statement, params = params.len(), "Running statement");

        loop {
            match self.attempt(statement, params, step, attempt > 1).await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(%operation, attempt, "Statement succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => match self.retry_delay(&err, Scope::Statement, attempt, max_attempts) {
                    Some(delay) => {
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => return Err(err.with_context(operation, Some(statement), attempt)),
                },
            }
        }
    }

    async fn attempt<T>(
        &self,
        statement: &str,
        params: &[QueryParam],
        step: StatementFn<C::Connection, T>,
        verify: bool,
    ) -> DbResult<T> {
        let mut lease = self.lease(verify).await?;
        let result = step(lease.conn()?, statement, params).await;
        settle(&mut lease, &result);
        result
    }

    /// Lease a connection; when `verify` is set, ping it first.
    pub(crate) async fn lease(&self, verify: bool) -> DbResult<PooledConnection<C>> {
        if verify {
            self.acquire_verified().await
        } else {
            self.pool.acquire().await
        }
    }

    /// Lease a connection that answered a ping.
    ///
    /// Dead connections are discarded and replaced without using up a retry
    /// attempt. After `max_connections + 1` consecutive failures the last
    /// ping error is returned.
    async fn acquire_verified(&self) -> DbResult<PooledConnection<C>> {
        let max_failures = self.pool.options().max_connections.saturating_add(1);
        let mut failures = 0;
        loop {
            let mut lease = self.pool.acquire().await?;
            match lease.conn()?.ping().await {
                Ok(()) => return Ok(lease),
                Err(err) => {
                    lease.discard();
                    failures += 1;
                    warn!(
                        error = %err,
                        failures,
                        max_failures,
                        "Liveness check failed, discarding connection"
                    );
                    if failures >= max_failures {
                        return Err(err);
                    }
                }
            }
        }
    }

    /// Backoff before the next attempt, or None when `err` must be propagated.
    pub(crate) fn retry_delay(
        &self,
        err: &DbError,
        scope: Scope,
        attempt: u32,
        max_attempts: u32,
    ) -> Option<Duration> {
        let kind = err.kind();
        if !kind.is_transient(scope) {
            debug!(kind = %kind, attempt, "Failure is not retryable");
            return None;
        }
        if attempt >= max_attempts {
            warn!(kind = %kind, attempt, "Giving up after transient failures");
            return None;
        }
        let delay = self.retry.backoff.delay(attempt);
        warn!(
            error = %err,
            kind = %kind,
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            "Transient failure, retrying"
        );
        Some(delay)
    }
}

/// Return a lease after a statement: discard it when the failure left the
/// session unusable, release it otherwise.
fn settle<C: Connector, T>(lease: &mut PooledConnection<C>, result: &DbResult<T>) {
    match result {
        Err(err) if err.kind().breaks_connection() => lease.discard(),
        _ => lease.release(),
    }
}
