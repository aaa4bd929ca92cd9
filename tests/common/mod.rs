//! Scripted in-memory connector shared by the integration tests.
//!
//! Statement outcomes are scripted per call; writes made inside a
//! transaction only become visible in `committed` after COMMIT.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use resilient_db::config::{PoolOptions, RetryOptions};
use resilient_db::db::{Connector, DriverConnection, Executor, FailureKind, Pool};
use resilient_db::error::{DbError, DbResult};
use resilient_db::models::{QueryParam, WriteResult};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Default)]
pub struct MockState {
    statement_script: Mutex<VecDeque<Option<FailureKind>>>,
    commit_script: Mutex<VecDeque<FailureKind>>,
    ping_script: Mutex<VecDeque<FailureKind>>,
    rollback_fails: Mutex<bool>,
    statement_delay: Mutex<Duration>,

    pub committed: Mutex<Vec<String>>,

    pub connects: AtomicUsize,
    pub closes: AtomicUsize,
    pub pings: AtomicUsize,
    pub statements: AtomicUsize,
    pub begins: AtomicUsize,
    pub commits: AtomicUsize,
    pub rollbacks: AtomicUsize,
    active: AtomicUsize,
    pub max_active: AtomicUsize,
}

impl MockState {
    /// Fail the next statements with these kinds, in order.
    pub fn fail_statements(&self, kinds: impl IntoIterator<Item = FailureKind>) {
        self.statement_script.lock().extend(kinds.into_iter().map(Some));
    }

    /// Let the next `count` statements succeed before any scripted failure.
    pub fn pass_statements(&self, count: usize) {
        self.statement_script
            .lock()
            .extend(std::iter::repeat_n(None, count));
    }

    /// Queue per-statement outcomes: `None` succeeds, `Some(kind)` fails.
    pub fn script_statements(&self, outcomes: impl IntoIterator<Item = Option<FailureKind>>) {
        self.statement_script.lock().extend(outcomes);
    }

    pub fn fail_commits(&self, kinds: impl IntoIterator<Item = FailureKind>) {
        self.commit_script.lock().extend(kinds);
    }

    pub fn fail_pings(&self, kinds: impl IntoIterator<Item = FailureKind>) {
        self.ping_script.lock().extend(kinds);
    }

    pub fn fail_rollbacks(&self) {
        *self.rollback_fails.lock() = true;
    }

    pub fn set_statement_delay(&self, delay: Duration) {
        *self.statement_delay.lock() = delay;
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::SeqCst);
    }

    fn scripted(script: &Mutex<VecDeque<FailureKind>>) -> DbResult<()> {
        match script.lock().pop_front() {
            Some(kind) => Err(DbError::database(kind, format!("simulated {kind}"), None)),
            None => Ok(()),
        }
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct MockConnection {
    state: Arc<MockState>,
    pending: Option<Vec<String>>,
}

impl MockConnection {
    async fn run(&mut self, statement: &str) -> DbResult<()> {
        let state = &self.state;
        MockState::bump(&state.statements);
        let active = state.active.fetch_add(1, Ordering::SeqCst) + 1;
        state.max_active.fetch_max(active, Ordering::SeqCst);

        {
            // Decrements even when the statement is cancelled mid-sleep.
            let _active = ActiveGuard(&state.active);
            let delay = *state.statement_delay.lock();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        let scripted = state.statement_script.lock().pop_front().flatten();
        if let Some(kind) = scripted {
            return Err(DbError::database(kind, format!("simulated {kind}"), None));
        }
        match self.pending.as_mut() {
            Some(pending) => pending.push(statement.to_string()),
            None => state.committed.lock().push(statement.to_string()),
        }
        Ok(())
    }
}

#[async_trait]
impl DriverConnection for MockConnection {
    type Row = String;

    async fn query(&mut self, statement: &str, _params: &[QueryParam]) -> DbResult<Vec<String>> {
        self.run(statement).await?;
        Ok(vec![statement.to_string()])
    }

    async fn execute(&mut self, statement: &str, _params: &[QueryParam]) -> DbResult<WriteResult> {
        self.run(statement).await?;
        Ok(WriteResult::new(1, Some(42)))
    }

    async fn ping(&mut self) -> DbResult<()> {
        MockState::bump(&self.state.pings);
        MockState::scripted(&self.state.ping_script)
    }

    async fn begin(&mut self) -> DbResult<()> {
        MockState::bump(&self.state.begins);
        self.pending = Some(Vec::new());
        Ok(())
    }

    async fn commit(&mut self) -> DbResult<()> {
        MockState::bump(&self.state.commits);
        MockState::scripted(&self.state.commit_script)?;
        if let Some(pending) = self.pending.take() {
            self.state.committed.lock().extend(pending);
        }
        Ok(())
    }

    async fn rollback(&mut self) -> DbResult<()> {
        MockState::bump(&self.state.rollbacks);
        self.pending = None;
        if *self.state.rollback_fails.lock() {
            return Err(DbError::database(
                FailureKind::ConnectionLost,
                "simulated rollback failure",
                None,
            ));
        }
        Ok(())
    }

    async fn close(self) -> DbResult<()> {
        MockState::bump(&self.state.closes);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct MockConnector {
    pub state: Arc<MockState>,
}

#[async_trait]
impl Connector for MockConnector {
    type Connection = MockConnection;

    async fn connect(&self) -> DbResult<MockConnection> {
        MockState::bump(&self.state.connects);
        Ok(MockConnection {
            state: Arc::clone(&self.state),
            pending: None,
        })
    }
}

pub fn pool_options(max_connections: u32) -> PoolOptions {
    PoolOptions::default()
        .with_max_connections(max_connections)
        .with_keepalive_interval(None)
}

/// Executor over a fresh mock connector with default retry settings.
pub fn mock_executor(max_connections: u32) -> (Executor<MockConnector>, Arc<MockState>) {
    let connector = MockConnector::default();
    let state = Arc::clone(&connector.state);
    let pool = Pool::new(pool_options(max_connections), connector).unwrap();
    (Executor::new(pool, RetryOptions::default()), state)
}

/// Every acquire was matched by exactly one release or discard.
pub fn assert_no_leaks(executor: &Executor<MockConnector>) {
    let stats = executor.pool().stats();
    assert_eq!(stats.checked_out, 0, "{stats:?}");
    assert_eq!(stats.acquired, stats.released + stats.discarded, "{stats:?}");
}
