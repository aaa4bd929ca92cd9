//! Connection pool management.
//!
//! A bounded set of physical connections handed out as [`PooledConnection`]
//! leases. Slots are tracked by a semaphore, idle connections by a LIFO queue.
//! Every lease must end in [`PooledConnection::release`] or
//! [`PooledConnection::discard`]; a lease dropped without either (panic,
//! cancelled future) is discarded.

use crate::config::PoolOptions;
use crate::db::classify::FailureKind;
use crate::db::driver::{Connector, DriverConnection};
use crate::error::{DbError, DbResult};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::time::{Instant, MissedTickBehavior, timeout};
use tracing::{debug, info, warn};

/// Point-in-time view of the pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub max_connections: u32,
    /// Leases currently held by callers
    pub checked_out: usize,
    /// Open connections waiting in the idle queue
    pub idle: usize,
    /// Callers queued for a free slot
    pub waiting: usize,
    /// Physical connections opened so far
    pub opened: u64,
    pub acquired: u64,
    pub released: u64,
    pub discarded: u64,
    /// Idle connections dropped after a failed keepalive ping
    pub evicted: u64,
}

#[derive(Debug, Default)]
struct AtomicPoolStats {
    opened: AtomicU64,
    acquired: AtomicU64,
    released: AtomicU64,
    discarded: AtomicU64,
    evicted: AtomicU64,
}

impl AtomicPoolStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

struct PoolShared<C: Connector> {
    connector: C,
    options: PoolOptions,
    slots: Arc<Semaphore>,
    idle: Mutex<VecDeque<C::Connection>>,
    waiting: AtomicUsize,
    stats: AtomicPoolStats,
}

impl<C: Connector> PoolShared<C> {
    /// Open a physical connection, bounded by `connect_timeout`.
    async fn open(&self) -> DbResult<C::Connection> {
        let connect_timeout = self.options.connect_timeout;
        match timeout(connect_timeout, self.connector.connect()).await {
            Ok(Ok(conn)) => {
                AtomicPoolStats::bump(&self.stats.opened);
                debug!("Opened database connection");
                Ok(conn)
            }
            Ok(Err(e)) => {
                warn!(error = %e, kind = %e.kind(), "Failed to open database connection");
                Err(e)
            }
            Err(_) => {
                warn!(
                    timeout_ms = connect_timeout.as_millis() as u64,
                    "Timed out opening database connection"
                );
                Err(DbError::database(
                    FailureKind::Timeout,
                    format!(
                        "connection not established within {}ms",
                        connect_timeout.as_millis()
                    ),
                    None,
                ))
            }
        }
    }

    /// Put a healthy connection back, or close it if the pool is shutting down.
    fn push_idle(&self, conn: C::Connection) {
        let rejected = {
            let mut idle = self.idle.lock();
            if self.slots.is_closed() {
                Some(conn)
            } else {
                idle.push_back(conn);
                None
            }
        };
        if let Some(conn) = rejected {
            close_in_background(conn);
        }
    }

    /// Ping every idle connection once, evicting the ones that fail or do not
    /// answer within `connect_timeout`.
    ///
    /// A slot is held while pinging so the connection counts as checked out.
    async fn ping_idle(&self) {
        let count = self.idle.lock().len();
        for _ in 0..count {
            let Ok(permit) = self.slots.clone().try_acquire_owned() else {
                break;
            };
            let next = self.idle.lock().pop_front();
            let Some(mut conn) = next else {
                break;
            };
            let limit = self.options.connect_timeout;
            match timeout(limit, conn.ping()).await {
                Ok(Ok(())) => self.push_idle(conn),
                Ok(Err(e)) => {
                    warn!(error = %e, "Keepalive ping failed, evicting idle connection");
                    AtomicPoolStats::bump(&self.stats.evicted);
                    close_in_background(conn);
                }
                Err(_) => {
                    warn!(
                        timeout_ms = limit.as_millis() as u64,
                        "Keepalive ping timed out, evicting idle connection"
                    );
                    AtomicPoolStats::bump(&self.stats.evicted);
                    close_in_background(conn);
                }
            }
            drop(permit);
        }
    }
}

/// Hard-close a connection without blocking the caller.
fn close_in_background<T: DriverConnection>(conn: T) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                if let Err(e) = conn.close().await {
                    debug!(error = %e, "Error while closing discarded connection");
                }
            });
        }
        Err(_) => {
            // No runtime left (process shutdown); dropping closes the socket.
            drop(conn);
        }
    }
}

/// Counts a queued caller for as long as it waits.
struct WaiterGuard<'a> {
    waiting: &'a AtomicUsize,
}

impl<'a> WaiterGuard<'a> {
    /// Register a waiter; returns the guard and the number already queued.
    fn enter(waiting: &'a AtomicUsize) -> (Self, usize) {
        let ahead = waiting.fetch_add(1, Ordering::AcqRel);
        (Self { waiting }, ahead)
    }
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.waiting.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Bounded pool of physical connections.
///
/// Cheap to clone; all clones share the same connections.
pub struct Pool<C: Connector> {
    shared: Arc<PoolShared<C>>,
}

impl<C: Connector> Clone for Pool<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: Connector> std::fmt::Debug for Pool<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("options", &self.shared.options)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<C: Connector> Pool<C> {
    /// Create a pool without opening any connection.
    ///
    /// The keepalive task is started when `keepalive_interval` is set and a
    /// Tokio runtime is available.
    pub fn new(options: PoolOptions, connector: C) -> DbResult<Self> {
        options.validate().map_err(DbError::invalid_input)?;

        let shared = Arc::new(PoolShared {
            connector,
            slots: Arc::new(Semaphore::new(options.max_connections as usize)),
            idle: Mutex::new(VecDeque::with_capacity(options.max_connections as usize)),
            waiting: AtomicUsize::new(0),
            stats: AtomicPoolStats::default(),
            options,
        });

        if let Some(interval) = shared.options.keepalive_interval {
            spawn_keepalive(Arc::downgrade(&shared), interval);
        }

        Ok(Self { shared })
    }

    /// Create a pool and open `min_connections` connections up front.
    ///
    /// Fails if any of the initial connections cannot be opened.
    pub async fn connect(options: PoolOptions, connector: C) -> DbResult<Self> {
        let pool = Self::new(options, connector)?;
        let warm = pool.shared.options.min_connections;
        for _ in 0..warm {
            let conn = pool.shared.open().await?;
            pool.shared.push_idle(conn);
        }
        info!(
            max_connections = pool.shared.options.max_connections,
            min_connections = warm,
            max_queued_waiters = pool.shared.options.max_queued_waiters,
            connect_timeout_ms = pool.shared.options.connect_timeout.as_millis() as u64,
            "Connection pool ready"
        );
        Ok(pool)
    }

    pub fn options(&self) -> &PoolOptions {
        &self.shared.options
    }

    pub fn connector(&self) -> &C {
        &self.shared.connector
    }

    /// Lease a connection.
    ///
    /// Waits up to `connect_timeout` for a free slot. Fails immediately with
    /// [`DbError::PoolExhausted`] when `max_queued_waiters` callers are already
    /// waiting (0 means no limit).
    pub async fn acquire(&self) -> DbResult<PooledConnection<C>> {
        let started = Instant::now();
        let permit = match self.shared.slots.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::Closed) => return Err(DbError::PoolClosed),
            Err(TryAcquireError::NoPermits) => self.wait_for_slot(started).await?,
        };

        let reused = self.shared.idle.lock().pop_back();
        let conn = match reused {
            Some(conn) => conn,
            None => self.shared.open().await?,
        };

        AtomicPoolStats::bump(&self.shared.stats.acquired);
        debug!(
            waited_ms = started.elapsed().as_millis() as u64,
            "Acquired connection"
        );

        Ok(PooledConnection {
            conn: Some(conn),
            permit: Some(permit),
            pool: self.clone(),
        })
    }

    async fn wait_for_slot(&self, started: Instant) -> DbResult<OwnedSemaphorePermit> {
        let limit = self.shared.options.max_queued_waiters;
        let (_waiter, ahead) = WaiterGuard::enter(&self.shared.waiting);
        if limit > 0 && ahead >= limit {
            debug!(waiting = ahead, limit, "Wait queue full");
            return Err(DbError::PoolExhausted {
                waiting: ahead,
                limit,
            });
        }

        debug!(waiting = ahead + 1, "Waiting for a free connection slot");
        let connect_timeout = self.shared.options.connect_timeout;
        match timeout(connect_timeout, self.shared.slots.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(DbError::PoolClosed),
            Err(_) => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                warn!(elapsed_ms, "Timed out waiting for a connection");
                Err(DbError::ConnectTimeout { elapsed_ms })
            }
        }
    }

    /// Return a lease's connection to the idle set. No-op if already returned.
    pub fn release(&self, lease: &mut PooledConnection<C>) {
        lease.release();
    }

    /// Remove a lease's connection from rotation. No-op if already returned.
    pub fn discard(&self, lease: &mut PooledConnection<C>) {
        lease.discard();
    }

    pub fn stats(&self) -> PoolStats {
        let shared = &self.shared;
        let max = shared.options.max_connections;
        PoolStats {
            max_connections: max,
            checked_out: (max as usize).saturating_sub(shared.slots.available_permits()),
            idle: shared.idle.lock().len(),
            waiting: shared.waiting.load(Ordering::Acquire),
            opened: shared.stats.opened.load(Ordering::Relaxed),
            acquired: shared.stats.acquired.load(Ordering::Relaxed),
            released: shared.stats.released.load(Ordering::Relaxed),
            discarded: shared.stats.discarded.load(Ordering::Relaxed),
            evicted: shared.stats.evicted.load(Ordering::Relaxed),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.slots.is_closed()
    }

    /// Stop handing out connections and close the idle ones.
    ///
    /// Waiting callers fail with [`DbError::PoolClosed`]; leases still out are
    /// closed when they are returned.
    pub async fn close(&self) {
        self.shared.slots.close();
        let idle: Vec<_> = self.shared.idle.lock().drain(..).collect();
        let count = idle.len();
        for conn in idle {
            if let Err(e) = conn.close().await {
                debug!(error = %e, "Error while closing idle connection");
            }
        }
        info!(closed = count, "Connection pool closed");
    }
}

fn spawn_keepalive<C: Connector>(shared: Weak<PoolShared<C>>, interval: Duration) {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        warn!("No Tokio runtime available, keepalive disabled");
        return;
    };
    handle.spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(shared) = shared.upgrade() else {
                break;
            };
            if shared.slots.is_closed() {
                break;
            }
            shared.ping_idle().await;
        }
        debug!("Keepalive task stopped");
    });
}

/// A connection leased from a [`Pool`].
///
/// Holds one pool slot until released or discarded.
pub struct PooledConnection<C: Connector> {
    conn: Option<C::Connection>,
    permit: Option<OwnedSemaphorePermit>,
    pool: Pool<C>,
}

impl<C: Connector> PooledConnection<C> {
    /// The leased connection, or an error once the lease has been returned.
    pub fn conn(&mut self) -> DbResult<&mut C::Connection> {
        self.conn
            .as_mut()
            .ok_or_else(|| DbError::internal("connection lease already returned to the pool"))
    }

    /// Whether `release` or `discard` has already run.
    pub fn is_returned(&self) -> bool {
        self.conn.is_none()
    }

    /// Return the connection to the idle set and free the slot.
    pub fn release(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        let shared = &self.pool.shared;
        shared.push_idle(conn);
        AtomicPoolStats::bump(&shared.stats.released);
        // Free the slot only after the connection is visible to the next acquirer.
        self.permit.take();
        debug!("Released connection");
    }

    /// Close the connection and free the slot for a fresh one.
    pub fn discard(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        AtomicPoolStats::bump(&self.pool.shared.stats.discarded);
        close_in_background(conn);
        self.permit.take();
        debug!("Discarded connection");
    }
}

impl<C: Connector> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if self.conn.is_some() {
            warn!("Connection lease dropped without release, discarding");
            self.discard();
        }
    }
}

impl<C: Connector> std::fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("returned", &self.is_returned())
            .finish()
    }
}
