//! Bounded connection pool.
//!
//! The pool owns every live session. Callers borrow one through
//! [`ConnectionPool::acquire`], which returns a [`ScopedConnection`] guard;
//! dropping the guard hands the session back (or discards it if it broke).
//!
//! Capacity is enforced twice. A tokio [`Semaphore`] with `max_size` permits
//! bounds concurrent borrowers, and every new session claims its place in the
//! live count before connecting, so idle, borrowed and half-open sessions
//! together never exceed `max_size`. Waiting for a permit is cooperative and
//! bounded by the acquire timeout.

use crate::db::connection::{ConnectionFactory, DbConnection};
use crate::error::{DbError, DbResult};
use crate::models::{FetchedRows, QueryParam};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Pool sizing and timing.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Sessions opened eagerly by `initialize()`.
    pub min_size: usize,
    /// Hard bound on live sessions.
    pub max_size: usize,
    /// Default wait for a free session.
    pub acquire_timeout: Duration,
    /// How long `shutdown()` waits for borrowed sessions to come back.
    pub shutdown_grace: Duration,
}

impl PoolOptions {
    /// Validate pool options.
    pub fn validate(&self) -> DbResult<()> {
        if self.min_size == 0 {
            return Err(DbError::config("min_size must be greater than 0"));
        }
        if self.min_size > self.max_size {
            return Err(DbError::config(format!(
                "min_size ({}) cannot exceed max_size ({})",
                self.min_size, self.max_size
            )));
        }
        Ok(())
    }
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            min_size: 1,
            max_size: 10,
            acquire_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// Lifecycle state of a pooled session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    InUse,
    Broken,
}

/// A live session plus pool bookkeeping.
pub struct PooledConnection {
    id: u64,
    conn: Box<dyn DbConnection>,
    state: ConnectionState,
    created_at: Instant,
    last_used: Instant,
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("age", &self.created_at.elapsed())
            .field("idle_for", &self.last_used.elapsed())
            .finish_non_exhaustive()
    }
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct PoolStatus {
    pub size: usize,
    pub idle: usize,
    pub in_use: usize,
    pub max_size: usize,
    pub closed: bool,
}

/// Outcome of a health check.
#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct ConnectionPool {
    factory: Arc<dyn ConnectionFactory>,
    options: PoolOptions,
    permits: Arc<Semaphore>,
    idle: Mutex<VecDeque<PooledConnection>>,
    live: AtomicUsize,
    in_use: AtomicUsize,
    next_id: AtomicU64,
    initialized: AtomicBool,
    closed: AtomicBool,
    released: Notify,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("options", &self.options)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl ConnectionPool {
    /// Create an empty pool. No sessions are opened until `initialize()` or
    /// the first `acquire()`.
    pub fn new(factory: Arc<dyn ConnectionFactory>, options: PoolOptions) -> DbResult<Arc<Self>> {
        options.validate()?;
        Ok(Arc::new(Self {
            factory,
            permits: Arc::new(Semaphore::new(options.max_size)),
            options,
            idle: Mutex::new(VecDeque::new()),
            live: AtomicUsize::new(0),
            in_use: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
            initialized: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            released: Notify::new(),
        }))
    }

    pub fn options(&self) -> &PoolOptions {
        &self.options
    }

    /// Open `min_size` sessions eagerly.
    ///
    /// Calling this twice is a no-op with a warning.
    pub async fn initialize(&self) -> DbResult<()> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            warn!("Pool already initialized");
            return Ok(());
        }
        if self.is_closed() {
            return Err(DbError::PoolClosed);
        }

        for _ in 0..self.options.min_size {
            let permit = Arc::clone(&self.permits)
                .acquire_owned()
                .await
                .map_err(|_| DbError::PoolClosed)?;
            // Sessions opened by concurrent borrowers count toward warm-up
            let Some(slot) = self.reserve_slot(self.options.min_size) else {
                break;
            };
            let mut conn = match self.open_connection(slot).await {
                Ok(conn) => conn,
                Err(e) => {
                    error!(error = %e, "Failed to initialize database pool");
                    return Err(e);
                }
            };
            conn.state = ConnectionState::Idle;
            self.idle_queue().push_back(conn);
            drop(permit);
        }

        info!(
            min_size = self.options.min_size,
            max_size = self.options.max_size,
            "Database pool initialized"
        );
        Ok(())
    }

    /// Borrow a session, waiting at most `timeout` for one to free up.
    ///
    /// Fails with `PoolExhausted` when the wait elapses and with `PoolClosed`
    /// once shutdown has begun (including for callers already waiting).
    pub async fn acquire(self: &Arc<Self>, timeout: Duration) -> DbResult<ScopedConnection> {
        if self.is_closed() {
            return Err(DbError::PoolClosed);
        }

        let start = tokio::time::Instant::now();
        let permit =
            match tokio::time::timeout(timeout, Arc::clone(&self.permits).acquire_owned()).await {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => return Err(DbError::PoolClosed),
                Err(_) => {
                    let waited_ms = start.elapsed().as_millis() as u64;
                    warn!(
                        waited_ms,
                        max_size = self.options.max_size,
                        "Connection pool exhausted"
                    );
                    return Err(DbError::pool_exhausted(waited_ms));
                }
            };

        if self.is_closed() {
            return Err(DbError::PoolClosed);
        }

        // On failure the permit drops here and the slot frees up again
        let mut conn = loop {
            if let Some(conn) = self.pop_idle() {
                break conn;
            }
            if let Some(slot) = self.reserve_slot(self.options.max_size) {
                break self.open_connection(slot).await?;
            }
            // Every slot is taken by an idle session that has not been
            // queued yet; it shows up on the next pass.
            tokio::task::yield_now().await;
        };
        conn.state = ConnectionState::InUse;
        self.in_use.fetch_add(1, Ordering::SeqCst);

        debug!(
            connection_id = conn.id,
            waited_ms = start.elapsed().as_millis() as u64,
            "Connection acquired"
        );

        Ok(ScopedConnection {
            pool: Arc::clone(self),
            conn: Some(conn),
            _permit: permit,
            in_flight: false,
        })
    }

    /// Acquire with the configured default timeout.
    pub async fn acquire_default(self: &Arc<Self>) -> DbResult<ScopedConnection> {
        self.acquire(self.options.acquire_timeout).await
    }

    /// Return a borrowed session. Equivalent to dropping the guard.
    pub fn release(&self, conn: ScopedConnection) {
        drop(conn);
    }

    /// Ping the database with a trivial read.
    pub async fn health_check(self: &Arc<Self>) -> bool {
        self.health_report().await.healthy
    }

    /// Ping the database and measure round-trip latency.
    ///
    /// The ping borrows a session like any other caller and holds it only
    /// for the ping. A session that fails the ping is evicted.
    pub async fn health_report(self: &Arc<Self>) -> HealthReport {
        let start = tokio::time::Instant::now();
        let result = match self.acquire(self.options.acquire_timeout).await {
            Ok(mut conn) => {
                let result = conn.ping().await;
                if result.is_err() {
                    conn.mark_broken();
                }
                result
            }
            Err(e) => Err(e),
        };
        let latency_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(()) => {
                debug!(latency_ms, "Health check passed");
                HealthReport {
                    healthy: true,
                    latency_ms,
                    error: None,
                }
            }
            Err(e) => {
                error!(error = %e, latency_ms, "Health check failed");
                HealthReport {
                    healthy: false,
                    latency_ms,
                    error: Some(e.client_message()),
                }
            }
        }
    }

    /// Run `health_report()` every `interval` in the background.
    ///
    /// Uses a Weak reference so the task exits once the pool is dropped, and
    /// stops on its own after shutdown.
    pub fn spawn_health_monitor(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak_pool = Arc::downgrade(self);
        tokio::spawn(async move {
            Self::health_monitor_task(weak_pool, interval).await;
        })
    }

    async fn health_monitor_task(weak_pool: Weak<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        // First tick completes immediately; startup already checked health
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let Some(pool) = weak_pool.upgrade() else {
                debug!("Connection pool dropped, health monitor exiting");
                return;
            };
            if pool.is_closed() {
                debug!("Connection pool closed, health monitor exiting");
                return;
            }

            let report = pool.health_report().await;
            if !report.healthy {
                warn!(error = ?report.error, "Periodic health check failed");
            }
        }
    }

    /// Stop the pool.
    ///
    /// New and pending acquisitions fail immediately. In-flight work gets
    /// `shutdown_grace` to finish, then every idle session is closed.
    /// Safe to call more than once and from any task.
    pub async fn shutdown(&self) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Pool shutdown already performed");
            return;
        }

        info!(in_use = self.in_use(), "Shutting down connection pool");
        self.permits.close();

        let deadline = tokio::time::Instant::now() + self.options.shutdown_grace;
        loop {
            // Register interest before checking to avoid missing a release
            let notified = self.released.notified();
            let in_use = self.in_use();
            if in_use == 0 {
                break;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                warn!(
                    in_use,
                    grace_secs = self.options.shutdown_grace.as_secs(),
                    "Shutdown grace period elapsed with connections still in use"
                );
                break;
            }
        }

        let drained: Vec<PooledConnection> = self.idle_queue().drain(..).collect();
        let count = drained.len();
        for conn in drained {
            self.live.fetch_sub(1, Ordering::SeqCst);
            conn.conn.close().await;
        }

        info!(closed_connections = count, "Database pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::SeqCst)
    }

    /// Get current pool counters.
    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            size: self.live.load(Ordering::SeqCst),
            idle: self.idle_queue().len(),
            in_use: self.in_use(),
            max_size: self.options.max_size,
            closed: self.is_closed(),
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn idle_queue(&self) -> MutexGuard<'_, VecDeque<PooledConnection>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pop_idle(&self) -> Option<PooledConnection> {
        self.idle_queue().pop_front()
    }

    /// Count one more live session up front, unless `limit` are already
    /// live or being opened.
    fn reserve_slot(&self, limit: usize) -> Option<SlotReservation<'_>> {
        self.live
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < limit).then_some(n + 1)
            })
            .ok()
            .map(|_| SlotReservation {
                live: &self.live,
                committed: false,
            })
    }

    async fn open_connection(&self, mut slot: SlotReservation<'_>) -> DbResult<PooledConnection> {
        let conn = self.factory.connect().await?;
        slot.committed = true;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let live = self.live.load(Ordering::SeqCst);
        debug!(connection_id = id, live, "Opened new connection");
        let now = Instant::now();
        Ok(PooledConnection {
            id,
            conn,
            state: ConnectionState::Idle,
            created_at: now,
            last_used: now,
        })
    }

    /// Put a session back, or discard it if broken or the pool is closed.
    ///
    /// Must run before the borrower's permit is released.
    fn return_connection(&self, mut conn: PooledConnection) {
        if conn.state != ConnectionState::Broken {
            let mut idle = self.idle_queue();
            if !self.is_closed() {
                conn.state = ConnectionState::Idle;
                conn.last_used = Instant::now();
                idle.push_back(conn);
                return;
            }
        }
        self.discard(conn);
    }

    fn discard(&self, conn: PooledConnection) {
        let live = self.live.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        if conn.state == ConnectionState::Broken {
            warn!(connection_id = conn.id, live, "Evicted broken connection");
        } else {
            debug!(connection_id = conn.id, live, "Discarded connection");
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    conn.conn.close().await;
                });
            }
            Err(_) => drop(conn),
        }
    }
}

/// A live-count slot claimed before connecting. Released again if the
/// connect fails or is cancelled.
struct SlotReservation<'a> {
    live: &'a AtomicUsize,
    committed: bool,
}

impl Drop for SlotReservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// RAII guard for a borrowed session.
///
/// Dropping the guard returns the session to the pool on every exit path,
/// including errors, panics, and cancellation. If the guard is dropped while
/// an operation is still running on the session (the caller's future was
/// cancelled or timed out), the session is considered broken and discarded.
pub struct ScopedConnection {
    pool: Arc<ConnectionPool>,
    conn: Option<PooledConnection>,
    // Dropped after `Drop::drop` has returned the session
    _permit: OwnedSemaphorePermit,
    in_flight: bool,
}

impl std::fmt::Debug for ScopedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedConnection")
            .field("conn", &self.conn)
            .field("in_flight", &self.in_flight)
            .finish_non_exhaustive()
    }
}

impl ScopedConnection {
    pub fn id(&self) -> u64 {
        self.conn.as_ref().map(|c| c.id).unwrap_or_default()
    }

    pub fn state(&self) -> ConnectionState {
        self.conn
            .as_ref()
            .map(|c| c.state)
            .unwrap_or(ConnectionState::Broken)
    }

    /// Flag the session so it is evicted instead of reused.
    pub fn mark_broken(&mut self) {
        if let Some(conn) = self.conn.as_mut() {
            conn.state = ConnectionState::Broken;
        }
    }

    pub async fn ping(&mut self) -> DbResult<()> {
        let Some(pooled) = self.conn.as_mut() else {
            return Err(DbError::internal("connection already released"));
        };
        self.in_flight = true;
        let result = pooled.conn.ping().await;
        self.finish(result)
    }

    pub async fn fetch(
        &mut self,
        sql: &str,
        params: &[QueryParam],
        row_limit: usize,
    ) -> DbResult<FetchedRows> {
        let Some(pooled) = self.conn.as_mut() else {
            return Err(DbError::internal("connection already released"));
        };
        self.in_flight = true;
        let result = pooled.conn.fetch(sql, params, row_limit).await;
        self.finish(result)
    }

    fn finish<T>(&mut self, result: DbResult<T>) -> DbResult<T> {
        self.in_flight = false;
        if let Err(e) = &result {
            if e.is_connection_fault() {
                self.mark_broken();
            }
        }
        result
    }
}

impl Drop for ScopedConnection {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        if self.in_flight {
            warn!(
                connection_id = conn.id,
                "Connection dropped mid-operation, discarding"
            );
            conn.state = ConnectionState::Broken;
        }
        self.pool.in_use.fetch_sub(1, Ordering::SeqCst);
        self.pool.return_connection(conn);
        self.pool.released.notify_waiters();
    }
}
