//! # Connection Pool
//!
//! Purpose: Keep a bounded set of reusable connections to one store target.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Idle connections are reused, most recent first.
//! 2. **Minimal Locking**: The mutex guards only the idle list, the checked-out
//!    set, and the closed flag. Dialing and closing happen outside it.
//! 3. **Bounded Waiting**: An exhausted pool fails immediately for a zero
//!    timeout, otherwise waits on a condition variable until a slot frees up
//!    or the deadline passes.
//! 4. **Lazy Eviction**: Stale idle connections are swept on `acquire`; there
//!    is no background reaper.
//! 5. **RAII Release**: `PooledConnection` hands its connection back on drop.
//!
//! ## Invariants
//!
//! - `checked_out.len() + idle.len() <= max_active` after every mutation.
//! - A connection id is either in `checked_out` or in `idle`, never both, and
//!   is only ever held by one `PooledConnection`.
//!
//! ```text
//! Pool (Arc)
//!   └── PoolInner
//!         ├── config / dial options / transport
//!         ├── state: Mutex<PoolState>
//!         │     ├── idle: VecDeque<Connection>   (front = most recently used)
//!         │     ├── checked_out: HashSet<ConnectionId>
//!         │     └── closed
//!         └── available: Condvar
//! ```

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use kvpool_common::{ClientError, ClientResult, StoreConfig};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::command::Command;
use crate::connection::{Connection, ConnectionId};
use crate::reply::Reply;
use crate::transport::{DialOptions, TcpTransport, Transport};

/// Point-in-time view of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections currently borrowed (or being dialed for a borrower).
    pub active: usize,
    /// Connections parked for reuse.
    pub idle: usize,
    pub max_active: usize,
    pub max_idle: usize,
    pub closed: bool,
}

struct PoolState {
    idle: VecDeque<Connection>,
    checked_out: HashSet<ConnectionId>,
    next_id: u64,
    closed: bool,
}

impl PoolState {
    fn open_count(&self) -> usize {
        self.checked_out.len() + self.idle.len()
    }

    /// Reserves a slot for a connection that is about to be dialed.
    fn reserve(&mut self) -> ConnectionId {
        self.next_id += 1;
        let id = ConnectionId(self.next_id);
        self.checked_out.insert(id);
        id
    }

    /// Moves idle connections older than `max_age` into `stale`.
    fn evict_stale(&mut self, now: Instant, max_age: Duration, stale: &mut Vec<Connection>) {
        // Oldest entries sit at the back.
        while let Some(conn) = self.idle.back() {
            if conn.idle_for(now) <= max_age {
                break;
            }
            if let Some(conn) = self.idle.pop_back() {
                stale.push(conn);
            }
        }
    }
}

struct PoolInner {
    config: StoreConfig,
    dial: DialOptions,
    transport: Arc<dyn Transport>,
    state: Mutex<PoolState>,
    available: Condvar,
}

enum Checkout {
    Reused(Connection),
    Dial(ConnectionId),
}

/// Connection pool handle. Cloning shares the same pool.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    /// Creates a pool that dials the configured address over TCP.
    pub fn new(config: StoreConfig) -> ClientResult<Self> {
        Self::with_transport(config, Arc::new(TcpTransport))
    }

    /// Creates a pool on a custom transport.
    ///
    /// No connection is dialed until the first `acquire`.
    pub fn with_transport(config: StoreConfig, transport: Arc<dyn Transport>) -> ClientResult<Self> {
        config
            .validate()
            .map_err(|err| ClientError::InvalidArgument(err.to_string()))?;

        let state = PoolState {
            idle: VecDeque::with_capacity(config.effective_max_idle()),
            checked_out: HashSet::with_capacity(config.max_active),
            next_id: 0,
            closed: false,
        };
        Ok(Pool {
            inner: Arc::new(PoolInner {
                dial: DialOptions::from(&config),
                config,
                transport,
                state: Mutex::new(state),
                available: Condvar::new(),
            }),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Acquires a connection, waiting up to the configured `wait_timeout`.
    pub fn get(&self) -> ClientResult<PooledConnection> {
        self.acquire(self.inner.config.wait_timeout())
    }

    /// Acquires a connection, waiting at most `timeout` when exhausted.
    ///
    /// A zero timeout never blocks. Dial failures free the reserved slot and
    /// surface as `ConnectFailed` (or `Timeout` for a connect timeout).
    pub fn acquire(&self, timeout: Duration) -> ClientResult<PooledConnection> {
        let deadline = Instant::now().checked_add(timeout);
        let mut stale = Vec::new();
        let checkout = self.checkout(deadline, &mut stale);
        close_connections(stale);

        match checkout? {
            Checkout::Reused(conn) => {
                debug!(id = %conn.id(), "reusing idle connection");
                Ok(PooledConnection::new(self.clone(), conn))
            }
            Checkout::Dial(id) => self.dial(id),
        }
    }

    /// Returns a snapshot of pool occupancy.
    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        PoolStats {
            active: state.checked_out.len(),
            idle: state.idle.len(),
            max_active: self.inner.config.max_active,
            max_idle: self.inner.config.effective_max_idle(),
            closed: state.closed,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Shuts the pool down.
    ///
    /// Idle connections are closed now, borrowed ones when they come back,
    /// and every later `acquire` fails with `PoolClosed`. Waiters are woken.
    pub fn close_all(&self) {
        let drained: Vec<Connection> = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.idle.drain(..).collect()
        };
        self.inner.available.notify_all();
        info!(
            address = %self.inner.config.address,
            idle_closed = drained.len(),
            "connection pool closed"
        );
        close_connections(drained);
    }

    fn checkout(&self, deadline: Option<Instant>, stale: &mut Vec<Connection>) -> ClientResult<Checkout> {
        let max_age = self.inner.config.idle_timeout();
        let mut state = self.inner.state.lock();
        loop {
            if state.closed {
                return Err(ClientError::PoolClosed);
            }

            let now = Instant::now();
            if let Some(max_age) = max_age {
                state.evict_stale(now, max_age, stale);
            }

            if let Some(mut conn) = state.idle.pop_front() {
                conn.mark_in_use();
                state.checked_out.insert(conn.id());
                return Ok(Checkout::Reused(conn));
            }

            if state.open_count() < self.inner.config.max_active {
                return Ok(Checkout::Dial(state.reserve()));
            }

            match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(now);
                    if remaining.is_zero() {
                        return Err(ClientError::PoolExhausted);
                    }
                    // Timed-out waiters leave the condvar queue on their own.
                    self.inner.available.wait_for(&mut state, remaining);
                }
                None => self.inner.available.wait(&mut state),
            }
        }
    }

    fn dial(&self, id: ConnectionId) -> ClientResult<PooledConnection> {
        let opened = Connection::open(
            id,
            self.inner.transport.as_ref(),
            &self.inner.dial,
            self.inner.config.database,
        );
        match opened {
            Ok(conn) => {
                debug!(id = %id, address = %self.inner.dial.address, "dialed new connection");
                Ok(PooledConnection::new(self.clone(), conn))
            }
            Err(err) => {
                warn!(id = %id, address = %self.inner.dial.address, error = %err, "dial failed");
                self.inner.state.lock().checked_out.remove(&id);
                self.inner.available.notify_one();
                Err(err)
            }
        }
    }

    /// Takes a borrowed connection back.
    ///
    /// Healthy connections are parked while idle capacity allows; everything
    /// else is closed and its slot freed. A connection that is not checked out
    /// is closed without touching the counters.
    fn check_in(&self, mut conn: Connection) -> ClientResult<()> {
        let id = conn.id();
        let discard = {
            let mut state = self.inner.state.lock();
            if !state.checked_out.remove(&id) {
                drop(state);
                conn.close();
                return Err(ClientError::DoubleRelease);
            }
            let keep = !state.closed
                && conn.is_healthy()
                && state.idle.len() < self.inner.config.effective_max_idle();
            if keep {
                conn.mark_idle();
                state.idle.push_front(conn);
                None
            } else {
                Some(conn)
            }
        };
        self.inner.available.notify_one();

        if let Some(mut conn) = discard {
            if conn.is_healthy() {
                debug!(id = %id, "closing surplus connection");
            } else {
                warn!(id = %id, "discarding broken connection");
            }
            conn.close();
        }
        Ok(())
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("address", &self.inner.config.address)
            .field("stats", &self.stats())
            .finish()
    }
}

fn close_connections(conns: Vec<Connection>) {
    for mut conn in conns {
        debug!(id = %conn.id(), "closing idle connection");
        conn.close();
    }
}

/// RAII wrapper returning a connection to the pool on drop.
pub struct PooledConnection {
    pool: Pool,
    conn: Option<Connection>,
}

impl PooledConnection {
    fn new(pool: Pool, conn: Connection) -> Self {
        PooledConnection {
            pool,
            conn: Some(conn),
        }
    }

    pub fn id(&self) -> Option<ConnectionId> {
        self.conn.as_ref().map(Connection::id)
    }

    pub fn is_healthy(&self) -> bool {
        self.conn.as_ref().map_or(false, Connection::is_healthy)
    }

    /// Executes one command on the borrowed connection.
    pub fn send(&mut self, cmd: &Command) -> ClientResult<Reply> {
        self.connection()?.send(cmd)
    }

    /// Executes several commands in one exchange.
    pub fn send_batch(&mut self, cmds: &[Command]) -> ClientResult<Vec<Reply>> {
        self.connection()?.send_batch(cmds)
    }

    /// Hands the connection back now instead of at end of scope.
    pub fn release(mut self) -> ClientResult<()> {
        match self.conn.take() {
            Some(conn) => self.pool.check_in(conn),
            None => Err(ClientError::DoubleRelease),
        }
    }

    fn connection(&mut self) -> ClientResult<&mut Connection> {
        self.conn
            .as_mut()
            .ok_or_else(|| ClientError::InvalidState("connection already released".to_string()))
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id())
            .field("healthy", &self.is_healthy())
            .finish()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err(err) = self.pool.check_in(conn) {
                warn!(error = %err, "connection release failed");
            }
        }
    }
}
