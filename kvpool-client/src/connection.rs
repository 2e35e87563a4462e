//! # Connection
//!
//! A logical session to the store: identity, lifecycle state, last-used time,
//! and health. Any transport failure marks the connection unhealthy so the
//! pool closes it instead of recycling it.

use std::fmt;
use std::io;
use std::time::{Duration, Instant};

use kvpool_common::{ClientError, ClientResult};

use crate::command::Command;
use crate::reply::Reply;
use crate::transport::{DialOptions, RawConnection, Transport};

/// Pool-unique connection identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub(crate) u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    InUse,
    Closed,
}

pub struct Connection {
    id: ConnectionId,
    raw: Box<dyn RawConnection>,
    state: ConnectionState,
    last_used: Instant,
    healthy: bool,
}

impl Connection {
    /// Dials the store and selects `database` when it is not the default.
    ///
    /// The new connection starts `InUse`, owned by whoever asked for it.
    pub(crate) fn open(
        id: ConnectionId,
        transport: &dyn Transport,
        options: &DialOptions,
        database: u32,
    ) -> ClientResult<Self> {
        let raw = transport.dial(options)?;
        let mut conn = Connection {
            id,
            raw,
            state: ConnectionState::InUse,
            last_used: Instant::now(),
            healthy: true,
        };

        if database != 0 {
            let select = Command::new("SELECT").num(database);
            if let Err(err) = conn.send(&select).and_then(Reply::into_status) {
                conn.close();
                return Err(err);
            }
        }
        Ok(conn)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy && self.state != ConnectionState::Closed
    }

    /// Issues one command and returns its decoded reply.
    ///
    /// An error reply from the store is `Ok(Reply::Error(..))`; only
    /// transport and framing failures are `Err`, and those poison the
    /// connection.
    pub fn send(&mut self, cmd: &Command) -> ClientResult<Reply> {
        self.ensure_open()?;
        let result = self.raw.exchange(cmd);
        self.track(&result);
        result
    }

    /// Issues several commands in one exchange, replies in command order.
    pub fn send_batch(&mut self, cmds: &[Command]) -> ClientResult<Vec<Reply>> {
        self.ensure_open()?;
        let result = self.raw.exchange_batch(cmds);
        self.track(&result);
        result
    }

    /// Shuts the transport down. Safe to call more than once.
    pub fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.raw.shutdown();
        self.state = ConnectionState::Closed;
    }

    pub(crate) fn mark_in_use(&mut self) {
        self.state = ConnectionState::InUse;
    }

    pub(crate) fn mark_idle(&mut self) {
        self.state = ConnectionState::Idle;
        self.last_used = Instant::now();
    }

    pub(crate) fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_used)
    }

    fn ensure_open(&self) -> ClientResult<()> {
        if self.state == ConnectionState::Closed {
            return Err(ClientError::Io(io::Error::new(
                io::ErrorKind::NotConnected,
                format!("{} is closed", self.id),
            )));
        }
        Ok(())
    }

    fn track<T>(&mut self, result: &ClientResult<T>) {
        self.last_used = Instant::now();
        if let Err(err) = result {
            if err.is_connection_fatal() {
                self.healthy = false;
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("healthy", &self.healthy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::transport::mock::MockTransport;

    fn options() -> DialOptions {
        DialOptions {
            address: "mock:0".to_string(),
            connect_timeout: None,
            read_timeout: None,
            write_timeout: None,
        }
    }

    #[test]
    fn close_is_idempotent() {
        let transport = MockTransport::new();
        let mut conn = Connection::open(ConnectionId(1), &transport, &options(), 0).unwrap();
        conn.close();
        conn.close();
        drop(conn);
        assert_eq!(transport.counters.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn transport_failure_marks_unhealthy() {
        let transport = MockTransport::new();
        let mut conn = Connection::open(ConnectionId(1), &transport, &options(), 0).unwrap();
        assert!(conn.send(&Command::new("PING")).is_ok());
        assert!(conn.is_healthy());
        assert!(conn.send(&Command::new("FAIL")).is_err());
        assert!(!conn.is_healthy());
    }

    #[test]
    fn send_after_close_fails() {
        let transport = MockTransport::new();
        let mut conn = Connection::open(ConnectionId(1), &transport, &options(), 0).unwrap();
        conn.close();
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(matches!(conn.send(&Command::new("PING")), Err(ClientError::Io(_))));
    }

    #[test]
    fn selects_non_default_database() {
        let transport = MockTransport::new();
        let _conn = Connection::open(ConnectionId(1), &transport, &options(), 3).unwrap();
        let log = transport.counters.log.lock();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].name(), b"SELECT");
        assert_eq!(log[0].args(), &[b"3".to_vec()]);
    }

    #[test]
    fn default_database_skips_select() {
        let transport = MockTransport::new();
        let _conn = Connection::open(ConnectionId(1), &transport, &options(), 0).unwrap();
        assert!(transport.counters.log.lock().is_empty());
    }
}
