//! # Transaction Session
//!
//! A scoped batch of commands bound to one pooled connection. Commands are
//! buffered client-side. On `commit`, `MULTI` is sent and confirmed first,
//! then the buffer and `EXEC` go out as one pipelined exchange; `rollback`
//! discards the buffer without touching
//! the network. The connection goes back to the pool as soon as the session
//! finishes, and a session dropped while still open rolls back.
//!
//! ```text
//!            buffer
//!           ┌──────┐
//!           ▼      │
//!         Open ────┘
//!          │ │ └─ commit (io / abort) ─▶ Failed
//!   commit │ └── rollback / drop ──────▶ RolledBack
//!          ▼
//!      Committed
//! ```

use std::fmt;

use kvpool_common::{ClientError, ClientResult};
use tracing::{debug, warn};

use crate::command::{Command, Keyspace};
use crate::pool::PooledConnection;
use crate::reply::Reply;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Open,
    Committed,
    RolledBack,
    Failed,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionState::Open => "open",
            TransactionState::Committed => "committed",
            TransactionState::RolledBack => "rolled back",
            TransactionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

pub struct TransactionSession {
    conn: Option<PooledConnection>,
    keys: Keyspace,
    queued: Vec<Command>,
    state: TransactionState,
}

impl TransactionSession {
    pub(crate) fn open(conn: PooledConnection, keys: Keyspace) -> Self {
        debug!(id = ?conn.id(), "transaction opened");
        TransactionSession {
            conn: Some(conn),
            keys,
            queued: Vec::new(),
            state: TransactionState::Open,
        }
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Number of buffered commands.
    pub fn len(&self) -> usize {
        self.queued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }

    /// Appends a command to the buffer.
    pub fn buffer(&mut self, cmd: Command) -> ClientResult<&mut Self> {
        self.ensure_open("buffer")?;
        self.queued.push(cmd);
        Ok(self)
    }

    pub fn set(&mut self, key: &str, value: &str) -> ClientResult<&mut Self> {
        let cmd = self.keys.set(key, value);
        self.buffer(cmd)
    }

    pub fn setex(&mut self, key: &str, ttl_seconds: u64, value: &str) -> ClientResult<&mut Self> {
        let cmd = self.keys.setex(key, ttl_seconds, value)?;
        self.buffer(cmd)
    }

    pub fn incr(&mut self, key: &str) -> ClientResult<&mut Self> {
        let cmd = self.keys.incr(key);
        self.buffer(cmd)
    }

    pub fn incrby(&mut self, key: &str, delta: i64) -> ClientResult<&mut Self> {
        let cmd = self.keys.incrby(key, delta);
        self.buffer(cmd)
    }

    pub fn expire(&mut self, key: &str, ttl_seconds: u64) -> ClientResult<&mut Self> {
        let cmd = self.keys.expire(key, ttl_seconds);
        self.buffer(cmd)
    }

    pub fn lpush(&mut self, key: &str, value: &str) -> ClientResult<&mut Self> {
        let cmd = self.keys.lpush(key, value);
        self.buffer(cmd)
    }

    pub fn sadd(&mut self, key: &str, member: &str) -> ClientResult<&mut Self> {
        let cmd = self.keys.sadd(key, member);
        self.buffer(cmd)
    }

    pub fn hset(&mut self, key: &str, field: &str, value: &str) -> ClientResult<&mut Self> {
        let cmd = self.keys.hset(key, field, value);
        self.buffer(cmd)
    }

    pub fn hincrby(&mut self, key: &str, field: &str, delta: i64) -> ClientResult<&mut Self> {
        let cmd = self.keys.hincrby(key, field, delta);
        self.buffer(cmd)
    }

    /// Sends the buffered commands atomically and returns their replies in
    /// buffer order.
    ///
    /// Per-command error replies are returned in place; the store does not
    /// undo the rest of the batch for them. A transport failure, a rejected
    /// `MULTI`, or an aborted `EXEC` moves the session to `Failed` and
    /// returns `TransactionAborted`. When `MULTI` is rejected none of the
    /// buffered commands have been sent.
    pub fn commit(&mut self) -> ClientResult<Vec<Reply>> {
        self.ensure_open("commit")?;
        let queued = std::mem::take(&mut self.queued);
        // Taking the guard releases the connection when this call returns.
        let mut conn = match self.conn.take() {
            Some(conn) => conn,
            None => {
                self.state = TransactionState::Failed;
                return Err(ClientError::InvalidState("transaction has no connection".to_string()));
            }
        };

        if queued.is_empty() {
            self.state = TransactionState::Committed;
            return Ok(Vec::new());
        }

        let count = queued.len();
        let mut batch = queued;
        batch.push(Command::new("EXEC"));

        // A rejected MULTI must stop the buffered commands from running bare.
        let outcome = conn
            .send(&Command::new("MULTI"))
            .map_err(|err| ClientError::TransactionAborted(err.to_string()))
            .and_then(check_multi)
            .and_then(|()| {
                conn.send_batch(&batch)
                    .map_err(|err| ClientError::TransactionAborted(err.to_string()))
            })
            .and_then(|replies| decode_exec(replies, count));

        match outcome {
            Ok(replies) => {
                debug!(id = ?conn.id(), commands = count, "transaction committed");
                self.state = TransactionState::Committed;
                Ok(replies)
            }
            Err(err) => {
                warn!(id = ?conn.id(), error = %err, "transaction failed");
                self.state = TransactionState::Failed;
                Err(err)
            }
        }
    }

    /// Discards the buffer. Nothing is sent to the store.
    pub fn rollback(&mut self) -> ClientResult<()> {
        self.ensure_open("rollback")?;
        self.finish_rollback();
        Ok(())
    }

    fn finish_rollback(&mut self) {
        self.queued.clear();
        self.state = TransactionState::RolledBack;
        if let Some(conn) = self.conn.take() {
            debug!(id = ?conn.id(), "transaction rolled back");
        }
    }

    fn ensure_open(&self, op: &str) -> ClientResult<()> {
        if self.state != TransactionState::Open {
            return Err(ClientError::InvalidState(format!(
                "cannot {} a {} transaction",
                op, self.state
            )));
        }
        Ok(())
    }
}

impl Drop for TransactionSession {
    fn drop(&mut self) {
        if self.state == TransactionState::Open {
            self.finish_rollback();
        }
    }
}

impl fmt::Debug for TransactionSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionSession")
            .field("state", &self.state)
            .field("queued", &self.queued)
            .finish()
    }
}

fn check_multi(reply: Reply) -> ClientResult<()> {
    match reply {
        Reply::Error(message) => Err(ClientError::TransactionAborted(format!(
            "MULTI rejected, nothing sent: {}",
            message
        ))),
        _ => Ok(()),
    }
}

/// Checks the `QUEUED`…, `EXEC` reply sequence and extracts the per-command
/// results.
fn decode_exec(mut replies: Vec<Reply>, count: usize) -> ClientResult<Vec<Reply>> {
    if replies.len() != count + 1 {
        return Err(ClientError::TransactionAborted(format!(
            "expected {} replies, got {}",
            count + 1,
            replies.len()
        )));
    }

    let exec = replies.pop().unwrap_or(Reply::Nil);
    match exec {
        Reply::Array(results) if results.len() == count => Ok(results),
        Reply::Array(results) => Err(ClientError::TransactionAborted(format!(
            "EXEC returned {} results for {} commands",
            results.len(),
            count
        ))),
        Reply::Nil => Err(ClientError::TransactionAborted(
            "EXEC returned nil".to_string(),
        )),
        Reply::Error(message) => Err(ClientError::TransactionAborted(message)),
        other => Err(ClientError::TransactionAborted(format!(
            "unexpected EXEC reply of type {}",
            other.kind()
        ))),
    }
}
