//! # Client API
//!
//! Purpose: Expose a compact, blocking API for issuing commands through a
//! shared pool.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `Client` hides pooling and protocol details.
//! 2. **Borrowed Pool**: The client holds a reference to a pool owned by the
//!    caller's composition root; it has no state of its own beyond the key
//!    namespace.
//! 3. **Scoped Acquisition**: Each call acquires a connection, runs one
//!    command, and the connection goes back to the pool when the guard drops,
//!    including on decode errors.
//! 4. **No Retries**: Failures go straight back to the caller.

use std::collections::{BTreeSet, HashMap};

use kvpool_common::ClientResult;

use crate::command::{Command, Keyspace};
use crate::pool::Pool;
use crate::reply::Reply;
use crate::transaction::TransactionSession;

/// Typed command surface over a borrowed pool.
#[derive(Debug, Clone)]
pub struct Client<'p> {
    pool: &'p Pool,
    keys: Keyspace,
}

impl<'p> Client<'p> {
    /// Creates a client using the pool's configured key prefix.
    pub fn new(pool: &'p Pool) -> Self {
        Client {
            keys: Keyspace::new(pool.config().key_prefix.clone()),
            pool,
        }
    }

    pub fn pool(&self) -> &'p Pool {
        self.pool
    }

    pub fn keyspace(&self) -> &Keyspace {
        &self.keys
    }

    /// Runs an arbitrary command and returns the raw reply.
    pub fn query(&self, cmd: &Command) -> ClientResult<Reply> {
        let mut conn = self.pool.get()?;
        conn.send(cmd)
    }

    /// Pings the server. Returns the status text, normally `PONG`.
    pub fn ping(&self) -> ClientResult<String> {
        self.query(&self.keys.ping())?.into_status()
    }

    /// Sets a value. Returns true when the store accepted it.
    pub fn set(&self, key: &str, value: &str) -> ClientResult<bool> {
        self.query(&self.keys.set(key, value))?.into_bool()
    }

    /// Fetches a value by key.
    ///
    /// Returns `Ok(None)` when the key is missing.
    pub fn get(&self, key: &str) -> ClientResult<Option<String>> {
        self.query(&self.keys.get(key))?.into_optional_string()
    }

    /// Sets a value that expires after `ttl_seconds`. Returns the status text.
    pub fn setex(&self, key: &str, ttl_seconds: u64, value: &str) -> ClientResult<String> {
        let cmd = self.keys.setex(key, ttl_seconds, value)?;
        self.query(&cmd)?.into_status()
    }

    /// Sets a value only if the key is absent. Returns true when it was set.
    pub fn setnx(&self, key: &str, value: &str) -> ClientResult<bool> {
        self.query(&self.keys.setnx(key, value))?.into_bool()
    }

    pub fn incr(&self, key: &str) -> ClientResult<i64> {
        self.query(&self.keys.incr(key))?.into_integer()
    }

    pub fn incrby(&self, key: &str, delta: i64) -> ClientResult<i64> {
        self.query(&self.keys.incrby(key, delta))?.into_integer()
    }

    /// Sets one bit and returns its previous value.
    ///
    /// A negative offset or a value other than 0/1 fails with
    /// `InvalidArgument` before a connection is acquired.
    pub fn setbit(&self, key: &str, offset: i64, value: u8) -> ClientResult<i64> {
        let cmd = self.keys.setbit(key, offset, value)?;
        self.query(&cmd)?.into_integer()
    }

    pub fn getbit(&self, key: &str, offset: i64) -> ClientResult<i64> {
        let cmd = self.keys.getbit(key, offset)?;
        self.query(&cmd)?.into_integer()
    }

    pub fn exists(&self, key: &str) -> ClientResult<bool> {
        self.query(&self.keys.exists(key))?.into_bool()
    }

    /// Sets a time-to-live. Returns false when the key does not exist.
    pub fn expire(&self, key: &str, ttl_seconds: u64) -> ClientResult<bool> {
        self.query(&self.keys.expire(key, ttl_seconds))?.into_bool()
    }

    /// Pushes to the head of a list. Returns the new length.
    pub fn lpush(&self, key: &str, value: &str) -> ClientResult<i64> {
        self.query(&self.keys.lpush(key, value))?.into_integer()
    }

    /// Pops from the tail of a list; `None` when the list is empty or absent.
    pub fn rpop(&self, key: &str) -> ClientResult<Option<String>> {
        self.query(&self.keys.rpop(key))?.into_optional_string()
    }

    pub fn llen(&self, key: &str) -> ClientResult<u64> {
        self.query(&self.keys.llen(key))?.into_unsigned()
    }

    /// Adds a set member. Returns true when it was not already present.
    pub fn sadd(&self, key: &str, member: &str) -> ClientResult<bool> {
        self.query(&self.keys.sadd(key, member))?.into_bool()
    }

    pub fn smembers(&self, key: &str) -> ClientResult<BTreeSet<String>> {
        self.query(&self.keys.smembers(key))?.into_string_set()
    }

    /// Sets a hash field. Returns true when the field was newly created.
    pub fn hset(&self, key: &str, field: &str, value: &str) -> ClientResult<bool> {
        self.query(&self.keys.hset(key, field, value))?.into_bool()
    }

    pub fn hget(&self, key: &str, field: &str) -> ClientResult<Option<String>> {
        self.query(&self.keys.hget(key, field))?.into_optional_string()
    }

    /// Sets several hash fields at once. Returns the status text.
    pub fn hmset(&self, key: &str, pairs: &[(&str, &str)]) -> ClientResult<String> {
        let cmd = self.keys.hmset(key, pairs)?;
        self.query(&cmd)?.into_status()
    }

    pub fn hgetall(&self, key: &str) -> ClientResult<HashMap<String, String>> {
        self.query(&self.keys.hgetall(key))?.into_string_map()
    }

    /// Like `hgetall`, but every value must be an integer.
    pub fn hgetall_int(&self, key: &str) -> ClientResult<HashMap<String, i64>> {
        self.query(&self.keys.hgetall(key))?.into_integer_map()
    }

    pub fn hexists(&self, key: &str, field: &str) -> ClientResult<bool> {
        self.query(&self.keys.hexists(key, field))?.into_bool()
    }

    pub fn hincrby(&self, key: &str, field: &str, delta: i64) -> ClientResult<i64> {
        self.query(&self.keys.hincrby(key, field, delta))?.into_integer()
    }

    /// Lists keys matching `pattern`, sent exactly as given.
    pub fn keys(&self, pattern: &str) -> ClientResult<Vec<String>> {
        self.query(&self.keys.keys(pattern))?.into_strings()
    }

    /// Starts a transaction holding one connection until it finishes.
    pub fn multi(&self) -> ClientResult<TransactionSession> {
        let conn = self.pool.get()?;
        Ok(TransactionSession::open(conn, self.keys.clone()))
    }
}
