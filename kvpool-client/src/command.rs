//! # Commands
//!
//! `Command` is one protocol request: a name followed by binary-safe
//! arguments. `Keyspace` builds the typed command surface and applies the
//! configured key prefix, so the client and transaction sessions issue
//! byte-identical requests.

use std::fmt;

use kvpool_common::{ClientError, ClientResult};

/// Largest bit offset the store accepts (bitmaps are capped at 512 MB).
pub const MAX_BIT_OFFSET: i64 = u32::MAX as i64;

/// A single request: command name plus arguments.
#[derive(Clone, PartialEq, Eq)]
pub struct Command {
    parts: Vec<Vec<u8>>,
}

impl Command {
    /// Starts a command with the given name.
    pub fn new(name: &str) -> Self {
        Command {
            parts: vec![name.as_bytes().to_vec()],
        }
    }

    /// Appends a binary-safe argument.
    pub fn arg(mut self, arg: impl AsRef<[u8]>) -> Self {
        self.parts.push(arg.as_ref().to_vec());
        self
    }

    /// Appends a number formatted in decimal.
    pub fn num(mut self, value: impl Into<i128>) -> Self {
        self.parts.push(value.into().to_string().into_bytes());
        self
    }

    /// Command name as sent on the wire.
    pub fn name(&self) -> &[u8] {
        &self.parts[0]
    }

    /// Name followed by every argument.
    pub fn parts(&self) -> &[Vec<u8>] {
        &self.parts
    }

    /// Arguments without the name.
    pub fn args(&self) -> &[Vec<u8>] {
        &self.parts[1..]
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        for part in &self.parts {
            list.entry(&String::from_utf8_lossy(part));
        }
        list.finish()
    }
}

/// Command factory bound to a key namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keyspace {
    prefix: String,
}

impl Keyspace {
    /// Creates a keyspace; an empty prefix leaves keys untouched.
    pub fn new(prefix: impl Into<String>) -> Self {
        Keyspace {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Returns the wire form of `key` (`<prefix>:<key>` when prefixed).
    pub fn key(&self, key: &str) -> Vec<u8> {
        if self.prefix.is_empty() {
            return key.as_bytes().to_vec();
        }
        let mut out = Vec::with_capacity(self.prefix.len() + 1 + key.len());
        out.extend_from_slice(self.prefix.as_bytes());
        out.push(b':');
        out.extend_from_slice(key.as_bytes());
        out
    }

    pub fn ping(&self) -> Command {
        Command::new("PING")
    }

    pub fn set(&self, key: &str, value: &str) -> Command {
        Command::new("SET").arg(self.key(key)).arg(value)
    }

    pub fn get(&self, key: &str) -> Command {
        Command::new("GET").arg(self.key(key))
    }

    pub fn setex(&self, key: &str, ttl_seconds: u64, value: &str) -> ClientResult<Command> {
        if ttl_seconds == 0 {
            return Err(ClientError::InvalidArgument(
                "SETEX ttl must be greater than zero".to_string(),
            ));
        }
        Ok(Command::new("SETEX")
            .arg(self.key(key))
            .num(ttl_seconds)
            .arg(value))
    }

    pub fn setnx(&self, key: &str, value: &str) -> Command {
        Command::new("SETNX").arg(self.key(key)).arg(value)
    }

    pub fn incr(&self, key: &str) -> Command {
        Command::new("INCR").arg(self.key(key))
    }

    pub fn incrby(&self, key: &str, delta: i64) -> Command {
        Command::new("INCRBY").arg(self.key(key)).num(delta)
    }

    /// Builds SETBIT; rejects a negative or oversized offset and any value
    /// other than 0 or 1 before anything is sent.
    pub fn setbit(&self, key: &str, offset: i64, value: u8) -> ClientResult<Command> {
        check_bit_offset(offset)?;
        if value > 1 {
            return Err(ClientError::InvalidArgument(format!(
                "bit value must be 0 or 1, got {}",
                value
            )));
        }
        Ok(Command::new("SETBIT")
            .arg(self.key(key))
            .num(offset)
            .num(value))
    }

    pub fn getbit(&self, key: &str, offset: i64) -> ClientResult<Command> {
        check_bit_offset(offset)?;
        Ok(Command::new("GETBIT").arg(self.key(key)).num(offset))
    }

    pub fn exists(&self, key: &str) -> Command {
        Command::new("EXISTS").arg(self.key(key))
    }

    pub fn expire(&self, key: &str, ttl_seconds: u64) -> Command {
        Command::new("EXPIRE").arg(self.key(key)).num(ttl_seconds)
    }

    pub fn lpush(&self, key: &str, value: &str) -> Command {
        Command::new("LPUSH").arg(self.key(key)).arg(value)
    }

    pub fn rpop(&self, key: &str) -> Command {
        Command::new("RPOP").arg(self.key(key))
    }

    pub fn llen(&self, key: &str) -> Command {
        Command::new("LLEN").arg(self.key(key))
    }

    pub fn sadd(&self, key: &str, member: &str) -> Command {
        Command::new("SADD").arg(self.key(key)).arg(member)
    }

    pub fn smembers(&self, key: &str) -> Command {
        Command::new("SMEMBERS").arg(self.key(key))
    }

    pub fn hset(&self, key: &str, field: &str, value: &str) -> Command {
        Command::new("HSET").arg(self.key(key)).arg(field).arg(value)
    }

    pub fn hget(&self, key: &str, field: &str) -> Command {
        Command::new("HGET").arg(self.key(key)).arg(field)
    }

    /// Builds HMSET from typed field/value pairs; at least one pair is required.
    pub fn hmset(&self, key: &str, pairs: &[(&str, &str)]) -> ClientResult<Command> {
        if pairs.is_empty() {
            return Err(ClientError::InvalidArgument(
                "HMSET needs at least one field/value pair".to_string(),
            ));
        }
        let mut cmd = Command::new("HMSET").arg(self.key(key));
        for (field, value) in pairs {
            cmd = cmd.arg(field).arg(value);
        }
        Ok(cmd)
    }

    pub fn hgetall(&self, key: &str) -> Command {
        Command::new("HGETALL").arg(self.key(key))
    }

    pub fn hexists(&self, key: &str, field: &str) -> Command {
        Command::new("HEXISTS").arg(self.key(key)).arg(field)
    }

    pub fn hincrby(&self, key: &str, field: &str, delta: i64) -> Command {
        Command::new("HINCRBY").arg(self.key(key)).arg(field).num(delta)
    }

    /// KEYS with the caller's pattern, unmodified.
    pub fn keys(&self, pattern: &str) -> Command {
        Command::new("KEYS").arg(pattern)
    }
}

fn check_bit_offset(offset: i64) -> ClientResult<()> {
    if !(0..=MAX_BIT_OFFSET).contains(&offset) {
        return Err(ClientError::InvalidArgument(format!(
            "bit offset must be within 0..={}, got {}",
            MAX_BIT_OFFSET, offset
        )));
    }
    Ok(())
}
