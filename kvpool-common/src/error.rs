//! # Error Taxonomy
//!
//! Errors shared by the pool, the connection layer, and the typed client.
//! Every failure is returned to the immediate caller; nothing here retries.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for client, pool, and transaction operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Socket phase that exceeded its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPhase {
    Connect,
    Read,
    Write,
}

impl fmt::Display for TimeoutPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self {
            TimeoutPhase::Connect => "connect",
            TimeoutPhase::Read => "read",
            TimeoutPhase::Write => "write",
        };
        f.write_str(phase)
    }
}

/// Errors surfaced by the pooled client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Dialing the store failed.
    #[error("connect to {addr} failed: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// A connect, read, or write deadline elapsed.
    #[error("{0} timed out")]
    Timeout(TimeoutPhase),

    /// Socket failure other than a timeout.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// No connection became available within the wait bound.
    #[error("connection pool exhausted")]
    PoolExhausted,

    /// The pool was shut down.
    #[error("connection pool closed")]
    PoolClosed,

    /// Reply framing or shape does not match what the command produces.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Reply tag is not the one the typed accessor expects.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// Caller-supplied value is out of contract; nothing was sent.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The store replied with an error.
    #[error("server error: {0}")]
    Server(String),

    /// A transaction could not be committed.
    #[error("transaction aborted: {0}")]
    TransactionAborted(String),

    /// Transaction session used after it finished.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A connection was handed back to the pool twice.
    #[error("connection released twice")]
    DoubleRelease,
}

impl ClientError {
    /// Returns true when the connection that produced this error can no
    /// longer be trusted and must be closed instead of recycled.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_) | ClientError::Timeout(_) | ClientError::ProtocolViolation(_)
        )
    }

    /// Maps a socket error to `Timeout` when the OS reports an expired deadline.
    pub fn from_io(err: io::Error, phase: TimeoutPhase) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => ClientError::Timeout(phase),
            _ => ClientError::Io(err),
        }
    }
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config section [stores.{0}] not found")]
    MissingSection(String),

    #[error("invalid `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}
