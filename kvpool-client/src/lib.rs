//! # kvpool Sync Client
//!
//! Purpose: Provide a blocking, connection-pooled client for a
//! Redis-compatible key-value store, with typed command methods and scoped
//! transactions.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Reuse TCP connections to avoid repeated connects.
//! 2. **Explicit Ownership**: The caller constructs and owns the `Pool`;
//!    clients borrow it. There is no process-wide singleton.
//! 3. **Typed Decoding**: Replies are converted into method-specific types,
//!    with shape errors reported instead of guessed around.
//! 4. **Protocol Clarity**: Encode/parse RESP explicitly for correctness.
//!
//! ## Usage
//!
//! ```no_run
//! use kvpool_client::{Client, Pool};
//! use kvpool_common::StoreConfig;
//!
//! let config = StoreConfig::load("kvpool.toml", "session").expect("config");
//! let pool = Pool::new(config).expect("pool");
//! let client = Client::new(&pool);
//!
//! client.set("greeting", "hello").expect("set");
//! assert_eq!(client.get("greeting").expect("get"), Some("hello".to_string()));
//!
//! let mut tx = client.multi().expect("multi");
//! tx.set("a", "1").expect("buffer").incr("a").expect("buffer");
//! let replies = tx.commit().expect("commit");
//! assert_eq!(replies.len(), 2);
//! ```

mod client;
mod command;
mod connection;
mod pool;
mod reply;
mod resp;
mod transaction;
mod transport;

pub use client::Client;
pub use command::{Command, Keyspace, MAX_BIT_OFFSET};
pub use connection::{Connection, ConnectionId, ConnectionState};
pub use pool::{Pool, PoolStats, PooledConnection};
pub use reply::Reply;
pub use transaction::{TransactionSession, TransactionState};
pub use transport::{DialOptions, RawConnection, TcpTransport, Transport};

pub use kvpool_common::{ClientError, ClientResult, StoreConfig, TimeoutPhase};
