//! # Transport
//!
//! Purpose: Isolate dialing and byte-level exchange behind two small traits so
//! the pool and connection logic never touch sockets directly.
//!
//! ## Design Principles
//! 1. **Strategy Pattern**: `Transport` is swappable; `TcpTransport` speaks
//!    RESP over TCP, tests plug in scripted transports.
//! 2. **Buffer Reuse**: Each TCP connection keeps its own read/write buffers.
//! 3. **Pipelined Batches**: A batch is written in one go and its replies are
//!    read back in order.

use std::io::{BufReader, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use bytes::BytesMut;
use kvpool_common::{ClientError, ClientResult, StoreConfig, TimeoutPhase};

use crate::command::Command;
use crate::reply::Reply;
use crate::resp::{encode_command, read_reply};

/// Socket-level settings handed to a transport when dialing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialOptions {
    pub address: String,
    pub connect_timeout: Option<Duration>,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
}

impl From<&StoreConfig> for DialOptions {
    fn from(config: &StoreConfig) -> Self {
        DialOptions {
            address: config.address.clone(),
            connect_timeout: config.connect_timeout(),
            read_timeout: config.read_timeout(),
            write_timeout: config.write_timeout(),
        }
    }
}

/// Opens raw sessions to a store.
pub trait Transport: Send + Sync {
    fn dial(&self, options: &DialOptions) -> ClientResult<Box<dyn RawConnection>>;
}

/// One raw session. Not reentrant: one exchange at a time.
pub trait RawConnection: Send {
    /// Sends one command and reads its reply.
    fn exchange(&mut self, cmd: &Command) -> ClientResult<Reply>;

    /// Sends several commands and reads their replies in order.
    fn exchange_batch(&mut self, cmds: &[Command]) -> ClientResult<Vec<Reply>> {
        cmds.iter().map(|cmd| self.exchange(cmd)).collect()
    }

    /// Releases the underlying transport. Must be idempotent.
    fn shutdown(&mut self);
}

/// RESP-over-TCP transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransport;

impl Transport for TcpTransport {
    fn dial(&self, options: &DialOptions) -> ClientResult<Box<dyn RawConnection>> {
        Ok(Box::new(TcpConnection::connect(options)?))
    }
}

/// Single TCP session with reusable buffers.
struct TcpConnection {
    // Buffered reader reduces syscalls while still allowing direct writes.
    reader: BufReader<TcpStream>,
    line_buf: Vec<u8>,
    write_buf: BytesMut,
    closed: bool,
}

impl TcpConnection {
    fn connect(options: &DialOptions) -> ClientResult<Self> {
        let stream = connect_stream(options)?;
        let setup = |stream: &TcpStream| -> std::io::Result<()> {
            stream.set_read_timeout(options.read_timeout)?;
            stream.set_write_timeout(options.write_timeout)?;
            // Disable Nagle to keep request latency low for small payloads.
            stream.set_nodelay(true)
        };
        setup(&stream).map_err(|source| ClientError::ConnectFailed {
            addr: options.address.clone(),
            source,
        })?;

        Ok(TcpConnection {
            reader: BufReader::new(stream),
            line_buf: Vec::with_capacity(128),
            write_buf: BytesMut::with_capacity(256),
            closed: false,
        })
    }

    fn flush_writes(&mut self) -> ClientResult<()> {
        let stream = self.reader.get_mut();
        stream
            .write_all(&self.write_buf)
            .and_then(|_| stream.flush())
            .map_err(|err| ClientError::from_io(err, TimeoutPhase::Write))
    }
}

impl RawConnection for TcpConnection {
    fn exchange(&mut self, cmd: &Command) -> ClientResult<Reply> {
        self.write_buf.clear();
        encode_command(cmd, &mut self.write_buf);
        self.flush_writes()?;
        read_reply(&mut self.reader, &mut self.line_buf)
    }

    fn exchange_batch(&mut self, cmds: &[Command]) -> ClientResult<Vec<Reply>> {
        self.write_buf.clear();
        for cmd in cmds {
            encode_command(cmd, &mut self.write_buf);
        }
        self.flush_writes()?;

        let mut replies = Vec::with_capacity(cmds.len());
        for _ in cmds {
            replies.push(read_reply(&mut self.reader, &mut self.line_buf)?);
        }
        Ok(replies)
    }

    fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.reader.get_ref().shutdown(Shutdown::Both);
    }
}

fn connect_stream(options: &DialOptions) -> ClientResult<TcpStream> {
    let connect_failed = |source: std::io::Error| ClientError::ConnectFailed {
        addr: options.address.clone(),
        source,
    };

    let addrs: Vec<SocketAddr> = options
        .address
        .to_socket_addrs()
        .map_err(connect_failed)?
        .collect();

    let mut last_err = None;
    for addr in addrs {
        let attempt = match options.connect_timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        };
        match attempt {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
    }

    let err = last_err.unwrap_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::AddrNotAvailable, "address resolved to nothing")
    });
    match err.kind() {
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
            Err(ClientError::Timeout(TimeoutPhase::Connect))
        }
        _ => Err(connect_failed(err)),
    }
}
