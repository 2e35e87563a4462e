//! # RESP Encoding and Parsing
//!
//! Purpose: Encode commands as RESP2 arrays and parse replies, including the
//! RESP3 null, boolean, and map frames.
//!
//! ## Design Principles
//! 1. **State-Free Parsing**: Replies are parsed top-down with minimal state.
//! 2. **Buffer Reuse**: Caller provides buffers to avoid per-call allocations.
//! 3. **Binary-Safe**: Bulk strings are treated as raw bytes.
//! 4. **Fail Fast**: Invalid framing returns protocol errors immediately.

use std::io::{self, BufRead};

use bytes::{BufMut, BytesMut};
use kvpool_common::{ClientError, ClientResult, TimeoutPhase};

use crate::command::Command;
use crate::reply::Reply;

/// Encodes one command as a RESP2 array of bulk strings.
pub fn encode_command(cmd: &Command, out: &mut BytesMut) {
    let parts = cmd.parts();
    out.put_u8(b'*');
    push_usize(out, parts.len());
    out.put_slice(b"\r\n");
    for part in parts {
        out.put_u8(b'$');
        push_usize(out, part.len());
        out.put_slice(b"\r\n");
        out.put_slice(part);
        out.put_slice(b"\r\n");
    }
}

/// Largest bulk string the store can produce (512 MiB).
pub const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Deepest aggregate nesting accepted before the reply is rejected.
pub const MAX_NESTING: usize = 64;

/// Reads one reply from the buffered reader.
pub fn read_reply<R: BufRead>(reader: &mut R, line_buf: &mut Vec<u8>) -> ClientResult<Reply> {
    read_value(reader, line_buf, 0)
}

fn read_value<R: BufRead>(reader: &mut R, line_buf: &mut Vec<u8>, depth: usize) -> ClientResult<Reply> {
    read_line(reader, line_buf)?;
    if line_buf.is_empty() {
        return Err(violation("empty reply line"));
    }

    let body = &line_buf[1..];
    match line_buf[0] {
        b'+' => Ok(Reply::Status(lossy(body))),
        b'-' => Ok(Reply::Error(lossy(body))),
        b':' => Ok(Reply::Integer(parse_i64(body)?)),
        b'_' => Ok(Reply::Nil),
        b'#' => match body {
            b"t" => Ok(Reply::Boolean(true)),
            b"f" => Ok(Reply::Boolean(false)),
            _ => Err(violation("invalid boolean frame")),
        },
        b'$' => {
            let len = parse_i64(body)?;
            read_bulk(reader, len)
        }
        b'*' => {
            let len = parse_i64(body)?;
            if len < 0 {
                return Ok(Reply::Nil);
            }
            check_depth(depth)?;
            let mut items = Vec::with_capacity(capacity_hint(len));
            for _ in 0..len {
                items.push(read_value(reader, line_buf, depth + 1)?);
            }
            Ok(Reply::Array(items))
        }
        b'%' => {
            let len = parse_i64(body)?;
            if len < 0 {
                return Err(violation("negative map length"));
            }
            check_depth(depth)?;
            let mut pairs = Vec::with_capacity(capacity_hint(len));
            for _ in 0..len {
                let field = read_value(reader, line_buf, depth + 1)?;
                let value = read_value(reader, line_buf, depth + 1)?;
                pairs.push((field, value));
            }
            Ok(Reply::Map(pairs))
        }
        other => Err(violation(&format!("unknown reply type byte 0x{:02x}", other))),
    }
}

fn check_depth(depth: usize) -> ClientResult<()> {
    if depth >= MAX_NESTING {
        return Err(violation("reply nested too deeply"));
    }
    Ok(())
}

fn read_bulk<R: BufRead>(reader: &mut R, len: i64) -> ClientResult<Reply> {
    if len < 0 {
        return Ok(Reply::Nil);
    }
    let len = usize::try_from(len)
        .ok()
        .filter(|len| *len <= MAX_BULK_LEN)
        .ok_or_else(|| violation("bulk length exceeds limit"))?;
    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).map_err(read_error)?;

    let mut crlf = [0u8; 2];
    reader.read_exact(&mut crlf).map_err(read_error)?;
    if crlf != [b'\r', b'\n'] {
        return Err(violation("bulk string missing CRLF"));
    }
    Ok(Reply::Bulk(data))
}

fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> ClientResult<()> {
    buf.clear();
    let bytes = reader.read_until(b'\n', buf).map_err(read_error)?;
    if bytes == 0 {
        return Err(ClientError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed by peer",
        )));
    }
    if buf.len() < 2 || buf[buf.len() - 2] != b'\r' {
        return Err(violation("line not terminated by CRLF"));
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

fn parse_i64(data: &[u8]) -> ClientResult<i64> {
    let (negative, digits) = match data.split_first() {
        Some((b'-', rest)) => (true, rest),
        Some(_) => (false, data),
        None => return Err(violation("empty integer")),
    };
    if digits.is_empty() {
        return Err(violation("empty integer"));
    }

    // Accumulate toward the sign so i64::MIN stays representable.
    let mut value: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(violation("invalid integer digit"));
        }
        let digit = (b - b'0') as i64;
        value = value
            .checked_mul(10)
            .and_then(|v| {
                if negative {
                    v.checked_sub(digit)
                } else {
                    v.checked_add(digit)
                }
            })
            .ok_or_else(|| violation("integer overflow"))?;
    }

    Ok(value)
}

// Cap preallocation so a hostile length prefix cannot force a huge allocation.
fn capacity_hint(len: i64) -> usize {
    usize::try_from(len).unwrap_or(0).min(1024)
}

fn push_usize(out: &mut BytesMut, mut value: usize) {
    // Write digits into a small stack buffer to avoid heap allocations.
    let mut buf = [0u8; 20];
    let mut len = 0;
    if value == 0 {
        buf[0] = b'0';
        len = 1;
    } else {
        while value > 0 {
            buf[len] = b'0' + (value % 10) as u8;
            value /= 10;
            len += 1;
        }
    }
    buf[..len].reverse();
    out.put_slice(&buf[..len]);
}

fn lossy(data: &[u8]) -> String {
    String::from_utf8_lossy(data).into_owned()
}

fn violation(message: &str) -> ClientError {
    ClientError::ProtocolViolation(message.to_string())
}

fn read_error(err: io::Error) -> ClientError {
    ClientError::from_io(err, TimeoutPhase::Read)
}
