//! # Replies
//!
//! `Reply` is the decoded form of one protocol response. Typed accessors
//! convert it into what a given command returns; an `Error` reply always
//! surfaces as `ClientError::Server`, an unexpected tag as `TypeMismatch`,
//! and a well-tagged but malformed payload as `ProtocolViolation`.

use std::collections::{BTreeSet, HashMap};

use kvpool_common::{ClientError, ClientResult};

/// Tagged union over every reply shape the client understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Absent value (null bulk, null array, or RESP3 null).
    Nil,
    Integer(i64),
    /// Binary-safe bulk string.
    Bulk(Vec<u8>),
    /// Simple status line such as `OK` or `QUEUED`.
    Status(String),
    Array(Vec<Reply>),
    /// RESP3 map, pairs kept in wire order.
    Map(Vec<(Reply, Reply)>),
    Boolean(bool),
    /// Error line sent by the store.
    Error(String),
}

impl Reply {
    /// Short tag name used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Reply::Nil => "nil",
            Reply::Integer(_) => "integer",
            Reply::Bulk(_) => "bulk",
            Reply::Status(_) => "status",
            Reply::Array(_) => "array",
            Reply::Map(_) => "map",
            Reply::Boolean(_) => "boolean",
            Reply::Error(_) => "error",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    /// Turns an `Error` reply into `ClientError::Server`.
    pub fn into_result(self) -> ClientResult<Reply> {
        match self {
            Reply::Error(message) => Err(ClientError::Server(message)),
            other => Ok(other),
        }
    }

    pub fn into_integer(self) -> ClientResult<i64> {
        match self.into_result()? {
            Reply::Integer(value) => Ok(value),
            other => Err(mismatch("integer", &other)),
        }
    }

    /// Non-negative integer, e.g. a list length.
    pub fn into_unsigned(self) -> ClientResult<u64> {
        let value = self.into_integer()?;
        u64::try_from(value)
            .map_err(|_| ClientError::ProtocolViolation(format!("expected non-negative integer, got {}", value)))
    }

    /// Existence-style replies: 0/1 integers, booleans, `OK`, or nil.
    pub fn into_bool(self) -> ClientResult<bool> {
        match self.into_result()? {
            Reply::Integer(value) => Ok(value != 0),
            Reply::Boolean(value) => Ok(value),
            Reply::Status(status) => Ok(status == "OK"),
            Reply::Nil => Ok(false),
            other => Err(mismatch("integer", &other)),
        }
    }

    /// Status text; bulk strings are accepted for stores that answer that way.
    pub fn into_status(self) -> ClientResult<String> {
        match self.into_result()? {
            Reply::Status(status) => Ok(status),
            Reply::Bulk(data) => utf8(data),
            other => Err(mismatch("status", &other)),
        }
    }

    /// Text value where nil means "not found".
    pub fn into_optional_string(self) -> ClientResult<Option<String>> {
        match self.into_result()? {
            Reply::Nil => Ok(None),
            Reply::Bulk(data) => utf8(data).map(Some),
            Reply::Status(status) => Ok(Some(status)),
            other => Err(mismatch("bulk", &other)),
        }
    }

    pub fn into_array(self) -> ClientResult<Vec<Reply>> {
        match self.into_result()? {
            Reply::Array(items) => Ok(items),
            Reply::Nil => Ok(Vec::new()),
            other => Err(mismatch("array", &other)),
        }
    }

    pub fn into_strings(self) -> ClientResult<Vec<String>> {
        self.into_array()?.into_iter().map(element_string).collect()
    }

    pub fn into_string_set(self) -> ClientResult<BTreeSet<String>> {
        self.into_array()?.into_iter().map(element_string).collect()
    }

    /// Field/value mapping from an alternating array or a RESP3 map.
    pub fn into_string_map(self) -> ClientResult<HashMap<String, String>> {
        self.into_pairs()?
            .into_iter()
            .map(|(field, value)| Ok((element_string(field)?, element_string(value)?)))
            .collect()
    }

    /// Like `into_string_map` but every value must be a decimal integer.
    pub fn into_integer_map(self) -> ClientResult<HashMap<String, i64>> {
        self.into_pairs()?
            .into_iter()
            .map(|(field, value)| Ok((element_string(field)?, element_integer(value)?)))
            .collect()
    }

    fn into_pairs(self) -> ClientResult<Vec<(Reply, Reply)>> {
        match self.into_result()? {
            Reply::Map(pairs) => Ok(pairs),
            Reply::Nil => Ok(Vec::new()),
            Reply::Array(items) => {
                if items.len() % 2 != 0 {
                    return Err(ClientError::ProtocolViolation(format!(
                        "field/value array has odd length {}",
                        items.len()
                    )));
                }
                let mut pairs = Vec::with_capacity(items.len() / 2);
                let mut iter = items.into_iter();
                while let (Some(field), Some(value)) = (iter.next(), iter.next()) {
                    pairs.push((field, value));
                }
                Ok(pairs)
            }
            other => Err(mismatch("array", &other)),
        }
    }
}

fn mismatch(expected: &'static str, found: &Reply) -> ClientError {
    ClientError::TypeMismatch {
        expected,
        found: found.kind(),
    }
}

fn utf8(data: Vec<u8>) -> ClientResult<String> {
    String::from_utf8(data).map_err(|_| ClientError::ProtocolViolation("reply is not valid UTF-8".to_string()))
}

fn element_string(reply: Reply) -> ClientResult<String> {
    match reply {
        Reply::Bulk(data) => utf8(data),
        Reply::Status(status) => Ok(status),
        Reply::Integer(value) => Ok(value.to_string()),
        Reply::Error(message) => Err(ClientError::Server(message)),
        other => Err(mismatch("bulk", &other)),
    }
}

fn element_integer(reply: Reply) -> ClientResult<i64> {
    match reply {
        Reply::Integer(value) => Ok(value),
        Reply::Bulk(data) => std::str::from_utf8(&data)
            .ok()
            .and_then(|text| text.parse().ok())
            .ok_or(ClientError::TypeMismatch {
                expected: "integer",
                found: "bulk",
            }),
        Reply::Error(message) => Err(ClientError::Server(message)),
        other => Err(mismatch("integer", &other)),
    }
}
