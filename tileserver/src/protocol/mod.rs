//! Tirex control channel protocol.
//!
//! Messages are UTF-8 datagrams of newline separated `key=value` lines:
//!
//! ```text
//! id=nodets-4711-1
//! type=metatile_enqueue_request
//! prio=8
//! map=osm
//! x=8
//! y=0
//! z=10
//! ```
//!
//! There is no escaping. Values run to the end of the line and may contain
//! further `=` characters. Empty lines, trailing newlines and `\r\n` line
//! endings are tolerated; lines without `=` are skipped.
//!
//! The channel is best effort. Nothing here retries or acknowledges, and a
//! message that fails to decode is simply dropped by the caller.

mod message;

pub use message::{CompletionNotice, EnqueueRequest, RequestIdGenerator, DEFAULT_ID_PREFIX};

use std::str::FromStr;

use thiserror::Error;

/// Message type of a metatile render request.
pub const ENQUEUE_TYPE: &str = "metatile_enqueue_request";

/// Errors decoding a control message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("message is not valid UTF-8")]
    NotUtf8,

    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("field '{field}' is not a valid number: {value:?}")]
    InvalidNumber { field: &'static str, value: String },

    #[error("unexpected message type {0:?}")]
    WrongType(String),
}

/// An ordered set of `key=value` fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    fields: Vec<(String, String)>,
}

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a field.
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.fields.push((key.into(), value.to_string()));
        self
    }

    /// Value of `key`. A repeated key resolves to its last occurrence.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Parses a datagram.
    pub fn parse(datagram: &[u8]) -> Result<Self, ProtocolError> {
        let text = std::str::from_utf8(datagram).map_err(|_| ProtocolError::NotUtf8)?;

        let fields = text
            .split('\n')
            .map(|line| line.strip_suffix('\r').unwrap_or(line))
            .filter(|line| !line.is_empty())
            .filter_map(|line| line.split_once('='))
            .filter(|(key, _)| !key.is_empty())
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();

        Ok(Self { fields })
    }

    /// Serializes to the wire format, one line per field in insertion order.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.fields {
            out.push_str(key);
            out.push('=');
            out.push_str(value);
            out.push('\n');
        }
        out
    }

    fn require(&self, field: &'static str) -> Result<&str, ProtocolError> {
        self.get(field).ok_or(ProtocolError::MissingField(field))
    }

    fn require_number<T: FromStr>(&self, field: &'static str) -> Result<T, ProtocolError> {
        let value = self.require(field)?;
        value
            .trim()
            .parse()
            .map_err(|_| ProtocolError::InvalidNumber {
                field,
                value: value.to_string(),
            })
    }
}
