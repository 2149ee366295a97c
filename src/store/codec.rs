//! Wire forms for on-disk values, with forward-compatible version shims.
//!
//! Every value starts with a version byte. Version `0` is the layout this
//! release writes; it is parsed strictly (trailing bytes are corruption).
//! Versions above `0` are layouts a newer writer may produce: the known
//! fields sit in the same positions and anything after them is ignored, so
//! this release downgrades them on read. Re-encoding always emits version
//! `0`, which keeps a mixed-version fleet readable in both directions.

use bytes::{Buf, BufMut};
use thiserror::Error;

use crate::core::time::{Timestamp, TIMESTAMP_WIRE_LEN};

/// Layout emitted by this release.
pub const CURRENT_VERSION: u8 = 0;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("value truncated while reading {0}")]
    Truncated(&'static str),
    #[error("{0} trailing bytes after current-version value")]
    TrailingBytes(usize),
    #[error("dup flag byte {0:#04x} is neither 0 nor 1")]
    InvalidDupFlag(u8),
    #[error("routing key level is not valid UTF-8")]
    InvalidUtf8,
}

/// Value stored under an index key: ordering timestamp plus the delivery
/// flags restored into a message at read time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexValue {
    pub timestamp: Timestamp,
    pub dup: bool,
    pub qos: u8,
}

/// Value stored under a payload key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadValue {
    pub routing_key: Vec<String>,
    pub payload: Vec<u8>,
}

pub fn encode_index_value(value: &IndexValue) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + TIMESTAMP_WIRE_LEN + 2);
    buf.put_u8(CURRENT_VERSION);
    value.timestamp.encode(&mut buf);
    buf.put_u8(u8::from(value.dup));
    buf.put_u8(value.qos);
    buf
}

pub fn parse_index_value(mut bytes: &[u8]) -> Result<IndexValue, CodecError> {
    if bytes.is_empty() {
        return Err(CodecError::Truncated("version"));
    }
    let version = bytes.get_u8();
    if bytes.remaining() < TIMESTAMP_WIRE_LEN + 2 {
        return Err(CodecError::Truncated("index fields"));
    }
    let timestamp = Timestamp::decode(&mut bytes);
    let dup = match bytes.get_u8() {
        0 => false,
        1 => true,
        other => return Err(CodecError::InvalidDupFlag(other)),
    };
    let qos = bytes.get_u8();
    if version == CURRENT_VERSION && bytes.has_remaining() {
        return Err(CodecError::TrailingBytes(bytes.remaining()));
    }
    Ok(IndexValue {
        timestamp,
        dup,
        qos,
    })
}

pub fn encode_payload_value(value: &PayloadValue) -> Vec<u8> {
    let levels: usize = value.routing_key.iter().map(|l| 2 + l.len()).sum();
    let mut buf = Vec::with_capacity(1 + 2 + levels + 4 + value.payload.len());
    buf.put_u8(CURRENT_VERSION);
    debug_assert!(value.routing_key.len() <= u16::MAX as usize);
    buf.put_u16(value.routing_key.len() as u16);
    for level in &value.routing_key {
        debug_assert!(level.len() <= u16::MAX as usize);
        buf.put_u16(level.len() as u16);
        buf.put_slice(level.as_bytes());
    }
    buf.put_u32(value.payload.len() as u32);
    buf.put_slice(&value.payload);
    buf
}

pub fn parse_payload_value(mut bytes: &[u8]) -> Result<PayloadValue, CodecError> {
    if bytes.is_empty() {
        return Err(CodecError::Truncated("version"));
    }
    let version = bytes.get_u8();
    if bytes.remaining() < 2 {
        return Err(CodecError::Truncated("routing key count"));
    }
    let levels = bytes.get_u16() as usize;
    let mut routing_key = Vec::with_capacity(levels);
    for _ in 0..levels {
        if bytes.remaining() < 2 {
            return Err(CodecError::Truncated("routing key level"));
        }
        let len = bytes.get_u16() as usize;
        if bytes.remaining() < len {
            return Err(CodecError::Truncated("routing key level"));
        }
        let level =
            String::from_utf8(bytes[..len].to_vec()).map_err(|_| CodecError::InvalidUtf8)?;
        routing_key.push(level);
        bytes.advance(len);
    }
    if bytes.remaining() < 4 {
        return Err(CodecError::Truncated("payload length"));
    }
    let payload_len = bytes.get_u32() as usize;
    if bytes.remaining() < payload_len {
        return Err(CodecError::Truncated("payload"));
    }
    let payload = bytes[..payload_len].to_vec();
    bytes.advance(payload_len);
    if version == CURRENT_VERSION && bytes.has_remaining() {
        return Err(CodecError::TrailingBytes(bytes.remaining()));
    }
    Ok(PayloadValue {
        routing_key,
        payload,
    })
}
