//! Order-preserving composite key encoding for the on-disk databases.
//!
//! Keys are a single tag byte followed by length-prefixed segments (big-endian
//! `u16` length, then the raw bytes). Payload keys (`0x01`) sort strictly
//! before index keys (`0x02`), and every index key of one subscriber shares an
//! identical byte prefix, so a forward iterator walks one subscriber's entries
//! contiguously. Length prefixes rather than separator bytes: MQTT client ids
//! and refs may contain any byte value.

use bytes::{Buf, BufMut};
use thiserror::Error;

use super::message::{MsgRef, SubscriberId};

/// Tag byte of payload record keys.
pub const TAG_MSG: u8 = 0x01;
/// Tag byte of subscriber index keys.
pub const TAG_IDX: u8 = 0x02;

/// Lower bound of the whole index key range, used by recovery.
pub const IDX_RANGE_START: [u8; 1] = [TAG_IDX];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("key truncated while reading {0}")]
    Truncated(&'static str),
    #[error("unexpected key tag {0:#04x}")]
    UnexpectedTag(u8),
    #[error("key segment {0} is not valid UTF-8")]
    InvalidUtf8(&'static str),
    #[error("{0} bytes left over after decoding key")]
    TrailingBytes(usize),
}

fn put_segment(buf: &mut impl BufMut, bytes: &[u8]) {
    debug_assert!(bytes.len() <= u16::MAX as usize);
    buf.put_u16(bytes.len() as u16);
    buf.put_slice(bytes);
}

fn take_segment<'a>(buf: &mut &'a [u8], what: &'static str) -> Result<&'a [u8], KeyError> {
    if buf.remaining() < 2 {
        return Err(KeyError::Truncated(what));
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(KeyError::Truncated(what));
    }
    let rest: &'a [u8] = *buf;
    let (head, tail) = rest.split_at(len);
    *buf = tail;
    Ok(head)
}

fn take_string(buf: &mut &[u8], what: &'static str) -> Result<String, KeyError> {
    let bytes = take_segment(buf, what)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| KeyError::InvalidUtf8(what))
}

/// Key of the payload record for `msg_ref` within `mountpoint`.
pub fn msg_key(mountpoint: &str, msg_ref: &MsgRef) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + 4 + msg_ref.as_bytes().len() + mountpoint.len());
    key.put_u8(TAG_MSG);
    put_segment(&mut key, msg_ref.as_bytes());
    put_segment(&mut key, mountpoint.as_bytes());
    key
}

/// Key of the index entry binding `subscriber` to `msg_ref`.
pub fn idx_key(subscriber: &SubscriberId, msg_ref: &MsgRef) -> Vec<u8> {
    let mut key = Vec::with_capacity(
        1 + 6
            + subscriber.mountpoint.len()
            + subscriber.client_id.len()
            + msg_ref.as_bytes().len(),
    );
    key.put_u8(TAG_IDX);
    put_segment(&mut key, subscriber.mountpoint.as_bytes());
    put_segment(&mut key, subscriber.client_id.as_bytes());
    put_segment(&mut key, msg_ref.as_bytes());
    key
}

/// Byte prefix shared by every index key of one subscriber.
pub fn idx_prefix(subscriber: &SubscriberId) -> Vec<u8> {
    let mut key =
        Vec::with_capacity(1 + 4 + subscriber.mountpoint.len() + subscriber.client_id.len());
    key.put_u8(TAG_IDX);
    put_segment(&mut key, subscriber.mountpoint.as_bytes());
    put_segment(&mut key, subscriber.client_id.as_bytes());
    key
}

/// Decode a full index key back into its subscriber and message reference.
pub fn decode_idx_key(mut key: &[u8]) -> Result<(SubscriberId, MsgRef), KeyError> {
    if key.is_empty() {
        return Err(KeyError::Truncated("tag"));
    }
    let tag = key.get_u8();
    if tag != TAG_IDX {
        return Err(KeyError::UnexpectedTag(tag));
    }
    let mountpoint = take_string(&mut key, "mountpoint")?;
    let client_id = take_string(&mut key, "client_id")?;
    let msg_ref = MsgRef::new(take_segment(&mut key, "msg_ref")?.to_vec());
    if !key.is_empty() {
        return Err(KeyError::TrailingBytes(key.len()));
    }
    Ok((SubscriberId { mountpoint, client_id }, msg_ref))
}

/// Whether `key` is an index key (any subscriber).
pub fn is_idx_key(key: &[u8]) -> bool {
    key.first() == Some(&TAG_IDX)
}
