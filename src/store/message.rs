use std::fmt;
use std::hash::Hasher;

use serde::{Deserialize, Serialize};
use twox_hash::XxHash64;

/// Opaque content-addressable identifier of a payload, stable across fanout.
///
/// Callers supply the bytes; [`MsgRef::digest`] is a convenience for brokers
/// that derive refs from message content.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MsgRef(Vec<u8>);

impl MsgRef {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Derive a reference from routing key and payload content.
    pub fn digest(routing_key: &[String], payload: &[u8]) -> Self {
        let mut hasher = XxHash64::with_seed(0);
        for level in routing_key {
            hasher.write(level.as_bytes());
            hasher.write_u8(0);
        }
        hasher.write(payload);
        Self(hasher.finish().to_be_bytes().to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for MsgRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MsgRef(")?;
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        write!(f, ")")
    }
}

/// One MQTT client within one tenant namespace.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubscriberId {
    /// Tenant namespace prepended to topic routing.
    pub mountpoint: String,
    pub client_id: String,
}

impl SubscriberId {
    pub fn new(mountpoint: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            mountpoint: mountpoint.into(),
            client_id: client_id.into(),
        }
    }
}

/// A publication as the store sees it.
///
/// `routing_key` is the topic split into levels; `qos` round-trips any value
/// even though QoS 0 traffic is not expected to land here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub msg_ref: MsgRef,
    pub mountpoint: String,
    pub dup: bool,
    pub qos: u8,
    pub routing_key: Vec<String>,
    pub payload: Vec<u8>,
    /// Set on messages reconstructed from disk.
    pub persisted: bool,
}
