#![deny(unused, dead_code)]
#![deny(clippy::all)]
// Module naming: common pattern in domain-driven code
#![allow(clippy::module_name_repetitions)]
// Documentation style: many terms don't need backticks
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
// API ergonomics: prefer simplicity over must_use annotations
#![allow(clippy::must_use_candidate)]
// Format strings: allow non-inlined for readability
#![allow(clippy::uninlined_format_args)]
// Numeric casts: intentional in key/value encoding code
#![allow(clippy::cast_possible_truncation)]

//! Magnetite - Persistent offline message store for a distributed MQTT broker.
//!
//! Publications with QoS > 0 destined for disconnected or slow subscribers
//! are recorded here until acknowledged, with payloads deduplicated across
//! fanout: one message delivered to many subscribers occupies storage once,
//! tracked by an in-memory reference count rebuilt from disk at startup.
//!
//! # Module Organization
//!
//! ## Core
//! - `core::config` - Configuration parsing and validation
//! - `core::time` - Write-time timestamp capture and encoding
//!
//! ## Store
//! - `store::message` - Refs, subscriber identities, publications
//! - `store::keys` - Order-preserving on-disk key encoding
//! - `store::codec` - Value wire forms and version downgrade shims
//! - `store::refcount` - Per-bucket payload reference counts
//! - `store::staging` - Shared scan-result staging area
//! - `store::registry` - Key-to-bucket routing
//! - `store::backend` - Embedded ordered key-value database wrapper
//! - `store::bucket` - Single-writer bucket actors
//! - `store::find` - Subscriber reconnect scans

// Core infrastructure
pub mod core;

// The store itself
pub mod store;

// Re-exports for convenience
pub use self::core::config::StoreConfig;
pub use self::core::time::Timestamp;
pub use self::core::{config, time};
pub use store::{
    BucketState, BucketStats, FindMode, Message, MessageStore, MsgRef, StoreError, StoreStats,
    SubscriberId,
};
