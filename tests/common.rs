//! Common test harness utilities for integration tests.
//!
//! Helpers for building small stores over temporary directories and for
//! fabricating messages. All helpers use only existing dev-dependencies.

// Not all test files use all helpers; silence dead_code warnings for unused exports.
#![allow(dead_code)]

use std::path::Path;

use magnetite::{Message, MsgRef, StoreConfig, SubscriberId};
use tempfile::TempDir;

/// A store configuration rooted in a fresh temporary directory.
///
/// Small bucket/staging counts keep the scenarios fast while still
/// exercising cross-bucket routing; retries are shortened so lock-failure
/// tests finish quickly.
pub fn test_config(buckets: usize) -> (TempDir, StoreConfig) {
    let dir = TempDir::new().expect("create temp store dir");
    let cfg = config_at(dir.path(), buckets);
    (dir, cfg)
}

/// A store configuration over an existing directory, for restart scenarios.
pub fn config_at(path: &Path, buckets: usize) -> StoreConfig {
    StoreConfig {
        store_dir: path.to_path_buf(),
        buckets,
        staging_tables: 2,
        write_buffer_size_min: 1024 * 1024,
        write_buffer_size_max: 2 * 1024 * 1024,
        open_retries: 3,
        open_retry_delay_ms: 20,
        fill_cache: false,
        sync_writes: false,
        max_open_files: None,
    }
}

pub fn subscriber(client_id: &str) -> SubscriberId {
    SubscriberId::new("", client_id)
}

pub fn message(msg_ref: &MsgRef, payload: &[u8]) -> Message {
    message_on("", msg_ref, payload)
}

pub fn message_on(mountpoint: &str, msg_ref: &MsgRef, payload: &[u8]) -> Message {
    Message {
        msg_ref: msg_ref.clone(),
        mountpoint: mountpoint.to_string(),
        dup: false,
        qos: 1,
        routing_key: vec!["devices".to_string(), "alerts".to_string()],
        payload: payload.to_vec(),
        persisted: false,
    }
}
