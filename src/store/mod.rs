//! The persistent offline message store.
//!
//! Durably records in-flight publications for disconnected or slow
//! subscribers and deduplicates payloads across fanout:
//! - `message` - Message model: refs, subscribers, publications
//! - `keys` - Order-preserving on-disk key encoding
//! - `codec` - Value wire forms and version downgrade shims
//! - `refcount` - Per-bucket payload reference counts
//! - `staging` - Shared scan-result staging area
//! - `registry` - Key-to-bucket routing
//! - `backend` - Embedded ordered key-value database wrapper
//! - `bucket` - Single-writer bucket actors
//! - `find` - Subscriber reconnect scans

pub mod backend;
pub mod bucket;
pub mod codec;
mod find;
pub mod keys;
pub mod message;
pub mod refcount;
pub mod registry;
pub mod staging;

use std::sync::Arc;
use std::thread;

use thiserror::Error;
use tracing::info;

use crate::core::config::StoreConfig;
pub use backend::{Backend, BackendError};
pub use bucket::BucketHandle;
pub use codec::CodecError;
pub use keys::KeyError;
pub use message::{Message, MsgRef, SubscriberId};
pub use registry::BucketRegistry;
pub use staging::{ScanId, StagingArea};

/// Errors surfaced by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No payload record on disk for the requested ref.
    #[error("payload not found")]
    NotFound,
    /// Payload present but the subscriber's index entry is gone; happens
    /// when another subscriber already dropped its reference. Not corruption.
    #[error("index entry missing for payload")]
    IndexEntryMissing,
    #[error("message mountpoint does not match subscriber mountpoint")]
    MountpointMismatch,
    /// The bucket owning the key has not registered or has shut down.
    #[error("no bucket registered for key")]
    BucketUnavailable,
    /// A bucket accepted a request and then died before answering.
    #[error("bucket worker terminated: {0}")]
    WorkerGone(String),
    #[error("invalid store configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// How a find call should source its results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindMode {
    /// First connect after startup: prefer the entries recovery staged.
    QueueInit,
    /// Any later call: always fan out to the buckets.
    Other,
}

/// Lifecycle state of one bucket, observable once it answers at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketState {
    Initialized,
}

/// Telemetry snapshot of one bucket's refcount table.
#[derive(Debug, Clone, Copy)]
pub struct BucketStats {
    pub index: usize,
    /// Distinct payloads referenced.
    pub refcount_rows: usize,
    /// Sum of all reference counts.
    pub total_references: u64,
}

/// Telemetry snapshot of the whole store.
#[derive(Debug, Clone)]
pub struct StoreStats {
    pub buckets: Vec<BucketStats>,
    /// Entries currently parked in the staging area.
    pub staged_entries: usize,
}

/// Handle to an open message store: N bucket shards over one root directory.
///
/// Cloning is not offered; the broker core owns one `MessageStore` and shares
/// it behind its own `Arc`.
#[derive(Debug)]
pub struct MessageStore {
    registry: Arc<BucketRegistry>,
    staging: Arc<StagingArea>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl MessageStore {
    /// Validate the configuration, spawn every bucket, and wait until all of
    /// them finished recovery and registered.
    ///
    /// Buckets whose database lock is held elsewhere retry per the
    /// configured policy, so this call can legitimately take
    /// `open_retries * open_retry_delay` in the worst case.
    pub async fn open(config: StoreConfig) -> Result<Self, StoreError> {
        config
            .validate()
            .map_err(|err| StoreError::Config(err.to_string()))?;
        std::fs::create_dir_all(&config.store_dir)?;

        let registry = Arc::new(BucketRegistry::new(config.buckets));
        let staging = Arc::new(StagingArea::new(config.staging_tables));

        let mut workers = Vec::with_capacity(config.buckets);
        let mut pending = Vec::with_capacity(config.buckets);
        for index in 0..config.buckets {
            let spawned = bucket::spawn(
                index,
                config.clone(),
                Arc::clone(&registry),
                Arc::clone(&staging),
            )?;
            workers.push(spawned.join);
            pending.push(spawned.ready);
        }
        for ready in pending {
            ready
                .await
                .map_err(|_| StoreError::WorkerGone("bucket died during startup".into()))??;
        }
        info!(
            "message store open at {} with {} buckets",
            config.store_dir.display(),
            config.buckets
        );

        Ok(Self {
            registry,
            staging,
            workers,
        })
    }

    fn bucket_for(&self, key: &[u8]) -> Result<BucketHandle, StoreError> {
        self.registry
            .bucket_for(key)
            .ok_or(StoreError::BucketUnavailable)
    }

    /// Persist one publication for one subscriber.
    ///
    /// Precondition: `message.mountpoint == subscriber.mountpoint`; a
    /// mismatch is rejected with [`StoreError::MountpointMismatch`].
    pub async fn write(
        &self,
        subscriber: &SubscriberId,
        message: &Message,
    ) -> Result<(), StoreError> {
        self.bucket_for(message.msg_ref.as_bytes())?
            .write(subscriber.clone(), message.clone())
            .await
    }

    /// Reconstruct a persisted message for queue drain.
    pub async fn read(
        &self,
        subscriber: &SubscriberId,
        msg_ref: &MsgRef,
    ) -> Result<Message, StoreError> {
        self.bucket_for(msg_ref.as_bytes())?
            .read(subscriber.clone(), msg_ref.clone())
            .await
    }

    /// Drop one subscriber's reference; the payload goes with the last one.
    /// Idempotent: deleting an already-deleted reference succeeds.
    pub async fn delete(
        &self,
        subscriber: &SubscriberId,
        msg_ref: &MsgRef,
    ) -> Result<(), StoreError> {
        self.bucket_for(msg_ref.as_bytes())?
            .delete(subscriber.clone(), msg_ref.clone())
            .await
    }

    /// Message refs still owed to `subscriber`, ascending by write time.
    pub async fn find(
        &self,
        subscriber: &SubscriberId,
        mode: FindMode,
    ) -> Result<Vec<MsgRef>, StoreError> {
        find::find_for_subscriber(&self.registry, &self.staging, subscriber, mode).await
    }

    /// Live reference count for a payload (0 when unknown).
    pub async fn refcount(&self, msg_ref: &MsgRef) -> Result<u64, StoreError> {
        self.bucket_for(msg_ref.as_bytes())?
            .refcount(msg_ref.clone())
            .await
    }

    pub fn bucket_count(&self) -> usize {
        self.registry.bucket_count()
    }

    /// Lifecycle state of one bucket.
    pub async fn bucket_state(&self, index: usize) -> Result<BucketState, StoreError> {
        self.registry
            .bucket(index)
            .ok_or(StoreError::BucketUnavailable)?
            .status()
            .await
    }

    /// Opaque backend handle of one bucket, for tests and diagnostics.
    pub async fn bucket_backend(&self, index: usize) -> Result<Arc<Backend>, StoreError> {
        self.registry
            .bucket(index)
            .ok_or(StoreError::BucketUnavailable)?
            .backend()
            .await
    }

    /// Telemetry snapshot across all buckets.
    pub async fn stats(&self) -> Result<StoreStats, StoreError> {
        let mut buckets = Vec::with_capacity(self.registry.bucket_count());
        for handle in self.registry.buckets() {
            buckets.push(handle.stats().await?);
        }
        Ok(StoreStats {
            buckets,
            staged_entries: self.staging.len(),
        })
    }

    /// Shut down every bucket and block until their databases are closed.
    ///
    /// Dropping the store releases the buckets as well, just without the
    /// join; close when the caller needs the database locks freed before
    /// proceeding (tests, restarts in place).
    pub fn close(self) {
        self.registry.clear();
        for worker in self.workers {
            let _ = worker.join();
        }
    }
}
