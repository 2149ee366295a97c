//! Bucket actor: one shard of the store.
//!
//! Each bucket owns one embedded database and one refcount table, and serves
//! requests strictly one at a time from a dedicated worker thread. Many
//! producers feed the channel; the single consumer is what keeps refcount
//! updates and backend writes consistent without any locking. The worker
//! registers itself with the registry only after recovery, so no request can
//! reach a partially initialized backend.

use std::sync::Arc;
use std::thread;

use rand::Rng;
use rocksdb::WriteBatch;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use super::backend::{Backend, BackendOptions};
use super::codec::{
    encode_index_value, encode_payload_value, parse_index_value, parse_payload_value, IndexValue,
    PayloadValue,
};
use super::keys;
use super::message::{Message, MsgRef, SubscriberId};
use super::refcount::{Decrement, RefcountTable};
use super::registry::BucketRegistry;
use super::staging::{ScanId, StagingArea};
use super::{BucketState, BucketStats, StoreError};
use crate::core::config::StoreConfig;
use crate::core::time::Timestamp;

enum Request {
    Write {
        subscriber: SubscriberId,
        message: Message,
        reply: oneshot::Sender<Result<(), StoreError>>,
    },
    Read {
        subscriber: SubscriberId,
        msg_ref: MsgRef,
        reply: oneshot::Sender<Result<Message, StoreError>>,
    },
    Delete {
        subscriber: SubscriberId,
        msg_ref: MsgRef,
        reply: oneshot::Sender<Result<(), StoreError>>,
    },
    Find {
        scan: ScanId,
        subscriber: SubscriberId,
        reply: oneshot::Sender<Result<(), StoreError>>,
    },
    Refcount {
        msg_ref: MsgRef,
        reply: oneshot::Sender<u64>,
    },
    Status {
        reply: oneshot::Sender<BucketState>,
    },
    Stats {
        reply: oneshot::Sender<BucketStats>,
    },
    BackendHandle {
        reply: oneshot::Sender<Arc<Backend>>,
    },
}

/// Client side of one bucket's request channel.
#[derive(Debug, Clone)]
pub struct BucketHandle {
    index: usize,
    tx: mpsc::UnboundedSender<Request>,
}

impl BucketHandle {
    pub fn index(&self) -> usize {
        self.index
    }

    fn gone(&self) -> StoreError {
        StoreError::WorkerGone(format!("bucket {} dropped a request", self.index))
    }

    async fn call<T>(
        &self,
        request: Request,
        rx: oneshot::Receiver<T>,
    ) -> Result<T, StoreError> {
        self.tx
            .send(request)
            .map_err(|_| StoreError::BucketUnavailable)?;
        rx.await.map_err(|_| self.gone())
    }

    pub async fn write(
        &self,
        subscriber: SubscriberId,
        message: Message,
    ) -> Result<(), StoreError> {
        let (reply, rx) = oneshot::channel();
        self.call(
            Request::Write {
                subscriber,
                message,
                reply,
            },
            rx,
        )
        .await?
    }

    pub async fn read(
        &self,
        subscriber: SubscriberId,
        msg_ref: MsgRef,
    ) -> Result<Message, StoreError> {
        let (reply, rx) = oneshot::channel();
        self.call(
            Request::Read {
                subscriber,
                msg_ref,
                reply,
            },
            rx,
        )
        .await?
    }

    pub async fn delete(
        &self,
        subscriber: SubscriberId,
        msg_ref: MsgRef,
    ) -> Result<(), StoreError> {
        let (reply, rx) = oneshot::channel();
        self.call(
            Request::Delete {
                subscriber,
                msg_ref,
                reply,
            },
            rx,
        )
        .await?
    }

    /// Ask this bucket to stage every index entry of `subscriber` under
    /// `scan`. Success with zero entries staged is the common case.
    pub async fn find(&self, scan: ScanId, subscriber: SubscriberId) -> Result<(), StoreError> {
        let (reply, rx) = oneshot::channel();
        self.call(
            Request::Find {
                scan,
                subscriber,
                reply,
            },
            rx,
        )
        .await?
    }

    pub async fn refcount(&self, msg_ref: MsgRef) -> Result<u64, StoreError> {
        let (reply, rx) = oneshot::channel();
        self.call(Request::Refcount { msg_ref, reply }, rx).await
    }

    pub async fn status(&self) -> Result<BucketState, StoreError> {
        let (reply, rx) = oneshot::channel();
        self.call(Request::Status { reply }, rx).await
    }

    pub async fn stats(&self) -> Result<BucketStats, StoreError> {
        let (reply, rx) = oneshot::channel();
        self.call(Request::Stats { reply }, rx).await
    }

    /// Opaque handle to the underlying database, for tests and diagnostics.
    pub async fn backend(&self) -> Result<Arc<Backend>, StoreError> {
        let (reply, rx) = oneshot::channel();
        self.call(Request::BackendHandle { reply }, rx).await
    }
}

pub(crate) struct BucketSpawn {
    pub ready: oneshot::Receiver<Result<(), StoreError>>,
    pub join: thread::JoinHandle<()>,
}

/// Start one bucket worker thread. The worker hands its own handle to the
/// registry once recovery is done; callers watch `ready`.
pub(crate) fn spawn(
    index: usize,
    config: StoreConfig,
    registry: Arc<BucketRegistry>,
    staging: Arc<StagingArea>,
) -> Result<BucketSpawn, StoreError> {
    let (tx, rx) = mpsc::unbounded_channel();
    let (ready_tx, ready_rx) = oneshot::channel();
    let handle = BucketHandle { index, tx };
    let join = thread::Builder::new()
        .name(format!("msgstore-bucket-{index}"))
        .spawn(move || run_worker(index, config, registry, staging, handle, rx, ready_tx))?;
    Ok(BucketSpawn {
        ready: ready_rx,
        join,
    })
}

fn run_worker(
    index: usize,
    config: StoreConfig,
    registry: Arc<BucketRegistry>,
    staging: Arc<StagingArea>,
    handle: BucketHandle,
    mut rx: mpsc::UnboundedReceiver<Request>,
    ready: oneshot::Sender<Result<(), StoreError>>,
) {
    let mut worker = match Worker::initialize(index, &config, staging) {
        Ok(worker) => worker,
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };
    registry.register(index, handle);
    // Break the sender cycle: the registry slot now keeps this bucket alive,
    // and clearing the registry is what shuts the worker down.
    drop(registry);
    let _ = ready.send(Ok(()));

    while let Some(request) = rx.blocking_recv() {
        worker.handle(request);
    }
}

struct Worker {
    index: usize,
    backend: Arc<Backend>,
    refcounts: RefcountTable,
    staging: Arc<StagingArea>,
}

impl Worker {
    fn initialize(
        index: usize,
        config: &StoreConfig,
        staging: Arc<StagingArea>,
    ) -> Result<Self, StoreError> {
        let dir = config.bucket_dir(index);
        std::fs::create_dir_all(&dir)?;

        // Randomize the memtable size per bucket so compactions across the
        // shard set do not line up.
        let write_buffer_size = rand::thread_rng()
            .gen_range(config.write_buffer_size_min..=config.write_buffer_size_max);
        let opts = BackendOptions {
            create_if_missing: true,
            write_buffer_size,
            sync_writes: config.sync_writes,
            fill_cache: config.fill_cache,
            max_open_files: config.max_open_files,
        };
        let backend = Backend::open_with_retry(
            &dir,
            &opts,
            config.open_retries,
            config.open_retry_delay(),
        )?;

        let mut worker = Self {
            index,
            backend: Arc::new(backend),
            refcounts: RefcountTable::new(),
            staging,
        };
        worker.setup_index()?;
        Ok(worker)
    }

    /// Recovery: walk the whole index range once, rebuilding refcounts and
    /// preloading the staging area under the reserved init scan id.
    fn setup_index(&mut self) -> Result<(), StoreError> {
        let mut entries = 0u64;
        for item in self.backend.scan_from(&keys::IDX_RANGE_START) {
            let (key, value) = match item {
                Ok(kv) => kv,
                Err(err) => {
                    warn!("bucket {} recovery scan aborted: {err}", self.index);
                    break;
                }
            };
            if !keys::is_idx_key(&key) {
                break;
            }
            let (subscriber, msg_ref) = keys::decode_idx_key(&key)?;
            let idx = parse_index_value(&value)?;
            self.staging
                .insert(ScanId::Init, &subscriber, idx.timestamp, msg_ref.clone());
            self.refcounts.incr(&msg_ref);
            entries += 1;
        }
        if entries > 0 {
            info!("bucket {} recovered {entries} index entries", self.index);
        }
        Ok(())
    }

    fn handle(&mut self, request: Request) {
        match request {
            Request::Write {
                subscriber,
                message,
                reply,
            } => {
                let _ = reply.send(self.write(&subscriber, &message));
            }
            Request::Read {
                subscriber,
                msg_ref,
                reply,
            } => {
                let _ = reply.send(self.read(&subscriber, &msg_ref));
            }
            Request::Delete {
                subscriber,
                msg_ref,
                reply,
            } => {
                let _ = reply.send(self.delete(&subscriber, &msg_ref));
            }
            Request::Find {
                scan,
                subscriber,
                reply,
            } => {
                let _ = reply.send(self.find_for_subscriber_id(scan, &subscriber));
            }
            Request::Refcount { msg_ref, reply } => {
                let _ = reply.send(self.refcounts.count(&msg_ref));
            }
            Request::Status { reply } => {
                // The worker only serves requests after recovery finished.
                let _ = reply.send(BucketState::Initialized);
            }
            Request::Stats { reply } => {
                let _ = reply.send(BucketStats {
                    index: self.index,
                    refcount_rows: self.refcounts.rows(),
                    total_references: self.refcounts.total_references(),
                });
            }
            Request::BackendHandle { reply } => {
                let _ = reply.send(Arc::clone(&self.backend));
            }
        }
    }

    fn write(&mut self, subscriber: &SubscriberId, message: &Message) -> Result<(), StoreError> {
        if message.mountpoint != subscriber.mountpoint {
            return Err(StoreError::MountpointMismatch);
        }
        let msg_key = keys::msg_key(&message.mountpoint, &message.msg_ref);
        let idx_key = keys::idx_key(subscriber, &message.msg_ref);
        let idx_bytes = encode_index_value(&IndexValue {
            timestamp: Timestamp::now(),
            dup: message.dup,
            qos: message.qos,
        });

        if self.refcounts.incr(&message.msg_ref) == 1 {
            // First reference: payload and index land atomically.
            let payload_bytes = encode_payload_value(&PayloadValue {
                routing_key: message.routing_key.clone(),
                payload: message.payload.clone(),
            });
            let mut batch = WriteBatch::default();
            batch.put(&msg_key, &payload_bytes);
            batch.put(&idx_key, &idx_bytes);
            self.backend.apply(batch)?;
        } else {
            self.backend.put(&idx_key, &idx_bytes)?;
        }
        Ok(())
    }

    fn read(&self, subscriber: &SubscriberId, msg_ref: &MsgRef) -> Result<Message, StoreError> {
        let msg_key = keys::msg_key(&subscriber.mountpoint, msg_ref);
        let Some(payload_bytes) = self.backend.get(&msg_key)? else {
            return Err(StoreError::NotFound);
        };
        let idx_key = keys::idx_key(subscriber, msg_ref);
        let Some(idx_bytes) = self.backend.get(&idx_key)? else {
            // Another subscriber may have dropped its reference already.
            return Err(StoreError::IndexEntryMissing);
        };
        let payload = parse_payload_value(&payload_bytes)?;
        let idx = parse_index_value(&idx_bytes)?;
        Ok(Message {
            msg_ref: msg_ref.clone(),
            mountpoint: subscriber.mountpoint.clone(),
            dup: idx.dup,
            qos: idx.qos,
            routing_key: payload.routing_key,
            payload: payload.payload,
            persisted: true,
        })
    }

    fn delete(&mut self, subscriber: &SubscriberId, msg_ref: &MsgRef) -> Result<(), StoreError> {
        let idx_key = keys::idx_key(subscriber, msg_ref);
        match self.refcounts.decr(msg_ref) {
            Decrement::NotFound => {
                warn!(
                    "bucket {} delete of {msg_ref:?} without a refcount entry",
                    self.index
                );
                Ok(())
            }
            Decrement::Drained => {
                let msg_key = keys::msg_key(&subscriber.mountpoint, msg_ref);
                let mut batch = WriteBatch::default();
                batch.delete(&idx_key);
                batch.delete(&msg_key);
                self.backend.apply(batch)?;
                Ok(())
            }
            Decrement::Remaining(_) => {
                self.backend.delete(&idx_key)?;
                Ok(())
            }
        }
    }

    fn find_for_subscriber_id(
        &self,
        scan: ScanId,
        subscriber: &SubscriberId,
    ) -> Result<(), StoreError> {
        let prefix = keys::idx_prefix(subscriber);
        for item in self.backend.scan_from(&prefix) {
            let (key, value) = match item {
                Ok(kv) => kv,
                Err(err) => {
                    warn!("bucket {} subscriber scan aborted: {err}", self.index);
                    break;
                }
            };
            if !key.starts_with(&prefix) {
                break;
            }
            let (_, msg_ref) = keys::decode_idx_key(&key)?;
            let idx = parse_index_value(&value)?;
            self.staging
                .insert(scan, subscriber, idx.timestamp, msg_ref);
        }
        Ok(())
    }
}
