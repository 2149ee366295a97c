//! Thin wrapper around the embedded ordered key-value database.
//!
//! Adds the two things the buckets need beyond raw RocksDB: a typed
//! lock-contention error so the open retry loop does not parse message
//! strings at the call site, and scan defaults (`fill_cache` off) for the
//! long index iterations recovery performs.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rocksdb::{Direction, ErrorKind, IteratorMode, Options, ReadOptions, WriteBatch, WriteOptions};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum BackendError {
    /// Another process (or bucket) holds the database lock. The only open
    /// error worth retrying.
    #[error("database lock held: {0}")]
    LockHeld(String),
    #[error("storage error: {0}")]
    Storage(#[from] rocksdb::Error),
}

impl BackendError {
    fn classify(err: rocksdb::Error) -> Self {
        let message = err.to_string();
        if err.kind() == ErrorKind::IOError
            && (message.contains("lock file") || message.contains("/LOCK"))
        {
            BackendError::LockHeld(message)
        } else {
            BackendError::Storage(err)
        }
    }

    pub fn is_lock_contention(&self) -> bool {
        matches!(self, BackendError::LockHeld(_))
    }
}

/// Tuning applied when a bucket opens its database.
#[derive(Debug, Clone)]
pub struct BackendOptions {
    pub create_if_missing: bool,
    /// Per-bucket memtable size; randomized by the caller to desynchronize
    /// compactions across buckets.
    pub write_buffer_size: usize,
    pub sync_writes: bool,
    pub fill_cache: bool,
    pub max_open_files: Option<i32>,
}

/// One open ordered key-value database.
#[derive(Debug)]
pub struct Backend {
    db: rocksdb::DB,
    path: PathBuf,
    sync_writes: bool,
    fill_cache: bool,
}

impl Backend {
    /// Open the database at `path` with a single attempt.
    pub fn open(path: &Path, opts: &BackendOptions) -> Result<Self, BackendError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(opts.create_if_missing);
        db_opts.set_write_buffer_size(opts.write_buffer_size);
        if let Some(max_open) = opts.max_open_files {
            db_opts.set_max_open_files(max_open);
        }
        let db = rocksdb::DB::open(&db_opts, path).map_err(BackendError::classify)?;
        Ok(Self {
            db,
            path: path.to_path_buf(),
            sync_writes: opts.sync_writes,
            fill_cache: opts.fill_cache,
        })
    }

    /// Open with bounded retry on lock contention.
    ///
    /// Makes up to `retries` attempts, sleeping `retry_delay` between lock
    /// failures. Any other error is terminal immediately; the last lock
    /// error is returned once attempts are exhausted.
    pub fn open_with_retry(
        path: &Path,
        opts: &BackendOptions,
        retries: u32,
        retry_delay: Duration,
    ) -> Result<Self, BackendError> {
        let mut attempt = 1;
        loop {
            match Self::open(path, opts) {
                Ok(backend) => return Ok(backend),
                Err(err) if err.is_lock_contention() && attempt < retries => {
                    warn!(
                        "backend lock held at {} (attempt {attempt}/{retries}), retrying in {:?}",
                        path.display(),
                        retry_delay
                    );
                    std::thread::sleep(retry_delay);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_opts(&self) -> WriteOptions {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.sync_writes);
        write_opts
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, BackendError> {
        Ok(self.db.get(key)?)
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), BackendError> {
        Ok(self.db.put_opt(key, value, &self.write_opts())?)
    }

    pub fn delete(&self, key: &[u8]) -> Result<(), BackendError> {
        Ok(self.db.delete_opt(key, &self.write_opts())?)
    }

    /// Commit a batch atomically: all of it becomes visible or none.
    pub fn apply(&self, batch: WriteBatch) -> Result<(), BackendError> {
        Ok(self.db.write_opt(batch, &self.write_opts())?)
    }

    /// Forward iterator positioned at the first key `>= start`.
    pub fn scan_from(
        &self,
        start: &[u8],
    ) -> impl Iterator<Item = Result<(Box<[u8]>, Box<[u8]>), BackendError>> + '_ {
        let mut read_opts = ReadOptions::default();
        read_opts.fill_cache(self.fill_cache);
        self.db
            .iterator_opt(IteratorMode::From(start, Direction::Forward), read_opts)
            .map(|item| item.map_err(BackendError::from))
    }
}
