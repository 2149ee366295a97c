use std::hash::Hasher;

use parking_lot::RwLock;
use twox_hash::XxHash64;

use super::bucket::BucketHandle;

/// Maps keys to the bucket that owns them.
///
/// Slots are filled exactly once, by each bucket worker after its recovery
/// completes; a bucket is not discoverable before that, which is how the
/// store keeps requests away from partially initialized backends.
#[derive(Debug)]
pub struct BucketRegistry {
    slots: Vec<RwLock<Option<BucketHandle>>>,
}

impl BucketRegistry {
    pub fn new(buckets: usize) -> Self {
        assert!(buckets > 0, "registry needs at least one bucket");
        Self {
            slots: (0..buckets).map(|_| RwLock::new(None)).collect(),
        }
    }

    pub fn bucket_count(&self) -> usize {
        self.slots.len()
    }

    /// Slot index owning `key`. Deterministic across restarts: the on-disk
    /// bucket layout depends on this mapping staying put for a given N.
    pub fn slot_for(&self, key: &[u8]) -> usize {
        let mut hasher = XxHash64::default();
        hasher.write(key);
        (hasher.finish() % self.slots.len() as u64) as usize
    }

    /// Handle of the bucket owning `key`, if it has registered.
    pub fn bucket_for(&self, key: &[u8]) -> Option<BucketHandle> {
        self.slots[self.slot_for(key)].read().clone()
    }

    /// Handle of a specific bucket, if it has registered.
    pub fn bucket(&self, index: usize) -> Option<BucketHandle> {
        self.slots.get(index).and_then(|slot| slot.read().clone())
    }

    /// All registered buckets, in slot order. Used by fan-out find.
    pub fn buckets(&self) -> Vec<BucketHandle> {
        self.slots
            .iter()
            .filter_map(|slot| slot.read().clone())
            .collect()
    }

    /// Called by a bucket worker once its recovery is done.
    pub fn register(&self, index: usize, handle: BucketHandle) {
        *self.slots[index].write() = Some(handle);
    }

    /// Drop every registered handle. Buckets become unreachable and their
    /// workers drain outstanding requests and exit.
    pub fn clear(&self) {
        for slot in &self.slots {
            *slot.write() = None;
        }
    }
}
