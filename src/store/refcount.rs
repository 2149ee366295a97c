use std::collections::HashMap;

use super::message::MsgRef;

/// Outcome of a refcount decrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decrement {
    /// No counter row existed; the caller double-deleted.
    NotFound,
    /// The count reached zero and the row was removed.
    Drained,
    /// References remain.
    Remaining(u64),
}

/// In-memory reference counts, one table per bucket.
///
/// The owning bucket worker is the only mutator, so no interior locking.
/// After recovery the count for a ref equals the number of on-disk index
/// entries naming it within this bucket.
#[derive(Debug, Default)]
pub struct RefcountTable {
    counts: HashMap<MsgRef, u64>,
}

impl RefcountTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment and return the new total (1 on first insert).
    pub fn incr(&mut self, msg_ref: &MsgRef) -> u64 {
        let count = self.counts.entry(msg_ref.clone()).or_insert(0);
        *count += 1;
        *count
    }

    /// Decrement; removes the row when it reaches zero.
    pub fn decr(&mut self, msg_ref: &MsgRef) -> Decrement {
        match self.counts.get_mut(msg_ref) {
            None => Decrement::NotFound,
            Some(count) if *count <= 1 => {
                self.counts.remove(msg_ref);
                Decrement::Drained
            }
            Some(count) => {
                *count -= 1;
                Decrement::Remaining(*count)
            }
        }
    }

    /// Current count, 0 when absent.
    pub fn count(&self, msg_ref: &MsgRef) -> u64 {
        self.counts.get(msg_ref).copied().unwrap_or(0)
    }

    /// Number of distinct referenced payloads.
    pub fn rows(&self) -> usize {
        self.counts.len()
    }

    /// Sum of all reference counts.
    pub fn total_references(&self) -> u64 {
        self.counts.values().sum()
    }
}
