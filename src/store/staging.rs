//! Shared staging area where bucket scans deposit per-subscriber results.
//!
//! Entries are keyed by `(scan_id, subscriber, timestamp, msg_ref)` and held
//! in ordered sets, so draining one `(scan_id, subscriber)` range yields refs
//! in ascending write-timestamp order. Concurrent inserts from different
//! buckets never collide: every live scan id belongs to exactly one find
//! call, and the reserved init id is written only during recovery, where one
//! bucket owns all entries it inserts.

use std::collections::BTreeSet;
use std::hash::Hasher;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use twox_hash::XxHash64;

use super::message::{MsgRef, SubscriberId};
use crate::core::time::Timestamp;

/// Identifier of one scan's staging entries.
///
/// `Init` is reserved for startup recovery; every find call mints a fresh
/// token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ScanId {
    Init,
    Token(u64),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct StagingKey {
    scan: ScanId,
    subscriber: SubscriberId,
    timestamp: Timestamp,
    msg_ref: MsgRef,
}

/// M ordered tables sharded by subscriber hash.
#[derive(Debug)]
pub struct StagingArea {
    tables: Vec<Mutex<BTreeSet<StagingKey>>>,
    next_token: AtomicU64,
}

impl StagingArea {
    pub fn new(tables: usize) -> Self {
        assert!(tables > 0, "staging area needs at least one table");
        Self {
            tables: (0..tables).map(|_| Mutex::new(BTreeSet::new())).collect(),
            next_token: AtomicU64::new(1),
        }
    }

    /// Mint a scan id unique for the lifetime of this store.
    pub fn fresh_scan_id(&self) -> ScanId {
        ScanId::Token(self.next_token.fetch_add(1, Ordering::Relaxed))
    }

    fn table_for(&self, subscriber: &SubscriberId) -> &Mutex<BTreeSet<StagingKey>> {
        let mut hasher = XxHash64::with_seed(0);
        hasher.write(subscriber.mountpoint.as_bytes());
        hasher.write_u8(0);
        hasher.write(subscriber.client_id.as_bytes());
        let slot = (hasher.finish() % self.tables.len() as u64) as usize;
        &self.tables[slot]
    }

    /// Deposit one scan result.
    pub fn insert(
        &self,
        scan: ScanId,
        subscriber: &SubscriberId,
        timestamp: Timestamp,
        msg_ref: MsgRef,
    ) {
        self.table_for(subscriber).lock().insert(StagingKey {
            scan,
            subscriber: subscriber.clone(),
            timestamp,
            msg_ref,
        });
    }

    /// Remove and return every entry of `(scan, subscriber)`, in ascending
    /// `(timestamp, msg_ref)` order. Empty when the scan staged nothing.
    pub fn drain(&self, scan: ScanId, subscriber: &SubscriberId) -> Vec<MsgRef> {
        let lower = StagingKey {
            scan,
            subscriber: subscriber.clone(),
            timestamp: Timestamp::ZERO,
            msg_ref: MsgRef::new(Vec::new()),
        };
        let mut table = self.table_for(subscriber).lock();
        let matched: Vec<StagingKey> = table
            .range((Bound::Included(lower), Bound::Unbounded))
            .take_while(|key| key.scan == scan && key.subscriber == *subscriber)
            .cloned()
            .collect();
        for key in &matched {
            table.remove(key);
        }
        matched.into_iter().map(|key| key.msg_ref).collect()
    }

    /// Entries currently staged, across all tables.
    pub fn len(&self) -> usize {
        self.tables.iter().map(|t| t.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(client: &str) -> SubscriberId {
        SubscriberId::new("mp", client)
    }

    fn ts(secs_lo: u32) -> Timestamp {
        Timestamp {
            secs_hi: 1,
            secs_lo,
            micros: 0,
        }
    }

    #[test]
    fn drain_returns_timestamp_order_and_empties() {
        let area = StagingArea::new(4);
        let s = sub("c1");
        let scan = area.fresh_scan_id();
        area.insert(scan, &s, ts(30), MsgRef::new(vec![3]));
        area.insert(scan, &s, ts(10), MsgRef::new(vec![1]));
        area.insert(scan, &s, ts(20), MsgRef::new(vec![2]));

        let refs = area.drain(scan, &s);
        assert_eq!(
            refs,
            vec![
                MsgRef::new(vec![1]),
                MsgRef::new(vec![2]),
                MsgRef::new(vec![3])
            ]
        );
        assert!(area.drain(scan, &s).is_empty());
        assert!(area.is_empty());
    }

    #[test]
    fn scans_and_subscribers_are_disjoint() {
        let area = StagingArea::new(1);
        let a = sub("a");
        let b = sub("b");
        let scan1 = area.fresh_scan_id();
        let scan2 = area.fresh_scan_id();
        area.insert(scan1, &a, ts(1), MsgRef::new(vec![1]));
        area.insert(scan2, &a, ts(1), MsgRef::new(vec![2]));
        area.insert(scan1, &b, ts(1), MsgRef::new(vec![3]));

        assert_eq!(area.drain(scan1, &a), vec![MsgRef::new(vec![1])]);
        assert_eq!(area.drain(scan2, &a), vec![MsgRef::new(vec![2])]);
        assert_eq!(area.drain(scan1, &b), vec![MsgRef::new(vec![3])]);
    }

    #[test]
    fn init_scan_is_distinct_from_tokens() {
        let area = StagingArea::new(2);
        let s = sub("c");
        area.insert(ScanId::Init, &s, ts(5), MsgRef::new(vec![9]));
        let scan = area.fresh_scan_id();
        assert!(area.drain(scan, &s).is_empty());
        assert_eq!(area.drain(ScanId::Init, &s), vec![MsgRef::new(vec![9])]);
    }

    #[test]
    fn equal_timestamps_tie_break_on_ref() {
        let area = StagingArea::new(1);
        let s = sub("c");
        let scan = area.fresh_scan_id();
        area.insert(scan, &s, ts(1), MsgRef::new(vec![2]));
        area.insert(scan, &s, ts(1), MsgRef::new(vec![1]));
        assert_eq!(
            area.drain(scan, &s),
            vec![MsgRef::new(vec![1]), MsgRef::new(vec![2])]
        );
    }

    #[test]
    fn fresh_ids_never_repeat() {
        let area = StagingArea::new(1);
        let a = area.fresh_scan_id();
        let b = area.fresh_scan_id();
        assert_ne!(a, b);
        assert_ne!(a, ScanId::Init);
    }
}
