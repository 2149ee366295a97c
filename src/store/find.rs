//! Per-call find coordination.
//!
//! A find is the subscriber-reconnect path: collect every message ref still
//! owed to a subscriber, across all buckets, in write-timestamp order.

use tracing::debug;

use super::message::{MsgRef, SubscriberId};
use super::registry::BucketRegistry;
use super::staging::{ScanId, StagingArea};
use super::{FindMode, StoreError};

/// Run one find for `subscriber`.
///
/// `QueueInit` first harvests whatever recovery staged under the reserved
/// init scan id; a nonempty harvest is the complete answer, because recovery
/// already walked every bucket. Otherwise a fresh scan id is minted, every
/// registered bucket stages its index entries for the subscriber, and the
/// staged range is drained in ascending `(timestamp, msg_ref)` order.
pub(crate) async fn find_for_subscriber(
    registry: &BucketRegistry,
    staging: &StagingArea,
    subscriber: &SubscriberId,
    mode: FindMode,
) -> Result<Vec<MsgRef>, StoreError> {
    if mode == FindMode::QueueInit {
        let preloaded = staging.drain(ScanId::Init, subscriber);
        if !preloaded.is_empty() {
            return Ok(preloaded);
        }
    }

    let scan = staging.fresh_scan_id();
    for handle in registry.buckets() {
        match handle.find(scan, subscriber.clone()).await {
            Ok(()) => {}
            Err(StoreError::BucketUnavailable) => {
                // A bucket that went away contributes nothing; partial
                // coverage of live buckets is still a complete answer for
                // the keys they own.
                debug!("bucket {} unreachable during find, skipped", handle.index());
            }
            Err(err) => return Err(err),
        }
    }
    Ok(staging.drain(scan, subscriber))
}
