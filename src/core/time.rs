use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Buf, BufMut};

/// Wall-clock triple captured at write time and stored inside index values.
///
/// The split into whole mega-seconds, remaining seconds, and microseconds
/// keeps the 12-byte big-endian encoding lexicographically chronological,
/// which is what both the index value ordering and the staging-table key
/// ordering rely on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    pub secs_hi: u32,
    pub secs_lo: u32,
    pub micros: u32,
}

/// Encoded width of a [`Timestamp`] on disk.
pub const TIMESTAMP_WIRE_LEN: usize = 12;

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp {
        secs_hi: 0,
        secs_lo: 0,
        micros: 0,
    };

    /// Capture the current wall-clock time.
    pub fn now() -> Self {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let secs = elapsed.as_secs();
        Self {
            secs_hi: (secs / 1_000_000) as u32,
            secs_lo: (secs % 1_000_000) as u32,
            micros: elapsed.subsec_micros(),
        }
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32(self.secs_hi);
        buf.put_u32(self.secs_lo);
        buf.put_u32(self.micros);
    }

    /// Decode a timestamp; the caller guarantees 12 readable bytes.
    pub fn decode(buf: &mut impl Buf) -> Self {
        Self {
            secs_hi: buf.get_u32(),
            secs_lo: buf.get_u32(),
            micros: buf.get_u32(),
        }
    }
}
