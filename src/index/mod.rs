//! Index Module
//!
//! In-memory map from key to the location of its most recent frame.
//!
//! ## Responsibilities
//! - O(1) expected point lookups for `get_bytes`
//! - Rebuilt by replaying the log at open (and after foreign writes)
//! - Keeps tombstones internally so compaction accounting stays exact
//! - Tracks live bytes; stale bytes = log bytes - live bytes
//!
//! ## Data Structure Choice
//! A `HashMap` is enough: point lookups only, and compaction sorts the
//! (few) live entries itself when it needs a stable order.

mod table;

pub use table::Index;

/// Where the latest frame for a key lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexRecord {
    /// Absolute file offset of the frame
    pub offset: u64,
    /// Encoded frame length
    pub frame_len: u64,
    /// Length of the value (0 for tombstones)
    pub value_len: u64,
    /// The key was removed by this frame
    pub tombstone: bool,
}

impl IndexRecord {
    /// Record for a live value
    pub fn live(offset: u64, frame_len: u64, value_len: u64) -> Self {
        Self {
            offset,
            frame_len,
            value_len,
            tombstone: false,
        }
    }

    /// Record for a tombstone
    pub fn tombstone(offset: u64, frame_len: u64) -> Self {
        Self {
            offset,
            frame_len,
            value_len: 0,
            tombstone: true,
        }
    }
}
