//! Index implementation
//!
//! HashMap-based key directory with live-byte accounting.

use std::collections::HashMap;

use crate::frame::Frame;
use crate::storage::{FileHeader, MappedFile, HEADER_SIZE};
use crate::wal::{RecoveryResult, WalRecovery};

use super::IndexRecord;

/// In-memory key directory
///
/// Not internally synchronized: the store's `RwLock` guards it together with
/// the log writer so both always move in step.
#[derive(Debug, Default)]
pub struct Index {
    /// Latest record per key, tombstones included
    map: HashMap<Vec<u8>, IndexRecord>,
    /// Sum of frame lengths of live records
    live_bytes: u64,
    /// Number of tombstone records
    tombstones: usize,
}

impl Index {
    /// Create a new empty Index
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from the committed region of a mapped file
    ///
    /// Scans `[HEADER_SIZE, header.cursor)` and stops at the first frame that
    /// fails to decode. `RecoveryResult::end_offset` is the authoritative
    /// write cursor.
    pub fn rebuild(file: &MappedFile, header: &FileHeader) -> (Self, RecoveryResult) {
        let mut index = Self::new();
        let result = WalRecovery::replay(file.as_slice(), HEADER_SIZE, header.cursor, &mut index);
        (index, result)
    }

    /// Get the live record for a key (tombstones read as absent)
    pub fn lookup(&self, key: &[u8]) -> Option<&IndexRecord> {
        self.map.get(key).filter(|record| !record.tombstone)
    }

    /// Get the record for a key, tombstones included
    pub fn record(&self, key: &[u8]) -> Option<&IndexRecord> {
        self.map.get(key)
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.lookup(key).is_some()
    }

    /// Insert or replace the record for a key
    pub fn upsert(&mut self, key: &[u8], record: IndexRecord) {
        let previous = match self.map.get_mut(key) {
            Some(slot) => Some(std::mem::replace(slot, record)),
            None => {
                self.map.insert(key.to_vec(), record);
                None
            }
        };

        if let Some(old) = previous {
            self.forget(&old);
        }
        if record.tombstone {
            self.tombstones += 1;
        } else {
            self.live_bytes += record.frame_len;
        }
    }

    /// Record that a key was removed by the tombstone frame at `offset`
    pub fn mark_tombstone(&mut self, key: &[u8], offset: u64, frame_len: u64) {
        self.upsert(key, IndexRecord::tombstone(offset, frame_len));
    }

    /// Apply a decoded frame found at `offset`
    pub fn apply(&mut self, frame: &Frame<'_>, offset: u64) {
        let frame_len = frame.len as u64;
        match frame.value {
            Some(value) => {
                self.upsert(frame.key, IndexRecord::live(offset, frame_len, value.len() as u64))
            }
            None => self.mark_tombstone(frame.key, offset, frame_len),
        }
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        self.map.len() - self.tombstones
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes occupied by the frames of live keys
    pub fn live_bytes(&self) -> u64 {
        self.live_bytes
    }

    pub fn tombstone_count(&self) -> usize {
        self.tombstones
    }

    /// Live keys, in no particular order
    pub fn keys(&self) -> impl Iterator<Item = &[u8]> + '_ {
        self.map
            .iter()
            .filter(|(_, record)| !record.tombstone)
            .map(|(key, _)| key.as_slice())
    }

    /// Live entries sorted by key (for compaction)
    pub fn live_entries(&self) -> Vec<(&[u8], IndexRecord)> {
        let mut entries: Vec<_> = self
            .map
            .iter()
            .filter(|(_, record)| !record.tombstone)
            .map(|(key, record)| (key.as_slice(), *record))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
    }

    /// Clear all entries
    pub fn clear(&mut self) {
        self.map.clear();
        self.live_bytes = 0;
        self.tombstones = 0;
    }

    fn forget(&mut self, record: &IndexRecord) {
        if record.tombstone {
            self.tombstones -= 1;
        } else {
            self.live_bytes -= record.frame_len;
        }
    }
}
