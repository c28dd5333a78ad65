//! Log Recovery
//!
//! Replays frames into an Index and establishes the authoritative cursor.

use std::fs::File;
use std::path::Path;

use memmap2::Mmap;

use crate::error::{MapKvError, Result};
use crate::index::Index;
use crate::storage::{FileHeader, HEADER_SIZE};

use super::FrameReader;

/// Replays the log after open, or after another process appended
pub struct WalRecovery;

/// Result of a replay or verification pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryResult {
    /// Number of frames successfully decoded and applied
    pub frames_recovered: u64,

    /// How many of those were tombstones
    pub tombstones: u64,

    /// Offset just past the last valid frame (the new write cursor)
    pub end_offset: u64,

    /// Whether a torn or corrupt tail was cut off
    pub was_truncated: bool,

    /// Bytes between the last valid frame and the committed end
    pub discarded_bytes: u64,
}

impl WalRecovery {
    /// Apply every valid frame in `[start, end)` of `buf` to `index`
    ///
    /// This will:
    /// 1. Decode frames in order, later frames overriding earlier ones
    /// 2. Stop at the first checksum mismatch or truncated frame
    /// 3. Report the end of the last valid frame as the new cursor
    ///
    /// Corruption is not an error here: it can only come from a write that
    /// was never acknowledged.
    pub fn replay(buf: &[u8], start: u64, end: u64, index: &mut Index) -> RecoveryResult {
        let mut result = RecoveryResult {
            end_offset: start,
            ..Default::default()
        };

        let available = buf.len() as u64;
        if end > available {
            // Committed end lies past the mapped bytes: the file was cut short
            result.was_truncated = true;
        }
        let end = end.min(available);
        if start >= end {
            return result;
        }

        let reader = FrameReader::new(buf, start as usize, end as usize);
        for item in reader {
            match item {
                Ok((offset, frame)) => {
                    index.apply(&frame, offset as u64);
                    result.frames_recovered += 1;
                    if frame.is_tombstone() {
                        result.tombstones += 1;
                    }
                    result.end_offset = (offset + frame.len) as u64;
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        valid_end = result.end_offset,
                        committed_end = end,
                        "discarding corrupt log tail"
                    );
                    result.was_truncated = true;
                    break;
                }
            }
        }

        result.discarded_bytes = end.saturating_sub(result.end_offset);
        result
    }

    /// Verify integrity of a data file without modifying it
    pub fn verify(path: &Path) -> Result<RecoveryResult> {
        let file = File::open(path).map_err(|e| MapKvError::io_at(path, e))?;
        let len = file
            .metadata()
            .map_err(|e| MapKvError::io_at(path, e))?
            .len();
        if len < HEADER_SIZE {
            return Err(MapKvError::IncompatibleFormat(format!(
                "{}: {} bytes is too short for a header",
                path.display(),
                len
            )));
        }

        // SAFETY: read-only mapping; bytes are only trusted after checksum
        // validation.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| MapKvError::io_at(path, e))?;
        let header = FileHeader::decode(&mmap)?.unwrap_or_default();

        let mut index = Index::new();
        Ok(Self::replay(&mmap, HEADER_SIZE, header.cursor, &mut index))
    }
}
