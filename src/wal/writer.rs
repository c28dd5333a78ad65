//! Log Writer
//!
//! Appends frames to the mapped data file.

use crate::config::SyncStrategy;
use crate::error::{MapKvError, Result};
use crate::frame;
use crate::storage::{FileHeader, MappedFile, HEADER_SIZE};

/// Location of a frame the writer just committed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Appended {
    /// Absolute offset of the frame
    pub offset: u64,
    /// Encoded frame length
    pub len: u64,
    /// Header generation after the commit
    pub generation: u64,
}

/// Appends encoded frames at the write cursor
///
/// ## Commit protocol
/// 1. Encode the frame
/// 2. Ensure capacity (may grow and remap)
/// 3. Copy the frame into reserved space at the cursor
/// 4. (EveryWrite) msync the frame
/// 5. Write `cursor` and `generation + 1` into the header: the commit point
///
/// A crash before step 5 leaves the frame past the committed cursor, where
/// replay never looks.
pub struct LogWriter {
    file: MappedFile,
    cursor: u64,
    sync_strategy: SyncStrategy,
    growth_factor: u32,
    unsynced: usize,
    scratch: Vec<u8>,
}

impl LogWriter {
    /// Create a writer whose next frame lands at `cursor`
    pub fn new(file: MappedFile, cursor: u64, sync_strategy: SyncStrategy, growth_factor: u32) -> Self {
        Self {
            file,
            cursor: cursor.max(HEADER_SIZE),
            sync_strategy,
            growth_factor,
            unsynced: 0,
            scratch: Vec::new(),
        }
    }

    /// Append a frame (`value = None` appends a tombstone)
    pub fn append(&mut self, key: &[u8], value: Option<&[u8]>) -> Result<Appended> {
        self.scratch.clear();
        frame::encode_into(&mut self.scratch, key, value)?;

        let offset = self.cursor;
        let len = self.scratch.len() as u64;
        let end = offset + len;

        self.file.ensure_capacity(end, self.growth_factor)?;
        self.file.write_at(offset, &self.scratch)?;
        if self.sync_strategy == SyncStrategy::EveryWrite {
            self.file.flush_range(offset, self.scratch.len())?;
        }

        // Commit
        let mut header = self.header()?;
        header.generation += 1;
        header.cursor = end;
        self.file.write_header(&header)?;
        self.cursor = end;

        self.after_commit()?;

        tracing::trace!(offset, len, generation = header.generation, "appended frame");

        Ok(Appended {
            offset,
            len,
            generation: header.generation,
        })
    }

    /// Force sync to disk
    pub fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.unsynced = 0;
        Ok(())
    }

    /// Current on-disk header
    pub fn header(&self) -> Result<FileHeader> {
        self.file
            .read_header()?
            .ok_or_else(|| MapKvError::Corrupted("data file header is missing".to_string()))
    }

    /// Get the current write cursor
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Move the cursor (after replaying frames another process appended)
    pub fn set_cursor(&mut self, cursor: u64) {
        self.cursor = cursor.max(HEADER_SIZE);
    }

    /// Bytes of log between the header and the cursor
    pub fn log_len(&self) -> u64 {
        self.cursor - HEADER_SIZE
    }

    pub fn capacity(&self) -> u64 {
        self.file.capacity()
    }

    pub fn growth_factor(&self) -> u32 {
        self.growth_factor
    }

    pub fn file(&self) -> &MappedFile {
        &self.file
    }

    pub fn file_mut(&mut self) -> &mut MappedFile {
        &mut self.file
    }

    /// Swap in a rewritten file; returns the old one
    pub fn replace_file(&mut self, file: MappedFile, cursor: u64) -> MappedFile {
        self.cursor = cursor.max(HEADER_SIZE);
        self.unsynced = 0;
        std::mem::replace(&mut self.file, file)
    }

    fn after_commit(&mut self) -> Result<()> {
        match self.sync_strategy {
            SyncStrategy::EveryWrite => {
                self.file.flush_range(0, HEADER_SIZE as usize)?;
            }
            SyncStrategy::EveryNEntries { count } => {
                self.unsynced += 1;
                if self.unsynced >= count {
                    self.sync()?;
                }
            }
            SyncStrategy::Never => {}
        }
        Ok(())
    }
}
