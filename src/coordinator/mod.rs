//! Process Coordinator
//!
//! Arbitrates access to a shared data file across OS processes.
//!
//! ## Protocol
//! - Appends, clears and compactions hold the exclusive file lock
//! - Reads hold the shared file lock while they check the header and touch
//!   the mapping
//! - Every committed change bumps the header generation; rewrites also bump
//!   the epoch and mark the replaced file as retired. A rewriter that dies
//!   before setting the flag is still caught by comparing inodes
//! - Before trusting its index a process compares the header against the
//!   (generation, epoch) it last observed:
//!
//! ```text
//!   retired flag set        → Retired    reopen the path, full rebuild
//!   path is another inode   → Retired
//!   epoch differs           → Rewritten  full rebuild
//!   generation differs      → Appended   replay frames past our cursor
//!   otherwise               → Fresh
//! ```
//!
//! The lock lives in a sidecar file so it survives the data file being
//! replaced by a compaction.

mod file_lock;

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

pub use file_lock::{FileLock, LockGuard, LockMode};

use crate::error::{MapKvError, Result};
use crate::storage::{FileHeader, MappedFile, HEADER_SIZE};

/// Header state a process last synchronized its index with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Observation {
    pub generation: u64,
    pub epoch: u64,
}

impl Observation {
    pub fn of(header: &FileHeader) -> Self {
        Self {
            generation: header.generation,
            epoch: header.epoch,
        }
    }
}

/// How far an index is behind the file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
    Fresh,
    Appended,
    Rewritten,
    Retired,
}

/// File lock plus timeout policy for one store
#[derive(Debug)]
pub struct ProcessCoordinator {
    lock: FileLock,
    timeout: Option<Duration>,
}

impl ProcessCoordinator {
    /// Open the lock file for a store
    pub fn open(lock_path: &Path, timeout: Option<Duration>) -> Result<Self> {
        Ok(Self {
            lock: FileLock::open(lock_path)?,
            timeout,
        })
    }

    /// Lock for an operation that only reads the file
    pub fn acquire_shared(&self) -> Result<LockGuard<'_>> {
        self.lock.shared(self.timeout)
    }

    /// Lock for an operation that appends to or rewrites the file
    pub fn acquire_exclusive(&self) -> Result<LockGuard<'_>> {
        self.lock.exclusive(self.timeout)
    }

    pub fn lock(&self) -> &FileLock {
        &self.lock
    }

    /// Compare the file's header with what the index was built from
    ///
    /// Call with at least the shared lock held.
    pub fn observe(file: &MappedFile, seen: &Observation) -> Result<Staleness> {
        let header = file
            .read_header()?
            .ok_or_else(|| MapKvError::Corrupted("data file header is missing".to_string()))?;

        let staleness = if header.is_retired() || file.is_replaced()? {
            Staleness::Retired
        } else if header.epoch != seen.epoch {
            Staleness::Rewritten
        } else if header.generation != seen.generation {
            Staleness::Appended
        } else {
            Staleness::Fresh
        };
        Ok(staleness)
    }
}

/// Read the generation marker straight from a data file
///
/// A file without an initialized header is at generation 0.
pub fn current_generation(path: &Path) -> Result<u64> {
    let mut file = File::open(path).map_err(|e| MapKvError::io_at(path, e))?;
    let mut buf = [0u8; HEADER_SIZE as usize];
    file.read_exact(&mut buf)
        .map_err(|e| MapKvError::io_at(path, e))?;
    Ok(FileHeader::decode(&buf)?.map_or(0, |h| h.generation))
}
