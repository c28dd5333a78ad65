//! Memory-mapped backing file
//!
//! Owns the data file and its read-write mapping. All offsets are absolute
//! file offsets; the header lives in the first `HEADER_SIZE` bytes.

use std::fs::{self, File, Metadata, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use memmap2::MmapMut;

use crate::error::{MapKvError, Result};

use super::{FileHeader, HEADER_SIZE};

/// Capacities are always whole pages
pub const PAGE_SIZE: u64 = 4096;

/// A growable, memory-mapped file
///
/// ## Invariants
/// - `capacity()` equals the mapped length, which is the file length at the
///   time of the last (re)map
/// - the file only grows; a smaller file is produced by compaction writing a
///   new file and renaming it into place
#[derive(Debug)]
pub struct MappedFile {
    path: PathBuf,
    file: File,
    mmap: MmapMut,
}

impl MappedFile {
    /// Open or create the file at `path` and map it
    ///
    /// New (or shorter-than-header) files are sized to `initial_capacity`,
    /// rounded up to whole pages. The new region is zero-filled, which reads
    /// as an uninitialized header.
    pub fn open(path: &Path, initial_capacity: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| MapKvError::io_at(path, e))?;

        let len = file
            .metadata()
            .map_err(|e| MapKvError::io_at(path, e))?
            .len();
        if len < HEADER_SIZE {
            let capacity = round_to_page(initial_capacity.max(HEADER_SIZE));
            file.set_len(capacity)
                .map_err(|e| MapKvError::io_at(path, e))?;
            tracing::debug!(path = %path.display(), capacity, "created data file");
        }

        Self::from_file(path, file)
    }

    /// Map an already-sized file
    pub fn from_file(path: &Path, file: File) -> Result<Self> {
        let mmap = map(path, &file)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            mmap,
        })
    }

    /// Path this file is published under
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current mapped length
    pub fn capacity(&self) -> u64 {
        self.mmap.len() as u64
    }

    /// Whole mapping
    pub fn as_slice(&self) -> &[u8] {
        &self.mmap[..]
    }

    /// Borrow `len` bytes at `offset`
    pub fn read_at(&self, offset: u64, len: usize) -> Result<&[u8]> {
        let (start, end) = self.checked_range(offset, len)?;
        Ok(&self.mmap[start..end])
    }

    /// Copy `bytes` into already-reserved space at `offset`
    pub fn write_at(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        let (start, end) = self.checked_range(offset, bytes.len())?;
        self.mmap[start..end].copy_from_slice(bytes);
        Ok(())
    }

    /// Make sure at least `required` bytes are mapped, growing geometrically
    ///
    /// Returns true if this call grew the file.
    pub fn ensure_capacity(&mut self, required: u64, growth_factor: u32) -> Result<bool> {
        if required <= self.capacity() {
            return Ok(false);
        }

        // Another process may already have grown the file
        self.refresh()?;
        if required <= self.capacity() {
            return Ok(false);
        }

        let old = self.capacity();
        let new = grown_capacity(old, required, growth_factor).ok_or_else(|| {
            MapKvError::InvalidArgument(format!("capacity of {} bytes is not addressable", required))
        })?;

        self.file
            .set_len(new)
            .map_err(|e| MapKvError::io_at(&self.path, e))?;
        self.mmap = map(&self.path, &self.file)?;

        tracing::debug!(path = %self.path.display(), old, new, "grew data file");
        Ok(true)
    }

    /// Remap if the on-disk length differs from the mapping
    ///
    /// Returns true if a remap happened.
    pub fn refresh(&mut self) -> Result<bool> {
        let len = self
            .file
            .metadata()
            .map_err(|e| MapKvError::io_at(&self.path, e))?
            .len();
        if len == self.capacity() {
            return Ok(false);
        }
        self.mmap = map(&self.path, &self.file)?;
        Ok(true)
    }

    /// Whether the path no longer names the mapped file
    ///
    /// True once another process has renamed a new file over the path (or
    /// removed it), whether or not it got to mark this one retired.
    pub fn is_replaced(&self) -> Result<bool> {
        let on_disk = match fs::metadata(&self.path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(MapKvError::io_at(&self.path, e)),
        };
        let mapped = self
            .file
            .metadata()
            .map_err(|e| MapKvError::io_at(&self.path, e))?;
        Ok(!same_file(&mapped, &on_disk))
    }

    /// Parse the header (`None` if never initialized)
    pub fn read_header(&self) -> Result<Option<FileHeader>> {
        FileHeader::decode(self.as_slice())
    }

    pub fn write_header(&mut self, header: &FileHeader) -> Result<()> {
        self.write_at(0, &header.encode())
    }

    /// msync the whole mapping
    pub fn flush(&self) -> Result<()> {
        self.mmap
            .flush()
            .map_err(|e| MapKvError::io_at(&self.path, e))
    }

    /// msync a byte range
    pub fn flush_range(&self, offset: u64, len: usize) -> Result<()> {
        let (start, end) = self.checked_range(offset, len)?;
        self.mmap
            .flush_range(start, end - start)
            .map_err(|e| MapKvError::io_at(&self.path, e))
    }

    /// fsync file data and metadata
    pub fn sync_all(&self) -> Result<()> {
        self.flush()?;
        self.file
            .sync_all()
            .map_err(|e| MapKvError::io_at(&self.path, e))
    }

    fn checked_range(&self, offset: u64, len: usize) -> Result<(usize, usize)> {
        let start = usize::try_from(offset).ok();
        let end = start.and_then(|s| s.checked_add(len));
        match (start, end) {
            (Some(start), Some(end)) if end <= self.mmap.len() => Ok((start, end)),
            _ => Err(MapKvError::StoreUnavailable(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "{}: range {}+{} outside mapped capacity {}",
                    self.path.display(),
                    offset,
                    len,
                    self.mmap.len()
                ),
            ))),
        }
    }
}

/// Capacity after growing `current` geometrically until `required` fits
pub fn grown_capacity(current: u64, required: u64, growth_factor: u32) -> Option<u64> {
    let mut capacity = round_to_page(current.max(PAGE_SIZE));
    while capacity < required {
        capacity = capacity.checked_mul(u64::from(growth_factor.max(2)))?;
    }
    Some(capacity)
}

/// Round up to a whole number of pages
pub fn round_to_page(len: u64) -> u64 {
    len.div_ceil(PAGE_SIZE).max(1) * PAGE_SIZE
}

#[cfg(unix)]
fn same_file(a: &Metadata, b: &Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    a.dev() == b.dev() && a.ino() == b.ino()
}

// No stable file identity elsewhere; the retired flag is the only signal
#[cfg(not(unix))]
fn same_file(_a: &Metadata, _b: &Metadata) -> bool {
    true
}

fn map(path: &Path, file: &File) -> Result<MmapMut> {
    // SAFETY: other processes may map the same file. Mutation only happens
    // under the exclusive file lock, and readers validate every frame's
    // checksum before trusting its bytes.
    unsafe { MmapMut::map_mut(file) }.map_err(|e| MapKvError::io_at(path, e))
}
