//! Data file header
//!
//! Fixed 64-byte region at offset 0 of every data file.

use crate::error::{MapKvError, Result};

/// Magic bytes identifying a mapkv data file
pub const MAGIC: &[u8; 4] = b"MPKV";

/// Current data file format version
pub const FORMAT_VERSION: u16 = 1;

/// Header size; the first frame starts here
pub const HEADER_SIZE: u64 = 64;

/// Set on a file that a compaction replaced; holders must reopen the path
pub const FLAG_RETIRED: u16 = 0x0001;

/// Decoded header fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub version: u16,
    pub flags: u16,
    /// Bumped by every committed append, clear or compaction
    pub generation: u64,
    /// Bumped by every rewrite (compaction or clear)
    pub epoch: u64,
    /// Committed logical end of data
    pub cursor: u64,
}

impl Default for FileHeader {
    fn default() -> Self {
        Self {
            version: FORMAT_VERSION,
            flags: 0,
            generation: 0,
            epoch: 0,
            cursor: HEADER_SIZE,
        }
    }
}

impl FileHeader {
    /// Header for a freshly created, empty file
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_retired(&self) -> bool {
        self.flags & FLAG_RETIRED != 0
    }

    /// Bytes of the committed log region (excluding the header)
    pub fn log_len(&self) -> u64 {
        self.cursor.saturating_sub(HEADER_SIZE)
    }

    /// Serialize to the on-disk layout:
    /// magic (4) | version (2) | flags (2) | generation (8) | epoch (8) |
    /// cursor (8) | reserved (32)
    pub fn encode(&self) -> [u8; HEADER_SIZE as usize] {
        let mut buf = [0u8; HEADER_SIZE as usize];
        buf[0..4].copy_from_slice(MAGIC);
        buf[4..6].copy_from_slice(&self.version.to_le_bytes());
        buf[6..8].copy_from_slice(&self.flags.to_le_bytes());
        buf[8..16].copy_from_slice(&self.generation.to_le_bytes());
        buf[16..24].copy_from_slice(&self.epoch.to_le_bytes());
        buf[24..32].copy_from_slice(&self.cursor.to_le_bytes());
        buf
    }

    /// Parse a header.
    ///
    /// Returns `Ok(None)` for an all-zero (never initialized) header.
    pub fn decode(bytes: &[u8]) -> Result<Option<Self>> {
        let bytes = bytes.get(..HEADER_SIZE as usize).ok_or_else(|| {
            MapKvError::IncompatibleFormat(format!(
                "file is {} bytes, shorter than the {} byte header",
                bytes.len(),
                HEADER_SIZE
            ))
        })?;

        if bytes.iter().all(|&b| b == 0) {
            return Ok(None);
        }

        if &bytes[0..4] != MAGIC {
            return Err(MapKvError::IncompatibleFormat(format!(
                "invalid magic: expected {:?}, got {:?}",
                MAGIC,
                &bytes[0..4]
            )));
        }

        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version == 0 || version > FORMAT_VERSION {
            return Err(MapKvError::IncompatibleFormat(format!(
                "unsupported format version {} (this build reads up to {})",
                version, FORMAT_VERSION
            )));
        }

        let flags = u16::from_le_bytes([bytes[6], bytes[7]]);
        let generation = read_u64(&bytes[8..16]);
        let epoch = read_u64(&bytes[16..24]);
        let cursor = read_u64(&bytes[24..32]).max(HEADER_SIZE);

        Ok(Some(Self {
            version,
            flags,
            generation,
            epoch,
            cursor,
        }))
    }
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    u64::from_le_bytes(buf)
}
