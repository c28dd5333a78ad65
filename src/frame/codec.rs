//! Frame encoding and decoding

use thiserror::Error;

use crate::error::{MapKvError, Result};

/// Fixed bytes per frame: KeyLen (4) + ValLen (4) + CRC (4)
pub const FRAME_OVERHEAD: usize = 12;

/// Sentinel value length indicating a tombstone (deleted key)
pub const TOMBSTONE_MARKER: u32 = u32::MAX;

/// Largest accepted key
pub const MAX_KEY_LEN: usize = u16::MAX as usize;

/// Largest accepted value (one below the tombstone marker)
pub const MAX_VALUE_LEN: usize = (TOMBSTONE_MARKER - 1) as usize;

/// A decoded frame borrowing from the buffer it was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    pub key: &'a [u8],
    /// `None` for a tombstone
    pub value: Option<&'a [u8]>,
    /// Total encoded length, including overhead
    pub len: usize,
}

impl Frame<'_> {
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }
}

/// Why a frame could not be decoded
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("truncated frame at offset {offset}: need {needed} bytes, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("checksum mismatch at offset {offset}: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        offset: usize,
        stored: u32,
        computed: u32,
    },
}

impl DecodeError {
    /// Offset of the frame that failed to decode
    pub fn offset(&self) -> usize {
        match self {
            DecodeError::Truncated { offset, .. } => *offset,
            DecodeError::ChecksumMismatch { offset, .. } => *offset,
        }
    }
}

/// Exact encoded size of a frame
pub fn encoded_len(key: &[u8], value: Option<&[u8]>) -> usize {
    FRAME_OVERHEAD + key.len() + value.map_or(0, <[u8]>::len)
}

/// Encode a frame into a fresh buffer (`value = None` encodes a tombstone)
pub fn encode(key: &[u8], value: Option<&[u8]>) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(encoded_len(key, value));
    encode_into(&mut out, key, value)?;
    Ok(out)
}

/// Append an encoded frame to `out`
pub fn encode_into(out: &mut Vec<u8>, key: &[u8], value: Option<&[u8]>) -> Result<()> {
    if key.len() > MAX_KEY_LEN {
        return Err(MapKvError::InvalidArgument(format!(
            "key of {} bytes exceeds the {} byte limit",
            key.len(),
            MAX_KEY_LEN
        )));
    }

    let val_len = match value {
        Some(v) if v.len() > MAX_VALUE_LEN => {
            return Err(MapKvError::InvalidArgument(format!(
                "value of {} bytes exceeds the {} byte limit",
                v.len(),
                MAX_VALUE_LEN
            )));
        }
        Some(v) => v.len() as u32,
        None => TOMBSTONE_MARKER,
    };

    let start = out.len();
    out.reserve(encoded_len(key, value));
    out.extend_from_slice(&(key.len() as u32).to_le_bytes());
    out.extend_from_slice(key);
    out.extend_from_slice(&val_len.to_le_bytes());
    if let Some(v) = value {
        out.extend_from_slice(v);
    }

    let crc = crc32fast::hash(&out[start..]);
    out.extend_from_slice(&crc.to_le_bytes());

    Ok(())
}

/// Decode the frame starting at `offset` in `buf`
pub fn decode(buf: &[u8], offset: usize) -> std::result::Result<Frame<'_>, DecodeError> {
    let rest = buf.get(offset..).unwrap_or(&[]);
    let truncated = |needed: usize| DecodeError::Truncated {
        offset,
        needed,
        available: rest.len(),
    };

    // [key_len][key][val_len]
    let key_len = read_u32(rest, 0).ok_or_else(|| truncated(4))? as usize;
    let key_end = 4usize
        .checked_add(key_len)
        .ok_or_else(|| truncated(usize::MAX))?;
    let val_len = read_u32(rest, key_end).ok_or_else(|| truncated(key_end.saturating_add(4)))?;

    // [value][crc]
    let value_start = key_end + 4;
    let value_len = if val_len == TOMBSTONE_MARKER {
        0
    } else {
        val_len as usize
    };
    let crc_start = value_start
        .checked_add(value_len)
        .ok_or_else(|| truncated(usize::MAX))?;
    let total = crc_start
        .checked_add(4)
        .ok_or_else(|| truncated(usize::MAX))?;
    if rest.len() < total {
        return Err(truncated(total));
    }

    let stored = read_u32(rest, crc_start).ok_or_else(|| truncated(total))?;
    let computed = crc32fast::hash(&rest[..crc_start]);
    if stored != computed {
        return Err(DecodeError::ChecksumMismatch {
            offset,
            stored,
            computed,
        });
    }

    let value = if val_len == TOMBSTONE_MARKER {
        None
    } else {
        Some(&rest[value_start..crc_start])
    };

    Ok(Frame {
        key: &rest[4..key_end],
        value,
        len: total,
    })
}

fn read_u32(buf: &[u8], at: usize) -> Option<u32> {
    let bytes = buf.get(at..at.checked_add(4)?)?;
    Some(u32::from_le_bytes(bytes.try_into().ok()?))
}
