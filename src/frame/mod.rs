//! Frame Codec
//!
//! Encodes and decodes single (key, value) records. Pure, no I/O.
//!
//! ## Frame Format
//! ```text
//! ┌──────────────┬───────┬──────────────┬─────────┬───────────┐
//! │ KeyLen u32 LE│  Key  │ ValLen u32 LE│  Value  │ CRC32 (4) │
//! └──────────────┴───────┴──────────────┴─────────┴───────────┘
//! ```
//!
//! - The CRC covers every byte of the frame before it.
//! - `ValLen = u32::MAX` marks a tombstone; no value bytes follow.
//! - A zero-length value is a live value, not a tombstone.
//! - Zero-filled space never decodes: the CRC of eight zero bytes is not zero,
//!   so reserved capacity past the cursor always reads as a checksum mismatch.

mod codec;

pub use codec::{
    decode, encode, encode_into, encoded_len, DecodeError, Frame, FRAME_OVERHEAD, MAX_KEY_LEN,
    MAX_VALUE_LEN, TOMBSTONE_MARKER,
};
