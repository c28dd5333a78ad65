//! Storage Module
//!
//! The backing store: one growable, memory-mapped data file per store id.
//!
//! ## Responsibilities
//! - Create, map and grow the data file (geometric growth, page aligned)
//! - Bounds-checked raw reads/writes into already-reserved space
//! - Header encoding (format version, generation, epoch, cursor, flags)
//!
//! ## File Format
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │ Header (64 bytes)                                          │
//! │   Magic "MPKV" (4) | Version u16 (2) | Flags u16 (2)       │
//! │   Generation u64 (8) | Epoch u64 (8) | Cursor u64 (8)      │
//! │   Reserved (32)                                            │
//! ├────────────────────────────────────────────────────────────┤
//! │ Frames [64, cursor)                                        │
//! │   [KeyLen][Key][ValLen][Value][CRC32] ... append order     │
//! ├────────────────────────────────────────────────────────────┤
//! │ Reserved capacity [cursor, file length)                    │
//! └────────────────────────────────────────────────────────────┘
//! ```

mod header;
mod mapped;

pub use header::{FileHeader, FLAG_RETIRED, FORMAT_VERSION, HEADER_SIZE, MAGIC};
pub use mapped::{grown_capacity, round_to_page, MappedFile, PAGE_SIZE};
