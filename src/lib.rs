//! # mapkv
//!
//! A memory-mapped, append-only key-value store for byte blobs:
//! - Checksummed frames appended to one mapped file per store id
//! - Crash recovery that truncates a torn tail to the last valid frame
//! - In-memory index rebuilt on open, compaction by atomic rewrite
//! - Optional multi-process sharing through advisory file locks
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Registry (one Store per id)                 │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                        Store                                 │
//! │      (RwLock: single writer / multi reader, lifecycle)      │
//! └───────┬──────────────┬──────────────┬──────────────┬────────┘
//!         │              │              │              │
//!         ▼              ▼              ▼              ▼
//!  ┌────────────┐ ┌────────────┐ ┌────────────┐ ┌─────────────┐
//!  │ LogWriter  │ │   Index    │ │ Compactor  │ │ Coordinator │
//!  │  (append)  │ │ (key→off)  │ │ (rewrite)  │ │ (file lock) │
//!  └─────┬──────┘ └────────────┘ └─────┬──────┘ └─────────────┘
//!        │                             │
//!        ▼                             ▼
//!  ┌─────────────────────────────────────────┐
//!  │     MappedFile  ({root}/{id}.mkv)       │
//!  │        header + frame log               │
//!  └─────────────────────────────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod buffer;

pub mod frame;
pub mod storage;
pub mod wal;
pub mod index;
pub mod compaction;
pub mod coordinator;
pub mod store;
pub mod registry;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use buffer::Buffer;
pub use config::{Config, ProcessMode, SyncStrategy};
pub use error::{MapKvError, Result};
pub use registry::{close_all, initialize, open, open_default};
pub use store::{Lifecycle, Store, StoreStats};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of mapkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
