//! Log Module
//!
//! The append-only frame log inside the mapped data file.
//!
//! ## Responsibilities
//! - Append frames at the cursor and commit them through the header
//! - CRC32 checksums for corruption detection
//! - Generation counter for cross-process change detection
//! - Replay into the index, truncating torn tails
//!
//! ## Layout
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ Header (cursor, generation, epoch)      │
//! ├─────────────────────────────────────────┤
//! │ Frame 1                                 │
//! │ ┌────────┬─────┬────────┬───────┬─────┐ │
//! │ │KeyLen 4│ Key │ValLen 4│ Value │CRC 4│ │
//! │ └────────┴─────┴────────┴───────┴─────┘ │
//! ├─────────────────────────────────────────┤
//! │ Frame 2 ... Frame N                     │
//! ├───────────────── cursor ────────────────┤
//! │ Reserved (zero or torn bytes)           │
//! └─────────────────────────────────────────┘
//! ```

mod reader;
mod recovery;
mod writer;

pub use reader::FrameReader;
pub use recovery::{RecoveryResult, WalRecovery};
pub use writer::{Appended, LogWriter};
