//! Compactor
//!
//! Rewrites the log so it holds only live entries.
//!
//! ## Triggers
//! - Stale ratio: `stale_bytes / log_bytes > compaction_threshold` once the
//!   log reaches `compaction_min_bytes`
//! - Growth ceiling: an append is about to grow the file past
//!   `growth_ceiling` while stale bytes exist
//! - Explicit `compact()` / `clear_all()` calls
//!
//! ## Rewrite
//! ```text
//!  live frames ──copy──▶ .{id}.mkv.XXXX.compact ──fsync, verify──┐
//!                                                               │ rename
//!  {id}.mkv (old inode) ◀── RETIRED flag ── {id}.mkv (new) ◀────┘
//! ```
//! The original file is not touched until the new one is complete and
//! verified. Once the rename succeeds the writer switches to the new file
//! unconditionally. Processes still mapping the old inode see the RETIRED
//! flag, or notice the path names a different inode, and reopen it.

use std::fs::{self, File};
use std::path::Path;
use std::time::Instant;

use crate::config::Config;
use crate::error::{MapKvError, Result};
use crate::frame;
use crate::index::Index;
use crate::storage::{grown_capacity, round_to_page, FileHeader, MappedFile, FLAG_RETIRED, HEADER_SIZE};
use crate::wal::LogWriter;

/// Suffix of compaction temp files
const TEMP_SUFFIX: &str = ".compact";

/// Random characters between the store's prefix and the suffix
const TEMP_RAND_LEN: usize = 6;

/// Why a rewrite ran
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionReason {
    StaleRatio,
    GrowthCeiling,
    Manual,
    Clear,
}

impl CompactionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            CompactionReason::StaleRatio => "stale_ratio",
            CompactionReason::GrowthCeiling => "growth_ceiling",
            CompactionReason::Manual => "manual",
            CompactionReason::Clear => "clear",
        }
    }
}

/// Space accounting for one log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompactionStats {
    /// Bytes between the header and the cursor
    pub log_bytes: u64,
    /// Bytes of frames still referenced by live keys
    pub live_bytes: u64,
    /// Superseded and tombstone bytes
    pub stale_bytes: u64,
}

impl CompactionStats {
    pub fn measure(log: &LogWriter, index: &Index) -> Self {
        let log_bytes = log.log_len();
        let live_bytes = index.live_bytes().min(log_bytes);
        Self {
            log_bytes,
            live_bytes,
            stale_bytes: log_bytes - live_bytes,
        }
    }

    pub fn stale_ratio(&self) -> f64 {
        if self.log_bytes == 0 {
            0.0
        } else {
            self.stale_bytes as f64 / self.log_bytes as f64
        }
    }
}

/// Compaction policy and rewrite machinery
#[derive(Debug, Clone)]
pub struct Compactor {
    threshold: f64,
    min_log_bytes: u64,
    growth_ceiling: u64,
    initial_capacity: u64,
    growth_factor: u32,
    auto: bool,
}

impl Compactor {
    pub fn from_config(config: &Config) -> Self {
        Self {
            threshold: config.compaction_threshold,
            min_log_bytes: config.compaction_min_bytes,
            growth_ceiling: config.growth_ceiling,
            initial_capacity: config.initial_capacity,
            growth_factor: config.growth_factor,
            auto: config.auto_compact,
        }
    }

    /// Whether the stale ratio calls for a rewrite
    pub fn should_compact(&self, stats: &CompactionStats) -> bool {
        stats.stale_bytes > 0
            && stats.log_bytes >= self.min_log_bytes
            && stats.stale_ratio() > self.threshold
    }

    /// Whether appending `frame_len` bytes would grow the file past the
    /// ceiling while a rewrite could reclaim space instead
    pub fn should_compact_before_growth(&self, stats: &CompactionStats, log: &LogWriter, frame_len: u64) -> bool {
        let required = log.cursor() + frame_len;
        if required <= log.capacity() || stats.stale_bytes == 0 {
            return false;
        }
        grown_capacity(log.capacity(), required, log.growth_factor())
            .map_or(true, |capacity| capacity > self.growth_ceiling)
    }

    /// Compact if the stale ratio is over the threshold (auto mode only)
    pub fn maybe_compact(&self, log: &mut LogWriter, index: &mut Index) -> Result<bool> {
        if !self.auto {
            return Ok(false);
        }
        let stats = CompactionStats::measure(log, index);
        if !self.should_compact(&stats) {
            return Ok(false);
        }
        self.rewrite(log, index, CompactionReason::StaleRatio)?;
        Ok(true)
    }

    /// Make room for a frame by compacting instead of growing, when allowed
    pub fn compact_before_growth(&self, log: &mut LogWriter, index: &mut Index, frame_len: u64) -> Result<bool> {
        if !self.auto {
            return Ok(false);
        }
        let stats = CompactionStats::measure(log, index);
        if !self.should_compact_before_growth(&stats, log, frame_len) {
            return Ok(false);
        }
        self.rewrite(log, index, CompactionReason::GrowthCeiling)?;
        Ok(true)
    }

    /// Compact now if anything is stale
    ///
    /// Returns false when the log is already compact.
    pub fn compact(&self, log: &mut LogWriter, index: &mut Index) -> Result<bool> {
        let stats = CompactionStats::measure(log, index);
        if stats.stale_bytes == 0 {
            return Ok(false);
        }
        self.rewrite(log, index, CompactionReason::Manual)?;
        Ok(true)
    }

    /// Replace the log with an empty one
    pub fn clear(&self, log: &mut LogWriter, index: &mut Index) -> Result<()> {
        self.rewrite(log, index, CompactionReason::Clear)
    }

    /// Capacity for a rewritten file holding `required` bytes
    ///
    /// Smallest `initial_capacity * growth_factor^k` that leaves the live data
    /// at most half of the file.
    pub fn target_capacity(&self, required: u64) -> u64 {
        let start = round_to_page(self.initial_capacity.max(HEADER_SIZE));
        grown_capacity(start, required.saturating_mul(2), self.growth_factor)
            .unwrap_or_else(|| round_to_page(required))
    }

    fn rewrite(&self, log: &mut LogWriter, index: &mut Index, reason: CompactionReason) -> Result<()> {
        let started = Instant::now();
        let before = CompactionStats::measure(log, index);
        let old_header = log.header()?;
        let path = log.file().path().to_path_buf();
        let dir = parent_dir(&path);

        // Step 1: Collect live entries (none for a clear)
        let entries = match reason {
            CompactionReason::Clear => Vec::new(),
            _ => index.live_entries(),
        };
        let live_bytes: u64 = entries.iter().map(|(_, record)| record.frame_len).sum();
        let capacity = self.target_capacity(HEADER_SIZE + live_bytes);

        // Step 2: Write them into a temp file next to the data file
        let tmp = tempfile::Builder::new()
            .prefix(&format!(".{}.", file_name(&path)))
            .suffix(TEMP_SUFFIX)
            .rand_bytes(TEMP_RAND_LEN)
            .tempfile_in(dir)
            .map_err(|e| MapKvError::io_at(dir, e))?;
        tmp.as_file()
            .set_len(capacity)
            .map_err(|e| MapKvError::io_at(tmp.path(), e))?;
        let handle = tmp
            .as_file()
            .try_clone()
            .map_err(|e| MapKvError::io_at(tmp.path(), e))?;
        let mut target = MappedFile::from_file(&path, handle)?;

        let mut cursor = HEADER_SIZE;
        let mut scratch = Vec::new();
        for (key, record) in &entries {
            let frame = frame::decode(log.file().as_slice(), record.offset as usize)?;
            if frame.key != *key {
                return Err(MapKvError::Corrupted(format!(
                    "index entry at offset {} points at a frame for another key",
                    record.offset
                )));
            }
            scratch.clear();
            frame::encode_into(&mut scratch, key, frame.value)?;
            target.write_at(cursor, &scratch)?;
            cursor += scratch.len() as u64;
        }

        let header = FileHeader {
            generation: old_header.generation + 1,
            epoch: old_header.epoch + 1,
            cursor,
            ..FileHeader::new()
        };
        target.write_header(&header)?;
        target.sync_all()?;

        // Step 3: Verify the new file before it replaces anything
        let (rebuilt, result) = Index::rebuild(&target, &header);
        if result.was_truncated || result.end_offset != cursor || rebuilt.len() != entries.len() {
            return Err(MapKvError::Corrupted(format!(
                "compacted file failed verification: {} of {} entries readable",
                rebuilt.len(),
                entries.len()
            )));
        }

        // Step 4: Publish atomically
        tmp.persist(&path)
            .map_err(|e| MapKvError::io_at(&path, e.error))?;

        // Step 5: The path names the new file now; switch to it before
        // anything else can fail
        let mut old = log.replace_file(target, cursor);
        *index = rebuilt;

        // Other processes also notice the replaced inode, so the flag is a
        // fast path only
        let mut retired = old_header;
        retired.flags |= FLAG_RETIRED;
        if let Err(e) = old
            .write_header(&retired)
            .and_then(|()| old.flush_range(0, HEADER_SIZE as usize))
        {
            tracing::warn!(path = %path.display(), error = %e, "failed to mark replaced file as retired");
        }

        tracing::info!(
            path = %path.display(),
            reason = reason.as_str(),
            before_bytes = before.log_bytes,
            after_bytes = cursor - HEADER_SIZE,
            reclaimed = before.log_bytes.saturating_sub(cursor - HEADER_SIZE),
            keys = index.len(),
            capacity,
            elapsed = ?started.elapsed(),
            "log rewritten"
        );

        // Until the directory is synced the rename may not survive a crash
        sync_dir(dir)
    }
}

/// Delete temp files left behind by a compaction that crashed
///
/// Only safe while no other process can be compacting: call with the
/// exclusive lock held (or in single-process mode).
pub fn remove_stale_temp_files(data_path: &Path) -> Result<usize> {
    let dir = parent_dir(data_path);
    let prefix = format!(".{}.", file_name(data_path));
    let mut removed = 0;

    for entry in fs::read_dir(dir).map_err(|e| MapKvError::io_at(dir, e))? {
        let entry = entry.map_err(|e| MapKvError::io_at(dir, e))?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if is_temp_file_of(&name, &prefix) {
            tracing::warn!(file = %entry.path().display(), "removing leftover compaction file");
            fs::remove_file(entry.path()).map_err(|e| MapKvError::io_at(&entry.path(), e))?;
            removed += 1;
        }
    }

    Ok(removed)
}

/// `{prefix}XXXXXX.compact` exactly
///
/// Another store whose id starts with this one (`a` vs `a.mkv.b`) produces
/// names with the same prefix but a longer middle.
fn is_temp_file_of(name: &str, prefix: &str) -> bool {
    name.strip_prefix(prefix)
        .and_then(|rest| rest.strip_suffix(TEMP_SUFFIX))
        .is_some_and(|random| {
            random.len() == TEMP_RAND_LEN && random.bytes().all(|b| b.is_ascii_alphanumeric())
        })
}

fn parent_dir(path: &Path) -> &Path {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)
        .and_then(|d| d.sync_all())
        .map_err(|e| MapKvError::io_at(dir, e))
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}
