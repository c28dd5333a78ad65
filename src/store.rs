//! Store Facade
//!
//! The public surface composing the log, index, compactor and process
//! coordinator for one store id.
//!
//! ## Responsibilities
//! - Lifecycle: `Opening → Ready → Closed`
//! - Serialize writers, let readers run concurrently
//! - In multi-process mode, take the file lock per operation and catch up
//!   with other processes' writes before serving anything
//! - Trigger compaction

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::buffer::Buffer;
use crate::compaction::{self, CompactionStats, Compactor};
use crate::config::{Config, ProcessMode};
use crate::coordinator::{Observation, ProcessCoordinator, Staleness};
use crate::error::{MapKvError, Result};
use crate::frame::{self, MAX_KEY_LEN};
use crate::index::{Index, IndexRecord};
use crate::storage::{FileHeader, MappedFile, HEADER_SIZE};
use crate::wal::{LogWriter, RecoveryResult, WalRecovery};

/// Lifecycle state of a store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Mapping the file and rebuilding the index (or a reopen failed)
    Opening,
    /// Accepting operations
    Ready,
    /// Unmapped; every operation fails with `StoreClosed`
    Closed,
}

/// Point-in-time numbers about a store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    pub id: String,
    /// Live keys
    pub count: usize,
    /// Committed end of data (header included)
    pub actual_size: u64,
    /// File capacity
    pub total_size: u64,
    pub live_bytes: u64,
    pub stale_bytes: u64,
    pub tombstones: usize,
    pub generation: u64,
    pub epoch: u64,
}

/// A memory-mapped key-value store
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader (SWMR)
///
/// - **Writes** (set/remove/clear/compact): exclusive `core` lock, plus the
///   exclusive file lock in multi-process mode
/// - **Reads** (get/contains/keys/stats): shared `core` lock, plus the shared
///   file lock in multi-process mode
/// - Lock order is always `core` first, file lock second
///
/// Both kinds of lock wait at most `Config::lock_timeout` and fail with
/// `LockTimeout` without side effects.
pub struct Store {
    /// Store identifier
    id: String,

    /// Store configuration
    config: Config,

    /// `{root_dir}/{id}.mkv`
    data_path: PathBuf,

    /// Cross-process locking (multi-process mode only)
    coordinator: Option<ProcessCoordinator>,

    /// Compaction policy
    compactor: Compactor,

    /// Index, log writer and lifecycle, always changed together
    core: RwLock<Core>,
}

struct Core {
    state: Lifecycle,
    log: Option<LogWriter>,
    index: Index,
    /// Header state the index reflects
    seen: Observation,
}

impl Store {
    /// Open or create a store
    ///
    /// On startup:
    /// 1. Validate config and create the root directory
    /// 2. Open the lock file (multi-process) and take the exclusive lock
    /// 3. Remove leftovers of crashed compactions
    /// 4. Map the data file, initializing the header if it is new
    /// 5. Rebuild the index, cutting off any torn tail
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.root_dir).map_err(|e| MapKvError::io_at(&config.root_dir, e))?;

        let data_path = config.data_path();
        let coordinator = match config.mode {
            ProcessMode::MultiProcess => Some(ProcessCoordinator::open(
                &config.lock_path(),
                config.lock_timeout,
            )?),
            ProcessMode::SingleProcess => None,
        };

        let mut core = Core::new();
        let recovery = {
            let _guard = coordinator
                .as_ref()
                .map(ProcessCoordinator::acquire_exclusive)
                .transpose()?;
            compaction::remove_stale_temp_files(&data_path)?;
            core.load(&data_path, &config)?
        };

        tracing::info!(
            id = %config.store_id,
            path = %data_path.display(),
            mode = ?config.mode,
            keys = core.index.len(),
            frames = recovery.frames_recovered,
            truncated = recovery.was_truncated,
            "store opened"
        );

        Ok(Self {
            id: config.store_id.clone(),
            compactor: Compactor::from_config(&config),
            data_path,
            coordinator,
            core: RwLock::new(core),
            config,
        })
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Store `value` under `key`, superseding any previous value
    ///
    /// The value is stored exactly; a longer or shorter blob than before
    /// simply replaces the old one.
    pub fn set(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<()> {
        let key = key.as_ref();
        let value = value.as_ref();
        validate_key(key)?;

        self.write_op(|core, compactor| core.append(key, Some(value), compactor))?;

        tracing::trace!(id = %self.id, key_len = key.len(), value_len = value.len(), "set");
        Ok(())
    }

    /// Remove a key
    ///
    /// Returns false (and writes nothing) if the key was not present.
    pub fn remove(&self, key: impl AsRef<[u8]>) -> Result<bool> {
        let key = key.as_ref();
        self.write_op(|core, compactor| {
            if !core.index.contains(key) {
                return Ok(false);
            }
            core.append(key, None, compactor)?;
            Ok(true)
        })
    }

    /// Remove several keys under one lock acquisition
    ///
    /// Returns how many were present.
    pub fn remove_many<I>(&self, keys: I) -> Result<usize>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        self.write_op(|core, compactor| {
            let mut removed = 0;
            for key in keys {
                let key = key.as_ref();
                if core.index.contains(key) {
                    core.append(key, None, compactor)?;
                    removed += 1;
                }
            }
            Ok(removed)
        })
    }

    /// Drop every key
    ///
    /// The log is replaced by an empty file at the initial capacity; the
    /// index is cleared in the same exclusive section.
    pub fn clear_all(&self) -> Result<()> {
        self.write_op(|core, compactor| core.clear(compactor))?;
        tracing::info!(id = %self.id, "store cleared");
        Ok(())
    }

    /// Rewrite the log to live entries only
    ///
    /// Returns false if there was nothing to reclaim.
    pub fn compact(&self) -> Result<bool> {
        self.write_op(|core, compactor| core.compact(compactor))
    }

    /// Flush the mapping to disk
    pub fn sync(&self) -> Result<()> {
        let mut core = self.write_core()?;
        core.ensure_ready()?;
        core.log_mut()?.sync()
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Get an owned copy of the value stored under `key`
    ///
    /// - `Ok(Some(bytes))`: the stored bytes, exactly (possibly empty)
    /// - `Ok(None)`: never written, or removed
    pub fn get_bytes(&self, key: impl AsRef<[u8]>) -> Result<Option<Buffer<'static>>> {
        let key = key.as_ref();
        self.read_op(|core| Ok(core.lookup(key)?.map(Buffer::copy)))
    }

    /// Borrow the value straight from the mapping, without copying
    ///
    /// `f` runs with the store's read lock held; it must not call back into
    /// this store.
    pub fn with_bytes<R>(
        &self,
        key: impl AsRef<[u8]>,
        f: impl FnOnce(Option<Buffer<'_>>) -> R,
    ) -> Result<R> {
        let key = key.as_ref();
        self.read_op(|core| Ok(f(core.lookup(key)?.map(Buffer::no_copy))))
    }

    pub fn contains_key(&self, key: impl AsRef<[u8]>) -> Result<bool> {
        let key = key.as_ref();
        self.read_op(|core| Ok(core.index.contains(key)))
    }

    /// Length of the stored value, without reading it
    pub fn value_size(&self, key: impl AsRef<[u8]>) -> Result<Option<usize>> {
        let key = key.as_ref();
        self.read_op(|core| Ok(core.index.lookup(key).map(|r| r.value_len as usize)))
    }

    /// Number of live keys
    pub fn count(&self) -> Result<usize> {
        self.read_op(|core| Ok(core.index.len()))
    }

    /// All live keys, sorted
    pub fn all_keys(&self) -> Result<Vec<Vec<u8>>> {
        self.read_op(|core| {
            let mut keys: Vec<Vec<u8>> = core.index.keys().map(<[u8]>::to_vec).collect();
            keys.sort();
            Ok(keys)
        })
    }

    pub fn stats(&self) -> Result<StoreStats> {
        self.read_op(|core| {
            let log = core.log()?;
            let header = log.header()?;
            let space = CompactionStats::measure(log, &core.index);
            Ok(StoreStats {
                id: self.id.clone(),
                count: core.index.len(),
                actual_size: log.cursor(),
                total_size: log.capacity(),
                live_bytes: space.live_bytes,
                stale_bytes: space.stale_bytes,
                tombstones: core.index.tombstone_count(),
                generation: header.generation,
                epoch: header.epoch,
            })
        })
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Remap the file and rebuild the index from scratch
    ///
    /// Also the way out of `Opening` after a failed reopen.
    pub fn reload(&self) -> Result<()> {
        let mut core = self.write_core()?;
        if core.state == Lifecycle::Closed {
            return Err(MapKvError::StoreClosed);
        }
        let _guard = self
            .coordinator
            .as_ref()
            .map(ProcessCoordinator::acquire_exclusive)
            .transpose()?;
        core.load(&self.data_path, &self.config)?;
        Ok(())
    }

    /// Flush and unmap
    ///
    /// Later calls fail with `StoreClosed`. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        let mut core = self.write_core()?;
        if core.state == Lifecycle::Closed {
            return Ok(());
        }

        let synced = match core.log.as_mut() {
            Some(log) => log.sync(),
            None => Ok(()),
        };
        core.log = None;
        core.index.clear();
        core.state = Lifecycle::Closed;

        tracing::info!(id = %self.id, "store closed");
        synced
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn mode(&self) -> ProcessMode {
        self.config.mode
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.core.read().state
    }

    pub fn is_closed(&self) -> bool {
        self.lifecycle() == Lifecycle::Closed
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn read_core(&self) -> Result<RwLockReadGuard<'_, Core>> {
        match self.config.lock_timeout {
            Some(timeout) => self.core.try_read_for(timeout).ok_or(MapKvError::LockTimeout {
                operation: "read",
                waited: timeout,
            }),
            None => Ok(self.core.read()),
        }
    }

    fn write_core(&self) -> Result<RwLockWriteGuard<'_, Core>> {
        match self.config.lock_timeout {
            Some(timeout) => self.core.try_write_for(timeout).ok_or(MapKvError::LockTimeout {
                operation: "write",
                waited: timeout,
            }),
            None => Ok(self.core.write()),
        }
    }

    /// Run a read against an index that is current with the file
    fn read_op<R>(&self, f: impl FnOnce(&Core) -> Result<R>) -> Result<R> {
        let core = self.read_core()?;
        core.ensure_ready()?;

        let Some(coordinator) = &self.coordinator else {
            return f(&*core);
        };

        let guard = coordinator.acquire_shared()?;
        if ProcessCoordinator::observe(core.log()?.file(), &core.seen)? == Staleness::Fresh {
            return f(&*core);
        }
        drop(guard);
        drop(core);

        // Stale: catch up under the write lock, then downgrade for the read
        let mut core = self.write_core()?;
        core.ensure_ready()?;
        let _guard = coordinator.acquire_shared()?;
        core.refresh(&self.data_path, &self.config)?;
        let core = RwLockWriteGuard::downgrade(core);
        f(&*core)
    }

    /// Run a mutation with every lock it needs held
    fn write_op<R>(&self, f: impl FnOnce(&mut Core, &Compactor) -> Result<R>) -> Result<R> {
        let mut core = self.write_core()?;
        core.ensure_ready()?;

        let _guard = match &self.coordinator {
            Some(coordinator) => {
                let guard = coordinator.acquire_exclusive()?;
                core.refresh(&self.data_path, &self.config)?;
                Some(guard)
            }
            None => None,
        };

        f(&mut *core, &self.compactor)
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        // Best-effort flush on drop
        if let Some(log) = self.core.get_mut().log.as_mut() {
            if let Err(e) = log.sync() {
                tracing::warn!(id = %self.id, error = %e, "failed to sync store on drop");
            }
        }
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.id)
            .field("path", &self.data_path)
            .field("mode", &self.config.mode)
            .finish_non_exhaustive()
    }
}

impl Core {
    fn new() -> Self {
        Self {
            state: Lifecycle::Opening,
            log: None,
            index: Index::new(),
            seen: Observation::default(),
        }
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state {
            Lifecycle::Ready => Ok(()),
            Lifecycle::Opening => Err(MapKvError::StoreNotReady),
            Lifecycle::Closed => Err(MapKvError::StoreClosed),
        }
    }

    fn log(&self) -> Result<&LogWriter> {
        self.log.as_ref().ok_or(MapKvError::StoreNotReady)
    }

    fn log_mut(&mut self) -> Result<&mut LogWriter> {
        self.log.as_mut().ok_or(MapKvError::StoreNotReady)
    }

    /// Map the data file and rebuild the index from scratch
    ///
    /// Leaves the core in `Opening` if anything fails.
    fn load(&mut self, path: &Path, config: &Config) -> Result<RecoveryResult> {
        self.state = Lifecycle::Opening;
        self.log = None;
        self.index.clear();

        let mut file = MappedFile::open(path, config.initial_capacity)?;
        let header = match file.read_header()? {
            Some(header) => header,
            None => {
                let header = FileHeader::new();
                file.write_header(&header)?;
                file.flush_range(0, HEADER_SIZE as usize)?;
                tracing::debug!(path = %path.display(), "initialized data file header");
                header
            }
        };

        let (index, result) = Index::rebuild(&file, &header);
        if result.was_truncated {
            tracing::warn!(
                path = %path.display(),
                valid_end = result.end_offset,
                discarded = result.discarded_bytes,
                "log had a torn tail; truncated to the last valid frame"
            );
        }
        tracing::debug!(
            path = %path.display(),
            keys = index.len(),
            frames = result.frames_recovered,
            cursor = result.end_offset,
            capacity = file.capacity(),
            "index rebuilt"
        );

        self.log = Some(LogWriter::new(
            file,
            result.end_offset,
            config.sync_strategy,
            config.growth_factor,
        ));
        self.index = index;
        self.seen = Observation::of(&header);
        self.state = Lifecycle::Ready;
        Ok(result)
    }

    /// Catch up with changes other processes committed
    ///
    /// Call with the file lock held.
    fn refresh(&mut self, path: &Path, config: &Config) -> Result<()> {
        let log = self.log.as_mut().ok_or(MapKvError::StoreNotReady)?;

        match ProcessCoordinator::observe(log.file(), &self.seen)? {
            Staleness::Fresh => Ok(()),
            Staleness::Appended => {
                log.file_mut().refresh()?;
                let header = log.header()?;
                if header.cursor < log.cursor() {
                    // Went backwards without a rewrite; trust nothing
                    return Self::rebuild_in_place(log, &mut self.index, &mut self.seen);
                }

                let result =
                    WalRecovery::replay(log.file().as_slice(), log.cursor(), header.cursor, &mut self.index);
                log.set_cursor(result.end_offset);
                self.seen = Observation::of(&header);

                tracing::trace!(
                    frames = result.frames_recovered,
                    generation = header.generation,
                    "caught up with foreign appends"
                );
                Ok(())
            }
            Staleness::Rewritten => Self::rebuild_in_place(log, &mut self.index, &mut self.seen),
            Staleness::Retired => {
                tracing::debug!(path = %path.display(), "data file was replaced; reopening");
                self.load(path, config).map(|_| ())
            }
        }
    }

    fn rebuild_in_place(log: &mut LogWriter, index: &mut Index, seen: &mut Observation) -> Result<()> {
        log.file_mut().refresh()?;
        let header = log.header()?;
        let (rebuilt, result) = Index::rebuild(log.file(), &header);
        log.set_cursor(result.end_offset);
        *index = rebuilt;
        *seen = Observation::of(&header);
        Ok(())
    }

    /// Look up a live value, validating the frame it points at
    fn lookup(&self, key: &[u8]) -> Result<Option<&[u8]>> {
        let Some(record) = self.index.lookup(key) else {
            return Ok(None);
        };

        let log = self.log()?;
        let frame = frame::decode(log.file().as_slice(), record.offset as usize)?;
        if frame.key != key {
            return Err(MapKvError::Corrupted(format!(
                "index entry at offset {} points at a frame for another key",
                record.offset
            )));
        }

        match frame.value {
            Some(value) => Ok(Some(value)),
            None => Err(MapKvError::Corrupted(format!(
                "live index entry at offset {} points at a tombstone",
                record.offset
            ))),
        }
    }

    /// Append a frame and update the index (`value = None` removes)
    fn append(&mut self, key: &[u8], value: Option<&[u8]>, compactor: &Compactor) -> Result<()> {
        let Core { log, index, seen, .. } = self;
        let log = log.as_mut().ok_or(MapKvError::StoreNotReady)?;

        // Reclaim instead of growing past the ceiling
        let frame_len = frame::encoded_len(key, value) as u64;
        let reclaimed = compactor.compact_before_growth(log, index, frame_len);
        *seen = Observation::of(&log.header()?);
        reclaimed?;

        let appended = log.append(key, value)?;
        match value {
            Some(v) => index.upsert(key, IndexRecord::live(appended.offset, appended.len, v.len() as u64)),
            None => index.mark_tombstone(key, appended.offset, appended.len),
        }
        *seen = Observation::of(&log.header()?);

        // The write is committed; the log always ends up on the file the path names
        if let Err(e) = compactor.maybe_compact(log, index) {
            tracing::warn!(error = %e, "automatic compaction failed");
        }
        *seen = Observation::of(&log.header()?);

        Ok(())
    }

    fn clear(&mut self, compactor: &Compactor) -> Result<()> {
        let Core { log, index, seen, .. } = self;
        let log = log.as_mut().ok_or(MapKvError::StoreNotReady)?;
        let cleared = compactor.clear(log, index);
        *seen = Observation::of(&log.header()?);
        cleared
    }

    fn compact(&mut self, compactor: &Compactor) -> Result<bool> {
        let Core { log, index, seen, .. } = self;
        let log = log.as_mut().ok_or(MapKvError::StoreNotReady)?;
        let compacted = compactor.compact(log, index);
        *seen = Observation::of(&log.header()?);
        compacted
    }
}

fn validate_key(key: &[u8]) -> Result<()> {
    if key.is_empty() {
        return Err(MapKvError::InvalidArgument("key must not be empty".to_string()));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(MapKvError::InvalidArgument(format!(
            "key of {} bytes exceeds the {} byte limit",
            key.len(),
            MAX_KEY_LEN
        )));
    }
    Ok(())
}
