//! Configuration for mapkv
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{MapKvError, Result};

/// File extension of the data file
pub const DATA_EXTENSION: &str = "mkv";

/// File extension of the multi-process lock file
pub const LOCK_EXTENSION: &str = "lock";

/// Main configuration for one store
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all store files
    /// Internal structure:
    ///   {root_dir}/
    ///     ├── {store_id}.mkv      (header + append-only frames)
    ///     └── {store_id}.lock     (multi-process advisory lock)
    pub root_dir: PathBuf,

    /// Logical store identifier; one data file per id
    pub store_id: String,

    /// Whether the cross-process locking path is engaged
    pub mode: ProcessMode,

    /// Size of a freshly created data file (rounded up to whole pages)
    pub initial_capacity: u64,

    /// Multiplier applied to capacity on each growth step
    pub growth_factor: u32,

    // -------------------------------------------------------------------------
    // Durability Configuration
    // -------------------------------------------------------------------------
    /// Sync strategy: how often to msync the mapping
    pub sync_strategy: SyncStrategy,

    // -------------------------------------------------------------------------
    // Compaction Configuration
    // -------------------------------------------------------------------------
    /// Compact when stale bytes / log bytes exceeds this ratio
    pub compaction_threshold: f64,

    /// Logs smaller than this are never compacted by ratio
    pub compaction_min_bytes: u64,

    /// Compact (if anything is stale) before growing the file past this size
    pub growth_ceiling: u64,

    /// Run ratio-triggered compaction after writes
    pub auto_compact: bool,

    // -------------------------------------------------------------------------
    // Concurrency Configuration
    // -------------------------------------------------------------------------
    /// Bound on lock waits; `None` blocks indefinitely
    pub lock_timeout: Option<Duration>,
}

/// Process sharing mode of a store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessMode {
    /// Only this process touches the file; no file locks, no staleness checks
    #[default]
    SingleProcess,

    /// Several processes share the file; every operation takes a file lock
    MultiProcess,
}

/// Mapping sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// msync after every write (safest, slowest)
    EveryWrite,

    /// msync after N appends (balanced durability/performance)
    EveryNEntries { count: usize },

    /// Leave write-back to the OS; `sync()` and `close()` still flush
    Never,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("./mapkv_data"),
            store_id: "mapkv.default".to_string(),
            mode: ProcessMode::SingleProcess,
            initial_capacity: 4 * 1024, // one page
            growth_factor: 2,
            sync_strategy: SyncStrategy::EveryNEntries { count: 100 },
            compaction_threshold: 0.5,
            compaction_min_bytes: 64 * 1024,     // 64 KB
            growth_ceiling: 16 * 1024 * 1024,    // 16 MB
            auto_compact: true,
            lock_timeout: Some(Duration::from_secs(5)),
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Path of the data file for this store
    pub fn data_path(&self) -> PathBuf {
        self.root_dir
            .join(format!("{}.{}", self.store_id, DATA_EXTENSION))
    }

    /// Path of the lock file for this store
    pub fn lock_path(&self) -> PathBuf {
        self.root_dir
            .join(format!("{}.{}", self.store_id, LOCK_EXTENSION))
    }

    /// Check the configuration for values the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        validate_store_id(&self.store_id)?;

        if self.growth_factor < 2 {
            return Err(MapKvError::Config(format!(
                "growth_factor must be at least 2, got {}",
                self.growth_factor
            )));
        }

        if self.initial_capacity == 0 {
            return Err(MapKvError::Config(
                "initial_capacity must be non-zero".to_string(),
            ));
        }

        if !(self.compaction_threshold > 0.0 && self.compaction_threshold <= 1.0) {
            return Err(MapKvError::Config(format!(
                "compaction_threshold must be in (0, 1], got {}",
                self.compaction_threshold
            )));
        }

        if let SyncStrategy::EveryNEntries { count: 0 } = self.sync_strategy {
            return Err(MapKvError::Config(
                "EveryNEntries count must be non-zero".to_string(),
            ));
        }

        Ok(())
    }
}

/// Store ids become file names, so they must be a single path component.
pub fn validate_store_id(id: &str) -> Result<()> {
    if id.is_empty() || id == "." || id == ".." {
        return Err(MapKvError::InvalidArgument(format!(
            "invalid store id {:?}",
            id
        )));
    }
    if id.contains(['/', '\\', '\0']) {
        return Err(MapKvError::InvalidArgument(format!(
            "store id {:?} must not contain path separators",
            id
        )));
    }
    Ok(())
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the root directory (holds every store's files)
    pub fn root_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.root_dir = path.into();
        self
    }

    /// Set the store id
    pub fn store_id(mut self, id: impl Into<String>) -> Self {
        self.config.store_id = id.into();
        self
    }

    /// Set the process mode
    pub fn mode(mut self, mode: ProcessMode) -> Self {
        self.config.mode = mode;
        self
    }

    /// Set the initial file capacity (in bytes)
    pub fn initial_capacity(mut self, bytes: u64) -> Self {
        self.config.initial_capacity = bytes;
        self
    }

    /// Set the growth factor
    pub fn growth_factor(mut self, factor: u32) -> Self {
        self.config.growth_factor = factor;
        self
    }

    /// Set the sync strategy
    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    /// Set the stale-byte ratio that triggers compaction
    pub fn compaction_threshold(mut self, ratio: f64) -> Self {
        self.config.compaction_threshold = ratio;
        self
    }

    /// Set the minimum log size for ratio-triggered compaction
    pub fn compaction_min_bytes(mut self, bytes: u64) -> Self {
        self.config.compaction_min_bytes = bytes;
        self
    }

    /// Set the size past which growth is preceded by compaction
    pub fn growth_ceiling(mut self, bytes: u64) -> Self {
        self.config.growth_ceiling = bytes;
        self
    }

    /// Enable or disable automatic compaction after writes
    pub fn auto_compact(mut self, enabled: bool) -> Self {
        self.config.auto_compact = enabled;
        self
    }

    /// Set the lock timeout (`None` waits forever)
    pub fn lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.lock_timeout = timeout;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
