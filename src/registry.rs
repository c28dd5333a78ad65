//! Process-wide registry of open stores
//!
//! One `Store` instance per (root directory, store id) within a process, so
//! every caller shares the same index and in-process lock. Entries stay until
//! `close` or `close_all` removes them.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::config::{validate_store_id, Config, ProcessMode};
use crate::error::{MapKvError, Result};
use crate::store::Store;

#[derive(Default)]
struct Registry {
    default_root: Option<PathBuf>,
    stores: HashMap<PathBuf, Arc<Store>>,
}

fn registry() -> &'static Mutex<Registry> {
    static REGISTRY: OnceLock<Mutex<Registry>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(Registry::default()))
}

/// Set the root directory used by `open_default`
///
/// Creates the directory. Calling it again changes the default for stores
/// opened afterwards.
pub fn initialize(root: impl AsRef<Path>) -> Result<PathBuf> {
    let root = canonical_root(root.as_ref())?;
    registry().lock().default_root = Some(root.clone());
    tracing::info!(root = %root.display(), "store registry initialized");
    Ok(root)
}

/// Open (or reuse) the store `id` under `root`
pub fn open(root: impl AsRef<Path>, id: &str, mode: ProcessMode) -> Result<Arc<Store>> {
    let config = Config::builder()
        .root_dir(root.as_ref())
        .store_id(id)
        .mode(mode)
        .build();
    open_with(config)
}

/// Open (or reuse) the store `id` under the root given to `initialize`
pub fn open_default(id: &str, mode: ProcessMode) -> Result<Arc<Store>> {
    let root = registry()
        .lock()
        .default_root
        .clone()
        .ok_or_else(|| MapKvError::Config("registry not initialized; call initialize(root) first".to_string()))?;
    open(root, id, mode)
}

/// Open (or reuse) a store with full control over its configuration
///
/// If the store is already open, the existing instance is returned and the
/// rest of `config` is ignored; asking for a different process mode is an
/// error.
pub fn open_with(mut config: Config) -> Result<Arc<Store>> {
    validate_store_id(&config.store_id)?;
    config.root_dir = canonical_root(&config.root_dir)?;
    let key = config.root_dir.join(&config.store_id);

    let mut registry = registry().lock();
    if let Some(store) = registry.stores.get(&key) {
        if !store.is_closed() {
            if store.mode() != config.mode {
                return Err(MapKvError::Config(format!(
                    "store '{}' is already open in {:?} mode",
                    config.store_id,
                    store.mode()
                )));
            }
            return Ok(Arc::clone(store));
        }
    }

    let store = Arc::new(Store::open(config)?);
    registry.stores.insert(key, Arc::clone(&store));
    Ok(store)
}

/// Close one store and drop it from the registry
///
/// Returns false if it was not open.
pub fn close(root: impl AsRef<Path>, id: &str) -> Result<bool> {
    let root = match root.as_ref().canonicalize() {
        Ok(root) => root,
        Err(_) => return Ok(false),
    };
    let removed = registry().lock().stores.remove(&root.join(id));
    match removed {
        Some(store) => {
            store.close()?;
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Close every open store
///
/// All stores are closed even if some fail; the first error is returned.
pub fn close_all() -> Result<()> {
    let stores: Vec<Arc<Store>> = registry().lock().stores.drain().map(|(_, s)| s).collect();
    let count = stores.len();

    let mut first_error = None;
    for store in stores {
        if let Err(e) = store.close() {
            tracing::warn!(id = store.id(), error = %e, "failed to close store");
            first_error.get_or_insert(e);
        }
    }

    tracing::debug!(count, "closed all stores");
    first_error.map_or(Ok(()), Err)
}

/// Stores currently held by the registry
pub fn open_count() -> usize {
    registry().lock().stores.len()
}

fn canonical_root(root: &Path) -> Result<PathBuf> {
    fs::create_dir_all(root).map_err(|e| MapKvError::io_at(root, e))?;
    root.canonicalize().map_err(|e| MapKvError::io_at(root, e))
}
