//! Tests for compaction and clear
//!
//! These tests verify:
//! - Manual compaction keeps exactly the live entries
//! - Compaction is idempotent and shrinks the file
//! - Automatic compaction by stale ratio and before growing past the ceiling
//! - clear_all resets the store
//! - A rewrite that fails before the rename leaves the data file untouched
//! - Leftover temp files are removed on open, other stores' are not

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};

use mapkv::compaction::{CompactionStats, Compactor};
use mapkv::frame;
use mapkv::storage::{FileHeader, HEADER_SIZE, PAGE_SIZE};
use mapkv::{Config, MapKvError, Store, SyncStrategy};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn manual_config(dir: &TempDir) -> Config {
    Config::builder()
        .root_dir(dir.path())
        .store_id("compact")
        .sync_strategy(SyncStrategy::Never)
        .auto_compact(false)
        .build()
}

fn get(store: &Store, key: &str) -> Option<Vec<u8>> {
    store.get_bytes(key).unwrap().map(|b| b.to_vec())
}

fn dir_entries(dir: &std::path::Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

// =============================================================================
// Manual Compaction
// =============================================================================

#[test]
fn test_compact_nothing_stale() {
    let temp = TempDir::new().unwrap();
    let store = Store::open(manual_config(&temp)).unwrap();
    store.set("a", "1").unwrap();

    assert!(!store.compact().unwrap());
    assert_eq!(store.stats().unwrap().epoch, 0);
}

#[test]
fn test_compact_keeps_live_entries() {
    let temp = TempDir::new().unwrap();
    let store = Store::open(manual_config(&temp)).unwrap();

    for i in 0..50 {
        store.set(format!("key{}", i % 10), format!("value{}", i)).unwrap();
    }
    store.remove("key3").unwrap();
    store.set("empty", b"").unwrap();
    let before = store.stats().unwrap();
    assert!(before.stale_bytes > 0);

    assert!(store.compact().unwrap());

    let after = store.stats().unwrap();
    assert_eq!(after.count, before.count);
    assert_eq!(after.live_bytes, before.live_bytes);
    assert_eq!(after.stale_bytes, 0);
    assert_eq!(after.tombstones, 0);
    assert_eq!(after.actual_size, HEADER_SIZE + before.live_bytes);
    assert_eq!(after.epoch, before.epoch + 1);
    assert!(after.generation > before.generation);

    assert_eq!(get(&store, "key9"), Some(b"value49".to_vec()));
    assert_eq!(get(&store, "key3"), None);
    assert_eq!(get(&store, "empty"), Some(Vec::new()));

    // Idempotent
    assert!(!store.compact().unwrap());
    assert_eq!(store.stats().unwrap().live_bytes, after.live_bytes);
}

#[test]
fn test_compact_shrinks_file() {
    let temp = TempDir::new().unwrap();
    let store = Store::open(manual_config(&temp)).unwrap();
    let big = vec![1u8; 8 * 1024];

    for _ in 0..20 {
        store.set("big", &big).unwrap();
    }
    let grown = store.stats().unwrap().total_size;

    store.set("big", "small").unwrap();
    assert!(store.compact().unwrap());

    let stats = store.stats().unwrap();
    assert!(stats.total_size < grown);
    assert_eq!(stats.total_size, PAGE_SIZE);
    assert_eq!(
        std::fs::metadata(store.data_path()).unwrap().len(),
        stats.total_size
    );
    assert_eq!(get(&store, "big"), Some(b"small".to_vec()));
}

#[test]
fn test_compacted_store_reopens() {
    let temp = TempDir::new().unwrap();
    {
        let store = Store::open(manual_config(&temp)).unwrap();
        store.set("a", "1").unwrap();
        store.set("a", "2").unwrap();
        store.set("b", "3").unwrap();
        store.compact().unwrap();
        store.set("c", "4").unwrap();
        store.close().unwrap();
    }

    let store = Store::open(manual_config(&temp)).unwrap();
    assert_eq!(store.all_keys().unwrap(), vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    assert_eq!(get(&store, "a"), Some(b"2".to_vec()));
    assert_eq!(store.stats().unwrap().epoch, 1);
}

#[test]
fn test_compaction_leaves_no_temp_files() {
    let temp = TempDir::new().unwrap();
    let store = Store::open(manual_config(&temp)).unwrap();
    store.set("a", "1").unwrap();
    store.set("a", "2").unwrap();
    store.compact().unwrap();

    assert_eq!(dir_entries(temp.path()), vec!["compact.mkv".to_string()]);
}

#[test]
fn test_failed_rewrite_leaves_data_file_untouched() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("compact.mkv");
    let store = Store::open(manual_config(&temp)).unwrap();
    store.set("a", "1").unwrap();
    store.set("b", "two").unwrap();
    store.set("a", "11").unwrap();

    // Damage the live frame for "b" behind the store's back
    let b_offset = HEADER_SIZE + frame::encoded_len(b"a", Some(b"1")) as u64;
    let b_value = b_offset + 4 + 1 + 4;
    {
        let mut file = OpenOptions::new().write(true).open(&path).unwrap();
        file.seek(SeekFrom::Start(b_value)).unwrap();
        file.write_all(b"X").unwrap();
        file.sync_all().unwrap();
    }
    let before = std::fs::read(&path).unwrap();

    let err = store.compact().unwrap_err();
    assert!(matches!(err, MapKvError::Frame(_)));

    assert_eq!(std::fs::read(&path).unwrap(), before);
    assert_eq!(dir_entries(temp.path()), vec!["compact.mkv".to_string()]);
    assert_eq!(get(&store, "a"), Some(b"11".to_vec()));
    assert!(store.get_bytes("b").is_err());

    let stats = store.stats().unwrap();
    assert_eq!(stats.epoch, 0);
    assert_eq!(stats.count, 2);
}

#[cfg(unix)]
#[test]
fn test_writes_after_compaction_survive_reopen_when_dir_sync_fails() {
    use std::os::unix::fs::PermissionsExt;

    let set_mode = |dir: &std::path::Path, mode: u32| {
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(mode)).unwrap();
    };

    let temp = TempDir::new().unwrap();
    let root = temp.path().join("stores");
    std::fs::create_dir(&root).unwrap();
    let config = Config::builder()
        .root_dir(&root)
        .store_id("compact")
        .sync_strategy(SyncStrategy::Never)
        .auto_compact(false)
        .build();

    let store = Store::open(config.clone()).unwrap();
    store.set("k", "1").unwrap();
    store.set("k", "2").unwrap();

    // Write and search permission only: the rename works, opening the
    // directory to fsync it does not (unless running as root)
    set_mode(&root, 0o300);
    let compacted = store.compact();
    set_mode(&root, 0o755);
    assert!(matches!(compacted, Ok(true) | Err(MapKvError::StoreUnavailable(_))));

    // Either way the store now writes to the file the path names
    store.set("after", "rename").unwrap();
    assert_eq!(store.stats().unwrap().epoch, 1);
    store.close().unwrap();

    let store = Store::open(config).unwrap();
    assert_eq!(get(&store, "k"), Some(b"2".to_vec()));
    assert_eq!(get(&store, "after"), Some(b"rename".to_vec()));
}

// =============================================================================
// Automatic Compaction
// =============================================================================

#[test]
fn test_auto_compaction_by_stale_ratio() {
    let temp = TempDir::new().unwrap();
    let config = Config::builder()
        .root_dir(temp.path())
        .store_id("compact")
        .sync_strategy(SyncStrategy::Never)
        .compaction_threshold(0.5)
        .compaction_min_bytes(1024)
        .build();
    let store = Store::open(config).unwrap();

    for i in 0..200 {
        store.set("hot", format!("value{:05}", i)).unwrap();
    }

    let stats = store.stats().unwrap();
    assert!(stats.epoch > 0, "expected at least one automatic rewrite");
    assert!(stats.actual_size - HEADER_SIZE < 1024 * 2);
    assert_eq!(get(&store, "hot"), Some(b"value00199".to_vec()));
}

#[test]
fn test_compaction_before_growth_past_ceiling() {
    let temp = TempDir::new().unwrap();
    let config = Config::builder()
        .root_dir(temp.path())
        .store_id("compact")
        .sync_strategy(SyncStrategy::Never)
        .initial_capacity(PAGE_SIZE)
        .growth_ceiling(2 * PAGE_SIZE)
        .compaction_min_bytes(u64::MAX)
        .build();
    let store = Store::open(config).unwrap();
    let value = vec![9u8; 1024];

    for _ in 0..50 {
        store.set("k", &value).unwrap();
    }

    let stats = store.stats().unwrap();
    assert!(stats.total_size <= 2 * PAGE_SIZE);
    assert!(stats.epoch > 0);
    assert_eq!(store.get_bytes("k").unwrap().unwrap(), value);
}

#[test]
fn test_growth_without_stale_bytes_ignores_ceiling() {
    let temp = TempDir::new().unwrap();
    let config = Config::builder()
        .root_dir(temp.path())
        .store_id("compact")
        .sync_strategy(SyncStrategy::Never)
        .growth_ceiling(PAGE_SIZE)
        .build();
    let store = Store::open(config).unwrap();

    for i in 0..20 {
        store.set(format!("k{}", i), vec![0u8; 1024]).unwrap();
    }

    let stats = store.stats().unwrap();
    assert!(stats.total_size > PAGE_SIZE);
    assert_eq!(stats.epoch, 0);
    assert_eq!(stats.count, 20);
}

// =============================================================================
// Clear
// =============================================================================

#[test]
fn test_clear_all() {
    let temp = TempDir::new().unwrap();
    let store = Store::open(manual_config(&temp)).unwrap();
    for i in 0..100 {
        store.set(format!("k{}", i), vec![0u8; 200]).unwrap();
    }

    store.clear_all().unwrap();

    let stats = store.stats().unwrap();
    assert_eq!(stats.count, 0);
    assert_eq!(stats.actual_size, HEADER_SIZE);
    assert_eq!(stats.total_size, PAGE_SIZE);
    assert_eq!(get(&store, "k1"), None);

    store.set("after", "clear").unwrap();
    store.close().unwrap();

    let store = Store::open(manual_config(&temp)).unwrap();
    assert_eq!(store.all_keys().unwrap(), vec![b"after".to_vec()]);
}

#[test]
fn test_clear_empty_store() {
    let temp = TempDir::new().unwrap();
    let store = Store::open(manual_config(&temp)).unwrap();

    store.clear_all().unwrap();
    assert_eq!(store.count().unwrap(), 0);
}

// =============================================================================
// Recovery of Interrupted Compactions
// =============================================================================

#[test]
fn test_leftover_temp_file_removed_on_open() {
    let temp = TempDir::new().unwrap();
    {
        let store = Store::open(manual_config(&temp)).unwrap();
        store.set("a", "1").unwrap();
        store.close().unwrap();
    }

    // A compaction that died before the rename
    let leftover = temp.path().join(".compact.mkv.a1b2c3.compact");
    std::fs::write(&leftover, FileHeader::new().encode()).unwrap();
    let unrelated = temp.path().join("other.mkv");
    std::fs::write(&unrelated, b"keep").unwrap();

    let store = Store::open(manual_config(&temp)).unwrap();

    assert!(!leftover.exists());
    assert!(unrelated.exists());
    assert_eq!(get(&store, "a"), Some(b"1".to_vec()));
}

#[test]
fn test_other_stores_temp_files_survive_open() {
    let temp = TempDir::new().unwrap();

    // Store "compact.mkv.b" compacting next to store "compact"
    let foreign = temp.path().join(".compact.mkv.b.mkv.XyZ123.compact");
    std::fs::write(&foreign, FileHeader::new().encode()).unwrap();
    let own = temp.path().join(".compact.mkv.Ab12Cd.compact");
    std::fs::write(&own, FileHeader::new().encode()).unwrap();

    let store = Store::open(manual_config(&temp)).unwrap();
    store.set("a", "1").unwrap();

    assert!(foreign.exists());
    assert!(!own.exists());
}

// =============================================================================
// Policy
// =============================================================================

#[test]
fn test_policy_thresholds() {
    let config = Config::builder()
        .compaction_threshold(0.5)
        .compaction_min_bytes(1000)
        .build();
    let compactor = Compactor::from_config(&config);

    let small = CompactionStats { log_bytes: 500, live_bytes: 10, stale_bytes: 490 };
    assert!(!compactor.should_compact(&small));

    let mostly_live = CompactionStats { log_bytes: 4000, live_bytes: 3000, stale_bytes: 1000 };
    assert!(!compactor.should_compact(&mostly_live));

    let mostly_stale = CompactionStats { log_bytes: 4000, live_bytes: 1000, stale_bytes: 3000 };
    assert!(compactor.should_compact(&mostly_stale));
    assert!((mostly_stale.stale_ratio() - 0.75).abs() < f64::EPSILON);
}

#[test]
fn test_target_capacity_leaves_headroom() {
    let config = Config::builder().initial_capacity(PAGE_SIZE).build();
    let compactor = Compactor::from_config(&config);

    assert_eq!(compactor.target_capacity(HEADER_SIZE), PAGE_SIZE);
    assert_eq!(compactor.target_capacity(3000), 2 * PAGE_SIZE);
    assert_eq!(compactor.target_capacity(5000), 4 * PAGE_SIZE);
}
