//! Tests for the log writer
//!
//! These tests verify:
//! - Frames land at the cursor, back to back
//! - Each append commits cursor and generation to the header
//! - The file grows when a frame does not fit
//! - Sync strategies

use std::path::PathBuf;

use mapkv::config::SyncStrategy;
use mapkv::frame;
use mapkv::storage::{FileHeader, MappedFile, HEADER_SIZE, PAGE_SIZE};
use mapkv::wal::LogWriter;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_writer(strategy: SyncStrategy) -> (TempDir, PathBuf, LogWriter) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("test.mkv");

    let mut file = MappedFile::open(&path, PAGE_SIZE).unwrap();
    file.write_header(&FileHeader::new()).unwrap();
    let writer = LogWriter::new(file, HEADER_SIZE, strategy, 2);

    (temp_dir, path, writer)
}

// =============================================================================
// Append Tests
// =============================================================================

#[test]
fn test_append_first_frame_at_header_end() {
    let (_temp, _path, mut writer) = setup_writer(SyncStrategy::EveryWrite);

    let appended = writer.append(b"key", Some(b"value")).unwrap();

    assert_eq!(appended.offset, HEADER_SIZE);
    assert_eq!(appended.len, frame::encoded_len(b"key", Some(b"value")) as u64);
    assert_eq!(appended.generation, 1);
    assert_eq!(writer.cursor(), HEADER_SIZE + appended.len);
}

#[test]
fn test_append_commits_header() {
    let (_temp, _path, mut writer) = setup_writer(SyncStrategy::EveryWrite);

    writer.append(b"a", Some(b"1")).unwrap();
    let second = writer.append(b"b", Some(b"2")).unwrap();

    let header = writer.header().unwrap();
    assert_eq!(header.generation, 2);
    assert_eq!(header.cursor, second.offset + second.len);
    assert_eq!(header.cursor, writer.cursor());
    assert_eq!(writer.log_len(), header.log_len());
}

#[test]
fn test_appended_frames_decode_in_order() {
    let (_temp, _path, mut writer) = setup_writer(SyncStrategy::Never);

    let a = writer.append(b"a", Some(b"first")).unwrap();
    let b = writer.append(b"b", None).unwrap();
    let c = writer.append(b"c", Some(b"")).unwrap();

    assert_eq!(b.offset, a.offset + a.len);
    assert_eq!(c.offset, b.offset + b.len);

    let buf = writer.file().as_slice();
    assert_eq!(frame::decode(buf, a.offset as usize).unwrap().value, Some(&b"first"[..]));
    assert!(frame::decode(buf, b.offset as usize).unwrap().is_tombstone());
    assert_eq!(frame::decode(buf, c.offset as usize).unwrap().value, Some(&b""[..]));
}

#[test]
fn test_append_grows_file() {
    let (_temp, path, mut writer) = setup_writer(SyncStrategy::Never);
    let big = vec![7u8; 3 * PAGE_SIZE as usize];

    let appended = writer.append(b"big", Some(&big)).unwrap();

    assert!(writer.capacity() >= appended.offset + appended.len);
    assert_eq!(writer.capacity(), 4 * PAGE_SIZE);
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 4 * PAGE_SIZE);

    let frame = frame::decode(writer.file().as_slice(), appended.offset as usize).unwrap();
    assert_eq!(frame.value, Some(&big[..]));
}

#[test]
fn test_oversize_key_appends_nothing() {
    let (_temp, _path, mut writer) = setup_writer(SyncStrategy::EveryWrite);
    let key = vec![b'k'; frame::MAX_KEY_LEN + 1];

    assert!(writer.append(&key, Some(b"v")).is_err());
    assert_eq!(writer.cursor(), HEADER_SIZE);
    assert_eq!(writer.header().unwrap().generation, 0);
}

// =============================================================================
// Durability Tests
// =============================================================================

#[test]
fn test_appends_visible_after_reopen() {
    let (_temp, path, mut writer) = setup_writer(SyncStrategy::EveryNEntries { count: 2 });

    for i in 0..5 {
        writer.append(format!("k{}", i).as_bytes(), Some(b"v")).unwrap();
    }
    writer.sync().unwrap();
    let cursor = writer.cursor();
    drop(writer);

    let file = MappedFile::open(&path, PAGE_SIZE).unwrap();
    let header = file.read_header().unwrap().unwrap();
    assert_eq!(header.cursor, cursor);
    assert_eq!(header.generation, 5);
}

#[test]
fn test_set_cursor_never_below_header() {
    let (_temp, _path, mut writer) = setup_writer(SyncStrategy::Never);

    writer.set_cursor(0);
    assert_eq!(writer.cursor(), HEADER_SIZE);
}
