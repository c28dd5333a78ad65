//! Tests for Buffer ownership modes

use bytes::Bytes;
use mapkv::Buffer;

#[test]
fn test_no_copy_borrows() {
    let source = b"borrowed".to_vec();
    let buffer = Buffer::no_copy(&source);

    assert!(buffer.is_borrowed());
    assert_eq!(buffer.len(), 8);
    assert_eq!(buffer.as_slice().as_ptr(), source.as_ptr());
}

#[test]
fn test_copy_owns() {
    let buffer = {
        let source = b"owned".to_vec();
        Buffer::copy(&source)
    };

    assert!(!buffer.is_borrowed());
    assert_eq!(buffer, b"owned");
}

#[test]
fn test_equality_ignores_mode() {
    let source = b"same".to_vec();

    assert_eq!(Buffer::no_copy(&source), Buffer::copy(&source));
    assert_ne!(Buffer::no_copy(&source), Buffer::copy(b"other"));
}

#[test]
fn test_empty_buffer() {
    let buffer = Buffer::copy(b"");

    assert!(buffer.is_empty());
    assert_eq!(buffer.len(), 0);
    assert_eq!(buffer.to_vec(), Vec::<u8>::new());
}

#[test]
fn test_into_owned_detaches() {
    let owned = {
        let source = b"detach me".to_vec();
        Buffer::no_copy(&source).into_owned()
    };

    assert!(!owned.is_borrowed());
    assert_eq!(owned, b"detach me");
}

#[test]
fn test_into_bytes() {
    let bytes = Bytes::from_static(b"shared");
    let buffer = Buffer::from(bytes.clone());

    // Owned buffers hand back the same allocation
    assert_eq!(buffer.into_bytes().as_ptr(), bytes.as_ptr());
    assert_eq!(Buffer::no_copy(b"copied").into_bytes(), Bytes::from_static(b"copied"));
}

#[test]
fn test_conversions() {
    let from_vec = Buffer::from(vec![1u8, 2, 3]);
    let slice: &[u8] = &[1, 2, 3];
    let from_slice = Buffer::from(slice);

    assert!(!from_vec.is_borrowed());
    assert!(from_slice.is_borrowed());
    assert_eq!(from_vec, from_slice);
    assert_eq!(&from_vec[..], &[1, 2, 3]);
    assert_eq!(from_vec, vec![1u8, 2, 3]);
}

#[test]
fn test_debug_hides_contents() {
    let rendered = format!("{:?}", Buffer::copy(b"secret"));

    assert!(rendered.contains("Owned"));
    assert!(rendered.contains("len: 6"));
    assert!(!rendered.contains("secret"));
}
