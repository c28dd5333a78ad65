//! Tests for the frame codec
//!
//! These tests verify:
//! - Encoded layout (lengths, little-endian fields, trailing CRC)
//! - Tombstones vs empty values
//! - Checksum and truncation detection
//! - Zero-filled space never decodes

use mapkv::frame::{
    decode, encode, encode_into, encoded_len, DecodeError, FRAME_OVERHEAD, MAX_KEY_LEN,
    TOMBSTONE_MARKER,
};
use mapkv::MapKvError;

// =============================================================================
// Encoding Tests
// =============================================================================

#[test]
fn test_encode_layout() {
    let bytes = encode(b"key", Some(b"value")).unwrap();

    assert_eq!(bytes.len(), FRAME_OVERHEAD + 3 + 5);
    assert_eq!(&bytes[0..4], &3u32.to_le_bytes());
    assert_eq!(&bytes[4..7], b"key");
    assert_eq!(&bytes[7..11], &5u32.to_le_bytes());
    assert_eq!(&bytes[11..16], b"value");

    let crc = crc32fast::hash(&bytes[..16]);
    assert_eq!(&bytes[16..20], &crc.to_le_bytes());
}

#[test]
fn test_encoded_len_matches_encode() {
    for (key, value) in [
        (&b"a"[..], Some(&b""[..])),
        (&b"abc"[..], Some(&b"0123456789"[..])),
        (&b"gone"[..], None),
    ] {
        assert_eq!(encode(key, value).unwrap().len(), encoded_len(key, value));
    }
}

#[test]
fn test_encode_tombstone_uses_marker() {
    let bytes = encode(b"k", None).unwrap();

    assert_eq!(bytes.len(), FRAME_OVERHEAD + 1);
    assert_eq!(&bytes[5..9], &TOMBSTONE_MARKER.to_le_bytes());
}

#[test]
fn test_encode_into_appends() {
    let mut out = b"prefix".to_vec();
    encode_into(&mut out, b"k", Some(b"v")).unwrap();

    assert_eq!(&out[..6], b"prefix");
    let frame = decode(&out, 6).unwrap();
    assert_eq!(frame.key, b"k");
    assert_eq!(frame.value, Some(&b"v"[..]));
}

#[test]
fn test_encode_rejects_oversize_key() {
    let key = vec![b'k'; MAX_KEY_LEN + 1];
    let err = encode(&key, Some(b"v")).unwrap_err();
    assert!(matches!(err, MapKvError::InvalidArgument(_)));
}

// =============================================================================
// Decoding Tests
// =============================================================================

#[test]
fn test_decode_value() {
    let bytes = encode(b"user:1", Some(b"alice")).unwrap();
    let frame = decode(&bytes, 0).unwrap();

    assert_eq!(frame.key, b"user:1");
    assert_eq!(frame.value, Some(&b"alice"[..]));
    assert_eq!(frame.len, bytes.len());
    assert!(!frame.is_tombstone());
}

#[test]
fn test_decode_empty_value_is_not_tombstone() {
    let bytes = encode(b"k", Some(b"")).unwrap();
    let frame = decode(&bytes, 0).unwrap();

    assert_eq!(frame.value, Some(&b""[..]));
    assert!(!frame.is_tombstone());
}

#[test]
fn test_decode_tombstone() {
    let bytes = encode(b"k", None).unwrap();
    let frame = decode(&bytes, 0).unwrap();

    assert_eq!(frame.key, b"k");
    assert!(frame.is_tombstone());
}

#[test]
fn test_decode_at_offset() {
    let mut buf = encode(b"first", Some(b"1")).unwrap();
    let second_at = buf.len();
    encode_into(&mut buf, b"second", Some(b"22")).unwrap();

    let frame = decode(&buf, second_at).unwrap();
    assert_eq!(frame.key, b"second");
    assert_eq!(frame.value, Some(&b"22"[..]));
}

#[test]
fn test_decode_detects_flipped_value_byte() {
    let mut bytes = encode(b"key", Some(b"value")).unwrap();
    bytes[12] ^= 0xFF;

    let err = decode(&bytes, 0).unwrap_err();
    assert!(matches!(err, DecodeError::ChecksumMismatch { offset: 0, .. }));
}

#[test]
fn test_decode_detects_flipped_length() {
    let mut bytes = encode(b"key", Some(b"value")).unwrap();
    // Shorter value length: frame still fits, checksum must catch it
    bytes[7] = 4;

    assert!(decode(&bytes, 0).is_err());
}

#[test]
fn test_decode_truncated() {
    let bytes = encode(b"key", Some(b"value")).unwrap();

    for cut in [0, 3, 7, 10, bytes.len() - 1] {
        let err = decode(&bytes[..cut], 0).unwrap_err();
        assert!(
            matches!(err, DecodeError::Truncated { .. }),
            "cut at {} gave {:?}",
            cut,
            err
        );
    }
}

#[test]
fn test_decode_huge_length_is_truncated_not_panic() {
    let mut bytes = encode(b"key", Some(b"value")).unwrap();
    bytes[0..4].copy_from_slice(&u32::MAX.to_le_bytes());

    let err = decode(&bytes, 0).unwrap_err();
    assert!(matches!(err, DecodeError::Truncated { .. }));
}

#[test]
fn test_zero_filled_space_never_decodes() {
    let zeros = vec![0u8; 64];
    let err = decode(&zeros, 0).unwrap_err();

    assert!(matches!(err, DecodeError::ChecksumMismatch { stored: 0, .. }));
}

#[test]
fn test_decode_past_end() {
    let bytes = encode(b"k", Some(b"v")).unwrap();
    let err = decode(&bytes, bytes.len() + 10).unwrap_err();

    assert_eq!(err.offset(), bytes.len() + 10);
}
