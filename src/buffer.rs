//! Byte buffers with an explicit ownership mode
//!
//! Values are opaque bytes. A `Buffer` is either a borrowed view (no copy,
//! valid only while its source is) or an owned, cheaply clonable `Bytes`.
//! Whatever structure a caller reads into the bytes is the caller's concern.

use std::fmt;
use std::ops::Deref;

use bytes::Bytes;

/// A length-delimited byte value
#[derive(Clone)]
pub enum Buffer<'a> {
    /// Borrowed, no copy made
    Borrowed(&'a [u8]),
    /// Owned copy
    Owned(Bytes),
}

impl<'a> Buffer<'a> {
    /// Wrap bytes without copying them
    pub fn no_copy(bytes: &'a [u8]) -> Self {
        Buffer::Borrowed(bytes)
    }

    /// Copy bytes into an owned buffer
    pub fn copy(bytes: &[u8]) -> Buffer<'static> {
        Buffer::Owned(Bytes::copy_from_slice(bytes))
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        match self {
            Buffer::Borrowed(bytes) => bytes,
            Buffer::Owned(bytes) => bytes,
        }
    }

    pub fn is_borrowed(&self) -> bool {
        matches!(self, Buffer::Borrowed(_))
    }

    /// Detach from the source, copying if borrowed
    pub fn into_owned(self) -> Buffer<'static> {
        match self {
            Buffer::Borrowed(bytes) => Buffer::copy(bytes),
            Buffer::Owned(bytes) => Buffer::Owned(bytes),
        }
    }

    /// Convert to `Bytes`, copying if borrowed
    pub fn into_bytes(self) -> Bytes {
        match self {
            Buffer::Borrowed(bytes) => Bytes::copy_from_slice(bytes),
            Buffer::Owned(bytes) => bytes,
        }
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.as_slice().to_vec()
    }
}

impl Deref for Buffer<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl AsRef<[u8]> for Buffer<'_> {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl fmt::Debug for Buffer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = if self.is_borrowed() { "Borrowed" } else { "Owned" };
        f.debug_struct("Buffer")
            .field("mode", &mode)
            .field("len", &self.len())
            .finish()
    }
}

// Equality is by content, regardless of ownership mode
impl PartialEq for Buffer<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for Buffer<'_> {}

impl PartialEq<[u8]> for Buffer<'_> {
    fn eq(&self, other: &[u8]) -> bool {
        self.as_slice() == other
    }
}

impl PartialEq<&[u8]> for Buffer<'_> {
    fn eq(&self, other: &&[u8]) -> bool {
        self.as_slice() == *other
    }
}

impl<const N: usize> PartialEq<[u8; N]> for Buffer<'_> {
    fn eq(&self, other: &[u8; N]) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl<const N: usize> PartialEq<&[u8; N]> for Buffer<'_> {
    fn eq(&self, other: &&[u8; N]) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl PartialEq<Vec<u8>> for Buffer<'_> {
    fn eq(&self, other: &Vec<u8>) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl From<Bytes> for Buffer<'static> {
    fn from(bytes: Bytes) -> Self {
        Buffer::Owned(bytes)
    }
}

impl From<Vec<u8>> for Buffer<'static> {
    fn from(bytes: Vec<u8>) -> Self {
        Buffer::Owned(Bytes::from(bytes))
    }
}

impl<'a> From<&'a [u8]> for Buffer<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        Buffer::Borrowed(bytes)
    }
}
