//! Log Reader
//!
//! Sequential iteration over the frames of a byte range.

use crate::frame::{self, DecodeError, Frame};

/// Iterates frames in `[start, end)` of a buffer
///
/// Yields `(offset, frame)` pairs. The first decode failure is yielded once
/// and ends the iteration: nothing after a bad frame is trusted.
pub struct FrameReader<'a> {
    buf: &'a [u8],
    position: usize,
    end: usize,
    failed: bool,
}

impl<'a> FrameReader<'a> {
    /// Create a reader over `buf[start..end]` (`end` is clamped to the buffer)
    pub fn new(buf: &'a [u8], start: usize, end: usize) -> Self {
        let end = end.min(buf.len());
        Self {
            buf: &buf[..end],
            position: start,
            end,
            failed: false,
        }
    }

    /// Offset just past the last frame yielded successfully
    pub fn position(&self) -> usize {
        self.position
    }
}

impl<'a> Iterator for FrameReader<'a> {
    type Item = std::result::Result<(usize, Frame<'a>), DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.position >= self.end {
            return None;
        }

        match frame::decode(self.buf, self.position) {
            Ok(frame) => {
                let offset = self.position;
                self.position += frame.len;
                Some(Ok((offset, frame)))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
