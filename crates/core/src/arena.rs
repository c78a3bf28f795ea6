//! Per-call bump arena
//!
//! The arena is an append-only byte region that owns every variable-width
//! output buffer an overlay call produces. Results carry `ByteRange`
//! indices into it instead of owning pointers, which removes any need for
//! reference counting over output lifetimes.
//!
//! The arena is single-owner. Buffers stay valid until `reset()` or the
//! next call that reuses the arena.

use crate::error::{LaminaError, Result};

/// Index of a byte run inside an [`Arena`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ByteRange {
    /// Start offset within the arena blob
    pub offset: u32,
    /// Length in bytes
    pub len: u32,
}

impl ByteRange {
    /// An empty range at offset 0
    pub const EMPTY: ByteRange = ByteRange { offset: 0, len: 0 };

    /// End offset (exclusive)
    pub fn end(&self) -> u32 {
        self.offset + self.len
    }

    /// Whether the range is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Append-only scratch region owning all output bytes of one overlay call
#[derive(Debug, Default)]
pub struct Arena {
    blob: Vec<u8>,
}

impl Arena {
    /// Create an empty arena
    pub fn new() -> Self {
        Self { blob: Vec::new() }
    }

    /// Create an arena with pre-reserved capacity
    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            blob: Vec::with_capacity(bytes),
        }
    }

    /// Append bytes, returning their range
    ///
    /// Allocation failure surfaces as `OutOfMemory` instead of aborting.
    pub fn push(&mut self, bytes: &[u8]) -> Result<ByteRange> {
        self.reserve(bytes.len())?;
        let offset = self.blob.len() as u32;
        self.blob.extend_from_slice(bytes);
        Ok(ByteRange {
            offset,
            len: bytes.len() as u32,
        })
    }

    /// Start an incremental write; bytes appended through the returned
    /// writer become one range when `finish()` is called.
    pub fn writer(&mut self) -> ArenaWriter<'_> {
        let start = self.blob.len();
        ArenaWriter { arena: self, start }
    }

    /// Resolve a range to its bytes
    ///
    /// # Panics
    /// Panics if the range does not lie within the arena; ranges must come
    /// from this arena since its last reset.
    pub fn slice(&self, range: ByteRange) -> &[u8] {
        &self.blob[range.offset as usize..range.end() as usize]
    }

    /// Bytes currently held
    pub fn len(&self) -> usize {
        self.blob.len()
    }

    /// Whether the arena holds no bytes
    pub fn is_empty(&self) -> bool {
        self.blob.is_empty()
    }

    /// Drop all contents, invalidating every outstanding range
    ///
    /// Capacity is retained for reuse across calls.
    pub fn reset(&mut self) {
        self.blob.clear();
    }

    fn reserve(&mut self, additional: usize) -> Result<()> {
        self.blob
            .try_reserve(additional)
            .map_err(|_| LaminaError::out_of_memory(format!("arena grow by {additional} bytes")))
    }
}

/// Incremental writer appending one logical value to the arena
///
/// Serializers stream into this instead of allocating intermediate buffers.
pub struct ArenaWriter<'a> {
    arena: &'a mut Arena,
    start: usize,
}

impl ArenaWriter<'_> {
    /// Close the write and return the range covering everything appended
    /// since the writer was created.
    pub fn finish(self) -> ByteRange {
        ByteRange {
            offset: self.start as u32,
            len: (self.arena.blob.len() - self.start) as u32,
        }
    }

    /// Bytes appended so far through this writer
    pub fn written(&self) -> usize {
        self.arena.blob.len() - self.start
    }
}

impl std::io::Write for ArenaWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.arena
            .reserve(buf.len())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::OutOfMemory, e.to_string()))?;
        self.arena.blob.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_push_and_slice_round_trip() {
        let mut arena = Arena::new();
        let a = arena.push(b"hello").unwrap();
        let b = arena.push(b"world").unwrap();
        assert_eq!(arena.slice(a), b"hello");
        assert_eq!(arena.slice(b), b"world");
        assert_eq!(b.offset, 5);
    }

    #[test]
    fn test_writer_covers_streamed_bytes() {
        let mut arena = Arena::new();
        arena.push(b"prefix").unwrap();
        let mut w = arena.writer();
        w.write_all(b"abc").unwrap();
        w.write_all(b"def").unwrap();
        let range = w.finish();
        assert_eq!(arena.slice(range), b"abcdef");
        assert_eq!(range.offset, 6);
    }

    #[test]
    fn test_reset_clears_but_keeps_capacity() {
        let mut arena = Arena::with_capacity(64);
        arena.push(&[0u8; 32]).unwrap();
        arena.reset();
        assert!(arena.is_empty());
        let r = arena.push(b"x").unwrap();
        assert_eq!(r.offset, 0);
    }

    #[test]
    fn test_empty_range() {
        let arena = Arena::new();
        assert_eq!(arena.slice(ByteRange::EMPTY), b"");
        assert!(ByteRange::EMPTY.is_empty());
    }
}
