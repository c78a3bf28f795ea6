//! The substrate contract consumed by the overlay
//!
//! The overlay is backend-agnostic: anything that can answer batched point
//! lookups, batched writes, and an ordered forward scan can host all three
//! modalities. Transactions are optional; when a backend offers them, the
//! transaction handle itself implements [`Substrate`], so passing it to a
//! modality routes every access through the transaction and makes the
//! whole batch atomic.
//!
//! Thread safety is the backend's concern. The overlay is single-threaded
//! per call and performs no I/O of its own.

use crate::arena::{Arena, ByteRange};
use crate::batch::Bitmap;
use crate::error::Result;
use crate::types::{CollectionId, Key, Located};

/// Result of a batched point lookup
///
/// Values are copied into the caller's arena; `ranges[i]` indexes the value
/// for `targets[i]`. A zero presence bit means the key was absent and the
/// corresponding range is empty.
#[derive(Debug)]
pub struct ReadBatch {
    /// Per-target presence, LSB-first
    pub presences: Bitmap,
    /// Per-target value location within the arena
    pub ranges: Vec<ByteRange>,
}

impl ReadBatch {
    /// Value bytes for target `i`, or `None` if the key was absent
    pub fn bytes<'a>(&self, i: usize, arena: &'a Arena) -> Option<&'a [u8]> {
        if self.presences.get(i) {
            Some(arena.slice(self.ranges[i]))
        } else {
            None
        }
    }
}

/// Ordered key-value backend hosting the overlay
///
/// All methods are batch-oriented; the overlay has already deduplicated
/// and sorted targets where that helps, so implementations may coalesce
/// freely. Any internal locking must make concurrent calls safe per the
/// backend's own contract.
pub trait Substrate {
    /// Batched point lookup
    ///
    /// Values for present keys are appended to `arena`; absent keys get a
    /// zero presence bit and an empty range.
    fn read(&self, targets: &[Located], arena: &mut Arena) -> Result<ReadBatch>;

    /// Batched write; `None` deletes the key
    ///
    /// `targets` and `values` have equal length. Later entries win when a
    /// target repeats within the batch.
    fn write(&self, targets: &[Located], values: &[Option<&[u8]>]) -> Result<()>;

    /// Ordered forward scan of present keys
    ///
    /// Returns up to `limit` keys of `collection` that are `>= start`, in
    /// ascending order.
    fn scan(&self, collection: CollectionId, start: Key, limit: u32) -> Result<Vec<Key>>;
}

/// A substrate view with transactional semantics
///
/// Reads observe the transaction's snapshot plus its own staged writes;
/// nothing is visible to other sessions before `commit`. Validation is
/// optimistic: `commit` fails with a `conflict` error when an observed key
/// changed underneath the transaction.
pub trait SubstrateTransaction: Substrate {
    /// Atomically publish all staged writes
    fn commit(self) -> Result<()>
    where
        Self: Sized;

    /// Discard all staged writes
    fn abort(self)
    where
        Self: Sized;
}
