//! BTreeMap-backed substrate with optimistic transactions
//!
//! ## Design
//!
//! - One `RwLock<Inner>` around an ordered map; reads take the shared
//!   lock, write batches take the exclusive lock once per batch
//! - `BTreeMap<Located, Vec<u8>>` keeps keys in (collection, key) order,
//!   which makes the forward scan a plain range walk
//! - A per-key mutation clock (`FxHashMap<Located, u64>`) backs optimistic
//!   validation: a transaction records the clock of everything it reads
//!   and commit fails if any observed key moved
//!
//! Scans inside a transaction merge the staged overlay but are not
//! validated on commit; point reads are.

use lamina_core::{
    Arena, Bitmap, ByteRange, CollectionId, Key, LaminaError, Located, ReadBatch, Result,
    Substrate, SubstrateTransaction,
};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Default)]
struct Inner {
    entries: BTreeMap<Located, Vec<u8>>,
    /// Mutation clock per key; 0 means "never written"
    mutations: FxHashMap<Located, u64>,
    clock: u64,
}

impl Inner {
    fn apply(&mut self, target: Located, value: Option<&[u8]>) {
        self.clock += 1;
        self.mutations.insert(target, self.clock);
        match value {
            Some(bytes) => {
                self.entries.insert(target, bytes.to_vec());
            }
            None => {
                self.entries.remove(&target);
            }
        }
    }

    fn clock_of(&self, target: &Located) -> u64 {
        self.mutations.get(target).copied().unwrap_or(0)
    }
}

/// In-memory ordered substrate
///
/// Cheap to create, safe to share by reference across threads. All state
/// lives behind one lock; this is a reference backend, not a performance
/// statement.
#[derive(Debug, Default)]
pub struct MemSubstrate {
    inner: RwLock<Inner>,
}

impl MemSubstrate {
    /// Create an empty substrate
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin an optimistic transaction
    pub fn begin(&self) -> MemTransaction<'_> {
        MemTransaction {
            store: self,
            state: Mutex::new(TxnState::default()),
        }
    }

    /// Number of stored keys, across all collections
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// Whether the substrate holds no keys
    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }

    /// Drop every key in every collection
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.entries.clear();
        inner.mutations.clear();
    }
}

impl Substrate for MemSubstrate {
    fn read(&self, targets: &[Located], arena: &mut Arena) -> Result<ReadBatch> {
        let inner = self.inner.read();
        let mut presences = Bitmap::zeroed(targets.len());
        let mut ranges = Vec::with_capacity(targets.len());
        for (i, target) in targets.iter().enumerate() {
            match inner.entries.get(target) {
                Some(value) => {
                    presences.set(i, true);
                    ranges.push(arena.push(value)?);
                }
                None => ranges.push(ByteRange::EMPTY),
            }
        }
        Ok(ReadBatch { presences, ranges })
    }

    fn write(&self, targets: &[Located], values: &[Option<&[u8]>]) -> Result<()> {
        if targets.len() != values.len() {
            return Err(LaminaError::invalid_argument(format!(
                "write batch shape mismatch: {} targets, {} values",
                targets.len(),
                values.len()
            )));
        }
        let mut inner = self.inner.write();
        for (target, value) in targets.iter().zip(values) {
            inner.apply(*target, *value);
        }
        Ok(())
    }

    fn scan(&self, collection: CollectionId, start: Key, limit: u32) -> Result<Vec<Key>> {
        let inner = self.inner.read();
        let from = Located::new(collection, start);
        let keys = inner
            .entries
            .range(from..)
            .take_while(|(located, _)| located.collection == collection)
            .take(limit as usize)
            .map(|(located, _)| located.key)
            .collect();
        Ok(keys)
    }
}

#[derive(Debug, Default)]
struct TxnState {
    staged: BTreeMap<Located, Option<Vec<u8>>>,
    observed: FxHashMap<Located, u64>,
}

/// Optimistic transaction over a [`MemSubstrate`]
///
/// Implements [`Substrate`] itself, so modalities can run against it
/// unchanged; nothing becomes visible to other sessions before `commit`.
#[derive(Debug)]
pub struct MemTransaction<'a> {
    store: &'a MemSubstrate,
    state: Mutex<TxnState>,
}

impl Substrate for MemTransaction<'_> {
    fn read(&self, targets: &[Located], arena: &mut Arena) -> Result<ReadBatch> {
        let inner = self.store.inner.read();
        let mut state = self.state.lock();
        let mut presences = Bitmap::zeroed(targets.len());
        let mut ranges = Vec::with_capacity(targets.len());
        for (i, target) in targets.iter().enumerate() {
            let value = match state.staged.get(target) {
                Some(staged) => staged.as_deref(),
                None => {
                    state.observed.insert(*target, inner.clock_of(target));
                    inner.entries.get(target).map(|v| v.as_slice())
                }
            };
            match value {
                Some(bytes) => {
                    presences.set(i, true);
                    ranges.push(arena.push(bytes)?);
                }
                None => ranges.push(ByteRange::EMPTY),
            }
        }
        Ok(ReadBatch { presences, ranges })
    }

    fn write(&self, targets: &[Located], values: &[Option<&[u8]>]) -> Result<()> {
        if targets.len() != values.len() {
            return Err(LaminaError::invalid_argument(format!(
                "write batch shape mismatch: {} targets, {} values",
                targets.len(),
                values.len()
            )));
        }
        let mut state = self.state.lock();
        for (target, value) in targets.iter().zip(values) {
            state.staged.insert(*target, value.map(|v| v.to_vec()));
        }
        Ok(())
    }

    fn scan(&self, collection: CollectionId, start: Key, limit: u32) -> Result<Vec<Key>> {
        let inner = self.store.inner.read();
        let state = self.state.lock();
        let from = Located::new(collection, start);
        let mut merged: BTreeMap<Key, bool> = inner
            .entries
            .range(from..)
            .take_while(|(located, _)| located.collection == collection)
            .map(|(located, _)| (located.key, true))
            .collect();
        for (located, staged) in state.staged.range(from..) {
            if located.collection != collection {
                break;
            }
            merged.insert(located.key, staged.is_some());
        }
        Ok(merged
            .into_iter()
            .filter_map(|(key, present)| present.then_some(key))
            .take(limit as usize)
            .collect())
    }
}

impl SubstrateTransaction for MemTransaction<'_> {
    fn commit(self) -> Result<()> {
        let mut inner = self.store.inner.write();
        let state = self.state.into_inner();
        for (target, seen) in &state.observed {
            let now = inner.clock_of(target);
            if now != *seen {
                debug!(key = %target, seen, now, "optimistic validation failed");
                return Err(LaminaError::conflict(format!(
                    "key {target} changed during transaction"
                )));
            }
        }
        for (target, value) in state.staged {
            inner.apply(target, value.as_deref());
        }
        Ok(())
    }

    fn abort(self) {
        // Nothing was published; dropping the staged map is enough.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COL: CollectionId = CollectionId::MAIN;

    fn write_one(store: &impl Substrate, key: Key, value: &[u8]) {
        store
            .write(&[Located::new(COL, key)], &[Some(value)])
            .unwrap();
    }

    #[test]
    fn test_read_reports_absent_keys() {
        let store = MemSubstrate::new();
        let mut arena = Arena::new();
        write_one(&store, 1, b"one");

        let batch = store
            .read(
                &[Located::new(COL, 1), Located::new(COL, 2)],
                &mut arena,
            )
            .unwrap();
        assert_eq!(batch.bytes(0, &arena), Some(&b"one"[..]));
        assert_eq!(batch.bytes(1, &arena), None);
    }

    #[test]
    fn test_write_none_deletes() {
        let store = MemSubstrate::new();
        write_one(&store, 1, b"one");
        store.write(&[Located::new(COL, 1)], &[None]).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_scan_is_ordered_and_bounded() {
        let store = MemSubstrate::new();
        for key in [5i64, 1, 9, 3] {
            write_one(&store, key, b"x");
        }
        assert_eq!(store.scan(COL, 2, 10).unwrap(), vec![3, 5, 9]);
        assert_eq!(store.scan(COL, 0, 2).unwrap(), vec![1, 3]);
        assert_eq!(store.scan(CollectionId(9), 0, 10).unwrap(), Vec::<Key>::new());
    }

    #[test]
    fn test_transaction_isolates_until_commit() {
        let store = MemSubstrate::new();
        let mut arena = Arena::new();

        let txn = store.begin();
        write_one(&txn, 1, b"staged");
        assert!(store.is_empty(), "staged write must not be visible");

        let inside = txn.read(&[Located::new(COL, 1)], &mut arena).unwrap();
        assert_eq!(inside.bytes(0, &arena), Some(&b"staged"[..]));

        txn.commit().unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_commit_detects_conflicting_write() {
        let store = MemSubstrate::new();
        let mut arena = Arena::new();
        write_one(&store, 1, b"v0");

        let txn = store.begin();
        let _ = txn.read(&[Located::new(COL, 1)], &mut arena).unwrap();
        write_one(&store, 1, b"v1"); // concurrent writer moves the key
        write_one(&txn, 1, b"v2");

        let err = txn.commit().unwrap_err();
        assert!(err.is_retryable(), "conflict should be retryable: {err}");
    }

    #[test]
    fn test_transaction_scan_sees_staged_overlay() {
        let store = MemSubstrate::new();
        write_one(&store, 1, b"a");
        write_one(&store, 2, b"b");

        let txn = store.begin();
        write_one(&txn, 3, b"c");
        txn.write(&[Located::new(COL, 1)], &[None]).unwrap();

        assert_eq!(txn.scan(COL, 0, 10).unwrap(), vec![2, 3]);
    }

    #[test]
    fn test_abort_publishes_nothing() {
        let store = MemSubstrate::new();
        let txn = store.begin();
        write_one(&txn, 1, b"staged");
        txn.abort();
        assert!(store.is_empty());
    }
}
