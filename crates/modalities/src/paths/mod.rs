//! Paths modality
//!
//! ## Design: STATELESS FACADE
//!
//! [`PathStore`] lets callers address values by arbitrary byte strings
//! instead of integer keys. A path's substrate key is the XXH3-64 hash of
//! its bytes (reinterpreted as `i64`); the algorithm is fixed, so hashed
//! keys are stable across processes and restarts. Collisions land in one
//! bucket value that chains every colliding path with its payload.
//!
//! ## Batching
//!
//! Writes group tasks by bucket, load each bucket once, apply tasks in
//! input order and flush changed buckets in one write; a bucket that
//! empties is deleted. Reads resolve payloads zero-copy out of the bucket
//! bytes already in the arena.
//!
//! `match_paths` walks the keyspace in hash order, so its result order is
//! (hash, in-bucket position); `previous` continues a paginated walk from
//! exactly after the last returned path.

mod bucket;
mod pattern;

pub use bucket::{Bucket, RecordAt};
pub use pattern::matches;

use lamina_core::{
    Arena, Bitmap, ByteRange, BytesColumn, CollectionId, Key, LaminaError, Limits, Located,
    Result, Strided, Substrate,
};
use std::collections::BTreeMap;
use tracing::debug;
use xxhash_rust::xxh3::xxh3_64;

/// Substrate keys fetched per scan page during a pattern walk
const SCAN_PAGE: u32 = 256;

/// Derive the substrate key of a path
///
/// XXH3-64 of the raw path bytes, reinterpreted as a signed key. The
/// function is part of the stored format: changing it orphans every
/// existing bucket.
pub fn path_key(path: &[u8]) -> Key {
    xxh3_64(path) as Key
}

// =============================================================================
// Batch descriptors
// =============================================================================

/// Batch descriptor for [`PathStore::write`]
#[derive(Debug, Clone)]
pub struct PathWriteBatch<'a> {
    /// Collection per task
    pub collections: Strided<'a, CollectionId>,
    /// Path per task
    pub paths: BytesColumn<'a>,
    /// Payload per task
    pub values: BytesColumn<'a>,
    /// Optional per-task presence; a cleared bit deletes the path
    pub presences: Option<&'a Bitmap>,
    /// Number of tasks
    pub len: usize,
}

impl<'a> PathWriteBatch<'a> {
    /// Batch over per-task slices
    pub fn new(collection: CollectionId, paths: &'a [&'a [u8]], values: &'a [&'a [u8]]) -> Self {
        Self {
            collections: Strided::repeated(collection),
            paths: BytesColumn::from_slices(paths),
            values: BytesColumn::from_slices(values),
            presences: None,
            len: paths.len(),
        }
    }

    /// Batch over pre-built columns (joined or separator-split buffers)
    pub fn from_columns(
        collection: CollectionId,
        paths: BytesColumn<'a>,
        values: BytesColumn<'a>,
        len: usize,
    ) -> Self {
        Self {
            collections: Strided::repeated(collection),
            paths,
            values,
            presences: None,
            len,
        }
    }

    /// Attach a presence bitmap; cleared bits delete their paths
    pub fn with_presences(mut self, presences: &'a Bitmap) -> Self {
        self.presences = Some(presences);
        self
    }
}

/// Batch descriptor for [`PathStore::read`]
#[derive(Debug, Clone)]
pub struct PathReadBatch<'a> {
    /// Collection per task
    pub collections: Strided<'a, CollectionId>,
    /// Path per task
    pub paths: BytesColumn<'a>,
    /// Number of tasks
    pub len: usize,
}

impl<'a> PathReadBatch<'a> {
    /// Batch over per-task slices
    pub fn new(collection: CollectionId, paths: &'a [&'a [u8]]) -> Self {
        Self {
            collections: Strided::repeated(collection),
            paths: BytesColumn::from_slices(paths),
            len: paths.len(),
        }
    }

    /// Batch over a pre-built column (joined or separator-split buffer)
    pub fn from_column(collection: CollectionId, paths: BytesColumn<'a>, len: usize) -> Self {
        Self {
            collections: Strided::repeated(collection),
            paths,
            len,
        }
    }
}

// =============================================================================
// Outputs
// =============================================================================

/// Result of a path read batch; payload bytes live in the call's arena
#[derive(Debug)]
pub struct PathReadOutput {
    /// One bit per task; 0 means the path is not stored
    pub presences: Bitmap,
    /// Per-task payload location within the arena
    pub ranges: Vec<ByteRange>,
}

impl PathReadOutput {
    /// Payload for task `i`, or `None` when the path is absent
    pub fn bytes<'a>(&self, i: usize, arena: &'a Arena) -> Option<&'a [u8]> {
        self.presences.get(i).then(|| arena.slice(self.ranges[i]))
    }
}

/// Result of a pattern walk; paths live in the call's arena
#[derive(Debug, Default)]
pub struct MatchedPaths {
    /// Matched paths in (hash, in-bucket position) order
    pub paths: Vec<ByteRange>,
}

impl MatchedPaths {
    /// Matched path `i`
    pub fn path<'a>(&self, i: usize, arena: &'a Arena) -> &'a [u8] {
        arena.slice(self.paths[i])
    }

    /// Number of matches returned
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Whether the walk matched nothing
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

// =============================================================================
// PathStore
// =============================================================================

/// Paths overlay over any substrate
#[derive(Debug)]
pub struct PathStore<'s, S: Substrate + ?Sized> {
    substrate: &'s S,
    limits: Limits,
}

impl<'s, S: Substrate + ?Sized> PathStore<'s, S> {
    /// Facade over `substrate` with default limits
    pub fn new(substrate: &'s S) -> Self {
        Self {
            substrate,
            limits: Limits::DEFAULT,
        }
    }

    /// Facade with explicit limits
    pub fn with_limits(substrate: &'s S, limits: Limits) -> Self {
        Self { substrate, limits }
    }

    /// Write (or delete) a batch of path-addressed values
    ///
    /// Tasks in one batch apply in input order, so a later task observes
    /// an earlier one even inside a shared bucket.
    pub fn write(&self, batch: &PathWriteBatch<'_>, arena: &mut Arena) -> Result<()> {
        check_column_len("collections", batch.collections.backing_len(), batch.len)?;
        if let Some(presences) = batch.presences {
            check_column_len("presences", Some(presences.len()), batch.len)?;
        }
        if batch.len == 0 {
            return Ok(());
        }
        let paths = self.resolve_paths(&batch.paths, &batch.collections, batch.len)?;

        let mut unique: Vec<Located> = paths.iter().map(|(t, _)| *t).collect();
        unique.sort_unstable();
        unique.dedup();
        let read = self.substrate.read(&unique, arena)?;
        let mut buckets: BTreeMap<Located, (Bucket, bool)> = BTreeMap::new();
        for (i, target) in unique.iter().enumerate() {
            let decoded = match read.bytes(i, arena) {
                Some(bytes) => Bucket::decode(bytes)?,
                None => Bucket::new(),
            };
            buckets.insert(*target, (decoded, false));
        }

        for (i, (target, path)) in paths.iter().enumerate() {
            let Some((bucket, dirty)) = buckets.get_mut(target) else {
                continue; // every task's bucket was loaded above
            };
            let deleted = batch.presences.map(|p| !p.get(i)).unwrap_or(false);
            if deleted {
                if bucket.remove(path) {
                    *dirty = true;
                }
                continue;
            }
            let payload = batch.values.get(i).ok_or_else(|| {
                LaminaError::invalid_argument(format!("task {i} has no value column cell"))
            })?;
            bucket.upsert(path, payload);
            if bucket.len() > self.limits.max_bucket_entries {
                return Err(LaminaError::invalid_argument(format!(
                    "bucket at {target} exceeds {} entries",
                    self.limits.max_bucket_entries
                )));
            }
            *dirty = true;
        }

        let mut targets = Vec::new();
        let mut encodings: Vec<Option<Vec<u8>>> = Vec::new();
        for (target, (bucket, dirty)) in &buckets {
            if !*dirty {
                continue;
            }
            targets.push(*target);
            if bucket.is_empty() {
                encodings.push(None); // last path left; drop the bucket
            } else {
                encodings.push(Some(bucket.encode()));
            }
        }
        debug!(tasks = batch.len, buckets = targets.len(), "path write");
        let values: Vec<Option<&[u8]>> = encodings.iter().map(|e| e.as_deref()).collect();
        self.substrate.write(&targets, &values)
    }

    /// Read a batch of path-addressed values
    ///
    /// A collision chain is invisible here: each task sees exactly the
    /// entry whose full path equals its own, and a path absent from its
    /// bucket is indistinguishable from an empty bucket.
    pub fn read(&self, batch: &PathReadBatch<'_>, arena: &mut Arena) -> Result<PathReadOutput> {
        check_column_len("collections", batch.collections.backing_len(), batch.len)?;
        if batch.len == 0 {
            return Ok(PathReadOutput {
                presences: Bitmap::zeroed(0),
                ranges: Vec::new(),
            });
        }
        let paths = self.resolve_paths(&batch.paths, &batch.collections, batch.len)?;

        let mut unique: Vec<Located> = paths.iter().map(|(t, _)| *t).collect();
        unique.sort_unstable();
        unique.dedup();
        let read = self.substrate.read(&unique, arena)?;

        let mut presences = Bitmap::zeroed(batch.len);
        let mut ranges = vec![ByteRange::EMPTY; batch.len];
        for (i, (target, path)) in paths.iter().enumerate() {
            let at = unique.binary_search(target).unwrap_or(usize::MAX);
            if !read.presences.get(at) {
                continue;
            }
            let bucket_range = read.ranges[at];
            let raw = arena.slice(bucket_range);
            if let Some((off, len)) = bucket::find_payload(raw, path)? {
                presences.set(i, true);
                ranges[i] = ByteRange {
                    offset: bucket_range.offset + off as u32,
                    len: len as u32,
                };
            }
        }
        Ok(PathReadOutput { presences, ranges })
    }

    /// Walk the keyspace returning up to `limit` paths matching `pattern`
    ///
    /// `previous` resumes a paginated walk: the returned sequence starts
    /// right after that path's position. Result order is (hash,
    /// in-bucket position), which is also the pagination order. If
    /// `previous` was deleted between pages, its bucket is re-walked in
    /// full, so a page boundary may repeat entries but never loses one.
    pub fn match_paths(
        &self,
        collection: CollectionId,
        pattern: &[u8],
        previous: Option<&[u8]>,
        limit: u32,
        arena: &mut Arena,
    ) -> Result<MatchedPaths> {
        let mut matched = MatchedPaths::default();
        if limit == 0 {
            return Ok(matched);
        }

        // The walk starts at the resume path's bucket. Within the first
        // visited bucket, records up to and including that path were
        // returned on the previous page and are skipped. If the path was
        // deleted between pages its position is unknowable, so the bucket
        // is walked in full: a repeated entry is recoverable by the
        // caller, a silently dropped one is not.
        let mut pending_resume = previous;
        let mut start = previous.map(path_key).unwrap_or(Key::MIN);
        loop {
            let keys = self.substrate.scan(collection, start, SCAN_PAGE)?;
            if keys.is_empty() {
                return Ok(matched);
            }
            let targets: Vec<Located> = keys
                .iter()
                .map(|key| Located::new(collection, *key))
                .collect();
            let read = self.substrate.read(&targets, arena)?;

            for i in 0..keys.len() {
                let Some(raw) = read.bytes(i, arena) else {
                    continue; // deleted between scan and read
                };
                let bucket_range = read.ranges[i];
                let records = bucket::record_ranges(raw)?;
                // Only the first visited bucket can hold the resume path.
                let mut skip_through = None;
                if let Some(prev) = pending_resume.take() {
                    skip_through = records
                        .iter()
                        .position(|r| &raw[r.path_offset..r.path_offset + r.path_len] == prev);
                }
                for (at, record) in records.iter().enumerate() {
                    if skip_through.is_some_and(|through| at <= through) {
                        continue;
                    }
                    let path = &raw[record.path_offset..record.path_offset + record.path_len];
                    if pattern::matches(pattern, path) {
                        matched.paths.push(ByteRange {
                            offset: bucket_range.offset + record.path_offset as u32,
                            len: record.path_len as u32,
                        });
                        if matched.paths.len() as u32 == limit {
                            return Ok(matched);
                        }
                    }
                }
            }

            let last = *keys.last().unwrap_or(&Key::MAX);
            if (keys.len() as u32) < SCAN_PAGE || last == Key::MAX {
                return Ok(matched);
            }
            start = last + 1;
        }
    }

    /// Hash every task's path into its bucket address
    #[allow(clippy::type_complexity)]
    fn resolve_paths<'b>(
        &self,
        paths: &BytesColumn<'b>,
        collections: &Strided<'_, CollectionId>,
        len: usize,
    ) -> Result<Vec<(Located, &'b [u8])>> {
        let mut resolved = Vec::with_capacity(len);
        for i in 0..len {
            let path = paths.get(i).ok_or_else(|| {
                LaminaError::invalid_argument(format!("task {i} has no path column cell"))
            })?;
            if path.len() > self.limits.max_path_bytes {
                return Err(LaminaError::invalid_argument(format!(
                    "task {i} path of {} bytes exceeds limit {}",
                    path.len(),
                    self.limits.max_path_bytes
                )));
            }
            resolved.push((Located::new(collections.get(i), path_key(path)), path));
        }
        Ok(resolved)
    }
}

fn check_column_len(name: &str, backing: Option<usize>, len: usize) -> Result<()> {
    match backing {
        Some(have) if have < len => Err(LaminaError::invalid_argument(format!(
            "{name} column has {have} entries for {len} tasks"
        ))),
        _ => Ok(()),
    }
}
