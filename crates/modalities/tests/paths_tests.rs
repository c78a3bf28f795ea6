//! Behavior tests for the paths modality
//!
//! Round-trips, separator-packed inputs, deletion compaction, pattern
//! walks with pagination, and collision chains. Collisions are forced by
//! a substrate wrapper that collapses every hashed key onto one bucket,
//! which makes every path collide without hunting for real hash twins.

use lamina_core::{
    Arena, Bitmap, BytesColumn, CollectionId, Key, Located, ReadBatch, Result, Substrate,
};
use lamina_modalities::paths::{PathReadBatch, PathStore, PathWriteBatch};
use lamina_storage::MemSubstrate;
use std::collections::BTreeSet;

const COL: CollectionId = CollectionId::MAIN;

// ============================================================================
// Test Helpers
// ============================================================================

fn setup() -> (MemSubstrate, Arena) {
    (MemSubstrate::new(), Arena::new())
}

fn write_pairs(store: &PathStore<'_, impl Substrate>, arena: &mut Arena, pairs: &[(&str, &str)]) {
    let paths: Vec<&[u8]> = pairs.iter().map(|(p, _)| p.as_bytes()).collect();
    let values: Vec<&[u8]> = pairs.iter().map(|(_, v)| v.as_bytes()).collect();
    store
        .write(&PathWriteBatch::new(COL, &paths, &values), arena)
        .unwrap();
}

fn read_one(
    store: &PathStore<'_, impl Substrate>,
    arena: &mut Arena,
    path: &str,
) -> Option<Vec<u8>> {
    let paths: [&[u8]; 1] = [path.as_bytes()];
    let out = store
        .read(&PathReadBatch::new(COL, &paths), arena)
        .unwrap();
    out.bytes(0, arena).map(<[u8]>::to_vec)
}

/// Substrate wrapper that collapses every key to 0: all paths collide
struct CollidingSubstrate {
    inner: MemSubstrate,
}

impl CollidingSubstrate {
    fn new() -> Self {
        Self {
            inner: MemSubstrate::new(),
        }
    }

    fn collapse(targets: &[Located]) -> Vec<Located> {
        targets
            .iter()
            .map(|t| Located::new(t.collection, 0))
            .collect()
    }
}

impl Substrate for CollidingSubstrate {
    fn read(&self, targets: &[Located], arena: &mut Arena) -> Result<ReadBatch> {
        self.inner.read(&Self::collapse(targets), arena)
    }

    fn write(&self, targets: &[Located], values: &[Option<&[u8]>]) -> Result<()> {
        self.inner.write(&Self::collapse(targets), values)
    }

    fn scan(&self, collection: CollectionId, _start: Key, limit: u32) -> Result<Vec<Key>> {
        // Hashed resume keys are meaningless once collapsed; always walk
        // from the beginning of the (single-bucket) keyspace.
        self.inner.scan(collection, Key::MIN, limit)
    }
}

// ============================================================================
// Round-trips
// ============================================================================

/// What goes in under a path comes back out under that path
#[test]
fn test_round_trip() {
    let (substrate, mut arena) = setup();
    let paths = PathStore::new(&substrate);

    write_pairs(
        &paths,
        &mut arena,
        &[("user/1", "alice"), ("user/2", "bob"), ("", "root value")],
    );

    assert_eq!(read_one(&paths, &mut arena, "user/1"), Some(b"alice".to_vec()));
    assert_eq!(read_one(&paths, &mut arena, "user/2"), Some(b"bob".to_vec()));
    assert_eq!(read_one(&paths, &mut arena, ""), Some(b"root value".to_vec()));
    assert_eq!(read_one(&paths, &mut arena, "user/3"), None);
}

/// Rewriting a path replaces its payload in place
#[test]
fn test_rewrite_replaces() {
    let (substrate, mut arena) = setup();
    let paths = PathStore::new(&substrate);

    write_pairs(&paths, &mut arena, &[("p", "v1")]);
    write_pairs(&paths, &mut arena, &[("p", "v2")]);
    assert_eq!(read_one(&paths, &mut arena, "p"), Some(b"v2".to_vec()));
    assert_eq!(substrate.len(), 1, "still one bucket");
}

/// Concatenated inputs split on a caller-chosen separator byte
#[test]
fn test_separator_packed_columns() {
    let (substrate, mut arena) = setup();
    let paths = PathStore::new(&substrate);

    let batch = PathWriteBatch::from_columns(
        COL,
        BytesColumn::separated(b"alpha,beta,gamma", b','),
        BytesColumn::separated(b"1\02\03", 0),
        3,
    );
    paths.write(&batch, &mut arena).unwrap();

    let read = PathReadBatch::from_column(COL, BytesColumn::separated(b"beta,gamma", b','), 2);
    let out = paths.read(&read, &mut arena).unwrap();
    assert_eq!(out.bytes(0, &arena), Some(&b"2"[..]));
    assert_eq!(out.bytes(1, &arena), Some(&b"3"[..]));
}

/// An empty payload is a present value, not an absence
#[test]
fn test_empty_payload_is_present() {
    let (substrate, mut arena) = setup();
    let paths = PathStore::new(&substrate);
    write_pairs(&paths, &mut arena, &[("empty", "")]);

    let got = read_one(&paths, &mut arena, "empty");
    assert_eq!(got, Some(Vec::new()));
}

// ============================================================================
// Collision chains
// ============================================================================

/// Colliding paths stay individually addressable through one bucket
#[test]
fn test_collision_chain() {
    let substrate = CollidingSubstrate::new();
    let mut arena = Arena::new();
    let paths = PathStore::new(&substrate);

    write_pairs(&paths, &mut arena, &[("first", "V1"), ("second", "V2")]);
    assert_eq!(substrate.inner.len(), 1, "everything shares one bucket");

    assert_eq!(read_one(&paths, &mut arena, "first"), Some(b"V1".to_vec()));
    assert_eq!(read_one(&paths, &mut arena, "second"), Some(b"V2".to_vec()));

    // Delete one entry; its neighbor is untouched.
    let presences = Bitmap::zeroed(1);
    let doomed: [&[u8]; 1] = [b"first"];
    let values: [&[u8]; 1] = [b""];
    let batch = PathWriteBatch::new(COL, &doomed, &values).with_presences(&presences);
    paths.write(&batch, &mut arena).unwrap();

    assert_eq!(read_one(&paths, &mut arena, "first"), None);
    assert_eq!(read_one(&paths, &mut arena, "second"), Some(b"V2".to_vec()));

    // Removing the last entry deletes the bucket itself.
    let doomed: [&[u8]; 1] = [b"second"];
    let batch = PathWriteBatch::new(COL, &doomed, &values).with_presences(&presences);
    paths.write(&batch, &mut arena).unwrap();
    assert!(substrate.inner.is_empty(), "empty bucket is deleted");
}

// ============================================================================
// Pattern walks
// ============================================================================

fn sample_tree(paths: &PathStore<'_, impl Substrate>, arena: &mut Arena) {
    write_pairs(
        paths,
        arena,
        &[
            ("user/1/name", "a"),
            ("user/2/name", "b"),
            ("user/1/email", "c"),
            ("admin/1", "d"),
            ("usurper", "e"),
        ],
    );
}

/// `*` and `?` wildcards filter the walked keyspace
#[test]
fn test_match_wildcards() {
    let (substrate, mut arena) = setup();
    let paths = PathStore::new(&substrate);
    sample_tree(&paths, &mut arena);

    let matched = paths
        .match_paths(COL, b"user/*", None, 100, &mut arena)
        .unwrap();
    let got: BTreeSet<&[u8]> = (0..matched.len()).map(|i| matched.path(i, &arena)).collect();
    let expect: BTreeSet<&[u8]> = [
        &b"user/1/name"[..],
        &b"user/2/name"[..],
        &b"user/1/email"[..],
    ]
    .into();
    assert_eq!(got, expect);

    let matched = paths
        .match_paths(COL, b"user/?/name", None, 100, &mut arena)
        .unwrap();
    assert_eq!(matched.len(), 2);

    let matched = paths
        .match_paths(COL, b"*", None, 100, &mut arena)
        .unwrap();
    assert_eq!(matched.len(), 5, "star alone walks everything");
}

/// Pagination with `previous` covers the keyspace without duplicates
#[test]
fn test_match_pagination() {
    let (substrate, mut arena) = setup();
    let paths = PathStore::new(&substrate);
    sample_tree(&paths, &mut arena);

    let mut seen: Vec<Vec<u8>> = Vec::new();
    let mut previous: Option<Vec<u8>> = None;
    loop {
        let page = paths
            .match_paths(COL, b"*", previous.as_deref(), 2, &mut arena)
            .unwrap();
        if page.is_empty() {
            break;
        }
        assert!(page.len() <= 2, "limit bounds every page");
        for i in 0..page.len() {
            seen.push(page.path(i, &arena).to_vec());
        }
        previous = seen.last().cloned();
    }

    let distinct: BTreeSet<&[u8]> = seen.iter().map(Vec::as_slice).collect();
    assert_eq!(distinct.len(), seen.len(), "no duplicates across pages");
    assert_eq!(distinct.len(), 5, "every stored path shows up once");
}

/// Pagination continues correctly inside a collision bucket
#[test]
fn test_match_pagination_within_bucket() {
    let substrate = CollidingSubstrate::new();
    let mut arena = Arena::new();
    let paths = PathStore::new(&substrate);
    write_pairs(
        &paths,
        &mut arena,
        &[("aa", "1"), ("ab", "2"), ("ac", "3")],
    );

    let first = paths
        .match_paths(COL, b"a?", None, 2, &mut arena)
        .unwrap();
    assert_eq!(first.len(), 2);
    let resume = first.path(1, &arena).to_vec();

    let rest = paths
        .match_paths(COL, b"a?", Some(&resume), 2, &mut arena)
        .unwrap();
    assert_eq!(rest.len(), 1, "third colliding entry arrives on page two");

    let mut all: BTreeSet<Vec<u8>> = (0..first.len())
        .map(|i| first.path(i, &arena).to_vec())
        .collect();
    all.insert(rest.path(0, &arena).to_vec());
    assert_eq!(all.len(), 3);
}

/// Deleting the boundary path between pages never drops undelivered entries
#[test]
fn test_match_pagination_survives_deleted_boundary() {
    let substrate = CollidingSubstrate::new();
    let mut arena = Arena::new();
    let paths = PathStore::new(&substrate);
    write_pairs(
        &paths,
        &mut arena,
        &[("aa", "1"), ("ab", "2"), ("ac", "3")],
    );

    let first = paths.match_paths(COL, b"a?", None, 1, &mut arena).unwrap();
    assert_eq!(first.len(), 1);
    let boundary = first.path(0, &arena).to_vec();
    assert_eq!(boundary, b"aa");

    // The boundary path disappears before the next page is requested.
    let presences = Bitmap::zeroed(1);
    let doomed: [&[u8]; 1] = [&boundary];
    let values: [&[u8]; 1] = [b""];
    let batch = PathWriteBatch::new(COL, &doomed, &values).with_presences(&presences);
    paths.write(&batch, &mut arena).unwrap();

    let rest = paths
        .match_paths(COL, b"a?", Some(&boundary), 10, &mut arena)
        .unwrap();
    let got: BTreeSet<&[u8]> = (0..rest.len()).map(|i| rest.path(i, &arena)).collect();
    let expect: BTreeSet<&[u8]> = [&b"ab"[..], &b"ac"[..]].into();
    assert_eq!(got, expect, "undelivered colliding entries must survive");
}

/// A zero limit returns nothing and walks nothing
#[test]
fn test_match_zero_limit() {
    let (substrate, mut arena) = setup();
    let paths = PathStore::new(&substrate);
    sample_tree(&paths, &mut arena);

    let matched = paths.match_paths(COL, b"*", None, 0, &mut arena).unwrap();
    assert!(matched.is_empty());
}
