//! Graph modality
//!
//! ## Design: STATELESS FACADE
//!
//! [`GraphStore`] presents a directed multigraph over the substrate's KV
//! namespace. Each vertex's adjacency list is the value stored at its
//! key; every edge is recorded symmetrically, as an outgoing entry at the
//! source and an incoming entry at the target, so `find_edges` by any
//! role is a single scan of one list.
//!
//! ## Batching
//!
//! A call deduplicates and sorts every endpoint it touches, loads each
//! list once, applies tasks in input order (which keeps overlapping
//! batches deterministic and repeated upserts idempotent), and issues one
//! merged write. Self-loops put both entries in the same list.

mod adjacency;

pub use adjacency::{AdjacencyEntry, AdjacencyList, ENTRY_BYTES};

use lamina_core::{
    Arena, CollectionId, Degree, EdgeId, Key, LaminaError, Located, Result, Strided, Substrate,
    VertexRole, ANY_EDGE_ID, DEGREE_MISSING,
};
use std::collections::BTreeMap;
use tracing::debug;

// =============================================================================
// Batch descriptors
// =============================================================================

/// Batch of edges, one `(source, target, edge_id)` per task
#[derive(Debug, Clone)]
pub struct EdgeBatch<'a> {
    /// Collection per task; both endpoints of a task share it
    pub collections: Strided<'a, CollectionId>,
    /// Source vertex per task
    pub sources: Strided<'a, Key>,
    /// Target vertex per task
    pub targets: Strided<'a, Key>,
    /// Edge identity per task; the sentinel means "any edge"
    pub edge_ids: Strided<'a, EdgeId>,
    /// Number of tasks
    pub len: usize,
}

impl<'a> EdgeBatch<'a> {
    /// Batch with explicit edge identities
    pub fn new(
        collection: CollectionId,
        sources: &'a [Key],
        targets: &'a [Key],
        edge_ids: &'a [EdgeId],
    ) -> Self {
        Self {
            collections: Strided::repeated(collection),
            sources: Strided::from_slice(sources),
            targets: Strided::from_slice(targets),
            edge_ids: Strided::from_slice(edge_ids),
            len: sources.len(),
        }
    }

    /// Batch of identity-less edges (the any-edge sentinel throughout)
    pub fn anonymous(collection: CollectionId, sources: &'a [Key], targets: &'a [Key]) -> Self {
        Self {
            collections: Strided::repeated(collection),
            sources: Strided::from_slice(sources),
            targets: Strided::from_slice(targets),
            edge_ids: Strided::repeated(ANY_EDGE_ID),
            len: sources.len(),
        }
    }
}

/// Batch of vertices with per-task role filters
#[derive(Debug, Clone)]
pub struct VertexBatch<'a> {
    /// Collection per task
    pub collections: Strided<'a, CollectionId>,
    /// Vertex per task
    pub vertices: Strided<'a, Key>,
    /// Role filter per task
    pub roles: Strided<'a, VertexRole>,
    /// Number of tasks
    pub len: usize,
}

impl<'a> VertexBatch<'a> {
    /// Batch over one collection with the `Any` role
    pub fn new(collection: CollectionId, vertices: &'a [Key]) -> Self {
        Self {
            collections: Strided::repeated(collection),
            vertices: Strided::from_slice(vertices),
            roles: Strided::repeated(VertexRole::Any),
            len: vertices.len(),
        }
    }

    /// Use one role (broadcast) for every task
    pub fn with_role(mut self, role: VertexRole) -> Self {
        self.roles = Strided::repeated(role);
        self
    }

    /// Use a role per task
    pub fn with_roles(mut self, roles: &'a [VertexRole]) -> Self {
        self.roles = Strided::from_slice(roles);
        self
    }
}

/// Result of [`GraphStore::find_edges`]
///
/// `degrees[i]` is the matched entry count of task `i`'s vertex, or the
/// missing sentinel when the vertex is not stored. `triples` concatenates
/// every task's matches in task order as `(queried vertex, neighbor,
/// edge id)`.
#[derive(Debug, Default)]
pub struct FoundEdges {
    /// Matched degree per task; `DEGREE_MISSING` marks absent vertices
    pub degrees: Vec<Degree>,
    /// Flat matches, `degrees[i]` entries per task
    pub triples: Vec<(Key, Key, EdgeId)>,
}

impl FoundEdges {
    /// Total matched edges across the batch (missing counts as zero)
    pub fn total(&self) -> usize {
        self.triples.len()
    }
}

// =============================================================================
// GraphStore
// =============================================================================

/// Per-vertex working state during one batch
#[derive(Debug, Default)]
struct Slot {
    list: AdjacencyList,
    present: bool,
    dirty: bool,
    removed: bool,
}

/// Graph overlay over any substrate
#[derive(Debug)]
pub struct GraphStore<'s, S: Substrate + ?Sized> {
    substrate: &'s S,
}

impl<'s, S: Substrate + ?Sized> GraphStore<'s, S> {
    /// Facade over `substrate`
    pub fn new(substrate: &'s S) -> Self {
        Self { substrate }
    }

    /// Ensure each vertex exists, with at least an empty adjacency list
    ///
    /// Existing vertices and their edges are left untouched.
    pub fn upsert_vertices(&self, batch: &VertexBatch<'_>, arena: &mut Arena) -> Result<()> {
        validate_vertices(batch)?;
        let targets = unique_targets(vertex_targets(batch));
        let read = self.substrate.read(&targets, arena)?;
        let mut created = Vec::new();
        for (i, target) in targets.iter().enumerate() {
            if !read.presences.get(i) {
                created.push(*target);
            }
        }
        let empty: &[u8] = &[];
        let values: Vec<Option<&[u8]>> = created.iter().map(|_| Some(empty)).collect();
        self.substrate.write(&created, &values)
    }

    /// Insert a batch of edges, symmetrically and idempotently
    ///
    /// Both endpoints of every edge end up mentioning it exactly once; a
    /// duplicate within the batch or against stored state is a no-op.
    pub fn upsert_edges(&self, batch: &EdgeBatch<'_>, arena: &mut Arena) -> Result<()> {
        validate_edges(batch)?;
        let mut slots = self.load_slots(unique_targets(edge_targets(batch)), arena)?;

        for i in 0..batch.len {
            let collection = batch.collections.get(i);
            let source = Located::new(collection, batch.sources.get(i));
            let target = Located::new(collection, batch.targets.get(i));
            let edge_id = batch.edge_ids.get(i);

            let out = AdjacencyEntry {
                neighbor: target.key,
                edge_id,
                outgoing: true,
            };
            touch(&mut slots, source, out);
            let inc = AdjacencyEntry {
                neighbor: source.key,
                edge_id,
                outgoing: false,
            };
            touch(&mut slots, target, inc);
        }
        self.flush(slots)
    }

    /// Remove a batch of edges from both endpoints
    ///
    /// The any-edge sentinel removes every parallel edge between a pair;
    /// edges that are not stored are silently ignored.
    pub fn remove_edges(&self, batch: &EdgeBatch<'_>, arena: &mut Arena) -> Result<()> {
        validate_edges(batch)?;
        let mut slots = self.load_slots(unique_targets(edge_targets(batch)), arena)?;

        for i in 0..batch.len {
            let collection = batch.collections.get(i);
            let source = Located::new(collection, batch.sources.get(i));
            let target = Located::new(collection, batch.targets.get(i));
            let edge_id = match batch.edge_ids.get(i) {
                ANY_EDGE_ID => None,
                id => Some(id),
            };

            if let Some(slot) = slots.get_mut(&source) {
                if slot.list.remove(target.key, edge_id, true) > 0 {
                    slot.dirty = true;
                }
            }
            if let Some(slot) = slots.get_mut(&target) {
                if slot.list.remove(source.key, edge_id, false) > 0 {
                    slot.dirty = true;
                }
            }
        }
        self.flush(slots)
    }

    /// Remove vertices and clean their edges out of neighbors' lists
    ///
    /// The role selects which incident edges get their mirror entry
    /// deleted from the other endpoint (`Any` cleans everything); the
    /// vertex itself is always deleted.
    pub fn remove_vertices(&self, batch: &VertexBatch<'_>, arena: &mut Arena) -> Result<()> {
        validate_vertices(batch)?;
        let mut slots = self.load_slots(unique_targets(vertex_targets(batch)), arena)?;

        // Neighbors referenced by matching entries need their lists too.
        let mut mirrors = Vec::new();
        for i in 0..batch.len {
            let target = Located::new(batch.collections.get(i), batch.vertices.get(i));
            let role = batch.roles.get(i);
            if let Some(slot) = slots.get(&target) {
                for entry in slot.list.entries() {
                    if role.matches(entry.outgoing) {
                        let mirror = Located::new(target.collection, entry.neighbor);
                        if !slots.contains_key(&mirror) {
                            mirrors.push(mirror);
                        }
                    }
                }
            }
        }
        let extra = self.load_slots(unique_targets(mirrors), arena)?;
        slots.extend(extra);

        for i in 0..batch.len {
            let target = Located::new(batch.collections.get(i), batch.vertices.get(i));
            let role = batch.roles.get(i);
            let entries: Vec<AdjacencyEntry> = match slots.get(&target) {
                Some(slot) if slot.present => slot.list.entries().to_vec(),
                _ => continue, // never stored, nothing to wipe
            };
            for entry in entries {
                if !role.matches(entry.outgoing) {
                    continue;
                }
                let mirror = Located::new(target.collection, entry.neighbor);
                if let Some(neighbor) = slots.get_mut(&mirror) {
                    if neighbor
                        .list
                        .remove(target.key, Some(entry.edge_id), !entry.outgoing)
                        > 0
                    {
                        neighbor.dirty = true;
                    }
                }
            }
            if let Some(slot) = slots.get_mut(&target) {
                slot.removed = true;
            }
        }
        self.flush(slots)
    }

    /// Expand each vertex into its incident edges, filtered by role
    ///
    /// Triples are oriented `(queried vertex, neighbor, edge id)`; a
    /// vertex that is not stored reports the missing-degree sentinel.
    pub fn find_edges(&self, batch: &VertexBatch<'_>, arena: &mut Arena) -> Result<FoundEdges> {
        validate_vertices(batch)?;
        let targets = unique_targets(vertex_targets(batch));
        let read = self.substrate.read(&targets, arena)?;
        let mut lists: BTreeMap<Located, Option<AdjacencyList>> = BTreeMap::new();
        for (i, target) in targets.iter().enumerate() {
            let list = match read.bytes(i, arena) {
                Some(bytes) => Some(AdjacencyList::decode(bytes)?),
                None => None,
            };
            lists.insert(*target, list);
        }

        let mut found = FoundEdges::default();
        for i in 0..batch.len {
            let target = Located::new(batch.collections.get(i), batch.vertices.get(i));
            let role = batch.roles.get(i);
            match lists.get(&target).and_then(Option::as_ref) {
                None => found.degrees.push(DEGREE_MISSING),
                Some(list) => {
                    let mut degree: Degree = 0;
                    for entry in list.entries() {
                        if role.matches(entry.outgoing) {
                            degree += 1;
                            found.triples.push((target.key, entry.neighbor, entry.edge_id));
                        }
                    }
                    found.degrees.push(degree);
                }
            }
        }
        Ok(found)
    }

    /// Load decoded lists for a sorted set of distinct vertices
    fn load_slots(
        &self,
        targets: Vec<Located>,
        arena: &mut Arena,
    ) -> Result<BTreeMap<Located, Slot>> {
        let read = self.substrate.read(&targets, arena)?;
        let mut slots = BTreeMap::new();
        for (i, target) in targets.iter().enumerate() {
            let slot = match read.bytes(i, arena) {
                Some(bytes) => Slot {
                    list: AdjacencyList::decode(bytes)?,
                    present: true,
                    ..Slot::default()
                },
                None => Slot::default(),
            };
            slots.insert(*target, slot);
        }
        Ok(slots)
    }

    /// Write every changed list back; removals become deletes
    fn flush(&self, slots: BTreeMap<Located, Slot>) -> Result<()> {
        let mut targets = Vec::new();
        let mut encodings: Vec<Option<Vec<u8>>> = Vec::new();
        for (target, slot) in &slots {
            if slot.removed {
                targets.push(*target);
                encodings.push(None);
            } else if slot.dirty {
                targets.push(*target);
                encodings.push(Some(slot.list.encode()));
            }
        }
        if targets.is_empty() {
            return Ok(());
        }
        debug!(writes = targets.len(), "flushing adjacency updates");
        let values: Vec<Option<&[u8]>> = encodings.iter().map(|e| e.as_deref()).collect();
        self.substrate.write(&targets, &values)
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn touch(slots: &mut BTreeMap<Located, Slot>, at: Located, entry: AdjacencyEntry) {
    let slot = slots.entry(at).or_default();
    if slot.list.insert(entry) {
        slot.dirty = true;
    }
}

fn vertex_targets(batch: &VertexBatch<'_>) -> Vec<Located> {
    (0..batch.len)
        .map(|i| Located::new(batch.collections.get(i), batch.vertices.get(i)))
        .collect()
}

fn edge_targets(batch: &EdgeBatch<'_>) -> Vec<Located> {
    // Source endpoints first, then targets, before the sort-and-dedupe.
    (0..batch.len)
        .map(|i| Located::new(batch.collections.get(i), batch.sources.get(i)))
        .chain((0..batch.len).map(|i| Located::new(batch.collections.get(i), batch.targets.get(i))))
        .collect()
}

fn unique_targets(mut targets: Vec<Located>) -> Vec<Located> {
    targets.sort_unstable();
    targets.dedup();
    targets
}

fn validate_edges(batch: &EdgeBatch<'_>) -> Result<()> {
    check_len("collections", batch.collections.backing_len(), batch.len)?;
    check_len("sources", batch.sources.backing_len(), batch.len)?;
    check_len("targets", batch.targets.backing_len(), batch.len)?;
    check_len("edge_ids", batch.edge_ids.backing_len(), batch.len)
}

fn validate_vertices(batch: &VertexBatch<'_>) -> Result<()> {
    check_len("collections", batch.collections.backing_len(), batch.len)?;
    check_len("vertices", batch.vertices.backing_len(), batch.len)?;
    check_len("roles", batch.roles.backing_len(), batch.len)
}

fn check_len(name: &str, backing: Option<usize>, len: usize) -> Result<()> {
    match backing {
        Some(have) if have < len => Err(LaminaError::invalid_argument(format!(
            "{name} column has {have} entries for {len} tasks"
        ))),
        _ => Ok(()),
    }
}
