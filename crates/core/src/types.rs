//! Substrate addressing and graph scalar types
//!
//! This module defines the types shared by every modality:
//! - Key: the substrate's native 64-bit address
//! - CollectionId: opaque namespace handle
//! - Located: fully-qualified substrate address (collection + key)
//! - VertexRole / Degree / EdgeId: graph scalars and their sentinels

use serde::{Deserialize, Serialize};
use std::fmt;

/// The substrate's native address: a 64-bit signed integer.
///
/// Keys are external to the overlay; the overlay never invents them except
/// in the paths modality, where a key is derived by hashing a path string.
pub type Key = i64;

/// Edge identifier within the graph modality.
pub type EdgeId = i64;

/// Sentinel edge id meaning "any edge between these endpoints".
///
/// Used on upsert when the caller does not care about edge identity, and on
/// removal to drop every parallel edge between a vertex pair.
pub const ANY_EDGE_ID: EdgeId = i64::MIN;

/// Per-vertex degree as reported by `find_edges`.
pub type Degree = u32;

/// Degree sentinel for a vertex that is not stored at all.
///
/// Distinct from degree 0, which means the vertex exists with an empty
/// adjacency list.
pub const DEGREE_MISSING: Degree = u32::MAX;

/// Opaque handle naming a namespace within the substrate
///
/// The overlay never interprets the handle; it only forwards it. Handles
/// are cheap to copy and safe to share across threads.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct CollectionId(pub u64);

impl CollectionId {
    /// The default (main) collection of a substrate.
    pub const MAIN: CollectionId = CollectionId(0);

    /// Raw handle value
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "col:{}", self.0)
    }
}

/// Fully-qualified substrate address
///
/// Ordered by (collection, key) so that a sorted batch of addresses walks
/// the substrate in scan order, letting backends coalesce adjacent lookups.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Located {
    /// Namespace handle
    pub collection: CollectionId,
    /// Key within the collection
    pub key: Key,
}

impl Located {
    /// Create an address
    pub fn new(collection: CollectionId, key: Key) -> Self {
        Self { collection, key }
    }
}

impl fmt::Display for Located {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.key)
    }
}

/// Which end(s) of its incident edges a vertex is queried or removed as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VertexRole {
    /// Outgoing edges only: the vertex is the source
    Source,
    /// Incoming edges only: the vertex is the target
    Target,
    /// Both directions
    Any,
}

impl VertexRole {
    /// Whether an adjacency entry stored as outgoing (`true`) or incoming
    /// (`false`) matches this role filter.
    pub fn matches(&self, outgoing: bool) -> bool {
        match self {
            VertexRole::Source => outgoing,
            VertexRole::Target => !outgoing,
            VertexRole::Any => true,
        }
    }
}

impl Default for VertexRole {
    fn default() -> Self {
        VertexRole::Any
    }
}
