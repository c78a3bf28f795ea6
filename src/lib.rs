//! # Lamina
//!
//! Three data models layered over one ordered key-value substrate:
//! documents, a property graph, and string-addressed paths.
//!
//! Lamina is an overlay, not a storage engine. Every modality translates
//! batch requests into coalesced reads and writes against any backend that
//! implements the [`Substrate`] trait, then post-processes the results into
//! arena-owned output buffers. The workspace ships an in-memory reference
//! substrate ([`MemSubstrate`]) used by the test suite and the benches;
//! production backends live out of tree.
//!
//! # Quick Start
//!
//! ```no_run
//! use lamina::{Arena, CollectionId, DocFormat, DocStore, MemSubstrate};
//! use lamina::docs::{DocReadBatch, DocWriteBatch};
//!
//! fn main() -> lamina::Result<()> {
//!     let store = MemSubstrate::new();
//!     let mut arena = Arena::new();
//!     let docs = DocStore::new(&store);
//!     let col = CollectionId::MAIN;
//!
//!     let batch = DocWriteBatch::upsert(col, &[7], br#"{"name":"Alice"}"#, DocFormat::Json);
//!     docs.write(&batch, &mut arena)?;
//!
//!     let read = DocReadBatch::whole(col, &[7], DocFormat::Json);
//!     let out = docs.read(&read, &mut arena)?;
//!     assert!(out.presences.get(0));
//!     Ok(())
//! }
//! ```
//!
//! # Modalities
//!
//! | Modality | Purpose | Entry points |
//! |----------|---------|--------------|
//! | **Documents** | structured values, any wire format | `write`, `read`, `gist`, `gather` |
//! | **Graph** | directed multigraph, symmetric edges | `upsert_edges`, `find_edges`, `remove_edges`, `remove_vertices` |
//! | **Paths** | string-addressed values | `write`, `read`, `match_paths` |
//!
//! Modalities never call each other; they share only the substrate and the
//! per-call [`Arena`] that owns all output buffers.

pub use lamina_core::{
    Arena, Bitmap, ByteRange, BytesColumn, CollectionId, Degree, DocFormat, EdgeId, ErrorKind,
    Key, LaminaError, Limits, Located, ReadBatch, Result, Strided, Substrate,
    SubstrateTransaction, VertexRole, ANY_EDGE_ID, DEGREE_MISSING,
};
pub use lamina_modalities::{docs, graph, paths};
pub use lamina_modalities::{DocStore, GraphStore, PathStore};
pub use lamina_storage::{MemSubstrate, MemTransaction};
