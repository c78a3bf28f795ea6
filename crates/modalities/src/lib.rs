//! The three lamina overlays
//!
//! Each modality is a stateless facade over any [`lamina_core::Substrate`]:
//! it borrows the backend, translates batch descriptors into coalesced
//! substrate operations, and materializes outputs into the caller's arena.
//! Modalities never call each other.
//!
//! - [`docs`]: per-key structured values with wire-format translation,
//!   field addressing, schema discovery and columnar extraction
//! - [`graph`]: directed multigraph with symmetric adjacency storage
//! - [`paths`]: string-addressable values via hashed keys and collision
//!   buckets

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod docs;
pub mod graph;
pub mod paths;

pub use docs::DocStore;
pub use graph::GraphStore;
pub use paths::PathStore;
