//! Core types and traits for lamina
//!
//! This crate defines the foundation shared by every modality:
//! - Key / CollectionId / Located: substrate addressing
//! - Strided / BytesColumn / Bitmap: batch descriptor columns
//! - Arena: per-call bump region owning all output buffers
//! - DocFormat: tagged wire-format selector
//! - Substrate / SubstrateTransaction: the contract the overlay consumes
//! - LaminaError: unified error type

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod arena;
pub mod batch;
pub mod error;
pub mod format;
pub mod limits;
pub mod traits;
pub mod types;

pub use arena::{Arena, ByteRange};
pub use batch::{Bitmap, BytesColumn, Strided};
pub use error::{ErrorKind, LaminaError, Result};
pub use format::DocFormat;
pub use limits::Limits;
pub use traits::{ReadBatch, Substrate, SubstrateTransaction};
pub use types::{
    CollectionId, Degree, EdgeId, Key, Located, VertexRole, ANY_EDGE_ID, DEGREE_MISSING,
};
