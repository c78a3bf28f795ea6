//! In-memory reference substrate
//!
//! A `BTreeMap`-backed implementation of the substrate contract, with
//! optimistic transactions. It exists so the overlay can be tested and
//! benched without a storage engine; production backends implement the
//! same traits out of tree.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod mem;

pub use mem::{MemSubstrate, MemTransaction};
