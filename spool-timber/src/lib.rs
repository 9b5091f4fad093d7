//! spool-timber
//!
//! Sparse append-only Merkle accumulator mirroring the on-chain commitment
//! tree of the shielded pool.
//!
//! - [`Timber::append`] / [`Timber::append_all`] add leaves at the next free
//!   index.
//! - [`Timber::merkle_path`] extracts a leaf-to-root sibling path and
//!   [`verify_merkle_path`] checks one without touching any tree.
//! - [`Timber::frontier`] exposes the hashes needed to keep appending, and
//!   [`Timber::from_frontier`] resumes from them.
//! - [`Timber::rollback`] truncates to an earlier leaf count after a reorg.
//!
//! All-zero subtrees are never materialized, so memory follows the number of
//! inserted leaves rather than the `2^H` capacity.

mod arena;
pub mod error;
pub mod path;
mod resume;
pub mod tree;

pub use error::{Result, TimberError};
pub use path::{verify_merkle_path, Direction, MerklePath, PathStep};
pub use tree::{frontier_len, Timber, TreeState, DEFAULT_TREE_HEIGHT, MAX_TREE_HEIGHT};
