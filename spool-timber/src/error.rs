use thiserror::Error;

/// Accumulator failures. Every failing call leaves the tree untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimberError {
    #[error("tree is full: capacity {capacity}, leaf count {leaf_count}, requested {requested}")]
    CapacityExceeded {
        capacity: u64,
        leaf_count: u64,
        requested: u64,
    },

    #[error("leaf index {index} out of range (leaf count {leaf_count})")]
    IndexOutOfRange { index: u64, leaf_count: u64 },

    #[error("cannot roll back to {target} leaves (leaf count {leaf_count})")]
    InvalidRollback { target: u64, leaf_count: u64 },

    #[error("unsupported tree height {0}, expected 1..=63")]
    InvalidHeight(u8),

    #[error("invalid frontier: {0}")]
    InvalidFrontier(String),

    #[error("leaf {index} lies below the resume point {resumed_at}")]
    PrunedLeaf { index: u64, resumed_at: u64 },
}

pub type Result<T> = std::result::Result<T, TimberError>;
