//! Error types for the ledger and its stores.

use spool_common::Digest;
use spool_timber::TimberError;
use thiserror::Error;

/// Failures of a [`crate::store::CommitmentStore`] backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("record encoding error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("store lock poisoned")]
    Poisoned,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("no usable records for this request")]
    NoUsableRecords,

    #[error("usable records cannot cover target {target}")]
    Insufficient { target: u128 },

    #[error("record {0} already exists with different content")]
    DuplicateRecord(Digest),

    #[error("unknown record {0}")]
    UnknownRecord(Digest),

    #[error("record {0} cannot be reserved")]
    NotReservable(Digest),

    #[error("batch {got} arrived after batch {last}")]
    OutOfOrderBatch { last: u64, got: u64 },

    #[error("{0} lock poisoned")]
    LockPoisoned(&'static str),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Tree(#[from] TimberError),
}

pub type Result<T> = std::result::Result<T, LedgerError>;
