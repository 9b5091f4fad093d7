//! Keyed record storage.
//!
//! Two backends share one contract: every call is atomic for the key it
//! touches. [`MemoryStore`] is used by tests and short-lived tools,
//! [`SledStore`] persists records across restarts.

mod memory;
mod persistent;

pub use memory::MemoryStore;
pub use persistent::SledStore;

use spool_common::Digest;

use crate::error::StoreError;
use crate::patch::RecordPatch;
use crate::record::CommitmentRecord;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// Key already present; the stored record is returned untouched.
    Existing(CommitmentRecord),
}

pub trait CommitmentStore: Send + Sync {
    /// Insert unless the key is present.
    fn insert(&self, record: &CommitmentRecord) -> StoreResult<InsertOutcome>;

    fn get(&self, hash: &Digest) -> StoreResult<Option<CommitmentRecord>>;

    /// Apply `patch` to one record. `Ok(false)` when the key is missing,
    /// the guard rejects the record, or nothing changed.
    fn update_fields(&self, hash: &Digest, patch: &RecordPatch) -> StoreResult<bool>;

    /// Every record matching `predicate`, in key order.
    fn find_by(
        &self,
        predicate: &dyn Fn(&CommitmentRecord) -> bool,
    ) -> StoreResult<Vec<CommitmentRecord>>;

    /// Delete every record matching `predicate`, returning how many went.
    fn delete_many(&self, predicate: &dyn Fn(&CommitmentRecord) -> bool) -> StoreResult<usize>;
}
