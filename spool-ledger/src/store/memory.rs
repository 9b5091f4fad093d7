use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use spool_common::Digest;

use super::{CommitmentStore, InsertOutcome, StoreResult};
use crate::error::StoreError;
use crate::patch::RecordPatch;
use crate::record::CommitmentRecord;

/// Records held in a mutex-guarded map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<Digest, CommitmentRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, BTreeMap<Digest, CommitmentRecord>>> {
        self.records.lock().map_err(|_| StoreError::Poisoned)
    }

    pub fn len(&self) -> StoreResult<usize> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.lock()?.is_empty())
    }
}

impl CommitmentStore for MemoryStore {
    fn insert(&self, record: &CommitmentRecord) -> StoreResult<InsertOutcome> {
        let mut records = self.lock()?;
        match records.entry(record.hash) {
            Entry::Occupied(existing) => Ok(InsertOutcome::Existing(existing.get().clone())),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(InsertOutcome::Inserted)
            }
        }
    }

    fn get(&self, hash: &Digest) -> StoreResult<Option<CommitmentRecord>> {
        Ok(self.lock()?.get(hash).cloned())
    }

    fn update_fields(&self, hash: &Digest, patch: &RecordPatch) -> StoreResult<bool> {
        let mut records = self.lock()?;
        Ok(records
            .get_mut(hash)
            .map(|record| patch.apply(record))
            .unwrap_or(false))
    }

    fn find_by(
        &self,
        predicate: &dyn Fn(&CommitmentRecord) -> bool,
    ) -> StoreResult<Vec<CommitmentRecord>> {
        Ok(self
            .lock()?
            .values()
            .filter(|record| predicate(record))
            .cloned()
            .collect())
    }

    fn delete_many(&self, predicate: &dyn Fn(&CommitmentRecord) -> bool) -> StoreResult<usize> {
        let mut records = self.lock()?;
        let before = records.len();
        records.retain(|_, record| !predicate(record));
        Ok(before - records.len())
    }
}
