use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

use sled::{Db, IVec, Tree};
use spool_common::Digest;
use tracing::debug;

use super::{CommitmentStore, InsertOutcome, StoreResult};
use crate::patch::RecordPatch;
use crate::record::CommitmentRecord;

const COMMITMENTS_TREE: &str = "commitments";

const OPEN_ATTEMPTS: u32 = 40;
const OPEN_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Records persisted in a sled tree as JSON, keyed by commitment hash.
///
/// Updates run as compare-and-swap loops, which keeps each one atomic per
/// key without a process-wide lock.
#[derive(Clone)]
pub struct SledStore {
    db: Db,
    records: Tree,
}

impl SledStore {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(sled::Error::Io)?;
            }
        }
        let config = sled::Config::new().path(path);
        let mut attempt = 1;
        let db = loop {
            match config.open() {
                Ok(db) => break db,
                // The file lock of a closed handle is held until sled's
                // flusher thread exits.
                Err(sled::Error::Io(err)) if attempt < OPEN_ATTEMPTS => {
                    debug!(
                        "Store at {} not available yet ({}), retrying",
                        path.display(),
                        err
                    );
                    attempt += 1;
                    thread::sleep(OPEN_RETRY_DELAY);
                }
                Err(err) => return Err(err.into()),
            }
        };
        debug!("Opened commitment store at {}", path.display());
        Self::from_db(db)
    }

    /// Throwaway database, removed on drop.
    pub fn temporary() -> StoreResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> StoreResult<Self> {
        let records = db.open_tree(COMMITMENTS_TREE)?;
        Ok(Self { db, records })
    }

    pub fn flush(&self) -> StoreResult<()> {
        self.db.flush()?;
        Ok(())
    }

    fn decode(bytes: &IVec) -> StoreResult<CommitmentRecord> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl CommitmentStore for SledStore {
    fn insert(&self, record: &CommitmentRecord) -> StoreResult<InsertOutcome> {
        let encoded = serde_json::to_vec(record)?;
        match self
            .records
            .compare_and_swap(record.hash, None as Option<&[u8]>, Some(encoded))?
        {
            Ok(()) => Ok(InsertOutcome::Inserted),
            Err(conflict) => match conflict.current {
                Some(current) => Ok(InsertOutcome::Existing(Self::decode(&current)?)),
                // Lost a race with a delete; the key is free again.
                None => self.insert(record),
            },
        }
    }

    fn get(&self, hash: &Digest) -> StoreResult<Option<CommitmentRecord>> {
        self.records
            .get(hash)?
            .map(|bytes| Self::decode(&bytes))
            .transpose()
    }

    fn update_fields(&self, hash: &Digest, patch: &RecordPatch) -> StoreResult<bool> {
        loop {
            let Some(current) = self.records.get(hash)? else {
                return Ok(false);
            };
            let mut record = Self::decode(&current)?;
            if !patch.apply(&mut record) {
                return Ok(false);
            }
            let next = serde_json::to_vec(&record)?;
            if self
                .records
                .compare_and_swap(hash, Some(&current), Some(next))?
                .is_ok()
            {
                return Ok(true);
            }
        }
    }

    fn find_by(
        &self,
        predicate: &dyn Fn(&CommitmentRecord) -> bool,
    ) -> StoreResult<Vec<CommitmentRecord>> {
        let mut out = Vec::new();
        for entry in self.records.iter() {
            let (_, bytes) = entry?;
            let record = Self::decode(&bytes)?;
            if predicate(&record) {
                out.push(record);
            }
        }
        Ok(out)
    }

    fn delete_many(&self, predicate: &dyn Fn(&CommitmentRecord) -> bool) -> StoreResult<usize> {
        let mut deleted = 0;
        for entry in self.records.iter() {
            let (key, bytes) = entry?;
            if !predicate(&Self::decode(&bytes)?) {
                continue;
            }
            // Skip records that changed since they were read.
            if self
                .records
                .compare_and_swap(&key, Some(&bytes), None as Option<&[u8]>)?
                .is_ok()
            {
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{NewCommitment, Preimage};
    use crate::store::MemoryStore;

    fn record(n: u64) -> CommitmentRecord {
        NewCommitment {
            hash: Digest::from_u64(n),
            preimage: Preimage {
                owner: Digest::from_u64(1),
                asset: Digest::from_u64(2),
                sub_id: Digest::ZERO,
                amount: n as u128 * 10,
                salt: Digest::from_u64(n + 1000),
            },
            nullifier: Digest::from_u64(n + 500),
            is_deposited: n % 2 == 0,
            created_by: None,
        }
        .into_record()
    }

    fn exercise(store: &dyn CommitmentStore) {
        for n in 1..=4 {
            assert_eq!(store.insert(&record(n)).unwrap(), InsertOutcome::Inserted);
        }
        assert_eq!(
            store.insert(&record(2)).unwrap(),
            InsertOutcome::Existing(record(2))
        );

        assert!(store
            .update_fields(&Digest::from_u64(3), &RecordPatch::confirm(7, Digest::from_u64(70)))
            .unwrap());
        assert!(!store
            .update_fields(&Digest::from_u64(3), &RecordPatch::confirm(8, Digest::from_u64(80)))
            .unwrap());
        assert!(!store
            .update_fields(&Digest::from_u64(42), &RecordPatch::confirm(8, Digest::from_u64(80)))
            .unwrap());
        assert_eq!(
            store.get(&Digest::from_u64(3)).unwrap().unwrap().on_chain,
            Some(7)
        );

        let deposits = store.find_by(&|r| r.is_deposited).unwrap();
        let hashes: Vec<_> = deposits.iter().map(|r| r.hash).collect();
        assert_eq!(hashes, vec![Digest::from_u64(2), Digest::from_u64(4)]);

        assert_eq!(store.delete_many(&|r| !r.is_deposited).unwrap(), 2);
        assert!(store.get(&Digest::from_u64(1)).unwrap().is_none());
        assert_eq!(store.find_by(&|_| true).unwrap().len(), 2);
    }

    #[test]
    fn sled_store_contract() {
        exercise(&SledStore::temporary().unwrap());
    }

    #[test]
    fn memory_store_contract() {
        exercise(&MemoryStore::new());
    }

    #[test]
    fn sled_store_survives_reopen() {
        let dir = std::env::temp_dir().join(format!("spool-store-reopen-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);

        // Reopen straight after each close, while the previous handle's
        // flusher may still hold the lock.
        for n in 1..=3 {
            let store = SledStore::open(&dir).unwrap();
            store.insert(&record(n)).unwrap();
            store.flush().unwrap();
            drop(store);
        }

        let store = SledStore::open(&dir).unwrap();
        for n in 1..=3 {
            assert_eq!(store.get(&Digest::from_u64(n)).unwrap(), Some(record(n)));
        }
        drop(store);
        let _ = fs::remove_dir_all(&dir);
    }
}
