//! Commitment ledger: lifecycle transitions over a [`CommitmentStore`].

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use spool_common::Digest;
use tracing::{debug, info, warn};

use crate::error::{LedgerError, Result};
use crate::patch::RecordPatch;
use crate::record::{CommitmentRecord, MembershipWitness, NewCommitment, SpendingTx};
use crate::store::{CommitmentStore, InsertOutcome, MemoryStore};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpsertOutcome {
    Inserted,
    /// Same content was already stored; nothing changed.
    AlreadyPresent,
}

/// Per `(asset, sub_id)` totals for one owner.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// Confirmed and free to select.
    pub spendable: u128,
    /// Not yet confirmed on chain.
    pub pending_deposit: u128,
    /// Reserved or spent locally, spend not yet confirmed.
    pub pending_spend: u128,
}

/// The set of commitments this client knows about.
///
/// Every state transition is a single guarded store update. Selection and
/// reservation additionally serialize on one ledger-wide mutex so that a
/// record is never handed to two spenders.
pub struct Ledger<S = MemoryStore> {
    store: S,
    selection: Mutex<()>,
}

impl Ledger<MemoryStore> {
    pub fn in_memory() -> Self {
        Self::new(MemoryStore::new())
    }
}

impl<S: CommitmentStore> Ledger<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            selection: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub(crate) fn lock_selection(&self) -> Result<MutexGuard<'_, ()>> {
        self.selection
            .lock()
            .map_err(|_| LedgerError::LockPoisoned("selection"))
    }

    // ═══════════════════════════════════════════════════════════════════
    // Lookups
    // ═══════════════════════════════════════════════════════════════════

    pub fn get(&self, hash: &Digest) -> Result<Option<CommitmentRecord>> {
        Ok(self.store.get(hash)?)
    }

    pub fn require(&self, hash: &Digest) -> Result<CommitmentRecord> {
        self.get(hash)?.ok_or(LedgerError::UnknownRecord(*hash))
    }

    pub fn find_by_nullifier(&self, nullifier: &Digest) -> Result<Option<CommitmentRecord>> {
        Ok(self
            .store
            .find_by(&|r| r.nullifier == *nullifier)?
            .into_iter()
            .next())
    }

    pub fn records_for(&self, owner: &Digest) -> Result<Vec<CommitmentRecord>> {
        Ok(self.store.find_by(&|r| r.preimage.owner == *owner)?)
    }

    /// Records currently held by an in-flight spend.
    pub fn reserved(&self) -> Result<Vec<CommitmentRecord>> {
        Ok(self.store.find_by(&|r| r.pending_nullification)?)
    }

    pub fn balances(&self, owner: &Digest) -> Result<BTreeMap<(Digest, Digest), Balance>> {
        let mut out: BTreeMap<(Digest, Digest), Balance> = BTreeMap::new();
        for record in self.records_for(owner)? {
            if record.nullified_on_chain.is_some() {
                continue;
            }
            let entry = out
                .entry((record.preimage.asset, record.preimage.sub_id))
                .or_default();
            let amount = record.amount();
            if record.nullified || record.pending_nullification {
                entry.pending_spend = entry.pending_spend.saturating_add(amount);
            } else if record.on_chain.is_none() {
                entry.pending_deposit = entry.pending_deposit.saturating_add(amount);
            } else {
                entry.spendable = entry.spendable.saturating_add(amount);
            }
        }
        Ok(out)
    }

    // ═══════════════════════════════════════════════════════════════════
    // Transitions
    // ═══════════════════════════════════════════════════════════════════

    /// Record a newly observed commitment. Replays of identical content are
    /// accepted; a different commitment under the same hash is rejected.
    pub fn upsert(&self, new: NewCommitment) -> Result<UpsertOutcome> {
        let record = new.into_record();
        match self.store.insert(&record)? {
            InsertOutcome::Inserted => {
                debug!("Stored commitment {}", record.hash);
                Ok(UpsertOutcome::Inserted)
            }
            InsertOutcome::Existing(existing) if existing.same_content(&record) => {
                Ok(UpsertOutcome::AlreadyPresent)
            }
            InsertOutcome::Existing(_) => {
                warn!("Conflicting content for commitment {}", record.hash);
                Err(LedgerError::DuplicateRecord(record.hash))
            }
        }
    }

    /// Set the confirming batch, only if the record is unconfirmed.
    pub fn mark_confirmed(
        &self,
        hash: &Digest,
        batch_index: u64,
        originating_tx: &Digest,
    ) -> Result<bool> {
        let changed = self
            .store
            .update_fields(hash, &RecordPatch::confirm(batch_index, *originating_tx))?;
        if changed {
            debug!("Commitment {} confirmed in batch {}", hash, batch_index);
        }
        Ok(changed)
    }

    pub fn set_membership(&self, hash: &Digest, witness: MembershipWitness) -> Result<bool> {
        Ok(self
            .store
            .update_fields(hash, &RecordPatch::membership(witness))?)
    }

    /// Reserve every record in `hashes` or none of them.
    pub fn mark_spend_reserved(&self, hashes: &[Digest]) -> Result<()> {
        let _guard = self.lock_selection()?;
        self.reserve_locked(hashes)
    }

    /// Caller must hold the selection lock.
    pub(crate) fn reserve_locked(&self, hashes: &[Digest]) -> Result<()> {
        for (i, hash) in hashes.iter().enumerate() {
            if !self.store.update_fields(hash, &RecordPatch::reserve())? {
                for done in &hashes[..i] {
                    self.store.update_fields(done, &RecordPatch::release())?;
                }
                return Err(LedgerError::NotReservable(*hash));
            }
        }
        Ok(())
    }

    /// Release reservations, returning how many were held.
    pub fn clear_reservation(&self, hashes: &[Digest]) -> Result<usize> {
        let mut released = 0;
        for hash in hashes {
            if self.store.update_fields(hash, &RecordPatch::release())? {
                released += 1;
            }
        }
        if released > 0 {
            debug!("Released {} reservations", released);
        }
        Ok(released)
    }

    /// Drop every reservation, e.g. ones left behind by a crashed process.
    pub fn release_all_reservations(&self) -> Result<usize> {
        let _guard = self.lock_selection()?;
        let held: Vec<Digest> = self.reserved()?.into_iter().map(|r| r.hash).collect();
        let released = self.clear_reservation(&held)?;
        if released > 0 {
            info!("Released {} stale reservations", released);
        }
        Ok(released)
    }

    /// The spend was built and submitted: the record is consumed locally.
    pub fn mark_spend_finalized(&self, hash: &Digest, spending_tx: SpendingTx) -> Result<bool> {
        if self.store.get(hash)?.is_none() {
            return Err(LedgerError::UnknownRecord(*hash));
        }
        let changed = self
            .store
            .update_fields(hash, &RecordPatch::finalize_spend(spending_tx))?;
        if changed {
            debug!("Commitment {} nullified by {}", hash, spending_tx.hash);
        }
        Ok(changed)
    }

    /// Record on-chain confirmation of spends, matched by nullifier.
    pub fn mark_spend_confirmed(
        &self,
        nullifiers: &[Digest],
        batch_index: u64,
        nullifying_tx: &Digest,
    ) -> Result<usize> {
        if nullifiers.is_empty() {
            return Ok(0);
        }
        let matching = self.store.find_by(&|r| {
            r.nullified_on_chain.is_none() && nullifiers.contains(&r.nullifier)
        })?;
        let mut confirmed = 0;
        for record in matching {
            if self.store.update_fields(
                &record.hash,
                &RecordPatch::confirm_spend(batch_index, *nullifying_tx),
            )? {
                confirmed += 1;
            }
        }
        if confirmed > 0 {
            debug!("{} spends confirmed in batch {}", confirmed, batch_index);
        }
        Ok(confirmed)
    }
}
