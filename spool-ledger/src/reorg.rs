//! Ledger recovery when the upstream chain retracts batches.

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use spool_common::Digest;
use tracing::info;

use crate::error::Result;
use crate::ledger::Ledger;
use crate::patch::RecordPatch;
use crate::store::CommitmentStore;

/// What a withdrawal or rollback changed in the ledger.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReorgReport {
    /// Records whose confirming batch went away.
    pub unconfirmed: usize,
    /// Records whose spend confirmation went away.
    pub unspent: usize,
    /// Records reset because an ancestor was reverted.
    pub cascaded: usize,
    /// Unconfirmed non-deposit records dropped.
    pub deleted: usize,
}

impl ReorgReport {
    pub fn merge(&mut self, other: ReorgReport) {
        self.unconfirmed += other.unconfirmed;
        self.unspent += other.unspent;
        self.cascaded += other.cascaded;
        self.deleted += other.deleted;
    }

    pub fn is_empty(&self) -> bool {
        *self == ReorgReport::default()
    }
}

impl<S: CommitmentStore> Ledger<S> {
    /// Undo the effects of the batch carried by `originating_tx`.
    ///
    /// Records that batch confirmed go back to their initial state, spends it
    /// confirmed become unconfirmed, and every record created by a
    /// transaction that spent a reset record is reset too, transitively.
    /// Calling this twice for the same transaction changes nothing the
    /// second time.
    pub fn withdraw_batch(&self, originating_tx: &Digest) -> Result<ReorgReport> {
        let mut report = ReorgReport::default();
        let mut worklist = VecDeque::new();

        let produced = self
            .store()
            .find_by(&|r| r.originating_tx == Some(*originating_tx))?;
        for record in produced {
            if self
                .store()
                .update_fields(&record.hash, &RecordPatch::reset_lifecycle())?
            {
                report.unconfirmed += 1;
            }
            if let Some(spend) = record.spending_tx {
                worklist.push_back(spend.hash);
            }
        }

        let consumed = self
            .store()
            .find_by(&|r| r.nullifying_tx == Some(*originating_tx))?;
        for record in consumed {
            if self
                .store()
                .update_fields(&record.hash, &RecordPatch::clear_spend_confirmation())?
            {
                report.unspent += 1;
            }
        }

        let mut visited = HashSet::new();
        while let Some(tx) = worklist.pop_front() {
            if !visited.insert(tx) {
                continue;
            }
            let derived = self.store().find_by(&|r| r.created_by == Some(tx))?;
            for record in derived {
                if self
                    .store()
                    .update_fields(&record.hash, &RecordPatch::reset_lifecycle())?
                {
                    report.cascaded += 1;
                }
                if let Some(spend) = record.spending_tx {
                    worklist.push_back(spend.hash);
                }
            }
        }

        if !report.is_empty() {
            info!("Withdrew batch {}: {:?}", originating_tx, report);
        }
        Ok(report)
    }

    /// Undo every batch from `from_batch` onward.
    ///
    /// Confirmations and spend confirmations at or after `from_batch` are
    /// cleared. Records first confirmed after it that did not come from a
    /// deposit are dropped; they will be observed again if re-included.
    pub fn rollback_from_batch(&self, from_batch: u64) -> Result<ReorgReport> {
        let mut report = ReorgReport {
            deleted: self.store().delete_many(&|r| {
                !r.is_deposited && r.on_chain.map_or(false, |b| b > from_batch)
            })?,
            ..ReorgReport::default()
        };

        let unconfirmed = self
            .store()
            .find_by(&|r| r.on_chain.map_or(false, |b| b >= from_batch))?;
        for record in unconfirmed {
            if self
                .store()
                .update_fields(&record.hash, &RecordPatch::unconfirm())?
            {
                report.unconfirmed += 1;
            }
        }

        let unspent = self
            .store()
            .find_by(&|r| r.nullified_on_chain.map_or(false, |b| b >= from_batch))?;
        for record in unspent {
            if self
                .store()
                .update_fields(&record.hash, &RecordPatch::clear_spend_confirmation())?
            {
                report.unspent += 1;
            }
        }

        if !report.is_empty() {
            info!("Rolled back from batch {}: {:?}", from_batch, report);
        }
        Ok(report)
    }
}
