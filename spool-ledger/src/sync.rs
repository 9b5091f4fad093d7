//! Applying chain events to the accumulator and the ledger.
//!
//! [`ChainSync`] owns the tree and the log of applied batches behind one
//! `RwLock`. Events take the write lock for their whole application, so a
//! reader holding the read lock sees a tree that matches a batch boundary.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use spool_common::{Digest, HashAlgorithm, HashDomain};
use spool_timber::{MerklePath, Timber, TreeState};
use tracing::{debug, info, warn};

use crate::error::{LedgerError, Result};
use crate::ledger::Ledger;
use crate::record::MembershipWitness;
use crate::reorg::ReorgReport;
use crate::store::{CommitmentStore, MemoryStore};

/// A batch of commitments accepted upstream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeavesAppended {
    pub values: Vec<Digest>,
    pub batch_index: u64,
    pub originating_tx: Digest,
    /// Nullifiers of the spends carried by the batch.
    #[serde(default)]
    pub nullifiers: Vec<Digest>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChainEvent {
    LeavesAppended(LeavesAppended),
    /// The batch carried by `originating_tx` was retracted.
    BatchWithdrawn { originating_tx: Digest },
    /// Every batch from `from_batch` onward was rolled back.
    BatchesRolledBack { from_batch: u64 },
}

/// Where an applied batch sits in the tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRecord {
    pub batch_index: u64,
    pub originating_tx: Digest,
    pub first_leaf: u64,
    /// Leaf count once the batch was applied.
    pub leaf_count: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ApplyOutcome {
    Appended {
        first_leaf: u64,
        leaf_count: u64,
        root: Digest,
        confirmed: usize,
        spent: usize,
    },
    /// The batch was already applied.
    Duplicate { originating_tx: Digest },
    Withdrawn {
        leaf_count: u64,
        root: Digest,
        batches: usize,
        report: ReorgReport,
    },
    RolledBack {
        leaf_count: u64,
        root: Digest,
        batches: usize,
        report: ReorgReport,
    },
}

struct Replica<H> {
    tree: Timber<H>,
    batches: Vec<BatchRecord>,
}

pub struct ChainSync<S = MemoryStore, H = HashAlgorithm> {
    replica: RwLock<Replica<H>>,
    ledger: Arc<Ledger<S>>,
}

impl<S: CommitmentStore, H: HashDomain> ChainSync<S, H> {
    pub fn new(ledger: Arc<Ledger<S>>, tree: Timber<H>) -> Self {
        Self {
            replica: RwLock::new(Replica {
                tree,
                batches: Vec::new(),
            }),
            ledger,
        }
    }

    pub fn ledger(&self) -> &Arc<Ledger<S>> {
        &self.ledger
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Replica<H>>> {
        self.replica
            .read()
            .map_err(|_| LedgerError::LockPoisoned("replica"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Replica<H>>> {
        self.replica
            .write()
            .map_err(|_| LedgerError::LockPoisoned("replica"))
    }

    // ═══════════════════════════════════════════════════════════════════
    // Readers
    // ═══════════════════════════════════════════════════════════════════

    pub fn tree_state(&self) -> Result<TreeState> {
        Ok(self.read()?.tree.state())
    }

    /// Path against the current root, with that root.
    pub fn merkle_path(&self, value: &Digest, index: Option<u64>) -> Result<(MerklePath, Digest)> {
        let replica = self.read()?;
        let path = replica.tree.merkle_path(value, index)?;
        Ok((path, replica.tree.root()))
    }

    pub fn batches(&self) -> Result<Vec<BatchRecord>> {
        Ok(self.read()?.batches.clone())
    }

    // ═══════════════════════════════════════════════════════════════════
    // Event handlers
    // ═══════════════════════════════════════════════════════════════════

    pub fn apply(&self, event: &ChainEvent) -> Result<ApplyOutcome> {
        match event {
            ChainEvent::LeavesAppended(batch) => self.apply_append(batch),
            ChainEvent::BatchWithdrawn { originating_tx } => self.apply_withdrawal(originating_tx),
            ChainEvent::BatchesRolledBack { from_batch } => self.apply_rollback(*from_batch),
        }
    }

    /// Append a batch, confirm the local records it contains and the local
    /// spends it carries.
    pub fn apply_append(&self, event: &LeavesAppended) -> Result<ApplyOutcome> {
        let mut replica = self.write()?;

        if replica
            .batches
            .iter()
            .any(|b| b.originating_tx == event.originating_tx)
        {
            debug!("Skipping already applied batch {}", event.originating_tx);
            return Ok(ApplyOutcome::Duplicate {
                originating_tx: event.originating_tx,
            });
        }
        if let Some(last) = replica.batches.last() {
            if event.batch_index <= last.batch_index {
                warn!(
                    "Rejecting batch {} after batch {}",
                    event.batch_index, last.batch_index
                );
                return Err(LedgerError::OutOfOrderBatch {
                    last: last.batch_index,
                    got: event.batch_index,
                });
            }
        }

        let first_leaf = replica.tree.append_all(&event.values)?;
        let ledger_updates = self
            .confirm_batch(&replica.tree, event, first_leaf)
            .and_then(|confirmed| {
                let spent = self.ledger.mark_spend_confirmed(
                    &event.nullifiers,
                    event.batch_index,
                    &event.originating_tx,
                )?;
                Ok((confirmed, spent))
            });
        let (confirmed, spent) = match ledger_updates {
            Ok(counts) => counts,
            Err(err) => {
                if let Err(undo) = self.ledger.withdraw_batch(&event.originating_tx) {
                    warn!(
                        "Could not undo partial batch {}: {}",
                        event.originating_tx, undo
                    );
                }
                replica.tree.rollback(first_leaf)?;
                return Err(err);
            }
        };

        let leaf_count = replica.tree.leaf_count();
        replica.batches.push(BatchRecord {
            batch_index: event.batch_index,
            originating_tx: event.originating_tx,
            first_leaf,
            leaf_count,
        });
        let root = replica.tree.root();
        info!(
            "Applied batch {} ({} leaves), leaf count {}, {} confirmed, {} spent",
            event.batch_index,
            event.values.len(),
            leaf_count,
            confirmed,
            spent
        );
        Ok(ApplyOutcome::Appended {
            first_leaf,
            leaf_count,
            root,
            confirmed,
            spent,
        })
    }

    fn confirm_batch(
        &self,
        tree: &Timber<H>,
        event: &LeavesAppended,
        first_leaf: u64,
    ) -> Result<usize> {
        let root = tree.root();
        let mut confirmed = 0;
        for (offset, value) in event.values.iter().enumerate() {
            let record = match self.ledger.get(value)? {
                Some(record) => record,
                None => continue,
            };
            let newly_confirmed =
                self.ledger
                    .mark_confirmed(value, event.batch_index, &event.originating_tx)?;
            // A failed earlier attempt may have confirmed it without a path.
            if !newly_confirmed && record.originating_tx != Some(event.originating_tx) {
                continue;
            }
            let leaf_index = first_leaf + offset as u64;
            let path = tree.merkle_path(value, Some(leaf_index))?;
            self.ledger.set_membership(
                value,
                MembershipWitness {
                    leaf_index,
                    path,
                    root,
                },
            )?;
            confirmed += 1;
        }
        Ok(confirmed)
    }

    /// Retract the batch carried by `originating_tx` and every batch applied
    /// after it. Unknown or already-withdrawn batches still get their ledger
    /// effects cleared, which is a no-op the second time round.
    ///
    /// The ledger is reset before the tree and the batch log, so a store
    /// failure leaves the replica as it was and the event can be retried.
    pub fn apply_withdrawal(&self, originating_tx: &Digest) -> Result<ApplyOutcome> {
        let mut replica = self.write()?;

        let position = replica
            .batches
            .iter()
            .position(|b| b.originating_tx == *originating_tx);
        let withdrawn = match position {
            Some(pos) => replica.batches[pos..].to_vec(),
            None => Vec::new(),
        };

        let mut report = ReorgReport::default();
        if withdrawn.is_empty() {
            report.merge(self.ledger.withdraw_batch(originating_tx)?);
        }
        for batch in withdrawn.iter().rev() {
            report.merge(self.ledger.withdraw_batch(&batch.originating_tx)?);
        }

        if let (Some(pos), Some(first)) = (position, withdrawn.first()) {
            replica.tree.rollback(first.first_leaf)?;
            replica.batches.truncate(pos);
        }

        let (leaf_count, root) = (replica.tree.leaf_count(), replica.tree.root());
        if !withdrawn.is_empty() {
            info!(
                "Withdrew {} batches starting with {}, leaf count {}",
                withdrawn.len(),
                originating_tx,
                leaf_count
            );
        }
        Ok(ApplyOutcome::Withdrawn {
            leaf_count,
            root,
            batches: withdrawn.len(),
            report,
        })
    }

    /// Roll the replica back to the state before `from_batch`.
    pub fn apply_rollback(&self, from_batch: u64) -> Result<ApplyOutcome> {
        let mut replica = self.write()?;

        let report = self.ledger.rollback_from_batch(from_batch)?;
        let dropped = match replica
            .batches
            .iter()
            .position(|b| b.batch_index >= from_batch)
        {
            Some(pos) => {
                let first_leaf = replica.batches[pos].first_leaf;
                replica.tree.rollback(first_leaf)?;
                replica.batches.split_off(pos).len()
            }
            None => 0,
        };

        let (leaf_count, root) = (replica.tree.leaf_count(), replica.tree.root());
        info!(
            "Rolled back {} batches from batch {}, leaf count {}",
            dropped, from_batch, leaf_count
        );
        Ok(ApplyOutcome::RolledBack {
            leaf_count,
            root,
            batches: dropped,
            report,
        })
    }
}
