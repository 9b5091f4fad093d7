//! Input selection for spends.
//!
//! Transactions take at most two inputs, so selection looks for a single
//! exact match or a covering pair among the owner's spendable records.

use spool_common::Digest;
use tracing::info;

use crate::error::{LedgerError, Result};
use crate::ledger::Ledger;
use crate::record::CommitmentRecord;
use crate::store::CommitmentStore;

/// Positions into an ascending list of amounts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Choice {
    Single(usize),
    /// Lower position first.
    Pair(usize, usize),
}

impl Choice {
    pub fn positions(&self) -> Vec<usize> {
        match *self {
            Choice::Single(i) => vec![i],
            Choice::Pair(a, b) => vec![a, b],
        }
    }
}

/// Pick inputs from `amounts`, which must be sorted ascending.
///
/// 1. an exact amount wins outright;
/// 2. otherwise two records are needed, unless `exact_only`;
/// 3. if the two largest records below `target` cannot cover it, the
///    smallest record at or above `target` is paired with the smallest
///    record overall;
/// 4. otherwise a two-pointer scan over the records below `target` keeps
///    the covering pair whose larger member is closest to `target`.
///
/// Covering is deliberately `sum >= target`, not `sum > target`: a pair
/// summing exactly to `target` is accepted instead of being passed over,
/// which could leave the scan with no pair at all.
pub fn choose_inputs(amounts: &[u128], target: u128, exact_only: bool) -> Result<Choice> {
    if let Some(i) = amounts.iter().position(|&a| a == target) {
        return Ok(Choice::Single(i));
    }
    if exact_only || amounts.len() < 2 {
        return Err(LedgerError::NoUsableRecords);
    }

    let split = amounts.partition_point(|&a| a < target);
    let below = &amounts[..split];
    let pair_below_covers =
        split >= 2 && below[split - 1].saturating_add(below[split - 2]) >= target;

    if !pair_below_covers {
        return match split {
            s if s == amounts.len() => Err(LedgerError::Insufficient { target }),
            // Nothing smaller to pair with; the larger record covers alone.
            0 => Ok(Choice::Single(0)),
            s => Ok(Choice::Pair(0, s)),
        };
    }

    let (mut lhs, mut rhs) = (0, split - 1);
    let mut best: Option<(u128, usize, usize)> = None;
    while lhs < rhs {
        if below[lhs].saturating_add(below[rhs]) >= target {
            let deficit = target - below[rhs];
            if best.map_or(true, |(d, _, _)| deficit < d) {
                best = Some((deficit, lhs, rhs));
            }
            rhs -= 1;
        } else {
            lhs += 1;
        }
    }
    best.map(|(_, l, r)| Choice::Pair(l, r))
        .ok_or(LedgerError::Insufficient { target })
}

impl<S: CommitmentStore> Ledger<S> {
    /// Choose and reserve inputs worth at least `target`.
    ///
    /// Scan, decision and reservation happen under one lock, so concurrent
    /// callers never receive the same record. The returned records are
    /// already marked pending and ordered by amount. A caller that fails to
    /// use them must hand them back through [`Ledger::clear_reservation`].
    pub fn select_usable(
        &self,
        owner: &Digest,
        asset: &Digest,
        sub_id: &Digest,
        target: u128,
        exact_only: bool,
    ) -> Result<Vec<CommitmentRecord>> {
        let _guard = self.lock_selection()?;

        let mut candidates = self
            .store()
            .find_by(&|r| r.belongs_to(owner, asset, sub_id) && r.is_spendable())?;
        candidates.sort_by(|a, b| a.amount().cmp(&b.amount()).then(a.hash.cmp(&b.hash)));
        let amounts: Vec<u128> = candidates.iter().map(CommitmentRecord::amount).collect();

        let choice = choose_inputs(&amounts, target, exact_only)?;
        let mut chosen: Vec<CommitmentRecord> = choice
            .positions()
            .into_iter()
            .map(|i| candidates[i].clone())
            .collect();
        let hashes: Vec<Digest> = chosen.iter().map(|r| r.hash).collect();
        self.reserve_locked(&hashes)?;
        for record in &mut chosen {
            record.pending_nullification = true;
        }

        info!(
            "Reserved {} of {} candidates for target {}",
            chosen.len(),
            candidates.len(),
            target
        );
        Ok(chosen)
    }
}
