//! Guarded field updates applied atomically to a single record.
//!
//! Stores apply a [`RecordPatch`] inside their per-key critical section, so
//! the guard is evaluated against the same state the updates are written to.

use spool_common::Digest;

use crate::record::{CommitmentRecord, MembershipWitness, SpendingTx};

/// Precondition a record must meet for a patch to apply.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Guard {
    Unconfirmed,
    Confirmed,
    Spendable,
    Reserved,
    /// Spend not yet confirmed on chain.
    SpendUnconfirmed,
}

impl Guard {
    pub fn admits(&self, record: &CommitmentRecord) -> bool {
        match self {
            Guard::Unconfirmed => record.on_chain.is_none(),
            Guard::Confirmed => record.on_chain.is_some(),
            Guard::Spendable => record.is_spendable(),
            Guard::Reserved => record.pending_nullification,
            Guard::SpendUnconfirmed => record.nullified_on_chain.is_none(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldUpdate {
    OnChain(Option<u64>),
    OriginatingTx(Option<Digest>),
    Membership(Option<MembershipWitness>),
    PendingNullification(bool),
    Nullified(bool),
    SpendingTx(Option<SpendingTx>),
    NullifiedOnChain(Option<u64>),
    NullifyingTx(Option<Digest>),
}

impl FieldUpdate {
    fn write(&self, record: &mut CommitmentRecord) {
        match self {
            FieldUpdate::OnChain(v) => record.on_chain = *v,
            FieldUpdate::OriginatingTx(v) => record.originating_tx = *v,
            FieldUpdate::Membership(v) => record.membership = v.clone(),
            FieldUpdate::PendingNullification(v) => record.pending_nullification = *v,
            FieldUpdate::Nullified(v) => record.nullified = *v,
            FieldUpdate::SpendingTx(v) => record.spending_tx = *v,
            FieldUpdate::NullifiedOnChain(v) => record.nullified_on_chain = *v,
            FieldUpdate::NullifyingTx(v) => record.nullifying_tx = *v,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecordPatch {
    pub guard: Option<Guard>,
    pub updates: Vec<FieldUpdate>,
}

impl RecordPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn guarded(guard: Guard) -> Self {
        Self {
            guard: Some(guard),
            updates: Vec::new(),
        }
    }

    pub fn with(mut self, update: FieldUpdate) -> Self {
        self.updates.push(update);
        self
    }

    /// Apply to `record` in place. Returns whether anything changed; a
    /// failing guard changes nothing.
    pub fn apply(&self, record: &mut CommitmentRecord) -> bool {
        if let Some(guard) = self.guard {
            if !guard.admits(record) {
                return false;
            }
        }
        let before = record.clone();
        for update in &self.updates {
            update.write(record);
        }
        *record != before
    }

    pub fn confirm(batch_index: u64, originating_tx: Digest) -> Self {
        Self::guarded(Guard::Unconfirmed)
            .with(FieldUpdate::OnChain(Some(batch_index)))
            .with(FieldUpdate::OriginatingTx(Some(originating_tx)))
    }

    pub fn membership(witness: MembershipWitness) -> Self {
        Self::guarded(Guard::Confirmed).with(FieldUpdate::Membership(Some(witness)))
    }

    pub fn reserve() -> Self {
        Self::guarded(Guard::Spendable).with(FieldUpdate::PendingNullification(true))
    }

    pub fn release() -> Self {
        Self::guarded(Guard::Reserved).with(FieldUpdate::PendingNullification(false))
    }

    pub fn finalize_spend(spending_tx: SpendingTx) -> Self {
        Self::new()
            .with(FieldUpdate::PendingNullification(false))
            .with(FieldUpdate::Nullified(true))
            .with(FieldUpdate::SpendingTx(Some(spending_tx)))
    }

    pub fn confirm_spend(batch_index: u64, nullifying_tx: Digest) -> Self {
        Self::guarded(Guard::SpendUnconfirmed)
            .with(FieldUpdate::NullifiedOnChain(Some(batch_index)))
            .with(FieldUpdate::NullifyingTx(Some(nullifying_tx)))
    }

    pub fn clear_spend_confirmation() -> Self {
        Self::new()
            .with(FieldUpdate::NullifiedOnChain(None))
            .with(FieldUpdate::NullifyingTx(None))
    }

    /// Drop the confirmation only.
    pub fn unconfirm() -> Self {
        Self::new()
            .with(FieldUpdate::OnChain(None))
            .with(FieldUpdate::OriginatingTx(None))
            .with(FieldUpdate::Membership(None))
    }

    /// Back to the state of a freshly observed record.
    pub fn reset_lifecycle() -> Self {
        Self::unconfirm()
            .with(FieldUpdate::PendingNullification(false))
            .with(FieldUpdate::Nullified(false))
            .with(FieldUpdate::SpendingTx(None))
            .with(FieldUpdate::NullifiedOnChain(None))
            .with(FieldUpdate::NullifyingTx(None))
    }
}
