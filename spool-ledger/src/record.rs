//! Commitment records and their lifecycle flags.

use serde::{Deserialize, Serialize};
use spool_common::{derive_nullifier, Digest, HashDomain};
use spool_timber::MerklePath;

/// Hidden contents of a commitment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preimage {
    pub owner: Digest,
    pub asset: Digest,
    pub sub_id: Digest,
    pub amount: u128,
    pub salt: Digest,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
    Deposit,
    Transfer,
    Withdraw,
}

/// Local transaction that consumed a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendingTx {
    pub kind: TxKind,
    pub hash: Digest,
}

/// Membership proof captured when the record's batch was applied.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipWitness {
    pub leaf_index: u64,
    pub path: MerklePath,
    pub root: Digest,
}

/// A locally-known commitment, keyed by its hash.
///
/// `on_chain` and `nullified_on_chain` hold the batch index that confirmed
/// the commitment or its spend; `None` while unconfirmed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitmentRecord {
    pub hash: Digest,
    pub preimage: Preimage,
    pub nullifier: Digest,
    #[serde(default)]
    pub is_deposited: bool,
    #[serde(default)]
    pub created_by: Option<Digest>,

    #[serde(default)]
    pub on_chain: Option<u64>,
    #[serde(default)]
    pub originating_tx: Option<Digest>,
    #[serde(default)]
    pub membership: Option<MembershipWitness>,

    #[serde(default)]
    pub pending_nullification: bool,
    #[serde(default)]
    pub nullified: bool,
    #[serde(default)]
    pub spending_tx: Option<SpendingTx>,
    #[serde(default)]
    pub nullified_on_chain: Option<u64>,
    #[serde(default)]
    pub nullifying_tx: Option<Digest>,
}

impl CommitmentRecord {
    pub fn amount(&self) -> u128 {
        self.preimage.amount
    }

    pub fn is_confirmed(&self) -> bool {
        self.on_chain.is_some()
    }

    /// Confirmed, not reserved, not spent locally or on chain.
    pub fn is_spendable(&self) -> bool {
        self.on_chain.is_some()
            && !self.pending_nullification
            && !self.nullified
            && self.nullified_on_chain.is_none()
    }

    pub fn belongs_to(&self, owner: &Digest, asset: &Digest, sub_id: &Digest) -> bool {
        self.preimage.owner == *owner
            && self.preimage.asset == *asset
            && self.preimage.sub_id == *sub_id
    }

    /// Identity fields, as opposed to lifecycle state.
    pub(crate) fn same_content(&self, other: &CommitmentRecord) -> bool {
        self.hash == other.hash
            && self.preimage == other.preimage
            && self.nullifier == other.nullifier
            && self.is_deposited == other.is_deposited
    }
}

/// Input to [`crate::Ledger::upsert`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCommitment {
    pub hash: Digest,
    pub preimage: Preimage,
    pub nullifier: Digest,
    #[serde(default)]
    pub is_deposited: bool,
    #[serde(default)]
    pub created_by: Option<Digest>,
}

impl NewCommitment {
    /// Build with the nullifier derived from `spend_key`.
    pub fn derive<H: HashDomain>(
        hasher: &H,
        hash: Digest,
        preimage: Preimage,
        spend_key: &Digest,
    ) -> Self {
        Self {
            hash,
            preimage,
            nullifier: derive_nullifier(hasher, &hash, spend_key),
            is_deposited: false,
            created_by: None,
        }
    }

    pub fn deposited(mut self) -> Self {
        self.is_deposited = true;
        self
    }

    pub fn created_by(mut self, tx: Digest) -> Self {
        self.created_by = Some(tx);
        self
    }

    pub fn into_record(self) -> CommitmentRecord {
        CommitmentRecord {
            hash: self.hash,
            preimage: self.preimage,
            nullifier: self.nullifier,
            is_deposited: self.is_deposited,
            created_by: self.created_by,
            on_chain: None,
            originating_tx: None,
            membership: None,
            pending_nullification: false,
            nullified: false,
            spending_tx: None,
            nullified_on_chain: None,
            nullifying_tx: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spool_common::HashAlgorithm;

    fn preimage(amount: u128) -> Preimage {
        Preimage {
            owner: Digest::from_u64(1),
            asset: Digest::from_u64(2),
            sub_id: Digest::ZERO,
            amount,
            salt: Digest::from_u64(amount as u64),
        }
    }

    #[test]
    fn fresh_records_are_unconfirmed() {
        let record = NewCommitment::derive(
            &HashAlgorithm::Keccak256,
            Digest::from_u64(10),
            preimage(5),
            &Digest::from_u64(99),
        )
        .into_record();
        assert!(!record.is_confirmed());
        assert!(!record.is_spendable());
        assert!(record.belongs_to(&Digest::from_u64(1), &Digest::from_u64(2), &Digest::ZERO));
    }

    #[test]
    fn json_round_trip_keeps_large_amounts() {
        let mut record = NewCommitment::derive(
            &HashAlgorithm::Keccak256,
            Digest::from_u64(10),
            preimage(u128::MAX - 1),
            &Digest::from_u64(99),
        )
        .deposited()
        .into_record();
        record.on_chain = Some(4);
        let bytes = serde_json::to_vec(&record).unwrap();
        let back: CommitmentRecord = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, record);
    }
}
