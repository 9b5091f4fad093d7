//! Batch withdrawal through the sync layer.

use std::sync::Arc;

use spool_common::{Digest, HashAlgorithm};
use spool_ledger::{
    ApplyOutcome, ChainSync, LeavesAppended, Ledger, NewCommitment, Preimage, ReorgReport,
    SpendingTx, TxKind,
};
use spool_timber::Timber;

const OWNER: Digest = Digest([0x0a; 32]);
const ASSET: Digest = Digest([0x0b; 32]);
const SPEND_KEY: Digest = Digest([0x0c; 32]);

fn hasher() -> HashAlgorithm {
    HashAlgorithm::Keccak256
}

fn new_commitment(n: u64, amount: u128) -> NewCommitment {
    NewCommitment::derive(
        &hasher(),
        Digest::from_u64(n),
        Preimage {
            owner: OWNER,
            asset: ASSET,
            sub_id: Digest::ZERO,
            amount,
            salt: Digest::from_u64(n + 7),
        },
        &SPEND_KEY,
    )
}

fn sync() -> ChainSync {
    let ledger = Arc::new(Ledger::in_memory());
    ChainSync::new(ledger, Timber::new(hasher(), 8).unwrap())
}

fn batch(index: u64, tx: u64, values: &[u64], nullifiers: Vec<Digest>) -> LeavesAppended {
    LeavesAppended {
        values: values.iter().map(|&v| Digest::from_u64(v)).collect(),
        batch_index: index,
        originating_tx: Digest::from_u64(tx),
        nullifiers,
    }
}

#[test]
fn withdrawal_resets_records_and_cascades_to_derived_outputs() {
    let sync = sync();
    let ledger = Arc::clone(sync.ledger());

    // Record 1 arrives in batch 0 and is spent by local transaction 500,
    // which creates record 2 (change). Record 2 arrives in batch 1 together
    // with record 1's nullifier.
    ledger.upsert(new_commitment(1, 100)).unwrap();
    sync.apply_append(&batch(0, 1000, &[90, 1, 91], vec![])).unwrap();
    assert!(ledger.require(&Digest::from_u64(1)).unwrap().membership.is_some());

    ledger
        .mark_spend_reserved(&[Digest::from_u64(1)])
        .unwrap();
    let spend = SpendingTx {
        kind: TxKind::Transfer,
        hash: Digest::from_u64(500),
    };
    ledger
        .mark_spend_finalized(&Digest::from_u64(1), spend)
        .unwrap();
    ledger
        .upsert(new_commitment(2, 60).created_by(spend.hash))
        .unwrap();
    let nullifier = ledger.require(&Digest::from_u64(1)).unwrap().nullifier;
    sync.apply_append(&batch(1, 1001, &[2], vec![nullifier]))
        .unwrap();

    let before_withdrawal = sync.tree_state().unwrap();
    assert_eq!(before_withdrawal.leaf_count, 4);

    // Retract batch 0: the tree loses both batches, record 1 is reset and
    // record 2, created by spending record 1, is reset with it.
    let outcome = sync.apply_withdrawal(&Digest::from_u64(1000)).unwrap();
    match outcome {
        ApplyOutcome::Withdrawn {
            leaf_count,
            batches,
            report,
            ..
        } => {
            assert_eq!(leaf_count, 0);
            assert_eq!(batches, 2);
            assert_eq!(report.unconfirmed, 2);
            assert_eq!(report.unspent, 1);
        }
        other => panic!("unexpected outcome {other:?}"),
    }

    for n in [1, 2] {
        let record = ledger.require(&Digest::from_u64(n)).unwrap();
        assert_eq!(record.on_chain, None, "record {n}");
        assert!(!record.nullified, "record {n}");
        assert!(!record.pending_nullification, "record {n}");
        assert_eq!(record.nullified_on_chain, None, "record {n}");
        assert!(record.membership.is_none(), "record {n}");
    }
    assert!(sync.batches().unwrap().is_empty());
}

#[test]
fn cascade_reaches_records_whose_batch_is_still_live() {
    let sync = sync();
    let ledger = Arc::clone(sync.ledger());

    ledger.upsert(new_commitment(1, 100)).unwrap();
    sync.apply_append(&batch(0, 1000, &[1], vec![])).unwrap();
    let spend = SpendingTx {
        kind: TxKind::Transfer,
        hash: Digest::from_u64(500),
    };
    ledger
        .mark_spend_finalized(&Digest::from_u64(1), spend)
        .unwrap();
    ledger
        .upsert(new_commitment(2, 60).created_by(spend.hash))
        .unwrap();
    sync.apply_append(&batch(1, 1001, &[2], vec![])).unwrap();

    // Withdrawing the second batch alone leaves record 1 alone.
    sync.apply_withdrawal(&Digest::from_u64(1001)).unwrap();
    assert!(ledger.require(&Digest::from_u64(1)).unwrap().nullified);
    assert_eq!(ledger.require(&Digest::from_u64(2)).unwrap().on_chain, None);

    // Re-include record 2, then withdraw only record 1's batch through the
    // ledger: record 2 is reset by the cascade even though its own batch
    // was not withdrawn.
    sync.apply_append(&batch(2, 1002, &[2], vec![])).unwrap();
    let report = ledger.withdraw_batch(&Digest::from_u64(1000)).unwrap();
    assert_eq!(
        report,
        ReorgReport {
            unconfirmed: 1,
            unspent: 0,
            cascaded: 1,
            deleted: 0,
        }
    );
    assert_eq!(ledger.require(&Digest::from_u64(2)).unwrap().on_chain, None);
}

#[test]
fn withdrawal_is_idempotent() {
    let sync = sync();
    let ledger = Arc::clone(sync.ledger());
    ledger.upsert(new_commitment(1, 100)).unwrap();
    ledger.upsert(new_commitment(2, 50)).unwrap();
    sync.apply_append(&batch(0, 1000, &[1], vec![])).unwrap();
    sync.apply_append(&batch(1, 1001, &[2], vec![])).unwrap();

    sync.apply_withdrawal(&Digest::from_u64(1001)).unwrap();
    let state = sync.tree_state().unwrap();
    let records: Vec<_> = [1, 2]
        .iter()
        .map(|&n| ledger.require(&Digest::from_u64(n)).unwrap())
        .collect();

    match sync.apply_withdrawal(&Digest::from_u64(1001)).unwrap() {
        ApplyOutcome::Withdrawn { batches, report, .. } => {
            assert_eq!(batches, 0);
            assert!(report.is_empty());
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(sync.tree_state().unwrap(), state);
    let again: Vec<_> = [1, 2]
        .iter()
        .map(|&n| ledger.require(&Digest::from_u64(n)).unwrap())
        .collect();
    assert_eq!(again, records);
    assert_eq!(state.leaf_count, 1);
    assert_eq!(records[0].on_chain, Some(0));
}

#[test]
fn cascade_follows_several_generations_and_stops_on_cycles() {
    let sync = sync();
    let ledger = Arc::clone(sync.ledger());
    let spend = |n: u64| SpendingTx {
        kind: TxKind::Transfer,
        hash: Digest::from_u64(n),
    };

    // 1 --spend 500--> 2 --spend 501--> 3 --spend 500 (cycle back)
    ledger.upsert(new_commitment(1, 100)).unwrap();
    sync.apply_append(&batch(0, 1000, &[1], vec![])).unwrap();
    ledger.mark_spend_finalized(&Digest::from_u64(1), spend(500)).unwrap();

    ledger
        .upsert(new_commitment(2, 90).created_by(spend(500).hash))
        .unwrap();
    sync.apply_append(&batch(1, 1001, &[2], vec![])).unwrap();
    ledger.mark_spend_finalized(&Digest::from_u64(2), spend(501)).unwrap();

    ledger
        .upsert(new_commitment(3, 80).created_by(spend(501).hash))
        .unwrap();
    sync.apply_append(&batch(2, 1002, &[3], vec![])).unwrap();
    ledger.mark_spend_finalized(&Digest::from_u64(3), spend(500)).unwrap();

    let report = ledger.withdraw_batch(&Digest::from_u64(1000)).unwrap();
    assert_eq!(
        report,
        ReorgReport {
            unconfirmed: 1,
            unspent: 0,
            cascaded: 2,
            deleted: 0,
        }
    );
    for n in [1, 2, 3] {
        let record = ledger.require(&Digest::from_u64(n)).unwrap();
        assert_eq!(record.on_chain, None, "record {n}");
        assert!(!record.nullified, "record {n}");
        assert_eq!(record.spending_tx, None, "record {n}");
    }

    assert!(ledger
        .withdraw_batch(&Digest::from_u64(1000))
        .unwrap()
        .is_empty());
}
