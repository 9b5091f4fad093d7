//! Event application: tree and ledger move together.

use std::sync::Arc;

use spool_common::{Digest, HashAlgorithm};
use spool_ledger::{
    ApplyOutcome, ChainEvent, ChainSync, LeavesAppended, Ledger, LedgerError, NewCommitment,
    Preimage, SledStore,
};
use spool_timber::{verify_merkle_path, Timber};

const HEIGHT: u8 = 10;

fn commitment(n: u64, deposited: bool) -> NewCommitment {
    let new = NewCommitment {
        hash: Digest::from_u64(n),
        preimage: Preimage {
            owner: Digest::from_u64(1),
            asset: Digest::from_u64(2),
            sub_id: Digest::ZERO,
            amount: 5,
            salt: Digest::from_u64(n),
        },
        nullifier: Digest::from_u64(n + 10_000),
        is_deposited: false,
        created_by: None,
    };
    if deposited {
        new.deposited()
    } else {
        new
    }
}

fn append(index: u64, tx: u64, values: &[u64]) -> ChainEvent {
    ChainEvent::LeavesAppended(LeavesAppended {
        values: values.iter().map(|&v| Digest::from_u64(v)).collect(),
        batch_index: index,
        originating_tx: Digest::from_u64(tx),
        nullifiers: Vec::new(),
    })
}

fn new_sync() -> ChainSync {
    ChainSync::new(
        Arc::new(Ledger::in_memory()),
        Timber::new(HashAlgorithm::Sha256, HEIGHT).unwrap(),
    )
}

#[test]
fn confirmed_records_carry_verifiable_membership() {
    let sync = new_sync();
    let ledger = Arc::clone(sync.ledger());
    ledger.upsert(commitment(7, false)).unwrap();

    let outcome = sync.apply(&append(0, 100, &[5, 6, 7, 8])).unwrap();
    assert!(matches!(
        outcome,
        ApplyOutcome::Appended {
            first_leaf: 0,
            leaf_count: 4,
            confirmed: 1,
            ..
        }
    ));

    let record = ledger.require(&Digest::from_u64(7)).unwrap();
    assert_eq!(record.on_chain, Some(0));
    let witness = record.membership.expect("membership cached on confirmation");
    assert_eq!(witness.leaf_index, 2);
    assert!(verify_merkle_path(
        &HashAlgorithm::Sha256,
        &record.hash,
        &witness.root,
        &witness.path
    ));

    // Later batches move the root; a fresh path still verifies.
    sync.apply(&append(1, 101, &[9, 10])).unwrap();
    let (path, root) = sync.merkle_path(&record.hash, None).unwrap();
    assert_ne!(root, witness.root);
    assert!(verify_merkle_path(&HashAlgorithm::Sha256, &record.hash, &root, &path));
}

#[test]
fn replayed_batch_is_skipped() {
    let sync = new_sync();
    sync.apply(&append(0, 100, &[1, 2])).unwrap();
    let state = sync.tree_state().unwrap();
    assert_eq!(
        sync.apply(&append(0, 100, &[1, 2])).unwrap(),
        ApplyOutcome::Duplicate {
            originating_tx: Digest::from_u64(100)
        }
    );
    assert_eq!(sync.tree_state().unwrap(), state);
}

#[test]
fn stale_batch_index_is_rejected() {
    let sync = new_sync();
    sync.apply(&append(3, 100, &[1])).unwrap();
    let err = sync.apply(&append(3, 101, &[2])).unwrap_err();
    assert!(matches!(err, LedgerError::OutOfOrderBatch { last: 3, got: 3 }));
    assert_eq!(sync.tree_state().unwrap().leaf_count, 1);
}

#[test]
fn overflowing_batch_leaves_everything_untouched() {
    let sync = ChainSync::new(
        Arc::new(Ledger::in_memory()),
        Timber::new(HashAlgorithm::Sha256, 2).unwrap(),
    );
    sync.apply(&append(0, 100, &[1, 2, 3])).unwrap();
    let err = sync.apply(&append(1, 101, &[4, 5])).unwrap_err();
    assert!(matches!(err, LedgerError::Tree(_)));
    assert_eq!(sync.tree_state().unwrap().leaf_count, 3);
    assert_eq!(sync.batches().unwrap().len(), 1);
}

#[test]
fn rollback_event_rewinds_tree_and_ledger() {
    let ledger = Arc::new(Ledger::new(SledStore::temporary().unwrap()));
    let sync = ChainSync::new(
        Arc::clone(&ledger),
        Timber::new(HashAlgorithm::Sha256, HEIGHT).unwrap(),
    );
    ledger.upsert(commitment(1, true)).unwrap();
    ledger.upsert(commitment(2, false)).unwrap();
    ledger.upsert(commitment(3, false)).unwrap();

    sync.apply(&append(0, 100, &[1])).unwrap();
    let after_first = sync.tree_state().unwrap();
    sync.apply(&append(1, 101, &[2])).unwrap();
    sync.apply(&append(2, 102, &[3])).unwrap();

    let outcome = sync
        .apply(&ChainEvent::BatchesRolledBack { from_batch: 1 })
        .unwrap();
    match outcome {
        ApplyOutcome::RolledBack {
            leaf_count,
            batches,
            report,
            ..
        } => {
            assert_eq!(leaf_count, 1);
            assert_eq!(batches, 2);
            assert_eq!(report.deleted, 1);
            assert_eq!(report.unconfirmed, 1);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(sync.tree_state().unwrap(), after_first);
    assert_eq!(ledger.require(&Digest::from_u64(1)).unwrap().on_chain, Some(0));
    assert_eq!(ledger.require(&Digest::from_u64(2)).unwrap().on_chain, None);
    assert!(ledger.get(&Digest::from_u64(3)).unwrap().is_none());
}

#[test]
fn events_decode_from_json_lines() {
    let hex = |n: u64| Digest::from_u64(n).to_hex();
    let line = format!(
        r#"{{"type":"leaves_appended","values":["{}","{}"],"batch_index":4,"originating_tx":"{}"}}"#,
        hex(1),
        hex(2),
        hex(3)
    );
    let event: ChainEvent = serde_json::from_str(&line).unwrap();
    assert_eq!(event, append(4, 3, &[1, 2]));

    let withdrawn: ChainEvent =
        serde_json::from_str(&format!(r#"{{"type":"batch_withdrawn","originating_tx":"{}"}}"#, hex(3)))
            .unwrap();
    assert_eq!(
        withdrawn,
        ChainEvent::BatchWithdrawn {
            originating_tx: Digest::from_u64(3)
        }
    );
}
