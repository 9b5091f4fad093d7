//! spool-ledger
//!
//! Client-side bookkeeping for shielded-pool commitments.
//!
//! - [`Ledger`] keeps one [`CommitmentRecord`] per commitment hash and moves
//!   it through its lifecycle: observed, confirmed, reserved, spent, spend
//!   confirmed.
//! - [`Ledger::select_usable`] picks and reserves spend inputs under a
//!   single lock.
//! - [`Ledger::withdraw_batch`] and [`Ledger::rollback_from_batch`] undo
//!   retracted batches, cascading to records derived from reverted ones.
//! - [`ChainSync`] applies the ordered chain event stream to both the
//!   accumulator and the ledger.

pub mod error;
pub mod ledger;
pub mod patch;
pub mod record;
pub mod reorg;
pub mod selection;
pub mod store;
pub mod sync;

pub use error::{LedgerError, Result, StoreError};
pub use ledger::{Balance, Ledger, UpsertOutcome};
pub use patch::{FieldUpdate, Guard, RecordPatch};
pub use record::{CommitmentRecord, MembershipWitness, NewCommitment, Preimage, SpendingTx, TxKind};
pub use reorg::ReorgReport;
pub use selection::{choose_inputs, Choice};
pub use store::{CommitmentStore, InsertOutcome, MemoryStore, SledStore};
pub use sync::{ApplyOutcome, BatchRecord, ChainEvent, ChainSync, LeavesAppended};
