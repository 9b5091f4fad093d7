//! Ordered event feed.
//!
//! A reader task parses JSON lines into [`ChainEvent`]s and pushes them into
//! a bounded channel; a single applier task drains the channel, so events
//! reach the replica strictly in the order they were read.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use spool_ledger::{
    ApplyOutcome, ChainEvent, ChainSync, CommitmentStore, Ledger, LedgerError, NewCommitment,
    UpsertOutcome,
};
use spool_timber::TreeState;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Counts of what the replay did, plus the final tree.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReplaySummary {
    pub appended: usize,
    pub duplicates: usize,
    pub withdrawn: usize,
    pub rolled_back: usize,
    pub rejected: usize,
    pub state: Option<TreeState>,
}

/// Upsert the local commitments listed in `path`, one JSON
/// [`NewCommitment`] per line, so that replayed batches can confirm them.
/// Returns how many were new.
pub async fn load_commitments<S: CommitmentStore>(ledger: &Ledger<S>, path: PathBuf) -> Result<usize> {
    let file = File::open(&path)
        .await
        .with_context(|| format!("failed to open commitments {}", path.display()))?;
    let mut lines = BufReader::new(file).lines();
    let mut inserted = 0;
    let mut line_no = 0;
    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let commitment: NewCommitment = serde_json::from_str(trimmed)
            .with_context(|| format!("{}:{}: malformed commitment", path.display(), line_no))?;
        if ledger.upsert(commitment)? == UpsertOutcome::Inserted {
            inserted += 1;
        }
    }
    debug!("Loaded {} new commitments from {}", inserted, path.display());
    Ok(inserted)
}

/// Read `path` line by line into `sender`. Blank lines and lines starting
/// with `#` are skipped.
pub async fn read_events(path: PathBuf, sender: mpsc::Sender<ChainEvent>) -> Result<usize> {
    let file = File::open(&path)
        .await
        .with_context(|| format!("failed to open event feed {}", path.display()))?;
    let mut lines = BufReader::new(file).lines();
    let mut sent = 0;
    let mut line_no = 0;
    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let event: ChainEvent = serde_json::from_str(trimmed)
            .with_context(|| format!("{}:{}: malformed event", path.display(), line_no))?;
        if sender.send(event).await.is_err() {
            // Applier stopped early; it reports its own error.
            break;
        }
        sent += 1;
    }
    debug!("Read {} events from {}", sent, path.display());
    Ok(sent)
}

/// Apply events from `receiver` until the channel closes.
///
/// Events the replica refuses (out-of-order batches, a full tree) are
/// counted and skipped; store failures stop the replay.
pub async fn apply_events<S: CommitmentStore>(
    sync: Arc<ChainSync<S>>,
    mut receiver: mpsc::Receiver<ChainEvent>,
) -> Result<ReplaySummary> {
    let mut summary = ReplaySummary::default();
    while let Some(event) = receiver.recv().await {
        match sync.apply(&event) {
            Ok(ApplyOutcome::Appended { .. }) => summary.appended += 1,
            Ok(ApplyOutcome::Duplicate { .. }) => summary.duplicates += 1,
            Ok(ApplyOutcome::Withdrawn { .. }) => summary.withdrawn += 1,
            Ok(ApplyOutcome::RolledBack { .. }) => summary.rolled_back += 1,
            Err(err @ (LedgerError::OutOfOrderBatch { .. } | LedgerError::Tree(_))) => {
                warn!("Rejected event: {}", err);
                summary.rejected += 1;
            }
            Err(err) => {
                error!("Replay stopped: {}", err);
                return Err(err.into());
            }
        }
    }
    summary.state = Some(sync.tree_state()?);
    Ok(summary)
}

/// Run reader and applier against `sync`.
pub async fn replay<S: CommitmentStore + 'static>(
    sync: Arc<ChainSync<S>>,
    path: PathBuf,
    buffer: usize,
) -> Result<ReplaySummary> {
    let (sender, receiver) = mpsc::channel(buffer);
    let reader = tokio::spawn(read_events(path, sender));
    let applier = tokio::spawn(apply_events(sync, receiver));

    let applied = applier.await.context("applier task panicked")?;
    let read = reader.await.context("reader task panicked")?;
    let summary = applied?;
    read?;
    Ok(summary)
}
