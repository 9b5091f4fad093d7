//! spool-sync
//!
//! Keeps a local replica of the shielded-pool commitment tree and ledger in
//! step with an ordered feed of chain events.
//!
//! Subcommands:
//! - `replay`: load optional local commitments, apply a JSON-lines event
//!   feed and print the resulting state
//! - `verify`: check a serialized membership path against a root

mod config;
mod feed;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use spool_common::Digest;
use spool_ledger::{ChainSync, CommitmentStore, Ledger, SledStore};
use spool_timber::{verify_merkle_path, MerklePath, Timber};
use tracing::info;

use crate::config::{StoreBackend, SyncConfig};

#[derive(Parser)]
#[command(name = "spool-sync")]
#[command(about = "Replays chain events into the spool commitment replica", long_about = None)]
struct Cli {
    /// Configuration file (defaults to ./spool.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply a JSON-lines event feed and print the final tree state
    Replay {
        /// Event feed, one JSON event per line
        #[arg(long)]
        events: PathBuf,

        /// Local commitments to load first, one JSON record per line
        #[arg(long)]
        commitments: Option<PathBuf>,
    },

    /// Check a membership path (JSON) for a leaf against a root
    Verify {
        #[arg(long)]
        leaf: Digest,

        #[arg(long)]
        root: Digest,

        /// File holding the serialized path
        #[arg(long)]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "spool_sync=info,spool_ledger=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Replay {
            events,
            commitments,
        } => match config.store.backend {
            StoreBackend::Memory => {
                run_replay(Ledger::in_memory(), &config, events, commitments).await
            }
            StoreBackend::Sled => {
                let path = config.store.sled_path();
                let store = SledStore::open(&path)
                    .with_context(|| format!("failed to open store at {}", path.display()))?;
                run_replay(Ledger::new(store), &config, events, commitments).await
            }
        },
        Commands::Verify { leaf, root, path } => verify(&config, leaf, root, path),
    }
}

async fn run_replay<S: CommitmentStore + 'static>(
    ledger: Ledger<S>,
    config: &SyncConfig,
    events: PathBuf,
    commitments: Option<PathBuf>,
) -> Result<()> {
    info!(
        "Starting replay: height {}, hash {}, store {:?}",
        config.tree_height, config.hash, config.store.backend
    );

    let released = ledger.release_all_reservations()?;
    if released > 0 {
        info!("Released {} reservations left by a previous run", released);
    }

    if let Some(path) = commitments {
        let loaded = feed::load_commitments(&ledger, path).await?;
        info!("Loaded {} local commitments", loaded);
    }

    let tree = Timber::new(config.hash, config.tree_height)?;
    let sync = Arc::new(ChainSync::new(Arc::new(ledger), tree));
    let summary = feed::replay(sync, events, config.event_buffer).await?;

    info!(
        "Replay finished: {} appended, {} withdrawn, {} rolled back, {} rejected",
        summary.appended, summary.withdrawn, summary.rolled_back, summary.rejected
    );
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn verify(config: &SyncConfig, leaf: Digest, root: Digest, path: PathBuf) -> Result<()> {
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let merkle_path: MerklePath = serde_json::from_str(&text).context("malformed path")?;

    if verify_merkle_path(&config.hash, &leaf, &root, &merkle_path) {
        println!("valid: leaf {} at index {}", leaf, merkle_path.leaf_index());
        Ok(())
    } else {
        anyhow::bail!("path does not lead from {} to root {}", leaf, root)
    }
}
