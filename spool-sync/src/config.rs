//! Service configuration.
//!
//! Sources, later ones winning: `spool.toml` (or the file given with
//! `--config`), then `SPOOL_*` environment variables. Nested keys use a
//! double underscore, e.g. `SPOOL_STORE__BACKEND=sled`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use spool_common::HashAlgorithm;
use spool_timber::DEFAULT_TREE_HEIGHT;

pub const DEFAULT_STORE_PATH: &str = "data/spool-commitments.db";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_tree_height")]
    pub tree_height: u8,

    /// Node hash; must match the upstream tree.
    #[serde(default)]
    pub hash: HashAlgorithm,

    #[serde(default)]
    pub store: StoreConfig,

    /// Capacity of the event channel between reader and applier.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_tree_height() -> u8 {
    DEFAULT_TREE_HEIGHT
}

fn default_event_buffer() -> usize {
    1024
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tree_height: default_tree_height(),
            hash: HashAlgorithm::default(),
            store: StoreConfig::default(),
            event_buffer: default_event_buffer(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Sled,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl StoreConfig {
    pub fn sled_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_PATH))
    }
}

impl SyncConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => ::config::File::from(path).required(true),
            None => ::config::File::with_name("spool").required(false),
        };
        let settings = ::config::Config::builder()
            .add_source(file)
            .add_source(
                ::config::Environment::with_prefix("SPOOL")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("failed to read configuration")?;
        let config: SyncConfig = settings
            .try_deserialize()
            .context("invalid configuration")?;
        if config.event_buffer == 0 {
            anyhow::bail!("event_buffer must be positive");
        }
        Ok(config)
    }
}
