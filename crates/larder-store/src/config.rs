use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Flush/sync strategy for journal appends.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// `fsync` after every committed transaction (safest, highest latency).
    EveryCommit,
    /// Flush to the OS and rely on page-cache buffering.
    #[default]
    OsDefault,
}

/// Configuration for a [`StoreEngine`](crate::StoreEngine).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding one journal per database. `None` keeps everything
    /// in memory.
    pub root: Option<PathBuf>,
    /// Sync strategy for journal appends.
    pub sync_mode: SyncMode,
    /// Rewrite a journal as a single snapshot frame when it is loaded.
    pub compact_on_open: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: None,
            sync_mode: SyncMode::default(),
            compact_on_open: true,
        }
    }
}

impl StoreConfig {
    /// A purely in-memory engine.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// A journal-backed engine rooted at `root`.
    pub fn on_disk(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
            ..Self::default()
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.root.is_some()
    }
}
