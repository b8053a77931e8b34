use std::path::{Path, PathBuf};

use larder_store::{StoreConfig, SyncMode};
use serde::{Deserialize, Serialize};

use crate::error::{CacheError, CacheResult};

/// Cache settings, normally read from a `larder.toml`.
///
/// ```toml
/// schema_version = 3
/// data_dir = "/var/lib/app/cache"
/// sync_mode = "every_commit"
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Schema version to supply to the gate at startup. Left unset when the
    /// version only becomes known later, e.g. from a server handshake.
    pub schema_version: Option<u64>,
    /// Where journals live. `None` keeps caches in memory.
    pub data_dir: Option<PathBuf>,
    pub sync_mode: SyncMode,
}

impl CacheConfig {
    pub fn from_toml_str(text: &str) -> CacheResult<Self> {
        toml::from_str(text).map_err(|e| CacheError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> CacheResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| CacheError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> CacheResult<String> {
        toml::to_string_pretty(self).map_err(|e| CacheError::Config(e.to_string()))
    }

    /// Settings for the underlying store engine.
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            root: self.data_dir.clone(),
            sync_mode: self.sync_mode.clone(),
            ..StoreConfig::default()
        }
    }
}
