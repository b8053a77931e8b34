use std::sync::Arc;

use larder_store::{StoreConfig, StoreEngine};
use tracing::debug;

use crate::bulk::BulkCache;
use crate::cache::Record;
use crate::config::CacheConfig;
use crate::gate::VersionGate;
use crate::keyed::KeyedCache;

/// One engine and one version gate shared by every cache an application
/// declares.
///
/// ```no_run
/// # use larder_cache::{Cache, CacheRoot, StoreConfig};
/// # #[derive(Clone, serde::Serialize, serde::Deserialize)]
/// # struct Recipe { slug: String }
/// # async fn demo() {
/// let root = CacheRoot::new(StoreConfig::on_disk("/var/lib/app/cache"));
/// let recipes = root.keyed::<Recipe>("recipeCache", "slug");
///
/// // Later, once the server has told us its schema version:
/// root.supply_version(4);
/// recipes.handle().ready().await;
/// let _ = recipes.set(&Recipe { slug: "soup".into() });
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct CacheRoot {
    engine: Arc<StoreEngine>,
    gate: VersionGate,
}

impl CacheRoot {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            engine: Arc::new(StoreEngine::new(config)),
            gate: VersionGate::new(),
        }
    }

    /// Build from file configuration, supplying the schema version right
    /// away when it is configured.
    pub fn from_config(config: &CacheConfig) -> Self {
        let root = Self::new(config.store_config());
        if let Some(version) = config.schema_version {
            root.supply_version(version);
        }
        root
    }

    /// A purely in-memory root.
    pub fn in_memory() -> Self {
        Self::new(StoreConfig::in_memory())
    }

    /// Supply the schema version to every cache of this root. Only the first
    /// call has any effect.
    pub fn supply_version(&self, version: u64) -> bool {
        let accepted = self.gate.supply(version);
        debug!(version, accepted, "schema version supplied to cache root");
        accepted
    }

    pub fn gate(&self) -> &VersionGate {
        &self.gate
    }

    pub fn engine(&self) -> &Arc<StoreEngine> {
        &self.engine
    }

    /// Declare a keyed cache. Must be called within a tokio runtime.
    pub fn keyed<T: Record>(&self, name: impl Into<String>, key_field: impl Into<String>) -> KeyedCache<T> {
        KeyedCache::new(Arc::clone(&self.engine), &self.gate, name, key_field)
    }

    /// Declare a bulk cache. Must be called within a tokio runtime.
    pub fn bulk<T: Record>(&self, name: impl Into<String>) -> BulkCache<T> {
        BulkCache::new(Arc::clone(&self.engine), &self.gate, name)
    }
}

impl Default for CacheRoot {
    fn default() -> Self {
        Self::in_memory()
    }
}
