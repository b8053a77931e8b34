use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value;
use tracing::{debug, warn};

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::journal::{Journal, JournalFrame, JournalOp};
use crate::key::Key;
use crate::transaction::{Transaction, TxMode};

// ---------------------------------------------------------------------------
// In-memory state
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub(crate) struct Collection {
    pub(crate) key_path: String,
    pub(crate) records: BTreeMap<Key, Value>,
}

impl Collection {
    fn new(key_path: impl Into<String>) -> Self {
        Self {
            key_path: key_path.into(),
            records: BTreeMap::new(),
        }
    }
}

/// Version plus collections of one database.
#[derive(Clone, Debug, Default)]
pub(crate) struct DbState {
    pub(crate) version: u64,
    pub(crate) collections: BTreeMap<String, Collection>,
}

impl DbState {
    pub(crate) fn collection(&self, name: &str) -> StoreResult<&Collection> {
        self.collections
            .get(name)
            .ok_or_else(|| StoreError::CollectionNotFound(name.to_string()))
    }

    pub(crate) fn collection_mut(&mut self, name: &str) -> StoreResult<&mut Collection> {
        self.collections
            .get_mut(name)
            .ok_or_else(|| StoreError::CollectionNotFound(name.to_string()))
    }

    /// Apply a recovered journal operation. Recovery is lenient: an operation
    /// that no longer fits the state is logged and skipped.
    fn replay(&mut self, op: &JournalOp) {
        match op {
            JournalOp::SetVersion(version) => self.version = *version,
            JournalOp::CreateCollection { name, key_path } => {
                self.collections.insert(name.clone(), Collection::new(key_path.clone()));
            }
            JournalOp::DropCollection { name } => {
                self.collections.remove(name);
            }
            JournalOp::Put { collection, key, body } => {
                let Some(target) = self.collections.get_mut(collection) else {
                    warn!(%collection, %key, "journal put for unknown collection; skipping");
                    return;
                };
                match serde_json::from_slice(body) {
                    Ok(value) => {
                        target.records.insert(key.clone(), value);
                    }
                    Err(e) => warn!(%collection, %key, error = %e, "undecodable record body; skipping"),
                }
            }
            JournalOp::Delete { collection, key } => {
                if let Some(target) = self.collections.get_mut(collection) {
                    target.records.remove(key);
                }
            }
            JournalOp::Clear { collection } => {
                if let Some(target) = self.collections.get_mut(collection) {
                    target.records.clear();
                }
            }
        }
    }

    /// The minimal operation list that rebuilds this state from empty.
    fn snapshot_ops(&self) -> StoreResult<Vec<JournalOp>> {
        let mut ops = vec![JournalOp::SetVersion(self.version)];
        for (name, collection) in &self.collections {
            ops.push(JournalOp::CreateCollection {
                name: name.clone(),
                key_path: collection.key_path.clone(),
            });
            for (key, value) in &collection.records {
                ops.push(JournalOp::Put {
                    collection: name.clone(),
                    key: key.clone(),
                    body: encode_body(value)?,
                });
            }
        }
        Ok(ops)
    }
}

pub(crate) fn encode_body(value: &Value) -> StoreResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

// ---------------------------------------------------------------------------
// Shared database
// ---------------------------------------------------------------------------

/// State shared by every connection to the same named database.
pub(crate) struct DatabaseInner {
    name: String,
    state: RwLock<DbState>,
    journal: Option<Journal>,
}

impl DatabaseInner {
    /// Build the database, replaying its journal when the engine is persistent.
    pub(crate) fn load(name: &str, config: &StoreConfig) -> StoreResult<Self> {
        let Some(root) = &config.root else {
            return Ok(Self {
                name: name.to_string(),
                state: RwLock::new(DbState::default()),
                journal: None,
            });
        };

        let journal = Journal::open(&root.join(format!("{name}.journal")), config.sync_mode.clone())?;
        let frames = journal.recover()?;
        let mut state = DbState::default();
        for op in frames.iter().flat_map(|frame| frame.ops.iter()) {
            state.replay(op);
        }

        if config.compact_on_open && frames.len() > 1 {
            journal.rewrite(&[JournalFrame::new(state.snapshot_ops()?)])?;
        }

        debug!(
            database = name,
            version = state.version,
            collections = state.collections.len(),
            frames = frames.len(),
            "database loaded from journal"
        );

        Ok(Self {
            name: name.to_string(),
            state: RwLock::new(state),
            journal: Some(journal),
        })
    }

    pub(crate) fn read(&self) -> StoreResult<RwLockReadGuard<'_, DbState>> {
        self.state.read().map_err(|_| StoreError::Poisoned)
    }

    pub(crate) fn write(&self) -> StoreResult<RwLockWriteGuard<'_, DbState>> {
        self.state.write().map_err(|_| StoreError::Poisoned)
    }

    /// Persist `ops` if this database has a journal.
    pub(crate) fn record(&self, ops: Vec<JournalOp>) -> StoreResult<()> {
        match &self.journal {
            Some(journal) if !ops.is_empty() => journal.append(&JournalFrame::new(ops)).map(|_| ()),
            _ => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Database (connection)
// ---------------------------------------------------------------------------

/// An open connection to a named database.
///
/// Connections are cheap to clone; every clone (and every other connection
/// to the same name from the same engine) sees the same data.
#[derive(Clone)]
pub struct Database {
    pub(crate) inner: Arc<DatabaseInner>,
}

impl Database {
    pub(crate) fn new(inner: Arc<DatabaseInner>) -> Self {
        Self { inner }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The schema version currently recorded for this database.
    pub fn version(&self) -> u64 {
        self.inner.read().map(|s| s.version).unwrap_or_default()
    }

    /// Sorted collection names.
    pub fn collection_names(&self) -> Vec<String> {
        self.inner
            .read()
            .map(|s| s.collections.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// The key path a collection was created with.
    pub fn key_path(&self, collection: &str) -> StoreResult<String> {
        Ok(self.inner.read()?.collection(collection)?.key_path.clone())
    }

    /// Start a transaction scoped to `collection`.
    pub fn transaction(&self, collection: &str, mode: TxMode) -> StoreResult<Transaction> {
        let key_path = self.key_path(collection)?;
        Ok(Transaction::new(self.clone(), collection.to_string(), key_path, mode))
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.inner.name)
            .field("version", &self.version())
            .field("persistent", &self.inner.journal.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Upgrade
// ---------------------------------------------------------------------------

/// Structural access granted while a database moves to a higher version.
///
/// Changes are made against a scratch copy of the state and only become
/// visible once the upgrade callback returns `Ok`.
pub struct Upgrade<'a> {
    state: &'a mut DbState,
    old_version: u64,
    new_version: u64,
    ops: Vec<JournalOp>,
}

impl<'a> Upgrade<'a> {
    pub(crate) fn new(state: &'a mut DbState, old_version: u64, new_version: u64) -> Self {
        Self {
            state,
            old_version,
            new_version,
            ops: Vec::new(),
        }
    }

    /// Version before the upgrade; `0` for a database that did not exist.
    pub fn old_version(&self) -> u64 {
        self.old_version
    }

    pub fn new_version(&self) -> u64 {
        self.new_version
    }

    pub fn contains_collection(&self, name: &str) -> bool {
        self.state.collections.contains_key(name)
    }

    pub fn collection_names(&self) -> Vec<String> {
        self.state.collections.keys().cloned().collect()
    }

    /// Create an empty collection whose primary key lives at `key_path`.
    pub fn create_collection(&mut self, name: &str, key_path: &str) -> StoreResult<()> {
        if self.contains_collection(name) {
            return Err(StoreError::CollectionExists(name.to_string()));
        }
        self.state
            .collections
            .insert(name.to_string(), Collection::new(key_path));
        self.ops.push(JournalOp::CreateCollection {
            name: name.to_string(),
            key_path: key_path.to_string(),
        });
        Ok(())
    }

    /// Drop a collection and every record in it.
    pub fn delete_collection(&mut self, name: &str) -> StoreResult<()> {
        if self.state.collections.remove(name).is_none() {
            return Err(StoreError::CollectionNotFound(name.to_string()));
        }
        self.ops.push(JournalOp::DropCollection {
            name: name.to_string(),
        });
        Ok(())
    }

    pub(crate) fn into_ops(self) -> Vec<JournalOp> {
        let mut ops = Vec::with_capacity(self.ops.len() + 1);
        ops.push(JournalOp::SetVersion(self.new_version));
        ops.extend(self.ops);
        ops
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn replay_rebuilds_state() {
        let mut state = DbState::default();
        let ops = vec![
            JournalOp::SetVersion(2),
            JournalOp::CreateCollection { name: "labels".into(), key_path: "id".into() },
            JournalOp::Put {
                collection: "labels".into(),
                key: Key::from("1"),
                body: encode_body(&json!({ "id": "1" })).unwrap(),
            },
            JournalOp::Put {
                collection: "labels".into(),
                key: Key::from("2"),
                body: encode_body(&json!({ "id": "2" })).unwrap(),
            },
            JournalOp::Delete { collection: "labels".into(), key: Key::from("1") },
        ];
        for op in &ops {
            state.replay(op);
        }

        assert_eq!(state.version, 2);
        let labels = state.collection("labels").unwrap();
        assert_eq!(labels.records.len(), 1);
        assert!(labels.records.contains_key(&Key::from("2")));
    }

    #[test]
    fn replay_skips_puts_into_unknown_collections() {
        let mut state = DbState::default();
        state.replay(&JournalOp::Put {
            collection: "ghost".into(),
            key: Key::Int(1),
            body: b"{}".to_vec(),
        });
        assert!(state.collections.is_empty());
    }

    #[test]
    fn snapshot_round_trips_through_replay() {
        let mut state = DbState { version: 4, ..DbState::default() };
        let mut recipes = Collection::new("slug");
        recipes.records.insert(Key::from("soup"), json!({ "slug": "soup" }));
        state.collections.insert("recipes".into(), recipes);

        let mut rebuilt = DbState::default();
        for op in &state.snapshot_ops().unwrap() {
            rebuilt.replay(op);
        }
        assert_eq!(rebuilt.version, 4);
        assert_eq!(rebuilt.collection("recipes").unwrap().key_path, "slug");
        assert_eq!(
            rebuilt.collection("recipes").unwrap().records.get(&Key::from("soup")),
            Some(&json!({ "slug": "soup" }))
        );
    }

    #[test]
    fn upgrade_records_structural_ops() {
        let mut state = DbState::default();
        let mut upgrade = Upgrade::new(&mut state, 0, 1);
        upgrade.create_collection("labels", "id").unwrap();
        assert!(matches!(
            upgrade.create_collection("labels", "id"),
            Err(StoreError::CollectionExists(_))
        ));
        upgrade.delete_collection("labels").unwrap();
        assert!(matches!(
            upgrade.delete_collection("labels"),
            Err(StoreError::CollectionNotFound(_))
        ));
        upgrade.create_collection("labels", "id").unwrap();

        let ops = upgrade.into_ops();
        assert_eq!(ops[0], JournalOp::SetVersion(1));
        assert_eq!(ops.len(), 4);
    }
}
