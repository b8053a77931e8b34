use std::collections::HashMap;
use std::fs;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::database::{Database, DatabaseInner, Upgrade};
use crate::error::{StoreError, StoreResult};

/// Entry point to the store: opens databases by name at a schema version.
///
/// Every database is loaded at most once per engine; later opens of the same
/// name share its state.
pub struct StoreEngine {
    config: StoreConfig,
    databases: Mutex<HashMap<String, Arc<DatabaseInner>>>,
}

impl StoreEngine {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            databases: Mutex::new(HashMap::new()),
        }
    }

    /// An engine that keeps everything in memory.
    pub fn in_memory() -> Self {
        Self::new(StoreConfig::in_memory())
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Open `name` at `version`.
    ///
    /// - `version` lower than the stored version fails with
    ///   [`StoreError::VersionDowngrade`].
    /// - `version` higher than the stored version (a brand-new database has
    ///   version 0) runs `on_upgrade` first. If the callback fails the
    ///   database is left untouched and the open fails.
    /// - Equal versions open directly.
    pub fn open<F>(&self, name: &str, version: u64, on_upgrade: F) -> StoreResult<Database>
    where
        F: FnOnce(&mut Upgrade<'_>) -> StoreResult<()>,
    {
        if version == 0 {
            return Err(StoreError::InvalidVersion(version));
        }
        validate_name(name)?;

        let mut databases = self.databases.lock().map_err(|_| StoreError::Poisoned)?;
        let inner = match databases.get(name) {
            Some(inner) => Arc::clone(inner),
            None => {
                let inner = Arc::new(DatabaseInner::load(name, &self.config)?);
                databases.insert(name.to_string(), Arc::clone(&inner));
                inner
            }
        };

        {
            let mut state = inner.write()?;
            let current = state.version;
            if version < current {
                return Err(StoreError::VersionDowngrade {
                    requested: version,
                    current,
                });
            }

            if version > current {
                let mut staged = (*state).clone();
                let mut upgrade = Upgrade::new(&mut staged, current, version);
                on_upgrade(&mut upgrade)?;
                let ops = upgrade.into_ops();
                inner.record(ops)?;
                staged.version = version;
                *state = staged;
                info!(database = name, from = current, to = version, "database upgraded");
            }
        }

        debug!(database = name, version, "database opened");
        Ok(Database::new(inner))
    }

    /// Remove a database and its journal. Existing connections keep their
    /// in-memory view but nothing they write is persisted any more.
    pub fn delete_database(&self, name: &str) -> StoreResult<bool> {
        validate_name(name)?;
        let mut databases = self.databases.lock().map_err(|_| StoreError::Poisoned)?;
        let mut existed = databases.remove(name).is_some();

        if let Some(root) = &self.config.root {
            let path = root.join(format!("{name}.journal"));
            if path.exists() {
                fs::remove_file(&path)?;
                existed = true;
            }
        }

        debug!(database = name, existed, "database deleted");
        Ok(existed)
    }

    /// Names of databases loaded by this engine, sorted.
    pub fn database_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .databases
            .lock()
            .map(|dbs| dbs.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Names of databases with a journal under the configured root, sorted.
    /// Always empty for an in-memory engine.
    pub fn stored_database_names(&self) -> StoreResult<Vec<String>> {
        let Some(root) = &self.config.root else {
            return Ok(Vec::new());
        };
        if !root.exists() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in fs::read_dir(root)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("journal") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

impl Default for StoreEngine {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl std::fmt::Debug for StoreEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreEngine")
            .field("root", &self.config.root)
            .field("databases", &self.database_names())
            .finish()
    }
}

fn validate_name(name: &str) -> StoreResult<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Key;
    use crate::transaction::TxMode;
    use serde_json::json;

    fn recreate(collection: &'static str, key_path: &'static str) -> impl FnOnce(&mut Upgrade<'_>) -> StoreResult<()> {
        move |upgrade| {
            if upgrade.contains_collection(collection) {
                upgrade.delete_collection(collection)?;
            }
            upgrade.create_collection(collection, key_path)
        }
    }

    fn insert(db: &Database, collection: &str, record: serde_json::Value) {
        let mut tx = db.transaction(collection, TxMode::ReadWrite).unwrap();
        tx.add(record).unwrap();
        tx.commit().unwrap();
    }

    #[test]
    fn first_open_runs_upgrade_from_zero() {
        let engine = StoreEngine::in_memory();
        let mut seen = None;
        let db = engine
            .open("labels", 3, |upgrade| {
                seen = Some((upgrade.old_version(), upgrade.new_version()));
                upgrade.create_collection("labels", "id")
            })
            .unwrap();
        assert_eq!(seen, Some((0, 3)));
        assert_eq!(db.version(), 3);
        assert_eq!(db.collection_names(), vec!["labels".to_string()]);
        assert_eq!(db.key_path("labels").unwrap(), "id");
    }

    #[test]
    fn same_version_skips_upgrade_and_shares_data() {
        let engine = StoreEngine::in_memory();
        let first = engine.open("labels", 1, recreate("labels", "id")).unwrap();
        insert(&first, "labels", json!({ "id": "1" }));

        let second = engine
            .open("labels", 1, |_| panic!("upgrade must not run at the same version"))
            .unwrap();
        let tx = second.transaction("labels", TxMode::ReadOnly).unwrap();
        assert!(tx.get(&Key::from("1")).unwrap().is_some());
    }

    #[test]
    fn version_bump_wipes_recreated_collection() {
        let engine = StoreEngine::in_memory();
        let v1 = engine.open("labels", 1, recreate("labels", "id")).unwrap();
        insert(&v1, "labels", json!({ "id": "1" }));

        let v2 = engine.open("labels", 2, recreate("labels", "id")).unwrap();
        assert_eq!(v2.version(), 2);
        let tx = v2.transaction("labels", TxMode::ReadOnly).unwrap();
        assert_eq!(tx.count().unwrap(), 0);
    }

    #[test]
    fn downgrade_is_rejected() {
        let engine = StoreEngine::in_memory();
        engine.open("labels", 5, recreate("labels", "id")).unwrap();
        let err = engine.open("labels", 4, recreate("labels", "id")).unwrap_err();
        assert!(matches!(err, StoreError::VersionDowngrade { requested: 4, current: 5 }));
    }

    #[test]
    fn version_zero_is_invalid() {
        let engine = StoreEngine::in_memory();
        assert!(matches!(
            engine.open("labels", 0, recreate("labels", "id")),
            Err(StoreError::InvalidVersion(0))
        ));
    }

    #[test]
    fn failed_upgrade_leaves_database_untouched() {
        let engine = StoreEngine::in_memory();
        let v1 = engine.open("labels", 1, recreate("labels", "id")).unwrap();
        insert(&v1, "labels", json!({ "id": "1" }));

        let err = engine
            .open("labels", 2, |upgrade| {
                upgrade.delete_collection("labels")?;
                upgrade.delete_collection("labels")
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::CollectionNotFound(_)));
        assert_eq!(v1.version(), 1);
        assert_eq!(v1.transaction("labels", TxMode::ReadOnly).unwrap().count().unwrap(), 1);
    }

    #[test]
    fn invalid_names_are_rejected() {
        let engine = StoreEngine::in_memory();
        for name in ["", "../escape", ".hidden", "a/b"] {
            assert!(matches!(
                engine.open(name, 1, |_| Ok(())),
                Err(StoreError::InvalidName(_))
            ));
        }
    }

    #[test]
    fn journal_survives_engine_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let engine = StoreEngine::new(StoreConfig::on_disk(dir.path()));
            let db = engine.open("recipes", 2, recreate("recipes", "slug")).unwrap();
            insert(&db, "recipes", json!({ "slug": "soup", "name": "Soup" }));
            insert(&db, "recipes", json!({ "slug": "bread", "name": "Bread" }));
        }

        let engine = StoreEngine::new(StoreConfig::on_disk(dir.path()));
        let db = engine
            .open("recipes", 2, |_| panic!("no upgrade expected"))
            .unwrap();
        let tx = db.transaction("recipes", TxMode::ReadOnly).unwrap();
        assert_eq!(
            tx.get(&Key::from("soup")).unwrap(),
            Some(json!({ "slug": "soup", "name": "Soup" }))
        );
        assert_eq!(tx.count().unwrap(), 2);
    }

    #[test]
    fn compaction_on_open_keeps_state() {
        let dir = tempfile::tempdir().unwrap();
        {
            let engine = StoreEngine::new(StoreConfig::on_disk(dir.path()));
            let db = engine.open("labels", 1, recreate("labels", "id")).unwrap();
            for id in 0..10i64 {
                insert(&db, "labels", json!({ "id": id }));
            }
        }

        let engine = StoreEngine::new(StoreConfig::on_disk(dir.path()));
        let db = engine.open("labels", 1, |_| Ok(())).unwrap();
        assert_eq!(db.transaction("labels", TxMode::ReadOnly).unwrap().count().unwrap(), 10);

        // Compacted journal is a single frame.
        let journal = crate::Journal::open(&dir.path().join("labels.journal"), Default::default()).unwrap();
        assert_eq!(journal.recover().unwrap().len(), 1);
    }

    #[test]
    fn persisted_upgrade_wipes_on_restart_with_higher_version() {
        let dir = tempfile::tempdir().unwrap();
        {
            let engine = StoreEngine::new(StoreConfig::on_disk(dir.path()));
            let db = engine.open("labels", 1, recreate("labels", "id")).unwrap();
            insert(&db, "labels", json!({ "id": "1" }));
        }
        let engine = StoreEngine::new(StoreConfig::on_disk(dir.path()));
        let db = engine.open("labels", 2, recreate("labels", "id")).unwrap();
        assert_eq!(db.transaction("labels", TxMode::ReadOnly).unwrap().count().unwrap(), 0);
    }

    #[test]
    fn delete_database_removes_journal() {
        let dir = tempfile::tempdir().unwrap();
        let engine = StoreEngine::new(StoreConfig::on_disk(dir.path()));
        engine.open("labels", 1, recreate("labels", "id")).unwrap();
        assert_eq!(engine.database_names(), vec!["labels".to_string()]);

        assert!(engine.delete_database("labels").unwrap());
        assert!(!dir.path().join("labels.journal").exists());
        assert!(engine.database_names().is_empty());
        assert!(!engine.delete_database("labels").unwrap());
    }

    #[test]
    fn stored_names_come_from_journals() {
        let dir = tempfile::tempdir().unwrap();
        {
            let engine = StoreEngine::new(StoreConfig::on_disk(dir.path()));
            engine.open("recipes", 1, recreate("recipes", "slug")).unwrap();
            engine.open("labels", 1, recreate("labels", "id")).unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let engine = StoreEngine::new(StoreConfig::on_disk(dir.path()));
        assert!(engine.database_names().is_empty());
        assert_eq!(
            engine.stored_database_names().unwrap(),
            vec!["labels".to_string(), "recipes".to_string()]
        );
        assert!(StoreEngine::in_memory().stored_database_names().unwrap().is_empty());
    }
}
