use std::collections::BTreeMap;

use serde_json::Value;
use tracing::debug;

use crate::database::{encode_body, Collection, Database};
use crate::error::{StoreError, StoreResult};
use crate::journal::JournalOp;
use crate::key::Key;

/// Access mode of a [`Transaction`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxMode {
    ReadOnly,
    ReadWrite,
}

/// A write request staged inside a read-write transaction.
#[derive(Clone, Debug)]
enum Request {
    Add(Key, Value),
    Put(Key, Value),
    Delete(Key),
    Clear,
}

/// Undo information for one applied request.
enum Undo {
    Restore(Key, Option<Value>),
    RestoreAll(BTreeMap<Key, Value>),
}

/// A transaction scoped to a single collection.
///
/// Reads go straight to the committed state, overlaid with this
/// transaction's own staged writes. Writes are staged and applied atomically
/// by [`commit`](Self::commit); dropping an uncommitted transaction discards
/// them. The first failed request aborts the transaction, and every later
/// request (and the commit) reports [`StoreError::TransactionAborted`].
pub struct Transaction {
    db: Database,
    collection: String,
    key_path: String,
    mode: TxMode,
    requests: Vec<Request>,
    aborted: bool,
}

impl Transaction {
    pub(crate) fn new(db: Database, collection: String, key_path: String, mode: TxMode) -> Self {
        Self {
            db,
            collection,
            key_path,
            mode,
            requests: Vec::new(),
            aborted: false,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn key_path(&self) -> &str {
        &self.key_path
    }

    // ---- Reads ----

    /// Look up a record by primary key.
    pub fn get(&self, key: &Key) -> StoreResult<Option<Value>> {
        self.check_live()?;
        if let Some(staged) = self.staged_lookup(key) {
            return Ok(staged);
        }
        let state = self.db.inner.read()?;
        Ok(state.collection(&self.collection)?.records.get(key).cloned())
    }

    /// Every record in key order.
    pub fn get_all(&self) -> StoreResult<Vec<Value>> {
        self.check_live()?;
        let state = self.db.inner.read()?;
        let committed = &state.collection(&self.collection)?.records;
        if self.requests.is_empty() {
            return Ok(committed.values().cloned().collect());
        }

        let mut view = committed.clone();
        drop(state);
        for request in &self.requests {
            match request {
                Request::Add(key, value) | Request::Put(key, value) => {
                    view.insert(key.clone(), value.clone());
                }
                Request::Delete(key) => {
                    view.remove(key);
                }
                Request::Clear => view.clear(),
            }
        }
        Ok(view.into_values().collect())
    }

    pub fn count(&self) -> StoreResult<usize> {
        Ok(self.get_all()?.len())
    }

    // ---- Writes ----

    /// Insert a new record. Fails with [`StoreError::DuplicateKey`] if the key
    /// is already present.
    pub fn add(&mut self, record: Value) -> StoreResult<Key> {
        self.check_writable()?;
        let key = self.fail_on_err(Key::extract(&record, &self.key_path))?;
        if self.get(&key)?.is_some() {
            self.aborted = true;
            return Err(StoreError::DuplicateKey {
                collection: self.collection.clone(),
                key,
            });
        }
        self.requests.push(Request::Add(key.clone(), record));
        Ok(key)
    }

    /// Insert or overwrite a record.
    pub fn put(&mut self, record: Value) -> StoreResult<Key> {
        self.check_writable()?;
        let key = self.fail_on_err(Key::extract(&record, &self.key_path))?;
        self.requests.push(Request::Put(key.clone(), record));
        Ok(key)
    }

    pub fn delete(&mut self, key: &Key) -> StoreResult<()> {
        self.check_writable()?;
        self.requests.push(Request::Delete(key.clone()));
        Ok(())
    }

    /// Remove every record in the collection.
    pub fn clear(&mut self) -> StoreResult<()> {
        self.check_writable()?;
        self.requests.push(Request::Clear);
        Ok(())
    }

    /// Apply every staged write atomically and persist it as one journal
    /// frame. On failure nothing is applied.
    pub fn commit(self) -> StoreResult<()> {
        self.check_live()?;
        if self.mode == TxMode::ReadOnly || self.requests.is_empty() {
            return Ok(());
        }

        let mut state = self.db.inner.write()?;
        let target = state.collection_mut(&self.collection)?;
        let mut undo = Vec::with_capacity(self.requests.len());
        let mut ops = Vec::with_capacity(self.requests.len());

        for request in &self.requests {
            if let Err(e) = apply(&self.collection, target, request, &mut undo, &mut ops) {
                rollback(target, undo);
                return Err(e);
            }
        }

        if let Err(e) = self.db.inner.record(ops) {
            rollback(target, undo);
            return Err(e);
        }

        debug!(
            database = self.db.name(),
            collection = %self.collection,
            writes = self.requests.len(),
            "transaction committed"
        );
        Ok(())
    }

    // ---- Internals ----

    fn check_live(&self) -> StoreResult<()> {
        if self.aborted {
            return Err(StoreError::TransactionAborted);
        }
        Ok(())
    }

    fn check_writable(&self) -> StoreResult<()> {
        self.check_live()?;
        if self.mode == TxMode::ReadOnly {
            return Err(StoreError::ReadOnly);
        }
        Ok(())
    }

    fn fail_on_err<T>(&mut self, result: StoreResult<T>) -> StoreResult<T> {
        if result.is_err() {
            self.aborted = true;
        }
        result
    }

    /// `Some(value)` when a staged write decides the answer for `key`.
    fn staged_lookup(&self, key: &Key) -> Option<Option<Value>> {
        self.requests.iter().rev().find_map(|request| match request {
            Request::Add(k, v) | Request::Put(k, v) if k == key => Some(Some(v.clone())),
            Request::Delete(k) if k == key => Some(None),
            Request::Clear => Some(None),
            _ => None,
        })
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("database", &self.db.name())
            .field("collection", &self.collection)
            .field("mode", &self.mode)
            .field("pending_writes", &self.requests.len())
            .field("aborted", &self.aborted)
            .finish()
    }
}

fn apply(
    collection: &str,
    target: &mut Collection,
    request: &Request,
    undo: &mut Vec<Undo>,
    ops: &mut Vec<JournalOp>,
) -> StoreResult<()> {
    match request {
        Request::Add(key, value) | Request::Put(key, value) => {
            // Re-checked under the write lock: another writer may have
            // committed the same key since the request was staged.
            if matches!(request, Request::Add(..)) && target.records.contains_key(key) {
                return Err(StoreError::DuplicateKey {
                    collection: collection.to_string(),
                    key: key.clone(),
                });
            }
            let body = encode_body(value)?;
            let previous = target.records.insert(key.clone(), value.clone());
            undo.push(Undo::Restore(key.clone(), previous));
            ops.push(JournalOp::Put {
                collection: collection.to_string(),
                key: key.clone(),
                body,
            });
        }
        Request::Delete(key) => {
            let previous = target.records.remove(key);
            undo.push(Undo::Restore(key.clone(), previous));
            ops.push(JournalOp::Delete {
                collection: collection.to_string(),
                key: key.clone(),
            });
        }
        Request::Clear => {
            undo.push(Undo::RestoreAll(std::mem::take(&mut target.records)));
            ops.push(JournalOp::Clear {
                collection: collection.to_string(),
            });
        }
    }
    Ok(())
}

fn rollback(target: &mut Collection, undo: Vec<Undo>) {
    for entry in undo.into_iter().rev() {
        match entry {
            Undo::Restore(key, Some(value)) => {
                target.records.insert(key, value);
            }
            Undo::Restore(key, None) => {
                target.records.remove(&key);
            }
            Undo::RestoreAll(records) => target.records = records,
        }
    }
}
