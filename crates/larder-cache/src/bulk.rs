use std::sync::Arc;

use async_trait::async_trait;
use larder_store::{Key, StoreEngine};
use serde::{Deserialize, Serialize};

use crate::cache::{Cache, PendingWrite, Record, WriteOutcome};
use crate::keyed::WriteMode;
use crate::gate::VersionGate;
use crate::keyed::KeyedCache;
use crate::observable::ObservableRef;

/// Primary key of the single record a [`BulkCache`] stores.
pub const ENVELOPE_KEY: &str = "key";

/// A whole collection wrapped as one addressable record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub key: String,
    pub data: Vec<T>,
}

impl<T> Envelope<T> {
    pub fn new(data: Vec<T>) -> Self {
        Self {
            key: ENVELOPE_KEY.to_string(),
            data,
        }
    }
}

/// A cache that stores the entire collection as a single record.
///
/// Reading or writing everything costs one request regardless of size, but
/// individual records cannot be addressed: `set`, `replace`, `get` and
/// `fill_ref` are inert. Use [`KeyedCache`] when per-key access is needed.
///
/// Every `set_multiple` replaces the previous collection (last write wins).
pub struct BulkCache<T> {
    inner: KeyedCache<Envelope<T>>,
}

impl<T: Record> BulkCache<T> {
    pub fn new(engine: Arc<StoreEngine>, gate: &VersionGate, name: impl Into<String>) -> Self {
        Self {
            inner: KeyedCache::new(engine, gate, name, "key"),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// The keyed cache holding the envelope.
    pub fn inner(&self) -> &KeyedCache<Envelope<T>> {
        &self.inner
    }

    /// Drop the cached collection.
    pub fn clear(&self) -> PendingWrite {
        self.inner.clear()
    }
}

#[async_trait]
impl<T: Record> Cache<T> for BulkCache<T> {
    fn set(&self, _entry: &T) -> PendingWrite {
        PendingWrite::settled(WriteOutcome::Skipped)
    }

    fn set_multiple(&self, entries: &[T]) -> PendingWrite {
        let envelope = Envelope::new(entries.to_vec());
        self.inner
            .write(std::slice::from_ref(&envelope), WriteMode::Upsert, entries.len())
    }

    fn replace(&self, _entry: &T) -> PendingWrite {
        PendingWrite::settled(WriteOutcome::Skipped)
    }

    fn replace_all(&self, entries: &[T]) -> PendingWrite {
        self.set_multiple(entries)
    }

    async fn get(&self, _key: Key) -> Option<T> {
        None
    }

    async fn get_all(&self) -> Option<Vec<T>> {
        self.inner
            .get(ENVELOPE_KEY.into())
            .await
            .map(|envelope| envelope.data)
    }

    async fn fill_ref(&self, _slot: &ObservableRef<T>, _key: Key) {}
}

impl<T> std::fmt::Debug for BulkCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkCache").field("inner", &self.inner).finish()
    }
}
