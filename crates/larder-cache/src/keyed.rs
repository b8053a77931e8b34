use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use larder_store::{Key, StoreEngine, Transaction, TxMode};
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::{Cache, PendingWrite, Record, WriteOutcome};
use crate::error::{CacheError, CacheResult};
use crate::gate::VersionGate;
use crate::handle::StorageHandle;

/// How a batch of records is written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WriteMode {
    /// Insert only; an existing key aborts the batch.
    Insert,
    /// Insert or overwrite.
    Upsert,
    /// Clear the collection, then insert.
    ReplaceAll,
}

/// One record per key, addressable individually or all at once.
pub struct KeyedCache<T> {
    handle: StorageHandle,
    _record: PhantomData<fn() -> T>,
}

impl<T: Record> KeyedCache<T> {
    /// Declare a cache over collection `name`, keyed by the record field
    /// `key_field`. The store opens once `gate` has a version.
    pub fn new(
        engine: Arc<StoreEngine>,
        gate: &VersionGate,
        name: impl Into<String>,
        key_field: impl Into<String>,
    ) -> Self {
        Self {
            handle: StorageHandle::new(engine, gate, name, key_field),
            _record: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        self.handle.collection()
    }

    pub fn key_field(&self) -> &str {
        self.handle.key_field()
    }

    pub fn handle(&self) -> &StorageHandle {
        &self.handle
    }

    /// Insert or overwrite every record in one transaction. The first failure
    /// aborts the whole batch.
    pub fn replace_multiple(&self, entries: &[T]) -> PendingWrite {
        self.write(entries, WriteMode::Upsert, entries.len())
    }

    /// Drop every cached record.
    pub fn clear(&self) -> PendingWrite {
        self.write(&[], WriteMode::ReplaceAll, 0)
    }

    /// Look up one record, keeping the reason when there is no answer.
    pub async fn try_get(&self, key: &Key) -> CacheResult<Option<T>> {
        let key = key.clone();
        self.handle
            .run(TxMode::ReadOnly, move |tx| {
                tx.get(&key)?
                    .map(serde_json::from_value::<T>)
                    .transpose()
                    .map_err(CacheError::from)
            })?
            .await
    }

    /// Every record in key order, keeping the reason when there is no answer.
    pub async fn try_get_all(&self) -> CacheResult<Vec<T>> {
        self.handle
            .run(TxMode::ReadOnly, |tx| {
                tx.get_all()?
                    .into_iter()
                    .map(|value| serde_json::from_value::<T>(value).map_err(CacheError::from))
                    .collect::<CacheResult<Vec<T>>>()
            })?
            .await
    }

    /// Queue a batch write. `reported` is the count a successful write
    /// resolves to.
    pub(crate) fn write(&self, entries: &[T], mode: WriteMode, reported: usize) -> PendingWrite {
        let values = match entries.iter().map(serde_json::to_value).collect::<Result<Vec<_>, _>>() {
            Ok(values) => values,
            Err(e) => {
                warn!(cache = self.name(), error = %e, "record could not be serialized");
                return PendingWrite::settled(WriteOutcome::Failed(e.into()));
            }
        };

        let cache = self.name().to_string();
        let queued = self.handle.run(TxMode::ReadWrite, move |tx| {
            let records = values.len();
            write_batch(tx, values, mode).map(|()| reported).map_err(|e| {
                warn!(%cache, records, error = %e, "write-behind failed");
                e
            })
        });

        match queued {
            Ok(queued) => PendingWrite::queued(queued),
            Err(e) => {
                debug!(cache = self.name(), error = %e, "write skipped");
                PendingWrite::settled(WriteOutcome::Skipped)
            }
        }
    }
}

fn write_batch(mut tx: Transaction, values: Vec<Value>, mode: WriteMode) -> CacheResult<()> {
    if mode == WriteMode::ReplaceAll {
        tx.clear()?;
    }
    for value in values {
        match mode {
            WriteMode::Insert => tx.add(value)?,
            WriteMode::Upsert | WriteMode::ReplaceAll => tx.put(value)?,
        };
    }
    tx.commit()?;
    Ok(())
}

#[async_trait]
impl<T: Record> Cache<T> for KeyedCache<T> {
    fn set(&self, entry: &T) -> PendingWrite {
        self.write(std::slice::from_ref(entry), WriteMode::Insert, 1)
    }

    fn set_multiple(&self, entries: &[T]) -> PendingWrite {
        self.write(entries, WriteMode::Insert, entries.len())
    }

    fn replace(&self, entry: &T) -> PendingWrite {
        self.write(std::slice::from_ref(entry), WriteMode::Upsert, 1)
    }

    fn replace_all(&self, entries: &[T]) -> PendingWrite {
        self.write(entries, WriteMode::ReplaceAll, entries.len())
    }

    async fn get(&self, key: Key) -> Option<T> {
        self.try_get(&key).await.unwrap_or_else(|e| {
            debug!(cache = self.name(), %key, error = %e, "lookup treated as miss");
            None
        })
    }

    async fn get_all(&self) -> Option<Vec<T>> {
        self.try_get_all()
            .await
            .map_err(|e| debug!(cache = self.name(), error = %e, "bulk lookup treated as miss"))
            .ok()
    }
}

impl<T> std::fmt::Debug for KeyedCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedCache").field("handle", &self.handle).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observable::ObservableRef;
    use proptest::prelude::*;
    use serde::{Deserialize, Serialize};
    use std::collections::BTreeMap;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Label {
        id: String,
        name: String,
    }

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Recipe {
        slug: String,
        servings: u32,
    }

    fn label(id: &str, name: &str) -> Label {
        Label {
            id: id.into(),
            name: name.into(),
        }
    }

    async fn ready_labels() -> KeyedCache<Label> {
        let gate = VersionGate::new();
        gate.supply(3);
        let cache = KeyedCache::new(Arc::new(StoreEngine::in_memory()), &gate, "labels", "id");
        assert!(cache.handle().ready().await.is_ready());
        cache
    }

    #[tokio::test]
    async fn get_before_version_is_supplied_is_absent() {
        let gate = VersionGate::new();
        let cache: KeyedCache<Recipe> =
            KeyedCache::new(Arc::new(StoreEngine::in_memory()), &gate, "recipeCache", "slug");

        assert_eq!(cache.get("abc".into()).await, None);
        assert_eq!(cache.get_all().await, None);
        let outcome = cache.set(&Recipe { slug: "abc".into(), servings: 2 }).await;
        assert!(outcome.is_skipped());
    }

    #[tokio::test]
    async fn set_then_get() {
        let cache = ready_labels().await;
        let entry = label("1", "A");
        let _ = cache.set(&entry);
        assert_eq!(cache.get("1".into()).await, Some(entry));
        assert_eq!(cache.get("2".into()).await, None);
    }

    #[tokio::test]
    async fn set_multiple_then_get_all() {
        let cache = ready_labels().await;
        let outcome = cache.set_multiple(&[label("1", "A"), label("2", "B")]).await;
        assert!(matches!(outcome, WriteOutcome::Written(2)));
        assert_eq!(
            cache.get_all().await,
            Some(vec![label("1", "A"), label("2", "B")])
        );
    }

    #[tokio::test]
    async fn duplicate_set_is_reported_not_raised() {
        let cache = ready_labels().await;
        let _ = cache.set(&label("1", "A"));
        let outcome = cache.set(&label("1", "changed")).await;
        assert!(matches!(
            outcome,
            WriteOutcome::Failed(CacheError::Store(larder_store::StoreError::DuplicateKey { .. }))
        ));
        assert_eq!(cache.get("1".into()).await, Some(label("1", "A")));
    }

    #[tokio::test]
    async fn duplicate_mid_batch_aborts_the_batch() {
        let cache = ready_labels().await;
        let _ = cache.set(&label("2", "B"));
        let outcome = cache.set_multiple(&[label("1", "A"), label("2", "dup"), label("3", "C")]).await;
        assert!(outcome.is_failed());
        assert_eq!(cache.get_all().await, Some(vec![label("2", "B")]));
    }

    #[tokio::test]
    async fn replace_overwrites_and_replace_all_resets() {
        let cache = ready_labels().await;
        let _ = cache.set_multiple(&[label("1", "A"), label("2", "B")]);
        assert!(cache.replace(&label("1", "A2")).await.is_written());
        assert_eq!(cache.get("1".into()).await, Some(label("1", "A2")));

        assert!(cache.replace_all(&[label("9", "Z")]).await.is_written());
        assert_eq!(cache.get_all().await, Some(vec![label("9", "Z")]));

        assert!(cache.clear().await.is_written());
        assert_eq!(cache.get_all().await, Some(vec![]));
    }

    #[tokio::test]
    async fn replace_multiple_is_one_transaction() {
        let cache = ready_labels().await;
        let _ = cache.set(&label("1", "A"));

        let outcome = cache.replace_multiple(&[label("1", "A2"), label("2", "B")]).await;
        assert!(matches!(outcome, WriteOutcome::Written(2)));
        assert_eq!(cache.get_all().await, Some(vec![label("1", "A2"), label("2", "B")]));

        let gate = VersionGate::new();
        gate.supply(1);
        let raw: KeyedCache<serde_json::Value> =
            KeyedCache::new(Arc::new(StoreEngine::in_memory()), &gate, "labels", "id");
        raw.handle().ready().await;
        let outcome = raw
            .replace_multiple(&[
                serde_json::json!({ "id": "1", "name": "A" }),
                serde_json::json!({ "name": "no id" }),
            ])
            .await;
        assert!(outcome.is_failed());
        assert_eq!(raw.get_all().await, Some(vec![]));
    }

    #[test]
    fn writes_are_queued_not_run_on_the_caller() {
        let dir = tempfile::tempdir().unwrap();
        let journal = dir.path().join("labels.journal");
        let config = larder_store::StoreConfig {
            sync_mode: larder_store::SyncMode::EveryCommit,
            ..larder_store::StoreConfig::on_disk(dir.path())
        };

        runtime().block_on(async {
            let gate = VersionGate::new();
            gate.supply(1);
            let cache: KeyedCache<Label> =
                KeyedCache::new(Arc::new(StoreEngine::new(config)), &gate, "labels", "id");
            cache.handle().ready().await;
            let before = std::fs::metadata(&journal).unwrap().len();

            let mut last = None;
            for i in 0..200 {
                last = Some(cache.set(&label(&i.to_string(), "x")));
            }
            // Nothing has yielded to the worker yet, so no commit has run.
            assert_eq!(std::fs::metadata(&journal).unwrap().len(), before);

            assert!(last.unwrap().await.is_written());
            assert!(std::fs::metadata(&journal).unwrap().len() > before);
            assert_eq!(cache.get_all().await.map(|all| all.len()), Some(200));
        });
    }

    #[tokio::test]
    async fn try_get_keeps_the_reason() {
        let gate = VersionGate::new();
        let cache: KeyedCache<Label> =
            KeyedCache::new(Arc::new(StoreEngine::in_memory()), &gate, "labels", "id");
        assert!(matches!(cache.try_get(&"1".into()).await, Err(CacheError::Pending(_))));

        gate.supply(1);
        cache.handle().ready().await;
        assert!(matches!(cache.try_get(&"1".into()).await, Ok(None)));
    }

    #[tokio::test]
    async fn undecodable_record_reads_as_absent() {
        let cache = ready_labels().await;
        let mut tx = cache.handle().acquire_store(TxMode::ReadWrite).unwrap();
        tx.add(serde_json::json!({ "id": "odd", "name": 42 })).unwrap();
        tx.commit().unwrap();

        assert!(matches!(
            cache.try_get(&"odd".into()).await,
            Err(CacheError::Serialization(_))
        ));
        assert_eq!(cache.get("odd".into()).await, None);
    }

    #[tokio::test]
    async fn fill_ref_never_overwrites() {
        let cache = ready_labels().await;
        let _ = cache.set(&label("y", "cached"));

        let slot = ObservableRef::with_value(label("x", "existing"));
        cache.fill_ref(&slot, "y".into()).await;
        assert_eq!(slot.get(), Some(label("x", "existing")));
    }

    #[tokio::test]
    async fn fill_ref_leaves_empty_slot_on_miss() {
        let cache = ready_labels().await;
        let slot = ObservableRef::new();
        cache.fill_ref(&slot, "missing".into()).await;
        assert_eq!(slot.get(), None);
    }

    #[tokio::test]
    async fn fill_ref_fills_empty_slot_on_hit() {
        let cache = ready_labels().await;
        let _ = cache.set(&label("1", "A"));
        let slot = ObservableRef::new();
        cache.fill_ref(&slot, "1".into()).await;
        assert_eq!(slot.get(), Some(label("1", "A")));
    }

    #[tokio::test]
    async fn fill_all_ref_handles_absent_and_set_slots() {
        let cache = ready_labels().await;
        let _ = cache.set_multiple(&[label("1", "A")]);

        cache.fill_all_ref(None).await;

        let preset = ObservableRef::with_value(vec![label("0", "mine")]);
        cache.fill_all_ref(Some(&preset)).await;
        assert_eq!(preset.get(), Some(vec![label("0", "mine")]));

        let empty = ObservableRef::new();
        cache.fill_all_ref(Some(&empty)).await;
        assert_eq!(empty.get(), Some(vec![label("1", "A")]));
    }

    #[tokio::test]
    async fn fill_before_ready_leaves_slot_empty() {
        let gate = VersionGate::new();
        let cache: KeyedCache<Label> =
            KeyedCache::new(Arc::new(StoreEngine::in_memory()), &gate, "labels", "id");
        let slot = ObservableRef::new();
        cache.fill_ref(&slot, "1".into()).await;
        let all = ObservableRef::new();
        cache.fill_all_ref(Some(&all)).await;
        assert!(!slot.is_set());
        assert!(!all.is_set());
    }

    #[tokio::test]
    async fn persisted_cache_survives_restart_at_same_version() {
        let dir = tempfile::tempdir().unwrap();
        let config = larder_store::StoreConfig::on_disk(dir.path());
        {
            let gate = VersionGate::new();
            gate.supply(2);
            let cache = KeyedCache::new(Arc::new(StoreEngine::new(config.clone())), &gate, "labels", "id");
            cache.handle().ready().await;
            assert!(cache.set(&label("1", "A")).await.is_written());
        }

        let gate = VersionGate::new();
        gate.supply(2);
        let cache: KeyedCache<Label> =
            KeyedCache::new(Arc::new(StoreEngine::new(config.clone())), &gate, "labels", "id");
        cache.handle().ready().await;
        assert_eq!(cache.get("1".into()).await, Some(label("1", "A")));

        let gate = VersionGate::new();
        gate.supply(3);
        let bumped: KeyedCache<Label> =
            KeyedCache::new(Arc::new(StoreEngine::new(config)), &gate, "labels", "id");
        bumped.handle().ready().await;
        assert_eq!(bumped.get_all().await, Some(vec![]));
    }

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
    }

    proptest! {
        #[test]
        fn set_then_get_returns_the_entry(slug in "[a-z0-9-]{1,16}", servings in 0u32..100) {
            let entry = Recipe { slug: slug.clone(), servings };
            let found = runtime().block_on(async {
                let gate = VersionGate::new();
                gate.supply(1);
                let cache = KeyedCache::new(Arc::new(StoreEngine::in_memory()), &gate, "recipeCache", "slug");
                cache.handle().ready().await;
                let _ = cache.set(&entry);
                cache.get(slug.into()).await
            });
            prop_assert_eq!(found, Some(entry));
        }

        #[test]
        fn set_multiple_then_get_all_returns_exactly_those(
            names in proptest::collection::btree_map("[a-z]{1,8}", "[A-Za-z ]{0,12}", 0..20)
        ) {
            let entries: Vec<Label> = names.iter().map(|(id, name)| label(id, name)).collect();
            let found = runtime().block_on(async {
                let cache = ready_labels().await;
                let _ = cache.set_multiple(&entries);
                cache.get_all().await
            });
            let found: BTreeMap<String, Label> = found
                .unwrap_or_default()
                .into_iter()
                .map(|l| (l.id.clone(), l))
                .collect();
            let expected: BTreeMap<String, Label> =
                entries.into_iter().map(|l| (l.id.clone(), l)).collect();
            prop_assert_eq!(found, expected);
        }
    }
}
