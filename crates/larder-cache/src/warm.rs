use std::marker::PhantomData;

use async_trait::async_trait;
use larder_store::Key;
use tracing::debug;

use crate::cache::{Cache, Record};
use crate::observable::ObservableRef;

/// The source of truth a cache shadows, typically a remote API.
#[async_trait]
pub trait Fetch<T>: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn fetch_one(&self, key: &Key) -> Result<T, Self::Error>;

    async fn fetch_all(&self) -> Result<Vec<T>, Self::Error>;
}

/// Show cached data immediately, then replace it with fresh data.
///
/// Each load fills the slot from the cache and fetches from the source at
/// the same time. A cached value only lands in an empty slot, so a fetch that
/// finishes first is never clobbered by the stale copy. The fresh value is
/// then written behind into the cache.
pub struct WarmLoader<T, C, F> {
    cache: C,
    source: F,
    _record: PhantomData<fn() -> T>,
}

impl<T, C, F> WarmLoader<T, C, F>
where
    T: Record,
    C: Cache<T>,
    F: Fetch<T>,
{
    pub fn new(cache: C, source: F) -> Self {
        Self {
            cache,
            source,
            _record: PhantomData,
        }
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    pub fn source(&self) -> &F {
        &self.source
    }

    /// Load one record into `slot`. On fetch failure whatever the cache
    /// provided stays in the slot.
    pub async fn load_one(&self, slot: &ObservableRef<T>, key: Key) -> Result<(), F::Error> {
        let (_, fetched) = tokio::join!(
            self.cache.fill_ref(slot, key.clone()),
            self.source.fetch_one(&key),
        );
        let fresh = fetched?;

        let _ = self.cache.replace(&fresh);
        debug!(%key, "queued refresh of cached record");
        slot.set(Some(fresh));
        Ok(())
    }

    /// Load the whole collection into `slot`.
    pub async fn load_all(&self, slot: &ObservableRef<Vec<T>>) -> Result<(), F::Error> {
        let (_, fetched) = tokio::join!(
            self.cache.fill_all_ref(Some(slot)),
            self.source.fetch_all(),
        );
        let fresh = fetched?;

        let _ = self.cache.replace_all(&fresh);
        debug!(records = fresh.len(), "queued refresh of cached collection");
        slot.set(Some(fresh));
        Ok(())
    }
}
