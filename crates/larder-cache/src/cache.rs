use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use larder_store::Key;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::CacheError;
use crate::handle::Queued;
use crate::observable::ObservableRef;

/// Anything that can be cached: serializable, cloneable, and shareable
/// across tasks.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> Record for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// What happened to a write-behind request.
#[derive(Debug)]
pub enum WriteOutcome {
    /// This many records were committed.
    Written(usize),
    /// The store was not available; nothing was attempted.
    Skipped,
    /// The store rejected the write; nothing from the batch was applied.
    Failed(CacheError),
}

impl WriteOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, Self::Written(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// A write-behind request that has been handed to the store.
///
/// Creating it never waits on the store: the write is queued behind earlier
/// work on the same cache and runs on the blocking pool. Call sites normally
/// discard it with `let _ =`; awaiting it yields the [`WriteOutcome`].
#[must_use = "the write is queued either way; discard explicitly with `let _ =` or await the outcome"]
#[derive(Debug)]
pub struct PendingWrite {
    state: PendingState,
}

#[derive(Debug)]
enum PendingState {
    Settled(Option<WriteOutcome>),
    Queued(Queued<usize>),
}

impl PendingWrite {
    /// A write that was decided without touching the store.
    pub fn settled(outcome: WriteOutcome) -> Self {
        Self {
            state: PendingState::Settled(Some(outcome)),
        }
    }

    pub(crate) fn queued(queued: Queued<usize>) -> Self {
        Self {
            state: PendingState::Queued(queued),
        }
    }
}

impl Future for PendingWrite {
    type Output = WriteOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<WriteOutcome> {
        match &mut self.state {
            PendingState::Settled(outcome) => {
                Poll::Ready(outcome.take().unwrap_or(WriteOutcome::Skipped))
            }
            PendingState::Queued(queued) => Pin::new(queued).poll(cx).map(|result| match result {
                Ok(count) => WriteOutcome::Written(count),
                Err(e) => WriteOutcome::Failed(e),
            }),
        }
    }
}

/// Operations shared by [`KeyedCache`](crate::KeyedCache) and
/// [`BulkCache`](crate::BulkCache).
///
/// Writes return as soon as they are queued. Reads queue behind earlier
/// writes to the same cache, so a read sees every write issued before it.
/// Reads resolve to `None` whenever the store cannot answer, whether it is
/// still opening, failed to open, or simply has no such record.
#[async_trait]
pub trait Cache<T: Record>: Send + Sync {
    /// Insert one record. Fails (in the outcome) if the key is already cached.
    fn set(&self, entry: &T) -> PendingWrite;

    /// Insert every record in one transaction, in order. The first failure
    /// aborts the whole batch.
    fn set_multiple(&self, entries: &[T]) -> PendingWrite;

    /// Insert or overwrite one record.
    fn replace(&self, entry: &T) -> PendingWrite;

    /// Make `entries` the entire cached contents.
    fn replace_all(&self, entries: &[T]) -> PendingWrite;

    async fn get(&self, key: Key) -> Option<T>;

    async fn get_all(&self) -> Option<Vec<T>>;

    /// Fill `slot` from the cache if it is empty, and only if it is still
    /// empty once the lookup completes.
    async fn fill_ref(&self, slot: &ObservableRef<T>, key: Key) {
        if slot.is_set() {
            return;
        }
        if let Some(cached) = self.get(key).await {
            slot.fill(cached);
        }
    }

    /// [`fill_ref`](Self::fill_ref) over the whole collection. An absent slot
    /// is a no-op.
    async fn fill_all_ref(&self, slot: Option<&ObservableRef<Vec<T>>>) {
        let Some(slot) = slot else { return };
        if slot.is_set() {
            return;
        }
        if let Some(cached) = self.get_all().await {
            slot.fill(cached);
        }
    }
}
