use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use larder_store::{Database, StoreEngine, StoreResult, Transaction, TxMode};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::error::{CacheError, CacheResult};
use crate::gate::VersionGate;

/// Where a [`StorageHandle`] is in its open sequence.
///
/// Moves from `Pending` to exactly one of the other two and never back.
#[derive(Clone, Debug)]
pub enum Readiness {
    Pending,
    Ready(Database),
    Failed(Arc<str>),
}

impl Readiness {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

/// Store work queued on a handle's worker.
type Job = Box<dyn FnOnce(Database) + Send + 'static>;

/// Connection to one collection, opened in the background.
///
/// The database is named after the collection. On every version increase
/// (including the first open) the collection is dropped and recreated empty
/// with `key_field` as its primary key.
///
/// Once ready, the handle owns a worker task that runs [`run`](Self::run)
/// jobs one at a time, in submission order, on the blocking pool.
pub struct StorageHandle {
    collection: String,
    key_field: String,
    state: watch::Receiver<Readiness>,
    jobs: mpsc::UnboundedSender<Job>,
}

impl StorageHandle {
    /// Declare the handle and start its open sequence.
    ///
    /// Must be called within a tokio runtime. The open waits on `gate`, so a
    /// handle can be declared before the schema version is known.
    pub fn new(
        engine: Arc<StoreEngine>,
        gate: &VersionGate,
        collection: impl Into<String>,
        key_field: impl Into<String>,
    ) -> Self {
        let collection = collection.into();
        let key_field = key_field.into();
        let (tx, rx) = watch::channel(Readiness::Pending);
        let (jobs, queue) = mpsc::unbounded_channel();

        let gate = gate.clone();
        let name = collection.clone();
        let key = key_field.clone();
        tokio::spawn(async move {
            let version = gate.wait().await;
            debug!(collection = %name, version, "opening cache store");

            let task_name = name.clone();
            let opened = tokio::task::spawn_blocking(move || {
                open_collection(&engine, &task_name, &key, version)
            })
            .await;

            let next = match opened {
                Ok(Ok(db)) => {
                    info!(collection = %name, version, "cache store ready");
                    Readiness::Ready(db)
                }
                Ok(Err(e)) => {
                    warn!(collection = %name, version, error = %e, "cache store failed to open");
                    Readiness::Failed(e.to_string().into())
                }
                Err(e) => {
                    warn!(collection = %name, error = %e, "cache open task did not complete");
                    Readiness::Failed(e.to_string().into())
                }
            };
            let db = match &next {
                Readiness::Ready(db) => Some(db.clone()),
                _ => None,
            };
            tx.send_replace(next);
            if let Some(db) = db {
                serve(name, db, queue).await;
            }
        });

        Self {
            collection,
            key_field,
            state: rx,
            jobs,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn key_field(&self) -> &str {
        &self.key_field
    }

    /// Current state of the open sequence.
    pub fn readiness(&self) -> Readiness {
        self.state.borrow().clone()
    }

    /// Wait until the open sequence has settled, successfully or not.
    ///
    /// Cache operations never wait on their own; this is for bootstrap code
    /// and tests.
    pub async fn ready(&self) -> Readiness {
        let mut rx = self.state.clone();
        let settled = rx.wait_for(|state| !state.is_pending()).await.map(|s| s.clone());
        settled.unwrap_or_else(|_| Readiness::Failed("open task ended without settling".into()))
    }

    /// A transaction on this collection, or the reason there isn't one.
    ///
    /// The transaction runs on the calling thread. Async callers should use
    /// [`run`](Self::run) instead.
    pub fn try_acquire(&self, mode: TxMode) -> CacheResult<Transaction> {
        Ok(self.database()?.transaction(&self.collection, mode)?)
    }

    /// Queue `work` against a fresh transaction on this collection.
    ///
    /// Fails immediately when the store is not ready. Otherwise the work runs
    /// on the handle's worker after everything queued before it, and the
    /// returned [`Queued`] resolves to its result. Dropping the `Queued` does
    /// not cancel the work.
    pub fn run<R, F>(&self, mode: TxMode, work: F) -> CacheResult<Queued<R>>
    where
        F: FnOnce(Transaction) -> CacheResult<R> + Send + 'static,
        R: Send + 'static,
    {
        self.database()?;
        let (done, result) = oneshot::channel();
        let collection = self.collection.clone();
        let job: Job = Box::new(move |db: Database| {
            let outcome = db
                .transaction(&collection, mode)
                .map_err(CacheError::from)
                .and_then(work);
            let _ = done.send(outcome);
        });

        self.jobs.send(job).map_err(|_| self.worker_stopped())?;
        Ok(Queued {
            collection: self.collection.clone(),
            result,
        })
    }

    fn database(&self) -> CacheResult<Database> {
        match &*self.state.borrow() {
            Readiness::Ready(db) => Ok(db.clone()),
            Readiness::Pending => Err(CacheError::Pending(self.collection.clone())),
            Readiness::Failed(reason) => Err(CacheError::Unavailable {
                collection: self.collection.clone(),
                reason: reason.to_string(),
            }),
        }
    }

    fn worker_stopped(&self) -> CacheError {
        CacheError::Unavailable {
            collection: self.collection.clone(),
            reason: "store worker stopped".into(),
        }
    }

    /// A transaction on this collection, or `None` while the store is
    /// unavailable.
    pub fn acquire_store(&self, mode: TxMode) -> Option<Transaction> {
        self.try_acquire(mode)
            .map_err(|e| debug!(collection = %self.collection, error = %e, "store not available"))
            .ok()
    }
}

impl std::fmt::Debug for StorageHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageHandle")
            .field("collection", &self.collection)
            .field("key_field", &self.key_field)
            .field("readiness", &*self.state.borrow())
            .finish()
    }
}

/// Result of work queued with [`StorageHandle::run`].
#[must_use = "the work is queued either way; await this to observe its result"]
#[derive(Debug)]
pub struct Queued<R> {
    collection: String,
    result: oneshot::Receiver<CacheResult<R>>,
}

impl<R> Future for Queued<R> {
    type Output = CacheResult<R>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        Pin::new(&mut this.result).poll(cx).map(|received| {
            received.unwrap_or_else(|_| {
                Err(CacheError::Unavailable {
                    collection: this.collection.clone(),
                    reason: "store worker stopped".into(),
                })
            })
        })
    }
}

/// Run queued jobs in order until every handle sender is gone.
async fn serve(collection: String, db: Database, mut queue: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = queue.recv().await {
        let db = db.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || job(db)).await {
            warn!(%collection, error = %e, "store job did not complete");
        }
    }
    debug!(%collection, "store worker stopped");
}

fn open_collection(
    engine: &StoreEngine,
    collection: &str,
    key_field: &str,
    version: u64,
) -> StoreResult<Database> {
    engine.open(collection, version, |upgrade| {
        if upgrade.contains_collection(collection) {
            upgrade.delete_collection(collection)?;
        }
        upgrade.create_collection(collection, key_field)
    })
}
