use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info};

/// One-shot asynchronous signal carrying the schema version.
///
/// Created once by the composition root and cloned into every
/// [`StorageHandle`](crate::StorageHandle). The first [`supply`](Self::supply)
/// wins; every waiter, past or future, observes that value.
#[derive(Clone, Debug)]
pub struct VersionGate {
    tx: Arc<watch::Sender<Option<u64>>>,
}

impl VersionGate {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Deliver the schema version. Returns `false` (and changes nothing) if a
    /// version was already supplied.
    pub fn supply(&self, version: u64) -> bool {
        let accepted = self.tx.send_if_modified(|slot| match slot {
            Some(_) => false,
            None => {
                *slot = Some(version);
                true
            }
        });
        if accepted {
            info!(version, "schema version supplied");
        } else {
            debug!(version, current = ?self.peek(), "schema version already supplied; ignoring");
        }
        accepted
    }

    /// The supplied version, if any, without waiting.
    pub fn peek(&self) -> Option<u64> {
        *self.tx.borrow()
    }

    pub fn is_resolved(&self) -> bool {
        self.peek().is_some()
    }

    /// Wait until a version has been supplied.
    pub async fn wait(&self) -> u64 {
        let mut rx = self.tx.subscribe();
        loop {
            let current = *rx.borrow_and_update();
            if let Some(version) = current {
                return version;
            }
            // The sender lives in `self`, so the channel cannot close here.
            let _ = rx.changed().await;
        }
    }
}

impl Default for VersionGate {
    fn default() -> Self {
        Self::new()
    }
}
