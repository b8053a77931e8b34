use std::sync::Arc;

use tokio::sync::watch;

/// A nullable cell shared with a UI layer.
///
/// Backed by a `watch` channel: whoever renders the value subscribes, the
/// cache only reads it and fills it. Clones share the same cell.
#[derive(Debug)]
pub struct ObservableRef<T> {
    tx: Arc<watch::Sender<Option<T>>>,
}

impl<T> Clone for ObservableRef<T> {
    fn clone(&self) -> Self {
        Self {
            tx: Arc::clone(&self.tx),
        }
    }
}

impl<T> ObservableRef<T> {
    /// An empty cell.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn with_value(value: T) -> Self {
        let (tx, _rx) = watch::channel(Some(value));
        Self { tx: Arc::new(tx) }
    }

    pub fn is_set(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Unconditionally replace the value.
    pub fn set(&self, value: Option<T>) {
        self.tx.send_replace(value);
    }

    /// Store `value` only if the cell is still empty. Returns whether it was
    /// stored.
    pub fn fill(&self, value: T) -> bool {
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(value);
            true
        })
    }

    /// Empty the cell, returning what it held.
    pub fn take(&self) -> Option<T> {
        self.tx.send_replace(None)
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<T>> {
        self.tx.subscribe()
    }
}

impl<T: Clone> ObservableRef<T> {
    pub fn get(&self) -> Option<T> {
        self.tx.borrow().clone()
    }
}

impl<T> Default for ObservableRef<T> {
    fn default() -> Self {
        Self::new()
    }
}
