use crate::key::Key;

/// Errors from store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// An insert collided with an existing primary key.
    #[error("duplicate key {key} in collection '{collection}'")]
    DuplicateKey { collection: String, key: Key },

    /// The named collection does not exist in this database.
    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    /// An upgrade tried to create a collection that already exists.
    #[error("collection already exists: {0}")]
    CollectionExists(String),

    /// The record has no string or integer value at the collection's key path.
    #[error("record has no usable key at '{key_path}'")]
    MissingKey { key_path: String },

    /// Opening at a version lower than the one already stored.
    #[error("requested version {requested} is lower than stored version {current}")]
    VersionDowngrade { requested: u64, current: u64 },

    /// Versions start at 1.
    #[error("invalid version {0}: versions start at 1")]
    InvalidVersion(u64),

    /// Database names become file names, so they are restricted.
    #[error("invalid database name: {0:?}")]
    InvalidName(String),

    /// A write request was made on a read-only transaction.
    #[error("transaction is read-only")]
    ReadOnly,

    /// An earlier request failed and the transaction can no longer be used.
    #[error("transaction aborted")]
    TransactionAborted,

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error from the journal.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A thread panicked while holding a store lock.
    #[error("store lock poisoned")]
    Poisoned,
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
